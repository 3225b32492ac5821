//! # uhab-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the `StateStore` port defined in `uhab-app::ports`
//! - Manage the `SQLite` connection pool lifecycle
//! - Run embedded sqlx migrations
//! - Map item states to JSON rows keyed by item name
//!
//! ## Dependency rule
//! Depends on `uhab-app` (for port traits) and `uhab-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod error;
pub mod pool;
pub mod state_store;

pub use pool::{Config, Database};
pub use state_store::SqliteStateStore;
