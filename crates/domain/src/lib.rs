//! # uhab-domain
//!
//! Pure domain model for the uhab home automation hub.
//!
//! ## Responsibilities
//! - Typed item states and the commands they carry
//! - Item kinds, stereotypes and the static item definitions read from config
//! - Rule events emitted by the bus and the click classifier
//! - The `key=value:p1,p2` binding mini-language shared by every binding
//! - Error conventions used across the workspace
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod binding_config;
pub mod error;
pub mod item;
pub mod rule;
pub mod rule_event;
pub mod state;
