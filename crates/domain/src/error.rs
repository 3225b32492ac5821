//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HubError`]
//! at the boundary. Adapters box their transport errors into
//! [`HubError::DeviceIo`].

use crate::state::StateKind;

/// Top-level error returned by bus, repository and binding operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A configuration string or file could not be understood.
    #[error("configuration error")]
    Config(#[from] ConfigError),

    /// An item or rule definition violates a structural invariant.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// A bounded queue or pool is full.
    #[error(transparent)]
    ResourceExhausted(#[from] ResourceExhausted),

    /// A device or transport operation failed.
    #[error("device I/O error")]
    DeviceIo(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Persisting or loading item state failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A state accessor was used on a state of another variant.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    /// The requested item, binding or device does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The named component has been shut down or was never started.
    #[error("{0} is closed")]
    Closed(&'static str),
}

/// Errors raised while parsing configuration strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A binding parameter has no key.
    #[error("malformed binding parameter `{0}`")]
    Syntax(String),

    /// A required key is absent.
    #[error("missing `{0}`")]
    MissingKey(String),

    /// A key carries a value that cannot be interpreted.
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },

    /// The operation is not available for this item or device.
    #[error("{0}")]
    Unsupported(String),
}

/// Structural errors found while building the item repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("item name must not be empty")]
    EmptyName,

    #[error("item `{0}` is defined more than once")]
    DuplicateName(String),

    #[error("item `{0}` has children but is not a group")]
    ChildrenOnNonGroup(String),

    #[error("group `{0}` contains itself")]
    GroupCycle(String),
}

/// A bounded resource refused a new entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{resource} is full")]
pub struct ResourceExhausted {
    pub resource: &'static str,
}

/// A typed accessor found a state of a different variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected a {expected} state, found {actual}")]
pub struct TypeMismatch {
    pub expected: StateKind,
    pub actual: StateKind,
}

/// Lookup by name or identifier failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} `{id}` not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

impl NotFoundError {
    #[must_use]
    pub fn new(entity: &'static str, id: impl Into<String>) -> Self {
        Self {
            entity,
            id: id.into(),
        }
    }
}
