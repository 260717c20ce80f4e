//! Command-level error type shared by stores and the service layer.

use thiserror::Error;

use bundlestock_core::DomainError;

use crate::store::StoreError;

/// Failure of a bundle command, as surfaced to the API layer.
///
/// Domain rejections are flattened into their own variants so callers can map
/// them without reaching into `bundlestock-core`. Anything the store could not
/// do is `Store`.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),
    /// The referenced bundle does not exist.
    #[error("bundle not found")]
    NotFound,
    /// The bundle cannot be sold right now (inactive, outside its sales window).
    #[error("{0}")]
    InvalidState(String),
    /// Not enough stock for the requested quantity.
    #[error("insufficient stock: requested {requested}, only {available} available")]
    InsufficientStock { requested: u32, available: u32 },
    /// Idempotency key reuse or a concurrent change that invalidated the check.
    #[error("{0}")]
    Conflict(String),
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DomainError> for CommandError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => CommandError::Validation(msg),
            DomainError::InvalidId(msg) => CommandError::Validation(msg),
            DomainError::NotFound => CommandError::NotFound,
            DomainError::InvalidState(msg) => CommandError::InvalidState(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => CommandError::InsufficientStock {
                requested,
                available,
            },
            DomainError::Conflict(msg) => CommandError::Conflict(msg),
        }
    }
}

impl CommandError {
    /// True for failures caused by the request or the bundle's state, as
    /// opposed to the storage backend.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CommandError::Store(_))
    }
}
