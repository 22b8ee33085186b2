//! Error types for lifecycle-core
//!
//! Duplicate or stale protocol signals are not errors: they are reported as
//! `false` / `Ok(false)` by the operation that received them. The variants
//! here cover misuse of the tracking API, rejected transitions under a strict
//! policy, and ambient failures (configuration, logging setup).

use thiserror::Error;

/// Result type for lifecycle-core operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors that can occur while tracking entity lifecycles
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A transition not allowed by the entity's state table was rejected
    #[error("Illegal transition for {entity}: {from} -> {to}")]
    IllegalTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// An entity with the same key is already tracked
    #[error("Entity already tracked: {key}")]
    DuplicateEntity { key: String },

    /// The entity reached a terminal state before it could be tracked
    #[error("Entity {key} already reached terminal state {state}")]
    AlreadyTerminated { key: String, state: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Logging could not be initialised
    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    /// I/O error while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    /// Create an illegal transition error
    pub fn illegal_transition(
        entity: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::IllegalTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a duplicate entity error
    pub fn duplicate(key: impl std::fmt::Debug) -> Self {
        Self::DuplicateEntity {
            key: format!("{:?}", key),
        }
    }

    /// Create an already-terminated error
    pub fn already_terminated(key: impl std::fmt::Debug, state: impl std::fmt::Display) -> Self {
        Self::AlreadyTerminated {
            key: format!("{:?}", key),
            state: state.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Whether this error was produced by the strict transition policy
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, Self::IllegalTransition { .. })
    }
}
