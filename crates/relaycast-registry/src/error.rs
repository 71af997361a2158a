//! Error types for the registry.

use thiserror::Error;

/// Boxed error returned by constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A type with this name is already registered.
    #[error("Type already registered: {0}")]
    AlreadyRegistered(String),

    /// No type with this name is registered.
    #[error("Type not registered: {0}")]
    NotRegistered(String),

    /// The registered constructor failed.
    #[error("Could not construct type {name}: {source}")]
    Construct {
        /// Registered name.
        name: String,

        /// Constructor error.
        #[source]
        source: BoxError,
    },
}
