//! Error types for hardware sequencing.

use thiserror::Error;

/// Errors that can occur while operating hardware.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// An action is not of the form `variable=value`.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// The variable does not exist for the site.
    #[error("Unknown device variable: {0}")]
    UnknownVariable(String),

    /// The broadcast configures no shutdown actions.
    #[error("No shutdown actions configured")]
    NoShutdownActions,

    /// The variable store failed.
    #[error("Variable store error: {0}")]
    Store(String),

    /// Device status could not be determined.
    #[error("Device status error: {0}")]
    Device(String),
}
