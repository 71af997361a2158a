//! Error types for the engine.

use relaycast_forward::ForwardError;
use relaycast_ipc::{StateId, StoreError};
use relaycast_registry::RegistryError;
use thiserror::Error;

/// Errors returned to callers of the engine and the state machine driver.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Start refused until an operator resets the broadcast.
    #[error("Broadcast {0} is in failure mode; reset required")]
    FailureMode(String),

    /// The request has no meaning in the current state.
    #[error("Cannot {request} while {state}")]
    InvalidRequest {
        /// Requested operation.
        request: &'static str,

        /// State the broadcast is in.
        state: StateId,
    },

    /// A state could not be constructed.
    #[error("State registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Persistence error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Relay error outside the state machine.
    #[error("Forwarding error: {0}")]
    Forward(#[from] ForwardError),

    /// No broadcast with this identifier.
    #[error("Unknown broadcast: {0}")]
    UnknownBroadcast(String),

    /// Worker thread could not be started.
    #[error("Worker error: {0}")]
    Worker(#[from] std::io::Error),

    /// A worker is no longer accepting requests.
    #[error("Channel disconnected")]
    ChannelDisconnected,
}
