//! Events sent from the engine to the operator surface.

use serde::{Deserialize, Serialize};

use crate::state::{BroadcastStatus, StateId};
use crate::types::FailureKind;

/// Events that the engine can send to the operator surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A broadcast changed state.
    StateChanged {
        /// Broadcast identifier.
        broadcast: String,

        /// Previous state.
        previous: StateId,

        /// Current state.
        current: StateId,
    },

    /// Status snapshot, in answer to a status request.
    Status(Box<BroadcastStatus>),

    /// A command was refused.
    Rejected {
        /// Broadcast identifier.
        broadcast: String,

        /// Why the command was refused.
        reason: String,
    },

    /// A failure was raised while operating a broadcast.
    Error {
        /// Broadcast identifier.
        broadcast: String,

        /// Failure category.
        kind: FailureKind,

        /// Error message.
        message: String,
    },

    /// A broadcast exhausted its retries and needs a reset.
    FailureMode {
        /// Broadcast identifier.
        broadcast: String,

        /// Failures counted in the streak.
        retries: u32,
    },

    /// A new placeholder asset reached the relay.
    SlateUploaded {
        /// Broadcast identifier.
        broadcast: String,
    },

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
