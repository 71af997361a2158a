//! Commands sent from the operator surface to the engine.

use serde::{Deserialize, Serialize};

/// Commands that an operator, scheduler or health checker can send to the
/// engine. Broadcasts are addressed by their unique identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Power the hardware and go live.
    Start { broadcast: String },

    /// Slate the relay and power the hardware down.
    Stop { broadcast: String },

    /// Show the placeholder while live and power the hardware down.
    Slate { broadcast: String },

    /// Result of an external health check of the live feed.
    ReportHealth { broadcast: String, healthy: bool },

    /// Clear scratch data and failure mode and return to provisioning.
    ResetStates { broadcast: String },

    /// Upload a new placeholder asset to the broadcast's relay.
    UploadSlate {
        broadcast: String,
        name: String,
        data: Vec<u8>,
    },

    /// Request a status snapshot of a broadcast.
    GetStatus { broadcast: String },

    /// Shutdown the engine completely.
    Shutdown,
}

impl EngineCommand {
    /// Returns the broadcast this command addresses, if any.
    pub fn broadcast(&self) -> Option<&str> {
        match self {
            Self::Start { broadcast }
            | Self::Stop { broadcast }
            | Self::Slate { broadcast }
            | Self::ReportHealth { broadcast, .. }
            | Self::ResetStates { broadcast }
            | Self::UploadSlate { broadcast, .. }
            | Self::GetStatus { broadcast } => Some(broadcast),
            Self::Shutdown => None,
        }
    }
}
