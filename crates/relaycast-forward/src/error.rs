//! Error types for the forwarding client.

use relaycast_ipc::StoreError;
use thiserror::Error;

/// Errors that can occur while controlling the relay.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The other half of the pair does not exist.
    #[error("Sibling broadcast not found: {0}")]
    MissingSibling(String),

    /// RTMP key is empty or malformed.
    #[error("Invalid RTMP key for {0}")]
    InvalidRtmpKey(String),

    /// RTMP base address is not an rtmp:// or rtmps:// URL.
    #[error("Invalid RTMP base address: {0}")]
    InvalidRtmpBase(String),

    /// Relay host is empty or not a valid address.
    #[error("Invalid relay host: {0}")]
    InvalidRelayHost(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Every attempt failed.
    #[error("Relay request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Persistence error while resolving the pair.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwardError {
    /// Returns true for defects that retrying cannot fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingSibling(_)
                | Self::InvalidRtmpKey(_)
                | Self::InvalidRtmpBase(_)
                | Self::InvalidRelayHost(_)
        )
    }
}
