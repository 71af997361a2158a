//! Relay control client.
//!
//! The relay receives a camera's feed and republishes it to the streaming
//! platform. It is told which pair of RTMP destinations to use and whether
//! to play the feed or show a placeholder slate.

mod error;
mod pairing;
mod relay;
mod retry;

pub use error::ForwardError;
pub use pairing::{primary_name, rtmp_destination, secondary_name, BroadcastPair};
pub use relay::{ControlRequest, RelayClient, RelayStatus};
pub use retry::RetryPolicy;

use bytes::Bytes;
use relaycast_ipc::BroadcastConfig;

/// Result type for forwarding operations.
pub type ForwardResult<T> = Result<T, ForwardError>;

/// Maximum attempts for a relay control request.
pub const MAX_CONTROL_ATTEMPTS: u32 = 3;

/// Base retry delay in milliseconds.
pub const BASE_RETRY_DELAY_MS: u64 = 500;

/// Relay endpoint for play/slate control.
pub const CONTROL_PATH: &str = "control";

/// Relay endpoint for slate uploads.
pub const SLATE_PATH: &str = "slate";

/// Multipart field carrying the slate file.
pub const SLATE_FIELD: &str = "slate-file";

/// Tells the relay what to forward for a broadcast pair.
///
/// Either half of a pair may be passed; implementations resolve the pair so
/// that calls are idempotent regardless of which half invoked them.
pub trait ForwardingService: Send + Sync {
    /// Forward the live feed.
    fn stream(&self, config: &BroadcastConfig) -> ForwardResult<()>;

    /// Show the placeholder slate.
    fn slate(&self, config: &BroadcastConfig) -> ForwardResult<()>;

    /// Upload a new placeholder asset.
    fn upload_slate(&self, config: &BroadcastConfig, name: &str, data: Bytes)
        -> ForwardResult<()>;
}
