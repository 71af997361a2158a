//! Common types shared by the engine, the forwarder and the operator surface.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::StateId;

/// Suffix appended to a primary broadcast's name to form its secondary's name.
pub const SECONDARY_SUFFIX: &str = " (secondary)";

/// Relay base address the RTMP destinations are built from.
pub const DEFAULT_RTMP_BASE: &str = "rtmp://a.rtmp.youtube.com/live2/";

/// Persisted configuration of one broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Key of the site owning the broadcast.
    pub site_key: i64,

    /// Unique broadcast identifier.
    pub id: String,

    /// Human readable name. Secondaries carry [`SECONDARY_SUFFIX`].
    pub name: String,

    /// Encoded MAC of the camera.
    pub camera_mac: u64,

    /// Encoded MAC of the power controller (0 when there is none). When set,
    /// the controller must be reporting before a start powers anything on.
    pub controller_mac: u64,

    /// Streaming platform key for this half of the pair.
    pub rtmp_key: String,

    /// Device variable that receives the RTMP destination when powering on.
    pub rtmp_var: String,

    /// Address (host:port) of the forwarding relay.
    pub relay_host: String,

    /// Privacy while live.
    pub live_privacy: Privacy,

    /// Privacy once the broadcast has finished.
    pub post_live_privacy: Privacy,

    /// Scheduled start.
    pub start: Option<DateTime<Utc>>,

    /// Scheduled end.
    pub end: Option<DateTime<Utc>>,

    /// Whether the scheduler may operate this broadcast.
    pub enabled: bool,

    /// Set once repeated failures exhausted the retry budget.
    pub failure_mode: bool,

    /// Human readable description of the most recent failure.
    pub last_error: Option<String>,

    /// Current state of the broadcast's state machine.
    pub state: StateId,

    /// Serialized scratch data of the state machine.
    pub state_data: String,

    /// Device actions that power the hardware on.
    pub on_actions: String,

    /// Device actions that gracefully shut the hardware down.
    pub shutdown_actions: String,

    /// Device actions that fully de-power the hardware.
    pub off_actions: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            site_key: 0,
            id: String::new(),
            name: String::new(),
            camera_mac: 0,
            controller_mac: 0,
            rtmp_key: String::new(),
            rtmp_var: String::new(),
            relay_host: String::new(),
            live_privacy: Privacy::Public,
            post_live_privacy: Privacy::Unlisted,
            start: None,
            end: None,
            enabled: true,
            failure_mode: false,
            last_error: None,
            state: StateId::Provisioning,
            state_data: String::new(),
            on_actions: String::new(),
            shutdown_actions: String::new(),
            off_actions: String::new(),
        }
    }
}

impl BroadcastConfig {
    /// Returns true if this config is the secondary half of a pair.
    pub fn is_secondary(&self) -> bool {
        self.name.ends_with(SECONDARY_SUFFIX)
    }
}

/// Visibility of a broadcast on the streaming platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    /// Listed and watchable by anyone.
    Public,

    /// Watchable through a link.
    Unlisted,

    /// Owner only.
    Private,
}

/// Category of a failure raised inside a state, used for logging and
/// operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Camera or controller did not respond as expected.
    Hardware,

    /// The relay rejected or could not be reached for a control request.
    Forwarder,

    /// Feed health or connectivity problem.
    Network,

    /// Internal fault.
    Software,

    /// Configuration defect that retrying cannot fix.
    Configuration,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hardware => "hardware",
            Self::Forwarder => "forwarder",
            Self::Network => "network",
            Self::Software => "software",
            Self::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// Tunables for the engine and the services it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Base address RTMP destinations are built from.
    pub rtmp_base: String,

    /// Consecutive failures that put a broadcast into failure mode (default: 3).
    pub max_start_failures: u32,

    /// How long to wait for the camera to report after powering on.
    pub hardware_ready_timeout_ms: u64,

    /// Interval between camera status polls.
    pub hardware_poll_interval_ms: u64,

    /// Timeout of a single relay request (default: 10).
    pub control_timeout_secs: u64,

    /// First delay between relay attempts (exponential backoff applied).
    pub retry_base_delay_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rtmp_base: DEFAULT_RTMP_BASE.to_string(),
            max_start_failures: crate::MAX_START_FAILURES,
            hardware_ready_timeout_ms: 300_000,
            hardware_poll_interval_ms: 1000,
            control_timeout_secs: 10,
            retry_base_delay_ms: 500,
        }
    }
}

impl EngineSettings {
    /// Bounded wait for the hardware ready signal.
    pub fn hardware_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.hardware_ready_timeout_ms)
    }

    /// Interval between camera status polls.
    pub fn hardware_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hardware_poll_interval_ms)
    }

    /// Timeout of a single relay request.
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    /// First delay between relay attempts.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Bits of an encoded MAC that hold the address.
const MAC_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Formats an encoded MAC as `AA:BB:CC:DD:EE:FF`. Only the low 48 bits are
/// read; anything above them is ignored. Returns an empty string when those
/// bits are 0.
pub fn mac_decode(mac: u64) -> String {
    let mac = mac & MAC_MASK;
    if mac == 0 {
        return String::new();
    }
    let bytes = mac.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parses a `AA:BB:CC:DD:EE:FF` MAC into its encoded form. Returns 0 if the
/// input is not a valid MAC.
pub fn mac_encode(mac: &str) -> u64 {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return 0;
    }

    let mut encoded = 0u64;
    for part in parts {
        if part.len() != 2 {
            return 0;
        }
        match u8::from_str_radix(part, 16) {
            Ok(byte) => encoded = (encoded << 8) | u64::from(byte),
            Err(_) => return 0,
        }
    }
    encoded
}
