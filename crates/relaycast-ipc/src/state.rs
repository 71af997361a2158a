//! Broadcast state machine types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The lifecycle states a broadcast moves through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateId {
    /// Defined but not yet started, or reset by an operator.
    #[default]
    Provisioning,

    /// Powering hardware and asking the relay to go live.
    Starting,

    /// Live from the primary RTMP feed.
    LivePrimary,

    /// Live from the secondary RTMP feed after a failover.
    LiveSecondary,

    /// Placeholder shown while the hardware is powered down.
    Slating,

    /// Slating the relay and de-powering hardware.
    Stopping,

    /// Finished.
    Stopped,

    /// Retry budget exhausted; only a reset leaves this state.
    Failed,
}

impl StateId {
    /// All states, in lifecycle order.
    pub const ALL: [StateId; 8] = [
        Self::Provisioning,
        Self::Starting,
        Self::LivePrimary,
        Self::LiveSecondary,
        Self::Slating,
        Self::Stopping,
        Self::Stopped,
        Self::Failed,
    ];

    /// Returns the registry name for this state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Starting => "starting",
            Self::LivePrimary => "live-primary",
            Self::LiveSecondary => "live-secondary",
            Self::Slating => "slating",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Returns true if the broadcast is live from either feed.
    pub fn is_live(self) -> bool {
        matches!(self, Self::LivePrimary | Self::LiveSecondary)
    }

    /// Returns true for states that are interrupted work when found after a restart.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    /// Returns true if a start request is accepted from this state.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Provisioning | Self::Slating | Self::Stopped)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| format!("unknown state: {s}"))
    }
}

/// Power sub-state of a broadcast's hardware, kept in scratch data for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwarePhase {
    /// De-powered.
    #[default]
    Off,

    /// On actions applied, waiting for the camera to report.
    Starting,

    /// Camera reporting.
    On,

    /// Shutdown and off actions in progress.
    Stopping,
}

impl HardwarePhase {
    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Starting => "starting",
            Self::On => "on",
            Self::Stopping => "stopping",
        }
    }
}

/// Snapshot of a broadcast for the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastStatus {
    /// Broadcast identifier.
    pub id: String,

    /// Broadcast name.
    pub name: String,

    /// Current state.
    pub state: StateId,

    /// Whether the broadcast awaits a reset.
    pub failure_mode: bool,

    /// Consecutive failures in the current streak.
    pub retries: u32,

    /// Most recent failure message.
    pub last_error: Option<String>,

    /// Hardware power sub-state.
    pub hardware: HardwarePhase,

    /// Raw scratch data.
    pub scratch: serde_json::Map<String, serde_json::Value>,
}
