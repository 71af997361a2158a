//! Hardware power sequencing.
//!
//! Camera and controller hardware is operated by writing device variables.
//! Each broadcast configures three action lists: "on", "shutdown" and
//! "off". The sequencer applies them best-effort, one action at a time.

mod actions;
mod devices;
mod error;
mod sequencer;

pub use actions::{Action, ActionList, SKIP_KEYWORD};
pub use devices::{DeviceStatus, HeartbeatMonitor, MemoryVariables, VariableStore};
pub use error::HardwareError;
pub use sequencer::{HardwarePowerSequencer, PowerDownReport, PowerList, SequenceReport};

/// Result type for hardware operations.
pub type HardwareResult<T> = Result<T, HardwareError>;
