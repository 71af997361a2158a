//! Shared types for the relaycast broadcast orchestrator.
//!
//! This crate defines the persisted broadcast configuration, the state
//! names the driver moves through, the persistence seam and the messages
//! exchanged between an operator surface and the engine.

mod commands;
mod events;
mod state;
mod store;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{BroadcastStatus, HardwarePhase, StateId};
pub use store::{BroadcastStore, MemoryStore, StoreError, StoreResult};
pub use types::{
    mac_decode, mac_encode, BroadcastConfig, EngineSettings, FailureKind, Privacy,
    DEFAULT_RTMP_BASE, SECONDARY_SUFFIX,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (operator → Engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (Engine → operator).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Consecutive start failures after which a broadcast enters failure mode.
pub const MAX_START_FAILURES: u32 = 3;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
