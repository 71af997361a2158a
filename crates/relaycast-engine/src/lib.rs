//! Broadcast orchestration engine.
//!
//! Each broadcast is driven by a [`StateMachine`] through its lifecycle:
//! powering the camera hardware, asking the relay to forward the feed,
//! failing over to the secondary feed, slating and stopping. The
//! [`Engine`] routes operator commands to one worker per broadcast and
//! reports transitions as [`EngineEvent`]s.

mod bus;
mod context;
mod error;
mod machine;
mod orchestrator;
pub mod states;

#[cfg(test)]
mod testing;

pub use bus::{Event, EventBus, EventKind, Failure, Handler, SubscriptionId};
pub use context::{BroadcastContext, Services, HARDWARE_KEY, RETRIES_KEY};
pub use error::EngineError;
pub use machine::StateMachine;
pub use orchestrator::Engine;
pub use states::{BroadcastState, StateRegistry};

use crossbeam_channel::{Receiver, Sender};
use relaycast_ipc::{EngineCommand, EngineEvent, EngineSettings};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Create an engine instance with IPC channels.
pub fn create_engine(
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    services: Services,
    settings: EngineSettings,
) -> Engine {
    Engine::new(command_rx, event_tx, services, settings)
}
