//! Resting states: provisioning, stopped and failed.

use relaycast_ipc::{HardwarePhase, StateId};
use tracing::{error, info, warn};

use super::BroadcastState;
use crate::context::BroadcastContext;

/// Defined, not yet started. Also the state a reset returns to.
pub struct Provisioning {
    ctx: BroadcastContext,
}

impl Provisioning {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }
}

named_state!(Provisioning, StateId::Provisioning);

impl BroadcastState for Provisioning {
    fn id(&self) -> StateId {
        StateId::Provisioning
    }

    fn enter(&self) {
        info!(broadcast = %self.ctx.id(), "Broadcast awaiting start");
    }
}

/// Finished; the relay shows the slate and the hardware is off.
pub struct Stopped {
    ctx: BroadcastContext,
}

impl Stopped {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }
}

named_state!(Stopped, StateId::Stopped);

impl BroadcastState for Stopped {
    fn id(&self) -> StateId {
        StateId::Stopped
    }

    fn enter(&self) {
        info!(broadcast = %self.ctx.id(), "Broadcast stopped");
    }
}

/// Terminal failure mode. Makes a best-effort attempt to leave the relay on
/// the slate and the hardware off, then waits for an operator reset.
pub struct Failed {
    ctx: BroadcastContext,
}

impl Failed {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }
}

named_state!(Failed, StateId::Failed);

impl BroadcastState for Failed {
    fn id(&self) -> StateId {
        StateId::Failed
    }

    fn enter(&self) {
        let config = self.ctx.config();
        error!(
            broadcast = %config.id,
            last_error = config.last_error.as_deref().unwrap_or(""),
            "Broadcast entered failure mode, reset required"
        );

        if let Err(e) = self.ctx.forwarder().slate(&config) {
            warn!(error = %e, "Could not slate failed broadcast");
        }

        self.ctx.set_hardware(HardwarePhase::Stopping);
        for problem in self.ctx.sequencer().power_down(&config).problems() {
            warn!(%problem, "Power down of failed broadcast incomplete");
        }
        self.ctx.set_hardware(HardwarePhase::Off);
    }
}
