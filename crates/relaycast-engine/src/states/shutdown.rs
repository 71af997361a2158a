//! Slating and stopping: relay placeholder plus hardware power down.

use relaycast_ipc::{BroadcastConfig, HardwarePhase, StateId};
use tracing::{info, instrument, warn};

use super::BroadcastState;
use crate::bus::Event;
use crate::context::BroadcastContext;

/// Runs shutdown then off. Every failure is logged and nothing aborts.
fn power_down(ctx: &BroadcastContext, config: &BroadcastConfig) {
    ctx.set_hardware(HardwarePhase::Stopping);
    let report = ctx.sequencer().power_down(config);
    for problem in report.problems() {
        warn!(%problem, "Hardware power down step failed");
    }
    ctx.set_hardware(HardwarePhase::Off);
}

/// Placeholder shown while the hardware is off, until the next start.
pub struct Slating {
    ctx: BroadcastContext,
}

impl Slating {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }
}

named_state!(Slating, StateId::Slating);

impl BroadcastState for Slating {
    fn id(&self) -> StateId {
        StateId::Slating
    }

    #[instrument(name = "slating", skip(self), fields(broadcast = %self.ctx.id()))]
    fn enter(&self) {
        let config = self.ctx.config();

        if let Err(e) = self.ctx.forwarder().slate(&config) {
            warn!(error = %e, "Could not slate relay");
            self.ctx
                .save_or_log(|c| c.last_error = Some(format!("slate failed: {e}")));
        }
        power_down(&self.ctx, &config);

        info!("Slate showing, hardware off");
        self.ctx.publish(Event::Slated);
    }
}

/// Slates both halves of the pair, then de-powers the hardware.
pub struct Stopping {
    ctx: BroadcastContext,
}

impl Stopping {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }
}

named_state!(Stopping, StateId::Stopping);

impl BroadcastState for Stopping {
    fn id(&self) -> StateId {
        StateId::Stopping
    }

    #[instrument(name = "stopping", skip(self), fields(broadcast = %self.ctx.id()))]
    fn enter(&self) {
        let ctx = &self.ctx;
        let config = ctx.config();

        let halves = match ctx.pair() {
            Ok(pair) => vec![pair.primary, pair.secondary],
            Err(e) => {
                warn!(error = %e, "Could not resolve pair, slating this broadcast only");
                vec![config.clone()]
            }
        };
        for half in &halves {
            if let Err(e) = ctx.forwarder().slate(half) {
                warn!(broadcast = %half.name, error = %e, "Could not slate relay");
            }
        }

        power_down(ctx, &config);

        info!("Broadcast stopped, hardware off");
        ctx.publish(Event::Stopped);
    }
}
