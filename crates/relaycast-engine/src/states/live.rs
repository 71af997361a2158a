//! Live states.

use relaycast_forward::ForwardError;
use relaycast_ipc::{FailureKind, StateId};
use tracing::{debug, info, instrument, warn};

use super::BroadcastState;
use crate::bus::{Event, Failure};
use crate::context::BroadcastContext;

fn forward_failure(ctx: &BroadcastContext, error: ForwardError) {
    if error.is_configuration() {
        ctx.publish(Event::InvalidConfiguration(error.to_string()));
    } else {
        ctx.fail(Failure::new(FailureKind::Forwarder, error.to_string()));
    }
}

/// Live from the primary feed. An unhealthy report fails over to the secondary.
pub struct LivePrimary {
    ctx: BroadcastContext,
}

impl LivePrimary {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }

    /// Slates the primary then streams the secondary.
    #[instrument(name = "failover", skip(self), fields(broadcast = %self.ctx.id()))]
    fn fail_over(&self) {
        let ctx = &self.ctx;
        let pair = match ctx.pair() {
            Ok(pair) => pair,
            Err(e) => {
                forward_failure(ctx, e);
                return;
            }
        };

        info!(secondary = %pair.secondary.name, "Primary feed unhealthy, failing over");

        if let Err(e) = ctx.forwarder().slate(&pair.primary) {
            warn!(error = %e, "Could not slate primary");
            forward_failure(ctx, e);
            return;
        }

        match ctx.forwarder().stream(&pair.secondary) {
            Ok(()) => ctx.publish(Event::FailedOver),
            Err(e) => forward_failure(ctx, e),
        }
    }
}

named_state!(LivePrimary, StateId::LivePrimary);

impl BroadcastState for LivePrimary {
    fn id(&self) -> StateId {
        StateId::LivePrimary
    }

    fn enter(&self) {
        info!(broadcast = %self.ctx.id(), "Broadcast live from primary feed");
    }

    fn handle(&self, event: &Event) {
        match event {
            Event::Health { healthy: false } => self.fail_over(),
            Event::Health { healthy: true } => debug!("Primary feed healthy"),
            _ => {}
        }
    }
}

/// Live from the secondary feed. An unhealthy report here is a failure.
pub struct LiveSecondary {
    ctx: BroadcastContext,
}

impl LiveSecondary {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }
}

named_state!(LiveSecondary, StateId::LiveSecondary);

impl BroadcastState for LiveSecondary {
    fn id(&self) -> StateId {
        StateId::LiveSecondary
    }

    fn enter(&self) {
        info!(broadcast = %self.ctx.id(), "Broadcast live from secondary feed");
    }

    fn handle(&self, event: &Event) {
        match event {
            Event::Health { healthy: false } => {
                warn!(broadcast = %self.ctx.id(), "Secondary feed unhealthy");
                self.ctx.fail(Failure::new(
                    FailureKind::Network,
                    "secondary feed unhealthy",
                ));
            }
            Event::Health { healthy: true } => debug!("Secondary feed healthy"),
            _ => {}
        }
    }
}
