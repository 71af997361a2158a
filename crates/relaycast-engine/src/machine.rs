//! The per-broadcast state machine driver.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use relaycast_ipc::{BroadcastStatus, EngineEvent, FailureKind, StateId};
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{Event, EventKind, Failure, SubscriptionId};
use crate::context::BroadcastContext;
use crate::error::EngineError;
use crate::states::{BroadcastState, StateRegistry};
use crate::EngineResult;

/// Events the driver consumes from the bus.
const DRIVER_EVENTS: [EventKind; 10] = [
    EventKind::Start,
    EventKind::Stop,
    EventKind::Slate,
    EventKind::Health,
    EventKind::Ready,
    EventKind::FailedOver,
    EventKind::Failed,
    EventKind::InvalidConfiguration,
    EventKind::Slated,
    EventKind::Stopped,
];

/// Owns the current state of one broadcast and applies transitions.
///
/// Requests are published on the broadcast's bus and land in the driver's
/// inbox together with the outcomes states publish. The inbox is drained
/// on the caller's thread, so transitions for one broadcast never overlap.
pub struct StateMachine {
    ctx: BroadcastContext,
    registry: Arc<StateRegistry>,
    current: Arc<dyn BroadcastState>,
    /// State to fall back to when a start hits a configuration defect.
    resume: StateId,
    inbox: Receiver<Event>,
    subscriptions: Vec<SubscriptionId>,
    events: Option<Sender<EngineEvent>>,
}

impl StateMachine {
    /// Create a driver for the broadcast in `ctx`, restoring its persisted
    /// state and scratch data. The restored state is not re-entered.
    pub fn new(ctx: BroadcastContext, registry: Arc<StateRegistry>) -> EngineResult<Self> {
        let config = ctx.config();
        ctx.restore_scratch(&config.state_data);

        let (tx, inbox) = crossbeam_channel::unbounded();
        let subscriptions = DRIVER_EVENTS
            .iter()
            .map(|kind| ctx.bus().forward_to(*kind, tx.clone()))
            .collect();

        let current = registry.get(config.state.name(), ctx.clone())?;
        debug!(broadcast = %config.id, state = %config.state, "Restored state machine");

        Ok(Self {
            ctx,
            registry,
            current,
            resume: StateId::Provisioning,
            inbox,
            subscriptions,
            events: None,
        })
    }

    /// Report transitions and failures on `events`.
    pub fn with_events(mut self, events: Sender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The broadcast's context.
    pub fn context(&self) -> &BroadcastContext {
        &self.ctx
    }

    /// The current state.
    pub fn current(&self) -> StateId {
        self.current.id()
    }

    /// Consecutive failures in the current streak.
    pub fn retries(&self) -> u32 {
        self.ctx.retries()
    }

    /// Snapshot for the admin surface.
    pub fn status(&self) -> BroadcastStatus {
        self.ctx.status(self.current())
    }

    /// Re-enters a state that was interrupted by a restart.
    pub fn resume(&mut self) {
        let state = self.current();
        if state.is_transient() {
            info!(broadcast = %self.ctx.id(), %state, "Resuming interrupted state");
            self.current.enter();
            self.drain();
        }
    }

    /// Starts the broadcast. Refused while in failure mode.
    pub fn start(&mut self) -> EngineResult<()> {
        let config = self.ctx.config();
        if config.failure_mode {
            return Err(EngineError::FailureMode(config.name));
        }
        self.require("start", self.current().can_start())?;

        self.ctx.publish(Event::Start);
        self.drain();
        Ok(())
    }

    /// Stops the broadcast. A no-op if it is not running.
    pub fn stop(&mut self) -> EngineResult<()> {
        let allowed = self.require("stop", self.current() != StateId::Failed);
        if allowed.is_ok() {
            self.ctx.publish(Event::Stop);
            self.drain();
        }
        // Raised by the engine ahead of the request.
        self.ctx.clear_cancel();
        allowed
    }

    /// Shows the placeholder and powers the hardware down while live.
    pub fn slate(&mut self) -> EngineResult<()> {
        self.require("slate", self.current().is_live())?;

        self.ctx.publish(Event::Slate);
        self.drain();
        Ok(())
    }

    /// Routes an external health check result to the live state.
    pub fn report_health(&mut self, healthy: bool) -> EngineResult<()> {
        self.require("report health", self.current().is_live())?;

        self.ctx.publish(Event::Health { healthy });
        self.drain();
        Ok(())
    }

    /// Clears scratch data and failure mode and forces provisioning,
    /// whatever the current state.
    #[instrument(name = "reset_states", skip(self), fields(broadcast = %self.ctx.id()))]
    pub fn reset_states(&mut self) -> EngineResult<()> {
        warn!(state = %self.current(), "Resetting broadcast states");

        while self.inbox.try_recv().is_ok() {}
        self.ctx.scratch().clear();
        self.ctx.clear_cancel();
        self.ctx.save(|c| {
            c.failure_mode = false;
            c.last_error = None;
        })?;

        self.resume = StateId::Provisioning;
        self.transition(StateId::Provisioning);
        self.drain();
        Ok(())
    }

    /// Uploads a new placeholder asset to the broadcast's relay.
    pub fn upload_slate(&self, name: &str, data: Bytes) -> EngineResult<()> {
        let config = self.ctx.config();
        self.ctx.forwarder().upload_slate(&config, name, data)?;

        info!(broadcast = %config.id, %name, "Slate uploaded");
        self.notify(EngineEvent::SlateUploaded {
            broadcast: config.id,
        });
        Ok(())
    }

    fn require(&self, request: &'static str, allowed: bool) -> EngineResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(EngineError::InvalidRequest {
                request,
                state: self.current(),
            })
        }
    }

    /// Handles queued events until the broadcast settles. Without outside
    /// input a start settles within `max_start_failures` attempts.
    fn drain(&mut self) {
        let span = self.ctx.span().clone();
        let _guard = span.enter();

        while let Ok(event) = self.inbox.try_recv() {
            self.on_event(event);
            self.persist();
        }
    }

    fn on_event(&mut self, event: Event) {
        let state = self.current();
        debug!(%state, kind = ?event.kind(), "Handling event");

        match event {
            Event::Start => {
                if self.ctx.config().failure_mode {
                    warn!("Ignoring start while in failure mode");
                } else if state.can_start() {
                    self.resume = state;
                    self.transition(StateId::Starting);
                } else {
                    debug!(%state, "Ignoring start");
                }
            }
            Event::Stop => match state {
                StateId::Starting
                | StateId::LivePrimary
                | StateId::LiveSecondary
                | StateId::Slating => self.transition(StateId::Stopping),
                _ => debug!(%state, "Ignoring stop"),
            },
            Event::Slate if state.is_live() => self.transition(StateId::Slating),
            Event::Health { .. } => self.current.handle(&event),
            Event::Ready if state == StateId::Starting => {
                self.ctx.set_retries(0);
                self.transition(StateId::LivePrimary);
            }
            Event::FailedOver if state == StateId::LivePrimary => {
                self.ctx.set_retries(0);
                self.transition(StateId::LiveSecondary);
            }
            Event::Failed(failure)
                if matches!(
                    state,
                    StateId::Starting | StateId::LivePrimary | StateId::LiveSecondary
                ) =>
            {
                self.record_failure(failure)
            }
            Event::InvalidConfiguration(message) => self.record_invalid(message),
            Event::Stopped if state == StateId::Stopping => {
                self.ctx.set_retries(0);
                self.transition(StateId::Stopped);
            }
            Event::Slated => debug!("Slate complete"),
            other => debug!(%state, kind = ?other.kind(), "Event has no transition"),
        }
    }

    /// Counts the failure and retries the start, or enters failure mode
    /// once the budget is spent.
    fn record_failure(&mut self, failure: Failure) {
        let retries = self.ctx.retries() + 1;
        self.ctx.set_retries(retries);
        error!(retries, kind = %failure.kind, message = %failure.message, "Broadcast failure");

        self.ctx
            .save_or_log(|c| c.last_error = Some(failure.to_string()));
        self.notify(EngineEvent::Error {
            broadcast: self.ctx.id().to_string(),
            kind: failure.kind,
            message: failure.message,
        });

        if retries >= self.ctx.settings().max_start_failures {
            self.ctx.save_or_log(|c| c.failure_mode = true);
            self.notify(EngineEvent::FailureMode {
                broadcast: self.ctx.id().to_string(),
                retries,
            });
            self.transition(StateId::Failed);
        } else {
            info!(retries, "Retrying start");
            self.transition(StateId::Starting);
        }
    }

    /// Reports a configuration defect without retrying. A start falls back
    /// to where it came from; any other state is kept.
    fn record_invalid(&mut self, message: String) {
        warn!(%message, "Invalid broadcast configuration");

        self.ctx
            .save_or_log(|c| c.last_error = Some(format!("invalid configuration: {message}")));
        self.notify(EngineEvent::Error {
            broadcast: self.ctx.id().to_string(),
            kind: FailureKind::Configuration,
            message,
        });

        if self.current() == StateId::Starting {
            self.transition(self.resume);
        }
    }

    /// Exits the current state, persists, then enters `next`.
    fn transition(&mut self, next: StateId) {
        let state = match self.registry.get(next.name(), self.ctx.clone()) {
            Ok(state) => state,
            Err(e) => {
                error!(%next, error = %e, "Could not construct state");
                self.notify(EngineEvent::Error {
                    broadcast: self.ctx.id().to_string(),
                    kind: FailureKind::Software,
                    message: e.to_string(),
                });
                return;
            }
        };

        let previous = self.current();
        self.current.exit();
        self.current = state;
        self.persist();

        info!(from = %previous, to = %next, "State transition");
        self.notify(EngineEvent::StateChanged {
            broadcast: self.ctx.id().to_string(),
            previous,
            current: next,
        });

        self.current.enter();
    }

    fn persist(&self) {
        let state = self.current();
        let data = self.ctx.scratch_json();
        self.ctx.save_or_log(|c| {
            c.state = state;
            c.state_data = data;
        });
    }

    fn notify(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.ctx.bus().unsubscribe(id);
        }
    }
}
