//! Per-broadcast context handed to every state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use relaycast_forward::{rtmp_destination, BroadcastPair, ForwardResult, ForwardingService};
use relaycast_hardware::{DeviceStatus, HardwarePowerSequencer};
use relaycast_ipc::{
    BroadcastConfig, BroadcastStatus, BroadcastStore, EngineSettings, HardwarePhase, StateId,
    StoreResult,
};
use relaycast_registry::SafeMap;
use serde_json::Value;
use tracing::{info_span, warn, Span};

use crate::bus::{Event, EventBus, Failure};

/// Scratch key of the consecutive failure counter.
pub const RETRIES_KEY: &str = "retries";

/// Scratch key of the hardware power sub-state.
pub const HARDWARE_KEY: &str = "hardware";

/// External services shared by every broadcast.
#[derive(Clone)]
pub struct Services {
    /// Broadcast persistence.
    pub store: Arc<dyn BroadcastStore>,

    /// Relay control.
    pub forwarder: Arc<dyn ForwardingService>,

    /// Hardware power sequencing.
    pub sequencer: Arc<HardwarePowerSequencer>,

    /// Device reporting status.
    pub devices: Arc<dyn DeviceStatus>,
}

struct ContextInner {
    id: String,
    config: RwLock<BroadcastConfig>,
    services: Services,
    settings: EngineSettings,
    bus: EventBus,
    scratch: SafeMap<String, Value>,
    cancel: Arc<AtomicBool>,
    span: Span,
}

/// Everything a state needs to operate one broadcast. Cloning shares it.
#[derive(Clone)]
pub struct BroadcastContext {
    inner: Arc<ContextInner>,
}

impl BroadcastContext {
    /// Create a context for `config`.
    pub fn new(config: BroadcastConfig, services: Services, settings: EngineSettings) -> Self {
        let span = info_span!("broadcast", id = %config.id, name = %config.name);
        Self {
            inner: Arc::new(ContextInner {
                id: config.id.clone(),
                bus: EventBus::new(config.id.clone()),
                config: RwLock::new(config),
                services,
                settings,
                scratch: SafeMap::new(),
                cancel: Arc::new(AtomicBool::new(false)),
                span,
            }),
        }
    }

    /// Broadcast identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> BroadcastConfig {
        self.inner.config.read().clone()
    }

    /// Applies `update` to the configuration and persists it.
    pub fn save<F>(&self, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut BroadcastConfig),
    {
        let mut config = self.inner.config.write();
        update(&mut config);
        self.inner.services.store.put(&config)
    }

    /// Like [`save`](Self::save) but only logs a failure.
    pub fn save_or_log<F>(&self, update: F)
    where
        F: FnOnce(&mut BroadcastConfig),
    {
        if let Err(e) = self.save(update) {
            warn!(broadcast = %self.id(), error = %e, "Could not persist broadcast");
        }
    }

    /// Broadcast persistence.
    pub fn store(&self) -> &Arc<dyn BroadcastStore> {
        &self.inner.services.store
    }

    /// Relay control.
    pub fn forwarder(&self) -> &Arc<dyn ForwardingService> {
        &self.inner.services.forwarder
    }

    /// Hardware power sequencing.
    pub fn sequencer(&self) -> &HardwarePowerSequencer {
        &self.inner.services.sequencer
    }

    /// Device reporting status.
    pub fn devices(&self) -> &Arc<dyn DeviceStatus> {
        &self.inner.services.devices
    }

    /// Engine tunables.
    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// The broadcast's event bus.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Publishes on the broadcast's bus.
    pub fn publish(&self, event: Event) {
        self.inner.bus.publish(event);
    }

    /// Publishes a transient failure.
    pub fn fail(&self, failure: Failure) {
        self.publish(Event::Failed(failure));
    }

    /// Span that attributes log lines to this broadcast.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Shared cancellation flag, raised by stop requests.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.cancel)
    }

    /// Returns true if a stop request asked in-flight work to abandon.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }

    /// Lowers the cancellation flag.
    pub fn clear_cancel(&self) {
        self.inner.cancel.store(false, Ordering::SeqCst);
    }

    /// Scratch data surviving transitions.
    pub fn scratch(&self) -> &SafeMap<String, Value> {
        &self.inner.scratch
    }

    /// Consecutive failures in the current streak.
    pub fn retries(&self) -> u32 {
        self.inner
            .scratch
            .get(RETRIES_KEY)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Sets the failure counter.
    pub fn set_retries(&self, retries: u32) {
        self.inner
            .scratch
            .set(RETRIES_KEY.to_string(), Value::from(retries));
    }

    /// Hardware power sub-state.
    pub fn hardware(&self) -> HardwarePhase {
        self.inner
            .scratch
            .get(HARDWARE_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Sets the hardware power sub-state.
    pub fn set_hardware(&self, phase: HardwarePhase) {
        self.inner
            .scratch
            .set(HARDWARE_KEY.to_string(), Value::from(phase.name()));
    }

    /// Scratch data as an ordered JSON object.
    pub fn scratch_map(&self) -> serde_json::Map<String, Value> {
        let mut entries: Vec<(String, Value)> = self.inner.scratch.snapshot().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().collect()
    }

    /// Scratch data serialized for `BroadcastConfig::state_data`.
    pub fn scratch_json(&self) -> String {
        Value::Object(self.scratch_map()).to_string()
    }

    /// Replaces scratch data with a persisted blob. Unreadable blobs are
    /// logged and ignored.
    pub fn restore_scratch(&self, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<serde_json::Map<String, Value>>(raw) {
            Ok(map) => self.inner.scratch.replace(map.into_iter().collect()),
            Err(e) => warn!(broadcast = %self.id(), error = %e, "Ignoring unreadable state data"),
        }
    }

    /// RTMP destination of this broadcast, if its key is valid.
    pub fn rtmp_url(&self) -> Option<String> {
        let key = self.inner.config.read().rtmp_key.clone();
        rtmp_destination(&self.inner.settings.rtmp_base, &key).ok()
    }

    /// Resolves this broadcast's primary/secondary pair.
    pub fn pair(&self) -> ForwardResult<BroadcastPair> {
        let config = self.config();
        BroadcastPair::resolve(self.store().as_ref(), &config)
    }

    /// Snapshot for the admin surface.
    pub fn status(&self, state: StateId) -> BroadcastStatus {
        let config = self.inner.config.read();
        BroadcastStatus {
            id: config.id.clone(),
            name: config.name.clone(),
            state,
            failure_mode: config.failure_mode,
            retries: self.retries(),
            last_error: config.last_error.clone(),
            hardware: self.hardware(),
            scratch: self.scratch_map(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_retries_and_hardware_in_scratch() {
        let fixture = Fixture::new();
        let ctx = fixture.context("p");

        assert_eq!(ctx.retries(), 0);
        assert_eq!(ctx.hardware(), HardwarePhase::Off);

        ctx.set_retries(2);
        ctx.set_hardware(HardwarePhase::On);

        assert_eq!(ctx.retries(), 2);
        assert_eq!(ctx.hardware(), HardwarePhase::On);
        assert_eq!(ctx.scratch_json(), r#"{"hardware":"on","retries":2}"#);
    }

    #[test]
    fn test_restore_scratch() {
        let fixture = Fixture::new();
        let ctx = fixture.context("p");

        ctx.restore_scratch(r#"{"retries":3,"hardware":"stopping"}"#);
        assert_eq!(ctx.retries(), 3);
        assert_eq!(ctx.hardware(), HardwarePhase::Stopping);

        ctx.restore_scratch("not json");
        assert_eq!(ctx.retries(), 3);
    }

    #[test]
    fn test_save_persists() {
        let fixture = Fixture::new();
        let ctx = fixture.context("p");

        ctx.save(|c| c.last_error = Some("relay down".to_string()))
            .unwrap();

        assert_eq!(
            fixture.store.get("p").unwrap().last_error.as_deref(),
            Some("relay down")
        );
        assert_eq!(ctx.config().last_error.as_deref(), Some("relay down"));
    }

    #[test]
    fn test_cancel_flag_shared() {
        let fixture = Fixture::new();
        let ctx = fixture.context("p");
        let flag = ctx.cancel_flag();

        flag.store(true, Ordering::SeqCst);
        assert!(ctx.is_cancelled());
        ctx.clear_cancel();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rtmp_url() {
        let fixture = Fixture::new();
        let ctx = fixture.context("p");

        assert_eq!(
            ctx.rtmp_url().as_deref(),
            Some("rtmp://relay.example/live2/aaaa-1111")
        );
    }
}
