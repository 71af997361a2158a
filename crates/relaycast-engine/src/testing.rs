//! Fakes and fixtures shared by the engine's unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use relaycast_forward::{BroadcastPair, ForwardError, ForwardResult, ForwardingService};
use relaycast_hardware::{
    DeviceStatus, HardwareError, HardwarePowerSequencer, HardwareResult, MemoryVariables,
    VariableStore,
};
use relaycast_ipc::{mac_encode, BroadcastConfig, BroadcastStore, EngineSettings, MemoryStore};

use crate::context::{BroadcastContext, Services};
use crate::machine::StateMachine;
use crate::states::{builtin_registry, StateRegistry};

pub const SITE: i64 = 1;

/// Records relay calls. Stream outcomes can be scripted.
pub struct RecordingForwarder {
    store: Arc<MemoryStore>,
    calls: Mutex<Vec<String>>,
    stream_failures: Mutex<VecDeque<String>>,
}

impl RecordingForwarder {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            calls: Mutex::new(Vec::new()),
            stream_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// The next `count` stream requests fail as if the relay were down.
    pub fn fail_next_streams(&self, count: usize) {
        let mut failures = self.stream_failures.lock();
        for _ in 0..count {
            failures.push_back("connection refused".to_string());
        }
    }

    pub fn clear_failures(&self) {
        self.stream_failures.lock().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl ForwardingService for RecordingForwarder {
    fn stream(&self, config: &BroadcastConfig) -> ForwardResult<()> {
        BroadcastPair::resolve(self.store.as_ref(), config)?;
        self.record(format!("stream:{}", config.name));

        match self.stream_failures.lock().pop_front() {
            Some(last) => Err(ForwardError::RetriesExhausted { attempts: 3, last }),
            None => Ok(()),
        }
    }

    fn slate(&self, config: &BroadcastConfig) -> ForwardResult<()> {
        self.record(format!("slate:{}", config.name));
        Ok(())
    }

    fn upload_slate(&self, config: &BroadcastConfig, name: &str, data: Bytes) -> ForwardResult<()> {
        self.record(format!("upload:{}:{}:{}", config.name, name, data.len()));
        Ok(())
    }
}

/// In-memory variables that also keep every write in order.
#[derive(Default)]
pub struct RecordingVariables {
    inner: MemoryVariables,
    writes: Mutex<Vec<String>>,
}

impl RecordingVariables {
    pub fn define(&self, name: &str, value: &str) {
        self.inner.define(SITE, name, value);
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.inner.value(SITE, name)
    }

    /// Writes as `Name=value`.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }
}

impl VariableStore for RecordingVariables {
    fn get(&self, site_key: i64, name: &str) -> HardwareResult<Option<String>> {
        self.inner.get(site_key, name)
    }

    fn set(&self, site_key: i64, name: &str, value: &str) -> HardwareResult<()> {
        self.writes.lock().push(format!("{name}={value}"));
        self.inner.set(site_key, name, value)
    }
}

/// Device status whose answer the test controls per MAC. Unlisted devices
/// report `up`.
#[derive(Default)]
pub struct ScriptedDevices {
    up: AtomicBool,
    down: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedDevices {
    pub fn up() -> Self {
        let devices = Self::default();
        devices.up.store(true, Ordering::SeqCst);
        devices
    }

    /// The device with `mac` reports down.
    pub fn set_down(&self, mac: &str) {
        self.down.lock().insert(mac.to_string());
    }

    /// Status requests for `mac` fail.
    pub fn set_failing(&self, mac: &str) {
        self.failing.lock().insert(mac.to_string());
    }
}

impl DeviceStatus for ScriptedDevices {
    fn is_up(&self, mac: &str) -> HardwareResult<bool> {
        if self.failing.lock().contains(mac) {
            return Err(HardwareError::Device("status service unavailable".to_string()));
        }
        if self.down.lock().contains(mac) {
            return Ok(false);
        }
        Ok(self.up.load(Ordering::SeqCst))
    }
}

pub fn primary() -> BroadcastConfig {
    BroadcastConfig {
        site_key: SITE,
        id: "p".to_string(),
        name: "Reef-Cam".to_string(),
        camera_mac: mac_encode("0A:1B:2C:3D:4E:5F"),
        controller_mac: mac_encode("0A:1B:2C:3D:4E:60"),
        rtmp_key: "aaaa-1111".to_string(),
        rtmp_var: "Camera.Stream".to_string(),
        relay_host: "relay.example:8080".to_string(),
        on_actions: "Camera.Power=on".to_string(),
        shutdown_actions: "Camera.Power=shutdown".to_string(),
        off_actions: "Controller.Power=off".to_string(),
        ..Default::default()
    }
}

pub fn secondary() -> BroadcastConfig {
    BroadcastConfig {
        id: "s".to_string(),
        name: "Reef-Cam (secondary)".to_string(),
        rtmp_key: "bbbb-2222".to_string(),
        ..primary()
    }
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        rtmp_base: "rtmp://relay.example/live2/".to_string(),
        max_start_failures: 3,
        hardware_ready_timeout_ms: 150,
        hardware_poll_interval_ms: 5,
        control_timeout_secs: 1,
        retry_base_delay_ms: 1,
    }
}

/// A Reef-Cam pair wired to in-memory fakes.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub forwarder: Arc<RecordingForwarder>,
    pub variables: Arc<RecordingVariables>,
    pub devices: Arc<ScriptedDevices>,
    pub settings: EngineSettings,
    pub registry: Arc<StateRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_configs(vec![primary(), secondary()])
    }

    pub fn with_configs(configs: Vec<BroadcastConfig>) -> Self {
        let store = Arc::new(MemoryStore::with_records(configs));
        let variables = Arc::new(RecordingVariables::default());
        for name in ["Camera.Power", "Camera.Stream", "Controller.Power"] {
            variables.define(name, "");
        }

        Self {
            forwarder: Arc::new(RecordingForwarder::new(Arc::clone(&store))),
            store,
            variables,
            devices: Arc::new(ScriptedDevices::up()),
            settings: fast_settings(),
            registry: Arc::new(builtin_registry().unwrap()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            store: self.store.clone(),
            forwarder: self.forwarder.clone(),
            sequencer: Arc::new(HardwarePowerSequencer::new(self.variables.clone())),
            devices: self.devices.clone(),
        }
    }

    pub fn context(&self, id: &str) -> BroadcastContext {
        let config = self.store.get(id).unwrap();
        BroadcastContext::new(config, self.services(), self.settings.clone())
    }

    pub fn machine(&self, id: &str) -> StateMachine {
        StateMachine::new(self.context(id), Arc::clone(&self.registry)).unwrap()
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables.value(name)
    }
}
