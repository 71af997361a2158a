//! Device variable storage and reporting status.

use std::time::{Duration, Instant};

use relaycast_registry::SafeMap;
use tracing::trace;

use crate::HardwareResult;

/// Remote device variables, scoped by site.
pub trait VariableStore: Send + Sync {
    /// Reads a variable. `None` if it does not exist.
    fn get(&self, site_key: i64, name: &str) -> HardwareResult<Option<String>>;

    /// Writes a variable.
    fn set(&self, site_key: i64, name: &str, value: &str) -> HardwareResult<()>;
}

/// Reports whether a device is up.
pub trait DeviceStatus: Send + Sync {
    /// Returns true if the device with this MAC (`AA:BB:CC:DD:EE:FF`) is reporting.
    fn is_up(&self, mac: &str) -> HardwareResult<bool>;
}

/// Variable store held in memory.
#[derive(Debug, Default)]
pub struct MemoryVariables {
    vars: SafeMap<(i64, String), String>,
}

impl MemoryVariables {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a variable so actions may write it.
    pub fn define(&self, site_key: i64, name: impl Into<String>, value: impl Into<String>) {
        self.vars.set((site_key, name.into()), value.into());
    }

    /// Current value of a variable.
    pub fn value(&self, site_key: i64, name: &str) -> Option<String> {
        self.vars.get(&(site_key, name.to_string()))
    }
}

impl VariableStore for MemoryVariables {
    fn get(&self, site_key: i64, name: &str) -> HardwareResult<Option<String>> {
        Ok(self.value(site_key, name))
    }

    fn set(&self, site_key: i64, name: &str, value: &str) -> HardwareResult<()> {
        self.vars.set((site_key, name.to_string()), value.to_string());
        Ok(())
    }
}

/// Considers a device up while it has sent a heartbeat within the window.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    last_seen: SafeMap<String, Instant>,
    window: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor with the given liveness window.
    pub fn new(window: Duration) -> Self {
        Self {
            last_seen: SafeMap::new(),
            window,
        }
    }

    /// Records a heartbeat from a device.
    pub fn heartbeat(&self, mac: &str) {
        trace!(%mac, "Device heartbeat");
        self.last_seen.set(mac.to_ascii_uppercase(), Instant::now());
    }
}

impl DeviceStatus for HeartbeatMonitor {
    fn is_up(&self, mac: &str) -> HardwareResult<bool> {
        Ok(self
            .last_seen
            .get(mac.to_ascii_uppercase().as_str())
            .is_some_and(|seen| seen.elapsed() <= self.window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_variables_scoped_by_site() {
        let vars = MemoryVariables::new();
        vars.define(1, "Camera.Power", "off");

        assert_eq!(vars.get(1, "Camera.Power").unwrap().as_deref(), Some("off"));
        assert_eq!(vars.get(2, "Camera.Power").unwrap(), None);

        vars.set(1, "Camera.Power", "on").unwrap();
        assert_eq!(vars.value(1, "Camera.Power").as_deref(), Some("on"));
    }

    #[test]
    fn test_heartbeat_monitor() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(60));

        assert!(!monitor.is_up("0A:1B:2C:3D:4E:5F").unwrap());
        monitor.heartbeat("0a:1b:2c:3d:4e:5f");
        assert!(monitor.is_up("0A:1B:2C:3D:4E:5F").unwrap());
    }

    #[test]
    fn test_heartbeat_expires() {
        let monitor = HeartbeatMonitor::new(Duration::ZERO);
        monitor.heartbeat("0A:1B:2C:3D:4E:5F");
        std::thread::sleep(Duration::from_millis(5));

        assert!(!monitor.is_up("0A:1B:2C:3D:4E:5F").unwrap());
    }
}
