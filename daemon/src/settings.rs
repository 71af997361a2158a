//! Daemon settings file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use relaycast_ipc::EngineSettings;
use serde::{Deserialize, Serialize};

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "RELAYCAST_CONFIG";

/// A device variable defined at startup, so actions may write it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSeed {
    pub site_key: i64,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Everything the daemon reads at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// JSON file holding the broadcasts. In memory only when absent.
    pub store_path: Option<PathBuf>,

    /// Engine tunables.
    pub engine: EngineSettings,

    /// Device variables to define.
    pub variables: Vec<VariableSeed>,

    /// How long a device counts as up after its last heartbeat.
    pub heartbeat_window_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            store_path: None,
            engine: EngineSettings::default(),
            variables: Vec::new(),
            heartbeat_window_secs: 120,
        }
    }
}

impl DaemonSettings {
    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Settings from the located file, or defaults when there is none.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        match locate(args, std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn heartbeat_window(&self) -> Duration {
        Duration::from_secs(self.heartbeat_window_secs)
    }
}

/// The first argument wins over the environment.
fn locate(args: impl IntoIterator<Item = String>, env: Option<String>) -> Option<PathBuf> {
    args.into_iter()
        .next()
        .or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_locate_prefers_argument() {
        assert_eq!(
            locate(vec!["a.json".to_string()], Some("b.json".to_string())),
            Some(PathBuf::from("a.json"))
        );
        assert_eq!(
            locate(Vec::new(), Some("b.json".to_string())),
            Some(PathBuf::from("b.json"))
        );
        assert_eq!(locate(Vec::new(), None), None);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "store_path": "/var/lib/relaycast/broadcasts.json",
                "engine": {{ "max_start_failures": 5 }},
                "variables": [{{ "site_key": 1, "name": "Camera.Power" }}]
            }}"#
        )
        .unwrap();

        let settings = DaemonSettings::load(file.path()).unwrap();

        assert_eq!(
            settings.store_path,
            Some(PathBuf::from("/var/lib/relaycast/broadcasts.json"))
        );
        assert_eq!(settings.engine.max_start_failures, 5);
        assert_eq!(settings.engine.control_timeout_secs, 10);
        assert_eq!(settings.variables[0].value, "");
        assert_eq!(settings.heartbeat_window(), Duration::from_secs(120));
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = DaemonSettings::load(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("parsing"));
    }
}
