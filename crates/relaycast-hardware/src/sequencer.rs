//! Ordered, best-effort application of power action lists.

use std::sync::Arc;

use relaycast_ipc::BroadcastConfig;
use tracing::{debug, info, instrument, warn};

use crate::actions::{Action, ActionList};
use crate::devices::VariableStore;
use crate::error::HardwareError;
use crate::HardwareResult;

/// The three action lists a broadcast configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerList {
    /// Powers hardware on.
    On,

    /// Gracefully shuts hardware down.
    Shutdown,

    /// Fully de-powers hardware.
    Off,
}

impl PowerList {
    /// Returns the display name for this list.
    pub fn name(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Shutdown => "shutdown",
            Self::Off => "off",
        }
    }
}

/// Outcome of applying one list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    /// Which list was applied.
    pub list: PowerList,

    /// Actions written successfully, in order.
    pub applied: Vec<Action>,

    /// Failed actions with their error, in order.
    pub failures: Vec<(Action, String)>,

    /// The list was deliberately skipped.
    pub skipped: bool,
}

impl SequenceReport {
    fn new(list: PowerList) -> Self {
        Self {
            list,
            applied: Vec::new(),
            failures: Vec::new(),
            skipped: false,
        }
    }

    /// Returns true if no action failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of shutdown followed by off.
#[derive(Debug)]
pub struct PowerDownReport {
    /// Shutdown list result.
    pub shutdown: HardwareResult<SequenceReport>,

    /// Off list result.
    pub off: HardwareResult<SequenceReport>,
}

impl PowerDownReport {
    /// Human readable problems, empty if every step went through.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for step in [&self.shutdown, &self.off] {
            match step {
                Ok(report) => problems.extend(
                    report
                        .failures
                        .iter()
                        .map(|(action, error)| format!("{}: {action}: {error}", report.list.name())),
                ),
                // A missing shutdown list is only a warning.
                Err(HardwareError::NoShutdownActions) => {}
                Err(e) => problems.push(e.to_string()),
            }
        }
        problems
    }
}

/// Applies a broadcast's power action lists against the device variable store.
pub struct HardwarePowerSequencer {
    variables: Arc<dyn VariableStore>,
}

impl HardwarePowerSequencer {
    /// Create a sequencer writing to `variables`.
    pub fn new(variables: Arc<dyn VariableStore>) -> Self {
        Self { variables }
    }

    /// Applies every action in order. A failed write is recorded and the
    /// remaining actions still run.
    #[instrument(name = "apply_actions", skip(self, list, actions), fields(list = list.name()))]
    pub fn apply(&self, site_key: i64, list: PowerList, actions: &ActionList) -> SequenceReport {
        let mut report = SequenceReport::new(list);

        for action in actions.iter() {
            match self.write(site_key, action) {
                Ok(()) => {
                    debug!(%action, "Applied action");
                    report.applied.push(action.clone());
                }
                Err(e) => {
                    warn!(%action, error = %e, "Action failed, continuing");
                    report.failures.push((action.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Only variables that already exist are written.
    fn write(&self, site_key: i64, action: &Action) -> HardwareResult<()> {
        match self.variables.get(site_key, &action.variable)? {
            Some(_) => self.variables.set(site_key, &action.variable, &action.value),
            None => Err(HardwareError::UnknownVariable(action.variable.clone())),
        }
    }

    /// Runs the on list. When the broadcast names an RTMP variable and a
    /// destination is given, the destination is written last.
    pub fn power_on(
        &self,
        config: &BroadcastConfig,
        rtmp_url: Option<&str>,
    ) -> HardwareResult<SequenceReport> {
        let mut actions = ActionList::parse(&config.on_actions)?;
        if let Some(url) = rtmp_url.filter(|_| !config.rtmp_var.is_empty()) {
            actions.push(Action::new(config.rtmp_var.clone(), url));
        }

        info!(broadcast = %config.id, count = actions.len(), "Powering hardware on");
        Ok(self.apply(config.site_key, PowerList::On, &actions))
    }

    /// Runs the shutdown list. Fails with `NoShutdownActions` if none are configured.
    pub fn shutdown(&self, config: &BroadcastConfig) -> HardwareResult<SequenceReport> {
        if ActionList::is_skip(&config.shutdown_actions) {
            warn!(broadcast = %config.id, "Shutdown actions set to skip");
            let mut report = SequenceReport::new(PowerList::Shutdown);
            report.skipped = true;
            return Ok(report);
        }

        let actions = ActionList::parse(&config.shutdown_actions)?;
        if actions.is_empty() {
            return Err(HardwareError::NoShutdownActions);
        }

        info!(broadcast = %config.id, count = actions.len(), "Shutting hardware down");
        Ok(self.apply(config.site_key, PowerList::Shutdown, &actions))
    }

    /// Runs the off list.
    pub fn power_off(&self, config: &BroadcastConfig) -> HardwareResult<SequenceReport> {
        let actions = ActionList::parse(&config.off_actions)?;

        info!(broadcast = %config.id, count = actions.len(), "Powering hardware off");
        Ok(self.apply(config.site_key, PowerList::Off, &actions))
    }

    /// Runs shutdown strictly before off. A failing shutdown never prevents off.
    #[instrument(name = "power_down", skip(self, config), fields(broadcast = %config.id))]
    pub fn power_down(&self, config: &BroadcastConfig) -> PowerDownReport {
        let shutdown = self.shutdown(config);
        if let Err(e) = &shutdown {
            warn!(error = %e, "Shutdown step did not run");
        }

        let off = self.power_off(config);
        if let Err(e) = &off {
            warn!(error = %e, "Off step did not run");
        }

        PowerDownReport { shutdown, off }
    }
}
