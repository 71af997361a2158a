//! Action list parsing.

use std::fmt;
use std::str::FromStr;

use crate::error::HardwareError;
use crate::HardwareResult;

/// Shutdown list value that deliberately skips the graceful shutdown.
pub const SKIP_KEYWORD: &str = "skip";

/// A single device-variable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Variable name, usually `Device.Variable`.
    pub variable: String,

    /// Value to write.
    pub value: String,
}

impl Action {
    /// Create an action.
    pub fn new(variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            value: value.into(),
        }
    }
}

impl FromStr for Action {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (variable, value) = s
            .split_once('=')
            .ok_or_else(|| HardwareError::InvalidAction(s.to_string()))?;

        let variable = variable.trim();
        if variable.is_empty() {
            return Err(HardwareError::InvalidAction(s.to_string()));
        }

        Ok(Self::new(variable, value.trim()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.variable, self.value)
    }
}

/// Ordered list of actions parsed from `var=value,var=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionList(Vec<Action>);

impl ActionList {
    /// Parses a comma separated list. Blank entries are ignored.
    pub fn parse(raw: &str) -> HardwareResult<Self> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect::<HardwareResult<Vec<_>>>()
            .map(Self)
    }

    /// Returns true if the raw list is the skip keyword.
    pub fn is_skip(raw: &str) -> bool {
        raw.trim().eq_ignore_ascii_case(SKIP_KEYWORD)
    }

    /// Appends an action.
    pub fn push(&mut self, action: Action) {
        self.0.push(action);
    }

    /// Returns true if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the actions in order.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let list = ActionList::parse("Camera.Power=on, Controller.Relay1 = true").unwrap();

        let actions: Vec<_> = list.iter().cloned().collect();
        assert_eq!(
            actions,
            vec![
                Action::new("Camera.Power", "on"),
                Action::new("Controller.Relay1", "true"),
            ]
        );
    }

    #[test]
    fn test_parse_empty_and_blank_entries() {
        assert!(ActionList::parse("").unwrap().is_empty());
        assert_eq!(ActionList::parse("a=1,,b=2,").unwrap().len(), 2);
    }

    #[test]
    fn test_parse_rejects_malformed_action() {
        assert!(matches!(
            ActionList::parse("Camera.Power=on,Camera.Reset"),
            Err(HardwareError::InvalidAction(a)) if a == "Camera.Reset"
        ));
        assert!(ActionList::parse("=on").is_err());
    }

    #[test]
    fn test_value_keeps_inner_equals() {
        let action: Action = "Camera.Url=rtmp://host/live?k=v".parse().unwrap();
        assert_eq!(action.value, "rtmp://host/live?k=v");
    }

    #[test]
    fn test_skip_keyword() {
        assert!(ActionList::is_skip(" skip "));
        assert!(ActionList::is_skip("SKIP"));
        assert!(!ActionList::is_skip("Camera.Power=off"));
    }
}
