//! The opaque unit-of-work description attached to every task node.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PayloadError;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling priority consumed by the dispatch queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Ordering weight: higher runs first.
    pub fn weight(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkPayload
// ---------------------------------------------------------------------------

/// Everything a dispatcher needs to start one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPayload {
    /// Human-readable name of the job.
    pub name: String,
    /// Inventory / host reference the work runs against.
    pub target: String,
    /// Body of the work (shell script, playbook, ...).
    pub script: String,
    /// Extra variables handed to the work.
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default)]
    pub dry_run: bool,
    /// Overrides the executor's work-item timeout for this node.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
    /// Submitting user; the dispatch queue enforces fairness per owner.
    #[serde(default)]
    pub owner: Option<String>,
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

impl WorkPayload {
    /// Minimal payload with default options.
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            script: script.into(),
            params: empty_params(),
            dry_run: false,
            timeout_secs: None,
            priority: Priority::default(),
            owner: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Check that the payload is well formed.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.name.trim().is_empty() {
            return Err(PayloadError::EmptyName);
        }
        if self.target.trim().is_empty() {
            return Err(PayloadError::EmptyTarget);
        }
        if self.script.trim().is_empty() {
            return Err(PayloadError::EmptyScript);
        }
        if self.timeout_secs == Some(0) {
            return Err(PayloadError::ZeroTimeout);
        }
        if !self.params.is_object() && !self.params.is_null() {
            return Err(PayloadError::ParamsNotObject);
        }
        Ok(())
    }

    /// Per-item timeout, if the payload overrides the default.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_with_defaults() {
        let payload: WorkPayload = serde_json::from_value(json!({
            "name": "drain",
            "target": "inventory/prod",
            "script": "echo drain"
        }))
        .expect("valid payload json");

        assert_eq!(payload.priority, Priority::Medium);
        assert!(!payload.dry_run);
        assert!(payload.params.is_object());
        assert_eq!(payload.validate(), Ok(()));
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert_eq!(
            WorkPayload::new(" ", "t", "s").validate(),
            Err(PayloadError::EmptyName)
        );
        assert_eq!(
            WorkPayload::new("n", "", "s").validate(),
            Err(PayloadError::EmptyTarget)
        );
        assert_eq!(
            WorkPayload::new("n", "t", "\n").validate(),
            Err(PayloadError::EmptyScript)
        );
        assert_eq!(
            WorkPayload::new("n", "t", "s").with_timeout_secs(0).validate(),
            Err(PayloadError::ZeroTimeout)
        );
    }

    #[test]
    fn params_must_be_an_object() {
        let mut payload = WorkPayload::new("n", "t", "s");
        payload.params = json!([1, 2]);
        assert_eq!(payload.validate(), Err(PayloadError::ParamsNotObject));
    }

    #[test]
    fn priority_weights_are_ordered() {
        assert!(Priority::High.weight() > Priority::Medium.weight());
        assert!(Priority::Medium.weight() > Priority::Low.weight());
    }
}
