//! Status conditions shared by the network CRDs
//!
//! Conditions are merged idempotently: an entry with the same type is replaced
//! in place when it differs, a new type is appended, and an identical entry is
//! left untouched so that repeated reconciliations do not rewrite status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported once a SubnetSet is usable
pub const CONDITION_READY: &str = "Ready";

/// Condition type reported when deletion is refused
pub const CONDITION_DELETE_FAILURE: &str = "DeleteFailure";

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

/// A single status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. `Ready`)
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    pub status: ConditionStatus,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Time the condition last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Condition {
    /// Builds a condition stamped with the current time
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: Some(chrono::Utc::now()),
        }
    }

    /// Equality ignoring `last_transition_time`
    pub fn same_as(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

/// Merges `condition` into `conditions`, returning whether anything changed.
pub fn merge_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_as(&condition) => false,
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Removes every condition of `type_`, returning whether one was present.
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    before != conditions.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_appends_new_type() {
        let mut conditions = Vec::new();
        let changed = merge_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, ConditionStatus::True, "Ok", "ready"),
        );
        assert!(changed);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_merge_identical_is_noop() {
        let mut conditions = vec![Condition::new(CONDITION_READY, ConditionStatus::True, "Ok", "ready")];
        let changed = merge_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, ConditionStatus::True, "Ok", "ready"),
        );
        assert!(!changed, "identical condition must not count as a change");
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_merge_replaces_in_place() {
        let mut conditions = vec![
            Condition::new(CONDITION_READY, ConditionStatus::True, "Ok", "ready"),
            Condition::new(CONDITION_DELETE_FAILURE, ConditionStatus::True, "StalePort", "in use"),
        ];
        let changed = merge_condition(
            &mut conditions,
            Condition::new(CONDITION_READY, ConditionStatus::False, "Failed", "boom"),
        );
        assert!(changed);
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, CONDITION_READY);
        assert_eq!(conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn test_remove_condition() {
        let mut conditions = vec![Condition::new(CONDITION_DELETE_FAILURE, ConditionStatus::True, "x", "y")];
        assert!(remove_condition(&mut conditions, CONDITION_DELETE_FAILURE));
        assert!(!remove_condition(&mut conditions, CONDITION_DELETE_FAILURE));
    }
}
