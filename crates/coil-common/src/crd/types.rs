//! Shared status types for Coil CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Outcome recorded on a BlockRequest
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BlockRequestConditionType {
    /// A block was granted and recorded in `status.addressBlockName`
    Complete,
    /// The request could not be satisfied
    Failed,
}

impl std::fmt::Display for BlockRequestConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Kubernetes-style condition on a BlockRequest status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequestCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: BlockRequestConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition was probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,

    /// Last time the condition transitioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl BlockRequestCondition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: BlockRequestConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_probe_time: Some(now),
            last_transition_time: Some(now),
        }
    }

    /// True if this condition has the given type and status True
    pub fn is(&self, type_: BlockRequestConditionType) -> bool {
        self.type_ == type_ && self.status == ConditionStatus::True
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_new_stamps_times() {
        let before = Utc::now();
        let condition = BlockRequestCondition::new(
            BlockRequestConditionType::Complete,
            ConditionStatus::True,
            "Allocated",
            "block 10.0.0.0/29 granted",
        );
        let after = Utc::now();

        assert!(condition.is(BlockRequestConditionType::Complete));
        assert!(!condition.is(BlockRequestConditionType::Failed));
        let t = condition.last_transition_time.unwrap();
        assert!(t >= before && t <= after);
    }

    #[test]
    fn test_condition_uses_kubernetes_field_names() {
        let json = serde_json::json!({
            "type": "Failed",
            "status": "True",
            "reason": "PoolExhausted",
            "lastTransitionTime": "2024-01-01T00:00:00Z"
        });
        let condition: BlockRequestCondition = serde_json::from_value(json).unwrap();
        assert_eq!(condition.type_, BlockRequestConditionType::Failed);
        assert_eq!(condition.status, ConditionStatus::True);
        assert!(condition.message.is_empty());
        assert!(condition.last_probe_time.is_none());

        let back = serde_json::to_value(&condition).unwrap();
        assert_eq!(back["type"], "Failed");
        assert!(back.get("message").is_none());
    }

    #[test]
    fn test_condition_status_display() {
        assert_eq!(ConditionStatus::True.to_string(), "True");
        assert_eq!(ConditionStatus::default().to_string(), "Unknown");
        assert_eq!(BlockRequestConditionType::Complete.to_string(), "Complete");
    }
}
