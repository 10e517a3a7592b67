//! BlockRequest Custom Resource Definition
//!
//! A node agent creates one BlockRequest per block it needs from a pool.
//! The allocation side records its outcome as a condition; Coil only reacts
//! to requests that carry at least one condition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BlockRequestCondition, BlockRequestConditionType};

/// Specification for BlockRequest
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "coil.cybozu.com",
    version = "v2",
    kind = "BlockRequest",
    plural = "blockrequests",
    status = "BlockRequestStatus",
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".spec.nodeName"}"#,
    printcolumn = r#"{"name":"Pool","type":"string","jsonPath":".spec.poolName"}"#,
    printcolumn = r#"{"name":"Block","type":"string","jsonPath":".status.addressBlockName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequestSpec {
    /// Node that needs the block
    pub node_name: String,

    /// Pool the block is requested from
    pub pool_name: String,
}

/// Status for BlockRequest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequestStatus {
    /// Name of the granted block, once allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_block_name: Option<String>,

    /// Allocation outcome; empty until the request has been processed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<BlockRequestCondition>,
}

impl BlockRequest {
    /// True once the request carries at least one condition
    pub fn has_conditions(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| !s.conditions.is_empty())
    }

    /// True if a block was granted
    pub fn is_complete(&self) -> bool {
        self.has_condition(BlockRequestConditionType::Complete)
    }

    /// True if allocation failed
    pub fn is_failed(&self) -> bool {
        self.has_condition(BlockRequestConditionType::Failed)
    }

    fn has_condition(&self, type_: BlockRequestConditionType) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.conditions.iter().any(|c| c.is(type_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;
    use kube::CustomResourceExt;
    use kube::Resource;

    fn request(status: Option<BlockRequestStatus>) -> BlockRequest {
        let mut req = BlockRequest::new(
            "node-1-abcde",
            BlockRequestSpec {
                node_name: "node-1".to_string(),
                pool_name: "default".to_string(),
            },
        );
        req.status = status;
        req
    }

    #[test]
    fn test_crd_identity() {
        assert_eq!(BlockRequest::group(&()), "coil.cybozu.com");
        assert_eq!(BlockRequest::version(&()), "v2");
        assert_eq!(BlockRequest::plural(&()), "blockrequests");

        let crd = BlockRequest::crd();
        assert_eq!(crd.spec.scope, "Cluster");
    }

    #[test]
    fn test_spec_uses_camel_case() {
        let yaml = r#"
apiVersion: coil.cybozu.com/v2
kind: BlockRequest
metadata:
  name: req-1
spec:
  nodeName: node-1
  poolName: default
status:
  addressBlockName: default-0
  conditions:
    - type: Complete
      status: "True"
"#;
        let req: BlockRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(req.spec.node_name, "node-1");
        assert_eq!(req.spec.pool_name, "default");
        assert!(req.has_conditions());
        assert!(req.is_complete());
        assert!(!req.is_failed());
    }

    /// Story: A request moves from unprocessed to processed
    ///
    /// Fresh requests carry no status at all; an empty status is treated
    /// the same way. Only once a condition appears is it considered
    /// processed.
    #[test]
    fn story_request_becomes_processed_when_a_condition_appears() {
        assert!(!request(None).has_conditions());
        assert!(!request(Some(BlockRequestStatus::default())).has_conditions());

        let failed = request(Some(BlockRequestStatus {
            address_block_name: None,
            conditions: vec![BlockRequestCondition::new(
                BlockRequestConditionType::Failed,
                ConditionStatus::True,
                "PoolExhausted",
                "no free block",
            )],
        }));
        assert!(failed.has_conditions());
        assert!(failed.is_failed());
        assert!(!failed.is_complete());
    }
}
