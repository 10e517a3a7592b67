//! Custom Resource Definitions consumed by Coil

mod block_request;
mod types;

pub use block_request::{BlockRequest, BlockRequestSpec, BlockRequestStatus};
pub use types::{BlockRequestCondition, BlockRequestConditionType, ConditionStatus};
