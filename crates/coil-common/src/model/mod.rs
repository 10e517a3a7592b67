//! Address space model: pools, per-subnet block assignments, and the
//! per-block address allocator

mod allocator;
mod assignment;
mod pool;

pub use allocator::{AddressBlock, MAX_BLOCK_BITS};
pub use assignment::BlockAssignment;
pub use pool::{validate_pool_name, validate_subnet, AddressPool, POOL_NAME_PATTERN};
