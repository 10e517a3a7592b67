//! Address pools
//!
//! A pool is a named address space made of one or more subnets, carved into
//! fixed-size blocks. A pool is created with exactly one subnet; further
//! subnets are only ever appended.

use std::sync::LazyLock;

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pattern every pool name must match
pub const POOL_NAME_PATTERN: &str = r"^[a-z][a-z0-9_.-]*$";

static POOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(POOL_NAME_PATTERN).expect("pool name pattern is a valid regex"));

/// Validate a pool name against [`POOL_NAME_PATTERN`]
pub fn validate_pool_name(name: &str) -> Result<()> {
    if POOL_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            name,
            "name",
            format!("invalid pool name, must match {POOL_NAME_PATTERN}"),
        ))
    }
}

/// A named address space, as stored under its pool key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPool {
    /// Subnets belonging to this pool, in registration order
    pub subnets: Vec<IpNet>,

    /// Number of addresses per block (a power of two)
    pub block_size: u32,
}

impl AddressPool {
    /// Create a pool with a single subnet
    pub fn new(subnet: IpNet, block_size: u32) -> Self {
        Self {
            subnets: vec![subnet],
            block_size,
        }
    }

    /// Append a subnet and return self for chaining
    pub fn with_subnet(mut self, subnet: IpNet) -> Self {
        self.subnets.push(subnet);
        self
    }

    /// Number of address bits covered by one block
    pub fn block_bits(&self) -> u8 {
        self.block_size.trailing_zeros() as u8
    }

    /// Prefix length of the blocks carved from `subnet`
    pub fn block_prefix_len(&self, subnet: &IpNet) -> u8 {
        subnet.max_prefix_len() - self.block_bits()
    }

    /// True if `subnet` is one of this pool's subnets
    pub fn has_subnet(&self, subnet: &IpNet) -> bool {
        self.subnets.iter().any(|s| s.trunc() == subnet.trunc())
    }

    /// Validate the pool's internal consistency
    ///
    /// Checks the block size, that every subnet is in network form and can
    /// hold at least one block, and that no two subnets overlap.
    pub fn validate(&self) -> Result<()> {
        if self.subnets.is_empty() {
            return Err(Error::validation_for_field(
                "pool",
                "subnets",
                "pool must have at least one subnet",
            ));
        }

        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(Error::validation_for_field(
                "pool",
                "block_size",
                format!("block size {} must be a power of two", self.block_size),
            ));
        }

        for subnet in &self.subnets {
            validate_subnet(subnet)?;

            let host_bits = subnet.max_prefix_len() - subnet.prefix_len();
            if host_bits < self.block_bits() {
                return Err(Error::validation_for_field(
                    subnet.to_string(),
                    "block_size",
                    format!(
                        "subnet is smaller than one block of {} addresses",
                        self.block_size
                    ),
                ));
            }
        }

        for (i, a) in self.subnets.iter().enumerate() {
            for b in &self.subnets[i + 1..] {
                if a.contains(b) || b.contains(a) {
                    return Err(Error::validation_for_field(
                        b.to_string(),
                        "subnets",
                        format!("subnet overlaps with {a}"),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Validate that a subnet is given in its network form
pub fn validate_subnet(subnet: &IpNet) -> Result<()> {
    if subnet.addr() != subnet.network() {
        return Err(Error::validation_for_field(
            subnet.to_string(),
            "subnets",
            format!("subnet must be a network address, e.g. {}", subnet.trunc()),
        ));
    }
    Ok(())
}
