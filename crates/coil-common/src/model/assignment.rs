//! Block assignment sets
//!
//! One record per (pool, subnet): which blocks of the subnet are granted and
//! to which node. Blocks not listed under any node are free. The record is
//! written empty when the subnet is registered and is only ever mutated
//! through a revision-guarded transaction.

use std::collections::{BTreeMap, BTreeSet};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Grant state of every block carved from one subnet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAssignment {
    /// The subnet the blocks are carved from
    pub subnet: IpNet,

    /// Number of addresses per block
    pub block_size: u32,

    /// Granted blocks keyed by node name
    #[serde(default)]
    pub nodes: BTreeMap<String, Vec<IpNet>>,
}

impl BlockAssignment {
    /// Create an assignment set with every block free
    pub fn empty(subnet: IpNet, block_size: u32) -> Self {
        Self {
            subnet: subnet.trunc(),
            block_size,
            nodes: BTreeMap::new(),
        }
    }

    /// Prefix length of a single block
    pub fn block_prefix_len(&self) -> u8 {
        self.subnet.max_prefix_len() - self.block_size.trailing_zeros() as u8
    }

    /// All blocks of the subnet, in address order
    pub fn blocks(&self) -> impl Iterator<Item = IpNet> {
        self.subnet
            .subnets(self.block_prefix_len())
            .into_iter()
            .flatten()
    }

    /// Total number of blocks in the subnet
    pub fn total_blocks(&self) -> u128 {
        let bits = u32::from(self.block_prefix_len().saturating_sub(self.subnet.prefix_len()));
        1u128.checked_shl(bits).unwrap_or(u128::MAX)
    }

    /// Number of granted blocks
    pub fn granted_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    /// True if no block is free
    pub fn is_full(&self) -> bool {
        self.granted_count() as u128 >= self.total_blocks()
    }

    /// First free block in address order
    pub fn find_free(&self) -> Option<IpNet> {
        let granted: BTreeSet<&IpNet> = self.nodes.values().flatten().collect();
        self.blocks().find(|block| !granted.contains(block))
    }

    /// Grant the first free block to `node`
    pub fn grant(&mut self, node: &str) -> Option<IpNet> {
        let block = self.find_free()?;
        self.nodes.entry(node.to_string()).or_default().push(block);
        Some(block)
    }

    /// Return `block` from `node` to the free set
    ///
    /// Returns false if the node does not hold the block.
    pub fn release(&mut self, node: &str, block: &IpNet) -> bool {
        let Some(blocks) = self.nodes.get_mut(node) else {
            return false;
        };
        let before = blocks.len();
        blocks.retain(|b| b != block);
        let released = blocks.len() != before;
        if blocks.is_empty() {
            self.nodes.remove(node);
        }
        released
    }

    /// Return every block held by `node`
    pub fn release_node(&mut self, node: &str) -> Vec<IpNet> {
        self.nodes.remove(node).unwrap_or_default()
    }

    /// Blocks currently granted to `node`
    pub fn blocks_of(&self, node: &str) -> &[IpNet] {
        self.nodes.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Node holding `block`, if any
    pub fn owner_of(&self, block: &IpNet) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, blocks)| blocks.contains(block))
            .map(|(node, _)| node.as_str())
    }
}
