//! Per-block address allocator
//!
//! Tracks which individual addresses inside one granted block are in use,
//! as a bitmap. Node agents keep one of these per block they hold.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Largest block handled by the bitmap, in address bits
pub const MAX_BLOCK_BITS: u8 = 20;

/// Bitmap allocator for the addresses of a single block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBlock {
    block: IpNet,
    bitmap: Vec<u64>,
    allocated: u32,
}

impl AddressBlock {
    /// Create an allocator with every address of `block` free
    pub fn new(block: IpNet) -> Result<Self> {
        let bits = block.max_prefix_len() - block.prefix_len();
        if bits > MAX_BLOCK_BITS {
            return Err(Error::validation_for_field(
                block.to_string(),
                "block",
                format!("block larger than 2^{MAX_BLOCK_BITS} addresses"),
            ));
        }
        let size = 1usize << bits;
        Ok(Self {
            block: block.trunc(),
            bitmap: vec![0; size.div_ceil(64)],
            allocated: 0,
        })
    }

    /// The block this allocator covers
    pub fn block(&self) -> IpNet {
        self.block
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u32 {
        1u32 << (self.block.max_prefix_len() - self.block.prefix_len())
    }

    /// Number of free addresses
    pub fn available(&self) -> u32 {
        self.size() - self.allocated
    }

    /// True if every address is in use
    pub fn is_full(&self) -> bool {
        self.allocated == self.size()
    }

    /// Allocate the lowest free address
    pub fn allocate(&mut self) -> Option<IpAddr> {
        let size = self.size();
        for (word_idx, word) in self.bitmap.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros();
            let idx = word_idx as u32 * 64 + bit;
            if idx >= size {
                return None;
            }
            *word |= 1 << bit;
            self.allocated += 1;
            return Some(self.address_at(idx));
        }
        None
    }

    /// Mark a specific address as in use
    ///
    /// Returns false if the address is outside the block or already in use.
    pub fn allocate_specific(&mut self, ip: IpAddr) -> bool {
        let Some(idx) = self.index_of(ip) else {
            return false;
        };
        let (word, mask) = (idx as usize / 64, 1u64 << (idx % 64));
        if self.bitmap[word] & mask != 0 {
            return false;
        }
        self.bitmap[word] |= mask;
        self.allocated += 1;
        true
    }

    /// Free an address
    ///
    /// Returns false if the address is outside the block or was not in use.
    pub fn release(&mut self, ip: IpAddr) -> bool {
        let Some(idx) = self.index_of(ip) else {
            return false;
        };
        let (word, mask) = (idx as usize / 64, 1u64 << (idx % 64));
        if self.bitmap[word] & mask == 0 {
            return false;
        }
        self.bitmap[word] &= !mask;
        self.allocated -= 1;
        true
    }

    /// True if `ip` is allocated
    pub fn is_allocated(&self, ip: IpAddr) -> bool {
        self.index_of(ip)
            .is_some_and(|idx| self.bitmap[idx as usize / 64] & (1 << (idx % 64)) != 0)
    }

    fn index_of(&self, ip: IpAddr) -> Option<u32> {
        match (self.block, ip) {
            (IpNet::V4(net), IpAddr::V4(addr)) if net.contains(&addr) => {
                Some(u32::from(addr) - u32::from(net.network()))
            }
            (IpNet::V6(net), IpAddr::V6(addr)) if net.contains(&addr) => {
                Some((u128::from(addr) - u128::from(net.network())) as u32)
            }
            _ => None,
        }
    }

    fn address_at(&self, idx: u32) -> IpAddr {
        match self.block {
            IpNet::V4(net) => IpAddr::V4(Ipv4Addr::from(u32::from(net.network()) + idx)),
            IpNet::V6(net) => {
                IpAddr::V6(Ipv6Addr::from(u128::from(net.network()) + u128::from(idx)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn allocates_lowest_address_first() {
        let mut block = AddressBlock::new("10.0.0.8/29".parse().unwrap()).unwrap();
        assert_eq!(block.size(), 8);
        assert_eq!(block.allocate(), Some(ip("10.0.0.8")));
        assert_eq!(block.allocate(), Some(ip("10.0.0.9")));
        assert_eq!(block.available(), 6);
    }

    #[test]
    fn fills_up_and_reuses_released_addresses() {
        let mut block = AddressBlock::new("10.0.0.0/30".parse().unwrap()).unwrap();
        for _ in 0..4 {
            assert!(block.allocate().is_some());
        }
        assert!(block.is_full());
        assert_eq!(block.allocate(), None);

        assert!(block.release(ip("10.0.0.2")));
        assert!(!block.release(ip("10.0.0.2")));
        assert!(!block.is_full());
        assert_eq!(block.allocate(), Some(ip("10.0.0.2")));
    }

    #[test]
    fn addresses_outside_the_block_are_rejected() {
        let mut block = AddressBlock::new("10.0.0.0/30".parse().unwrap()).unwrap();
        assert!(!block.allocate_specific(ip("10.0.0.4")));
        assert!(!block.release(ip("10.0.0.4")));
        assert!(!block.allocate_specific(ip("fd00::1")));
        assert!(!block.is_allocated(ip("10.0.0.9")));
    }

    #[test]
    fn specific_allocation_is_exclusive() {
        let mut block = AddressBlock::new("fd00::/120".parse().unwrap()).unwrap();
        assert!(block.allocate_specific(ip("fd00::")));
        assert!(!block.allocate_specific(ip("fd00::")));
        assert!(block.is_allocated(ip("fd00::")));
        assert_eq!(block.allocate(), Some(ip("fd00::1")));
        assert_eq!(block.available(), 254);
    }

    #[test]
    fn blocks_spanning_several_words() {
        let mut block = AddressBlock::new("10.1.0.0/24".parse().unwrap()).unwrap();
        for _ in 0..200 {
            block.allocate();
        }
        assert_eq!(block.allocate(), Some(ip("10.1.0.200")));
        assert!(block.release(ip("10.1.0.70")));
        assert_eq!(block.allocate(), Some(ip("10.1.0.70")));
    }

    #[test]
    fn oversized_blocks_are_rejected() {
        assert!(AddressBlock::new("10.0.0.0/8".parse().unwrap()).is_err());
        assert!(AddressBlock::new("10.0.0.0/12".parse().unwrap()).is_ok());
    }
}
