//! Store key layout
//!
//! | Key | Value |
//! |---|---|
//! | `pool/<name>` | JSON [`AddressPool`](crate::model::AddressPool) |
//! | `subnet/<cidr>` | empty; existence means the subnet is owned by some pool |
//! | `block/<name>/<cidr>` | JSON [`BlockAssignment`](crate::model::BlockAssignment) |
//!
//! Each kind has its own prefix and pool names cannot contain `/`, so no two
//! distinct (kind, identifier) pairs map to the same key. Subnets are always
//! rendered in truncated network form so that `10.0.0.1/24` and
//! `10.0.0.0/24` share one ownership key.

use ipnet::IpNet;

/// Prefix of pool records
pub const POOL_PREFIX: &str = "pool/";

/// Prefix of subnet ownership markers
pub const SUBNET_PREFIX: &str = "subnet/";

/// Prefix of block assignment records
pub const BLOCK_PREFIX: &str = "block/";

/// Key of the pool record for `name`
pub fn pool_key(name: &str) -> String {
    format!("{POOL_PREFIX}{name}")
}

/// Key of the ownership marker for `subnet`
pub fn subnet_key(subnet: &IpNet) -> String {
    format!("{SUBNET_PREFIX}{}", subnet.trunc())
}

/// Key of the block assignment record of `subnet` within pool `name`
pub fn block_key(name: &str, subnet: &IpNet) -> String {
    format!("{BLOCK_PREFIX}{name}/{}", subnet.trunc())
}

/// Extract the pool name from a pool key
pub fn pool_name_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(POOL_PREFIX).filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn keys_follow_the_layout() {
        assert_eq!(pool_key("default"), "pool/default");
        assert_eq!(subnet_key(&net("10.0.0.0/24")), "subnet/10.0.0.0/24");
        assert_eq!(
            block_key("default", &net("10.0.0.0/24")),
            "block/default/10.0.0.0/24"
        );
        assert_eq!(subnet_key(&net("fd00::/64")), "subnet/fd00::/64");
    }

    #[test]
    fn subnet_keys_are_canonical() {
        assert_eq!(subnet_key(&net("10.0.0.1/24")), subnet_key(&net("10.0.0.0/24")));
        assert_eq!(
            block_key("p", &net("10.0.1.7/24")),
            block_key("p", &net("10.0.1.0/24"))
        );
    }

    #[test]
    fn distinct_identifiers_never_collide() {
        let pools = ["a", "a.b", "a-b", "default", "subnet", "block"];
        let subnets = ["10.0.0.0/24", "10.0.0.0/25", "10.0.1.0/24", "fd00::/64"];

        let mut keys = HashSet::new();
        let mut count = 0;
        for p in pools {
            keys.insert(pool_key(p));
            count += 1;
            for s in subnets {
                keys.insert(block_key(p, &net(s)));
                count += 1;
            }
        }
        for s in subnets {
            keys.insert(subnet_key(&net(s)));
            count += 1;
        }
        assert_eq!(keys.len(), count);
    }

    #[test]
    fn pool_name_round_trips_through_key() {
        assert_eq!(pool_name_from_key(&pool_key("default")), Some("default"));
        assert_eq!(pool_name_from_key("pool/"), None);
        assert_eq!(pool_name_from_key("subnet/10.0.0.0/24"), None);
    }
}
