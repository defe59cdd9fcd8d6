//! Deterministic identifier allocation.
//!
//! Replication-server ids and per-suffix domain ids are allocated as the
//! smallest positive integer not already in use, so the same topology state
//! always yields the same id.

use std::collections::BTreeSet;

use dirrepl_connect::Dn;
use dirrepl_topology::{ServerDescriptor, SuffixDescriptor};

/// The smallest id >= 1 absent from `used`.
pub fn smallest_unused(used: &BTreeSet<u32>) -> u32 {
    let mut id = 1;
    while used.contains(&id) {
        id += 1;
    }
    id
}

/// Replication-server ids in use across the given servers.
pub fn used_replication_server_ids(servers: &[ServerDescriptor]) -> BTreeSet<u32> {
    servers
        .iter()
        .filter_map(|s| s.replication_server.as_ref().map(|rs| rs.server_id))
        .collect()
}

/// Domain ids in use for one suffix.
///
/// Scans every known topology of the suffix, not just the one being joined,
/// plus any extra descriptors the caller holds: the two servers being wired
/// together may not appear in any topology yet.
pub fn used_domain_ids(
    suffix_dn: &Dn,
    topologies: &[SuffixDescriptor],
    extra: &[&ServerDescriptor],
) -> BTreeSet<u32> {
    let mut used = BTreeSet::new();
    for topology in topologies.iter().filter(|t| t.dn == *suffix_dn) {
        used.extend(topology.domain_ids());
    }
    for server in extra {
        if let Some(replica) = server.replica(suffix_dn) {
            used.extend(replica.domain_id);
        }
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_starts_at_one() {
        assert_eq!(smallest_unused(&BTreeSet::new()), 1);
    }

    #[test]
    fn test_allocation_fills_gaps() {
        let used: BTreeSet<u32> = [0, 1, 3].into_iter().collect();
        assert_eq!(smallest_unused(&used), 2);
    }

    #[test]
    fn test_allocation_extends_past_contiguous_ids() {
        let used: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        assert_eq!(smallest_unused(&used), 4);
    }
}
