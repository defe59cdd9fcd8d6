//! Grouping replicas of the same suffix into per-topology descriptors.
//!
//! Two replicas of one suffix belong to the same topology exactly when the
//! replication-server sets of their groups intersect. Replicas with no
//! replication servers at all (unreplicated suffixes) never merge with
//! anything else.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dirrepl_ads::ServerRegistration;
use dirrepl_connect::{Dn, HostPort};

use crate::descriptor::ServerDescriptor;

/// One replica inside a [`SuffixDescriptor`], flattened with its server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixReplica {
    /// Instance id of the hosting server.
    pub server_id: String,
    /// Administration endpoint of the hosting server.
    pub server_host_port: HostPort,
    /// The hosting server's registration, when enrolled.
    pub registration: Option<ServerRegistration>,
    /// Replication servers the replica's domain references.
    pub replication_servers: BTreeSet<HostPort>,
    /// Whether a replication domain exists for the replica.
    pub replicated: bool,
    /// The domain id, when replicated.
    pub domain_id: Option<u32>,
}

/// One suffix topology: every replica reachable through a shared
/// replication-server set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixDescriptor {
    /// The suffix base DN.
    pub dn: Dn,
    /// Member replicas.
    pub replicas: Vec<SuffixReplica>,
}

impl SuffixDescriptor {
    /// Union of the replication servers referenced by every member replica.
    pub fn replication_servers(&self) -> BTreeSet<HostPort> {
        self.replicas
            .iter()
            .flat_map(|r| r.replication_servers.iter().cloned())
            .collect()
    }

    /// Whether the topology's replication-server set intersects `other`.
    pub fn shares_replication_server(&self, other: &BTreeSet<HostPort>) -> bool {
        let mine = self.replication_servers();
        !mine.is_disjoint(other)
    }

    /// Domain ids already in use for this suffix.
    pub fn domain_ids(&self) -> BTreeSet<u32> {
        self.replicas.iter().filter_map(|r| r.domain_id).collect()
    }

    /// The replica hosted on the given server, if any.
    pub fn replica_on(&self, host_port: &HostPort) -> Option<&SuffixReplica> {
        self.replicas.iter().find(|r| r.server_host_port == *host_port)
    }
}

/// Group every replica of every server into suffix topologies.
///
/// The result is ordered by suffix DN, then by the first member's endpoint,
/// so repeated reads of an unchanged topology compare equal.
pub fn group_suffixes(servers: &[ServerDescriptor]) -> Vec<SuffixDescriptor> {
    let mut by_dn: Vec<(Dn, Vec<SuffixReplica>)> = Vec::new();
    for server in servers {
        for replica in &server.replicas {
            let flat = SuffixReplica {
                server_id: server.id.clone(),
                server_host_port: server.host_port.clone(),
                registration: server.registration.clone(),
                replication_servers: replica.replication_servers.clone(),
                replicated: replica.replicated,
                domain_id: replica.domain_id,
            };
            match by_dn.iter_mut().find(|(dn, _)| *dn == replica.suffix_dn) {
                Some((_, list)) => list.push(flat),
                None => by_dn.push((replica.suffix_dn.clone(), vec![flat])),
            }
        }
    }

    let mut out = Vec::new();
    for (dn, replicas) in by_dn {
        for group in partition_by_shared_rs(replicas) {
            out.push(SuffixDescriptor {
                dn: dn.clone(),
                replicas: group,
            });
        }
    }
    out.sort_by(|a, b| {
        let dn = a.dn.cmp(&b.dn);
        dn.then_with(|| {
            let ka = a.replicas.first().map(|r| r.server_host_port.clone());
            let kb = b.replicas.first().map(|r| r.server_host_port.clone());
            ka.cmp(&kb)
        })
    });
    out
}

/// Split the replicas of one suffix into groups whose replication-server
/// sets transitively intersect.
fn partition_by_shared_rs(replicas: Vec<SuffixReplica>) -> Vec<Vec<SuffixReplica>> {
    let mut groups: Vec<(BTreeSet<HostPort>, Vec<SuffixReplica>)> = Vec::new();
    for replica in replicas {
        let rs = replica.replication_servers.clone();
        let matching: Vec<usize> = groups
            .iter()
            .enumerate()
            .filter(|(_, (set, _))| !rs.is_empty() && !set.is_disjoint(&rs))
            .map(|(i, _)| i)
            .collect();
        match matching.split_first() {
            None => groups.push((rs, vec![replica])),
            Some((&first, rest)) => {
                // One new replica can bridge previously separate groups.
                for &i in rest.iter().rev() {
                    let (set, members) = groups.remove(i);
                    groups[first].0.extend(set);
                    groups[first].1.extend(members);
                }
                groups[first].0.extend(rs);
                groups[first].1.push(replica);
            }
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ReplicaDescriptor;

    fn server(host: &str, replicas: Vec<ReplicaDescriptor>) -> ServerDescriptor {
        ServerDescriptor {
            id: host.into(),
            host_port: HostPort::new(host, 1389),
            replication_server: None,
            replicas,
            registration: None,
            last_error: None,
        }
    }

    fn replica(dn: &str, rs: &[&str]) -> ReplicaDescriptor {
        let servers: BTreeSet<HostPort> = rs.iter().map(|s| s.parse().unwrap()).collect();
        ReplicaDescriptor {
            suffix_dn: Dn::new(dn),
            replicated: !servers.is_empty(),
            domain_id: None,
            replication_servers: servers,
        }
    }

    #[test]
    fn test_replicas_sharing_a_server_merge() {
        let servers = vec![
            server("s1", vec![replica("dc=example,dc=com", &["s1:8989"])]),
            server("s2", vec![replica("dc=example,dc=com", &["s1:8989", "s2:8989"])]),
        ];
        let suffixes = group_suffixes(&servers);
        assert_eq!(suffixes.len(), 1);
        assert_eq!(suffixes[0].replicas.len(), 2);
        assert_eq!(suffixes[0].replication_servers().len(), 2);
    }

    #[test]
    fn test_disjoint_topologies_stay_separate() {
        let servers = vec![
            server("s1", vec![replica("dc=example,dc=com", &["s1:8989"])]),
            server("s2", vec![replica("dc=example,dc=com", &["s2:8989"])]),
        ];
        let suffixes = group_suffixes(&servers);
        assert_eq!(suffixes.len(), 2);
    }

    #[test]
    fn test_bridging_replica_merges_groups() {
        // s3 references both earlier servers, joining the two islands.
        let servers = vec![
            server("s1", vec![replica("dc=example,dc=com", &["s1:8989"])]),
            server("s2", vec![replica("dc=example,dc=com", &["s2:8989"])]),
            server("s3", vec![replica("dc=example,dc=com", &["s1:8989", "s2:8989"])]),
        ];
        let suffixes = group_suffixes(&servers);
        assert_eq!(suffixes.len(), 1);
        assert_eq!(suffixes[0].replicas.len(), 3);
    }

    #[test]
    fn test_unreplicated_replicas_never_merge() {
        let servers = vec![
            server("s1", vec![replica("dc=example,dc=com", &[])]),
            server("s2", vec![replica("dc=example,dc=com", &[])]),
        ];
        let suffixes = group_suffixes(&servers);
        assert_eq!(suffixes.len(), 2);
        assert!(suffixes.iter().all(|s| !s.replicas[0].replicated));
    }

    #[test]
    fn test_different_suffixes_never_merge() {
        let servers = vec![server(
            "s1",
            vec![
                replica("dc=example,dc=com", &["s1:8989"]),
                replica("cn=admin data", &["s1:8989"]),
            ],
        )];
        let suffixes = group_suffixes(&servers);
        assert_eq!(suffixes.len(), 2);
    }

    #[test]
    fn test_rs_host_matching_is_case_insensitive() {
        let servers = vec![
            server("s1", vec![replica("dc=example,dc=com", &["RS1.Example.COM:8989"])]),
            server("s2", vec![replica("dc=example,dc=com", &["rs1.example.com:8989"])]),
        ];
        let suffixes = group_suffixes(&servers);
        assert_eq!(suffixes.len(), 1);
    }
}
