//! Pure eligibility checks, one per operation.
//!
//! These take already-read descriptors and return what (if anything) needs
//! doing; they never touch a connection, so the decisions are trivially
//! testable and identical however the descriptors were obtained.

use dirrepl_connect::Dn;
use dirrepl_topology::ServerDescriptor;

use crate::error::{EligibilityOp, ReplError};

/// What enabling a suffix between two servers requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableEligibility {
    /// Each replica already references the other server's replication
    /// server; nothing to write.
    AlreadyReplicated,
    /// The suffix must be wired up.
    ToEnable,
}

/// Check that `suffix` can be replicated between `s1` and `s2`.
///
/// The suffix must be hosted on both servers. Two replicas count as already
/// replicated only when each references the other server's replication
/// server, so two islands of the same suffix still classify as
/// [`EnableEligibility::ToEnable`].
pub fn classify_enable(
    suffix: &Dn,
    s1: &ServerDescriptor,
    s2: &ServerDescriptor,
) -> Result<EnableEligibility, ReplError> {
    let r1 = s1.replica(suffix).ok_or_else(|| not_hosted(suffix, s1, EligibilityOp::Enabled))?;
    let r2 = s2.replica(suffix).ok_or_else(|| not_hosted(suffix, s2, EligibilityOp::Enabled))?;

    if r1.replicated && r2.replicated {
        let mutual = match (s1.replication_host_port(), s2.replication_host_port()) {
            (Some(rs1), Some(rs2)) => {
                r1.replication_servers.contains(&rs2) && r2.replication_servers.contains(&rs1)
            }
            _ => false,
        };
        if mutual {
            return Ok(EnableEligibility::AlreadyReplicated);
        }
    }
    Ok(EnableEligibility::ToEnable)
}

/// What disabling a suffix on one server requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableEligibility {
    /// No domain exists for the suffix; nothing to remove.
    NotReplicated,
    /// The domain must be removed.
    ToDisable,
}

/// Check that `suffix` can be un-replicated on `server`.
pub fn classify_disable(
    suffix: &Dn,
    server: &ServerDescriptor,
) -> Result<DisableEligibility, ReplError> {
    let replica = server
        .replica(suffix)
        .ok_or_else(|| not_hosted(suffix, server, EligibilityOp::Disabled))?;
    if replica.replicated {
        Ok(DisableEligibility::ToDisable)
    } else {
        Ok(DisableEligibility::NotReplicated)
    }
}

/// Check that `suffix` can be initialized on `destination` from `source`,
/// returning the source replica's domain id (the task identifies the source
/// by it).
///
/// Both replicas must be replicated and share at least one replication
/// server; initialization runs over the replication protocol, not over the
/// management connections.
pub fn classify_initialize(
    suffix: &Dn,
    source: &ServerDescriptor,
    destination: &ServerDescriptor,
) -> Result<u32, ReplError> {
    let src = source
        .replica(suffix)
        .ok_or_else(|| not_hosted(suffix, source, EligibilityOp::Initialized))?;
    let dst = destination
        .replica(suffix)
        .ok_or_else(|| not_hosted(suffix, destination, EligibilityOp::Initialized))?;

    if !src.replicated || !dst.replicated {
        let (server, side) = if src.replicated {
            (destination, "destination")
        } else {
            (source, "source")
        };
        return Err(ReplError::SuffixNotEligible {
            op: EligibilityOp::Initialized,
            suffix: suffix.clone(),
            server: server.host_port.clone(),
            reason: format!("suffix is not replicated on the {side} server"),
        });
    }
    if src.replication_servers.is_disjoint(&dst.replication_servers) {
        return Err(ReplError::SuffixNotEligible {
            op: EligibilityOp::Initialized,
            suffix: suffix.clone(),
            server: destination.host_port.clone(),
            reason: "source and destination replicas share no replication server".into(),
        });
    }
    src.domain_id.ok_or_else(|| ReplError::DomainIdNotFound {
        suffix: suffix.clone(),
        server: source.host_port.clone(),
    })
}

fn not_hosted(suffix: &Dn, server: &ServerDescriptor, op: EligibilityOp) -> ReplError {
    ReplError::SuffixNotEligible {
        op,
        suffix: suffix.clone(),
        server: server.host_port.clone(),
        reason: "no backend hosts the suffix".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use dirrepl_connect::HostPort;
    use dirrepl_topology::{ReplicaDescriptor, ReplicationServerInfo};

    fn server(host: &str, rs_port: Option<u16>) -> ServerDescriptor {
        ServerDescriptor {
            id: host.into(),
            host_port: HostPort::new(host, 1389),
            replication_server: rs_port.map(|port| ReplicationServerInfo {
                server_id: 1,
                port,
                host_port: HostPort::new(host, port),
            }),
            replicas: Vec::new(),
            registration: None,
            last_error: None,
        }
    }

    fn replica(dn: &str, rs: &[&str], domain_id: Option<u32>) -> ReplicaDescriptor {
        let servers: BTreeSet<HostPort> = rs.iter().map(|s| s.parse().unwrap()).collect();
        ReplicaDescriptor {
            suffix_dn: Dn::new(dn),
            replicated: !servers.is_empty(),
            domain_id,
            replication_servers: servers,
        }
    }

    const SUFFIX: &str = "dc=example,dc=com";

    #[test]
    fn test_enable_missing_backend_is_an_error() {
        let s1 = server("s1", None);
        let mut s2 = server("s2", None);
        s2.replicas.push(replica(SUFFIX, &[], None));
        let err = classify_enable(&Dn::new(SUFFIX), &s1, &s2).unwrap_err();
        assert!(matches!(err, ReplError::SuffixNotEligible { .. }));
    }

    #[test]
    fn test_enable_fresh_suffix_needs_enabling() {
        let mut s1 = server("s1", None);
        let mut s2 = server("s2", None);
        s1.replicas.push(replica(SUFFIX, &[], None));
        s2.replicas.push(replica(SUFFIX, &[], None));
        assert_eq!(
            classify_enable(&Dn::new(SUFFIX), &s1, &s2).unwrap(),
            EnableEligibility::ToEnable
        );
    }

    #[test]
    fn test_enable_mutual_references_are_a_nop() {
        let mut s1 = server("s1", Some(8989));
        let mut s2 = server("s2", Some(8989));
        s1.replicas
            .push(replica(SUFFIX, &["s1:8989", "s2:8989"], Some(1)));
        s2.replicas
            .push(replica(SUFFIX, &["s1:8989", "s2:8989"], Some(2)));
        assert_eq!(
            classify_enable(&Dn::new(SUFFIX), &s1, &s2).unwrap(),
            EnableEligibility::AlreadyReplicated
        );
    }

    #[test]
    fn test_enable_two_islands_still_need_enabling() {
        let mut s1 = server("s1", Some(8989));
        let mut s2 = server("s2", Some(8989));
        s1.replicas.push(replica(SUFFIX, &["s1:8989"], Some(1)));
        s2.replicas.push(replica(SUFFIX, &["s2:8989"], Some(1)));
        assert_eq!(
            classify_enable(&Dn::new(SUFFIX), &s1, &s2).unwrap(),
            EnableEligibility::ToEnable
        );
    }

    #[test]
    fn test_disable_unreplicated_suffix_is_a_nop() {
        let mut s1 = server("s1", None);
        s1.replicas.push(replica(SUFFIX, &[], None));
        assert_eq!(
            classify_disable(&Dn::new(SUFFIX), &s1).unwrap(),
            DisableEligibility::NotReplicated
        );
    }

    #[test]
    fn test_initialize_requires_shared_replication_server() {
        let mut src = server("s1", Some(8989));
        let mut dst = server("s2", Some(8989));
        src.replicas.push(replica(SUFFIX, &["s1:8989"], Some(1)));
        dst.replicas.push(replica(SUFFIX, &["s2:8989"], Some(2)));
        let err = classify_initialize(&Dn::new(SUFFIX), &src, &dst).unwrap_err();
        assert!(matches!(err, ReplError::SuffixNotEligible { .. }));
    }

    #[test]
    fn test_initialize_returns_source_domain_id() {
        let mut src = server("s1", Some(8989));
        let mut dst = server("s2", Some(8989));
        src.replicas
            .push(replica(SUFFIX, &["s1:8989", "s2:8989"], Some(7)));
        dst.replicas
            .push(replica(SUFFIX, &["s1:8989", "s2:8989"], Some(2)));
        assert_eq!(classify_initialize(&Dn::new(SUFFIX), &src, &dst).unwrap(), 7);
    }

    #[test]
    fn test_initialize_missing_source_domain_id() {
        let mut src = server("s1", Some(8989));
        let mut dst = server("s2", Some(8989));
        src.replicas
            .push(replica(SUFFIX, &["s1:8989", "s2:8989"], None));
        dst.replicas
            .push(replica(SUFFIX, &["s1:8989", "s2:8989"], Some(2)));
        let err = classify_initialize(&Dn::new(SUFFIX), &src, &dst).unwrap_err();
        assert!(matches!(err, ReplError::DomainIdNotFound { .. }));
    }
}
