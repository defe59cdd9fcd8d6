//! Enabling replication of a set of suffixes between two servers.
//!
//! The operation reconciles the two administrative stores, makes sure both
//! servers run a replication server, wires a domain per suffix on both, fans
//! the grown replication-server set out to every other member of the joined
//! topologies, and finally seeds the administrative suffix on the server
//! that did not contribute the authoritative registry.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use dirrepl_ads::{AdsContext, ServerRegistration, ADMIN_DATA_DN, SCHEMA_DN};
use dirrepl_connect::{
    close_quietly, ConnectionSpec, Connector, DirectoryConnection, Dn, HostPort,
};
use dirrepl_topology::{read_server_descriptor, ServerDescriptor, TopologyCache};

use crate::ads_merge::{apply_plan, AdsPlan, AdsState};
use crate::classify::{classify_enable, EnableEligibility};
use crate::error::{EligibilityOp, ReplError};
use crate::ids;
use crate::initialize::{initialize_suffix, RetryPolicy};
use crate::params::{EnableEndpoint, EnableReplicationParams};
use crate::propagate;
use crate::report::{OperationReport, SuffixOutcome};
use crate::session::connect_both;

/// Enable replication between the two servers named in `params`.
pub async fn enable_replication(
    connector: &dyn Connector,
    params: &EnableReplicationParams,
) -> Result<OperationReport, ReplError> {
    let (conn1, conn2) =
        connect_both(connector, &params.server1.spec, &params.server2.spec).await?;
    let result = run(connector, params, conn1.as_ref(), conn2.as_ref()).await;
    close_quietly(conn1.as_ref()).await;
    close_quietly(conn2.as_ref()).await;
    result
}

async fn run(
    connector: &dyn Connector,
    params: &EnableReplicationParams,
    conn1: &dyn DirectoryConnection,
    conn2: &dyn DirectoryConnection,
) -> Result<OperationReport, ReplError> {
    let hp1 = conn1.host_port();
    let hp2 = conn2.host_port();

    let desc1 = read_descriptor(conn1).await?;
    let desc2 = read_descriptor(conn2).await?;

    // Reconcile the administrative stores before touching any replication
    // configuration; an unsupported merge must leave both servers untouched.
    let registry1 = read_registry(conn1).await?;
    let registry2 = read_registry(conn2).await?;
    let state1 = ads_state(conn1, registry1.len()).await?;
    let state2 = ads_state(conn2, registry2.len()).await?;
    let admin_dn = Dn::new(ADMIN_DATA_DN);
    let already_shared = match (desc1.replica(&admin_dn), desc2.replica(&admin_dn)) {
        (Some(a), Some(b)) => !a.replication_servers.is_disjoint(&b.replication_servers),
        _ => false,
    };
    let plan = AdsPlan::evaluate(state1, state2, already_shared, &hp1, &hp2)?;

    // Eligibility of the requested suffixes is settled before the first
    // write. A suffix missing on either server or already replicated between
    // the pair drops out of the request; when nothing is left the whole
    // operation is an error and both servers stay untouched.
    let mut outcomes = Vec::new();
    let mut to_enable = Vec::new();
    for suffix in &params.base_dns {
        sort_eligibility(suffix, &desc1, &desc2, &mut to_enable, &mut outcomes)?;
    }
    if to_enable.is_empty() {
        info!(server1 = %hp1, server2 = %hp2, "no requested suffix is left to enable");
        return Err(ReplError::NoEligibleSuffixes {
            op: EligibilityOp::Enabled,
        });
    }

    let authoritative_registry = match plan {
        AdsPlan::UseSecond => &registry2,
        AdsPlan::UseFirst | AdsPlan::CreateFresh => &registry1,
    };
    let reg1 = registration_for(authoritative_registry, &hp1);
    let reg2 = registration_for(authoritative_registry, &hp2);
    apply_plan(plan, conn1, conn2, &reg1, &reg2, &params.admin).await?;

    // The administrative suffix always rides along; the schema only on
    // request. Neither counts toward the nothing-eligible check above.
    let mut plumbing = Vec::new();
    if !params.base_dns.contains(&admin_dn) {
        plumbing.push(admin_dn.clone());
    }
    let schema_dn = Dn::new(SCHEMA_DN);
    if params.replicate_schema && !params.base_dns.contains(&schema_dn) {
        plumbing.push(schema_dn);
    }
    for suffix in &plumbing {
        sort_eligibility(suffix, &desc1, &desc2, &mut to_enable, &mut outcomes)?;
    }

    let auth_conn = *plan.authoritative(&conn1, &conn2);
    let admin_template = params
        .server1
        .spec
        .rebind(params.admin.bind_dn(), &params.admin.password);
    let cache = TopologyCache::reload(connector, auth_conn, &admin_template)
        .await
        .map_err(|e| ReplError::ReadAds {
            server: auth_conn.host_port(),
            source: e,
        })?;

    // Replication-server endpoints of the pair, creating configurations
    // where missing.
    let mut rs_endpoints = BTreeSet::new();
    for (endpoint, desc) in [(&params.server1, &desc1), (&params.server2, &desc2)] {
        rs_endpoints.insert(rs_endpoint_of(endpoint, desc)?);
    }
    // Everything the joined topologies already reference comes along too.
    let mut referenced = rs_endpoints.clone();
    for suffix in &to_enable {
        for topology in joined_topologies(&cache, suffix, &hp1, &hp2) {
            referenced.extend(topology.replication_servers());
        }
    }

    let mut used_rs_ids = ids::used_replication_server_ids(cache.servers());
    used_rs_ids.extend(ids::used_replication_server_ids(std::slice::from_ref(&desc1)));
    used_rs_ids.extend(ids::used_replication_server_ids(std::slice::from_ref(&desc2)));
    for (endpoint, desc, conn) in [
        (&params.server1, &desc1, conn1),
        (&params.server2, &desc2, conn2),
    ] {
        let (rs_id, rs_port) = match &desc.replication_server {
            Some(rs) => (rs.server_id, rs.port),
            None => {
                let id = ids::smallest_unused(&used_rs_ids);
                used_rs_ids.insert(id);
                // rs_endpoint_of already guaranteed the port.
                (id, endpoint.replication_port.unwrap_or_default())
            }
        };
        propagate::ensure_replication_server(conn, rs_id, rs_port, &referenced)
            .await
            .map_err(|e| ReplError::ConfigureReplicationServer {
                server: conn.host_port(),
                source: e,
            })?;
        if endpoint.secure_replication {
            propagate::set_secure_replication(conn, true)
                .await
                .map_err(|e| ReplError::UpdateConfig {
                    server: conn.host_port(),
                    source: e,
                })?;
        }
    }

    let mut admin_source_id = None;
    for suffix in &to_enable {
        let mut used = ids::used_domain_ids(suffix, cache.suffixes(), &[&desc1, &desc2]);

        let out1 = propagate::ensure_domain(conn1, suffix, ids::smallest_unused(&used), &referenced)
            .await
            .map_err(|e| enable_err(suffix, &hp1, e))?;
        used.insert(out1.domain_id);
        let out2 = propagate::ensure_domain(conn2, suffix, ids::smallest_unused(&used), &referenced)
            .await
            .map_err(|e| enable_err(suffix, &hp2, e))?;
        used.insert(out2.domain_id);

        // Fan the grown reference set out to the rest of the topology. The
        // targets form an unordered set; each is updated independently.
        let mut others: BTreeSet<HostPort> = BTreeSet::new();
        for topology in joined_topologies(&cache, suffix, &hp1, &hp2) {
            others.extend(topology.replicas.iter().map(|r| r.server_host_port.clone()));
        }
        others.remove(&hp1);
        others.remove(&hp2);
        for member in others {
            let spec = ConnectionSpec {
                host: member.host.clone(),
                port: member.port,
                ..admin_template.clone()
            };
            let member_conn = connector.connect(&spec).await.map_err(|e| ReplError::Connect {
                failures: vec![(member.clone(), e)],
            })?;
            let fanned = propagate::extend_references(member_conn.as_ref(), suffix, &referenced)
                .await
                .map_err(|e| ReplError::UpdateConfig {
                    server: member.clone(),
                    source: e,
                });
            close_quietly(member_conn.as_ref()).await;
            fanned?;
        }

        if *suffix == admin_dn {
            admin_source_id = Some(match plan {
                AdsPlan::UseSecond => out2.domain_id,
                AdsPlan::UseFirst | AdsPlan::CreateFresh => out1.domain_id,
            });
        }
        outcomes.push((suffix.clone(), SuffixOutcome::Changed));
    }

    // The non-authoritative server takes the authoritative store's content
    // through the freshly wired administrative domain.
    if let Some(source_id) = admin_source_id {
        let dest_conn = match plan {
            AdsPlan::UseSecond => conn1,
            AdsPlan::UseFirst | AdsPlan::CreateFresh => conn2,
        };
        initialize_suffix(dest_conn, &admin_dn, source_id, &RetryPolicy::default()).await?;
    }

    info!(
        server1 = %hp1,
        server2 = %hp2,
        enabled = to_enable.len(),
        "replication enabled"
    );
    Ok(OperationReport::from_outcomes(outcomes))
}

async fn read_descriptor(conn: &dyn DirectoryConnection) -> Result<ServerDescriptor, ReplError> {
    read_server_descriptor(conn, None)
        .await
        .map_err(|e| ReplError::ReadConfig {
            server: conn.host_port(),
            source: e,
        })
}

async fn read_registry(
    conn: &dyn DirectoryConnection,
) -> Result<Vec<ServerRegistration>, ReplError> {
    AdsContext::new(conn)
        .read_server_registry()
        .await
        .map_err(|e| ReplError::ReadAds {
            server: conn.host_port(),
            source: e,
        })
}

async fn ads_state(
    conn: &dyn DirectoryConnection,
    registry_len: usize,
) -> Result<AdsState, ReplError> {
    let has_admin_data = AdsContext::new(conn)
        .has_admin_data()
        .await
        .map_err(|e| ReplError::ReadAds {
            server: conn.host_port(),
            source: e,
        })?;
    Ok(AdsState {
        has_admin_data,
        registry_len,
    })
}

/// Reuse the registry's record for an endpoint when one exists, so repeated
/// enables never duplicate a registration.
fn registration_for(registry: &[ServerRegistration], hp: &HostPort) -> ServerRegistration {
    registry
        .iter()
        .find(|r| r.host_port() == *hp)
        .cloned()
        .unwrap_or_else(|| ServerRegistration::new(&hp.host, hp.port))
}

fn rs_endpoint_of(
    endpoint: &EnableEndpoint,
    desc: &ServerDescriptor,
) -> Result<HostPort, ReplError> {
    if let Some(hp) = desc.replication_host_port() {
        return Ok(hp);
    }
    match endpoint.replication_port {
        Some(port) => Ok(HostPort::new(&desc.host_port.host, port)),
        None => Err(ReplError::MissingReplicationPort {
            server: desc.host_port.clone(),
        }),
    }
}

/// The suffix topologies either endpoint already belongs to.
fn joined_topologies<'a>(
    cache: &'a TopologyCache,
    suffix: &'a Dn,
    hp1: &'a HostPort,
    hp2: &'a HostPort,
) -> impl Iterator<Item = &'a dirrepl_topology::SuffixDescriptor> {
    cache
        .suffixes()
        .iter()
        .filter(move |t| t.dn == *suffix)
        .filter(move |t| t.replica_on(hp1).is_some() || t.replica_on(hp2).is_some())
}

/// Route one suffix into the enable set, the unchanged outcomes or the
/// skipped outcomes. Ineligible suffixes are diagnostics, not fatal.
fn sort_eligibility(
    suffix: &Dn,
    desc1: &ServerDescriptor,
    desc2: &ServerDescriptor,
    to_enable: &mut Vec<Dn>,
    outcomes: &mut Vec<(Dn, SuffixOutcome)>,
) -> Result<(), ReplError> {
    match classify_enable(suffix, desc1, desc2) {
        Ok(EnableEligibility::ToEnable) => to_enable.push(suffix.clone()),
        Ok(EnableEligibility::AlreadyReplicated) => {
            debug!(suffix = %suffix, "already replicated between both servers");
            outcomes.push((suffix.clone(), SuffixOutcome::Unchanged));
        }
        Err(e @ ReplError::SuffixNotEligible { .. }) => {
            warn!(suffix = %suffix, reason = %e, "dropping ineligible suffix from the request");
            outcomes.push((suffix.clone(), SuffixOutcome::Skipped(e.to_string())));
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

fn enable_err(suffix: &Dn, server: &HostPort, source: dirrepl_connect::DirectoryError) -> ReplError {
    ReplError::EnableSuffix {
        suffix: suffix.clone(),
        server: server.clone(),
        source,
    }
}
