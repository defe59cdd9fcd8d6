//! Disabling replication of suffixes on one server, with the optional
//! removal of its replication server.

use std::collections::BTreeSet;

use tracing::{info, warn};

use dirrepl_ads::{AdsContext, ADMIN_DATA_DN};
use dirrepl_connect::{
    close_quietly, ConnectionSpec, Connector, DirectoryConnection, DirectoryError, Dn, HostPort,
};
use dirrepl_topology::{read_server_descriptor, TopologyCache};

use crate::classify::{classify_disable, DisableEligibility};
use crate::error::{ReplError, ReturnCode};
use crate::params::DisableReplicationParams;
use crate::propagate;
use crate::report::{OperationReport, SuffixOutcome};
use crate::session::connect_one;

/// Disable replication on the server named in `params`.
pub async fn disable_replication(
    connector: &dyn Connector,
    params: &DisableReplicationParams,
) -> Result<OperationReport, ReplError> {
    let conn = connect_one(connector, &params.server).await?;
    let result = run(connector, params, conn.as_ref()).await;
    close_quietly(conn.as_ref()).await;
    result
}

async fn run(
    connector: &dyn Connector,
    params: &DisableReplicationParams,
    conn: &dyn DirectoryConnection,
) -> Result<OperationReport, ReplError> {
    let hp = conn.host_port();
    let admin_dn = Dn::new(ADMIN_DATA_DN);

    // Taking the administrative suffix (or the whole replication server)
    // away detaches the server from its administration domain; that needs
    // an explicit go-ahead.
    let touches_admin =
        params.base_dns.contains(&admin_dn) || params.disable_replication_server;
    if touches_admin && !params.confirmed_admin_suffix {
        return Err(ReplError::UserCancelled);
    }

    let desc = read_server_descriptor(conn, None)
        .await
        .map_err(|e| ReplError::ReadConfig {
            server: hp.clone(),
            source: e,
        })?;

    let mut outcomes = Vec::new();
    let mut to_disable = Vec::new();
    for suffix in &params.base_dns {
        match classify_disable(suffix, &desc)? {
            DisableEligibility::NotReplicated => {
                outcomes.push((suffix.clone(), SuffixOutcome::Unchanged));
            }
            DisableEligibility::ToDisable => to_disable.push(suffix.clone()),
        }
    }
    if to_disable.is_empty() && !params.disable_replication_server {
        info!(server = %hp, "nothing replicated to disable");
        return Ok(OperationReport::from_outcomes(outcomes));
    }

    // Read the topology before tearing anything down; afterwards the local
    // registry may no longer be trustworthy.
    let cache = TopologyCache::reload(connector, conn, &params.server)
        .await
        .map_err(|e| ReplError::ReadAds {
            server: hp.clone(),
            source: e,
        })?;

    for suffix in &to_disable {
        propagate::remove_domain(conn, suffix)
            .await
            .map_err(|e| ReplError::DisableSuffix {
                suffix: suffix.clone(),
                server: hp.clone(),
                source: e,
            })?;
        outcomes.push((suffix.clone(), SuffixOutcome::Changed));
    }

    // Detaching from the administration domain: drop this server's record
    // from the local registry before the domain goes away.
    if to_disable.contains(&admin_dn) {
        let ads = AdsContext::new(conn);
        let registry = ads
            .read_server_registry()
            .await
            .map_err(|e| ReplError::ReadAds {
                server: hp.clone(),
                source: e,
            })?;
        if let Some(own) = registry.iter().find(|r| r.host_port() == hp) {
            ads.unregister_server(&own.id)
                .await
                .map_err(|e| ReplError::UpdateAds {
                    server: hp.clone(),
                    source: e,
                })?;
        }
    }

    let mut rs_removed = false;
    if let Some(token) = desc.replication_host_port() {
        if params.disable_replication_server {
            propagate::remove_replication_server(conn)
                .await
                .map_err(|e| ReplError::ConfigureReplicationServer {
                    server: hp.clone(),
                    source: e,
                })?;
        }

        // Every other known server loses its references to this server's
        // replication server: all of them when the replication server itself
        // goes away, otherwise only in the domains of the suffixes just
        // disabled. The targets form an unordered set.
        if params.disable_replication_server || !to_disable.is_empty() {
            let others: BTreeSet<HostPort> = cache
                .servers()
                .iter()
                .map(|s| s.host_port.clone())
                .filter(|other| *other != hp)
                .collect();
            for member in others {
                if cache
                    .server(&member)
                    .is_some_and(|s| s.last_error.is_some())
                {
                    warn!(server = %member, "unreachable member keeps a stale replication server reference");
                    continue;
                }
                let spec = ConnectionSpec {
                    host: member.host.clone(),
                    port: member.port,
                    ..params.server.clone()
                };
                let member_conn =
                    connector.connect(&spec).await.map_err(|e| ReplError::Connect {
                        failures: vec![(member.clone(), e)],
                    })?;
                let stripped = async {
                    if params.disable_replication_server {
                        propagate::remove_rs_references(member_conn.as_ref(), &token).await?;
                    } else {
                        for suffix in &to_disable {
                            propagate::remove_rs_reference_for_suffix(
                                member_conn.as_ref(),
                                suffix,
                                &token,
                            )
                            .await?;
                        }
                    }
                    Ok::<(), DirectoryError>(())
                }
                .await
                .map_err(|e| ReplError::UpdateConfig {
                    server: member.clone(),
                    source: e,
                });
                close_quietly(member_conn.as_ref()).await;
                stripped?;
            }
        }

        if params.disable_replication_server {
            info!(server = %hp, token = %token, "replication server disabled");
            rs_removed = true;
        }
    }

    let mut report = OperationReport::from_outcomes(outcomes);
    if rs_removed {
        report.code = ReturnCode::Successful;
    }
    Ok(report)
}
