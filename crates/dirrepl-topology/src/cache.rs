//! Topology discovery: read the server registry from one seed connection,
//! then contact every registered server and assemble the global picture.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use dirrepl_ads::{AdsContext, AdsError};
use dirrepl_connect::{
    close_quietly, ConnectionSpec, Connector, DirectoryConnection, DirectoryError, Dn, HostPort,
};

use crate::descriptor::ServerDescriptor;
use crate::snapshot::read_server_descriptor;
use crate::suffix::{group_suffixes, SuffixDescriptor};

/// Why one registered server could not be fully read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheErrorKind {
    /// The server rejected the administrator's credentials.
    NotGlobalAdministrator,
    /// The server presented a certificate the caller does not trust.
    CertificateNotTrusted,
    /// The server could not be contacted at all.
    Connecting,
    /// Connected, but reading its configuration failed.
    Reading,
}

/// A per-server discovery failure. Discovery keeps going past these; the
/// unreachable member stays in the cache as a registration-only descriptor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{server}: {detail}")]
pub struct TopologyCacheError {
    /// Failure class.
    pub kind: CacheErrorKind,
    /// The server that failed.
    pub server: HostPort,
    /// Human-readable detail.
    pub detail: String,
}

/// The assembled view of one administration domain.
#[derive(Debug, Clone)]
pub struct TopologyCache {
    servers: Vec<ServerDescriptor>,
    suffixes: Vec<SuffixDescriptor>,
    errors: Vec<TopologyCacheError>,
}

impl TopologyCache {
    /// Discover the topology reachable from `seed`.
    ///
    /// `template` carries the global administrator identity and the TLS and
    /// timeout settings to reuse for every member; its host and port are
    /// replaced per server. Every connection opened here is closed before
    /// returning, whatever the per-server outcome.
    pub async fn reload(
        connector: &dyn Connector,
        seed: &dyn DirectoryConnection,
        template: &ConnectionSpec,
    ) -> Result<TopologyCache, AdsError> {
        let registry = AdsContext::new(seed).read_server_registry().await?;
        debug!(members = registry.len(), "reloading topology");

        let mut servers = Vec::new();
        let mut errors = Vec::new();
        for registration in registry {
            let endpoint = registration.host_port();
            let spec = ConnectionSpec {
                host: endpoint.host.clone(),
                port: endpoint.port,
                ..template.clone()
            };
            let conn = match connector.connect(&spec).await {
                Ok(conn) => conn,
                Err(e) => {
                    let kind = classify_connect_error(&e);
                    warn!(server = %endpoint, error = %e, "cannot contact registered server");
                    errors.push(TopologyCacheError {
                        kind,
                        server: endpoint,
                        detail: e.to_string(),
                    });
                    servers.push(ServerDescriptor::unreachable(registration, e.to_string()));
                    continue;
                }
            };
            match read_server_descriptor(conn.as_ref(), Some(registration.clone())).await {
                Ok(desc) => servers.push(desc),
                Err(e) => {
                    warn!(server = %endpoint, error = %e, "cannot read server configuration");
                    errors.push(TopologyCacheError {
                        kind: CacheErrorKind::Reading,
                        server: endpoint,
                        detail: e.to_string(),
                    });
                    servers.push(ServerDescriptor::unreachable(registration, e.to_string()));
                }
            }
            close_quietly(conn.as_ref()).await;
        }

        let suffixes = group_suffixes(&servers);
        Ok(TopologyCache {
            servers,
            suffixes,
            errors,
        })
    }

    /// Every registered server, reachable or not.
    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    /// Every suffix topology found.
    pub fn suffixes(&self) -> &[SuffixDescriptor] {
        &self.suffixes
    }

    /// Per-server discovery failures from the last reload.
    pub fn errors(&self) -> &[TopologyCacheError] {
        &self.errors
    }

    /// The descriptor read from the given administration endpoint, if any.
    pub fn server(&self, host_port: &HostPort) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| s.host_port == *host_port)
    }

    /// The topology of `dn` whose replication-server set intersects
    /// `known_rs`. With several topologies of the same suffix in the cache,
    /// this picks the one the caller is already tied to.
    pub fn suffix_sharing_rs(
        &self,
        dn: &Dn,
        known_rs: &BTreeSet<HostPort>,
    ) -> Option<&SuffixDescriptor> {
        self.suffixes
            .iter()
            .filter(|s| s.dn == *dn)
            .find(|s| s.shares_replication_server(known_rs))
    }

    /// Replication-server ids in use anywhere in the topology.
    pub fn replication_server_ids(&self) -> BTreeSet<u32> {
        self.servers
            .iter()
            .filter_map(|s| s.replication_server.as_ref().map(|rs| rs.server_id))
            .collect()
    }
}

fn classify_connect_error(e: &DirectoryError) -> CacheErrorKind {
    match e {
        DirectoryError::AuthenticationFailed { .. } => CacheErrorKind::NotGlobalAdministrator,
        DirectoryError::CertificateNotTrusted { .. } => CacheErrorKind::CertificateNotTrusted,
        _ => CacheErrorKind::Connecting,
    }
}
