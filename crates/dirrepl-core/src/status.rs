//! Reading the replication status of a whole topology through one member.

use serde::{Deserialize, Serialize};

use dirrepl_connect::{close_quietly, Connector, HostPort};
use dirrepl_topology::{ServerDescriptor, SuffixDescriptor, TopologyCache};

use crate::error::ReplError;
use crate::params::StatusParams;
use crate::session::connect_one;

/// The topology as discovered through one server's administrative store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Every registered server, reachable or not.
    pub servers: Vec<ServerDescriptor>,
    /// Every suffix topology.
    pub suffixes: Vec<SuffixDescriptor>,
    /// Registered servers that could not be fully read, with the reason.
    pub unreachable: Vec<(HostPort, String)>,
}

impl StatusReport {
    /// The topologies of one suffix (several when islands exist).
    pub fn topologies_of(&self, dn: &dirrepl_connect::Dn) -> Vec<&SuffixDescriptor> {
        self.suffixes.iter().filter(|s| s.dn == *dn).collect()
    }

    /// The suffix topologies without the administrative and schema suffixes,
    /// which replicate as plumbing rather than user data.
    pub fn user_suffixes(&self) -> Vec<&SuffixDescriptor> {
        let admin = dirrepl_connect::Dn::new(dirrepl_ads::ADMIN_DATA_DN);
        let schema = dirrepl_connect::Dn::new(dirrepl_ads::SCHEMA_DN);
        self.suffixes
            .iter()
            .filter(|s| s.dn != admin && s.dn != schema)
            .collect()
    }
}

/// Discover and report the topology visible from the server in `params`.
pub async fn replication_status(
    connector: &dyn Connector,
    params: &StatusParams,
) -> Result<StatusReport, ReplError> {
    let conn = connect_one(connector, &params.server).await?;
    let cache = TopologyCache::reload(connector, conn.as_ref(), &params.server).await;
    close_quietly(conn.as_ref()).await;
    let cache = cache.map_err(|e| ReplError::ReadAds {
        server: params.server.host_port(),
        source: e,
    })?;
    Ok(StatusReport {
        servers: cache.servers().to_vec(),
        suffixes: cache.suffixes().to_vec(),
        unreachable: cache
            .errors()
            .iter()
            .map(|e| (e.server.clone(), e.detail.clone()))
            .collect(),
    })
}
