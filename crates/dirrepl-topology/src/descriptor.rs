//! Per-server descriptors built by reading a live server's configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dirrepl_ads::ServerRegistration;
use dirrepl_connect::{Dn, HostPort};

/// The replication-server role of a server, if it has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationServerInfo {
    /// Server-wide unique replication-server id.
    pub server_id: u32,
    /// Replication listen port.
    pub port: u16,
    /// The `host:replication-port` endpoint peers use to reach it.
    pub host_port: HostPort,
}

/// A suffix hosted by one server, with its replication wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    /// The suffix base DN.
    pub suffix_dn: Dn,
    /// Replication servers the suffix's domain references. Empty when the
    /// suffix is not replicated.
    pub replication_servers: BTreeSet<HostPort>,
    /// Whether a replication domain exists for the suffix.
    pub replicated: bool,
    /// The domain id, when replicated.
    pub domain_id: Option<u32>,
}

impl ReplicaDescriptor {
    /// A plain, unreplicated suffix.
    pub fn unreplicated(suffix_dn: Dn) -> Self {
        Self {
            suffix_dn,
            replication_servers: BTreeSet::new(),
            replicated: false,
            domain_id: None,
        }
    }
}

/// One directory server as seen by a topology read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Stable instance id, falling back to the administration endpoint.
    pub id: String,
    /// The administration (LDAP) endpoint the descriptor was read from.
    pub host_port: HostPort,
    /// The server's replication-server role, if configured.
    pub replication_server: Option<ReplicationServerInfo>,
    /// Every suffix the server hosts.
    pub replicas: Vec<ReplicaDescriptor>,
    /// The server's registration entry, when it is enrolled.
    pub registration: Option<ServerRegistration>,
    /// Why the descriptor is incomplete, for servers that could not be read.
    pub last_error: Option<String>,
}

impl ServerDescriptor {
    /// A placeholder for a registered server that could not be contacted.
    pub fn unreachable(registration: ServerRegistration, error: String) -> Self {
        let host_port = registration.host_port();
        Self {
            id: host_port.to_string(),
            host_port,
            replication_server: None,
            replicas: Vec::new(),
            registration: Some(registration),
            last_error: Some(error),
        }
    }

    /// Whether the server runs a replication server.
    pub fn is_replication_server(&self) -> bool {
        self.replication_server.is_some()
    }

    /// The replication endpoint peers reference, if any.
    pub fn replication_host_port(&self) -> Option<HostPort> {
        self.replication_server.as_ref().map(|rs| rs.host_port.clone())
    }

    /// The replica for a suffix, if the server hosts it.
    pub fn replica(&self, suffix_dn: &Dn) -> Option<&ReplicaDescriptor> {
        self.replicas.iter().find(|r| r.suffix_dn == *suffix_dn)
    }
}
