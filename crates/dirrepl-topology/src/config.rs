//! The replication control schema: configuration entry locations and their
//! typed encodings.
//!
//! Both discovery (snapshot reads) and the configuration propagator speak
//! this schema; keeping it in one place means a write always produces what a
//! later read expects.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dirrepl_connect::{DirectoryConnection, DirectoryError, Dn, Entry, HostPort};

/// The configuration root.
pub const CONFIG_DN: &str = "cn=config";
/// Container of backend definitions (one per hosted suffix set).
pub const BACKENDS_DN: &str = "cn=backends,cn=config";
/// The multimaster synchronization provider entry.
pub const SYNC_PROVIDER_DN: &str =
    "cn=multimaster synchronization,cn=synchronization providers,cn=config";
/// The replication-server configuration entry under the provider.
pub const REPLICATION_SERVER_DN: &str =
    "cn=replication server,cn=multimaster synchronization,cn=synchronization providers,cn=config";
/// The crypto manager entry (holds the secure-replication switch).
pub const CRYPTO_MANAGER_DN: &str = "cn=crypto manager,cn=config";

/// Suffix DN(s) served by a backend, and the base DN of a domain.
pub const ATTR_BASE_DN: &str = "ds-cfg-base-dn";
/// Provider/entry enablement flag.
pub const ATTR_ENABLED: &str = "ds-cfg-enabled";
/// Replication-server id (server-wide unique).
pub const ATTR_RS_ID: &str = "ds-cfg-replication-server-id";
/// Replication listen port.
pub const ATTR_RS_PORT: &str = "ds-cfg-replication-port";
/// Referenced replication servers (`host:port`, multi-valued).
pub const ATTR_RS_SERVERS: &str = "ds-cfg-replication-server";
/// Domain id (unique per suffix across the topology).
pub const ATTR_DOMAIN_ID: &str = "ds-cfg-server-id";
/// Secure-replication switch on the crypto manager.
pub const ATTR_SSL_ENCRYPTION: &str = "ds-cfg-ssl-encryption";
/// Stable instance id on `cn=config`.
pub const ATTR_INSTANCE_ID: &str = "ds-cfg-instance-id";

/// A server's replication-server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationServerConfig {
    /// Server-wide unique replication-server id.
    pub id: u32,
    /// Replication listen port.
    pub port: u16,
    /// Every replication server this one references (itself included).
    pub servers: BTreeSet<HostPort>,
}

impl ReplicationServerConfig {
    /// Encode as the replication-server configuration entry.
    pub fn to_entry(&self) -> Entry {
        Entry::new(Dn::new(REPLICATION_SERVER_DN))
            .with_attr("cn", "replication server")
            .with_attr(ATTR_RS_ID, &self.id.to_string())
            .with_attr(ATTR_RS_PORT, &self.port.to_string())
            .with_values(ATTR_RS_SERVERS, self.servers.iter().map(HostPort::to_string))
    }

    /// Decode from the replication-server configuration entry.
    pub fn from_entry(entry: &Entry) -> Option<Self> {
        Some(Self {
            id: entry.first(ATTR_RS_ID)?.parse().ok()?,
            port: entry.first(ATTR_RS_PORT)?.parse().ok()?,
            servers: parse_host_ports(entry.values(ATTR_RS_SERVERS)),
        })
    }
}

/// A per-suffix replication domain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// The domain entry's cn (unique among this server's domains).
    pub name: String,
    /// The replicated suffix.
    pub base_dn: Dn,
    /// Domain id, unique for this suffix across the topology.
    pub server_id: u32,
    /// Replication servers the domain points at.
    pub servers: BTreeSet<HostPort>,
}

impl DomainConfig {
    /// The domain entry's DN.
    pub fn dn(&self) -> Dn {
        domain_dn(&self.name)
    }

    /// Encode as a domain configuration entry.
    pub fn to_entry(&self) -> Entry {
        Entry::new(self.dn())
            .with_attr("cn", &self.name)
            .with_attr(ATTR_BASE_DN, self.base_dn.as_str())
            .with_attr(ATTR_DOMAIN_ID, &self.server_id.to_string())
            .with_values(ATTR_RS_SERVERS, self.servers.iter().map(HostPort::to_string))
    }

    /// Decode from a domain configuration entry.
    pub fn from_entry(entry: &Entry) -> Option<Self> {
        Some(Self {
            name: entry.first("cn")?.to_string(),
            base_dn: Dn::new(entry.first(ATTR_BASE_DN)?),
            server_id: entry.first(ATTR_DOMAIN_ID)?.parse().ok()?,
            servers: parse_host_ports(entry.values(ATTR_RS_SERVERS)),
        })
    }
}

/// The DN of a domain entry with the given cn.
pub fn domain_dn(name: &str) -> Dn {
    Dn::new(&format!("cn={name},{SYNC_PROVIDER_DN}"))
}

fn parse_host_ports(values: Vec<&str>) -> BTreeSet<HostPort> {
    values.iter().filter_map(|v| v.parse().ok()).collect()
}

/// Read the replication-server configuration, `None` if the server is not a
/// replication server.
pub async fn read_replication_server(
    conn: &dyn DirectoryConnection,
) -> Result<Option<ReplicationServerConfig>, DirectoryError> {
    let entry = conn.read(&Dn::new(REPLICATION_SERVER_DN)).await?;
    Ok(entry.as_ref().and_then(ReplicationServerConfig::from_entry))
}

/// Read every replication domain configured on the server.
pub async fn read_domains(
    conn: &dyn DirectoryConnection,
) -> Result<Vec<DomainConfig>, DirectoryError> {
    let provider = Dn::new(SYNC_PROVIDER_DN);
    let rs_dn = Dn::new(REPLICATION_SERVER_DN);
    if conn.read(&provider).await?.is_none() {
        return Ok(Vec::new());
    }
    let mut domains = Vec::new();
    for entry in conn.search_subtree(&provider).await? {
        if entry.dn.is_child_of(&provider) && entry.dn != rs_dn {
            if let Some(domain) = DomainConfig::from_entry(&entry) {
                domains.push(domain);
            }
        }
    }
    Ok(domains)
}

/// Read the base DNs of every backend the server hosts.
pub async fn read_backend_base_dns(
    conn: &dyn DirectoryConnection,
) -> Result<Vec<Dn>, DirectoryError> {
    let base = Dn::new(BACKENDS_DN);
    if conn.read(&base).await?.is_none() {
        return Ok(Vec::new());
    }
    let mut dns = Vec::new();
    for entry in conn.search_subtree(&base).await? {
        if entry.dn.is_child_of(&base) {
            for v in entry.values(ATTR_BASE_DN) {
                dns.push(Dn::new(v));
            }
        }
    }
    Ok(dns)
}
