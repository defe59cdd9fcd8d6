//! Connection parameters and the connection/connector traits.
//!
//! The traits mirror the seam style of a transport layer: the control plane
//! only ever holds `Box<dyn DirectoryConnection>` handed out by a
//! [`Connector`], so the wire client can be swapped for the in-memory
//! implementation in tests.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dn::Dn;
use crate::entry::{AttrChange, Entry};
use crate::error::DirectoryError;

/// A `host:port` address. The host is lowercased on construction so that
/// replication-server tokens compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct HostPort {
    /// Host name or address, lowercased.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl HostPort {
    /// Build an address from host and port.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_lowercase(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("not a host:port: {s}"))?;
        let port: u16 = port.parse().map_err(|_| format!("bad port in {s}"))?;
        Ok(HostPort::new(host, port))
    }
}

impl From<String> for HostPort {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_else(|_| HostPort::new(&s, 0))
    }
}

impl From<HostPort> for String {
    fn from(hp: HostPort) -> Self {
        hp.to_string()
    }
}

/// Transport security for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TlsMode {
    /// Plain connection.
    #[default]
    None,
    /// Upgrade a plain connection with StartTLS.
    StartTls,
    /// TLS from the first byte.
    Ldaps,
}

/// How to treat the certificate a server presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrustPolicy {
    /// Accept any certificate.
    #[default]
    TrustAll,
    /// Accept only certificates in the caller-provided store.
    Strict,
}

/// Everything needed to open one management connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Server host.
    pub host: String,
    /// Server administration port.
    pub port: u16,
    /// Transport security.
    pub tls: TlsMode,
    /// Identity to bind as.
    pub bind_dn: Dn,
    /// Bind password.
    pub password: String,
    /// Certificate trust policy.
    pub trust: TrustPolicy,
    /// Per-operation timeout; bounds total wall-clock work when cascading
    /// to third-party servers.
    pub timeout: Duration,
}

impl ConnectionSpec {
    /// The address this spec connects to.
    pub fn host_port(&self) -> HostPort {
        HostPort::new(&self.host, self.port)
    }

    /// Same server, different bind identity.
    pub fn rebind(&self, bind_dn: Dn, password: &str) -> Self {
        Self {
            bind_dn,
            password: password.to_string(),
            ..self.clone()
        }
    }
}

/// An open management connection to one directory server.
#[async_trait]
pub trait DirectoryConnection: Send + Sync + std::fmt::Debug {
    /// The address of the connected server.
    fn host_port(&self) -> HostPort;

    /// Read one entry, `None` if it does not exist.
    async fn read(&self, dn: &Dn) -> Result<Option<Entry>, DirectoryError>;

    /// Return the base entry (if present) and everything below it.
    async fn search_subtree(&self, base: &Dn) -> Result<Vec<Entry>, DirectoryError>;

    /// Add an entry.
    async fn add(&self, entry: Entry) -> Result<(), DirectoryError>;

    /// Modify an existing entry.
    async fn modify(&self, dn: &Dn, changes: Vec<AttrChange>) -> Result<(), DirectoryError>;

    /// Delete one entry (not its subtree).
    async fn delete(&self, dn: &Dn) -> Result<(), DirectoryError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), DirectoryError>;
}

/// Opens management connections. Implemented by the wire client outside this
/// workspace and by the simulated fleet in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection per the spec.
    async fn connect(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError>;
}

/// Close a connection, logging and swallowing any close failure. The primary
/// outcome of an operation must never be superseded by a failure to release
/// a connection.
pub async fn close_quietly(conn: &dyn DirectoryConnection) {
    if let Err(e) = conn.close().await {
        warn!(server = %conn.host_port(), error = %e, "error closing connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_display_and_parse() {
        let hp: HostPort = "Server1.Example.COM:8989".parse().unwrap();
        assert_eq!(hp.to_string(), "server1.example.com:8989");
        assert_eq!(hp, HostPort::new("SERVER1.example.com", 8989));
    }

    #[test]
    fn test_host_port_parse_rejects_garbage() {
        assert!("no-port".parse::<HostPort>().is_err());
        assert!("host:notanumber".parse::<HostPort>().is_err());
    }

    #[test]
    fn test_rebind_keeps_endpoint() {
        let spec = ConnectionSpec {
            host: "s1".into(),
            port: 1389,
            tls: TlsMode::None,
            bind_dn: Dn::new("cn=directory manager"),
            password: "secret".into(),
            trust: TrustPolicy::TrustAll,
            timeout: Duration::from_secs(30),
        };
        let rebound = spec.rebind(Dn::new("cn=admin,cn=administrators,cn=admin data"), "pw");
        assert_eq!(rebound.host_port(), spec.host_port());
        assert_eq!(rebound.password, "pw");
    }
}
