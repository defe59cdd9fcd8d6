//! Parameters accepted by the control-plane operations.

use dirrepl_connect::{ConnectionSpec, Dn};

/// The global administrator identity used across the topology.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    /// Administrator uid (`cn={uid},cn=administrators,cn=admin data`).
    pub uid: String,
    /// Administrator password.
    pub password: String,
}

impl AdminCredentials {
    /// The administrator's bind DN.
    pub fn bind_dn(&self) -> Dn {
        dirrepl_ads::administrator_dn(&self.uid)
    }
}

/// How one endpoint of an enable operation should host replication changes.
#[derive(Debug, Clone)]
pub struct EnableEndpoint {
    /// How to reach and authenticate against the server.
    pub spec: ConnectionSpec,
    /// Replication port to configure when the server is not yet a
    /// replication server. Required in that case; ignored otherwise.
    pub replication_port: Option<u16>,
    /// Whether replication traffic on this server must be encrypted.
    pub secure_replication: bool,
}

/// Parameters of the enable operation.
#[derive(Debug, Clone)]
pub struct EnableReplicationParams {
    /// First server.
    pub server1: EnableEndpoint,
    /// Second server.
    pub server2: EnableEndpoint,
    /// Suffixes to replicate between the two servers.
    pub base_dns: Vec<Dn>,
    /// Global administrator to create or reuse.
    pub admin: AdminCredentials,
    /// Also replicate the schema suffix.
    pub replicate_schema: bool,
}

/// Parameters of the disable operation.
#[derive(Debug, Clone)]
pub struct DisableReplicationParams {
    /// The server to disable replication on.
    pub server: ConnectionSpec,
    /// Suffixes to stop replicating.
    pub base_dns: Vec<Dn>,
    /// Also remove the server's replication-server configuration, detaching
    /// every topology that references it.
    pub disable_replication_server: bool,
    /// Disabling the administrative suffix unregisters the server from its
    /// administration domain; the caller must confirm that explicitly.
    pub confirmed_admin_suffix: bool,
}

/// Parameters of the initialize operation.
#[derive(Debug, Clone)]
pub struct InitializeReplicationParams {
    /// Server whose data is copied.
    pub source: ConnectionSpec,
    /// Server whose data is overwritten.
    pub destination: ConnectionSpec,
    /// Suffixes to initialize.
    pub base_dns: Vec<Dn>,
}

/// Parameters of the status operation.
#[derive(Debug, Clone)]
pub struct StatusParams {
    /// Any member of the topology to read status through.
    pub server: ConnectionSpec,
}
