//! Read/write access to one server's administrative store.

use tracing::debug;

use dirrepl_connect::{AttrChange, DirectoryConnection, Dn, Entry};

use crate::error::AdsError;
use crate::registration::ServerRegistration;

/// Root of the administrative suffix.
pub const ADMIN_DATA_DN: &str = "cn=admin data";
/// The schema suffix (replicated when the caller asks for it).
pub const SCHEMA_DN: &str = "cn=schema";

const ADMINISTRATORS_DN: &str = "cn=administrators,cn=admin data";
const SERVERS_DN: &str = "cn=servers,cn=admin data";

/// The DN a global administrator binds as.
pub fn administrator_dn(uid: &str) -> Dn {
    Dn::new(&format!("cn={uid},{ADMINISTRATORS_DN}"))
}

/// A view of the administrative store through one open connection.
///
/// Holds the connection by reference; the caller owns the connection's
/// lifecycle.
pub struct AdsContext<'a> {
    conn: &'a dyn DirectoryConnection,
}

impl<'a> AdsContext<'a> {
    /// Wrap a connection.
    pub fn new(conn: &'a dyn DirectoryConnection) -> Self {
        Self { conn }
    }

    /// Whether this server carries administrative data at all.
    pub async fn has_admin_data(&self) -> Result<bool, AdsError> {
        let root = self.conn.read(&Dn::new(ADMIN_DATA_DN)).await?;
        let servers = self.conn.read(&Dn::new(SERVERS_DN)).await?;
        Ok(root.is_some() && servers.is_some())
    }

    /// Create the administrative suffix and its container entries.
    pub async fn create_admin_data(&self) -> Result<(), AdsError> {
        debug!(server = %self.conn.host_port(), "creating administrative store");
        for dn in [ADMIN_DATA_DN, ADMINISTRATORS_DN, SERVERS_DN] {
            let dn = Dn::new(dn);
            if self.conn.read(&dn).await?.is_none() {
                let rdn_value = dn.rdn().split_once('=').map(|(_, v)| v).unwrap_or("");
                self.conn
                    .add(Entry::new(dn.clone()).with_attr("cn", rdn_value))
                    .await?;
            }
        }
        Ok(())
    }

    /// Whether at least one global administrator account exists.
    pub async fn has_administrator(&self) -> Result<bool, AdsError> {
        Ok(!self.read_administrator_registry().await?.is_empty())
    }

    /// Create a global administrator account.
    pub async fn create_administrator(&self, uid: &str, password: &str) -> Result<(), AdsError> {
        debug!(server = %self.conn.host_port(), uid, "creating global administrator");
        self.conn
            .add(
                Entry::new(administrator_dn(uid))
                    .with_attr("objectclass", "ds-cfg-administrator")
                    .with_attr("cn", uid)
                    .with_attr("userpassword", password),
            )
            .await?;
        Ok(())
    }

    /// The uids of all registered global administrators.
    pub async fn read_administrator_registry(&self) -> Result<Vec<String>, AdsError> {
        let base = Dn::new(ADMINISTRATORS_DN);
        if self.conn.read(&base).await?.is_none() {
            return Ok(Vec::new());
        }
        let mut uids: Vec<String> = self
            .conn
            .search_subtree(&base)
            .await?
            .iter()
            .filter(|e| e.dn.is_child_of(&base))
            .filter_map(|e| e.first("cn").map(str::to_string))
            .collect();
        uids.sort();
        Ok(uids)
    }

    /// All server registrations in this store, sorted by id.
    ///
    /// A server with no administrative data at all reads as an empty
    /// registry; a store whose root exists without the servers container is
    /// half-created and reads as [`AdsError::Incomplete`].
    pub async fn read_server_registry(&self) -> Result<Vec<ServerRegistration>, AdsError> {
        let base = Dn::new(SERVERS_DN);
        if self.conn.read(&base).await?.is_none() {
            if self.conn.read(&Dn::new(ADMIN_DATA_DN)).await?.is_some() {
                return Err(AdsError::Incomplete {
                    dn: SERVERS_DN.to_string(),
                });
            }
            return Ok(Vec::new());
        }
        let mut registry = Vec::new();
        for entry in self.conn.search_subtree(&base).await? {
            if entry.dn.is_child_of(&base) {
                registry.push(ServerRegistration::from_entry(&entry)?);
            }
        }
        registry.sort();
        Ok(registry)
    }

    /// Register a server, updating the existing record when the id is
    /// already present.
    pub async fn register_or_update_server(
        &self,
        reg: &ServerRegistration,
    ) -> Result<(), AdsError> {
        let base = Dn::new(SERVERS_DN);
        let entry = reg.to_entry(&base);
        match self.conn.add(entry).await {
            Ok(()) => Ok(()),
            Err(dirrepl_connect::DirectoryError::AlreadyExists { dn }) => {
                debug!(server = %self.conn.host_port(), id = %reg.id, "updating existing registration");
                self.conn
                    .modify(
                        &dn,
                        vec![
                            AttrChange::replace("hostname", [reg.host.clone()]),
                            AttrChange::replace("ldapport", [reg.port.to_string()]),
                        ],
                    )
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a server's registration if present.
    pub async fn unregister_server(&self, id: &str) -> Result<(), AdsError> {
        let dn = Dn::new(&format!("cn={id},{SERVERS_DN}"));
        match self.conn.delete(&dn).await {
            Ok(()) => Ok(()),
            Err(dirrepl_connect::DirectoryError::NoSuchEntry { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
