//! Server registry records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dirrepl_connect::{Dn, Entry, HostPort};

use crate::error::AdsError;

/// One server's record in the fleet registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerRegistration {
    /// Stable unique server id (survives host or port changes).
    pub id: String,
    /// Host name the server registered under.
    pub host: String,
    /// Administration (LDAP) port.
    pub port: u16,
}

impl ServerRegistration {
    /// Create a registration with a freshly generated unique id.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            host: host.to_string(),
            port,
        }
    }

    /// The server's administration address.
    pub fn host_port(&self) -> HostPort {
        HostPort::new(&self.host, self.port)
    }

    /// The registry entry DN for this record under `base`.
    pub fn dn(&self, base: &Dn) -> Dn {
        Dn::new(&format!("cn={},{}", self.id, base))
    }

    /// Encode as a registry entry under `base`.
    pub fn to_entry(&self, base: &Dn) -> Entry {
        Entry::new(self.dn(base))
            .with_attr("objectclass", "ds-cfg-server-registration")
            .with_attr("cn", &self.id)
            .with_attr("hostname", &self.host)
            .with_attr("ldapport", &self.port.to_string())
    }

    /// Decode from a registry entry.
    pub fn from_entry(entry: &Entry) -> Result<Self, AdsError> {
        let field = |name: &str| {
            entry.first(name).map(str::to_string).ok_or_else(|| {
                AdsError::MalformedRegistration {
                    dn: entry.dn.to_string(),
                    msg: format!("missing {name}"),
                }
            })
        };
        let port = field("ldapport")?;
        Ok(Self {
            id: field("cn")?,
            host: field("hostname")?,
            port: port
                .parse()
                .map_err(|_| AdsError::MalformedRegistration {
                    dn: entry.dn.to_string(),
                    msg: format!("bad ldapport: {port}"),
                })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let base = Dn::new("cn=servers,cn=admin data");
        let reg = ServerRegistration {
            id: "srv-1".into(),
            host: "s1.example.com".into(),
            port: 1389,
        };
        let entry = reg.to_entry(&base);
        assert_eq!(entry.dn, Dn::new("cn=srv-1,cn=servers,cn=admin data"));
        assert_eq!(ServerRegistration::from_entry(&entry).unwrap(), reg);
    }

    #[test]
    fn test_missing_field_rejected() {
        let entry = Entry::new(Dn::new("cn=broken,cn=servers,cn=admin data"))
            .with_attr("cn", "broken")
            .with_attr("hostname", "h");
        assert!(matches!(
            ServerRegistration::from_entry(&entry),
            Err(AdsError::MalformedRegistration { .. })
        ));
    }

    #[test]
    fn test_new_generates_distinct_ids() {
        let a = ServerRegistration::new("h", 1389);
        let b = ServerRegistration::new("h", 1389);
        assert_ne!(a.id, b.id);
        assert_eq!(a.host_port(), HostPort::new("h", 1389));
    }
}
