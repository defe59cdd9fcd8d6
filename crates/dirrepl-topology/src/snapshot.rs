//! Building a [`ServerDescriptor`] from one live connection.

use dirrepl_ads::ServerRegistration;
use dirrepl_connect::{DirectoryConnection, DirectoryError, Dn};

use crate::config::{self, ATTR_INSTANCE_ID, CONFIG_DN};
use crate::descriptor::{ReplicaDescriptor, ReplicationServerInfo, ServerDescriptor};

/// Read a full descriptor over an already-bound connection.
///
/// The registration, when the caller has one from the administrative suffix,
/// is attached untouched; discovery never re-reads it per server.
pub async fn read_server_descriptor(
    conn: &dyn DirectoryConnection,
    registration: Option<ServerRegistration>,
) -> Result<ServerDescriptor, DirectoryError> {
    let host_port = conn.host_port();

    let id = match conn.read(&Dn::new(CONFIG_DN)).await? {
        Some(root) => root
            .first(ATTR_INSTANCE_ID)
            .map(str::to_string)
            .unwrap_or_else(|| host_port.to_string()),
        None => host_port.to_string(),
    };

    let replication_server =
        config::read_replication_server(conn)
            .await?
            .map(|rs| ReplicationServerInfo {
                server_id: rs.id,
                port: rs.port,
                host_port: dirrepl_connect::HostPort::new(&host_port.host, rs.port),
            });

    let domains = config::read_domains(conn).await?;
    let mut replicas = Vec::new();
    for suffix_dn in config::read_backend_base_dns(conn).await? {
        let replica = match domains.iter().find(|d| d.base_dn == suffix_dn) {
            Some(domain) => ReplicaDescriptor {
                suffix_dn,
                replication_servers: domain.servers.clone(),
                replicated: true,
                domain_id: Some(domain.server_id),
            },
            None => ReplicaDescriptor::unreplicated(suffix_dn),
        };
        replicas.push(replica);
    }

    Ok(ServerDescriptor {
        id,
        host_port,
        replication_server,
        replicas,
        registration,
        last_error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirrepl_connect::{Entry, HostPort, MemoryDirectory};

    use crate::config::{
        ATTR_BASE_DN, ATTR_DOMAIN_ID, ATTR_RS_ID, ATTR_RS_PORT, ATTR_RS_SERVERS, BACKENDS_DN,
        REPLICATION_SERVER_DN, SYNC_PROVIDER_DN,
    };

    fn seeded_server() -> MemoryDirectory {
        let dir = MemoryDirectory::new("s1.example.com", 1389, "secret");
        dir.seed(Entry::new(Dn::new(CONFIG_DN)).with_attr(ATTR_INSTANCE_ID, "inst-s1"));
        dir.seed(Entry::new(Dn::new(BACKENDS_DN)));
        dir.seed(
            Entry::new(Dn::new(&format!("cn=userRoot,{BACKENDS_DN}")))
                .with_attr(ATTR_BASE_DN, "dc=example,dc=com"),
        );
        dir.seed(
            Entry::new(Dn::new(&format!("cn=adminRoot,{BACKENDS_DN}")))
                .with_attr(ATTR_BASE_DN, "cn=admin data"),
        );
        dir
    }

    async fn descriptor_of(dir: &MemoryDirectory) -> ServerDescriptor {
        let conn = dir
            .bind(&Dn::new("cn=Directory Manager"), "secret")
            .unwrap();
        read_server_descriptor(&conn, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_descriptor_of_unconfigured_server() {
        let dir = seeded_server();
        let desc = descriptor_of(&dir).await;
        assert_eq!(desc.id, "inst-s1");
        assert_eq!(desc.host_port, HostPort::new("s1.example.com", 1389));
        assert!(desc.replication_server.is_none());
        assert_eq!(desc.replicas.len(), 2);
        assert!(desc.replicas.iter().all(|r| !r.replicated));
    }

    #[tokio::test]
    async fn test_descriptor_reads_replication_config() {
        let dir = seeded_server();
        dir.seed(Entry::new(Dn::new(SYNC_PROVIDER_DN)).with_attr("ds-cfg-enabled", "true"));
        dir.seed(
            Entry::new(Dn::new(REPLICATION_SERVER_DN))
                .with_attr(ATTR_RS_ID, "11")
                .with_attr(ATTR_RS_PORT, "8989")
                .with_values(ATTR_RS_SERVERS, ["s1.example.com:8989", "s2.example.com:8989"]),
        );
        dir.seed(
            Entry::new(Dn::new(&format!("cn=dc=example dom,{SYNC_PROVIDER_DN}")))
                .with_attr("cn", "dc=example dom")
                .with_attr(ATTR_BASE_DN, "dc=example,dc=com")
                .with_attr(ATTR_DOMAIN_ID, "4")
                .with_values(ATTR_RS_SERVERS, ["s1.example.com:8989"]),
        );

        let desc = descriptor_of(&dir).await;
        let rs = desc.replication_server.as_ref().unwrap();
        assert_eq!(rs.server_id, 11);
        assert_eq!(rs.host_port, HostPort::new("s1.example.com", 8989));

        let replica = desc.replica(&Dn::new("dc=example,dc=com")).unwrap();
        assert!(replica.replicated);
        assert_eq!(replica.domain_id, Some(4));
        assert!(replica
            .replication_servers
            .contains(&HostPort::new("s1.example.com", 8989)));

        let admin = desc.replica(&Dn::new("cn=admin data")).unwrap();
        assert!(!admin.replicated);
    }

    #[tokio::test]
    async fn test_descriptor_id_falls_back_to_endpoint() {
        let dir = MemoryDirectory::new("s3", 1389, "secret");
        dir.seed(Entry::new(Dn::new(CONFIG_DN)));
        let desc = descriptor_of(&dir).await;
        assert_eq!(desc.id, "s3:1389");
    }
}
