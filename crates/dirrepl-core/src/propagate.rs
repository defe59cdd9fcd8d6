//! Writing replication configuration to servers.
//!
//! Every function here is idempotent against the state it would produce:
//! reference sets are unioned, existing entries are left alone when nothing
//! would change, and each function reports whether it wrote. Callers sum
//! those reports to tell a real change from a no-op.

use std::collections::BTreeSet;

use tracing::{debug, info};

use dirrepl_connect::{AttrChange, DirectoryConnection, DirectoryError, Dn, Entry, HostPort};
use dirrepl_topology::config::{
    self, domain_dn, DomainConfig, ReplicationServerConfig, ATTR_ENABLED, ATTR_RS_SERVERS,
    ATTR_SSL_ENCRYPTION, CRYPTO_MANAGER_DN, REPLICATION_SERVER_DN, SYNC_PROVIDER_DN,
};

/// Make sure the synchronization provider entry exists and is enabled.
pub async fn ensure_sync_provider(conn: &dyn DirectoryConnection) -> Result<bool, DirectoryError> {
    let dn = Dn::new(SYNC_PROVIDER_DN);
    match conn.read(&dn).await? {
        Some(entry) => {
            if entry.has_value_ignore_case(ATTR_ENABLED, "true") {
                Ok(false)
            } else {
                conn.modify(&dn, vec![AttrChange::replace(ATTR_ENABLED, ["true"])])
                    .await?;
                Ok(true)
            }
        }
        None => {
            info!(server = %conn.host_port(), "creating synchronization provider");
            conn.add(
                Entry::new(dn)
                    .with_attr("cn", "multimaster synchronization")
                    .with_attr(ATTR_ENABLED, "true"),
            )
            .await?;
            Ok(true)
        }
    }
}

/// Make sure the server runs a replication server referencing at least
/// `servers`. `new_id` and `port` are only used when the configuration does
/// not exist yet; an existing replication server keeps its id and port.
pub async fn ensure_replication_server(
    conn: &dyn DirectoryConnection,
    new_id: u32,
    port: u16,
    servers: &BTreeSet<HostPort>,
) -> Result<bool, DirectoryError> {
    let mut changed = ensure_sync_provider(conn).await?;
    match config::read_replication_server(conn).await? {
        Some(existing) => {
            let merged: BTreeSet<HostPort> =
                existing.servers.union(servers).cloned().collect();
            if merged != existing.servers {
                info!(
                    server = %conn.host_port(),
                    added = merged.len() - existing.servers.len(),
                    "extending replication server references"
                );
                conn.modify(
                    &Dn::new(REPLICATION_SERVER_DN),
                    vec![AttrChange::replace(
                        ATTR_RS_SERVERS,
                        merged.iter().map(HostPort::to_string),
                    )],
                )
                .await?;
                changed = true;
            }
        }
        None => {
            info!(server = %conn.host_port(), id = new_id, port, "creating replication server");
            let rs = ReplicationServerConfig {
                id: new_id,
                port,
                servers: servers.clone(),
            };
            conn.add(rs.to_entry()).await?;
            changed = true;
        }
    }
    Ok(changed)
}

/// Outcome of [`ensure_domain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainOutcome {
    /// The domain's id (existing or newly assigned).
    pub domain_id: u32,
    /// Whether anything was written.
    pub changed: bool,
}

/// Make sure a replication domain for `suffix` exists and references at
/// least `servers`. `new_id` is only used when the domain is created.
pub async fn ensure_domain(
    conn: &dyn DirectoryConnection,
    suffix: &Dn,
    new_id: u32,
    servers: &BTreeSet<HostPort>,
) -> Result<DomainOutcome, DirectoryError> {
    let mut changed = ensure_sync_provider(conn).await?;
    let domains = config::read_domains(conn).await?;
    match domains.iter().find(|d| d.base_dn == *suffix) {
        Some(existing) => {
            let merged: BTreeSet<HostPort> =
                existing.servers.union(servers).cloned().collect();
            if merged != existing.servers {
                debug!(server = %conn.host_port(), suffix = %suffix, "extending domain references");
                conn.modify(
                    &existing.dn(),
                    vec![AttrChange::replace(
                        ATTR_RS_SERVERS,
                        merged.iter().map(HostPort::to_string),
                    )],
                )
                .await?;
                changed = true;
            }
            Ok(DomainOutcome {
                domain_id: existing.server_id,
                changed,
            })
        }
        None => {
            let name = unique_domain_name(&domains, suffix);
            info!(server = %conn.host_port(), suffix = %suffix, id = new_id, "creating replication domain");
            let domain = DomainConfig {
                name,
                base_dn: suffix.clone(),
                server_id: new_id,
                servers: servers.clone(),
            };
            conn.add(domain.to_entry()).await?;
            Ok(DomainOutcome {
                domain_id: new_id,
                changed: true,
            })
        }
    }
}

/// Delete the replication domain of `suffix`, if one exists.
pub async fn remove_domain(
    conn: &dyn DirectoryConnection,
    suffix: &Dn,
) -> Result<bool, DirectoryError> {
    let domains = config::read_domains(conn).await?;
    match domains.iter().find(|d| d.base_dn == *suffix) {
        Some(domain) => {
            info!(server = %conn.host_port(), suffix = %suffix, "removing replication domain");
            conn.delete(&domain.dn()).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Delete the server's replication-server configuration, if present.
pub async fn remove_replication_server(
    conn: &dyn DirectoryConnection,
) -> Result<bool, DirectoryError> {
    let dn = Dn::new(REPLICATION_SERVER_DN);
    match conn.read(&dn).await? {
        Some(_) => {
            info!(server = %conn.host_port(), "removing replication server configuration");
            conn.delete(&dn).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Drop every reference to the replication server `token` from this
/// server's configuration. Host comparison is case-insensitive. A domain
/// whose reference list empties out is deleted outright; a replication
/// server's list may legitimately empty without the entry going away.
pub async fn remove_rs_references(
    conn: &dyn DirectoryConnection,
    token: &HostPort,
) -> Result<bool, DirectoryError> {
    let mut changed = false;

    if let Some(rs) = config::read_replication_server(conn).await? {
        let kept: BTreeSet<HostPort> = rs.servers.iter().filter(|s| *s != token).cloned().collect();
        if kept != rs.servers {
            debug!(server = %conn.host_port(), token = %token, "dropping replication server reference");
            conn.modify(
                &Dn::new(REPLICATION_SERVER_DN),
                vec![AttrChange::replace(
                    ATTR_RS_SERVERS,
                    kept.iter().map(HostPort::to_string),
                )],
            )
            .await?;
            changed = true;
        }
    }

    for domain in config::read_domains(conn).await? {
        changed |= strip_domain_reference(conn, &domain, token).await?;
    }
    Ok(changed)
}

/// Drop `token` from one suffix's domain on this server, deleting the domain
/// when its reference list empties out. A member without a domain for the
/// suffix is left alone.
pub async fn remove_rs_reference_for_suffix(
    conn: &dyn DirectoryConnection,
    suffix: &Dn,
    token: &HostPort,
) -> Result<bool, DirectoryError> {
    let domains = config::read_domains(conn).await?;
    match domains.iter().find(|d| d.base_dn == *suffix) {
        Some(domain) => strip_domain_reference(conn, domain, token).await,
        None => Ok(false),
    }
}

async fn strip_domain_reference(
    conn: &dyn DirectoryConnection,
    domain: &DomainConfig,
    token: &HostPort,
) -> Result<bool, DirectoryError> {
    let kept: BTreeSet<HostPort> =
        domain.servers.iter().filter(|s| *s != token).cloned().collect();
    if kept == domain.servers {
        return Ok(false);
    }
    if kept.is_empty() {
        info!(
            server = %conn.host_port(),
            suffix = %domain.base_dn,
            "last replication server reference removed, deleting domain"
        );
        conn.delete(&domain.dn()).await?;
    } else {
        conn.modify(
            &domain.dn(),
            vec![AttrChange::replace(
                ATTR_RS_SERVERS,
                kept.iter().map(HostPort::to_string),
            )],
        )
        .await?;
    }
    Ok(true)
}

/// Union `servers` into an existing member's references for `suffix`,
/// touching nothing the member does not already have. Used when fanning a
/// grown replication-server set out to the rest of a topology: a member
/// without a replication server or without a domain for the suffix is left
/// alone.
pub async fn extend_references(
    conn: &dyn DirectoryConnection,
    suffix: &Dn,
    servers: &BTreeSet<HostPort>,
) -> Result<bool, DirectoryError> {
    let mut changed = false;

    if let Some(rs) = config::read_replication_server(conn).await? {
        let merged: BTreeSet<HostPort> = rs.servers.union(servers).cloned().collect();
        if merged != rs.servers {
            conn.modify(
                &Dn::new(REPLICATION_SERVER_DN),
                vec![AttrChange::replace(
                    ATTR_RS_SERVERS,
                    merged.iter().map(HostPort::to_string),
                )],
            )
            .await?;
            changed = true;
        }
    }

    let domains = config::read_domains(conn).await?;
    if let Some(domain) = domains.iter().find(|d| d.base_dn == *suffix) {
        let merged: BTreeSet<HostPort> = domain.servers.union(servers).cloned().collect();
        if merged != domain.servers {
            debug!(server = %conn.host_port(), suffix = %suffix, "fanning out replication server references");
            conn.modify(
                &domain.dn(),
                vec![AttrChange::replace(
                    ATTR_RS_SERVERS,
                    merged.iter().map(HostPort::to_string),
                )],
            )
            .await?;
            changed = true;
        }
    }
    Ok(changed)
}

/// Switch encrypted replication traffic on or off.
pub async fn set_secure_replication(
    conn: &dyn DirectoryConnection,
    enabled: bool,
) -> Result<bool, DirectoryError> {
    let dn = Dn::new(CRYPTO_MANAGER_DN);
    let value = if enabled { "true" } else { "false" };
    match conn.read(&dn).await? {
        Some(entry) => {
            if entry.has_value_ignore_case(ATTR_SSL_ENCRYPTION, value) {
                Ok(false)
            } else {
                conn.modify(&dn, vec![AttrChange::replace(ATTR_SSL_ENCRYPTION, [value])])
                    .await?;
                Ok(true)
            }
        }
        None => {
            conn.add(
                Entry::new(dn)
                    .with_attr("cn", "crypto manager")
                    .with_attr(ATTR_SSL_ENCRYPTION, value),
            )
            .await?;
            Ok(true)
        }
    }
}

/// Pick a cn for a new domain entry. The suffix itself (normalized, commas
/// flattened) is used when free, with a numeric suffix to break clashes.
fn unique_domain_name(existing: &[DomainConfig], suffix: &Dn) -> String {
    let base = suffix.normalized().replace(',', " ");
    let taken = |name: &str| existing.iter().any(|d| d.name.eq_ignore_ascii_case(name));
    if !taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base} {n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirrepl_connect::MemoryDirectory;

    fn server() -> (MemoryDirectory, dirrepl_connect::MemoryConnection) {
        let dir = MemoryDirectory::new("s1", 1389, "secret");
        let conn = dir.bind(&Dn::new("cn=Directory Manager"), "secret").unwrap();
        (dir, conn)
    }

    fn hp(s: &str) -> HostPort {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_ensure_replication_server_create_then_union() {
        let (_dir, conn) = server();
        let initial: BTreeSet<HostPort> = [hp("s1:8989")].into_iter().collect();
        assert!(ensure_replication_server(&conn, 1, 8989, &initial).await.unwrap());

        // Same set again is a no-op.
        assert!(!ensure_replication_server(&conn, 9, 9999, &initial).await.unwrap());

        // A wider set is unioned in; id and port are untouched.
        let wider: BTreeSet<HostPort> = [hp("s1:8989"), hp("s2:8989")].into_iter().collect();
        assert!(ensure_replication_server(&conn, 9, 9999, &wider).await.unwrap());
        let rs = config::read_replication_server(&conn).await.unwrap().unwrap();
        assert_eq!(rs.id, 1);
        assert_eq!(rs.port, 8989);
        assert_eq!(rs.servers, wider);
    }

    #[tokio::test]
    async fn test_ensure_domain_create_then_union() {
        let (_dir, conn) = server();
        let suffix = Dn::new("dc=example,dc=com");
        let rs: BTreeSet<HostPort> = [hp("s1:8989")].into_iter().collect();

        let out = ensure_domain(&conn, &suffix, 3, &rs).await.unwrap();
        assert!(out.changed);
        assert_eq!(out.domain_id, 3);

        let again = ensure_domain(&conn, &suffix, 8, &rs).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.domain_id, 3);

        let wider: BTreeSet<HostPort> = [hp("s1:8989"), hp("s2:8989")].into_iter().collect();
        let grown = ensure_domain(&conn, &suffix, 8, &wider).await.unwrap();
        assert!(grown.changed);
        assert_eq!(grown.domain_id, 3);
    }

    #[tokio::test]
    async fn test_remove_rs_references_is_case_insensitive() {
        let (_dir, conn) = server();
        let suffix = Dn::new("dc=example,dc=com");
        let rs: BTreeSet<HostPort> = [hp("S2.Example.COM:8989"), hp("s1:8989")]
            .into_iter()
            .collect();
        ensure_replication_server(&conn, 1, 8989, &rs).await.unwrap();
        ensure_domain(&conn, &suffix, 1, &rs).await.unwrap();

        assert!(remove_rs_references(&conn, &hp("s2.example.com:8989")).await.unwrap());
        let remaining = config::read_replication_server(&conn).await.unwrap().unwrap();
        assert_eq!(remaining.servers, [hp("s1:8989")].into_iter().collect());
        let domains = config::read_domains(&conn).await.unwrap();
        assert_eq!(domains[0].servers, [hp("s1:8989")].into_iter().collect());
    }

    #[tokio::test]
    async fn test_domain_deleted_when_references_empty() {
        let (_dir, conn) = server();
        let suffix = Dn::new("dc=example,dc=com");
        let rs: BTreeSet<HostPort> = [hp("s2:8989")].into_iter().collect();
        ensure_domain(&conn, &suffix, 1, &rs).await.unwrap();

        assert!(remove_rs_references(&conn, &hp("s2:8989")).await.unwrap());
        assert!(config::read_domains(&conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_per_suffix_strip_leaves_other_domains_alone() {
        let (_dir, conn) = server();
        let rs: BTreeSet<HostPort> = [hp("s1:8989"), hp("s3:8989")].into_iter().collect();
        ensure_replication_server(&conn, 1, 8989, &rs).await.unwrap();
        ensure_domain(&conn, &Dn::new("dc=example,dc=com"), 1, &rs).await.unwrap();
        ensure_domain(&conn, &Dn::new("cn=admin data"), 2, &rs).await.unwrap();

        assert!(
            remove_rs_reference_for_suffix(&conn, &Dn::new("dc=example,dc=com"), &hp("s3:8989"))
                .await
                .unwrap()
        );
        let kept: BTreeSet<HostPort> = [hp("s1:8989")].into_iter().collect();
        let domains = config::read_domains(&conn).await.unwrap();
        for domain in &domains {
            if domain.base_dn == Dn::new("dc=example,dc=com") {
                assert_eq!(domain.servers, kept);
            } else {
                assert_eq!(domain.servers, rs);
            }
        }
        // The replication server entry itself keeps the token; only the one
        // domain lost it.
        let rs_entry = config::read_replication_server(&conn).await.unwrap().unwrap();
        assert_eq!(rs_entry.servers, rs);

        // A member with no domain for the suffix is untouched.
        assert!(
            !remove_rs_reference_for_suffix(&conn, &Dn::new("dc=absent"), &hp("s1:8989"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_unique_domain_name_breaks_clashes() {
        let existing = vec![DomainConfig {
            name: "dc=example dc=com".into(),
            base_dn: Dn::new("dc=other"),
            server_id: 1,
            servers: BTreeSet::new(),
        }];
        let name = unique_domain_name(&existing, &Dn::new("dc=example,dc=com"));
        assert_eq!(name, "dc=example dc=com 2");
    }
}
