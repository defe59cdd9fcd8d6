//! A fleet of in-memory directory servers behaving like a small topology.
//!
//! The fleet implements [`Connector`], refuses connections on demand, and
//! wires every member's task backend so that an initialize task really
//! copies the suffix content from the member hosting the source replica.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use dirrepl_connect::{
    ConnectionSpec, Connector, DirectoryConnection, DirectoryError, Dn, Entry, HostPort,
    MemoryDirectory, TlsMode, TrustPolicy,
};
use dirrepl_core::initialize::{
    ATTR_TASK_FAILURE_CODE, ATTR_TASK_LOG, ATTR_TASK_SOURCE_ID, ATTR_TASK_STATE, ATTR_TASK_SUFFIX,
    FAILURE_PEER_NOT_FOUND, TASKS_DN, TASK_STATE_COMPLETED, TASK_STATE_STOPPED,
};
use dirrepl_topology::config::{
    DomainConfig, ATTR_BASE_DN, ATTR_INSTANCE_ID, BACKENDS_DN, CONFIG_DN, SYNC_PROVIDER_DN,
};

/// Root password shared by every fleet member.
pub const ROOT_PASSWORD: &str = "password";

#[derive(Default)]
struct Shared {
    servers: Mutex<BTreeMap<HostPort, MemoryDirectory>>,
    refused: Mutex<BTreeSet<HostPort>>,
    peer_failures: AtomicU32,
}

/// A set of simulated servers reachable through the [`Connector`] seam.
#[derive(Clone, Default)]
pub struct SimulatedFleet {
    shared: Arc<Shared>,
}

impl SimulatedFleet {
    /// An empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server hosting the given user suffixes. Every member also
    /// carries the administrative and schema suffixes, a task backend, and
    /// the root identity `cn=Directory Manager` with [`ROOT_PASSWORD`].
    pub fn add_server(&self, host: &str, port: u16, suffixes: &[&str]) -> MemoryDirectory {
        let dir = MemoryDirectory::new(host, port, ROOT_PASSWORD);
        dir.seed(
            Entry::new(Dn::new(CONFIG_DN)).with_attr(ATTR_INSTANCE_ID, &format!("{host}:{port}")),
        );
        dir.seed(Entry::new(Dn::new(BACKENDS_DN)));
        dir.seed(Entry::new(Dn::new(TASKS_DN)));

        let mut backends: Vec<(String, String)> = suffixes
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("userRoot{i}"), s.to_string()))
            .collect();
        backends.push(("adminRoot".to_string(), "cn=admin data".to_string()));
        backends.push(("schemaRoot".to_string(), "cn=schema".to_string()));
        for (name, base) in &backends {
            dir.seed(
                Entry::new(Dn::new(&format!("cn={name},{BACKENDS_DN}")))
                    .with_attr(ATTR_BASE_DN, base),
            );
            dir.seed(Entry::new(Dn::new(base)));
        }

        let hook_shared = Arc::downgrade(&self.shared);
        let dest = dir.clone();
        dir.set_task_hook(Arc::new(move |task| run_init_task(&hook_shared, &dest, task)));

        self.shared
            .servers
            .lock()
            .unwrap()
            .insert(dir.host_port(), dir.clone());
        dir
    }

    /// A member by address.
    pub fn server(&self, host_port: &HostPort) -> Option<MemoryDirectory> {
        self.shared.servers.lock().unwrap().get(host_port).cloned()
    }

    /// Make connections to the given address fail from now on.
    pub fn refuse_connections(&self, host_port: &HostPort) {
        self.shared.refused.lock().unwrap().insert(host_port.clone());
    }

    /// Make the next `n` initialize tasks fail with the
    /// source-replica-not-found code, fleet-wide.
    pub fn fail_peer_lookups(&self, n: u32) {
        self.shared.peer_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for SimulatedFleet {
    async fn connect(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        let host_port = spec.host_port();
        if self.shared.refused.lock().unwrap().contains(&host_port) {
            return Err(DirectoryError::Transport {
                host_port: host_port.to_string(),
                msg: "connection refused".to_string(),
            });
        }
        let server = self
            .shared
            .servers
            .lock()
            .unwrap()
            .get(&host_port)
            .cloned()
            .ok_or_else(|| DirectoryError::Transport {
                host_port: host_port.to_string(),
                msg: "no route to host".to_string(),
            })?;
        Ok(Box::new(server.bind(&spec.bind_dn, &spec.password)?))
    }
}

/// A root-identity connection spec for a fleet member.
pub fn root_spec(host: &str, port: u16) -> ConnectionSpec {
    ConnectionSpec {
        host: host.to_string(),
        port,
        tls: TlsMode::None,
        bind_dn: Dn::new("cn=Directory Manager"),
        password: ROOT_PASSWORD.to_string(),
        trust: TrustPolicy::TrustAll,
        timeout: Duration::from_secs(10),
    }
}

fn task_result(state: &str, failure: Option<(&str, &str)>) -> Vec<(String, String)> {
    let mut attrs = vec![(ATTR_TASK_STATE.to_string(), state.to_string())];
    if let Some((code, message)) = failure {
        attrs.push((ATTR_TASK_FAILURE_CODE.to_string(), code.to_string()));
        attrs.push((ATTR_TASK_LOG.to_string(), message.to_string()));
    }
    attrs
}

/// Resolve an initialize task on `dest`: find the fleet member whose domain
/// for the suffix carries the requested id and copy its suffix content over.
fn run_init_task(
    shared: &Weak<Shared>,
    dest: &MemoryDirectory,
    task: &Entry,
) -> Vec<(String, String)> {
    let Some(shared) = shared.upgrade() else {
        return task_result(TASK_STATE_STOPPED, Some(("fleet-gone", "fleet dropped")));
    };
    let Some(suffix) = task.first(ATTR_TASK_SUFFIX) else {
        // Not an initialize task; complete it without side effects.
        return task_result(TASK_STATE_COMPLETED, None);
    };
    let Some(source_id) = task
        .first(ATTR_TASK_SOURCE_ID)
        .and_then(|v| v.parse::<u32>().ok())
    else {
        return task_result(
            TASK_STATE_STOPPED,
            Some(("malformed-task", "missing or bad source id")),
        );
    };

    if shared
        .peer_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return task_result(
            TASK_STATE_STOPPED,
            Some((FAILURE_PEER_NOT_FOUND, "injected lookup failure")),
        );
    }

    let suffix_dn = Dn::new(suffix);
    let servers: Vec<MemoryDirectory> =
        shared.servers.lock().unwrap().values().cloned().collect();
    for server in servers {
        if server.host_port() == dest.host_port() {
            continue;
        }
        let hosts_source = server
            .entries_under(&Dn::new(SYNC_PROVIDER_DN))
            .iter()
            .filter_map(DomainConfig::from_entry)
            .any(|d| d.base_dn == suffix_dn && d.server_id == source_id);
        if hosts_source {
            debug!(
                source = %server.host_port(),
                dest = %dest.host_port(),
                suffix = %suffix_dn,
                "copying suffix content"
            );
            dest.remove_under(&suffix_dn);
            for entry in server.entries_under(&suffix_dn) {
                dest.seed(entry);
            }
            return task_result(TASK_STATE_COMPLETED, None);
        }
    }
    task_result(
        TASK_STATE_STOPPED,
        Some((FAILURE_PEER_NOT_FOUND, "no replica carries the requested id")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet as Set;

    fn seed_domain(server: &MemoryDirectory, suffix: &str, id: u32) {
        server.seed(Entry::new(Dn::new(SYNC_PROVIDER_DN)));
        let domain = DomainConfig {
            name: suffix.to_string(),
            base_dn: Dn::new(suffix),
            server_id: id,
            servers: Set::new(),
        };
        server.seed(domain.to_entry());
    }

    #[tokio::test]
    async fn test_connector_refuses_on_demand() {
        let fleet = SimulatedFleet::new();
        fleet.add_server("s1", 1389, &[]);
        fleet.refuse_connections(&HostPort::new("s1", 1389));
        let err = fleet.connect(&root_spec("s1", 1389)).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_init_task_copies_suffix_content() {
        let fleet = SimulatedFleet::new();
        let s1 = fleet.add_server("s1", 1389, &["dc=example,dc=com"]);
        let s2 = fleet.add_server("s2", 1389, &["dc=example,dc=com"]);
        seed_domain(&s1, "dc=example,dc=com", 7);
        s1.seed(Entry::new(Dn::new("cn=alice,dc=example,dc=com")).with_attr("cn", "alice"));

        let conn = fleet.connect(&root_spec("s2", 1389)).await.unwrap();
        conn.add(
            Entry::new(Dn::new(&format!("cn=init-1,{TASKS_DN}")))
                .with_attr(ATTR_TASK_SUFFIX, "dc=example,dc=com")
                .with_attr(ATTR_TASK_SOURCE_ID, "7"),
        )
        .await
        .unwrap();
        let task = conn
            .read(&Dn::new(&format!("cn=init-1,{TASKS_DN}")))
            .await
            .unwrap()
            .unwrap();
        conn.close().await.unwrap();

        assert_eq!(task.first(ATTR_TASK_STATE), Some(TASK_STATE_COMPLETED));
        assert!(s2.entry(&Dn::new("cn=alice,dc=example,dc=com")).is_some());
    }

    #[tokio::test]
    async fn test_peer_lookup_budget_consumed_then_succeeds() {
        let fleet = SimulatedFleet::new();
        let s1 = fleet.add_server("s1", 1389, &["dc=example,dc=com"]);
        fleet.add_server("s2", 1389, &["dc=example,dc=com"]);
        seed_domain(&s1, "dc=example,dc=com", 7);
        fleet.fail_peer_lookups(1);

        let conn = fleet.connect(&root_spec("s2", 1389)).await.unwrap();
        for (cn, expected) in [("a", TASK_STATE_STOPPED), ("b", TASK_STATE_COMPLETED)] {
            let dn = Dn::new(&format!("cn={cn},{TASKS_DN}"));
            conn.add(
                Entry::new(dn.clone())
                    .with_attr(ATTR_TASK_SUFFIX, "dc=example,dc=com")
                    .with_attr(ATTR_TASK_SOURCE_ID, "7"),
            )
            .await
            .unwrap();
            let task = conn.read(&dn).await.unwrap().unwrap();
            assert_eq!(task.first(ATTR_TASK_STATE), Some(expected));
        }
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_source_reports_peer_not_found() {
        let fleet = SimulatedFleet::new();
        fleet.add_server("s2", 1389, &["dc=example,dc=com"]);
        let conn = fleet.connect(&root_spec("s2", 1389)).await.unwrap();
        let dn = Dn::new(&format!("cn=init-x,{TASKS_DN}"));
        conn.add(
            Entry::new(dn.clone())
                .with_attr(ATTR_TASK_SUFFIX, "dc=example,dc=com")
                .with_attr(ATTR_TASK_SOURCE_ID, "9"),
        )
        .await
        .unwrap();
        let task = conn.read(&dn).await.unwrap().unwrap();
        assert_eq!(task.first(ATTR_TASK_STATE), Some(TASK_STATE_STOPPED));
        assert!(task.has_value_ignore_case(ATTR_TASK_FAILURE_CODE, FAILURE_PEER_NOT_FOUND));
        conn.close().await.unwrap();
    }
}
