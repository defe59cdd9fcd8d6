//! In-memory directory server used by tests across the workspace.
//!
//! One [`MemoryDirectory`] plays the role of a single remote server: it holds
//! entries, validates binds, and hands out connections that implement
//! [`DirectoryConnection`]. A task hook lets test fixtures attach semantics to
//! entries added under `cn=tasks` (the simulated fleet uses this to model
//! online suffix initialization).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::conn::{DirectoryConnection, HostPort};
use crate::dn::Dn;
use crate::entry::{AttrChange, Entry};
use crate::error::DirectoryError;

/// Attributes appended to a task entry by a [`TaskHook`].
pub type TaskAttrs = Vec<(String, String)>;

/// Callback invoked when an entry is added under `cn=tasks`. The returned
/// attributes are merged into the stored entry, which the client then reads
/// back as the task outcome.
pub type TaskHook = Arc<dyn Fn(&Entry) -> TaskAttrs + Send + Sync>;

const TASKS_ROOT: &str = "cn=tasks";

#[derive(Default)]
struct Shared {
    entries: Mutex<BTreeMap<String, Entry>>,
    task_hook: Mutex<Option<TaskHook>>,
}

/// An in-memory directory server.
#[derive(Clone)]
pub struct MemoryDirectory {
    host_port: HostPort,
    root_dn: Dn,
    root_password: String,
    shared: Arc<Shared>,
    open_connections: Arc<AtomicIsize>,
}

impl MemoryDirectory {
    /// Create a server at the given address with the default root identity
    /// `cn=Directory Manager`.
    pub fn new(host: &str, port: u16, root_password: &str) -> Self {
        Self {
            host_port: HostPort::new(host, port),
            root_dn: Dn::new("cn=Directory Manager"),
            root_password: root_password.to_string(),
            shared: Arc::new(Shared::default()),
            open_connections: Arc::new(AtomicIsize::new(0)),
        }
    }

    /// The server's address.
    pub fn host_port(&self) -> HostPort {
        self.host_port.clone()
    }

    /// Install the hook applied to entries added under `cn=tasks`.
    pub fn set_task_hook(&self, hook: TaskHook) {
        *self.shared.task_hook.lock().unwrap() = Some(hook);
    }

    /// Insert an entry directly, bypassing the connection layer. Panics on a
    /// poisoned lock; fixture-only.
    pub fn seed(&self, entry: Entry) {
        self.shared
            .entries
            .lock()
            .unwrap()
            .insert(entry.dn.normalized().to_string(), entry);
    }

    /// Remove every entry at or below `base`, bypassing the connection
    /// layer. Fixture-only, like [`MemoryDirectory::seed`].
    pub fn remove_under(&self, base: &Dn) {
        self.shared
            .entries
            .lock()
            .unwrap()
            .retain(|_, e| !e.dn.is_under(base));
    }

    /// Inspect one entry without a connection.
    pub fn entry(&self, dn: &Dn) -> Option<Entry> {
        self.shared
            .entries
            .lock()
            .unwrap()
            .get(dn.normalized())
            .cloned()
    }

    /// All entries at or below `base`, for assertions.
    pub fn entries_under(&self, base: &Dn) -> Vec<Entry> {
        self.shared
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.dn.is_under(base))
            .cloned()
            .collect()
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> isize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// Validate a bind and return a connection.
    pub fn bind(
        &self,
        bind_dn: &Dn,
        password: &str,
    ) -> Result<MemoryConnection, DirectoryError> {
        let ok = if *bind_dn == self.root_dn {
            password == self.root_password
        } else {
            match self.entry(bind_dn) {
                Some(e) => e.values("userpassword").iter().any(|p| *p == password),
                None => false,
            }
        };
        if !ok {
            return Err(DirectoryError::AuthenticationFailed {
                host_port: self.host_port.to_string(),
            });
        }
        self.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            server: self.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// One open connection to a [`MemoryDirectory`].
pub struct MemoryConnection {
    server: MemoryDirectory,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("host_port", &self.server.host_port)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), DirectoryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DirectoryError::Transport {
                host_port: self.server.host_port.to_string(),
                msg: "connection closed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    fn host_port(&self) -> HostPort {
        self.server.host_port.clone()
    }

    async fn read(&self, dn: &Dn) -> Result<Option<Entry>, DirectoryError> {
        self.ensure_open()?;
        Ok(self.server.entry(dn))
    }

    async fn search_subtree(&self, base: &Dn) -> Result<Vec<Entry>, DirectoryError> {
        self.ensure_open()?;
        Ok(self.server.entries_under(base))
    }

    async fn add(&self, entry: Entry) -> Result<(), DirectoryError> {
        self.ensure_open()?;
        let key = entry.dn.normalized().to_string();
        let tasks_root = Dn::new(TASKS_ROOT);
        let extra = if entry.dn.is_under(&tasks_root) && entry.dn != tasks_root {
            let hook = self.server.shared.task_hook.lock().unwrap().clone();
            hook.map(|h| h(&entry))
        } else {
            None
        };
        let mut entries = self.server.shared.entries.lock().unwrap();
        if entries.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists { dn: entry.dn });
        }
        let mut stored = entry;
        for (name, value) in extra.unwrap_or_default() {
            stored.add_value(&name, &value);
        }
        entries.insert(key, stored);
        Ok(())
    }

    async fn modify(&self, dn: &Dn, changes: Vec<AttrChange>) -> Result<(), DirectoryError> {
        self.ensure_open()?;
        let mut entries = self.server.shared.entries.lock().unwrap();
        match entries.get_mut(dn.normalized()) {
            Some(entry) => {
                entry.apply(&changes);
                Ok(())
            }
            None => Err(DirectoryError::NoSuchEntry { dn: dn.clone() }),
        }
    }

    async fn delete(&self, dn: &Dn) -> Result<(), DirectoryError> {
        self.ensure_open()?;
        let mut entries = self.server.shared.entries.lock().unwrap();
        match entries.remove(dn.normalized()) {
            Some(_) => Ok(()),
            None => Err(DirectoryError::NoSuchEntry { dn: dn.clone() }),
        }
    }

    async fn close(&self) -> Result<(), DirectoryError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
