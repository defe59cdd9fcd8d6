#![warn(missing_docs)]

//! Dirrepl connection boundary: distinguished names, directory entries, and the
//! connect/search/modify traits the replication control plane is written against.
//!
//! The real LDAP client lives outside this workspace; everything here is the
//! interface it must satisfy, plus an in-memory implementation used by tests.

pub mod conn;
pub mod dn;
pub mod entry;
pub mod error;
pub mod memory;

pub use conn::{
    close_quietly, ConnectionSpec, Connector, DirectoryConnection, HostPort, TlsMode, TrustPolicy,
};
pub use dn::Dn;
pub use entry::{AttrChange, Entry};
pub use error::DirectoryError;
pub use memory::{MemoryConnection, MemoryDirectory, TaskHook};
