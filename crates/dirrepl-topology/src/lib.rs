#![warn(missing_docs)]

//! Dirrepl topology discovery: per-server snapshots and the fleet-wide cache.
//!
//! A [`ServerDescriptor`] is built fresh from one live connection and never
//! mutated afterwards. The [`TopologyCache`] discovers every server a shared
//! administrative store knows about, tolerating individual unreachable or
//! misauthenticated members.

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod snapshot;
pub mod suffix;

pub use cache::{CacheErrorKind, TopologyCache, TopologyCacheError};
pub use config::{DomainConfig, ReplicationServerConfig};
pub use descriptor::{ReplicaDescriptor, ReplicationServerInfo, ServerDescriptor};
pub use snapshot::read_server_descriptor;
pub use suffix::{group_suffixes, SuffixDescriptor, SuffixReplica};
