#![warn(missing_docs)]

//! Dirrepl control-plane operations.
//!
//! The public operations ([`enable_replication`], [`disable_replication`],
//! [`initialize_replication`], [`replication_status`]) act on servers reached
//! through a [`dirrepl_connect::Connector`]. Each one reads the targets,
//! decides what needs doing through pure classification, and propagates
//! configuration idempotently: running an operation twice leaves the topology
//! where the first run put it.

pub mod ads_merge;
pub mod classify;
pub mod disable;
pub mod enable;
pub mod error;
pub mod ids;
pub mod initialize;
pub mod params;
pub mod propagate;
pub mod report;
pub mod session;
pub mod status;

pub use disable::disable_replication;
pub use enable::enable_replication;
pub use error::{ReplError, ReturnCode};
pub use initialize::{initialize_replication, RetryPolicy};
pub use params::{
    AdminCredentials, DisableReplicationParams, EnableEndpoint, EnableReplicationParams,
    InitializeReplicationParams, StatusParams,
};
pub use report::{OperationReport, SuffixOutcome};
pub use status::{replication_status, StatusReport};
