#![warn(missing_docs)]

//! Dirrepl administrative store (ADS): the shared, itself-replicated suffix
//! holding fleet-wide administrator accounts and the registry of known
//! servers.
//!
//! The on-disk attribute schema is fixed by the servers; this crate only
//! reads and writes it through a [`dirrepl_connect::DirectoryConnection`].

pub mod context;
pub mod error;
pub mod registration;

pub use context::{administrator_dn, AdsContext, ADMIN_DATA_DN, SCHEMA_DN};
pub use error::AdsError;
pub use registration::ServerRegistration;
