//! Error types for directory connections and operations.

use thiserror::Error;

use crate::dn::Dn;

/// Errors surfaced by a directory connection or by connecting itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The server rejected the bind identity or credentials.
    #[error("authentication failed on {host_port}")]
    AuthenticationFailed {
        /// The server that rejected the bind.
        host_port: String,
    },

    /// The server presented a certificate the trust policy rejects.
    #[error("certificate of {host_port} is not trusted")]
    CertificateNotTrusted {
        /// The server whose certificate was rejected.
        host_port: String,
    },

    /// Transport-level failure (refused, reset, unreachable).
    #[error("cannot contact {host_port}: {msg}")]
    Transport {
        /// The unreachable server.
        host_port: String,
        /// Transport diagnostic.
        msg: String,
    },

    /// The operation did not complete within the connection timeout.
    #[error("operation timed out on {host_port}")]
    Timeout {
        /// The server that timed out.
        host_port: String,
    },

    /// The target entry does not exist.
    #[error("no such entry: {dn}")]
    NoSuchEntry {
        /// The missing entry's DN.
        dn: Dn,
    },

    /// An add targeted an existing entry.
    #[error("entry already exists: {dn}")]
    AlreadyExists {
        /// The conflicting DN.
        dn: Dn,
    },

    /// The server refused the operation.
    #[error("server {host_port} unwilling to perform: {msg}")]
    Unwilling {
        /// The refusing server.
        host_port: String,
        /// Server diagnostic.
        msg: String,
    },
}

impl DirectoryError {
    /// True for failures that happen before a session is established
    /// (useful when classifying topology-discovery errors).
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            DirectoryError::AuthenticationFailed { .. }
                | DirectoryError::CertificateNotTrusted { .. }
                | DirectoryError::Transport { .. }
                | DirectoryError::Timeout { .. }
        )
    }
}
