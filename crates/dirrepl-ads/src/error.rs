//! Administrative-store errors.

use thiserror::Error;

use dirrepl_connect::DirectoryError;

/// Errors from administrative-store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdsError {
    /// The underlying directory operation failed.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// The store exists but an expected container entry is missing.
    #[error("administrative store is incomplete: missing {dn}")]
    Incomplete {
        /// The missing container DN.
        dn: String,
    },

    /// A registration entry could not be decoded.
    #[error("malformed server registration at {dn}: {msg}")]
    MalformedRegistration {
        /// The offending entry's DN.
        dn: String,
        /// What was wrong with it.
        msg: String,
    },
}
