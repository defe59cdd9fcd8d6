//! Operation outcomes and failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dirrepl_ads::AdsError;
use dirrepl_connect::{DirectoryError, Dn, HostPort};

/// Coarse outcome of one control-plane operation.
///
/// Every [`ReplError`] maps onto one of the failure codes; successful
/// operations report [`ReturnCode::Successful`] or, when nothing needed
/// doing, [`ReturnCode::SuccessfulNop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    /// The operation changed the topology as requested.
    Successful,
    /// The requested state already held; nothing was written.
    SuccessfulNop,
    /// The caller declined a required confirmation.
    UserCancelled,
    /// A target server could not be contacted or authenticated against.
    ErrorConnecting,
    /// Replication cannot be enabled on a requested base DN.
    ReplicationCannotBeEnabledOnBaseDn,
    /// Replication cannot be disabled on a requested base DN.
    ReplicationCannotBeDisabledOnBaseDn,
    /// Replication cannot be initialized on a requested base DN.
    ReplicationCannotBeInitializedOnBaseDn,
    /// Both servers already belong to distinct multi-server administration
    /// domains; merging them is unsupported.
    ReplicationAdsMergeNotSupported,
    /// A server's configuration could not be read.
    ErrorReadingConfiguration,
    /// A server's configuration could not be updated.
    ErrorUpdatingConfiguration,
    /// The administrative store could not be read.
    ErrorReadingAds,
    /// The administrative store could not be updated.
    ErrorUpdatingAds,
    /// The replication-server configuration could not be created or updated.
    ErrorConfiguringReplicationServer,
    /// Enabling a domain failed after replication-server configuration
    /// succeeded.
    ErrorEnablingReplicationOnBaseDn,
    /// Disabling a domain failed partway through.
    ErrorDisablingReplicationOnBaseDn,
    /// A replicated suffix has no domain id on the server where one was
    /// expected.
    ReplicationIdNotFound,
    /// Online initialization kept failing to find the source replica and the
    /// retry budget ran out.
    InitializingTriesCompleted,
}

/// A control-plane operation failure.
#[derive(Debug, Error)]
pub enum ReplError {
    /// One or both target servers could not be contacted. Both failures are
    /// reported at once so the caller fixes everything in one pass.
    #[error("cannot connect: {}", format_connect_failures(.failures))]
    Connect {
        /// Endpoint and failure, per unreachable server.
        failures: Vec<(HostPort, DirectoryError)>,
    },

    /// The caller declined a required confirmation.
    #[error("operation cancelled")]
    UserCancelled,

    /// A base DN is not eligible for the requested operation.
    #[error("replication cannot be {op} on {suffix} at {server}: {reason}")]
    SuffixNotEligible {
        /// `enabled`, `disabled` or `initialized`.
        op: EligibilityOp,
        /// The ineligible base DN.
        suffix: Dn,
        /// The server where the check failed.
        server: HostPort,
        /// Why.
        reason: String,
    },

    /// Every requested base DN was dropped by the eligibility checks, so
    /// there is nothing the operation could do.
    #[error("none of the requested base DNs can have replication {op}")]
    NoEligibleSuffixes {
        /// The operation whose checks emptied the request.
        op: EligibilityOp,
    },

    /// Both servers already belong to distinct multi-server administration
    /// domains.
    #[error("administration domains of {server1} and {server2} cannot be merged")]
    AdsMergeNotSupported {
        /// First endpoint.
        server1: HostPort,
        /// Second endpoint.
        server2: HostPort,
    },

    /// Reading a server's configuration failed.
    #[error("error reading configuration of {server}")]
    ReadConfig {
        /// The server.
        server: HostPort,
        /// Underlying failure.
        #[source]
        source: DirectoryError,
    },

    /// Updating a server's configuration failed.
    #[error("error updating configuration of {server}")]
    UpdateConfig {
        /// The server.
        server: HostPort,
        /// Underlying failure.
        #[source]
        source: DirectoryError,
    },

    /// Reading the administrative store failed.
    #[error("error reading administration data on {server}")]
    ReadAds {
        /// The server.
        server: HostPort,
        /// Underlying failure.
        #[source]
        source: AdsError,
    },

    /// Updating the administrative store failed.
    #[error("error updating administration data on {server}")]
    UpdateAds {
        /// The server.
        server: HostPort,
        /// Underlying failure.
        #[source]
        source: AdsError,
    },

    /// A server has no replication server yet and the caller supplied no
    /// port to create one with.
    #[error("{server} is not a replication server and no replication port was given")]
    MissingReplicationPort {
        /// The server.
        server: HostPort,
    },

    /// Creating or updating a replication-server configuration failed.
    #[error("error configuring replication server on {server}")]
    ConfigureReplicationServer {
        /// The server.
        server: HostPort,
        /// Underlying failure.
        #[source]
        source: DirectoryError,
    },

    /// Enabling a domain failed.
    #[error("error enabling replication on {suffix} at {server}")]
    EnableSuffix {
        /// The base DN.
        suffix: Dn,
        /// The server.
        server: HostPort,
        /// Underlying failure.
        #[source]
        source: DirectoryError,
    },

    /// Disabling a domain failed.
    #[error("error disabling replication on {suffix} at {server}")]
    DisableSuffix {
        /// The base DN.
        suffix: Dn,
        /// The server.
        server: HostPort,
        /// Underlying failure.
        #[source]
        source: DirectoryError,
    },

    /// A replicated suffix has no domain id where one was expected.
    #[error("no replication domain id for {suffix} on {server}")]
    DomainIdNotFound {
        /// The base DN.
        suffix: Dn,
        /// The server.
        server: HostPort,
    },

    /// Online initialization failed on every attempt with the source replica
    /// still unknown to the destination.
    #[error("initialization of {suffix} still cannot find the source replica after {attempts} attempts")]
    InitRetriesExhausted {
        /// The base DN.
        suffix: Dn,
        /// Attempts made.
        attempts: u32,
    },

    /// Online initialization failed for a reason retries cannot fix.
    #[error("initialization of {suffix} on {server} failed: {message}")]
    InitFailed {
        /// The base DN.
        suffix: Dn,
        /// The destination server.
        server: HostPort,
        /// The task's failure message.
        message: String,
    },

    /// One or more suffixes failed to initialize. Each failure is fatal for
    /// its suffix only; the remaining suffixes were still attempted.
    #[error("initialization failed for {} of the requested suffixes", .failures.len())]
    InitFailures {
        /// The failed suffixes with their individual failures.
        failures: Vec<(Dn, ReplError)>,
    },
}

/// Which operation an eligibility failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityOp {
    /// Enabling replication.
    Enabled,
    /// Disabling replication.
    Disabled,
    /// Initializing a replica.
    Initialized,
}

impl std::fmt::Display for EligibilityOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EligibilityOp::Enabled => "enabled",
            EligibilityOp::Disabled => "disabled",
            EligibilityOp::Initialized => "initialized",
        })
    }
}

impl ReplError {
    /// The coarse return code this failure maps to.
    pub fn return_code(&self) -> ReturnCode {
        match self {
            ReplError::Connect { .. } => ReturnCode::ErrorConnecting,
            ReplError::UserCancelled => ReturnCode::UserCancelled,
            ReplError::SuffixNotEligible { op, .. }
            | ReplError::NoEligibleSuffixes { op } => match op {
                EligibilityOp::Enabled => ReturnCode::ReplicationCannotBeEnabledOnBaseDn,
                EligibilityOp::Disabled => ReturnCode::ReplicationCannotBeDisabledOnBaseDn,
                EligibilityOp::Initialized => {
                    ReturnCode::ReplicationCannotBeInitializedOnBaseDn
                }
            },
            ReplError::AdsMergeNotSupported { .. } => ReturnCode::ReplicationAdsMergeNotSupported,
            ReplError::ReadConfig { .. } => ReturnCode::ErrorReadingConfiguration,
            ReplError::UpdateConfig { .. } => ReturnCode::ErrorUpdatingConfiguration,
            ReplError::ReadAds { .. } => ReturnCode::ErrorReadingAds,
            ReplError::UpdateAds { .. } => ReturnCode::ErrorUpdatingAds,
            ReplError::MissingReplicationPort { .. }
            | ReplError::ConfigureReplicationServer { .. } => {
                ReturnCode::ErrorConfiguringReplicationServer
            }
            ReplError::EnableSuffix { .. } => ReturnCode::ErrorEnablingReplicationOnBaseDn,
            ReplError::DisableSuffix { .. } => ReturnCode::ErrorDisablingReplicationOnBaseDn,
            ReplError::DomainIdNotFound { .. } => ReturnCode::ReplicationIdNotFound,
            ReplError::InitRetriesExhausted { .. } => ReturnCode::InitializingTriesCompleted,
            ReplError::InitFailed { .. } => ReturnCode::ReplicationCannotBeInitializedOnBaseDn,
            ReplError::InitFailures { failures } => failures
                .first()
                .map(|(_, e)| e.return_code())
                .unwrap_or(ReturnCode::InitializingTriesCompleted),
        }
    }
}

fn format_connect_failures(failures: &[(HostPort, DirectoryError)]) -> String {
    failures
        .iter()
        .map(|(hp, e)| format!("{hp} ({e})"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_reports_every_endpoint() {
        let err = ReplError::Connect {
            failures: vec![
                (
                    HostPort::new("s1", 1389),
                    DirectoryError::Timeout {
                        host_port: "s1:1389".into(),
                    },
                ),
                (
                    HostPort::new("s2", 1389),
                    DirectoryError::AuthenticationFailed {
                        host_port: "s2:1389".into(),
                    },
                ),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("s1:1389"));
        assert!(text.contains("s2:1389"));
        assert_eq!(err.return_code(), ReturnCode::ErrorConnecting);
    }

    #[test]
    fn test_collected_failures_keep_the_first_code() {
        let err = ReplError::InitFailures {
            failures: vec![(
                Dn::new("dc=example,dc=com"),
                ReplError::InitRetriesExhausted {
                    suffix: Dn::new("dc=example,dc=com"),
                    attempts: 5,
                },
            )],
        };
        assert_eq!(err.return_code(), ReturnCode::InitializingTriesCompleted);
    }

    #[test]
    fn test_empty_request_maps_to_the_operation_code() {
        let err = ReplError::NoEligibleSuffixes {
            op: EligibilityOp::Enabled,
        };
        assert_eq!(
            err.return_code(),
            ReturnCode::ReplicationCannotBeEnabledOnBaseDn
        );
    }

    #[test]
    fn test_eligibility_codes_track_operation() {
        let base = |op| ReplError::SuffixNotEligible {
            op,
            suffix: Dn::new("dc=example,dc=com"),
            server: HostPort::new("s1", 1389),
            reason: "not configured".into(),
        };
        assert_eq!(
            base(EligibilityOp::Enabled).return_code(),
            ReturnCode::ReplicationCannotBeEnabledOnBaseDn
        );
        assert_eq!(
            base(EligibilityOp::Disabled).return_code(),
            ReturnCode::ReplicationCannotBeDisabledOnBaseDn
        );
        assert_eq!(
            base(EligibilityOp::Initialized).return_code(),
            ReturnCode::ReplicationCannotBeInitializedOnBaseDn
        );
    }
}
