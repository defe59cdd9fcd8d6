//! Online suffix initialization through the task backend.
//!
//! Initialization is asked of the destination server: a task entry names the
//! suffix and the source replica's domain id, and the data flows over the
//! replication protocol. Right after an enable the destination may not have
//! heard of the source replica yet, so that one failure mode is retried on a
//! fixed budget with a linear backoff.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use dirrepl_connect::{close_quietly, Connector, DirectoryConnection, Dn, Entry};
use dirrepl_topology::read_server_descriptor;

use crate::classify::classify_initialize;
use crate::error::{EligibilityOp, ReplError};
use crate::params::InitializeReplicationParams;
use crate::report::{OperationReport, SuffixOutcome};
use crate::session::connect_both;

/// Root of the task backend.
pub const TASKS_DN: &str = "cn=tasks";
/// Suffix to initialize.
pub const ATTR_TASK_SUFFIX: &str = "ds-task-initialize-domain-dn";
/// Domain id of the source replica.
pub const ATTR_TASK_SOURCE_ID: &str = "ds-task-initialize-replica-server-id";
/// Task state, written by the server.
pub const ATTR_TASK_STATE: &str = "ds-task-state";
/// Machine-readable failure class, written by the server on error.
pub const ATTR_TASK_FAILURE_CODE: &str = "ds-task-failure-code";
/// Human-readable failure detail.
pub const ATTR_TASK_LOG: &str = "ds-task-log-message";

/// `ds-task-state` of a finished task.
pub const TASK_STATE_COMPLETED: &str = "COMPLETED_SUCCESSFULLY";
/// `ds-task-state` of a failed task.
pub const TASK_STATE_STOPPED: &str = "STOPPED_BY_ERROR";
/// `ds-task-failure-code` when the source replica is unknown to the
/// destination. The only failure worth retrying.
pub const FAILURE_PEER_NOT_FOUND: &str = "peer-not-found";

/// How often and how patiently a failed initialization is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub attempts: u32,
    /// The wait before attempt `n` is `n * backoff_unit` (so the first
    /// attempt runs immediately).
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_unit: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// The wait before the given zero-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

/// What one task submission reported.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    PeerNotFound,
    Failed(String),
}

fn parse_outcome(entry: &Entry) -> TaskOutcome {
    match entry.first(ATTR_TASK_STATE) {
        Some(TASK_STATE_COMPLETED) => TaskOutcome::Completed,
        Some(TASK_STATE_STOPPED)
            if entry.has_value_ignore_case(ATTR_TASK_FAILURE_CODE, FAILURE_PEER_NOT_FOUND) =>
        {
            TaskOutcome::PeerNotFound
        }
        _ => TaskOutcome::Failed(
            entry
                .first(ATTR_TASK_LOG)
                .unwrap_or("task reported no outcome")
                .to_string(),
        ),
    }
}

/// Initialize `suffix` on the destination from the replica with domain id
/// `source_domain_id`, retrying per `policy` while the destination does not
/// know the source replica yet.
pub async fn initialize_suffix(
    destination: &dyn DirectoryConnection,
    suffix: &Dn,
    source_domain_id: u32,
    policy: &RetryPolicy,
) -> Result<(), ReplError> {
    let server = destination.host_port();
    for attempt in 0..policy.attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            debug!(suffix = %suffix, attempt, ?delay, "waiting before initialization retry");
            tokio::time::sleep(delay).await;
        }

        let task_dn = Dn::new(&format!("cn=initialize-{},{TASKS_DN}", Uuid::new_v4()));
        let task = Entry::new(task_dn.clone())
            .with_attr("objectclass", "ds-task")
            .with_attr(ATTR_TASK_SUFFIX, suffix.as_str())
            .with_attr(ATTR_TASK_SOURCE_ID, &source_domain_id.to_string());

        let submit = async {
            destination.add(task).await?;
            destination.read(&task_dn).await
        };
        let outcome = match submit.await {
            Ok(Some(entry)) => parse_outcome(&entry),
            Ok(None) => TaskOutcome::Failed("task entry vanished".to_string()),
            Err(e) => {
                return Err(ReplError::InitFailed {
                    suffix: suffix.clone(),
                    server,
                    message: e.to_string(),
                })
            }
        };

        match outcome {
            TaskOutcome::Completed => {
                info!(suffix = %suffix, server = %server, attempt, "suffix initialized");
                return Ok(());
            }
            TaskOutcome::PeerNotFound => {
                warn!(
                    suffix = %suffix,
                    server = %server,
                    attempt,
                    "source replica not known to destination yet"
                );
            }
            TaskOutcome::Failed(message) => {
                return Err(ReplError::InitFailed {
                    suffix: suffix.clone(),
                    server,
                    message,
                });
            }
        }
    }
    Err(ReplError::InitRetriesExhausted {
        suffix: suffix.clone(),
        attempts: policy.attempts,
    })
}

/// Initialize the suffixes named in `params` on the destination server from
/// the source server's data.
pub async fn initialize_replication(
    connector: &dyn Connector,
    params: &InitializeReplicationParams,
) -> Result<OperationReport, ReplError> {
    let (src_conn, dst_conn) = connect_both(connector, &params.source, &params.destination).await?;
    let result = run(params, src_conn.as_ref(), dst_conn.as_ref()).await;
    close_quietly(src_conn.as_ref()).await;
    close_quietly(dst_conn.as_ref()).await;
    result
}

async fn run(
    params: &InitializeReplicationParams,
    src_conn: &dyn DirectoryConnection,
    dst_conn: &dyn DirectoryConnection,
) -> Result<OperationReport, ReplError> {
    let source = read_server_descriptor(src_conn, None)
        .await
        .map_err(|e| ReplError::ReadConfig {
            server: src_conn.host_port(),
            source: e,
        })?;
    let destination = read_server_descriptor(dst_conn, None)
        .await
        .map_err(|e| ReplError::ReadConfig {
            server: dst_conn.host_port(),
            source: e,
        })?;

    // Eligibility of every suffix is settled before the first task runs.
    // Ineligible suffixes drop out of the request; the operation is an
    // error only when nothing is left.
    let mut outcomes = Vec::new();
    let mut planned = Vec::new();
    for suffix in &params.base_dns {
        match classify_initialize(suffix, &source, &destination) {
            Ok(source_id) => planned.push((suffix.clone(), source_id)),
            Err(
                e @ (ReplError::SuffixNotEligible { .. } | ReplError::DomainIdNotFound { .. }),
            ) => {
                warn!(suffix = %suffix, reason = %e, "dropping ineligible suffix from the request");
                outcomes.push((suffix.clone(), SuffixOutcome::Skipped(e.to_string())));
            }
            Err(e) => return Err(e),
        }
    }
    if planned.is_empty() {
        return Err(ReplError::NoEligibleSuffixes {
            op: EligibilityOp::Initialized,
        });
    }

    // A failed initialization is fatal for its suffix only; the rest of the
    // planned suffixes are still attempted before the failures surface.
    let policy = RetryPolicy::default();
    let mut failures = Vec::new();
    for (suffix, source_id) in planned {
        match initialize_suffix(dst_conn, &suffix, source_id, &policy).await {
            Ok(()) => outcomes.push((suffix, SuffixOutcome::Changed)),
            Err(e) => {
                warn!(suffix = %suffix, error = %e, "suffix initialization failed, continuing");
                failures.push((suffix, e));
            }
        }
    }
    if !failures.is_empty() {
        return Err(ReplError::InitFailures { failures });
    }
    Ok(OperationReport::from_outcomes(outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use dirrepl_connect::MemoryDirectory;

    fn task_server(outcomes: Vec<(&'static str, Option<&'static str>)>) -> MemoryDirectory {
        let dir = MemoryDirectory::new("dst", 1389, "secret");
        dir.seed(Entry::new(Dn::new(TASKS_DN)));
        let calls = Arc::new(AtomicU32::new(0));
        dir.set_task_hook(Arc::new(move |_entry| {
            let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
            let (state, failure) = outcomes[n.min(outcomes.len() - 1)];
            let mut attrs = vec![(ATTR_TASK_STATE.to_string(), state.to_string())];
            if let Some(code) = failure {
                attrs.push((ATTR_TASK_FAILURE_CODE.to_string(), code.to_string()));
            }
            attrs
        }));
        dir
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialization_retries_until_peer_appears() {
        let dir = task_server(vec![
            (TASK_STATE_STOPPED, Some(FAILURE_PEER_NOT_FOUND)),
            (TASK_STATE_STOPPED, Some(FAILURE_PEER_NOT_FOUND)),
            (TASK_STATE_COMPLETED, None),
        ]);
        let conn = dir.bind(&Dn::new("cn=Directory Manager"), "secret").unwrap();
        initialize_suffix(
            &conn,
            &Dn::new("dc=example,dc=com"),
            4,
            &RetryPolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(dir.entries_under(&Dn::new(TASKS_DN)).len(), 4); // root + 3 tasks
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausts() {
        let dir = task_server(vec![(TASK_STATE_STOPPED, Some(FAILURE_PEER_NOT_FOUND))]);
        let conn = dir.bind(&Dn::new("cn=Directory Manager"), "secret").unwrap();
        let err = initialize_suffix(
            &conn,
            &Dn::new("dc=example,dc=com"),
            4,
            &RetryPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReplError::InitRetriesExhausted { attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_failure_is_not_retried() {
        let dir = task_server(vec![(TASK_STATE_STOPPED, None)]);
        let conn = dir.bind(&Dn::new("cn=Directory Manager"), "secret").unwrap();
        let err = initialize_suffix(
            &conn,
            &Dn::new("dc=example,dc=com"),
            4,
            &RetryPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReplError::InitFailed { .. }));
        assert_eq!(dir.entries_under(&Dn::new(TASKS_DN)).len(), 2);
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_secs(3));
        assert_eq!(policy.delay_before(4), Duration::from_secs(12));
    }
}
