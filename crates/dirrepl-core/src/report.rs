//! What an operation did, suffix by suffix.

use serde::{Deserialize, Serialize};

use dirrepl_connect::Dn;

use crate::error::ReturnCode;

/// What happened to one suffix during an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuffixOutcome {
    /// The suffix's replication state was changed.
    Changed,
    /// The suffix was already in the requested state.
    Unchanged,
    /// The suffix was dropped by the eligibility checks and the operation
    /// went on without it. Carries the reason.
    Skipped(String),
}

/// The result of one control-plane operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationReport {
    /// Overall outcome.
    pub code: ReturnCode,
    /// Per-suffix outcomes, in the order the suffixes were processed.
    pub suffixes: Vec<(Dn, SuffixOutcome)>,
}

impl OperationReport {
    /// Build a report from per-suffix outcomes: [`ReturnCode::SuccessfulNop`]
    /// when every suffix was already in the requested state.
    pub fn from_outcomes(suffixes: Vec<(Dn, SuffixOutcome)>) -> Self {
        let code = if suffixes.iter().any(|(_, o)| *o == SuffixOutcome::Changed) {
            ReturnCode::Successful
        } else {
            ReturnCode::SuccessfulNop
        };
        Self { code, suffixes }
    }

    /// The outcome recorded for a suffix, if it was processed.
    pub fn outcome(&self, dn: &Dn) -> Option<&SuffixOutcome> {
        self.suffixes.iter().find(|(d, _)| d == dn).map(|(_, o)| o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_unchanged_is_nop() {
        let report = OperationReport::from_outcomes(vec![
            (Dn::new("dc=example,dc=com"), SuffixOutcome::Unchanged),
            (Dn::new("cn=admin data"), SuffixOutcome::Unchanged),
        ]);
        assert_eq!(report.code, ReturnCode::SuccessfulNop);
    }

    #[test]
    fn test_skipped_suffixes_do_not_count_as_changes() {
        let report = OperationReport::from_outcomes(vec![
            (
                Dn::new("dc=absent"),
                SuffixOutcome::Skipped("no backend hosts the suffix".into()),
            ),
            (Dn::new("cn=admin data"), SuffixOutcome::Unchanged),
        ]);
        assert_eq!(report.code, ReturnCode::SuccessfulNop);
    }

    #[test]
    fn test_one_change_is_successful() {
        let report = OperationReport::from_outcomes(vec![
            (Dn::new("dc=example,dc=com"), SuffixOutcome::Changed),
            (Dn::new("cn=admin data"), SuffixOutcome::Unchanged),
        ]);
        assert_eq!(report.code, ReturnCode::Successful);
        assert_eq!(
            report.outcome(&Dn::new("DC=Example,DC=Com")),
            Some(&SuffixOutcome::Changed)
        );
    }
}
