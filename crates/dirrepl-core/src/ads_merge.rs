//! Reconciling the administrative stores of two servers being wired
//! together.
//!
//! Exactly one server's registry ends up authoritative. The decision is a
//! pure function of what each server already holds, evaluated before any
//! write happens, so an unsupported merge never leaves a half-changed store
//! behind.

use tracing::info;

use dirrepl_ads::{AdsContext, ServerRegistration};
use dirrepl_connect::{DirectoryConnection, HostPort};

use crate::error::ReplError;
use crate::params::AdminCredentials;

/// What one endpoint's administrative store held when the operation began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdsState {
    /// Whether `cn=admin data` exists with its registry containers.
    pub has_admin_data: bool,
    /// Registered servers.
    pub registry_len: usize,
}

impl AdsState {
    /// A registry of one server (or none) carries no topology of its own and
    /// can always be absorbed.
    fn is_trivial(&self) -> bool {
        self.registry_len <= 1
    }
}

/// Which endpoint's registry is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsPlan {
    /// The first server's registry absorbs the second server.
    UseFirst,
    /// The second server's registry absorbs the first server.
    UseSecond,
    /// Neither server has administration data; a fresh store is created on
    /// the first server.
    CreateFresh,
}

impl AdsPlan {
    /// Decide which registry wins.
    ///
    /// When both servers carry a multi-server registry the stores describe
    /// two existing administration domains; unless they already belong to
    /// the same one (`already_shared`), merging is refused before anything
    /// is written.
    pub fn evaluate(
        first: AdsState,
        second: AdsState,
        already_shared: bool,
        server1: &HostPort,
        server2: &HostPort,
    ) -> Result<AdsPlan, ReplError> {
        match (first.has_admin_data, second.has_admin_data) {
            (false, false) => Ok(AdsPlan::CreateFresh),
            (true, false) => Ok(AdsPlan::UseFirst),
            (false, true) => Ok(AdsPlan::UseSecond),
            (true, true) if second.is_trivial() => Ok(AdsPlan::UseFirst),
            (true, true) if first.is_trivial() => Ok(AdsPlan::UseSecond),
            (true, true) if already_shared => Ok(AdsPlan::UseFirst),
            (true, true) => Err(ReplError::AdsMergeNotSupported {
                server1: server1.clone(),
                server2: server2.clone(),
            }),
        }
    }

    /// The authoritative endpoint, given the two in plan order.
    pub fn authoritative<'a, T>(&self, first: &'a T, second: &'a T) -> &'a T {
        match self {
            AdsPlan::UseSecond => second,
            AdsPlan::UseFirst | AdsPlan::CreateFresh => first,
        }
    }
}

/// Apply a plan: make sure both endpoints hold the admin-data skeleton and
/// the global administrator, then register both servers in the
/// authoritative registry. The non-authoritative registry is left alone; it
/// is overwritten when the administrative suffix is initialized from the
/// authoritative server.
pub async fn apply_plan(
    plan: AdsPlan,
    conn1: &dyn DirectoryConnection,
    conn2: &dyn DirectoryConnection,
    reg1: &ServerRegistration,
    reg2: &ServerRegistration,
    admin: &AdminCredentials,
) -> Result<(), ReplError> {
    let authoritative = *plan.authoritative(&conn1, &conn2);
    info!(
        authoritative = %authoritative.host_port(),
        "reconciling administration data"
    );

    for conn in [conn1, conn2] {
        let ads = AdsContext::new(conn);
        let update_err = |e| ReplError::UpdateAds {
            server: conn.host_port(),
            source: e,
        };
        ads.create_admin_data().await.map_err(update_err)?;
        if !ads.has_administrator().await.map_err(|e| ReplError::ReadAds {
            server: conn.host_port(),
            source: e,
        })? {
            ads.create_administrator(&admin.uid, &admin.password)
                .await
                .map_err(update_err)?;
        }
    }

    let ads = AdsContext::new(authoritative);
    for reg in [reg1, reg2] {
        ads.register_or_update_server(reg)
            .await
            .map_err(|e| ReplError::UpdateAds {
                server: authoritative.host_port(),
                source: e,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(has: bool, len: usize) -> AdsState {
        AdsState {
            has_admin_data: has,
            registry_len: len,
        }
    }

    fn eval(first: AdsState, second: AdsState, shared: bool) -> Result<AdsPlan, ReplError> {
        AdsPlan::evaluate(
            first,
            second,
            shared,
            &HostPort::new("s1", 1389),
            &HostPort::new("s2", 1389),
        )
    }

    #[test]
    fn test_fresh_pair_creates_store() {
        assert_eq!(eval(state(false, 0), state(false, 0), false).unwrap(), AdsPlan::CreateFresh);
    }

    #[test]
    fn test_single_store_wins() {
        assert_eq!(eval(state(true, 2), state(false, 0), false).unwrap(), AdsPlan::UseFirst);
        assert_eq!(eval(state(false, 0), state(true, 2), false).unwrap(), AdsPlan::UseSecond);
    }

    #[test]
    fn test_trivial_second_registry_is_absorbed_first() {
        // Both trivial: the second side is checked before the first.
        assert_eq!(eval(state(true, 1), state(true, 1), false).unwrap(), AdsPlan::UseFirst);
        assert_eq!(eval(state(true, 3), state(true, 1), false).unwrap(), AdsPlan::UseFirst);
        assert_eq!(eval(state(true, 1), state(true, 3), false).unwrap(), AdsPlan::UseSecond);
    }

    #[test]
    fn test_two_domains_refuse_to_merge() {
        let err = eval(state(true, 2), state(true, 3), false).unwrap_err();
        assert!(matches!(err, ReplError::AdsMergeNotSupported { .. }));
    }

    #[test]
    fn test_already_shared_domain_is_fine() {
        assert_eq!(eval(state(true, 3), state(true, 3), true).unwrap(), AdsPlan::UseFirst);
    }
}
