use crate::os::{OsMemoryApi, Privilege};
use serde::Serialize;

/// Whether a privilege ended up enabled on the current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrivilegeState {
    pub privilege: Privilege,
    pub enabled: bool,
}

impl PrivilegeState {
    pub fn name(&self) -> &'static str {
        self.privilege.name()
    }
}

/// Try to enable every privilege the trim tiers use.
///
/// Each privilege succeeds or fails on its own; nothing here is fatal. There is
/// no revocation step, the grant dies with the process.
pub fn elevate_all(os: &dyn OsMemoryApi) -> Vec<PrivilegeState> {
    Privilege::ALL
        .iter()
        .map(|&privilege| {
            let enabled = os.enable_privilege(privilege);
            tracing::debug!(
                target = "reclaim.memory",
                privilege = privilege.name(),
                enabled,
                "privilege elevation"
            );
            PrivilegeState { privilege, enabled }
        })
        .collect()
}

/// `SeIncreaseQuotaPrivilege=OK, SeDebugPrivilege=NO`
pub fn summarize(states: &[PrivilegeState]) -> String {
    states
        .iter()
        .map(|state| {
            format!(
                "{}={}",
                state.name(),
                if state.enabled { "OK" } else { "NO" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
