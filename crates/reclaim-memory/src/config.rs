use crate::disk;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Knobs for one reclamation cycle.
///
/// Deserialized from the `[cleanup]` table of `reclaim.toml`; every field has
/// a default so a partial table is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReclamationConfig {
    /// Run the OS trim tiers at all.
    pub aggressive_trim: bool,
    /// Try to enable SeIncreaseQuotaPrivilege and SeDebugPrivilege.
    pub enable_privileges: bool,
    /// Flush the modified list and purge the standby lists (system-wide).
    pub purge_standby_lists: bool,
    /// Fall back to the out-of-process helper when the in-process trim frees nothing.
    pub use_external_helper: bool,
    /// Skip every trim tier when the system volume is low on free space.
    pub skip_trim_if_disk_low: bool,
    pub min_free_disk_gb: f64,
    /// Volume checked by the disk gate; the platform system volume when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_volume: Option<PathBuf>,
}

impl Default for ReclamationConfig {
    fn default() -> Self {
        Self {
            aggressive_trim: true,
            enable_privileges: true,
            purge_standby_lists: false,
            use_external_helper: true,
            skip_trim_if_disk_low: true,
            min_free_disk_gb: 20.0,
            system_volume: None,
        }
    }
}

impl ReclamationConfig {
    pub fn system_volume(&self) -> PathBuf {
        self.system_volume
            .clone()
            .unwrap_or_else(disk::system_volume)
    }
}
