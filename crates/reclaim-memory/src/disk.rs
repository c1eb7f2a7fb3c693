//! Free-space gate in front of the aggressive trim tier.
//!
//! Emptying a working set pushes dirty pages out to the page file / swap. When
//! the system volume is nearly full that growth can fail badly, so the trim
//! tiers are skipped below a configured free-space threshold.

use crate::types::GB;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Source of free-space figures.
pub trait DiskSpace: Send + Sync {
    /// Free bytes available on the volume holding `path`, if it can be read.
    fn free_bytes(&self, path: &Path) -> Option<u64>;
}

/// [`DiskSpace`] backed by `sysinfo`'s disk list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDisks;

impl DiskSpace for SystemDisks {
    fn free_bytes(&self, path: &Path) -> Option<u64> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let mounts: Vec<(PathBuf, u64)> = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()))
            .collect();
        let free = free_bytes_for(&mounts, path);
        if free.is_none() {
            tracing::debug!(
                target = "reclaim.memory",
                path = %path.display(),
                disks = mounts.len(),
                "no mounted volume matches path"
            );
        }
        free
    }
}

/// Pick the mount point that is the longest prefix of `path`.
pub fn free_bytes_for(mounts: &[(PathBuf, u64)], path: &Path) -> Option<u64> {
    mounts
        .iter()
        .filter(|(mount, _)| path.starts_with(mount) || same_volume(mount, path))
        .max_by_key(|(mount, _)| mount.as_os_str().len())
        .map(|(_, free)| *free)
}

// Drive letters compare case-insensitively (`c:\` vs `C:\`).
fn same_volume(mount: &Path, path: &Path) -> bool {
    let mount = mount.to_string_lossy();
    let path = path.to_string_lossy();
    mount.len() >= 2
        && mount.as_bytes()[1] == b':'
        && path.is_char_boundary(mount.len())
        && path[..mount.len()].eq_ignore_ascii_case(&mount)
}

/// The volume the OS pages to: `%SystemDrive%\` on Windows, `/` elsewhere.
pub fn system_volume() -> PathBuf {
    if cfg!(windows) {
        let drive = std::env::var("SystemDrive")
            .ok()
            .filter(|drive| !drive.trim().is_empty())
            .unwrap_or_else(|| "C:".to_owned());
        PathBuf::from(format!("{}\\", drive.trim_end_matches('\\')))
    } else {
        PathBuf::from("/")
    }
}

/// Outcome of consulting the gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum GateDecision {
    /// Aggressive trimming was off, so the gate was never consulted.
    NotRequested,
    /// Trimming on this platform cannot grow a page file.
    NotApplicable,
    /// The gate is turned off by configuration.
    Disabled,
    /// Free space could not be read; the gate fails open.
    Unknown,
    Allowed { free_bytes: u64 },
    LowDisk { free_bytes: u64, min_free_gb: f64 },
}

impl GateDecision {
    pub fn allows_trim(&self) -> bool {
        !matches!(self, GateDecision::LowDisk { .. })
    }
}

/// Decide whether trimming is safe given the free space on `path`.
pub fn check(disks: &dyn DiskSpace, path: &Path, min_free_gb: f64, enabled: bool) -> GateDecision {
    if !enabled {
        return GateDecision::Disabled;
    }
    let Some(free_bytes) = disks.free_bytes(path) else {
        return GateDecision::Unknown;
    };
    let free_gb = free_bytes as f64 / GB as f64;
    if free_gb < min_free_gb {
        GateDecision::LowDisk {
            free_bytes,
            min_free_gb,
        }
    } else {
        GateDecision::Allowed { free_bytes }
    }
}

/// Boolean view of [`check`].
pub fn can_trim(disks: &dyn DiskSpace, path: &Path, min_free_gb: f64, enabled: bool) -> bool {
    check(disks, path, min_free_gb, enabled).allows_trim()
}
