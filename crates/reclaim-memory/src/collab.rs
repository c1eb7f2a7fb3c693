//! Interfaces to the systems the cleaner drives but does not own.
//!
//! The host application (cached workloads, managed-heap collection) and the
//! accelerator runtime are optional. Availability is asked once when the
//! cleaner is built; an unavailable collaborator is never called again.

use crate::types::AcceleratorStat;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator is not available")]
    Unavailable,
    #[error("{0}")]
    Failed(String),
}

pub type CollabResult<T> = Result<T, CollaboratorError>;

/// Identifies the device the host should free memory on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Whatever the host considers its primary compute device.
    #[default]
    Default,
    Accelerator(u32),
}

/// The host application's cache lifecycle and managed runtime.
pub trait HostRuntime: Send + Sync {
    fn is_available(&self) -> bool;

    fn release_all_cached_workloads(&self) -> CollabResult<()>;

    fn soft_clear_cache(&self) -> CollabResult<()>;

    fn cleanup_model_patches(&self) -> CollabResult<()>;

    /// Ask the host to free `bytes_requested` on `device`; returns bytes freed.
    fn force_free(&self, bytes_requested: u64, device: Device) -> CollabResult<u64>;

    /// Run one managed-heap collection, returning the number of objects reclaimed.
    fn collect_garbage(&self) -> CollabResult<u64>;
}

/// The accelerator runtime's cache controls and counters.
pub trait Accelerator: Send + Sync {
    fn is_available(&self) -> bool;

    fn device_stats(&self) -> CollabResult<Vec<AcceleratorStat>>;

    fn empty_cache(&self) -> CollabResult<()>;

    fn ipc_collect(&self) -> CollabResult<()>;

    fn reset_peak_stats(&self, device_index: u32) -> CollabResult<()>;

    fn clear_workspace_caches(&self) -> CollabResult<()>;

    fn synchronize(&self) -> CollabResult<()>;
}

/// Stand-in used when no host application is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostRuntime for NullHost {
    fn is_available(&self) -> bool {
        false
    }

    fn release_all_cached_workloads(&self) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }

    fn soft_clear_cache(&self) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }

    fn cleanup_model_patches(&self) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }

    fn force_free(&self, _bytes_requested: u64, _device: Device) -> CollabResult<u64> {
        Err(CollaboratorError::Unavailable)
    }

    /// A native process has no managed heap; nothing to collect.
    fn collect_garbage(&self) -> CollabResult<u64> {
        Ok(0)
    }
}

/// Stand-in used when no accelerator runtime is present.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAccelerator;

impl Accelerator for NullAccelerator {
    fn is_available(&self) -> bool {
        false
    }

    fn device_stats(&self) -> CollabResult<Vec<AcceleratorStat>> {
        Ok(Vec::new())
    }

    fn empty_cache(&self) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }

    fn ipc_collect(&self) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }

    fn reset_peak_stats(&self, _device_index: u32) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }

    fn clear_workspace_caches(&self) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }

    fn synchronize(&self) -> CollabResult<()> {
        Err(CollaboratorError::Unavailable)
    }
}
