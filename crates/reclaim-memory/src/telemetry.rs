use crate::collab::Accelerator;
use crate::process;
use crate::types::{MemorySnapshot, ProcessInfo};
use std::sync::Arc;

/// Read-only memory telemetry.
///
/// `capture` never fails: an optional sub-metric that cannot be read is
/// omitted from the snapshot instead.
pub trait MemoryProbe: Send + Sync {
    fn capture(&self) -> MemorySnapshot;
}

/// [`MemoryProbe`] reading the live system through `sysinfo`.
pub struct SystemProbe {
    /// `None` when the accelerator was unavailable at construction.
    accelerator: Option<Arc<dyn Accelerator>>,
}

impl SystemProbe {
    pub fn new(accelerator: Arc<dyn Accelerator>) -> Self {
        let accelerator = accelerator.is_available().then_some(accelerator);
        Self { accelerator }
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe")
            .field("accelerator", &self.accelerator.is_some())
            .finish()
    }
}

impl MemoryProbe for SystemProbe {
    fn capture(&self) -> MemorySnapshot {
        let mut system = sysinfo::System::new();
        system.refresh_memory();

        let pid = std::process::id();
        let sys_pid = sysinfo::Pid::from_u32(pid);
        // The OS-reported working set; `sysinfo` reads the same counter the
        // trimmer measures, so before/after deltas line up.
        let resident = if system.refresh_process(sys_pid) {
            system.process(sys_pid).map(|process| process.memory())
        } else {
            None
        }
        .or_else(process::current_rss_bytes)
        .unwrap_or(0);

        let stats = self
            .accelerator
            .as_ref()
            .map_or(Ok(Vec::new()), |accelerator| accelerator.device_stats());
        let accelerators = match stats {
            Ok(stats) => stats,
            Err(err) => {
                tracing::debug!(
                    target = "reclaim.memory",
                    error = %err,
                    "accelerator stats unavailable; omitting from snapshot"
                );
                Vec::new()
            }
        };

        MemorySnapshot::from_bytes(
            resident,
            system.total_memory(),
            system.used_memory(),
            system.available_memory(),
        )
        .with_accelerators(accelerators)
    }
}

/// The `limit` processes with the largest resident memory.
pub fn top_processes(limit: usize) -> Vec<ProcessInfo> {
    process::top_by_resident(process::list_processes(), limit)
}
