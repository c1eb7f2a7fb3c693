//! Recording collaborators shared by the cleaner tests.
//!
//! Every fake appends to one [`Journal`] so a test can assert on the global
//! order of calls across the host, accelerator, OS layer and probe.

use reclaim_memory::{
    Accelerator, AcceleratorStat, CallStatus, Capabilities, CollabResult, CollaboratorError,
    Device, DiskSpace, HelperInvocationResult, HelperLauncher, HostRuntime, MemoryCleaner,
    MemoryListCommand, MemoryProbe, MemorySnapshot, OpenError, OsMemoryApi, Pauses, Privilege,
    TrimPrimitive, TrimTarget, GB,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

pub struct FakeHost {
    pub journal: Journal,
    pub available: bool,
    pub gc_counts: Mutex<VecDeque<u64>>,
    pub fail_release: bool,
}

impl FakeHost {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            available: true,
            gc_counts: Mutex::new(VecDeque::new()),
            fail_release: false,
        }
    }

    pub fn with_gc_counts(self, counts: &[u64]) -> Self {
        *self.gc_counts.lock().unwrap() = counts.iter().copied().collect();
        self
    }
}

impl HostRuntime for FakeHost {
    fn is_available(&self) -> bool {
        self.available
    }

    fn release_all_cached_workloads(&self) -> CollabResult<()> {
        self.journal.push("host:release_all");
        if self.fail_release {
            return Err(CollaboratorError::Failed("release refused".into()));
        }
        Ok(())
    }

    fn soft_clear_cache(&self) -> CollabResult<()> {
        self.journal.push("host:soft_clear");
        Ok(())
    }

    fn cleanup_model_patches(&self) -> CollabResult<()> {
        self.journal.push("host:cleanup_patches");
        Ok(())
    }

    fn force_free(&self, bytes_requested: u64, device: Device) -> CollabResult<u64> {
        assert_eq!(device, Device::Default);
        self.journal.push(format!("host:force_free:{}", bytes_requested / GB));
        Ok(0)
    }

    fn collect_garbage(&self) -> CollabResult<u64> {
        self.journal.push("host:gc");
        Ok(self.gc_counts.lock().unwrap().pop_front().unwrap_or(0))
    }
}

/// Host whose every call panics.
pub struct PanickingHost;

impl HostRuntime for PanickingHost {
    fn is_available(&self) -> bool {
        true
    }

    fn release_all_cached_workloads(&self) -> CollabResult<()> {
        panic!("host exploded")
    }

    fn soft_clear_cache(&self) -> CollabResult<()> {
        panic!("host exploded")
    }

    fn cleanup_model_patches(&self) -> CollabResult<()> {
        panic!("host exploded")
    }

    fn force_free(&self, _bytes_requested: u64, _device: Device) -> CollabResult<u64> {
        panic!("host exploded")
    }

    fn collect_garbage(&self) -> CollabResult<u64> {
        panic!("gc exploded")
    }
}

pub struct FakeAccelerator {
    pub journal: Journal,
    pub devices: Vec<u32>,
    pub fail_everything: bool,
}

impl FakeAccelerator {
    pub fn new(journal: &Journal, devices: &[u32]) -> Self {
        Self {
            journal: journal.clone(),
            devices: devices.to_vec(),
            fail_everything: false,
        }
    }

    fn record(&self, entry: impl Into<String>) -> CollabResult<()> {
        self.journal.push(entry);
        if self.fail_everything {
            Err(CollaboratorError::Failed("driver error".into()))
        } else {
            Ok(())
        }
    }
}

impl Accelerator for FakeAccelerator {
    fn is_available(&self) -> bool {
        true
    }

    fn device_stats(&self) -> CollabResult<Vec<AcceleratorStat>> {
        Ok(self
            .devices
            .iter()
            .map(|&device_id| AcceleratorStat {
                device_id,
                name: None,
                allocated_bytes: GB,
                reserved_bytes: 2 * GB,
                total_bytes: 8 * GB,
            })
            .collect())
    }

    fn empty_cache(&self) -> CollabResult<()> {
        self.record("accel:empty_cache")
    }

    fn ipc_collect(&self) -> CollabResult<()> {
        self.record("accel:ipc_collect")
    }

    fn reset_peak_stats(&self, device_index: u32) -> CollabResult<()> {
        self.record(format!("accel:reset_peak_stats:{device_index}"))
    }

    fn clear_workspace_caches(&self) -> CollabResult<()> {
        self.record("accel:clear_workspaces")
    }

    fn synchronize(&self) -> CollabResult<()> {
        self.record("accel:synchronize")
    }
}

const TWO_PRIMITIVES: &[TrimPrimitive] = &[
    TrimPrimitive::EmptyWorkingSet,
    TrimPrimitive::SetProcessWorkingSetSize,
];

/// OS layer whose trim calls shrink a simulated working set.
pub struct FakeOs {
    pub journal: Journal,
    pub working_set: Mutex<u64>,
    /// Bytes each successful call removes from the working set.
    pub shrink_by: u64,
    pub calls_succeed: bool,
    pub open_succeeds: bool,
    pub grows_page_file: bool,
    pub list_statuses: Mutex<VecDeque<i32>>,
}

impl FakeOs {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            working_set: Mutex::new(4 * GB),
            shrink_by: 0,
            calls_succeed: true,
            open_succeeds: false,
            grows_page_file: true,
            list_statuses: Mutex::new(VecDeque::new()),
        }
    }

    /// Calls succeed and each one frees `bytes`.
    pub fn freeing(journal: &Journal, bytes: u64) -> Self {
        Self {
            shrink_by: bytes,
            ..Self::new(journal)
        }
    }

    /// Behave like an allocator-level trim that never touches a page file.
    pub fn without_page_file(mut self) -> Self {
        self.grows_page_file = false;
        self
    }

    pub fn with_list_statuses(self, statuses: &[i32]) -> Self {
        *self.list_statuses.lock().unwrap() = statuses.iter().copied().collect();
        self
    }
}

struct FakeTarget<'a> {
    os: &'a FakeOs,
}

impl TrimTarget for FakeTarget<'_> {
    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn working_set_bytes(&self) -> Option<u64> {
        Some(*self.os.working_set.lock().unwrap())
    }

    fn invoke(&self, primitive: TrimPrimitive) -> CallStatus {
        self.os.journal.push(format!("trim:{}", primitive.label()));
        if !self.os.calls_succeed {
            return CallStatus::Failed { os_error: Some(5) };
        }
        let mut working_set = self.os.working_set.lock().unwrap();
        *working_set = working_set.saturating_sub(self.os.shrink_by);
        CallStatus::Succeeded
    }
}

impl OsMemoryApi for FakeOs {
    fn in_process_primitives(&self) -> &'static [TrimPrimitive] {
        TWO_PRIMITIVES
    }

    fn current_process(&self) -> Box<dyn TrimTarget + '_> {
        Box::new(FakeTarget { os: self })
    }

    fn open_process(&self, pid: u32) -> Result<Box<dyn TrimTarget + '_>, OpenError> {
        self.journal.push(format!("os:open:{pid}"));
        if !self.open_succeeds {
            return Err(OpenError::Os(5));
        }
        Ok(Box::new(FakeTarget { os: self }))
    }

    fn enable_privilege(&self, privilege: Privilege) -> bool {
        self.journal.push(format!("os:privilege:{}", privilege.name()));
        privilege == Privilege::IncreaseQuota
    }

    fn memory_list_command(&self, command: MemoryListCommand) -> Option<i32> {
        self.journal.push(format!("os:list:{}", command.code()));
        Some(self.list_statuses.lock().unwrap().pop_front().unwrap_or(0))
    }

    fn trim_grows_page_file(&self) -> bool {
        self.grows_page_file
    }
}

pub struct FakeProbe {
    pub journal: Journal,
}

impl MemoryProbe for FakeProbe {
    fn capture(&self) -> MemorySnapshot {
        self.journal.push("capture");
        MemorySnapshot::from_bytes(2 * GB, 32 * GB, 16 * GB, 16 * GB)
    }
}

pub struct FixedDisk {
    pub journal: Journal,
    pub free_bytes: Option<u64>,
}

impl DiskSpace for FixedDisk {
    fn free_bytes(&self, _path: &Path) -> Option<u64> {
        self.journal.push("disk:query");
        self.free_bytes
    }
}

pub struct FakeHelper {
    pub journal: Journal,
    pub freed_bytes: Option<u64>,
}

impl HelperLauncher for FakeHelper {
    fn trim_process(&self, pid: u32) -> Option<HelperInvocationResult> {
        self.journal.push("helper:trim");
        let freed = self.freed_bytes?;
        Some(HelperInvocationResult::measured(pid, Vec::new(), 2 * freed, freed))
    }
}

/// All fakes wired to one journal; tweak fields before calling [`Rig::build`].
pub struct Rig {
    pub journal: Journal,
    pub host: Arc<dyn HostRuntime>,
    pub accelerator: Arc<dyn Accelerator>,
    pub os: Arc<FakeOs>,
    pub disk_free_bytes: Option<u64>,
    pub helper: Option<Arc<dyn HelperLauncher>>,
}

impl Rig {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            host: Arc::new(FakeHost::new(&journal)),
            accelerator: Arc::new(FakeAccelerator::new(&journal, &[0, 1])),
            os: Arc::new(FakeOs::freeing(&journal, 64 * 1024 * 1024)),
            disk_free_bytes: Some(100 * GB),
            helper: None,
            journal,
        }
    }

    pub fn build(&self) -> MemoryCleaner {
        let caps = Capabilities {
            host: self.host.clone(),
            accelerator: self.accelerator.clone(),
            os: self.os.clone(),
            probe: Arc::new(FakeProbe {
                journal: self.journal.clone(),
            }),
            disks: Arc::new(FixedDisk {
                journal: self.journal.clone(),
                free_bytes: self.disk_free_bytes,
            }),
            helper: self.helper.clone(),
        };
        MemoryCleaner::new(caps).with_pauses(Pauses::none())
    }
}
