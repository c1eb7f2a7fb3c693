//! The OS call layer.
//!
//! Every primitive the cleaner can issue goes through [`OsMemoryApi`], so the
//! orchestration logic can be exercised against a recording fake. Primitives
//! never panic or return `Err`; failures come back as tagged [`CallStatus`]
//! values carrying the OS error code.

use serde::Serialize;
use std::fmt;

/// Result of a single best-effort OS call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CallStatus {
    Succeeded,
    Failed { os_error: Option<i32> },
    /// The primitive does not exist on this platform.
    Unsupported,
}

impl CallStatus {
    pub fn succeeded(self) -> bool {
        matches!(self, CallStatus::Succeeded)
    }

    pub fn os_error(self) -> Option<i32> {
        match self {
            CallStatus::Failed { os_error } => os_error,
            _ => None,
        }
    }

    /// Map a Win32-style `BOOL` result, reading the error channel on failure.
    pub fn from_bool(ok: bool, last_error: impl FnOnce() -> i32) -> Self {
        if ok {
            CallStatus::Succeeded
        } else {
            CallStatus::Failed {
                os_error: Some(last_error()),
            }
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Succeeded => f.write_str("ok"),
            CallStatus::Failed {
                os_error: Some(code),
            } => write!(f, "failed (err {code})"),
            CallStatus::Failed { os_error: None } => f.write_str("failed"),
            CallStatus::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// Working-set and heap primitives, in the order they are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TrimPrimitive {
    /// Ask the OS to drop every page of the working set (`EmptyWorkingSet`).
    EmptyWorkingSet,
    /// Resize working-set bounds to `(-1, -1)`, forcing a trim.
    SetProcessWorkingSetSize,
    /// Compact the native process heap (`HeapCompact`).
    HeapCompact,
    /// Release free allocator pages back to the OS (`malloc_trim(0)`).
    MallocTrim,
}

impl TrimPrimitive {
    pub fn label(self) -> &'static str {
        match self {
            TrimPrimitive::EmptyWorkingSet => "EmptyWorkingSet",
            TrimPrimitive::SetProcessWorkingSetSize => "SetProcessWorkingSetSize",
            TrimPrimitive::HeapCompact => "HeapCompact",
            TrimPrimitive::MallocTrim => "malloc_trim",
        }
    }
}

impl fmt::Display for TrimPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Security privileges the later tiers depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Privilege {
    IncreaseQuota,
    Debug,
}

impl Privilege {
    pub const ALL: [Privilege; 2] = [Privilege::IncreaseQuota, Privilege::Debug];

    /// Platform name passed to `LookupPrivilegeValueW`.
    pub fn name(self) -> &'static str {
        match self {
            Privilege::IncreaseQuota => "SeIncreaseQuotaPrivilege",
            Privilege::Debug => "SeDebugPrivilege",
        }
    }
}

/// `SystemMemoryListInformation` commands used by the standby purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemoryListCommand {
    FlushModifiedList,
    PurgeStandbyList,
    PurgeLowPriorityStandbyList,
}

impl MemoryListCommand {
    /// Raw `SYSTEM_MEMORY_LIST_COMMAND` value.
    pub fn code(self) -> u32 {
        match self {
            MemoryListCommand::FlushModifiedList => 3,
            MemoryListCommand::PurgeStandbyList => 4,
            MemoryListCommand::PurgeLowPriorityStandbyList => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MemoryListCommand::FlushModifiedList => "FlushModifiedList",
            MemoryListCommand::PurgeStandbyList => "PurgeStandbyList",
            MemoryListCommand::PurgeLowPriorityStandbyList => "PurgeLowPriorityStandbyList",
        }
    }
}

/// A process the trim primitives can be aimed at.
///
/// Implementations owning an OS handle release it on drop, so a handle never
/// outlives the step that opened it.
pub trait TrimTarget {
    fn pid(&self) -> u32;

    /// Resident working set in bytes, or `None` when it cannot be read.
    fn working_set_bytes(&self) -> Option<u64>;

    fn invoke(&self, primitive: TrimPrimitive) -> CallStatus;
}

/// Error opening another process for trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    #[error("open failed (err {0})")]
    Os(i32),
    #[error("opening foreign processes is not supported on this platform")]
    Unsupported,
}

impl OpenError {
    pub fn os_error(self) -> Option<i32> {
        match self {
            OpenError::Os(code) => Some(code),
            OpenError::Unsupported => None,
        }
    }
}

/// OS-level capabilities used by the cleaner and the helper process.
pub trait OsMemoryApi: Send + Sync {
    /// The primitives meaningful against the current process on this platform,
    /// in issue order. Empty on platforms without any.
    fn in_process_primitives(&self) -> &'static [TrimPrimitive];

    /// The primitives the helper issues against a foreign process handle.
    fn foreign_primitives(&self) -> &'static [TrimPrimitive] {
        &[
            TrimPrimitive::EmptyWorkingSet,
            TrimPrimitive::SetProcessWorkingSetSize,
        ]
    }

    fn current_process(&self) -> Box<dyn TrimTarget + '_>;

    /// Open `pid` with the access rights needed for quota and query calls.
    fn open_process(&self, pid: u32) -> Result<Box<dyn TrimTarget + '_>, OpenError>;

    /// Enable `privilege` on the current process token.
    ///
    /// Returns `false` on platforms without a privilege model.
    fn enable_privilege(&self, privilege: Privilege) -> bool;

    /// Issue a system memory-list command, returning the raw status code, or
    /// `None` when the facility does not exist on this platform.
    fn memory_list_command(&self, command: MemoryListCommand) -> Option<i32>;

    /// Whether trimming a working set pushes pages into a page file that can
    /// grow. The free-space gate is only consulted when it does.
    fn trim_grows_page_file(&self) -> bool {
        true
    }
}
