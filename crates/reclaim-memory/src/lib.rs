//! Tiered process memory reclamation.
//!
//! A [`MemoryCleaner`] asks the host application and accelerator runtime to
//! drop what they cache, runs managed-heap collection, and then coerces the OS
//! into taking freed pages back: first from inside the process, then through
//! the `reclaim-trim-target` helper, then by a final unmeasured attempt. Every
//! tier is best-effort; a cycle always completes with before/after telemetry.

mod cleaner;
mod collab;
mod config;
mod disk;
mod helper;
mod native;
mod os;
mod privileges;
mod process;
mod protocol;
mod report;
mod stage;
mod standby;
mod target;
mod telemetry;
mod trimmer;
mod types;

pub use cleaner::{Capabilities, MemoryCleaner, Pauses, FORCE_FREE_REQUEST_BYTES, GC_PASSES};
pub use collab::{
    Accelerator, CollabResult, CollaboratorError, Device, HostRuntime, NullAccelerator, NullHost,
};
pub use config::ReclamationConfig;
pub use disk::{can_trim, check as check_disk, system_volume, DiskSpace, GateDecision, SystemDisks};
pub use helper::{
    exit as helper_exit, exit_code as helper_exit_code, trim_target, trim_target_default,
    HelperLauncher, SubprocessHelper, DEFAULT_HELPER_TIMEOUT, HELPER_BINARY,
};
pub use native::NativeOs;
pub use os::{
    CallStatus, MemoryListCommand, OpenError, OsMemoryApi, Privilege, TrimPrimitive, TrimTarget,
};
pub use privileges::{elevate_all, PrivilegeState};
pub use process::{current_rss_bytes, find_process, list_processes};
pub use protocol::{
    HelperInvocationResult, HelperStep, OutputFormat, ProtocolError, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};
pub use report::{
    format_process_table, format_snapshot, status_text, CleanupReport, HelperTier, StepOutcome,
    StepRecord, TrimReport,
};
pub use stage::{CleanupStage, StatusStage};
pub use standby::{format_status, purge_standby_lists, DEFAULT_PURGE_PAUSE, PURGE_SEQUENCE};
pub use target::{select_target, Selection, TargetError, TargetRequest, TargetRule};
pub use telemetry::{top_processes, MemoryProbe, SystemProbe};
pub use trimmer::{issue_all, InProcessTrimmer, TrimOutcome, TrimStepResult, DEFAULT_SETTLE};
pub use types::{
    format_gb, AcceleratorDelta, AcceleratorStat, MemorySnapshot, ProcessInfo, GB, MB,
};

/// Parsing and rendering of the helper's stdout.
pub mod wire {
    pub use crate::protocol::{parse, parse_machine, parse_quantity, parse_text};
}
