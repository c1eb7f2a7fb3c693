use crate::os::{MemoryListCommand, OsMemoryApi};
use std::collections::BTreeMap;
use std::time::Duration;

/// Commands issued by [`purge_standby_lists`], in order.
pub const PURGE_SEQUENCE: [MemoryListCommand; 3] = [
    MemoryListCommand::FlushModifiedList,
    MemoryListCommand::PurgeLowPriorityStandbyList,
    MemoryListCommand::PurgeStandbyList,
];

pub const DEFAULT_PURGE_PAUSE: Duration = Duration::from_millis(200);

/// Flush the modified page list and purge the standby lists system-wide.
///
/// Every command runs regardless of how the previous one ended, and each raw
/// status is recorded (`0` is success). Returns an empty map on platforms
/// without the facility. The effect only shows up in system-level telemetry.
pub fn purge_standby_lists(os: &dyn OsMemoryApi, pause: Duration) -> BTreeMap<String, i32> {
    let mut results = BTreeMap::new();
    for (index, command) in PURGE_SEQUENCE.iter().enumerate() {
        let Some(status) = os.memory_list_command(*command) else {
            tracing::debug!(
                target = "reclaim.memory",
                "standby list purge is not supported on this platform"
            );
            return BTreeMap::new();
        };
        tracing::info!(
            target = "reclaim.memory",
            command = command.name(),
            status = %format_status(status),
            "memory list command"
        );
        results.insert(command.name().to_owned(), status);
        if index + 1 < PURGE_SEQUENCE.len() && !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
    results
}

/// NTSTATUS-style rendering: `0xC0000061`.
pub fn format_status(status: i32) -> String {
    format!("0x{:08X}", status as u32)
}
