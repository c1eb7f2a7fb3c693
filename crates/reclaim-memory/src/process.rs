use crate::types::ProcessInfo;

/// Resident set size of the current process, straight from the kernel.
///
/// Only implemented on Linux (`VmRSS` in `/proc/self/status`); other platforms
/// measure through their native API or `sysinfo`.
pub fn current_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(err) => {
                // `/proc` may be missing in some sandboxes; only log unexpected errors.
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(
                        target = "reclaim.memory",
                        error = %err,
                        "failed to read /proc/self/status while sampling rss"
                    );
                }
                return None;
            }
        };
        parse_vm_rss(&status)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Extract `VmRSS` (reported in kB) from `/proc/<pid>/status` contents.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    for line in status.lines() {
        let Some(rest) = line.trim_start().strip_prefix("VmRSS:") else {
            continue;
        };
        let kb = rest.split_whitespace().next()?;
        return match kb.parse::<u64>() {
            Ok(kb) => Some(kb.saturating_mul(1024)),
            Err(err) => {
                static REPORTED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
                if REPORTED.set(()).is_ok() {
                    tracing::debug!(
                        target = "reclaim.memory",
                        value = kb,
                        error = %err,
                        "failed to parse VmRSS"
                    );
                }
                None
            }
        };
    }
    None
}

/// Snapshot of the system process table.
///
/// Rows whose memory cannot be read report zero resident bytes rather than
/// failing the whole listing.
pub fn list_processes() -> Vec<ProcessInfo> {
    let mut system = sysinfo::System::new();
    system.refresh_processes();
    system
        .processes()
        .values()
        .map(|process| ProcessInfo {
            pid: process.pid().as_u32(),
            name: process.name().to_string(),
            cmdline: process.cmd().to_vec(),
            resident_bytes: process.memory(),
        })
        .collect()
}

/// Look up a single process by pid.
pub fn find_process(pid: u32) -> Option<ProcessInfo> {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = sysinfo::System::new();
    if !system.refresh_process(pid) {
        return None;
    }
    system.process(pid).map(|process| ProcessInfo {
        pid: process.pid().as_u32(),
        name: process.name().to_string(),
        cmdline: process.cmd().to_vec(),
        resident_bytes: process.memory(),
    })
}

/// The `limit` largest processes by resident memory, largest first.
pub fn top_by_resident(mut processes: Vec<ProcessInfo>, limit: usize) -> Vec<ProcessInfo> {
    processes.retain(|process| process.resident_bytes > 0);
    processes.sort_by(|a, b| {
        b.resident_bytes
            .cmp(&a.resident_bytes)
            .then_with(|| a.pid.cmp(&b.pid))
    });
    processes.truncate(limit);
    processes
}
