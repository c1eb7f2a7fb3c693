use serde::{Deserialize, Serialize};

pub const MB: u64 = 1024 * 1024;
pub const GB: u64 = 1024 * MB;

/// Point-in-time view of process and system memory.
///
/// Captured exactly twice per cleanup cycle (before and after); never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub process_resident_bytes: u64,
    pub process_memory_percent: f64,
    pub system_total_bytes: u64,
    pub system_used_bytes: u64,
    pub system_available_bytes: u64,
    pub system_used_percent: f64,
    /// One entry per detected accelerator; empty when there are none.
    #[serde(default)]
    pub accelerators: Vec<AcceleratorStat>,
}

impl MemorySnapshot {
    /// Build a snapshot from raw byte counts, deriving the percentages.
    pub fn from_bytes(
        process_resident_bytes: u64,
        system_total_bytes: u64,
        system_used_bytes: u64,
        system_available_bytes: u64,
    ) -> Self {
        Self {
            process_resident_bytes,
            process_memory_percent: percent_of(process_resident_bytes, system_total_bytes),
            system_total_bytes,
            system_used_bytes,
            system_available_bytes,
            system_used_percent: percent_of(system_used_bytes, system_total_bytes),
            accelerators: Vec::new(),
        }
    }

    pub fn with_accelerators(mut self, accelerators: Vec<AcceleratorStat>) -> Self {
        self.accelerators = accelerators;
        self
    }

    pub fn accelerator(&self, device_id: u32) -> Option<&AcceleratorStat> {
        self.accelerators
            .iter()
            .find(|stat| stat.device_id == device_id)
    }
}

/// Device-resident memory counters for a single accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorStat {
    pub device_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub allocated_bytes: u64,
    pub reserved_bytes: u64,
    pub total_bytes: u64,
}

impl AcceleratorStat {
    pub fn percent_allocated(&self) -> f64 {
        percent_of(self.allocated_bytes, self.total_bytes)
    }
}

/// Per-device change between two snapshots (positive means memory was released).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcceleratorDelta {
    pub device_id: u32,
    pub allocated_freed_bytes: i64,
    pub reserved_freed_bytes: i64,
}

/// One row of the system process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmdline: Vec<String>,
    pub resident_bytes: u64,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>, resident_bytes: u64) -> Self {
        Self {
            pid,
            name: name.into(),
            cmdline: Vec::new(),
            resident_bytes,
        }
    }

    pub fn with_cmdline<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmdline = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn joined_cmdline(&self) -> String {
        self.cmdline.join(" ")
    }
}

pub(crate) fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64) / (total as f64) * 100.0
}

/// Signed difference `before - after`, saturating at the `i64` range.
pub fn signed_delta(before: u64, after: u64) -> i64 {
    if before >= after {
        i64::try_from(before - after).unwrap_or(i64::MAX)
    } else {
        i64::try_from(after - before)
            .map(|value| -value)
            .unwrap_or(i64::MIN)
    }
}

/// Format a byte count as gigabytes with the given precision (`1.250 GB`).
pub fn format_gb(bytes: u64, precision: usize) -> String {
    format!("{:.*} GB", precision, bytes as f64 / GB as f64)
}

/// Signed variant of [`format_gb`] used for before/after deltas.
pub fn format_gb_signed(bytes: i64, precision: usize) -> String {
    format!("{:.*} GB", precision, bytes as f64 / GB as f64)
}
