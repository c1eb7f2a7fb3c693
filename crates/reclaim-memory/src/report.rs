use crate::disk::GateDecision;
use crate::privileges::PrivilegeState;
use crate::trimmer::TrimOutcome;
use crate::types::{
    format_gb, format_gb_signed, signed_delta, AcceleratorDelta, MemorySnapshot, ProcessInfo, GB,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

const RULE_WIDTH: usize = 70;

/// How a single orchestrator step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepOutcome {
    Completed,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

impl StepRecord {
    pub fn completed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Completed,
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Failed { .. })
    }
}

/// What the out-of-process tier did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "freed_bytes")]
pub enum HelperTier {
    NotAttempted,
    Freed(u64),
    Unavailable,
}

/// Which trim tiers ran and what they reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrimReport {
    pub gate: GateDecision,
    pub in_process: Option<TrimOutcome>,
    pub helper: HelperTier,
    /// The unmeasured second issue of the in-process primitives ran.
    pub best_effort: bool,
}

impl Default for TrimReport {
    fn default() -> Self {
        Self {
            gate: GateDecision::NotRequested,
            in_process: None,
            helper: HelperTier::NotAttempted,
            best_effort: false,
        }
    }
}

impl TrimReport {
    /// Whether any trim tier actually ran.
    pub fn was_attempted(&self) -> bool {
        self.in_process.is_some() || self.helper != HelperTier::NotAttempted || self.best_effort
    }

    /// Bytes reported freed by whichever measured tier succeeded.
    pub fn freed_bytes(&self) -> Option<u64> {
        self.in_process
            .as_ref()
            .and_then(|outcome| outcome.freed_bytes)
            .or(match self.helper {
                HelperTier::Freed(bytes) => Some(bytes),
                _ => None,
            })
    }
}

/// Everything one reclamation cycle observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub before: MemorySnapshot,
    pub after: MemorySnapshot,
    pub steps: Vec<StepRecord>,
    pub privileges: Vec<PrivilegeState>,
    /// Objects collected by each of the three managed-heap passes.
    pub gc_passes: Vec<u64>,
    pub final_gc_collected: u64,
    pub trim: TrimReport,
    /// Raw status per memory-list command; `None` when the purge was not requested.
    pub standby: Option<BTreeMap<String, i32>>,
}

impl CleanupReport {
    /// `before - after` of the process working set. Negative when it grew.
    pub fn process_ram_freed_bytes(&self) -> i64 {
        signed_delta(
            self.before.process_resident_bytes,
            self.after.process_resident_bytes,
        )
    }

    pub fn system_ram_freed_bytes(&self) -> i64 {
        signed_delta(self.before.system_used_bytes, self.after.system_used_bytes)
    }

    pub fn available_increase_bytes(&self) -> i64 {
        signed_delta(
            self.after.system_available_bytes,
            self.before.system_available_bytes,
        )
    }

    pub fn system_freed_percent(&self) -> f64 {
        if self.before.system_total_bytes == 0 {
            return 0.0;
        }
        self.system_ram_freed_bytes() as f64 / self.before.system_total_bytes as f64 * 100.0
    }

    /// Objects collected over all passes, the final one included.
    pub fn total_collected(&self) -> u64 {
        self.gc_passes
            .iter()
            .fold(self.final_gc_collected, |acc, count| acc.saturating_add(*count))
    }

    /// Per-device change for devices present in both snapshots.
    pub fn accelerator_deltas(&self) -> Vec<AcceleratorDelta> {
        self.before
            .accelerators
            .iter()
            .filter_map(|before| {
                let after = self.after.accelerator(before.device_id)?;
                Some(AcceleratorDelta {
                    device_id: before.device_id,
                    allocated_freed_bytes: signed_delta(
                        before.allocated_bytes,
                        after.allocated_bytes,
                    ),
                    reserved_freed_bytes: signed_delta(before.reserved_bytes, after.reserved_bytes),
                })
            })
            .collect()
    }

    pub fn freed_anything(&self) -> bool {
        self.process_ram_freed_bytes() > 0 || self.system_ram_freed_bytes() > 0
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_snapshot("BEFORE CLEANUP", &self.before))?;

        writeln!(f, "STEPS")?;
        for step in &self.steps {
            match &step.outcome {
                StepOutcome::Completed => writeln!(f, "  [ok]   {}", step.name)?,
                StepOutcome::Skipped { reason } => {
                    writeln!(f, "  [skip] {}: {reason}", step.name)?
                }
                StepOutcome::Failed { error } => writeln!(f, "  [fail] {}: {error}", step.name)?,
            }
        }
        if !self.privileges.is_empty() {
            writeln!(
                f,
                "  Privileges: {}",
                crate::privileges::summarize(&self.privileges)
            )?;
        }
        writeln!(f)?;

        if self.trim.was_attempted() {
            write_trim(f, &self.trim)?;
            writeln!(f)?;
        }

        f.write_str(&format_snapshot("AFTER CLEANUP", &self.after))?;

        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "CLEANUP RESULTS")?;
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "  Process RAM freed: {}",
            format_gb_signed(self.process_ram_freed_bytes(), 3)
        )?;
        writeln!(
            f,
            "  System RAM freed: {} ({:.2}% of total)",
            format_gb_signed(self.system_ram_freed_bytes(), 3),
            self.system_freed_percent()
        )?;
        writeln!(
            f,
            "  System Available increased: {}",
            format_gb_signed(self.available_increase_bytes(), 3)
        )?;
        writeln!(f, "  Objects collected: {}", self.total_collected())?;
        for delta in self.accelerator_deltas() {
            writeln!(
                f,
                "  GPU {} freed: {} (allocated), {} (reserved)",
                delta.device_id,
                format_gb_signed(delta.allocated_freed_bytes, 3),
                format_gb_signed(delta.reserved_freed_bytes, 3)
            )?;
        }
        if let Some(standby) = &self.standby {
            for (command, status) in standby {
                writeln!(
                    f,
                    "  {command}: {}",
                    crate::standby::format_status(*status)
                )?;
            }
        }
        writeln!(f, "{rule}")?;

        if self.freed_anything() {
            writeln!(f, "RAM cleanup completed.")
        } else {
            writeln!(
                f,
                "Warning: no significant RAM freed. Memory may be actively used."
            )
        }
    }
}

fn write_trim(f: &mut fmt::Formatter<'_>, trim: &TrimReport) -> fmt::Result {
    writeln!(f, "TRIM")?;
    if let Some(outcome) = &trim.in_process {
        writeln!(
            f,
            "  In-process: {} -> {}",
            format_gb(outcome.before_bytes, 3),
            format_gb(outcome.after_bytes, 3)
        )?;
        for step in &outcome.steps {
            writeln!(f, "    {}: {}", step.step.label(), step.status())?;
        }
        match outcome.freed_bytes {
            Some(freed) => writeln!(f, "  In-process freed: {}", format_gb(freed, 3))?,
            None => writeln!(f, "  In-process freed: nothing measurable")?,
        }
    }
    match trim.helper {
        HelperTier::NotAttempted => {}
        HelperTier::Freed(freed) => {
            writeln!(f, "  External helper freed: {}", format_gb(freed, 3))?
        }
        HelperTier::Unavailable => writeln!(f, "  External helper: unavailable")?,
    }
    if trim.best_effort {
        writeln!(f, "  Best-effort trim: issued")?;
    }
    Ok(())
}

/// Titled block describing one snapshot.
pub fn format_snapshot(title: &str, snapshot: &MemorySnapshot) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "{title:^width$}", width = RULE_WIDTH);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "  Process RAM: {} ({:.2}%)",
        format_gb(snapshot.process_resident_bytes, 3),
        snapshot.process_memory_percent
    );
    let _ = writeln!(
        out,
        "  System Total: {}",
        format_gb(snapshot.system_total_bytes, 2)
    );
    let _ = writeln!(
        out,
        "  System Used: {} ({:.1}%)",
        format_gb(snapshot.system_used_bytes, 2),
        snapshot.system_used_percent
    );
    let _ = writeln!(
        out,
        "  System Available: {}",
        format_gb(snapshot.system_available_bytes, 2)
    );
    for stat in &snapshot.accelerators {
        let _ = writeln!(
            out,
            "  {}: {} allocated, {} reserved, {} total ({:.1}%)",
            device_label(stat.device_id, stat.name.as_deref()),
            format_gb(stat.allocated_bytes, 2),
            format_gb(stat.reserved_bytes, 2),
            format_gb(stat.total_bytes, 2),
            stat.percent_allocated()
        );
    }
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out);
    out
}

/// Read-only status report produced by the status stage.
pub fn status_text(snapshot: &MemorySnapshot) -> String {
    let rule = "=".repeat(60);
    let mut lines = vec![
        rule.clone(),
        "MEMORY STATUS".to_owned(),
        rule.clone(),
        format!(
            "Process RAM: {:.2} GB ({:.1}%)",
            snapshot.process_resident_bytes as f64 / GB as f64,
            snapshot.process_memory_percent
        ),
        format!(
            "System RAM: {:.2} / {:.2} GB ({:.1}%)",
            snapshot.system_used_bytes as f64 / GB as f64,
            snapshot.system_total_bytes as f64 / GB as f64,
            snapshot.system_used_percent
        ),
        String::new(),
    ];

    if snapshot.accelerators.is_empty() {
        lines.push("VRAM: No accelerator devices available".to_owned());
    } else {
        lines.push("VRAM Status:".to_owned());
        for stat in &snapshot.accelerators {
            lines.push(format!(
                "  {}:",
                device_label(stat.device_id, stat.name.as_deref())
            ));
            lines.push(format!("    Allocated: {}", format_gb(stat.allocated_bytes, 2)));
            lines.push(format!("    Reserved: {}", format_gb(stat.reserved_bytes, 2)));
            lines.push(format!("    Total: {}", format_gb(stat.total_bytes, 2)));
            lines.push(format!("    Usage: {:.1}%", stat.percent_allocated()));
        }
    }
    lines.push(rule);
    lines.join("\n")
}

/// Numbered table of the largest processes, as printed by `--check`.
pub fn format_process_table(processes: &[ProcessInfo]) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "TOP {} MEMORY-CONSUMING PROCESSES", processes.len());
    let _ = writeln!(out, "{rule}");
    for (index, process) in processes.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:2}. {:<30} {:>12} (PID: {})",
            index + 1,
            process.name,
            format_gb(process.resident_bytes, 3),
            process.pid
        );
    }
    let _ = writeln!(out, "{rule}");
    out
}

fn device_label(device_id: u32, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("GPU {device_id} ({name})"),
        None => format!("GPU {device_id}"),
    }
}
