//! The reclamation orchestrator.
//!
//! One call to [`MemoryCleaner::cleanup`] runs the whole tiered sequence and
//! always hands back a [`CleanupReport`]: collaborator errors and panics are
//! recorded against the step that raised them and the sequence moves on.

use crate::collab::{Accelerator, CollabResult, Device, HostRuntime, NullAccelerator, NullHost};
use crate::config::ReclamationConfig;
use crate::disk::{self, DiskSpace, GateDecision, SystemDisks};
use crate::helper::{HelperLauncher, SubprocessHelper};
use crate::native::NativeOs;
use crate::os::OsMemoryApi;
use crate::privileges::{self, PrivilegeState};
use crate::report::{CleanupReport, HelperTier, StepRecord, TrimReport};
use crate::standby::{self, DEFAULT_PURGE_PAUSE};
use crate::telemetry::{MemoryProbe, SystemProbe};
use crate::trimmer::{InProcessTrimmer, DEFAULT_SETTLE};
use crate::types::{MemorySnapshot, GB};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Amount handed to the host's `force_free`; large enough to mean "everything".
pub const FORCE_FREE_REQUEST_BYTES: u64 = 100 * GB;

/// Managed-heap passes before the trim tiers run.
pub const GC_PASSES: usize = 3;

/// The collaborators a cleaner drives, resolved once at construction.
#[derive(Clone)]
pub struct Capabilities {
    pub host: Arc<dyn HostRuntime>,
    pub accelerator: Arc<dyn Accelerator>,
    pub os: Arc<dyn OsMemoryApi>,
    pub probe: Arc<dyn MemoryProbe>,
    pub disks: Arc<dyn DiskSpace>,
    /// Out-of-process tier; `None` when no helper binary could be found.
    pub helper: Option<Arc<dyn HelperLauncher>>,
}

impl Capabilities {
    /// Native OS layer and live telemetry, with no host or accelerator attached.
    ///
    /// The helper is the `reclaim-trim-target` binary next to the running
    /// executable, if there is one.
    pub fn standalone() -> Self {
        let accelerator: Arc<dyn Accelerator> = Arc::new(NullAccelerator);
        Self {
            host: Arc::new(NullHost),
            probe: Arc::new(SystemProbe::new(accelerator.clone())),
            accelerator,
            os: Arc::new(NativeOs::new()),
            disks: Arc::new(SystemDisks),
            helper: SubprocessHelper::locate(None)
                .map(|helper| Arc::new(helper) as Arc<dyn HelperLauncher>),
        }
    }

    pub fn with_host(mut self, host: Arc<dyn HostRuntime>) -> Self {
        self.host = host;
        self
    }

    /// Replace the accelerator. The probe keeps reading the old one unless it
    /// is replaced as well.
    pub fn with_accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = accelerator;
        self
    }

    pub fn with_helper(mut self, helper: Option<Arc<dyn HelperLauncher>>) -> Self {
        self.helper = helper;
        self
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("helper", &self.helper.is_some())
            .finish_non_exhaustive()
    }
}

/// Waits between a call and the measurement of its effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pauses {
    /// After the in-process trim calls, before re-measuring.
    pub settle: Duration,
    /// Between memory-list commands.
    pub standby: Duration,
}

impl Default for Pauses {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            standby: DEFAULT_PURGE_PAUSE,
        }
    }
}

impl Pauses {
    pub fn none() -> Self {
        Self {
            settle: Duration::ZERO,
            standby: Duration::ZERO,
        }
    }
}

pub struct MemoryCleaner {
    caps: Capabilities,
    host_available: bool,
    accelerator_available: bool,
    pauses: Pauses,
}

impl MemoryCleaner {
    pub fn new(caps: Capabilities) -> Self {
        let host_available = catch(|| caps.host.is_available()).unwrap_or(false);
        let accelerator_available = catch(|| caps.accelerator.is_available()).unwrap_or(false);
        tracing::debug!(
            target = "reclaim.cleanup",
            host_available,
            accelerator_available,
            helper = caps.helper.is_some(),
            "cleaner capabilities"
        );
        Self {
            caps,
            host_available,
            accelerator_available,
            pauses: Pauses::default(),
        }
    }

    pub fn with_pauses(mut self, pauses: Pauses) -> Self {
        self.pauses = pauses;
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Capture a snapshot without changing anything.
    pub fn status(&self) -> MemorySnapshot {
        self.capture("status")
    }

    /// Run one full reclamation cycle.
    pub fn cleanup(&self, config: &ReclamationConfig) -> CleanupReport {
        tracing::info!(target = "reclaim.cleanup", ?config, "starting memory cleanup");
        let mut cycle = Cycle::default();

        let before = self.capture("before");

        self.release_cached_workloads(&mut cycle);

        let privileges = if config.enable_privileges {
            cycle
                .guard("elevate_privileges", || {
                    Ok(privileges::elevate_all(self.caps.os.as_ref()))
                })
                .unwrap_or_default()
        } else {
            cycle.skip("elevate_privileges", "disabled by configuration");
            Vec::new()
        };
        if !privileges.is_empty() {
            tracing::info!(
                target = "reclaim.cleanup",
                privileges = %privileges::summarize(&privileges),
                "privileges"
            );
        }

        let gc_passes: Vec<u64> = (1..=GC_PASSES)
            .map(|pass| {
                let collected = cycle
                    .guard(&format!("gc_pass_{pass}"), || self.caps.host.collect_garbage())
                    .unwrap_or(0);
                tracing::debug!(target = "reclaim.cleanup", pass, collected, "garbage collection");
                collected
            })
            .collect();

        self.clear_accelerator(&mut cycle);

        let trim = self.trim_tiers(config, &mut cycle);

        let standby = if config.purge_standby_lists {
            let os = self.caps.os.as_ref();
            let pause = self.pauses.standby;
            Some(
                cycle
                    .guard("purge_standby_lists", || {
                        Ok(standby::purge_standby_lists(os, pause))
                    })
                    .unwrap_or_default(),
            )
        } else {
            None
        };

        if self.accelerator_available {
            cycle.guard("accelerator_synchronize", || self.caps.accelerator.synchronize());
        } else {
            cycle.skip("accelerator_synchronize", "accelerator unavailable");
        }

        let final_gc_collected = cycle
            .guard("final_gc", || self.caps.host.collect_garbage())
            .unwrap_or(0);

        let after = self.capture("after");

        let report = CleanupReport {
            before,
            after,
            steps: cycle.steps,
            privileges,
            gc_passes,
            final_gc_collected,
            trim,
            standby,
        };
        tracing::info!(
            target = "reclaim.cleanup",
            process_freed_bytes = report.process_ram_freed_bytes(),
            system_freed_bytes = report.system_ram_freed_bytes(),
            collected = report.total_collected(),
            failed_steps = report.steps.iter().filter(|step| step.is_failed()).count(),
            "memory cleanup finished"
        );
        report
    }

    fn capture(&self, label: &'static str) -> MemorySnapshot {
        match catch(|| self.caps.probe.capture()) {
            Ok(snapshot) => snapshot,
            Err(message) => {
                tracing::warn!(
                    target = "reclaim.cleanup",
                    snapshot = label,
                    error = %message,
                    "telemetry probe panicked"
                );
                MemorySnapshot::from_bytes(0, 0, 0, 0)
            }
        }
    }

    fn release_cached_workloads(&self, cycle: &mut Cycle) {
        if !self.host_available {
            cycle.skip("release_cached_workloads", "host runtime unavailable");
            return;
        }
        let host = self.caps.host.as_ref();
        cycle.guard("release_cached_workloads", || host.release_all_cached_workloads());
        cycle.guard("soft_clear_cache", || host.soft_clear_cache());
        cycle.guard("cleanup_model_patches", || host.cleanup_model_patches());
        if let Some(freed) = cycle.guard("force_free", || {
            host.force_free(FORCE_FREE_REQUEST_BYTES, Device::Default)
        }) {
            tracing::info!(target = "reclaim.cleanup", freed_bytes = freed, "host freed memory");
        }
    }

    fn clear_accelerator(&self, cycle: &mut Cycle) {
        if !self.accelerator_available {
            cycle.skip("clear_accelerator_cache", "accelerator unavailable");
            return;
        }
        let accelerator = self.caps.accelerator.as_ref();
        cycle.guard("accelerator_empty_cache", || accelerator.empty_cache());
        cycle.guard("accelerator_ipc_collect", || accelerator.ipc_collect());
        cycle.guard("accelerator_reset_peak_stats", || {
            accelerator
                .device_stats()?
                .iter()
                .try_for_each(|stat| accelerator.reset_peak_stats(stat.device_id))
        });
        cycle.guard("accelerator_clear_workspaces", || {
            accelerator.clear_workspace_caches()
        });
    }

    fn trim_tiers(&self, config: &ReclamationConfig, cycle: &mut Cycle) -> TrimReport {
        let mut trim = TrimReport::default();
        if !config.aggressive_trim {
            cycle.skip("trim", "aggressive trim disabled");
            return trim;
        }

        let volume = config.system_volume();
        let grows_page_file = catch(|| self.caps.os.trim_grows_page_file()).unwrap_or(true);
        trim.gate = if grows_page_file {
            catch(|| {
                disk::check(
                    self.caps.disks.as_ref(),
                    &volume,
                    config.min_free_disk_gb,
                    config.skip_trim_if_disk_low,
                )
            })
            .unwrap_or(GateDecision::Unknown)
        } else {
            GateDecision::NotApplicable
        };
        if let GateDecision::LowDisk {
            free_bytes,
            min_free_gb,
        } = trim.gate
        {
            let reason = format!(
                "{} free {:.1} GB < {:.1} GB",
                volume.display(),
                free_bytes as f64 / GB as f64,
                min_free_gb
            );
            tracing::info!(
                target = "reclaim.cleanup",
                %reason,
                "skipping OS trim to avoid page file growth"
            );
            cycle.skip("trim", reason);
            return trim;
        }

        let os = self.caps.os.as_ref();
        let trimmer = InProcessTrimmer::new(os).with_settle(self.pauses.settle);
        trim.in_process = cycle.guard("in_process_trim", || Ok(trimmer.trim()));
        if let Some(freed) = trim.in_process.as_ref().and_then(|outcome| outcome.freed_bytes) {
            tracing::info!(
                target = "reclaim.cleanup",
                freed_bytes = freed,
                "in-process trim freed memory"
            );
            return trim;
        }

        trim.helper = if !config.use_external_helper {
            cycle.skip("external_helper", "disabled by configuration");
            HelperTier::NotAttempted
        } else if let Some(helper) = &self.caps.helper {
            let pid = std::process::id();
            match cycle
                .guard("external_helper", || Ok(helper.trim_process(pid)))
                .flatten()
                .and_then(|result| result.freed_bytes)
            {
                Some(freed) => {
                    tracing::info!(
                        target = "reclaim.cleanup",
                        freed_bytes = freed,
                        "external helper freed memory"
                    );
                    HelperTier::Freed(freed)
                }
                None => HelperTier::Unavailable,
            }
        } else {
            cycle.skip("external_helper", "helper binary not found");
            HelperTier::Unavailable
        };

        if !matches!(trim.helper, HelperTier::Freed(_)) {
            trim.best_effort = cycle
                .guard("best_effort_trim", || {
                    trimmer.best_effort();
                    Ok(())
                })
                .is_some();
        }
        trim
    }
}

impl fmt::Debug for MemoryCleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCleaner")
            .field("host_available", &self.host_available)
            .field("accelerator_available", &self.accelerator_available)
            .field("pauses", &self.pauses)
            .finish()
    }
}

/// Step log for one cycle.
#[derive(Default)]
struct Cycle {
    steps: Vec<StepRecord>,
}

impl Cycle {
    /// Run `f`, recording how it ended. `Err` and panics both yield `None`.
    fn guard<T>(&mut self, name: &str, f: impl FnOnce() -> CollabResult<T>) -> Option<T> {
        let error = match catch(f) {
            Ok(Ok(value)) => {
                self.steps.push(StepRecord::completed(name));
                return Some(value);
            }
            Ok(Err(err)) => err.to_string(),
            Err(message) => format!("panicked: {message}"),
        };
        tracing::warn!(target = "reclaim.cleanup", step = name, %error, "cleanup step failed");
        self.steps.push(StepRecord::failed(name, error));
        None
    }

    fn skip(&mut self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(target = "reclaim.cleanup", step = name, %reason, "cleanup step skipped");
        self.steps.push(StepRecord::skipped(name, reason));
    }
}

fn catch<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
