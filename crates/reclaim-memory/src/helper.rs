//! The out-of-process trim tier.
//!
//! [`trim_target`] is what the `reclaim-trim-target` binary does once it knows
//! its target. [`SubprocessHelper`] is the cleaner's side: it launches that
//! binary against the current pid and parses what comes back.

use crate::os::OsMemoryApi;
use crate::privileges;
use crate::protocol::{self, HelperInvocationResult, HelperStep};
use crate::trimmer::{self, DEFAULT_SETTLE};
use reclaim_process::{run_command, CommandSpec, RunOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File stem of the helper binary.
pub const HELPER_BINARY: &str = "reclaim-trim-target";

pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit statuses of the helper binary.
pub mod exit {
    /// A result with a `Freed` line was printed.
    pub const FREED: i32 = 0;
    /// No target could be selected, or the arguments were invalid.
    pub const NO_TARGET: i32 = 1;
    /// The target could not be opened (including unsupported platforms).
    pub const OPEN_FAILED: i32 = 2;
}

/// Trim another process's working set through an OS handle.
///
/// Elevates both privileges first, since opening a process owned by someone
/// else usually needs `SeDebugPrivilege`. The handle is released before
/// returning.
pub fn trim_target(os: &dyn OsMemoryApi, pid: u32, settle: Duration) -> HelperInvocationResult {
    let privileges = privileges::elevate_all(os);
    tracing::debug!(
        target = "reclaim.helper",
        privileges = %privileges::summarize(&privileges),
        "privileges before open"
    );

    let target = match os.open_process(pid) {
        Ok(target) => target,
        Err(err) => {
            tracing::info!(target = "reclaim.helper", pid, error = %err, "cannot open target");
            return HelperInvocationResult::open_failed(pid, err.os_error());
        }
    };

    let before = target.working_set_bytes().unwrap_or(0);
    let steps = trimmer::issue_all(target.as_ref(), os.foreign_primitives());
    if !settle.is_zero() {
        std::thread::sleep(settle);
    }
    let after = target.working_set_bytes().unwrap_or(before);
    drop(target);

    let steps = steps
        .into_iter()
        .map(|step| HelperStep::from_status(step.step.label(), step.status()))
        .collect();
    HelperInvocationResult::measured(pid, steps, before, after)
}

/// Convenience wrapper using the default settle time.
pub fn trim_target_default(os: &dyn OsMemoryApi, pid: u32) -> HelperInvocationResult {
    trim_target(os, pid, DEFAULT_SETTLE)
}

/// Exit status the helper binary reports for `result`.
pub fn exit_code(result: &HelperInvocationResult) -> i32 {
    if result.freed_bytes.is_some() {
        exit::FREED
    } else {
        exit::OPEN_FAILED
    }
}

/// Launches something that trims `pid` from outside the process.
pub trait HelperLauncher: Send + Sync {
    /// `None` means the tier is unavailable: the helper could not be run, ran
    /// into its timeout, or reported nothing usable.
    fn trim_process(&self, pid: u32) -> Option<HelperInvocationResult>;
}

/// [`HelperLauncher`] running the `reclaim-trim-target` binary.
#[derive(Debug, Clone)]
pub struct SubprocessHelper {
    program: PathBuf,
    timeout: Duration,
}

impl SubprocessHelper {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the helper binary: `configured` if given, else the sibling of
    /// the running executable. A binary that does not exist yields `None`.
    pub fn locate(configured: Option<&Path>) -> Option<Self> {
        let program = match configured {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => {
                tracing::info!(
                    target = "reclaim.helper",
                    path = %path.display(),
                    "configured trim helper does not exist"
                );
                return None;
            }
            None => reclaim_process::sibling_executable(HELPER_BINARY)?,
        };
        Some(Self::new(program))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl HelperLauncher for SubprocessHelper {
    fn trim_process(&self, pid: u32) -> Option<HelperInvocationResult> {
        let spec = CommandSpec::new(&self.program).args(["--pid".to_owned(), pid.to_string()]);
        let opts = RunOptions::with_timeout(self.timeout);

        let result = match run_command(&spec, &opts) {
            Ok(result) => result,
            Err(err) => {
                tracing::info!(
                    target = "reclaim.helper",
                    command = %spec,
                    error = %err,
                    "helper failed to start"
                );
                return None;
            }
        };
        if result.timed_out {
            tracing::info!(target = "reclaim.helper", command = %spec, "helper timed out");
            return None;
        }
        if !result.status.success() {
            tracing::info!(
                target = "reclaim.helper",
                command = %spec,
                status = %result.status,
                stderr = %result.output.stderr.trim(),
                "helper exited unsuccessfully"
            );
            return None;
        }

        match protocol::parse(&result.output.stdout) {
            Ok(parsed) if parsed.freed_bytes.is_some() => Some(parsed),
            Ok(_) => {
                tracing::info!(target = "reclaim.helper", "helper reported no freed value");
                None
            }
            Err(err) => {
                tracing::info!(
                    target = "reclaim.helper",
                    error = %err,
                    "unparseable helper output"
                );
                None
            }
        }
    }
}
