//! Target selection for the out-of-process helper.

use crate::types::ProcessInfo;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How `--auto` recognises the host application in the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetRule {
    /// Executable names of the host's interpreter (compared case-insensitively).
    pub interpreter_names: Vec<String>,
    /// Substrings identifying the host application on the command line
    /// (compared case-insensitively).
    pub markers: Vec<String>,
}

impl Default for TargetRule {
    fn default() -> Self {
        Self {
            interpreter_names: vec!["python.exe".into(), "python".into(), "python3".into()],
            markers: vec!["comfyui".into(), "main.py".into()],
        }
    }
}

impl TargetRule {
    pub fn matches(&self, process: &ProcessInfo) -> bool {
        let name = process.name.to_ascii_lowercase();
        if !self
            .interpreter_names
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(&name))
        {
            return false;
        }
        let cmdline = process.joined_cmdline().to_lowercase();
        self.markers
            .iter()
            .any(|marker| cmdline.contains(&marker.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("no target process found")]
    NoTarget,
}

/// Which process to trim, as requested on the helper command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRequest {
    Pid(u32),
    Auto,
}

/// Why a process was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Explicit,
    MatchedHost,
    LargestResident,
}

/// Pick the process to trim.
///
/// With `--auto`: the largest process matching `rule`; failing that, the
/// largest process overall. Ties go to the higher pid so the choice is stable.
pub fn select_target(
    request: TargetRequest,
    processes: &[ProcessInfo],
    rule: &TargetRule,
) -> Result<(u32, Selection), TargetError> {
    if let TargetRequest::Pid(pid) = request {
        return Ok((pid, Selection::Explicit));
    }

    if let Some(process) = largest(processes.iter().filter(|process| rule.matches(process))) {
        return Ok((process.pid, Selection::MatchedHost));
    }

    largest(processes.iter())
        .map(|process| (process.pid, Selection::LargestResident))
        .ok_or(TargetError::NoTarget)
}

fn largest<'a>(processes: impl Iterator<Item = &'a ProcessInfo>) -> Option<&'a ProcessInfo> {
    processes.max_by_key(|process| (process.resident_bytes, process.pid))
}
