//! Result protocol spoken by `reclaim-trim-target` on stdout.
//!
//! Two renderings of the same [`HelperInvocationResult`]:
//!
//! Text (default), one `Key: value` per line, quantities carry a unit:
//!
//! ```text
//! Protocol: reclaim-trim-target/1
//! Target PID: 4242
//! Open: ok
//! EmptyWorkingSet: ok
//! SetProcessWorkingSetSize: failed (err 5)
//! WorkingSet Before: 2147483648 B
//! WorkingSet After: 1073741824 B
//! Freed: 1073741824 B
//! ```
//!
//! Machine, a header followed by exactly five integers in fixed order (pid,
//! open flag, before, after, freed):
//!
//! ```text
//! reclaim-trim-target/1
//! 4242
//! 1
//! 2147483648
//! 1073741824
//! 1073741824
//! ```
//!
//! When the target cannot be opened the text form stops after the `Open` line
//! and carries no `Freed` line.

use crate::os::CallStatus;
use crate::types::{GB, MB};
use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_NAME: &str = "reclaim-trim-target";

const KEY_PROTOCOL: &str = "Protocol";
const KEY_PID: &str = "Target PID";
const KEY_OPEN: &str = "Open";
const KEY_BEFORE: &str = "WorkingSet Before";
const KEY_AFTER: &str = "WorkingSet After";
const KEY_FREED: &str = "Freed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Machine,
}

/// One OS call made by the helper against the target handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelperStep {
    pub name: String,
    pub succeeded: bool,
    pub os_error_code: Option<i32>,
}

impl HelperStep {
    pub fn from_status(name: impl Into<String>, status: CallStatus) -> Self {
        Self {
            name: name.into(),
            succeeded: status.succeeded(),
            os_error_code: status.os_error(),
        }
    }

    fn status_text(&self) -> String {
        match (self.succeeded, self.os_error_code) {
            (true, _) => "ok".to_owned(),
            (false, Some(code)) => format!("failed (err {code})"),
            (false, None) => "failed".to_owned(),
        }
    }
}

/// Everything the helper reports about one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelperInvocationResult {
    pub protocol_version: u32,
    pub target_pid: u32,
    pub open_succeeded: bool,
    pub open_error_code: Option<i32>,
    pub steps: Vec<HelperStep>,
    pub working_set_before_bytes: u64,
    pub working_set_after_bytes: u64,
    /// `None` when the target could not be opened.
    pub freed_bytes: Option<u64>,
}

impl HelperInvocationResult {
    pub fn open_failed(target_pid: u32, open_error_code: Option<i32>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            target_pid,
            open_succeeded: false,
            open_error_code,
            steps: Vec::new(),
            working_set_before_bytes: 0,
            working_set_after_bytes: 0,
            freed_bytes: None,
        }
    }

    pub fn measured(target_pid: u32, steps: Vec<HelperStep>, before: u64, after: u64) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            target_pid,
            open_succeeded: true,
            open_error_code: None,
            steps,
            working_set_before_bytes: before,
            working_set_after_bytes: after,
            freed_bytes: Some(before.saturating_sub(after)),
        }
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => self.to_text(),
            OutputFormat::Machine => self.to_machine(),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{KEY_PROTOCOL}: {PROTOCOL_NAME}/{}", self.protocol_version);
        let _ = writeln!(out, "{KEY_PID}: {}", self.target_pid);
        if !self.open_succeeded {
            let open = match self.open_error_code {
                Some(code) => format!("failed (err {code})"),
                None => "failed".to_owned(),
            };
            let _ = writeln!(out, "{KEY_OPEN}: {open}");
            return out;
        }
        let _ = writeln!(out, "{KEY_OPEN}: ok");
        for step in &self.steps {
            let _ = writeln!(out, "{}: {}", step.name, step.status_text());
        }
        let _ = writeln!(out, "{KEY_BEFORE}: {} B", self.working_set_before_bytes);
        let _ = writeln!(out, "{KEY_AFTER}: {} B", self.working_set_after_bytes);
        if let Some(freed) = self.freed_bytes {
            let _ = writeln!(out, "{KEY_FREED}: {freed} B");
        }
        out
    }

    pub fn to_machine(&self) -> String {
        format!(
            "{PROTOCOL_NAME}/{}\n{}\n{}\n{}\n{}\n{}\n",
            self.protocol_version,
            self.target_pid,
            u8::from(self.open_succeeded),
            self.working_set_before_bytes,
            self.working_set_after_bytes,
            self.freed_bytes.unwrap_or(0),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("helper output is empty")]
    Empty,
    #[error("unsupported protocol `{0}`")]
    UnsupportedVersion(String),
    #[error("helper output has no `Freed` line")]
    MissingFreed,
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Parse helper stdout in either format.
pub fn parse(output: &str) -> Result<HelperInvocationResult, ProtocolError> {
    let first = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(ProtocolError::Empty)?;
    if first.starts_with(PROTOCOL_NAME) {
        parse_machine(output)
    } else {
        parse_text(output)
    }
}

/// Parse the text rendering.
///
/// Unknown lines are ignored so banners and extra diagnostics can be added
/// without breaking older parents. Output without a `Protocol` line is read
/// as version 0 (the original free-text layout, where quantities are GB).
pub fn parse_text(output: &str) -> Result<HelperInvocationResult, ProtocolError> {
    let mut result = HelperInvocationResult::open_failed(0, None);
    result.protocol_version = 0;
    result.open_succeeded = true;
    let mut saw_open = false;

    for (index, raw) in output.lines().enumerate() {
        let line_no = index + 1;
        let Some((key, value)) = raw.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let malformed = |message: String| ProtocolError::Malformed {
            line: line_no,
            message,
        };

        match key {
            KEY_PROTOCOL => {
                let version = value
                    .strip_prefix(PROTOCOL_NAME)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .and_then(|version| version.parse::<u32>().ok())
                    .filter(|version| *version == PROTOCOL_VERSION)
                    .ok_or_else(|| ProtocolError::UnsupportedVersion(value.to_owned()))?;
                result.protocol_version = version;
            }
            KEY_PID => {
                // Version 0 prints `Target PID: <pid>  Name: <exe>` on one line.
                let pid = if result.protocol_version == 0 {
                    value.split_whitespace().next().unwrap_or(value)
                } else {
                    value
                };
                result.target_pid = pid
                    .parse()
                    .map_err(|_| malformed(format!("invalid pid `{value}`")))?;
            }
            key if key.eq_ignore_ascii_case(KEY_OPEN) => {
                saw_open = true;
                let (succeeded, code) = parse_status(value)
                    .ok_or_else(|| malformed(format!("invalid open status `{value}`")))?;
                result.open_succeeded = succeeded;
                result.open_error_code = code;
            }
            KEY_BEFORE => {
                result.working_set_before_bytes = parse_quantity(value).map_err(malformed)?;
            }
            KEY_AFTER => {
                result.working_set_after_bytes = parse_quantity(value).map_err(malformed)?;
            }
            KEY_FREED => result.freed_bytes = Some(parse_quantity(value).map_err(malformed)?),
            _ => {
                if let Some((succeeded, code)) = parse_status(value) {
                    result.steps.push(HelperStep {
                        name: key.to_owned(),
                        succeeded,
                        os_error_code: code,
                    });
                }
            }
        }
    }

    if saw_open && !result.open_succeeded {
        result.freed_bytes = None;
        return Ok(result);
    }
    if result.freed_bytes.is_none() {
        return Err(ProtocolError::MissingFreed);
    }
    Ok(result)
}

/// Parse the machine rendering.
pub fn parse_machine(output: &str) -> Result<HelperInvocationResult, ProtocolError> {
    let mut lines = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate();
    let (_, header) = lines.next().ok_or(ProtocolError::Empty)?;
    let expected = format!("{PROTOCOL_NAME}/{PROTOCOL_VERSION}");
    if header != expected {
        return Err(ProtocolError::UnsupportedVersion(header.to_owned()));
    }

    let mut values = [0u64; 5];
    for slot in values.iter_mut() {
        let (index, line) = lines.next().ok_or(ProtocolError::MissingFreed)?;
        *slot = line.parse().map_err(|_| ProtocolError::Malformed {
            line: index + 1,
            message: format!("expected an integer, got `{line}`"),
        })?;
    }
    let [pid, open, before, after, freed] = values;
    let target_pid = u32::try_from(pid).map_err(|_| ProtocolError::Malformed {
        line: 2,
        message: format!("pid {pid} out of range"),
    })?;

    Ok(match open {
        0 => HelperInvocationResult::open_failed(target_pid, None),
        1 => HelperInvocationResult {
            freed_bytes: Some(freed),
            ..HelperInvocationResult::measured(target_pid, Vec::new(), before, after)
        },
        other => {
            return Err(ProtocolError::Malformed {
                line: 3,
                message: format!("open flag must be 0 or 1, got {other}"),
            })
        }
    })
}

fn parse_status(value: &str) -> Option<(bool, Option<i32>)> {
    if value.eq_ignore_ascii_case("ok") {
        return Some((true, None));
    }
    let rest = value.strip_prefix("failed")?.trim();
    if rest.is_empty() {
        return Some((false, None));
    }
    let code = rest
        .strip_prefix("(err")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|code| code.trim().parse::<i32>().ok())?;
    Some((false, Some(code)))
}

/// `123 B`, `1.5 KB`, `0.80 GB` (1024-based) into bytes.
pub fn parse_quantity(value: &str) -> Result<u64, String> {
    let mut parts = value.split_whitespace();
    let (Some(number), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected `<number> <unit>`, got `{value}`"));
    };
    let scale = match unit.to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" | "KIB" => 1024,
        "MB" | "MIB" => MB,
        "GB" | "GIB" => GB,
        _ => return Err(format!("unknown unit `{unit}`")),
    };
    if scale == 1 {
        return number
            .parse::<u64>()
            .map_err(|_| format!("invalid byte count `{number}`"));
    }
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid quantity `{number}`"))?;
    if !number.is_finite() || number < 0.0 {
        return Err(format!("invalid quantity `{number}`"));
    }
    Ok((number * scale as f64).round() as u64)
}
