use crate::os::{CallStatus, OsMemoryApi, TrimPrimitive, TrimTarget};
use serde::Serialize;
use std::time::Duration;

/// Default pause between issuing trim calls and measuring their effect.
///
/// Working-set reclamation completes asynchronously; measuring right away
/// undercounts what was freed.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// One OS call attempted against a trim target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrimStepResult {
    pub step: TrimPrimitive,
    pub succeeded: bool,
    pub os_error_code: Option<i32>,
    pub working_set_before_bytes: u64,
    pub working_set_after_bytes: u64,
}

impl TrimStepResult {
    pub fn status(&self) -> CallStatus {
        if self.succeeded {
            CallStatus::Succeeded
        } else {
            CallStatus::Failed {
                os_error: self.os_error_code,
            }
        }
    }
}

/// Result of one in-process trim attempt.
///
/// `freed_bytes` is `Some` only when at least one call succeeded and the
/// working set measurably shrank; `None` tells the caller to move on to the
/// next tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrimOutcome {
    pub freed_bytes: Option<u64>,
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub steps: Vec<TrimStepResult>,
}

impl TrimOutcome {
    /// Apply the success policy to a finished set of steps.
    pub fn from_steps(steps: Vec<TrimStepResult>, before_bytes: u64, after_bytes: u64) -> Self {
        let any_succeeded = steps.iter().any(|step| step.succeeded);
        let freed_bytes = (any_succeeded && before_bytes > after_bytes)
            .then(|| before_bytes - after_bytes);
        Self {
            freed_bytes,
            before_bytes,
            after_bytes,
            steps,
        }
    }

    pub fn any_call_succeeded(&self) -> bool {
        self.steps.iter().any(|step| step.succeeded)
    }

    pub fn requires_fallback(&self) -> bool {
        self.freed_bytes.is_none()
    }
}

/// Issues the platform's working-set and heap primitives against the calling
/// process and measures the effect.
pub struct InProcessTrimmer<'a> {
    os: &'a dyn OsMemoryApi,
    settle: Duration,
}

impl<'a> InProcessTrimmer<'a> {
    pub fn new(os: &'a dyn OsMemoryApi) -> Self {
        Self {
            os,
            settle: DEFAULT_SETTLE,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn trim(&self) -> TrimOutcome {
        let target = self.os.current_process();
        let primitives = self.os.in_process_primitives();
        let before = target.working_set_bytes().unwrap_or(0);

        let steps = issue_all(target.as_ref(), primitives);

        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        let after = target.working_set_bytes().unwrap_or(before);
        let outcome = TrimOutcome::from_steps(steps, before, after);

        tracing::debug!(
            target = "reclaim.memory",
            before_bytes = outcome.before_bytes,
            after_bytes = outcome.after_bytes,
            freed_bytes = ?outcome.freed_bytes,
            "in-process trim finished"
        );
        if outcome.freed_bytes.is_none() && outcome.any_call_succeeded() {
            // A successful call with nothing to trim is treated like a failed
            // call and still falls through to the next tier.
            tracing::debug!(
                target = "reclaim.memory",
                "trim calls succeeded but the working set did not shrink"
            );
        }
        outcome
    }

    /// Issue the primitives again without measuring anything.
    pub fn best_effort(&self) {
        let target = self.os.current_process();
        for &primitive in self.os.in_process_primitives() {
            let status = target.invoke(primitive);
            tracing::trace!(
                target = "reclaim.memory",
                step = primitive.label(),
                %status,
                "best-effort trim call"
            );
        }
    }
}

/// Issue `primitives` in order, measuring the working set around each one.
pub fn issue_all(target: &dyn TrimTarget, primitives: &[TrimPrimitive]) -> Vec<TrimStepResult> {
    let mut steps = Vec::with_capacity(primitives.len());
    let mut current = target.working_set_bytes().unwrap_or(0);
    for &primitive in primitives {
        let status = target.invoke(primitive);
        let after = target.working_set_bytes().unwrap_or(current);
        tracing::debug!(
            target = "reclaim.memory",
            pid = target.pid(),
            step = primitive.label(),
            %status,
            "trim call"
        );
        steps.push(TrimStepResult {
            step: primitive,
            succeeded: status.succeeded(),
            os_error_code: status.os_error(),
            working_set_before_bytes: current,
            working_set_after_bytes: after,
        });
        current = after;
    }
    steps
}
