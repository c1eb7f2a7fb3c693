//! Pass-through stages for embedding the cleaner in a host pipeline.
//!
//! Both stages take an arbitrary value, never look at it, and hand it back
//! unchanged next to their own output, so they can sit between any two
//! producer/consumer steps.

use crate::cleaner::MemoryCleaner;
use crate::config::ReclamationConfig;
use crate::report::{status_text, CleanupReport};
use crate::telemetry::MemoryProbe;
use std::sync::Arc;

#[derive(Debug)]
pub struct CleanupStage {
    cleaner: Arc<MemoryCleaner>,
    config: ReclamationConfig,
}

impl CleanupStage {
    pub fn new(cleaner: Arc<MemoryCleaner>, config: ReclamationConfig) -> Self {
        Self { cleaner, config }
    }

    pub fn config(&self) -> &ReclamationConfig {
        &self.config
    }

    pub fn run<T>(&self, value: Option<T>) -> (Option<T>, CleanupReport) {
        let report = self.cleaner.cleanup(&self.config);
        (value, report)
    }
}

pub struct StatusStage {
    probe: Arc<dyn MemoryProbe>,
}

impl StatusStage {
    pub fn new(probe: Arc<dyn MemoryProbe>) -> Self {
        Self { probe }
    }

    pub fn run<T>(&self, value: Option<T>) -> (Option<T>, String) {
        let text = status_text(&self.probe.capture());
        tracing::debug!(target = "reclaim.memory", "memory status captured");
        (value, text)
    }
}
