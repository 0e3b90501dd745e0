use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::router::{Dispatch, FailureStage};

/// Routing counters reported on `/health`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    pub uptime_sec: u64,
    pub messages_total: u64,
    pub dispatched: u64,
    pub fallbacks: u64,
    pub module_failures: u64,
    pub timeouts: u64,
    pub delivery_failures: u64,
    pub memory_bytes: u64,
    /// Messages answered, by module name
    pub per_module: BTreeMap<String, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update memory usage from system
    pub fn update_memory(&mut self) {
        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                let rss_kb = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok());
                if let Some(kb) = rss_kb {
                    self.memory_bytes = kb * 1024;
                }
            }
        }
    }

    /// Record the outcome of one routed message
    pub fn record(&mut self, dispatch: &Dispatch) {
        self.messages_total += 1;
        match &dispatch.handled_by {
            Some(module) => {
                self.dispatched += 1;
                *self.per_module.entry(module.clone()).or_insert(0) += 1;
            }
            None => self.fallbacks += 1,
        }
        for failure in &dispatch.failures {
            self.module_failures += 1;
            if failure.stage == FailureStage::Timeout {
                self.timeouts += 1;
            }
        }
    }

    /// A reply could not be delivered back to the channel
    pub fn record_delivery_failure(&mut self) {
        self.delivery_failures += 1;
    }

    /// Share of messages answered by a module rather than the fallback
    pub fn handled_rate(&self) -> f64 {
        if self.messages_total == 0 {
            return 100.0;
        }
        (self.dispatched as f64 / self.messages_total as f64) * 100.0
    }
}
