//! Counter sink for auth outcomes

use std::collections::HashMap;
use std::sync::Mutex;

pub const LOGIN_SUCCESS: &str = "auth.login.success";
pub const LOGIN_FAILURE: &str = "auth.login.failure";
pub const REFRESH_SUCCESS: &str = "auth.refresh.success";
pub const REFRESH_FAILURE: &str = "auth.refresh.failure";
pub const LOGOUT_SUCCESS: &str = "auth.logout.success";

pub trait MetricsRecorder: Send + Sync {
    fn increment(&self, event: &'static str);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn increment(&self, _event: &'static str) {}
}

/// In-process counters, readable through [`CounterMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct CounterMetrics {
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, event: &str) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl MetricsRecorder for CounterMetrics {
    fn increment(&self, event: &'static str) {
        let mut counts = self
            .counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counts.entry(event).or_insert(0) += 1;
    }
}
