use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifetime counters of the CAPTCHA solver.
#[derive(Debug, Clone, Default)]
pub struct SolverStats {
    attempts: Arc<AtomicU64>,
    successful_decodes: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

/// Point-in-time copy of [`SolverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SolverStatsSnapshot {
    pub attempts: u64,
    pub successful_decodes: u64,
    pub failures: u64,
    /// Percentage of attempts that produced an acceptable code
    pub success_rate: f64,
}

impl SolverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_decodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SolverStatsSnapshot {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successful_decodes = self.successful_decodes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let success_rate = if attempts == 0 {
            0.0
        } else {
            successful_decodes as f64 / attempts as f64 * 100.0
        };

        SolverStatsSnapshot {
            attempts,
            successful_decodes,
            failures,
            success_rate,
        }
    }
}
