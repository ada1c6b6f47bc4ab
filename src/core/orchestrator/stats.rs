//! Run statistics across all runs of an orchestrator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_runs: u64,
    pub finalized_runs: u64,
    pub failed_runs: u64,
    pub cancelled_runs: u64,
    pub review_required_runs: u64,
    pub critical_runs: u64,
    pub total_attempts: u64,
    pub total_duration_ms: u64,
    pub total_cost_usd: f64,
}

impl RunStats {
    pub fn avg_duration_ms(&self) -> u64 {
        if self.finalized_runs == 0 {
            0
        } else {
            self.total_duration_ms / self.finalized_runs
        }
    }

    pub fn avg_attempts(&self) -> f64 {
        if self.finalized_runs == 0 {
            0.0
        } else {
            self.total_attempts as f64 / self.finalized_runs as f64
        }
    }

    /// Share of finalised runs that need human review.
    pub fn review_rate(&self) -> f64 {
        if self.finalized_runs == 0 {
            0.0
        } else {
            self.review_required_runs as f64 / self.finalized_runs as f64
        }
    }

    pub fn record_finalized(
        &mut self,
        attempts: u32,
        duration_ms: u64,
        cost_usd: f64,
        review_required: bool,
        critical: bool,
    ) {
        self.total_runs += 1;
        self.finalized_runs += 1;
        self.total_attempts += u64::from(attempts);
        self.total_duration_ms += duration_ms;
        self.total_cost_usd += cost_usd;
        if review_required {
            self.review_required_runs += 1;
        }
        if critical {
            self.critical_runs += 1;
        }
    }

    pub fn record_failure(&mut self, cost_usd: f64) {
        self.total_runs += 1;
        self.failed_runs += 1;
        self.total_cost_usd += cost_usd;
    }

    pub fn record_cancelled(&mut self, cost_usd: f64) {
        self.total_runs += 1;
        self.cancelled_runs += 1;
        self.total_cost_usd += cost_usd;
    }
}
