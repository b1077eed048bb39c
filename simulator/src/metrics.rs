//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use strongbox_ledger::ErrorKind;

/// Outcome counters and latency samples collected by the workers.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Operations attempted.
    pub total_operations: u64,
    /// Operations that committed.
    pub committed: u64,
    /// Rejected for insufficient funds.
    pub insufficient_funds: u64,
    /// Rejected for validation, missing or inactive accounts.
    pub rejected: u64,
    /// Store failures and timeouts.
    pub infrastructure_failures: u64,
    /// Latency samples (µs) of committed operations.
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            committed: 0,
            insufficient_funds: 0,
            rejected: 0,
            infrastructure_failures: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a committed operation.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_operations += 1;
        self.committed += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples
            .push_back(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    /// Record a failed operation.
    pub fn record_failure(&mut self, kind: ErrorKind) {
        self.total_operations += 1;
        let counter = match kind {
            ErrorKind::InsufficientFunds => &mut self.insufficient_funds,
            ErrorKind::InfrastructureFailure => &mut self.infrastructure_failures,
            _ => &mut self.rejected,
        };
        *counter += 1;
    }

    /// Get average latency in µs.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.committed as f64 / self.total_operations as f64
    }

    /// Operations per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        self.total_operations as f64 / secs
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
