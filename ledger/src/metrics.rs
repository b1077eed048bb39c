//! Operation counters for the ledger engine.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{ErrorKind, LedgerError};
use crate::record::RecordType;

/// Ledger metrics.
#[derive(Default)]
pub struct LedgerMetrics {
    /// Operations started (validation passed).
    pub operations_total: AtomicU64,
    /// Operations currently inside a unit.
    pub operations_active: AtomicU64,
    /// Committed deposits.
    pub deposits_committed: AtomicU64,
    /// Committed withdrawals.
    pub withdrawals_committed: AtomicU64,
    /// Committed transfers.
    pub transfers_committed: AtomicU64,
    /// Rejected before a unit was opened.
    pub validation_rejected: AtomicU64,
    /// Missing or inactive accounts.
    pub account_rejected: AtomicU64,
    /// Insufficient funds at lock time.
    pub insufficient_funds: AtomicU64,
    /// Units that hit the configured bound.
    pub timeouts: AtomicU64,
    /// Store failures.
    pub infrastructure_failed: AtomicU64,
    /// Operations whose caller stopped waiting before they settled.
    pub cancelled: AtomicU64,
}

impl LedgerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request rejected by validation.
    pub fn validation_rejected(&self) {
        self.validation_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit being opened. The operation stays active until the
    /// returned guard is dropped.
    #[must_use]
    pub fn operation_started(&self) -> ActiveOperation<'_> {
        self.operations_total.fetch_add(1, Ordering::Relaxed);
        self.operations_active.fetch_add(1, Ordering::Relaxed);
        ActiveOperation {
            metrics: self,
            settled: false,
        }
    }

    fn count_committed(&self, record_type: RecordType) {
        let counter = match record_type {
            RecordType::Deposit => &self.deposits_committed,
            RecordType::Withdraw => &self.withdrawals_committed,
            RecordType::Transfer => &self.transfers_committed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn count_failed(&self, error: &LedgerError) {
        let counter = match (error.kind(), error) {
            (_, LedgerError::Timeout(_)) => &self.timeouts,
            (ErrorKind::InsufficientFunds, _) => &self.insufficient_funds,
            (ErrorKind::AccountNotFound | ErrorKind::AccountNotActive, _) => {
                &self.account_rejected
            }
            (ErrorKind::ValidationError, _) => &self.validation_rejected,
            _ => &self.infrastructure_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_total: self.operations_total.load(Ordering::Relaxed),
            operations_active: self.operations_active.load(Ordering::Relaxed),
            deposits_committed: self.deposits_committed.load(Ordering::Relaxed),
            withdrawals_committed: self.withdrawals_committed.load(Ordering::Relaxed),
            transfers_committed: self.transfers_committed.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            account_rejected: self.account_rejected.load(Ordering::Relaxed),
            insufficient_funds: self.insufficient_funds.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            infrastructure_failed: self.infrastructure_failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series: [(&str, &str, &str, u64); 11] = [
            ("operations_total", "counter", "Operations that opened a unit", snapshot.operations_total),
            ("operations_active", "gauge", "Operations currently inside a unit", snapshot.operations_active),
            ("deposits_committed", "counter", "Committed deposits", snapshot.deposits_committed),
            ("withdrawals_committed", "counter", "Committed withdrawals", snapshot.withdrawals_committed),
            ("transfers_committed", "counter", "Committed transfers", snapshot.transfers_committed),
            ("validation_rejected", "counter", "Requests rejected by validation", snapshot.validation_rejected),
            ("account_rejected", "counter", "Operations on missing or inactive accounts", snapshot.account_rejected),
            ("insufficient_funds", "counter", "Operations rejected for insufficient funds", snapshot.insufficient_funds),
            ("timeouts", "counter", "Units that exceeded the time bound", snapshot.timeouts),
            ("infrastructure_failed", "counter", "Units failed by the store", snapshot.infrastructure_failed),
            ("cancelled", "counter", "Operations abandoned by their caller", snapshot.cancelled),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            let _ = writeln!(out, "# HELP strongbox_{name} {help}");
            let _ = writeln!(out, "# TYPE strongbox_{name} {kind}");
            let _ = writeln!(out, "strongbox_{name} {value}\n");
        }
        out
    }
}

/// An operation counted in `operations_active`. Settle it with
/// [`committed`](Self::committed) or [`failed`](Self::failed); dropping it
/// unsettled counts the operation as cancelled.
pub struct ActiveOperation<'a> {
    metrics: &'a LedgerMetrics,
    settled: bool,
}

impl ActiveOperation<'_> {
    /// Record a committed operation.
    pub fn committed(mut self, record_type: RecordType) {
        self.settled = true;
        self.metrics.count_committed(record_type);
    }

    /// Record an operation whose unit was discarded.
    pub fn failed(mut self, error: &LedgerError) {
        self.settled = true;
        self.metrics.count_failed(error);
    }
}

impl Drop for ActiveOperation<'_> {
    fn drop(&mut self) {
        self.metrics.operations_active.fetch_sub(1, Ordering::Relaxed);
        if !self.settled {
            self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub operations_total: u64,
    pub operations_active: u64,
    pub deposits_committed: u64,
    pub withdrawals_committed: u64,
    pub transfers_committed: u64,
    pub validation_rejected: u64,
    pub account_rejected: u64,
    pub insufficient_funds: u64,
    pub timeouts: u64,
    pub infrastructure_failed: u64,
    pub cancelled: u64,
}

impl MetricsSnapshot {
    /// All committed operations.
    pub fn committed(&self) -> u64 {
        self.deposits_committed + self.withdrawals_committed + self.transfers_committed
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<LedgerMetrics>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use strongbox_common::AccountId;

    #[test]
    fn test_metrics_increment() {
        let metrics = LedgerMetrics::new();

        let pending = metrics.operation_started();
        metrics.operation_started().committed(RecordType::Transfer);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations_total, 2);
        assert_eq!(snapshot.transfers_committed, 1);
        assert_eq!(snapshot.operations_active, 1);
        drop(pending);
    }

    #[test]
    fn test_failures_are_classified() {
        let metrics = LedgerMetrics::new();

        metrics
            .operation_started()
            .failed(&LedgerError::InsufficientFunds {
                account_id: AccountId::new(1),
                available: Decimal::ZERO,
                requested: Decimal::ONE,
            });
        metrics
            .operation_started()
            .failed(&LedgerError::Timeout(std::time::Duration::from_secs(1)));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.insufficient_funds, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.cancelled, 0);
        assert_eq!(snapshot.operations_active, 0);
    }

    #[test]
    fn test_unsettled_operation_counts_as_cancelled() {
        let metrics = LedgerMetrics::new();
        drop(metrics.operation_started());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations_active, 0);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.committed(), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = LedgerMetrics::new();
        let _active = metrics.operation_started();

        let output = metrics.to_prometheus();
        assert!(output.contains("strongbox_operations_total 1"));
        assert!(output.contains("# TYPE strongbox_operations_active gauge"));
    }
}
