//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use strongbox_common::{AccountId, Amount};
use strongbox_ledger::{
    LedgerConfig, LedgerEngine, MemoryLedgerStore, MetricsSnapshot, RecordType,
};

use crate::metrics::SimulationMetrics;
use crate::scenario::{Scenario, ScenarioStep};
use crate::workload::{PlannedOp, TrafficKind, WorkloadPlanner};

/// Size of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// Accounts to create and seed.
    pub accounts: usize,
    /// Concurrent workers submitting operations.
    pub workers: usize,
    /// Balance deposited into each account before traffic starts.
    pub initial_balance: Amount,
    /// Random seed for reproducible traffic.
    pub seed: Option<u64>,
}

/// Summary printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub accounts: usize,
    pub workers: usize,
    pub elapsed_ms: u128,
    pub throughput_per_sec: f64,
    pub average_latency_us: u64,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,
    pub metrics: SimulationMetrics,
    pub ledger: MetricsSnapshot,
    pub total_balance: Decimal,
    pub violations: Vec<String>,
}

/// Drives scenarios against one in-memory ledger.
pub struct SimulationController {
    settings: SimulationSettings,
    engine: Arc<LedgerEngine<MemoryLedgerStore>>,
    planner: WorkloadPlanner,
    /// Accounts in seeding order.
    accounts: Vec<AccountId>,
    /// Money present after seeding.
    seeded_total: Decimal,
    /// Committed deposits minus committed withdrawals since seeding.
    net_flow: Arc<RwLock<Decimal>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Violations found at checkpoints.
    violations: Vec<String>,
    elapsed: Duration,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(settings: SimulationSettings, config: &LedgerConfig) -> Self {
        let engine = LedgerEngine::new(MemoryLedgerStore::new(), config);
        let planner = WorkloadPlanner::new(settings.initial_balance, settings.seed);

        Self {
            settings,
            engine: Arc::new(engine),
            planner,
            accounts: Vec::new(),
            seeded_total: Decimal::ZERO,
            net_flow: Arc::new(RwLock::new(Decimal::ZERO)),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            violations: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Create and fund the accounts.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(accounts = self.settings.accounts, "Initializing simulation");

        let store = self.engine.store();
        for _ in 0..self.settings.accounts {
            let account = store.create_account();
            self.engine
                .deposit(account.id, self.settings.initial_balance, "initial funding")
                .await?;
            self.accounts.push(account.id);
        }

        self.seeded_total =
            self.settings.initial_balance.value() * Decimal::from(self.accounts.len() as u64);
        info!(
            accounts = self.accounts.len(),
            each = %self.settings.initial_balance,
            total = %self.seeded_total,
            "Accounts funded"
        );
        Ok(())
    }

    /// Run a scenario.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            scenario = %scenario.name,
            description = %scenario.description,
            "Running scenario"
        );

        let start = Instant::now();
        for step in &scenario.steps {
            self.execute_step(step).await?;
        }
        self.elapsed += start.elapsed();

        Ok(())
    }

    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Traffic { kind, operations } => {
                self.run_traffic(*kind, *operations).await?;
            }
            ScenarioStep::InjectFault { point } => {
                info!(point = ?point, "Injecting store failure");
                self.engine.store().inject_failure(*point);
            }
            ScenarioStep::SetStatus { account, status } => {
                let id = *self
                    .accounts
                    .get(*account)
                    .ok_or_else(|| anyhow!("no account at index {account}"))?;
                self.engine.store().set_status(id, *status).await?;
            }
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Checkpoint => {
                let found = self.verify().await?;
                if found.is_empty() {
                    info!("Checkpoint passed");
                } else {
                    warn!(violations = found.len(), "Checkpoint failed");
                }
                self.violations.extend(found);
            }
        }

        Ok(())
    }

    /// Spread planned operations over the workers and wait for all of them.
    async fn run_traffic(&mut self, kind: TrafficKind, operations: usize) -> anyhow::Result<()> {
        let plan = self.planner.plan(kind, &self.accounts, operations)?;
        let workers = self.settings.workers.max(1);
        info!(kind = ?kind, operations = plan.len(), workers, "Starting traffic");

        let mut queues: Vec<Vec<PlannedOp>> = (0..workers).map(|_| Vec::new()).collect();
        for (i, op) in plan.into_iter().enumerate() {
            queues[i % workers].push(op);
        }

        let handles = queues.into_iter().enumerate().map(|(worker, ops)| {
            let engine = Arc::clone(&self.engine);
            let metrics = Arc::clone(&self.metrics);
            let net_flow = Arc::clone(&self.net_flow);

            tokio::spawn(async move {
                let description = format!("simulator worker {worker}");
                for op in ops {
                    let started = Instant::now();
                    match op.execute(&engine, &description).await {
                        Ok(record) => {
                            metrics.write().await.record_success(started.elapsed());
                            let delta = match record.record_type {
                                RecordType::Deposit => record.amount,
                                RecordType::Withdraw => -record.amount,
                                RecordType::Transfer => Decimal::ZERO,
                            };
                            *net_flow.write().await += delta;
                        }
                        Err(e) => {
                            debug!(worker, code = e.error_code(), "Operation failed");
                            metrics.write().await.record_failure(e.kind());
                        }
                    }
                }
            })
        });

        for result in join_all(handles).await {
            result?;
        }
        Ok(())
    }

    /// Check money conservation, non-negative balances and that every
    /// stored balance matches its record trail.
    pub async fn verify(&self) -> anyhow::Result<Vec<String>> {
        let mut violations = Vec::new();

        let (accounts, _) = self.engine.store().snapshot();
        let total: Decimal = accounts.iter().map(|a| a.balance).sum();
        let expected = self.seeded_total + *self.net_flow.read().await;
        if total != expected {
            violations.push(format!("money not conserved: total {total}, expected {expected}"));
        }

        for account in accounts.iter().filter(|a| a.balance < Decimal::ZERO) {
            violations.push(format!(
                "account {} is negative: {}",
                account.id, account.balance
            ));
        }

        for id in self.engine.store().account_ids() {
            let reconciliation = self.engine.reconcile(id).await?;
            if !reconciliation.is_consistent() {
                violations.push(format!(
                    "account {} drifted from its records by {}",
                    id,
                    reconciliation.drift()
                ));
            }
        }

        Ok(violations)
    }

    /// Final report, including a last invariant check.
    pub async fn report(&self, scenario: &Scenario) -> anyhow::Result<SimulationReport> {
        let mut violations = self.violations.clone();
        violations.extend(self.verify().await?);

        let metrics = self.get_metrics().await;
        let (accounts, _) = self.engine.store().snapshot();

        Ok(SimulationReport {
            scenario: scenario.name.clone(),
            accounts: self.accounts.len(),
            workers: self.settings.workers,
            elapsed_ms: self.elapsed.as_millis(),
            throughput_per_sec: metrics.throughput(self.elapsed),
            average_latency_us: metrics.average_latency_us(),
            p50_latency_us: metrics.p50_latency_us(),
            p99_latency_us: metrics.p99_latency_us(),
            metrics,
            ledger: self.engine.metrics().snapshot(),
            total_balance: accounts.iter().map(|a| a.balance).sum(),
            violations,
        })
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    /// Ledger counters in Prometheus text format.
    pub fn prometheus(&self) -> String {
        self.engine.metrics().to_prometheus()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn run(name: &str, operations: usize) -> SimulationReport {
        let settings = SimulationSettings {
            accounts: 4,
            workers: 4,
            initial_balance: Amount::new(dec!(1000)).unwrap(),
            seed: Some(42),
        };
        let mut controller = SimulationController::new(settings, &LedgerConfig::default());
        controller.initialize().await.unwrap();

        let scenario = Scenario::load(name, operations).unwrap();
        controller.run_scenario(&scenario).await.unwrap();
        controller.report(&scenario).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposing_transfers_conserve() {
        let report = run("opposing-transfers", 200).await;
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.metrics.committed, 200);
        assert_eq!(report.total_balance, dec!(4000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overdraw_is_refused() {
        let report = run("overdraw", 20).await;
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.metrics.committed, 4);
        assert_eq!(report.metrics.insufficient_funds, 16);
        assert_eq!(report.total_balance, dec!(3000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_recovery_keeps_invariants() {
        let report = run("failure-recovery", 200).await;
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.metrics.infrastructure_failures, 1);
        assert_eq!(report.ledger.infrastructure_failed, 1);
        assert_eq!(report.metrics.total_operations, 200);
    }

    #[tokio::test]
    async fn test_random_traffic_report() {
        let report = run("random-traffic", 100).await;
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.metrics.total_operations, 100);
        assert_eq!(report.ledger.committed(), 4 + report.metrics.committed);
    }
}
