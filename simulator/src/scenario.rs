//! Simulation scenarios.

use strongbox_ledger::{AccountStatus, FailPoint};

use crate::workload::TrafficKind;

/// A simulation scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone)]
pub enum ScenarioStep {
    /// Run generated traffic across all workers and wait for it to drain.
    Traffic { kind: TrafficKind, operations: usize },
    /// Arm a one-shot store failure.
    InjectFault { point: FailPoint },
    /// Change the status of the account at `account` (seeding order).
    SetStatus { account: usize, status: AccountStatus },
    /// Pause between steps.
    Wait { millis: u64 },
    /// Check every ledger invariant now.
    Checkpoint,
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 4] = [
        "opposing-transfers",
        "random-traffic",
        "overdraw",
        "failure-recovery",
    ];

    /// Load a scenario by name, scaled to `operations`.
    pub fn load(name: &str, operations: usize) -> anyhow::Result<Self> {
        match name {
            "opposing-transfers" => Ok(Self::opposing_transfers(operations)),
            "random-traffic" => Ok(Self::random_traffic(operations)),
            "overdraw" => Ok(Self::overdraw(operations)),
            "failure-recovery" => Ok(Self::failure_recovery(operations)),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    fn opposing_transfers(operations: usize) -> Self {
        Self {
            name: "opposing-transfers".to_string(),
            description: "Two accounts paying each other concurrently".to_string(),
            steps: vec![ScenarioStep::Traffic {
                kind: TrafficKind::OpposingTransfers,
                operations,
            }],
        }
    }

    fn random_traffic(operations: usize) -> Self {
        Self {
            name: "random-traffic".to_string(),
            description: "Mixed deposits, withdrawals and transfers".to_string(),
            steps: vec![ScenarioStep::Traffic {
                kind: TrafficKind::RandomTraffic,
                operations,
            }],
        }
    }

    fn overdraw(operations: usize) -> Self {
        Self {
            name: "overdraw".to_string(),
            description: "Concurrent withdrawals exceeding one balance".to_string(),
            steps: vec![ScenarioStep::Traffic {
                kind: TrafficKind::Overdraw,
                operations,
            }],
        }
    }

    /// Store failures and a suspended account in the middle of traffic.
    fn failure_recovery(operations: usize) -> Self {
        let quarter = (operations / 4).max(1);
        Self {
            name: "failure-recovery".to_string(),
            description: "Traffic through a failed commit and a suspended account".to_string(),
            steps: vec![
                ScenarioStep::Traffic {
                    kind: TrafficKind::RandomTraffic,
                    operations: quarter,
                },
                ScenarioStep::Checkpoint,
                ScenarioStep::InjectFault {
                    point: FailPoint::Commit,
                },
                ScenarioStep::Traffic {
                    kind: TrafficKind::RandomTraffic,
                    operations: quarter,
                },
                ScenarioStep::Checkpoint,
                ScenarioStep::SetStatus {
                    account: 1,
                    status: AccountStatus::Suspended,
                },
                ScenarioStep::Traffic {
                    kind: TrafficKind::RandomTraffic,
                    operations: quarter,
                },
                ScenarioStep::Wait { millis: 10 },
                ScenarioStep::SetStatus {
                    account: 1,
                    status: AccountStatus::Active,
                },
                ScenarioStep::Traffic {
                    kind: TrafficKind::RandomTraffic,
                    operations: quarter,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_loads() {
        for name in Scenario::NAMES {
            let scenario = Scenario::load(name, 100).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
    }

    #[test]
    fn test_unknown_scenario() {
        let err = Scenario::load("high-volume", 10).unwrap_err();
        assert!(err.to_string().contains("opposing-transfers"));
    }
}
