//! Generated operation streams for simulated traffic.

use anyhow::{anyhow, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use strongbox_common::{AccountId, Amount};
use strongbox_ledger::{LedgerEngine, LedgerRecord, LedgerResult, MemoryLedgerStore};

/// Shape of generated traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficKind {
    /// Small transfers between the first two accounts in alternating
    /// directions, sized so contention rather than funds decides outcomes.
    OpposingTransfers,
    /// Mixed deposits, withdrawals and transfers over random accounts.
    RandomTraffic,
    /// Withdrawals from one account that together exceed its balance.
    Overdraw,
}

/// One operation to submit to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    Deposit { account: AccountId, amount: Amount },
    Withdraw { account: AccountId, amount: Amount },
    Transfer { from: AccountId, to: AccountId, amount: Amount },
}

impl PlannedOp {
    /// Submit to `engine`.
    pub async fn execute(
        &self,
        engine: &LedgerEngine<MemoryLedgerStore>,
        description: &str,
    ) -> LedgerResult<LedgerRecord> {
        match *self {
            PlannedOp::Deposit { account, amount } => {
                engine.deposit(account, amount, description).await
            }
            PlannedOp::Withdraw { account, amount } => {
                engine.withdraw(account, amount, description).await
            }
            PlannedOp::Transfer { from, to, amount } => {
                engine.transfer(from, to, amount, description).await
            }
        }
    }
}

/// Seeded generator of operation streams.
pub struct WorkloadPlanner {
    rng: StdRng,
    initial_balance: Decimal,
}

impl WorkloadPlanner {
    /// Create a planner. The same seed yields the same streams.
    pub fn new(initial_balance: Amount, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            rng,
            initial_balance: initial_balance.value(),
        }
    }

    /// Plan `operations` operations of the given kind over `accounts`.
    pub fn plan(
        &mut self,
        kind: TrafficKind,
        accounts: &[AccountId],
        operations: usize,
    ) -> anyhow::Result<Vec<PlannedOp>> {
        ensure!(accounts.len() >= 2, "traffic needs at least two accounts");

        (0..operations)
            .map(|i| match kind {
                TrafficKind::OpposingTransfers => {
                    let (from, to) = if i % 2 == 0 {
                        (accounts[0], accounts[1])
                    } else {
                        (accounts[1], accounts[0])
                    };
                    let amount = self.random_amount(self.initial_balance / Decimal::from(1000))?;
                    Ok(PlannedOp::Transfer { from, to, amount })
                }
                TrafficKind::RandomTraffic => self.random_op(accounts),
                TrafficKind::Overdraw => {
                    let share = (self.initial_balance / Decimal::from(4)).round_dp(2);
                    let amount = Amount::new(share.max(Decimal::new(1, 2)))?;
                    Ok(PlannedOp::Withdraw {
                        account: accounts[0],
                        amount,
                    })
                }
            })
            .collect()
    }

    fn random_op(&mut self, accounts: &[AccountId]) -> anyhow::Result<PlannedOp> {
        let upper = self.initial_balance / Decimal::from(4);
        let amount = self.random_amount(upper)?;
        let account = accounts[self.rng.gen_range(0..accounts.len())];

        let op = match self.rng.gen_range(0..10) {
            0..=1 => PlannedOp::Deposit { account, amount },
            2..=3 => PlannedOp::Withdraw { account, amount },
            _ => {
                let mut to = accounts[self.rng.gen_range(0..accounts.len())];
                while to == account {
                    to = accounts[self.rng.gen_range(0..accounts.len())];
                }
                PlannedOp::Transfer {
                    from: account,
                    to,
                    amount,
                }
            }
        };
        Ok(op)
    }

    /// Random amount in `[0.01, upper]`.
    fn random_amount(&mut self, upper: Decimal) -> anyhow::Result<Amount> {
        let max_cents = (upper * Decimal::ONE_HUNDRED)
            .trunc()
            .to_i64()
            .ok_or_else(|| anyhow!("amount bound {upper} out of range"))?
            .max(1);
        let cents = self.rng.gen_range(1..=max_cents);
        Ok(Amount::new(Decimal::new(cents, 2))?)
    }
}
