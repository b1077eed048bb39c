//! Scoped handling of one atomic unit.
//!
//! [`UnitScope`] owns an open unit and guarantees that exactly one of
//! commit or discard takes effect on every exit path. A normal finish goes
//! through [`UnitScope::finish`]; if the scope is dropped instead (early
//! return, panic unwind, timed-out future) the unit is dropped with it,
//! which the [`LedgerUnit`] contract defines as a discard.

use tracing::{debug, error, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerUnit;

/// Progress of a single operation inside its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitPhase {
    /// Unit opened, inputs already validated.
    Validated,
    /// Exclusive lock held on every involved row.
    LockAcquired,
    /// Status and funds rules checked.
    BalanceChecked,
    /// New balances staged.
    BalancesWritten,
    /// Ledger record appended.
    RecordInserted,
    /// All writes published.
    Committed,
    /// All writes dropped.
    Aborted,
}

impl UnitPhase {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, UnitPhase::Committed | UnitPhase::Aborted)
    }

    /// Get valid next phases from the current phase.
    pub fn valid_transitions(&self) -> &[UnitPhase] {
        match self {
            UnitPhase::Validated => &[UnitPhase::LockAcquired, UnitPhase::Aborted],
            UnitPhase::LockAcquired => &[UnitPhase::BalanceChecked, UnitPhase::Aborted],
            UnitPhase::BalanceChecked => &[UnitPhase::BalancesWritten, UnitPhase::Aborted],
            UnitPhase::BalancesWritten => &[UnitPhase::RecordInserted, UnitPhase::Aborted],
            UnitPhase::RecordInserted => &[UnitPhase::Committed, UnitPhase::Aborted],
            UnitPhase::Committed => &[],
            UnitPhase::Aborted => &[],
        }
    }

    /// Check if transition to given phase is valid.
    pub fn can_transition_to(&self, next: UnitPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Owns an open unit until it is committed or discarded.
pub struct UnitScope<U: LedgerUnit> {
    unit: Option<U>,
    phase: UnitPhase,
}

impl<U: LedgerUnit> UnitScope<U> {
    /// Wrap a freshly opened unit.
    pub fn new(unit: U) -> Self {
        Self {
            unit: Some(unit),
            phase: UnitPhase::Validated,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> UnitPhase {
        self.phase
    }

    /// Access the open unit.
    pub fn unit(&mut self) -> &mut U {
        self.unit
            .as_mut()
            .expect("unit is present until the scope finishes")
    }

    /// Record progress.
    pub fn advance(&mut self, next: UnitPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid unit transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = ?self.phase, to = ?next, "Unit phase");
        self.phase = next;
    }

    /// Commit on `Ok`, discard on `Err`, and hand the outcome back.
    pub async fn finish<T>(mut self, outcome: LedgerResult<T>) -> LedgerResult<T> {
        let unit = self
            .unit
            .take()
            .expect("unit is present until the scope finishes");

        match outcome {
            Ok(value) => match unit.commit().await {
                Ok(()) => {
                    self.advance(UnitPhase::Committed);
                    Ok(value)
                }
                Err(e) => {
                    self.phase = UnitPhase::Aborted;
                    error!(error = %e, "Commit failed; unit discarded");
                    Err(LedgerError::Infrastructure(e))
                }
            },
            Err(err) => {
                self.phase = UnitPhase::Aborted;
                if let Err(e) = unit.discard().await {
                    error!(error = %e, "Discard failed; store drops the unit");
                }
                Err(err)
            }
        }
    }
}

impl<U: LedgerUnit> Drop for UnitScope<U> {
    fn drop(&mut self) {
        if self.unit.take().is_some() {
            warn!(phase = ?self.phase, "Unit abandoned before commit; discarding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_happy_path() {
        let path = [
            UnitPhase::Validated,
            UnitPhase::LockAcquired,
            UnitPhase::BalanceChecked,
            UnitPhase::BalancesWritten,
            UnitPhase::RecordInserted,
            UnitPhase::Committed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(UnitPhase::Committed.is_final());
    }

    #[test]
    fn test_abort_reachable_until_commit() {
        for phase in [
            UnitPhase::Validated,
            UnitPhase::LockAcquired,
            UnitPhase::BalanceChecked,
            UnitPhase::BalancesWritten,
            UnitPhase::RecordInserted,
        ] {
            assert!(phase.can_transition_to(UnitPhase::Aborted));
        }
        assert!(!UnitPhase::Committed.can_transition_to(UnitPhase::Aborted));
        assert!(!UnitPhase::Aborted.can_transition_to(UnitPhase::Committed));
        assert!(!UnitPhase::Validated.can_transition_to(UnitPhase::BalancesWritten));
    }

    mod scope {
        use super::*;
        use crate::memory::{MemoryLedgerStore, MemoryUnit};
        use crate::record::NewRecord;
        use crate::store::{LedgerReader, LedgerStore, LedgerUnit};
        use rust_decimal_macros::dec;
        use strongbox_common::{AccountId, Amount};

        fn seeded() -> (MemoryLedgerStore, AccountId) {
            let store = MemoryLedgerStore::new();
            let id = store.create_account().id;
            (store, id)
        }

        async fn stage_deposit(scope: &mut UnitScope<MemoryUnit>, id: AccountId) {
            let balance = scope.unit().lock_and_read_balance(id).await.unwrap();
            scope.advance(UnitPhase::LockAcquired);
            scope.advance(UnitPhase::BalanceChecked);
            scope.unit().write_balance(id, balance + dec!(5)).await.unwrap();
            scope.advance(UnitPhase::BalancesWritten);
            scope
                .unit()
                .insert_record(NewRecord::deposit(id, Amount::new(dec!(5)).unwrap(), "t"))
                .await
                .unwrap();
            scope.advance(UnitPhase::RecordInserted);
        }

        #[test]
        fn test_finish_ok_commits() {
            let (store, id) = seeded();
            tokio_test::block_on(async {
                let mut scope = UnitScope::new(store.begin_unit().await.unwrap());
                stage_deposit(&mut scope, id).await;
                scope.finish(Ok(())).await.unwrap();

                assert_eq!(store.balance(id).await.unwrap(), dec!(5));
                assert_eq!(store.record_count(), 1);
            });
        }

        #[test]
        fn test_finish_err_discards() {
            let (store, id) = seeded();
            tokio_test::block_on(async {
                let mut scope = UnitScope::new(store.begin_unit().await.unwrap());
                stage_deposit(&mut scope, id).await;
                let outcome: LedgerResult<()> = Err(LedgerError::AccountNotFound(id));
                assert!(scope.finish(outcome).await.is_err());

                assert_eq!(store.balance(id).await.unwrap(), dec!(0));
                assert_eq!(store.record_count(), 0);

                // row lock was released
                let mut unit = store.begin_unit().await.unwrap();
                unit.lock_and_read_balance(id).await.unwrap();
            });
        }

        #[test]
        fn test_dropped_scope_discards() {
            let (store, id) = seeded();
            tokio_test::block_on(async {
                let mut scope = UnitScope::new(store.begin_unit().await.unwrap());
                stage_deposit(&mut scope, id).await;
                drop(scope);

                assert_eq!(store.record_count(), 0);
                let mut unit = store.begin_unit().await.unwrap();
                assert_eq!(unit.lock_and_read_balance(id).await.unwrap(), dec!(0));
            });
        }
    }
}
