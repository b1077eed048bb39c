//! End-to-end ledger scenarios against the in-memory store.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use strongbox_common::{AccountId, Amount};
use strongbox_ledger::{
    AccountStatus, ErrorKind, LedgerConfig, LedgerEngine, LedgerError, MemoryLedgerStore,
    RecordType,
};

struct Fixture {
    engine: LedgerEngine<MemoryLedgerStore>,
    x: AccountId,
    y: AccountId,
}

fn setup() -> Fixture {
    let store = MemoryLedgerStore::new();
    let x = store.create_account().id;
    let y = store.create_account().id;
    Fixture {
        engine: LedgerEngine::new(store, &LedgerConfig::default()),
        x,
        y,
    }
}

fn amount(v: Decimal) -> Amount {
    Amount::new(v).unwrap()
}

async fn balance(f: &Fixture, id: AccountId) -> Decimal {
    f.engine.get_balance(id).await.unwrap()
}

#[tokio::test]
async fn deposit_transfer_withdraw_flow() {
    let f = setup();

    let seed = f.engine.deposit(f.x, amount(dec!(1000.00)), "seed").await.unwrap();
    assert_eq!(balance(&f, f.x).await, dec!(1000.00));
    assert_eq!(seed.to_account_id, Some(f.x));
    assert_eq!(seed.from_account_id, None);
    assert_eq!(seed.amount, dec!(1000));
    assert_eq!(seed.record_type, RecordType::Deposit);

    let pay = f.engine.transfer(f.x, f.y, amount(dec!(200.00)), "pay").await.unwrap();
    assert_eq!(balance(&f, f.x).await, dec!(800.00));
    assert_eq!(balance(&f, f.y).await, dec!(200.00));
    assert_eq!(pay.from_account_id, Some(f.x));
    assert_eq!(pay.to_account_id, Some(f.y));
    assert_eq!(pay.record_type, RecordType::Transfer);

    let atm = f.engine.withdraw(f.x, amount(dec!(100.00)), "atm").await.unwrap();
    assert_eq!(balance(&f, f.x).await, dec!(700.00));
    assert_eq!(atm.from_account_id, Some(f.x));
    assert_eq!(atm.to_account_id, None);

    assert_eq!(f.engine.store().record_count(), 3);
}

#[tokio::test]
async fn overdraw_is_rejected_without_trace() {
    let f = setup();
    f.engine.deposit(f.x, amount(dec!(700.00)), "seed").await.unwrap();

    let err = f
        .engine
        .withdraw(f.x, amount(dec!(10000.00)), "atm")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(err.to_string(), "Insufficient funds: have 700.00, need 10000.00");
    assert_eq!(balance(&f, f.x).await, dec!(700.00));
    assert_eq!(f.engine.store().record_count(), 1);
}

#[tokio::test]
async fn self_transfer_is_rejected_before_locking() {
    let f = setup();
    f.engine.deposit(f.x, amount(dec!(50)), "seed").await.unwrap();
    f.engine.store().enable_lock_trace();

    let err = f
        .engine
        .transfer(f.x, f.x, amount(dec!(10.00)), "oops")
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::SelfTransfer(id) if id == f.x));
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(f.engine.store().take_lock_trace().is_empty());
    assert_eq!(f.engine.store().record_count(), 1);
}

#[tokio::test]
async fn suspended_account_cannot_receive() {
    let f = setup();
    f.engine
        .store()
        .set_status(f.x, AccountStatus::Suspended)
        .await
        .unwrap();

    let err = f.engine.deposit(f.x, amount(dec!(50.00)), "x").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AccountNotActive);
    assert_eq!(err.to_string(), format!("account {} is suspended", f.x));
    assert_eq!(balance(&f, f.x).await, Decimal::ZERO);
    assert_eq!(f.engine.store().record_count(), 0);
}

#[tokio::test]
async fn suspended_sender_is_named() {
    let f = setup();
    f.engine.deposit(f.x, amount(dec!(100)), "seed").await.unwrap();
    f.engine
        .store()
        .set_status(f.x, AccountStatus::Suspended)
        .await
        .unwrap();

    let err = f.engine.transfer(f.x, f.y, amount(dec!(5)), "pay").await.unwrap_err();
    assert_eq!(err.to_string(), format!("sender account {} is suspended", f.x));
    assert_eq!(balance(&f, f.x).await, dec!(100));
    assert_eq!(balance(&f, f.y).await, Decimal::ZERO);
}

#[tokio::test]
async fn missing_accounts_are_reported() {
    let f = setup();
    let ghost = AccountId::new(999);

    let err = f.engine.deposit(ghost, amount(dec!(1)), "x").await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(id) if id == ghost));

    let err = f.engine.transfer(f.x, ghost, amount(dec!(1)), "x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotFound);
    assert_eq!(err.error_code(), "ACCOUNT_NOT_FOUND");
}

#[tokio::test]
async fn invalid_amounts_never_reach_the_store() {
    let f = setup();

    for raw in ["0", "-5", "0.001", "1000000.01"] {
        let err = match Amount::parse(raw) {
            Err(e) => LedgerError::from(e),
            Ok(a) => f.engine.deposit(f.x, a, "x").await.unwrap_err(),
        };
        assert_eq!(err.kind(), ErrorKind::ValidationError, "amount {raw}");
    }

    let snapshot = f.engine.metrics().snapshot();
    assert_eq!(snapshot.operations_total, 0);
    assert_eq!(f.engine.store().record_count(), 0);
}

#[tokio::test]
async fn record_trail_matches_balances() {
    let f = setup();
    f.engine.deposit(f.x, amount(dec!(1000)), "seed").await.unwrap();
    for i in 0..5 {
        f.engine
            .transfer(f.x, f.y, amount(dec!(10.25)), &format!("pay {i}"))
            .await
            .unwrap();
    }
    f.engine.withdraw(f.y, amount(dec!(1.25)), "fee").await.unwrap();

    for id in [f.x, f.y] {
        let r = f.engine.reconcile(id).await.unwrap();
        assert!(r.is_consistent(), "account {id} drifted by {}", r.drift());
    }

    let page = f.engine.account_records(f.y, 1, 4).await.unwrap();
    assert_eq!(page.total_count, 6);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.records[0].record_type, RecordType::Withdraw);

    let last = f.engine.account_records(f.y, 2, 4).await.unwrap();
    assert_eq!(last.records.len(), 2);
}
