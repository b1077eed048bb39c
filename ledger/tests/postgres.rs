//! PostgreSQL store tests. Skipped unless `DATABASE_URL` is set.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use strongbox_common::Amount;
use strongbox_ledger::{
    AccountStatus, DatabaseConfig, ErrorKind, LedgerConfig, LedgerEngine, PgLedgerStore,
    RecordType,
};

async fn connect() -> Option<PgLedgerStore> {
    let Ok(url) = env::var("DATABASE_URL") else {
        eprintln!("Skipping: DATABASE_URL not set");
        return None;
    };

    let config = DatabaseConfig {
        url,
        min_connections: 0,
        acquire_timeout: Duration::from_secs(5),
        ..DatabaseConfig::default()
    };
    let store = PgLedgerStore::connect(&config).await.ok()?;
    store.migrate().await.unwrap();
    Some(store)
}

fn amount(v: Decimal) -> Amount {
    Amount::new(v).unwrap()
}

#[tokio::test]
async fn pg_scenarios() {
    let Some(store) = connect().await else { return };
    let x = store.create_account().await.unwrap().id;
    let y = store.create_account().await.unwrap().id;
    let engine = LedgerEngine::new(store.clone(), &LedgerConfig::default());

    engine.deposit(x, amount(dec!(1000.00)), "seed").await.unwrap();
    let pay = engine.transfer(x, y, amount(dec!(200.00)), "pay").await.unwrap();
    assert_eq!(pay.record_type, RecordType::Transfer);
    engine.withdraw(x, amount(dec!(100.00)), "atm").await.unwrap();

    let err = engine.withdraw(x, amount(dec!(10000.00)), "atm").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    assert_eq!(engine.get_balance(x).await.unwrap(), dec!(700.00));
    assert_eq!(engine.get_balance(y).await.unwrap(), dec!(200.00));

    store.set_status(y, AccountStatus::Suspended).await.unwrap();
    let err = engine.deposit(y, amount(dec!(50.00)), "x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotActive);

    let page = engine.account_records(x, 1, 10).await.unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.records[0].record_type, RecordType::Withdraw);

    let recent = engine.recent_records(x, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].id, pay.id);

    let window = engine
        .records_between(x, pay.created_at, recent[0].created_at)
        .await
        .unwrap();
    assert_eq!(window.len(), 2);

    for id in [x, y] {
        assert!(engine.reconcile(id).await.unwrap().is_consistent());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pg_opposing_transfers_do_not_deadlock() {
    let Some(store) = connect().await else { return };
    let x = store.create_account().await.unwrap().id;
    let y = store.create_account().await.unwrap().id;
    let engine = Arc::new(LedgerEngine::new(store, &LedgerConfig::default()));

    engine.deposit(x, amount(dec!(500)), "seed").await.unwrap();
    engine.deposit(y, amount(dec!(500)), "seed").await.unwrap();

    let tasks = (0..40).map(|i| {
        let engine = Arc::clone(&engine);
        let (from, to) = if i % 2 == 0 { (x, y) } else { (y, x) };
        tokio::spawn(async move { engine.transfer(from, to, amount(dec!(1.25)), "swap").await })
    });

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }
    assert_eq!(engine.get_balance(x).await.unwrap(), dec!(500));
    assert_eq!(engine.get_balance(y).await.unwrap(), dec!(500));
}
