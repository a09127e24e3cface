use bullpen_core::trade::entity::{AccountId, Fill, OrderId, OrderSide};
use bullpen_core::trade::port::{AccountPort, TradeError};
use bullpen_store::account::SqliteAccountStore;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::tempdir;

fn fill(order: &str, account: &AccountId, side: OrderSide, price: Decimal, shares: i64) -> Fill {
    Fill {
        order_id: OrderId(order.to_string()),
        account_id: account.clone(),
        symbol: "AAPL".to_string(),
        side,
        price,
        shares,
        commission: Decimal::ZERO,
        executed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_open_account_lifecycle() {
    let tmp_dir = tempdir().unwrap();
    let store = SqliteAccountStore::new(tmp_dir.path()).unwrap();
    let acct = AccountId("alice".to_string());

    // 未开户
    assert!(matches!(store.snapshot(&acct).await, Err(TradeError::AccountNotFound(_))));

    store.open_account(&acct, dec!(1000)).await.unwrap();
    assert!(tmp_dir.path().join("accounts").join("account_alice.db").exists());
    assert!(matches!(
        store.open_account(&acct, dec!(1000)).await,
        Err(TradeError::AccountExists(_))
    ));

    // 非法 ID 不会触碰文件系统
    let evil = AccountId("../etc".to_string());
    assert!(matches!(store.snapshot(&evil).await, Err(TradeError::AccountNotFound(_))));

    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(1000));
    assert_eq!(snap.reserved_balance, dec!(0));
    assert!(snap.positions.is_empty());

    // 重新打开同一目录，数据仍然存在
    let reopened = SqliteAccountStore::new(tmp_dir.path()).unwrap();
    assert_eq!(reopened.snapshot(&acct).await.unwrap().available_balance, dec!(1000));
}

#[tokio::test]
async fn test_buy_sell_positions_and_ledger() {
    let tmp_dir = tempdir().unwrap();
    let store = SqliteAccountStore::new(tmp_dir.path()).unwrap();
    let acct = AccountId("bob".to_string());
    store.open_account(&acct, dec!(10000)).await.unwrap();

    store.apply_fill(&acct, &fill("o1", &acct, OrderSide::Buy, dec!(100), 10), dec!(0)).await.unwrap();
    store.apply_fill(&acct, &fill("o2", &acct, OrderSide::Buy, dec!(130), 10), dec!(0)).await.unwrap();

    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(7700));
    let pos = snap.position("AAPL").unwrap();
    assert_eq!(pos.shares, 20);
    assert_eq!(pos.average_cost, dec!(115));
    assert_eq!(pos.last_price, dec!(130));

    // 超卖被拒绝且账户不变
    let oversell = store.apply_fill(&acct, &fill("o3", &acct, OrderSide::Sell, dec!(120), 25), dec!(0)).await;
    assert!(matches!(oversell, Err(TradeError::InsufficientShares { required: 25, available: 20 })));

    store.apply_fill(&acct, &fill("o4", &acct, OrderSide::Sell, dec!(120), 5), dec!(0)).await.unwrap();
    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(8300));
    assert_eq!(snap.position("AAPL").unwrap().shares, 15);
    // 卖出不改变平均成本
    assert_eq!(snap.position("AAPL").unwrap().average_cost, dec!(115));

    // 清仓后持仓记录删除
    store.apply_fill(&acct, &fill("o5", &acct, OrderSide::Sell, dec!(110), 15), dec!(0)).await.unwrap();
    let snap = store.snapshot(&acct).await.unwrap();
    assert!(snap.positions.is_empty());
    assert_eq!(snap.available_balance, dec!(9950));

    let fills = store.list_fills(&acct, 10).await.unwrap();
    assert_eq!(fills.len(), 4);
    assert_eq!(fills[0].order_id.0, "o5");
    assert_eq!(fills[0].side, OrderSide::Sell);

    let ledger = store.list_ledger(&acct, 100).await.unwrap();
    // 开户 + 4 笔成交
    assert_eq!(ledger.len(), 5);
    assert_eq!(ledger[0].balance_after, dec!(9950));
    assert_eq!(ledger.last().unwrap().action, "Open");
}

#[tokio::test]
async fn test_freeze_and_fill_with_reservation() {
    let tmp_dir = tempdir().unwrap();
    let store = SqliteAccountStore::new(tmp_dir.path()).unwrap();
    let acct = AccountId("carol".to_string());
    store.open_account(&acct, dec!(1000)).await.unwrap();

    let err = store.freeze_funds(&acct, dec!(1500)).await;
    assert!(matches!(err, Err(TradeError::InsufficientFunds { .. })));

    store.freeze_funds(&acct, dec!(600)).await.unwrap();
    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(400));
    assert_eq!(snap.reserved_balance, dec!(600));
    assert_eq!(snap.cash(), dec!(1000));

    // 成交价低于冻结额：差额退回可用余额
    store.apply_fill(&acct, &fill("q1", &acct, OrderSide::Buy, dec!(55), 10), dec!(600)).await.unwrap();
    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(450));
    assert_eq!(snap.reserved_balance, dec!(0));

    // 成交价高于冻结额：差额从可用余额补足
    store.freeze_funds(&acct, dec!(200)).await.unwrap();
    store.apply_fill(&acct, &fill("q2", &acct, OrderSide::Buy, dec!(25), 10), dec!(200)).await.unwrap();
    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(200));
    assert_eq!(snap.reserved_balance, dec!(0));

    // 解冻超过冻结额时按实际冻结额解冻
    store.freeze_funds(&acct, dec!(50)).await.unwrap();
    store.unfreeze_funds(&acct, dec!(80)).await.unwrap();
    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(200));
    assert_eq!(snap.reserved_balance, dec!(0));
}

#[tokio::test]
async fn test_admin_balance_operations() {
    let tmp_dir = tempdir().unwrap();
    let store = SqliteAccountStore::new(tmp_dir.path()).unwrap();
    let acct = AccountId("dave".to_string());
    store.open_account(&acct, dec!(100)).await.unwrap();

    assert_eq!(store.adjust_balance(&acct, dec!(50.5), "bonus").await.unwrap(), dec!(150.5));
    assert!(matches!(
        store.adjust_balance(&acct, dec!(-200), "penalty").await,
        Err(TradeError::InsufficientFunds { .. })
    ));
    assert_eq!(store.set_balance(&acct, dec!(42), "reset").await.unwrap(), dec!(42));
    assert!(matches!(
        store.set_balance(&acct, dec!(-1), "bad").await,
        Err(TradeError::InvalidAmount(_))
    ));

    let ledger = store.list_ledger(&acct, 10).await.unwrap();
    assert_eq!(ledger[0].action, "Set");
    assert_eq!(ledger[0].available_change, dec!(-108.5));
    assert_eq!(ledger[0].memo.as_deref(), Some("reset"));
}

#[tokio::test]
async fn test_sqlite_account_high_concurrency() {
    let tmp_dir = tempdir().unwrap();
    let store = Arc::new(SqliteAccountStore::new(tmp_dir.path()).unwrap());
    let acct = AccountId("concurrent".to_string());
    store.open_account(&acct, dec!(1000.0)).await.unwrap();

    let mut handles = vec![];
    // 50 个并发买单：先冻结 15，再按 14 成交
    for i in 0..50 {
        let store = store.clone();
        let acct = acct.clone();
        handles.push(tokio::spawn(async move {
            let reserved = dec!(15.0);
            if store.freeze_funds(&acct, reserved).await.is_ok() {
                let f = fill(&format!("O_{}", i), &acct, OrderSide::Buy, dec!(14.0), 1);
                store.apply_fill(&acct, &f, reserved).await.expect("Trade DB Error");
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let snap = store.snapshot(&acct).await.unwrap();
    assert_eq!(snap.available_balance, dec!(300.0));
    assert_eq!(snap.reserved_balance, dec!(0.0));
    assert_eq!(snap.positions.len(), 1);
    assert_eq!(snap.positions[0].shares, 50);
}
