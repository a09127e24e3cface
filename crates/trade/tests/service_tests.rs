use bullpen_cache::mem::MemCache;
use bullpen_core::common::time::FakeClockProvider;
use bullpen_core::market::entity::{ArtificialPrice, MarketOverride, PriceSource};
use bullpen_core::market::port::{MarketClock, PricePort};
use bullpen_core::store::port::{SystemStore, User, UserRole};
use bullpen_core::test_utils::StaticQuoteProvider;
use async_trait::async_trait;
use bullpen_core::trade::entity::{
    AccountId, Order, OrderId, OrderOutcome, OrderRequest, OrderSide, OrderStatus,
};
use bullpen_core::trade::port::{AccountPort, PendingOrderPort, TradeError, TradePort};
use bullpen_market::clock::MarketService;
use bullpen_market::price::PriceService;
use bullpen_store::account::SqliteAccountStore;
use bullpen_store::pending_order::MemoryPendingOrderStore;
use bullpen_store::system::SqliteSystemStore;
use bullpen_trade::leaderboard::LeaderboardService;
use bullpen_trade::matcher::LocalMatchEngine;
use bullpen_trade::queue::QueueWorker;
use bullpen_trade::service::TradeService;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct Harness {
    tmp: TempDir,
    system: Arc<SqliteSystemStore>,
    accounts: Arc<SqliteAccountStore>,
    provider: Arc<StaticQuoteProvider>,
    prices: Arc<PriceService>,
    market: Arc<MarketService>,
    clock: Arc<FakeClockProvider>,
    service: Arc<TradeService>,
}

// 2026-03-02 周一 15:00 UTC = 10:00 EST，开市
fn monday_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
}

// 同日 16:30 EST，已收盘
fn monday_closed() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 21, 30, 0).unwrap()
}

// 次日 10:00 EST
fn tuesday_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, 15, 0, 0).unwrap()
}

async fn harness(commission: Decimal) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let system = Arc::new(SqliteSystemStore::new(tmp.path()).await.unwrap());
    let accounts = Arc::new(SqliteAccountStore::new(tmp.path()).unwrap());
    let provider = Arc::new(StaticQuoteProvider::new());
    let clock = Arc::new(FakeClockProvider::new(monday_open()));
    let prices = Arc::new(PriceService::new(
        system.clone(),
        provider.clone(),
        Arc::new(MemCache::new()),
        clock.clone(),
        Duration::from_secs(60),
    ));
    let market = Arc::new(MarketService::new(system.clone(), clock.clone()));
    let service = Arc::new(TradeService::new(
        accounts.clone(),
        Arc::new(MemoryPendingOrderStore::new()),
        Arc::new(LocalMatchEngine::new(commission)),
        prices.clone(),
        market.clone(),
        clock.clone(),
    ));
    Harness {
        tmp,
        system,
        accounts,
        provider,
        prices,
        market,
        clock,
        service,
    }
}

fn buy(symbol: &str, shares: i64) -> OrderRequest {
    OrderRequest {
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        shares,
    }
}

fn sell(symbol: &str, shares: i64) -> OrderRequest {
    OrderRequest {
        symbol: symbol.to_string(),
        side: OrderSide::Sell,
        shares,
    }
}

async fn open_account(h: &Harness, id: &str, balance: Decimal) -> AccountId {
    let acc = AccountId(id.to_string());
    h.accounts.open_account(&acc, balance).await.unwrap();
    acc
}

#[tokio::test]
async fn test_buy_executes_immediately_when_open() {
    let h = harness(dec!(0.001)).await;
    h.provider.set_price("AAPL", dec!(150));
    let acc = open_account(&h, "alice", dec!(10000)).await;

    let outcome = h.service.place_order(&acc, buy(" aapl ", 10)).await.unwrap();
    let OrderOutcome::Executed { order, fill } = outcome else {
        panic!("expected immediate execution");
    };
    assert_eq!(order.status, OrderStatus::Executed);
    assert_eq!(order.symbol, "AAPL");
    assert_eq!(order.execution_price, Some(dec!(150)));
    assert_eq!(fill.commission, dec!(1.50));

    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(8498.50));
    assert_eq!(snap.reserved_balance, dec!(0));
    let pos = snap.position("AAPL").unwrap();
    assert_eq!(pos.shares, 10);
    assert_eq!(pos.average_cost, dec!(150));

    // 立即成交的订单同样出现在订单历史中
    let history = h.service.orders(&acc, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OrderStatus::Executed);
    assert!(h.service.pending_orders().await.unwrap().is_empty());

    let outcome = h.service.place_order(&acc, sell("AAPL", 4)).await.unwrap();
    assert!(matches!(outcome, OrderOutcome::Executed { .. }));
    let snap = h.accounts.snapshot(&acc).await.unwrap();
    // 卖出 600，佣金 0.60
    assert_eq!(snap.available_balance, dec!(9097.90));
    assert_eq!(snap.position("AAPL").unwrap().shares, 6);
}

/// 订单库写入可按需失败
struct FlakyOrderStore {
    inner: MemoryPendingOrderStore,
    fail_saves: AtomicBool,
}

#[async_trait]
impl PendingOrderPort for FlakyOrderStore {
    async fn save(&self, order: &Order) -> Result<(), TradeError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(TradeError::InternalError("disk full".into()));
        }
        self.inner.save(order).await
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<Order>, TradeError> {
        self.inner.get(order_id).await
    }

    async fn list_by_account(
        &self,
        account_id: &AccountId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, TradeError> {
        self.inner.list_by_account(account_id, status).await
    }

    async fn list_pending(&self) -> Result<Vec<Order>, TradeError> {
        self.inner.list_pending().await
    }

    async fn pending_sell_shares(&self, account_id: &AccountId, symbol: &str) -> Result<i64, TradeError> {
        self.inner.pending_sell_shares(account_id, symbol).await
    }

    async fn complete(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        execution_price: Option<Decimal>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TradeError> {
        self.inner
            .complete(order_id, status, execution_price, note, now)
            .await
    }
}

#[tokio::test]
async fn test_failed_history_write_leaves_account_untouched() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));
    let acc = open_account(&h, "alice", dec!(10000)).await;

    let orders = Arc::new(FlakyOrderStore {
        inner: MemoryPendingOrderStore::new(),
        fail_saves: AtomicBool::new(true),
    });
    let service = TradeService::new(
        h.accounts.clone(),
        orders.clone(),
        Arc::new(LocalMatchEngine::new(Decimal::ZERO)),
        h.prices.clone(),
        h.market.clone(),
        h.clock.clone(),
    );

    let err = service.place_order(&acc, buy("AAPL", 10)).await.unwrap_err();
    assert!(matches!(err, TradeError::InternalError(_)));
    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(10000));
    assert!(snap.position("AAPL").is_none());
    assert!(h.accounts.list_fills(&acc, 10).await.unwrap().is_empty());

    // 恢复后成交与订单历史一致
    orders.fail_saves.store(false, Ordering::SeqCst);
    service.place_order(&acc, buy("AAPL", 10)).await.unwrap();
    let history = service.orders(&acc, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OrderStatus::Executed);
    assert_eq!(h.accounts.list_fills(&acc, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_order_validation() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(150));
    let acc = open_account(&h, "alice", dec!(1000)).await;

    let err = h.service.place_order(&acc, buy("AAPL", 0)).await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidOrder(_)));

    let err = h.service.place_order(&acc, buy("AAPL; DROP", 1)).await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidOrder(_)));

    let err = h.service.place_order(&acc, buy("NOPE", 1)).await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidOrder(_)));

    let err = h.service.place_order(&acc, buy("AAPL", 7)).await.unwrap_err();
    assert!(matches!(
        err,
        TradeError::InsufficientFunds { required, actual } if required == dec!(1050) && actual == dec!(1000)
    ));

    let err = h.service.place_order(&acc, sell("AAPL", 1)).await.unwrap_err();
    assert!(matches!(err, TradeError::InsufficientShares { required: 1, available: 0 }));

    let ghost = AccountId("ghost".to_string());
    let err = h.service.place_order(&ghost, buy("AAPL", 1)).await.unwrap_err();
    assert!(matches!(err, TradeError::AccountNotFound(_)));

    // 行情源故障且无缓存
    h.provider.set_offline(true);
    let err = h.service.place_order(&acc, buy("MSFT", 1)).await.unwrap_err();
    assert!(matches!(err, TradeError::PriceUnavailable(_)));
}

#[tokio::test]
async fn test_queued_buy_reserves_and_cancel_refunds() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(150));
    let acc = open_account(&h, "alice", dec!(10000)).await;
    h.clock.set_time(monday_closed());

    let outcome = h.service.place_order(&acc, buy("AAPL", 10)).await.unwrap();
    let OrderOutcome::Queued { order } = outcome else {
        panic!("expected queued order");
    };
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.reserved_funds, dec!(1500));

    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(8500));
    assert_eq!(snap.reserved_balance, dec!(1500));
    assert!(snap.positions.is_empty());

    // 冻结后的资金不能再被其他排队买单使用
    let err = h.service.place_order(&acc, buy("AAPL", 86)).await.unwrap_err();
    assert!(matches!(err, TradeError::InsufficientFunds { .. }));

    // 其他用户不能撤销
    let bob = open_account(&h, "bob", dec!(10000)).await;
    let err = h.service.cancel_order(&bob, &order.id).await.unwrap_err();
    assert!(matches!(err, TradeError::OrderNotFound(_)));

    let cancelled = h.service.cancel_order(&acc, &order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(10000));
    assert_eq!(snap.reserved_balance, dec!(0));

    let err = h.service.cancel_order(&acc, &order.id).await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidOrderStatus(_)));
    let err = h
        .service
        .cancel_order(&acc, &OrderId("missing".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, TradeError::OrderNotFound(_)));

    let cancelled_orders = h.service.orders(&acc, Some(OrderStatus::Cancelled)).await.unwrap();
    assert_eq!(cancelled_orders.len(), 1);
}

#[tokio::test]
async fn test_admin_cancel_records_reason() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));
    let acc = open_account(&h, "alice", dec!(1000)).await;
    h.clock.set_time(monday_closed());

    let order = h.service.place_order(&acc, buy("AAPL", 5)).await.unwrap().order().clone();
    let cancelled = h.service.cancel_any_order(&order.id, "halted").await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.note.as_deref(), Some("cancelled by admin: halted"));

    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(1000));
    assert_eq!(snap.reserved_balance, dec!(0));
}

#[tokio::test]
async fn test_pending_sells_commit_shares() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));
    let acc = open_account(&h, "alice", dec!(10000)).await;
    h.service.place_order(&acc, buy("AAPL", 10)).await.unwrap();

    h.clock.set_time(monday_closed());
    let queued = h.service.place_order(&acc, sell("AAPL", 8)).await.unwrap();
    assert!(matches!(queued, OrderOutcome::Queued { .. }));

    let err = h.service.place_order(&acc, sell("AAPL", 5)).await.unwrap_err();
    assert!(matches!(err, TradeError::InsufficientShares { required: 5, available: 2 }));

    // 剩余 2 股仍可卖出
    h.service.place_order(&acc, sell("AAPL", 2)).await.unwrap();
    assert_eq!(h.service.pending_orders().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_process_queue_executes_at_current_price() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(150));
    let acc = open_account(&h, "alice", dec!(10000)).await;

    h.clock.set_time(monday_closed());
    let order = h.service.place_order(&acc, buy("AAPL", 10)).await.unwrap().order().clone();

    h.provider.set_price("AAPL", dec!(140));
    h.clock.set_time(tuesday_open());
    let report = h.service.process_queue().await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.cancelled, 0);
    assert_eq!(report.deferred, 0);

    // 冻结 1500，实际花费 1400，多余部分退回
    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(8600));
    assert_eq!(snap.reserved_balance, dec!(0));
    assert_eq!(snap.position("AAPL").unwrap().average_cost, dec!(140));

    let executed = h.service.orders(&acc, Some(OrderStatus::Executed)).await.unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].id, order.id);
    assert_eq!(executed[0].execution_price, Some(dec!(140)));

    let fills = h.accounts.list_fills(&acc, 10).await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, dec!(140));

    // 再跑一轮不会重复成交
    let report = h.service.process_queue().await.unwrap();
    assert_eq!(report.executed, 0);
}

#[tokio::test]
async fn test_process_queue_cancels_unfundable_orders() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(150));
    let acc = open_account(&h, "alice", dec!(1000)).await;

    h.clock.set_time(monday_closed());
    h.service.place_order(&acc, buy("AAPL", 6)).await.unwrap();

    // 开盘价大涨，冻结资金加上可用余额已不够
    h.provider.set_price("AAPL", dec!(200));
    h.clock.set_time(tuesday_open());
    let report = h.service.process_queue().await.unwrap();
    assert_eq!(report.cancelled, 1);

    let cancelled = h.service.orders(&acc, Some(OrderStatus::Cancelled)).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    assert!(cancelled[0].note.as_deref().unwrap().contains("insufficient funds"));

    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(1000));
    assert_eq!(snap.reserved_balance, dec!(0));
    assert!(snap.positions.is_empty());
}

#[tokio::test]
async fn test_process_queue_defers_without_price_and_cancels_delisted() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));
    let acc = open_account(&h, "alice", dec!(10000)).await;

    // 只有人工价格的标的
    h.system
        .save_artificial_price(&ArtificialPrice {
            symbol: "ZZZ".to_string(),
            price: dec!(10),
            active: true,
            set_by: "admin".to_string(),
            updated_at: monday_open(),
        })
        .await
        .unwrap();

    h.clock.set_time(monday_closed());
    h.service.place_order(&acc, buy("AAPL", 1)).await.unwrap();
    h.service.place_order(&acc, buy("ZZZ", 3)).await.unwrap();
    assert_eq!(h.accounts.snapshot(&acc).await.unwrap().reserved_balance, dec!(130));

    h.system.deactivate_artificial_price("ZZZ", "admin").await.unwrap();
    h.prices.invalidate("AAPL").await.unwrap();
    h.provider.set_offline(true);
    h.clock.set_time(tuesday_open());

    // 行情源断线: AAPL 保留排队，ZZZ 因人工价格停用同样无法取价
    let report = h.service.process_queue().await.unwrap();
    assert_eq!(report.executed, 0);
    assert_eq!(report.deferred, 2);
    assert_eq!(h.service.pending_orders().await.unwrap().len(), 2);

    // 行情恢复: AAPL 成交，ZZZ 在行情源中不存在而被撤销
    h.provider.set_offline(false);
    let report = h.service.process_queue().await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.cancelled, 1);
    assert!(h.service.pending_orders().await.unwrap().is_empty());

    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.reserved_balance, dec!(0));
    assert_eq!(snap.available_balance, dec!(9900));
}

#[tokio::test]
async fn test_portfolio_valuation_sources() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(150));
    let acc = open_account(&h, "alice", dec!(10000)).await;
    h.service.place_order(&acc, buy("AAPL", 10)).await.unwrap();

    h.system
        .save_artificial_price(&ArtificialPrice {
            symbol: "AAPL".to_string(),
            price: dec!(200),
            active: true,
            set_by: "admin".to_string(),
            updated_at: monday_open(),
        })
        .await
        .unwrap();
    let portfolio = h.service.portfolio(&acc).await.unwrap();
    assert_eq!(portfolio.holdings_value, dec!(2000));
    assert_eq!(portfolio.total_value, dec!(10500));
    let pos = &portfolio.positions[0];
    assert_eq!(pos.price_source, PriceSource::Artificial);
    assert_eq!(pos.unrealized_pnl, dec!(500));

    // 估值时刷新了持仓缓存价；行情全部不可用时以此兜底
    h.system.deactivate_artificial_price("AAPL", "admin").await.unwrap();
    h.prices.invalidate("AAPL").await.unwrap();
    h.provider.set_offline(true);
    let portfolio = h.service.portfolio(&acc).await.unwrap();
    let pos = &portfolio.positions[0];
    assert_eq!(pos.price_source, PriceSource::Fallback);
    assert_eq!(pos.market_price, dec!(200));
    assert_eq!(portfolio.total_value, dec!(10500));
}

#[tokio::test]
async fn test_leaderboard_ranks_standard_users() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));

    for (id, role) in [
        ("admin", UserRole::Admin),
        ("alice", UserRole::Standard),
        ("bob", UserRole::Standard),
        ("carol", UserRole::Standard),
        ("dave", UserRole::Standard),
    ] {
        h.system
            .create_user(&User {
                id: id.to_string(),
                name: id.to_uppercase(),
                password_hash: "x".to_string(),
                role,
                force_password_change: false,
                created_at: monday_open(),
            })
            .await
            .unwrap();
    }
    // dave 没有开户，被跳过
    for id in ["admin", "alice", "bob", "carol"] {
        open_account(&h, id, dec!(10000)).await;
    }
    let alice = AccountId("alice".to_string());
    h.service.place_order(&alice, buy("AAPL", 50)).await.unwrap();
    h.provider.set_price("AAPL", dec!(120));
    h.prices.invalidate("AAPL").await.unwrap();

    let board = LeaderboardService::new(
        h.system.clone(),
        h.service.clone(),
        Arc::new(MemCache::new()),
        Duration::from_secs(30),
        dec!(10000),
    );
    let ranking = board.leaderboard(10).await.unwrap();
    let ids: Vec<_> = ranking.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "bob", "carol"]);
    assert_eq!(ranking[0].rank, 1);
    assert_eq!(ranking[0].total_value, dec!(11000));
    assert_eq!(ranking[0].gain, dec!(1000));
    assert_eq!(ranking[0].gain_percent, dec!(10.00));
    assert_eq!(ranking[0].name, "ALICE");
    assert_eq!(ranking[2].rank, 3);

    // 缓存期内不受余额变化影响，失效后重新计算
    h.accounts
        .adjust_balance(&AccountId("carol".to_string()), dec!(5000), "bonus")
        .await
        .unwrap();
    assert_eq!(board.leaderboard(1).await.unwrap()[0].user_id, "alice");
    board.invalidate().await;
    let ranking = board.leaderboard(2).await.unwrap();
    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking[0].user_id, "carol");
    assert_eq!(ranking[0].gain_percent, dec!(50.00));
}

#[tokio::test]
async fn test_leaderboard_skips_unreadable_accounts() {
    let h = harness(Decimal::ZERO).await;
    for id in ["alice", "eve"] {
        h.system
            .create_user(&User {
                id: id.to_string(),
                name: id.to_uppercase(),
                password_hash: "x".to_string(),
                role: UserRole::Standard,
                force_password_change: false,
                created_at: monday_open(),
            })
            .await
            .unwrap();
    }
    open_account(&h, "alice", dec!(10000)).await;
    std::fs::write(
        h.tmp.path().join("accounts").join("account_eve.db"),
        vec![0xAB_u8; 4096],
    )
    .unwrap();
    let eve = AccountId("eve".to_string());
    let err = h.service.portfolio(&eve).await.unwrap_err();
    assert!(!matches!(err, TradeError::AccountNotFound(_)));

    let board = LeaderboardService::new(
        h.system.clone(),
        h.service.clone(),
        Arc::new(MemCache::new()),
        Duration::from_secs(30),
        dec!(10000),
    );
    let ranking = board.leaderboard(10).await.unwrap();
    assert_eq!(ranking.len(), 1);
    assert_eq!(ranking[0].user_id, "alice");
}

#[tokio::test]
async fn test_queue_worker_tick_follows_market_clock() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));
    let acc = open_account(&h, "alice", dec!(1000)).await;
    h.clock.set_time(monday_closed());
    h.service.place_order(&acc, buy("AAPL", 2)).await.unwrap();

    let worker = QueueWorker::new(h.service.clone(), h.market.clone(), Duration::from_millis(10));
    assert!(worker.tick().await.unwrap().is_none());
    assert_eq!(h.service.pending_orders().await.unwrap().len(), 1);

    h.market.set_override(MarketOverride::ForceOpen).await.unwrap();
    let report = worker.tick().await.unwrap().unwrap();
    assert_eq!(report.executed, 1);
}

#[tokio::test]
async fn test_queue_worker_runs_until_shutdown() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));
    let acc = open_account(&h, "alice", dec!(1000)).await;
    h.clock.set_time(monday_closed());
    h.service.place_order(&acc, buy("AAPL", 3)).await.unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = QueueWorker::new(h.service.clone(), h.market.clone(), Duration::from_millis(10)).spawn(rx);

    h.clock.set_time(tuesday_open());
    for _ in 0..200 {
        if h.service.pending_orders().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.service.pending_orders().await.unwrap().is_empty());
    assert_eq!(h.accounts.snapshot(&acc).await.unwrap().position("AAPL").unwrap().shares, 3);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_overspend() {
    let h = harness(Decimal::ZERO).await;
    h.provider.set_price("AAPL", dec!(100));
    let acc = open_account(&h, "alice", dec!(1000)).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = h.service.clone();
        let acc = acc.clone();
        handles.push(tokio::spawn(async move { service.place_order(&acc, buy("AAPL", 1)).await }));
    }

    let mut ok = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(TradeError::InsufficientFunds { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 10);
    assert_eq!(rejected, 10);

    let snap = h.accounts.snapshot(&acc).await.unwrap();
    assert_eq!(snap.available_balance, dec!(0));
    assert_eq!(snap.position("AAPL").unwrap().shares, 10);
}
