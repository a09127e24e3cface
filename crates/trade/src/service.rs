use async_trait::async_trait;
use bullpen_core::common::normalize_symbol;
use bullpen_core::common::time::TimeProvider;
use bullpen_core::market::entity::PriceSource;
use bullpen_core::market::error::MarketError;
use bullpen_core::market::port::{MarketClock, PricePort};
use bullpen_core::trade::entity::{
    AccountId, Order, OrderId, OrderOutcome, OrderRequest, OrderSide, OrderStatus, Portfolio,
    QueueReport, ValuedPosition,
};
use bullpen_core::trade::port::{AccountPort, MatcherPort, PendingOrderPort, TradeError, TradePort};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 单笔订单允许的最大股数
pub const MAX_ORDER_SHARES: i64 = 1_000_000;

/// # Summary
/// `TradeService` 是模拟盘的交易入口，实现了 `TradePort`。
/// 对接账户端口、订单仓储、撮合引擎、价格链与市场时钟。
///
/// # Invariants
/// - 同一账户的所有读-改-写操作在该账户的异步锁内完成。
/// - 排队买单按参考价冻结资金，撤单或成交时释放。
/// - 同一时刻至多一轮 `process_queue` 在运行。
pub struct TradeService {
    accounts: Arc<dyn AccountPort>,
    orders: Arc<dyn PendingOrderPort>,
    matcher: Arc<dyn MatcherPort>,
    prices: Arc<dyn PricePort>,
    clock: Arc<dyn MarketClock>,
    time: Arc<dyn TimeProvider>,
    // 每个账户一把锁
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    queue_lock: Mutex<()>,
}

impl TradeService {
    pub fn new(
        accounts: Arc<dyn AccountPort>,
        orders: Arc<dyn PendingOrderPort>,
        matcher: Arc<dyn MatcherPort>,
        prices: Arc<dyn PricePort>,
        clock: Arc<dyn MarketClock>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            accounts,
            orders,
            matcher,
            prices,
            clock,
            time,
            user_locks: DashMap::new(),
            queue_lock: Mutex::new(()),
        }
    }

    fn user_lock(&self, account_id: &AccountId) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(account_id.0.clone())
            .or_default()
            .value()
            .clone()
    }

    /// 预估买入所需资金 (成交额 + 佣金)
    fn estimate_cost(&self, price: Decimal, shares: i64) -> Decimal {
        let gross = price * Decimal::from(shares);
        gross + self.matcher.commission(gross)
    }

    /// # Logic
    /// 在已持有用户锁的前提下撤销一笔排队订单。
    ///
    /// # Returns
    /// 订单已不处于 Pending 时返回 `InvalidOrderStatus`。
    async fn cancel_locked(&self, order_id: &OrderId, note: String) -> Result<Order, TradeError> {
        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| TradeError::OrderNotFound(order_id.0.clone()))?;
        if !order.is_pending() {
            return Err(TradeError::InvalidOrderStatus(format!(
                "order {} is {}",
                order_id, order.status
            )));
        }

        let now = self.time.now();
        if !self
            .orders
            .complete(order_id, OrderStatus::Cancelled, None, Some(note.clone()), now)
            .await?
        {
            return Err(TradeError::InvalidOrderStatus(format!(
                "order {} is no longer pending",
                order_id
            )));
        }

        if order.side == OrderSide::Buy && order.reserved_funds > Decimal::ZERO {
            self.accounts
                .unfreeze_funds(&order.account_id, order.reserved_funds)
                .await?;
        }

        order.status = OrderStatus::Cancelled;
        order.note = Some(note);
        order.updated_at = now;
        info!("Order {} cancelled ({})", order.id, order.account_id);
        Ok(order)
    }

    /// # Summary
    /// 撮合一笔排队订单 (已持有用户锁)。
    async fn execute_queued(&self, order_id: &OrderId, report: &mut QueueReport) -> Result<(), TradeError> {
        let Some(order) = self.orders.get(order_id).await? else {
            return Ok(());
        };
        if !order.is_pending() {
            return Ok(());
        }

        let price = match self.prices.quote(&order.symbol).await {
            Ok(quote) => quote.price,
            Err(MarketError::NotFound(_)) | Err(MarketError::InvalidSymbol(_)) => {
                self.cancel_locked(order_id, "symbol no longer available".into()).await?;
                report.cancelled += 1;
                return Ok(());
            }
            Err(e) => {
                warn!("Order {} deferred, no price for {}: {}", order.id, order.symbol, e);
                report.deferred += 1;
                return Ok(());
            }
        };

        let now = self.time.now();
        let mut executed = order.clone();
        let Some(fill) = self.matcher.execute(&mut executed, price, now) else {
            report.deferred += 1;
            return Ok(());
        };

        let reserved = match order.side {
            OrderSide::Buy => order.reserved_funds,
            OrderSide::Sell => Decimal::ZERO,
        };
        match self.accounts.apply_fill(&order.account_id, &fill, reserved).await {
            Ok(()) => {}
            Err(TradeError::InsufficientFunds { required, actual }) => {
                let note = format!("insufficient funds at execution: required {}, available {}", required, actual);
                self.cancel_locked(order_id, note).await?;
                report.cancelled += 1;
                return Ok(());
            }
            Err(TradeError::InsufficientShares { required, available }) => {
                let note = format!("insufficient shares at execution: required {}, held {}", required, available);
                self.cancel_locked(order_id, note).await?;
                report.cancelled += 1;
                return Ok(());
            }
            Err(TradeError::AccountNotFound(id)) => {
                self.cancel_locked(order_id, format!("account {} not found", id)).await?;
                report.cancelled += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if !self
            .orders
            .complete(order_id, OrderStatus::Executed, Some(price), None, now)
            .await?
        {
            error!("Order {} filled but could not be marked executed", order_id);
        }
        report.executed += 1;
        info!(
            "Queued order {} executed: {} {} {} @ {}",
            order.id, order.side, order.shares, order.symbol, price
        );
        Ok(())
    }
}

/// 将价格链错误映射为交易错误
fn price_error(symbol: &str, err: MarketError) -> TradeError {
    match err {
        MarketError::NotFound(_) | MarketError::InvalidSymbol(_) => {
            TradeError::InvalidOrder(format!("unknown symbol {}", symbol))
        }
        other => TradeError::PriceUnavailable(format!("{}: {}", symbol, other)),
    }
}

#[async_trait]
impl TradePort for TradeService {
    /// # Logic
    /// 1. 校验股数与证券代码，取得用户锁。
    /// 2. 通过价格链取得参考价，确认账户存在。
    /// 3. 卖单：校验 `持仓 - 排队卖单占用 >= 股数`。
    /// 4. 开市：立即撮合，订单先以 `Executed` 落库再结算；结算失败时改记为 `Cancelled`。
    /// 5. 闭市：买单按参考价冻结资金，订单以 `Pending` 落库等待开市。
    async fn place_order(&self, account_id: &AccountId, request: OrderRequest) -> Result<OrderOutcome, TradeError> {
        if request.shares <= 0 || request.shares > MAX_ORDER_SHARES {
            return Err(TradeError::InvalidOrder(format!(
                "shares must be between 1 and {}",
                MAX_ORDER_SHARES
            )));
        }
        let symbol = normalize_symbol(&request.symbol)
            .ok_or_else(|| TradeError::InvalidOrder(format!("invalid symbol {:?}", request.symbol)))?;

        let lock = self.user_lock(account_id);
        let _guard = lock.lock().await;

        let snapshot = self.accounts.snapshot(account_id).await?;
        let quote = self
            .prices
            .quote(&symbol)
            .await
            .map_err(|e| price_error(&symbol, e))?;
        let price = quote.price;

        match request.side {
            OrderSide::Sell => {
                let held = snapshot.position(&symbol).map_or(0, |p| p.shares);
                let committed = self.orders.pending_sell_shares(account_id, &symbol).await?;
                let available = held - committed;
                if request.shares > available {
                    return Err(TradeError::InsufficientShares {
                        required: request.shares,
                        available,
                    });
                }
            }
            OrderSide::Buy => {
                let required = self.estimate_cost(price, request.shares);
                if required > snapshot.available_balance {
                    return Err(TradeError::InsufficientFunds {
                        required,
                        actual: snapshot.available_balance,
                    });
                }
            }
        }

        let is_open = self
            .clock
            .is_open()
            .await
            .map_err(|e| TradeError::InternalError(e.to_string()))?;
        let now = self.time.now();
        let mut order = Order::new(
            OrderId(Uuid::new_v4().to_string()),
            account_id.clone(),
            symbol,
            request.side,
            request.shares,
            price,
            now,
        );

        if is_open {
            let fill = self
                .matcher
                .execute(&mut order, price, now)
                .ok_or_else(|| TradeError::InternalError(format!("order {} could not be matched", order.id)))?;
            // 先落订单再结算：历史写失败时资金未动
            self.orders.save(&order).await?;
            if let Err(e) = self.accounts.apply_fill(account_id, &fill, Decimal::ZERO).await {
                error!("Order {} recorded but settlement failed: {}", order.id, e);
                order.status = OrderStatus::Cancelled;
                order.execution_price = None;
                order.note = Some(format!("settlement failed: {}", e));
                if let Err(save_err) = self.orders.save(&order).await {
                    error!("Failed to mark order {} as cancelled: {}", order.id, save_err);
                }
                return Err(e);
            }
            info!(
                "Order {} executed for {}: {} {} {} @ {} ({})",
                order.id, account_id, order.side, order.shares, order.symbol, price, quote.source
            );
            return Ok(OrderOutcome::Executed { order, fill });
        }

        if order.side == OrderSide::Buy {
            let reserve = self.estimate_cost(price, order.shares);
            self.accounts.freeze_funds(account_id, reserve).await?;
            order.reserved_funds = reserve;
        }
        if let Err(e) = self.orders.save(&order).await {
            if order.reserved_funds > Decimal::ZERO {
                self.accounts
                    .unfreeze_funds(account_id, order.reserved_funds)
                    .await?;
            }
            return Err(e);
        }

        info!(
            "Order {} queued for {}: {} {} {} (ref {})",
            order.id, account_id, order.side, order.shares, order.symbol, price
        );
        Ok(OrderOutcome::Queued { order })
    }

    async fn cancel_order(&self, account_id: &AccountId, order_id: &OrderId) -> Result<Order, TradeError> {
        let lock = self.user_lock(account_id);
        let _guard = lock.lock().await;

        // 不区分 "不存在" 与 "不属于该用户"
        match self.orders.get(order_id).await? {
            Some(order) if order.account_id == *account_id => {}
            _ => return Err(TradeError::OrderNotFound(order_id.0.clone())),
        }
        self.cancel_locked(order_id, "cancelled by user".into()).await
    }

    async fn cancel_any_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, TradeError> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| TradeError::OrderNotFound(order_id.0.clone()))?;

        let lock = self.user_lock(&order.account_id);
        let _guard = lock.lock().await;
        let note = if reason.trim().is_empty() {
            "cancelled by admin".to_string()
        } else {
            format!("cancelled by admin: {}", reason.trim())
        };
        self.cancel_locked(order_id, note).await
    }

    /// # Logic
    /// 逐个持仓取价估值；价格链失败时退回持仓缓存价并标记为 `Fallback`。
    /// 取到新价格时顺带刷新持仓缓存价。
    async fn portfolio(&self, account_id: &AccountId) -> Result<Portfolio, TradeError> {
        let snapshot = self.accounts.snapshot(account_id).await?;

        let mut positions = Vec::with_capacity(snapshot.positions.len());
        let mut holdings_value = Decimal::ZERO;
        for p in &snapshot.positions {
            let (market_price, price_source) = match self.prices.quote(&p.symbol).await {
                Ok(q) => {
                    if q.price != p.last_price
                        && let Err(e) = self.accounts.mark_price(account_id, &p.symbol, q.price).await
                    {
                        warn!("Failed to mark {} for {}: {}", p.symbol, account_id, e);
                    }
                    (q.price, q.source)
                }
                Err(e) => {
                    warn!("Valuing {} for {} at last price: {}", p.symbol, account_id, e);
                    (p.last_price, PriceSource::Fallback)
                }
            };
            let market_value = market_price * Decimal::from(p.shares);
            holdings_value += market_value;
            positions.push(ValuedPosition {
                symbol: p.symbol.clone(),
                shares: p.shares,
                average_cost: p.average_cost,
                market_price,
                price_source,
                market_value,
                unrealized_pnl: market_value - p.cost_basis(),
            });
        }

        Ok(Portfolio {
            account_id: account_id.clone(),
            available_balance: snapshot.available_balance,
            reserved_balance: snapshot.reserved_balance,
            holdings_value,
            total_value: snapshot.cash() + holdings_value,
            positions,
        })
    }

    async fn orders(&self, account_id: &AccountId, status: Option<OrderStatus>) -> Result<Vec<Order>, TradeError> {
        self.orders.list_by_account(account_id, status).await
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, TradeError> {
        self.orders.list_pending().await
    }

    /// # Logic
    /// 1. 按先进先出读取全部排队订单。
    /// 2. 逐笔在对应用户锁内撮合：
    ///    - 取不到价格：保留排队，计入 `deferred`；
    ///    - 资金/持仓不足或标的失效：撤单并释放冻结资金，计入 `cancelled`；
    ///    - 其余按当前价成交，计入 `executed`。
    /// 3. 单笔失败只记录日志，不影响后续订单。
    async fn process_queue(&self) -> Result<QueueReport, TradeError> {
        let _queue_guard = self.queue_lock.lock().await;
        let pending = self.orders.list_pending().await?;
        let mut report = QueueReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        for order in pending {
            let lock = self.user_lock(&order.account_id);
            let _guard = lock.lock().await;
            if let Err(e) = self.execute_queued(&order.id, &mut report).await {
                error!("Failed to process queued order {}: {}", order.id, e);
                report.deferred += 1;
            }
        }

        info!(
            "Queue processed: {} executed, {} cancelled, {} deferred",
            report.executed, report.cancelled, report.deferred
        );
        Ok(report)
    }
}
