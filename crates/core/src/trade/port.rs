use super::entity::{
    AccountId, AccountSnapshot, Fill, LedgerEntry, Order, OrderId, OrderOutcome, OrderRequest,
    OrderStatus, Portfolio, QueueReport,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// # Summary
/// 交易执行环节中可能发生的错误。
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("账户不存在: {0}")]
    AccountNotFound(String),
    #[error("账户已存在: {0}")]
    AccountExists(String),
    #[error("可用资金不足. 需要: {required}, 实际: {actual}")]
    InsufficientFunds { required: Decimal, actual: Decimal },
    #[error("可卖持仓不足. 需要: {required}, 可用: {available}")]
    InsufficientShares { required: i64, available: i64 },
    #[error("非法订单: {0}")]
    InvalidOrder(String),
    #[error("订单未找到或不存在: {0}")]
    OrderNotFound(String),
    #[error("订单状态不允许该操作: {0}")]
    InvalidOrderStatus(String),
    #[error("无法获取价格: {0}")]
    PriceUnavailable(String),
    #[error("非法金额: {0}")]
    InvalidAmount(String),
    #[error("内部系统错误: {0}")]
    InternalError(String),
}

impl From<crate::store::error::StoreError> for TradeError {
    fn from(err: crate::store::error::StoreError) -> Self {
        TradeError::InternalError(err.to_string())
    }
}

/// # Summary
/// 账户资金与持仓的持久化端口。
///
/// # Invariants
/// - 每个方法都必须在单个事务内完成读-改-写，失败时不留下部分修改。
/// - 任何操作之后 `available_balance >= 0` 且 `reserved_balance >= 0`。
#[async_trait]
pub trait AccountPort: Send + Sync {
    /// # Summary
    /// 为新用户开户并注入初始资金。
    ///
    /// # Returns
    /// 账户已存在时返回 `TradeError::AccountExists`。
    async fn open_account(&self, account_id: &AccountId, initial_balance: Decimal) -> Result<(), TradeError>;

    /// # Summary
    /// 读取账户资金与全量持仓快照。
    async fn snapshot(&self, account_id: &AccountId) -> Result<AccountSnapshot, TradeError>;

    /// # Summary
    /// 为排队买单冻结资金，可用资金不足时返回 `InsufficientFunds`。
    async fn freeze_funds(&self, account_id: &AccountId, amount: Decimal) -> Result<(), TradeError>;

    /// # Summary
    /// 撤单时解冻资金，归还到可用余额。
    async fn unfreeze_funds(&self, account_id: &AccountId, amount: Decimal) -> Result<(), TradeError>;

    /// # Summary
    /// 结算一笔成交：资金结转、持仓清算、成交与账本落地。
    ///
    /// # Arguments
    /// * `fill`: 成交回报。
    /// * `reserved`: 该订单此前冻结的资金 (立即成交时为 0)，结算后多余部分退回可用余额。
    ///
    /// # Returns
    /// 资金或持仓不足时返回相应错误且账户保持不变。
    async fn apply_fill(&self, account_id: &AccountId, fill: &Fill, reserved: Decimal) -> Result<(), TradeError>;

    /// # Summary
    /// 管理员按增量调整可用余额，返回调整后的余额。结果为负时拒绝。
    async fn adjust_balance(&self, account_id: &AccountId, delta: Decimal, memo: &str) -> Result<Decimal, TradeError>;

    /// # Summary
    /// 管理员直接设定可用余额，返回设定后的余额。
    async fn set_balance(&self, account_id: &AccountId, amount: Decimal, memo: &str) -> Result<Decimal, TradeError>;

    /// # Summary
    /// 刷新持仓的缓存价格 (无持仓时忽略)。
    async fn mark_price(&self, account_id: &AccountId, symbol: &str, price: Decimal) -> Result<(), TradeError>;

    /// # Summary
    /// 按成交时间倒序读取成交记录。
    async fn list_fills(&self, account_id: &AccountId, limit: usize) -> Result<Vec<Fill>, TradeError>;

    /// # Summary
    /// 按时间倒序读取现金账本流水。
    async fn list_ledger(&self, account_id: &AccountId, limit: usize) -> Result<Vec<LedgerEntry>, TradeError>;
}

/// # Summary
/// 订单持久化端口，保存排队中与已完结的订单。
#[async_trait]
pub trait PendingOrderPort: Send + Sync {
    /// 保存或覆盖订单
    async fn save(&self, order: &Order) -> Result<(), TradeError>;

    /// 按 ID 读取订单
    async fn get(&self, order_id: &OrderId) -> Result<Option<Order>, TradeError>;

    /// 读取某个账户的订单 (按创建时间倒序)，可按状态过滤
    async fn list_by_account(
        &self,
        account_id: &AccountId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, TradeError>;

    /// 读取全部排队中的订单 (按创建时间升序，即先进先出)
    async fn list_pending(&self) -> Result<Vec<Order>, TradeError>;

    /// 已承诺给排队卖单的股份数
    async fn pending_sell_shares(&self, account_id: &AccountId, symbol: &str) -> Result<i64, TradeError>;

    /// # Summary
    /// 原子地将一笔 Pending 订单迁移到终态。
    ///
    /// # Returns
    /// 订单不处于 Pending 时返回 `false` 且不做修改。
    async fn complete(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        execution_price: Option<Decimal>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TradeError>;
}

/// # Summary
/// 撮合端口：决定一笔订单能否成交、以什么价格与佣金成交。
pub trait MatcherPort: Send + Sync {
    /// # Summary
    /// 按给定价格撮合订单。
    ///
    /// # Logic
    /// 成功时将订单标记为 `Executed` 并写入成交价，返回成交回报；
    /// 订单不处于 `Pending` 时返回 `None` 且不修改订单。
    fn execute(&self, order: &mut Order, price: Decimal, now: DateTime<Utc>) -> Option<Fill>;

    /// 按成交金额计算佣金
    fn commission(&self, gross: Decimal) -> Decimal;
}

/// # Summary
/// 核心交易服务抽象接口。
/// API 网关与后台队列任务通过此端口下单、撤单、查询组合，
/// 它是业务层修改用户资金与持仓的唯一门户。
///
/// # Invariants
/// - 此接口必须是异步且线程安全的 (`Send + Sync`)。
/// - 同一账户上的操作被串行化。
#[async_trait]
pub trait TradePort: Send + Sync {
    /// # Summary
    /// 提交一笔买卖单。开市时立即按当前价成交，闭市时进入排队。
    async fn place_order(&self, account_id: &AccountId, request: OrderRequest) -> Result<OrderOutcome, TradeError>;

    /// # Summary
    /// 用户撤销自己的排队订单，买单冻结资金同时退回。
    async fn cancel_order(&self, account_id: &AccountId, order_id: &OrderId) -> Result<Order, TradeError>;

    /// # Summary
    /// 管理员撤销任意排队订单。
    async fn cancel_any_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, TradeError>;

    /// # Summary
    /// 获取按当前价格估值的投资组合。
    async fn portfolio(&self, account_id: &AccountId) -> Result<Portfolio, TradeError>;

    /// # Summary
    /// 查询账户的订单历史。
    async fn orders(&self, account_id: &AccountId, status: Option<OrderStatus>) -> Result<Vec<Order>, TradeError>;

    /// # Summary
    /// 查询全部排队中的订单 (管理后台)。
    async fn pending_orders(&self) -> Result<Vec<Order>, TradeError>;

    /// # Summary
    /// 按先进先出顺序撮合全部排队订单。调用方负责确认当前已开市。
    async fn process_queue(&self) -> Result<QueueReport, TradeError>;
}
