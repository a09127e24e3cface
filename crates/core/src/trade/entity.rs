use crate::market::entity::PriceSource;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// # Summary
/// 用户资金账户标识。每个用户恰好拥有一个账户，ID 与用户 ID 相同。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// # Summary
/// 订单的系统内唯一标识。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// # Summary
/// 订单的买卖方向。游戏不支持做空，卖出只能卖出已持有的股份。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("Unknown order side: {}", s)),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// # Summary
/// 订单的生命周期状态。
///
/// # Invariants
/// - 只允许 `Pending → Executed` 或 `Pending → Cancelled` 两种迁移，且只发生一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum OrderStatus {
    /// 闭市期间排队，等待开市撮合
    Pending,
    /// 已成交
    Executed,
    /// 已撤销 (用户/管理员撤单或开市时资金、持仓不足)
    Cancelled,
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "executed" => Ok(OrderStatus::Executed),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "Pending"),
            OrderStatus::Executed => write!(f, "Executed"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// # Summary
/// 用户提交的下单意图。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub shares: i64,
}

/// # Summary
/// 订单实体。开市时立即成交的订单同样会以 `Executed` 状态落库，保证订单历史完整。
///
/// # Invariants
/// - `shares > 0`。
/// - `reserved_funds` 仅对排队中的买单非零，等于按参考价冻结的资金。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: i64,
    /// 下单时解析到的参考价格
    pub reference_price: Decimal,
    /// 为排队买单冻结的资金
    pub reserved_funds: Decimal,
    pub status: OrderStatus,
    /// 实际成交价 (仅 Executed)
    pub execution_price: Option<Decimal>,
    /// 撤单原因等附加说明
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// # Logic
    /// 创建一笔全新的订单，初始状态为 Pending。
    pub fn new(
        id: OrderId,
        account_id: AccountId,
        symbol: String,
        side: OrderSide,
        shares: i64,
        reference_price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account_id,
            symbol,
            side,
            shares,
            reference_price,
            reserved_funds: Decimal::ZERO,
            status: OrderStatus::Pending,
            execution_price: None,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 订单是否仍可撤销或撮合
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

/// # Summary
/// 单笔成交回报，用于精确计算资金变动与持仓成本。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub shares: i64,
    pub commission: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    /// 成交金额 (不含佣金)
    pub fn gross_amount(&self) -> Decimal {
        self.price * Decimal::from(self.shares)
    }

    /// # Logic
    /// 现金变动净额：买入为负 (成交额 + 佣金)，卖出为正 (成交额 - 佣金)。
    pub fn cash_delta(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => -(self.gross_amount() + self.commission),
            OrderSide::Sell => self.gross_amount() - self.commission,
        }
    }
}

/// # Summary
/// 指定标的的持仓记录。
///
/// # Invariants
/// - `shares > 0`，清仓后记录被删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub shares: i64,
    /// 每股平均持仓成本
    pub average_cost: Decimal,
    /// 最近一次成交或估值时的缓存价格
    pub last_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// 持仓总成本
    pub fn cost_basis(&self) -> Decimal {
        self.average_cost * Decimal::from(self.shares)
    }
}

/// # Summary
/// 账户聚合根的数据快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    /// 可用现金
    pub available_balance: Decimal,
    /// 被排队买单冻结的现金
    pub reserved_balance: Decimal,
    pub positions: Vec<Position>,
}

impl AccountSnapshot {
    /// 现金总额 (可用 + 冻结)
    pub fn cash(&self) -> Decimal {
        self.available_balance + self.reserved_balance
    }

    /// 查找某个标的的持仓
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// # Summary
/// 以当前价格估值后的持仓。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuedPosition {
    pub symbol: String,
    pub shares: i64,
    pub average_cost: Decimal,
    pub market_price: Decimal,
    pub price_source: PriceSource,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

/// # Summary
/// 用户投资组合视图：现金 + 按市值估值的持仓。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub account_id: AccountId,
    pub available_balance: Decimal,
    pub reserved_balance: Decimal,
    pub holdings_value: Decimal,
    pub total_value: Decimal,
    pub positions: Vec<ValuedPosition>,
}

/// # Summary
/// 下单结果：立即成交或进入排队。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderOutcome {
    Executed { order: Order, fill: Fill },
    Queued { order: Order },
}

impl OrderOutcome {
    pub fn order(&self) -> &Order {
        match self {
            OrderOutcome::Executed { order, .. } | OrderOutcome::Queued { order } => order,
        }
    }
}

/// # Summary
/// 一轮挂单队列处理的统计结果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueReport {
    pub executed: usize,
    pub cancelled: usize,
    /// 因暂时取不到价格而留待下一轮的订单数
    pub deferred: usize,
}

/// # Summary
/// 排行榜条目 (由账户快照与当前价格派生)。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub name: String,
    pub cash: Decimal,
    pub holdings_value: Decimal,
    pub total_value: Decimal,
    /// 相对初始资金的盈亏
    pub gain: Decimal,
    /// 盈亏百分比 (保留两位小数)
    pub gain_percent: Decimal,
}

/// # Summary
/// 现金账本流水，记录每一次余额变化的原因。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub action: String,
    pub available_change: Decimal,
    pub reserved_change: Decimal,
    pub balance_after: Decimal,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}
