//! # DTO (Data Transfer Object) 层
//!
//! 将内部领域模型转化为面向前端 JSON 输出的轻量结构体。
//! 所有 DTO 必须派生 `utoipa::ToSchema` 以自动进入 Swagger 文档。
//! 金额一律使用 `Decimal`，在 JSON 中序列化为字符串。

use bullpen_core::market::entity::{
    ArtificialPrice, MarketOverride, MarketStatus, PriceQuote, PriceSource,
};
use bullpen_core::store::port::{AdminLogEntry, StockMetadata, User};
use bullpen_core::trade::entity::{
    Fill, LeaderboardEntry, LedgerEntry, Order, OrderSide, OrderStatus, Portfolio, QueueReport, ValuedPosition,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// ============================================================
//  通用响应 DTO
// ============================================================

/// 统一 API 响应包装器
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T: Serialize + ToSchema> {
    /// 是否成功
    pub success: bool,
    /// 数据载荷 (成功时)
    pub data: Option<T>,
    /// 错误信息 (失败时)
    pub error: Option<String>,
}

impl<T: Serialize + ToSchema> ApiResponse<T> {
    /// 构建成功响应
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// 构建失败响应 (不含泛型载荷)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    /// 固定为 false
    pub success: bool,
    /// 错误描述信息
    pub error: String,
}

impl ApiErrorResponse {
    /// 从错误信息构建
    pub fn from_msg(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: msg.into(),
        }
    }
}

// ============================================================
//  鉴权 DTO
// ============================================================

/// 注册请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// 登录名 (3-32 位字母、数字、`_`、`.`、`-`)
    #[schema(example = "trader_01")]
    pub username: String,
    /// 显示名称，留空时使用登录名
    #[schema(example = "John Doe")]
    pub name: Option<String>,
    #[schema(example = "P@ssw0rd!")]
    pub password: String,
}

/// 登录请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "admin")]
    pub username: String,
    #[schema(example = "password123")]
    pub password: String,
}

/// 修改密码请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    #[schema(example = "oldpassword123")]
    pub old_password: String,
    #[schema(example = "newSecurePwd!")]
    pub new_password: String,
}

/// 登录或注册成功返回的 Token
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// JWT Bearer Token
    #[schema(example = "eyJhbGciOiJIUzI1NiIs...")]
    pub token: String,
    /// Token 有效期 (秒)
    #[schema(example = 604800)]
    pub expires_in: u64,
    pub user: UserResponse,
}

/// JWT Claims 内容 (内部使用，不暴露到 Swagger)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 用户唯一标识
    pub sub: String,
    /// 角色 ("Admin" 或 "Standard")
    pub role: String,
    /// 签发时间 (Unix 时间戳)
    pub iat: u64,
    /// 过期时间 (Unix 时间戳)
    pub exp: u64,
}

// ============================================================
//  用户相关 DTO
// ============================================================

/// 用户基础信息
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(example = "trader_01")]
    pub id: String,
    #[schema(example = "John Doe")]
    pub name: String,
    #[schema(example = "Standard")]
    pub role: String,
    pub force_password_change: bool,
    pub created_at: DateTime<Utc>,
}

/// 用户资料 (含现金余额)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub id: String,
    pub name: String,
    pub role: String,
    /// 可用现金
    #[schema(value_type = String, example = "98500.00")]
    pub available_balance: Decimal,
    /// 排队买单冻结的现金
    #[schema(value_type = String, example = "1500.00")]
    pub reserved_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// 修改资料请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    /// 新的显示名称
    #[schema(example = "Jane Doe")]
    pub name: String,
}

/// 估值后的持仓
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PositionResponse {
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(example = 10)]
    pub shares: i64,
    /// 每股平均成本
    #[schema(value_type = String, example = "150.00")]
    pub average_cost: Decimal,
    #[schema(value_type = String, example = "155.20")]
    pub market_price: Decimal,
    pub price_source: PriceSource,
    #[schema(value_type = String, example = "1552.00")]
    pub market_value: Decimal,
    #[schema(value_type = String, example = "52.00")]
    pub unrealized_pnl: Decimal,
}

/// 投资组合
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PortfolioResponse {
    #[schema(value_type = String)]
    pub available_balance: Decimal,
    #[schema(value_type = String)]
    pub reserved_balance: Decimal,
    /// 持仓市值合计
    #[schema(value_type = String)]
    pub holdings_value: Decimal,
    /// 现金 + 持仓市值
    #[schema(value_type = String)]
    pub total_value: Decimal,
    pub positions: Vec<PositionResponse>,
}

/// 成交记录
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub shares: i64,
    #[schema(value_type = String)]
    pub commission: Decimal,
    /// 现金变动净额 (买入为负)
    #[schema(value_type = String)]
    pub cash_delta: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// 现金流水
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntryResponse {
    pub id: i64,
    /// Open / Freeze / Unfreeze / Fill / Adjust / Set
    #[schema(example = "Fill")]
    pub action: String,
    #[schema(value_type = String)]
    pub available_change: Decimal,
    #[schema(value_type = String)]
    pub reserved_change: Decimal,
    /// 变动后的可用余额
    #[schema(value_type = String)]
    pub balance_after: Decimal,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================
//  订单相关 DTO
// ============================================================

/// 下单请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaceOrderRequest {
    #[schema(example = "AAPL")]
    pub symbol: String,
    pub side: OrderSide,
    /// 整数股
    #[schema(example = 10)]
    pub shares: i64,
}

/// 订单
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: i64,
    /// 下单时的参考价
    #[schema(value_type = String)]
    pub reference_price: Decimal,
    /// 排队买单冻结的资金
    #[schema(value_type = String)]
    pub reserved_funds: Decimal,
    pub status: OrderStatus,
    #[schema(value_type = Option<String>)]
    pub execution_price: Option<Decimal>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 下单结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaceOrderResponse {
    /// 是否已立即成交 (否则为排队)
    pub executed: bool,
    pub order: OrderResponse,
    /// 立即成交时收取的佣金
    #[schema(value_type = Option<String>)]
    pub commission: Option<Decimal>,
}

/// 订单列表过滤参数
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct OrdersQuery {
    /// Pending / Executed / Cancelled
    pub status: Option<String>,
}

/// 分页条数参数
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

// ============================================================
//  行情相关 DTO
// ============================================================

/// 搜索参数
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct SearchQuery {
    /// 关键字 (代码或公司名)
    pub q: String,
    pub limit: Option<usize>,
}

/// 股票元数据
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockMetadataResponse {
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(example = "Apple Inc.")]
    pub name: String,
    #[schema(example = "NASDAQ")]
    pub exchange: String,
    #[schema(example = "USD")]
    pub currency: String,
    #[schema(example = "Technology")]
    pub sector: Option<String>,
}

/// 报价
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuoteResponse {
    pub symbol: String,
    #[schema(value_type = String, example = "189.84")]
    pub price: Decimal,
    pub source: PriceSource,
    pub as_of: DateTime<Utc>,
}

/// 市场状态
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarketStatusResponse {
    pub is_open: bool,
    /// 本地开市时间 (HH:MM)
    #[schema(example = "09:30")]
    pub open_time: String,
    #[schema(example = "16:00")]
    pub close_time: String,
    #[schema(example = -300)]
    pub utc_offset_minutes: i32,
    pub weekdays_only: bool,
    pub override_mode: MarketOverride,
    pub server_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 排行榜参数
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

/// 排行榜条目
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntryResponse {
    pub rank: usize,
    pub user_id: String,
    pub name: String,
    #[schema(value_type = String)]
    pub cash: Decimal,
    #[schema(value_type = String)]
    pub holdings_value: Decimal,
    #[schema(value_type = String)]
    pub total_value: Decimal,
    #[schema(value_type = String)]
    pub gain: Decimal,
    /// 相对初始资金的收益率 (%)
    #[schema(value_type = String, example = "12.34")]
    pub gain_percent: Decimal,
}

// ============================================================
//  管理后台 DTO
// ============================================================

/// 创建新用户请求体 (仅管理员)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    #[schema(example = "trader_01")]
    pub id: String,
    #[schema(example = "John Doe")]
    pub name: String,
    #[schema(example = "P@ssw0rd!")]
    pub password: String,
    /// Admin 或 Standard
    #[schema(example = "Standard")]
    pub role: String,
}

/// 修改角色请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    #[schema(example = "Admin")]
    pub role: String,
}

/// 余额调整方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BalanceMode {
    /// 在当前余额上增减
    Adjust,
    /// 直接设定余额
    Set,
}

/// 调整余额请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceRequest {
    pub mode: BalanceMode,
    #[schema(value_type = String, example = "500.00")]
    pub amount: Decimal,
    pub reason: Option<String>,
}

/// 调整余额结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: String,
    #[schema(value_type = String)]
    pub available_balance: Decimal,
}

/// 修改交易时段请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarketHoursRequest {
    /// HH:MM 或 HH:MM:SS
    #[schema(example = "09:30")]
    pub open_time: String,
    #[schema(example = "16:00")]
    pub close_time: String,
    #[schema(example = -300)]
    pub utc_offset_minutes: i32,
    pub weekdays_only: bool,
}

/// 强制开闭市请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarketOverrideRequest {
    pub mode: MarketOverride,
}

/// 设置人工价格请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArtificialPriceRequest {
    #[schema(value_type = String, example = "123.45")]
    pub price: Decimal,
}

/// 人工价格
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArtificialPriceResponse {
    pub symbol: String,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub active: bool,
    pub set_by: String,
    pub updated_at: DateTime<Utc>,
}

/// 管理员撤单参数
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct CancelReasonQuery {
    pub reason: Option<String>,
}

/// 队列处理统计
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueueReportResponse {
    pub executed: usize,
    pub cancelled: usize,
    pub deferred: usize,
}

/// 审计日志查询参数
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ActivityQuery {
    pub admin_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// 审计日志条目
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminLogResponse {
    pub id: i64,
    pub admin_id: String,
    #[schema(example = "SetArtificialPrice")]
    pub action: String,
    pub target: Option<String>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================
//  领域模型 → DTO 惯用转换 (impl From<T>)
// ============================================================

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            name: u.name.clone(),
            role: u.role.to_string(),
            force_password_change: u.force_password_change,
            created_at: u.created_at,
        }
    }
}

impl From<ValuedPosition> for PositionResponse {
    fn from(p: ValuedPosition) -> Self {
        Self {
            symbol: p.symbol,
            shares: p.shares,
            average_cost: p.average_cost,
            market_price: p.market_price,
            price_source: p.price_source,
            market_value: p.market_value,
            unrealized_pnl: p.unrealized_pnl,
        }
    }
}

impl From<Portfolio> for PortfolioResponse {
    fn from(p: Portfolio) -> Self {
        Self {
            available_balance: p.available_balance,
            reserved_balance: p.reserved_balance,
            holdings_value: p.holdings_value,
            total_value: p.total_value,
            positions: p.positions.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Fill> for TransactionResponse {
    fn from(f: Fill) -> Self {
        Self {
            cash_delta: f.cash_delta(),
            order_id: f.order_id.0,
            symbol: f.symbol,
            side: f.side,
            price: f.price,
            shares: f.shares,
            commission: f.commission,
            executed_at: f.executed_at,
        }
    }
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(e: LedgerEntry) -> Self {
        Self {
            id: e.id,
            action: e.action,
            available_change: e.available_change,
            reserved_change: e.reserved_change,
            balance_after: e.balance_after,
            memo: e.memo,
            created_at: e.created_at,
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self {
            id: o.id.0,
            user_id: o.account_id.0,
            symbol: o.symbol,
            side: o.side,
            shares: o.shares,
            reference_price: o.reference_price,
            reserved_funds: o.reserved_funds,
            status: o.status,
            execution_price: o.execution_price,
            note: o.note,
            created_at: o.created_at,
            updated_at: o.updated_at,
        }
    }
}

impl From<StockMetadata> for StockMetadataResponse {
    fn from(m: StockMetadata) -> Self {
        Self {
            symbol: m.symbol,
            name: m.name,
            exchange: m.exchange,
            currency: m.currency,
            sector: m.sector,
        }
    }
}

impl From<PriceQuote> for QuoteResponse {
    fn from(q: PriceQuote) -> Self {
        Self {
            symbol: q.symbol,
            price: q.price,
            source: q.source,
            as_of: q.as_of,
        }
    }
}

impl From<MarketStatus> for MarketStatusResponse {
    fn from(s: MarketStatus) -> Self {
        Self {
            is_open: s.is_open,
            open_time: s.settings.open_time.format("%H:%M").to_string(),
            close_time: s.settings.close_time.format("%H:%M").to_string(),
            utc_offset_minutes: s.settings.utc_offset_minutes,
            weekdays_only: s.settings.weekdays_only,
            override_mode: s.settings.override_mode,
            server_time: s.server_time,
            updated_at: s.settings.updated_at,
        }
    }
}

impl From<LeaderboardEntry> for LeaderboardEntryResponse {
    fn from(e: LeaderboardEntry) -> Self {
        Self {
            rank: e.rank,
            user_id: e.user_id,
            name: e.name,
            cash: e.cash,
            holdings_value: e.holdings_value,
            total_value: e.total_value,
            gain: e.gain,
            gain_percent: e.gain_percent,
        }
    }
}

impl From<ArtificialPrice> for ArtificialPriceResponse {
    fn from(p: ArtificialPrice) -> Self {
        Self {
            symbol: p.symbol,
            price: p.price,
            active: p.active,
            set_by: p.set_by,
            updated_at: p.updated_at,
        }
    }
}

impl From<QueueReport> for QueueReportResponse {
    fn from(r: QueueReport) -> Self {
        Self {
            executed: r.executed,
            cancelled: r.cancelled,
            deferred: r.deferred,
        }
    }
}

impl From<AdminLogEntry> for AdminLogResponse {
    fn from(e: AdminLogEntry) -> Self {
        Self {
            id: e.id,
            admin_id: e.admin_id,
            action: e.action.to_string(),
            target: e.target,
            details: e.details,
            created_at: e.created_at,
        }
    }
}
