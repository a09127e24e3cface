use super::error::StoreError;
use crate::market::entity::{ArtificialPrice, MarketSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 用户角色，决定能否访问管理后台。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Admin,
    Standard,
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "standard" | "user" => Ok(UserRole::Standard),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "Admin"),
            UserRole::Standard => write!(f, "Standard"),
        }
    }
}

/// # Summary
/// 用户实体，代表游戏的参与者或管理员。
///
/// # Invariants
/// - `id` 即登录名，必须全局唯一。
/// - 现金余额不在此处，而是保存在该用户的账户账本中。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    // 用户唯一标识 (登录名)
    pub id: String,
    // 用户显示名称
    pub name: String,
    // bcrypt 密码摘要
    pub password_hash: String,
    pub role: UserRole,
    // 首次登录必须修改密码 (管理员代建的账号)
    pub force_password_change: bool,
    // 注册时间
    pub created_at: DateTime<Utc>,
}

/// # Summary
/// 股票元数据实体，作为本地搜索索引。
///
/// # Invariants
/// - `symbol` 唯一且为规整后的大写形式。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMetadata {
    // 股票代码
    pub symbol: String,
    // 股票全名或公司名称
    pub name: String,
    // 所属交易所
    pub exchange: String,
    // 所属板块/行业 (可选)
    pub sector: Option<String>,
    // 交易货币 (例如: USD)
    pub currency: String,
}

/// # Summary
/// 管理员操作类型，写入审计日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminAction {
    CreateUser,
    ChangeRole,
    AdjustBalance,
    SetBalance,
    UpdateMarketHours,
    SetMarketOverride,
    SetArtificialPrice,
    ClearArtificialPrice,
    CancelOrder,
    ProcessQueue,
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for AdminAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "CreateUser" => AdminAction::CreateUser,
            "ChangeRole" => AdminAction::ChangeRole,
            "AdjustBalance" => AdminAction::AdjustBalance,
            "SetBalance" => AdminAction::SetBalance,
            "UpdateMarketHours" => AdminAction::UpdateMarketHours,
            "SetMarketOverride" => AdminAction::SetMarketOverride,
            "SetArtificialPrice" => AdminAction::SetArtificialPrice,
            "ClearArtificialPrice" => AdminAction::ClearArtificialPrice,
            "CancelOrder" => AdminAction::CancelOrder,
            "ProcessQueue" => AdminAction::ProcessQueue,
            _ => return Err(format!("Unknown admin action: {}", s)),
        };
        Ok(action)
    }
}

/// # Summary
/// 管理员审计日志条目。
///
/// # Invariants
/// - 只追加，不修改、不删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLogEntry {
    // 自增主键，新建条目时为 0
    pub id: i64,
    pub admin_id: String,
    pub action: AdminAction,
    // 操作对象 (用户 ID、股票代码、订单 ID 等)
    pub target: Option<String>,
    // 操作细节 (JSON)
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// # Summary
/// 系统级数据存储接口，负责用户、股票元数据、市场设置、人工价格与审计日志的持久化。
///
/// # Invariants
/// - 实现者应确保单条记录写入的原子性。
#[async_trait]
pub trait SystemStore: Send + Sync {
    // --- 用户域 ---

    /// # Summary
    /// 获取用户信息。
    ///
    /// # Arguments
    /// * `id`: 用户唯一标识。
    ///
    /// # Returns
    /// 存在返回 `Some(User)`，否则返回 `None`。
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// # Summary
    /// 创建新用户。
    ///
    /// # Logic
    /// 执行 INSERT，用户名已存在时返回 `StoreError::Conflict`。
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    /// # Summary
    /// 修改显示名称，只写 `name` 列。
    ///
    /// # Returns
    /// 用户不存在时返回 `StoreError::NotFound`。
    async fn update_user_name(&self, id: &str, name: &str) -> Result<(), StoreError>;

    /// # Summary
    /// 更新密码摘要与强制改密标记，不触碰其他列。
    async fn update_password(&self, id: &str, password_hash: &str, force_change: bool) -> Result<(), StoreError>;

    /// # Summary
    /// 修改角色，只写 `role` 列。
    async fn update_user_role(&self, id: &str, role: UserRole) -> Result<(), StoreError>;

    /// # Summary
    /// 删除用户记录。
    ///
    /// # Returns
    /// 存在并被删除返回 `true`。
    async fn delete_user(&self, id: &str) -> Result<bool, StoreError>;

    /// # Summary
    /// 按注册时间升序列出全部用户。
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    // --- 元数据域 ---

    /// # Summary
    /// 搜索股票元数据。
    ///
    /// # Logic
    /// 在 `stock_metadata` 表中对 symbol 与 name 进行模糊匹配。
    ///
    /// # Arguments
    /// * `query`: 搜索关键词。
    /// * `limit`: 返回条数上限。
    async fn search_stocks(&self, query: &str, limit: usize) -> Result<Vec<StockMetadata>, StoreError>;

    /// # Summary
    /// 保存股票元数据，用于建立本地索引。
    async fn save_stock_metadata(&self, metadata: &StockMetadata) -> Result<(), StoreError>;

    // --- 市场设置域 ---

    /// # Summary
    /// 读取市场设置，未初始化时返回 `None`。
    async fn get_market_settings(&self) -> Result<Option<MarketSettings>, StoreError>;

    /// # Summary
    /// 覆盖保存市场设置 (全局单行)。
    async fn save_market_settings(&self, settings: &MarketSettings) -> Result<(), StoreError>;

    // --- 人工价格域 ---

    /// # Summary
    /// 获取某个标的的人工价格 (无论是否激活)。
    async fn get_artificial_price(&self, symbol: &str) -> Result<Option<ArtificialPrice>, StoreError>;

    /// # Summary
    /// 列出全部人工价格。
    async fn list_artificial_prices(&self) -> Result<Vec<ArtificialPrice>, StoreError>;

    /// # Summary
    /// 设置或覆盖人工价格 (Upsert)。
    async fn save_artificial_price(&self, price: &ArtificialPrice) -> Result<(), StoreError>;

    /// # Summary
    /// 停用某个标的的人工价格。
    ///
    /// # Returns
    /// 存在并被停用返回 `true`，不存在返回 `false`。
    async fn deactivate_artificial_price(&self, symbol: &str, by: &str) -> Result<bool, StoreError>;

    // --- 审计域 ---

    /// # Summary
    /// 追加一条管理员审计日志，返回分配的 ID。
    async fn append_admin_log(&self, entry: &AdminLogEntry) -> Result<i64, StoreError>;

    /// # Summary
    /// 按时间倒序分页读取审计日志。
    ///
    /// # Arguments
    /// * `admin_id`: 可选，只返回该管理员的操作。
    /// * `limit` / `offset`: 分页参数。
    async fn list_admin_logs(
        &self,
        admin_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdminLogEntry>, StoreError>;
}
