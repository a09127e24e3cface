use thiserror::Error;

/// # Summary
/// 市场数据域错误枚举，处理网络、解析、数据缺失及价格链全部失效等问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum MarketError {
    // 网络层错误，包含底层 HTTP 客户端错误信息
    #[error("Network error: {0}")]
    Network(String),
    // 数据解析错误，如 JSON 格式不匹配
    #[error("Parse error: {0}")]
    Parse(String),
    // 行情源中不存在该标的 (404 或内容为空)
    #[error("Symbol not found: {0}")]
    NotFound(String),
    // 非法的证券代码输入
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
    // 非法的市场设置 (时区越界等)
    #[error("Invalid market settings: {0}")]
    InvalidSettings(String),
    // 价格链所有环节均无法给出价格
    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),
    // 市场设置等持久化数据读写失败
    #[error("Store error: {0}")]
    Store(String),
}

impl From<crate::store::error::StoreError> for MarketError {
    fn from(err: crate::store::error::StoreError) -> Self {
        MarketError::Store(err.to_string())
    }
}
