use crate::market::entity::{MarketOverride, MarketSettings, MarketStatus, PriceQuote, Quote};
use crate::market::error::MarketError;
use crate::store::port::StockMetadata;
use async_trait::async_trait;
use chrono::NaiveTime;

/// # Summary
/// 第三方行情数据提供者接口（原始数据源）。
///
/// # Invariants
/// - 实现者只负责单次请求，缓存与降级由上层的价格链处理。
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// # Summary
    /// 获取某个标的的最新报价。
    ///
    /// # Logic
    /// 1. 构建数据源请求。
    /// 2. 执行网络请求并解析最新成交价。
    ///
    /// # Arguments
    /// * `symbol`: 已规整的证券代码。
    ///
    /// # Returns
    /// 成功返回 `Quote`；标的不存在返回 `MarketError::NotFound`。
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketError>;

    /// # Summary
    /// 按关键字搜索可交易的标的。
    ///
    /// # Arguments
    /// * `query`: 关键字，匹配代码或公司名称。
    ///
    /// # Returns
    /// 匹配的股票元数据列表，可能为空。
    async fn search_symbols(&self, query: &str) -> Result<Vec<StockMetadata>, MarketError>;
}

/// # Summary
/// 价格解析端口。交易撮合、持仓估值与排行榜统一通过它取价。
///
/// # Invariants
/// - 返回的价格必须为正数。
#[async_trait]
pub trait PricePort: Send + Sync {
    /// # Summary
    /// 按价格链解析某个标的的可交易价格。
    ///
    /// # Logic
    /// 人工价格 → 有效缓存 → 实时行情 → 过期缓存，全部失败时返回错误。
    ///
    /// # Arguments
    /// * `symbol`: 证券代码 (大小写不敏感)。
    ///
    /// # Returns
    /// 带有价格来源的 `PriceQuote`。
    async fn quote(&self, symbol: &str) -> Result<PriceQuote, MarketError>;

    /// # Summary
    /// 丢弃某个标的的报价缓存，使下一次取价重新走价格链。
    async fn invalidate(&self, symbol: &str) -> Result<(), MarketError>;
}

/// # Summary
/// 模拟市场时钟，负责开闭市判定与交易时间设置。
#[async_trait]
pub trait MarketClock: Send + Sync {
    /// 当前是否开市
    async fn is_open(&self) -> Result<bool, MarketError> {
        Ok(self.status().await?.is_open)
    }

    /// 获取包含设置与服务器时间的完整市场状态
    async fn status(&self) -> Result<MarketStatus, MarketError>;

    /// 修改交易时段
    async fn update_hours(
        &self,
        open_time: NaiveTime,
        close_time: NaiveTime,
        utc_offset_minutes: i32,
        weekdays_only: bool,
    ) -> Result<MarketSettings, MarketError>;

    /// 设置管理员强制开闭市模式
    async fn set_override(&self, mode: MarketOverride) -> Result<MarketSettings, MarketError>;
}
