//! # `bullpen-market` - 市场领域服务
//!
//! - [`clock::MarketService`]: 交易时间与强制开闭市。
//! - [`price::PriceService`]: 价格链 (人工价格 → 缓存 → 实时行情 → 过期缓存)。
//! - [`search::SearchService`]: 本地元数据索引 + 行情源搜索。

pub mod clock;
pub mod price;
pub mod search;
