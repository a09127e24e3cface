//! 测试辅助实现，供下游 crate 的测试通过 `test-utils` feature 引用。

use crate::market::entity::Quote;
use crate::market::error::MarketError;
use crate::market::port::QuoteProvider;
use crate::store::port::StockMetadata;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// # Summary
/// 内存行情源：价格由测试代码直接设定，可模拟行情源故障。
///
/// # Invariants
/// - 未设定价格的标的返回 `MarketError::NotFound`。
/// - `set_offline(true)` 后所有请求返回 `MarketError::Network`。
#[derive(Default)]
pub struct StaticQuoteProvider {
    prices: DashMap<String, Decimal>,
    listings: DashMap<String, StockMetadata>,
    offline: AtomicBool,
    quote_calls: AtomicUsize,
}

impl StaticQuoteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设定某个标的的报价
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.insert(symbol.to_string(), price);
    }

    /// 登记一条可被搜索到的标的
    pub fn add_listing(&self, symbol: &str, name: &str) {
        self.listings.insert(
            symbol.to_string(),
            StockMetadata {
                symbol: symbol.to_string(),
                name: name.to_string(),
                exchange: "NMS".to_string(),
                sector: None,
                currency: "USD".to_string(),
            },
        );
    }

    /// 模拟行情源断线
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 累计报价请求次数 (用于断言缓存命中)
    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for StaticQuoteProvider {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(MarketError::Network("provider offline".into()));
        }
        let price = self
            .prices
            .get(symbol)
            .map(|p| *p.value())
            .ok_or_else(|| MarketError::NotFound(symbol.to_string()))?;
        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            currency: Some("USD".to_string()),
            as_of: Utc::now(),
        })
    }

    async fn search_symbols(&self, query: &str) -> Result<Vec<StockMetadata>, MarketError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MarketError::Network("provider offline".into()));
        }
        let needle = query.to_lowercase();
        let mut hits: Vec<StockMetadata> = self
            .listings
            .iter()
            .filter(|kv| {
                kv.value().symbol.to_lowercase().contains(&needle)
                    || kv.value().name.to_lowercase().contains(&needle)
            })
            .map(|kv| kv.value().clone())
            .collect();
        hits.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(hits)
    }
}
