use bullpen_core::market::error::MarketError;
use bullpen_core::market::port::QuoteProvider;
use bullpen_core::store::port::{StockMetadata, SystemStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// 本地命中少于该数量时向行情源补充搜索
pub const MIN_LOCAL_HITS: usize = 5;
/// 查询关键字的最大长度
pub const MAX_QUERY_LEN: usize = 64;

/// # Summary
/// 股票搜索服务。
///
/// # Logic
/// 1. 先查本地 `stock_metadata` 索引。
/// 2. 命中不足 `MIN_LOCAL_HITS` 条时调用行情源搜索，
///    新发现的标的写入本地索引后合并返回。
/// 3. 行情源失败时只返回本地结果。
pub struct SearchService {
    store: Arc<dyn SystemStore>,
    provider: Arc<dyn QuoteProvider>,
}

impl SearchService {
    pub fn new(store: Arc<dyn SystemStore>, provider: Arc<dyn QuoteProvider>) -> Self {
        Self { store, provider }
    }

    /// # Arguments
    /// * `query`: 关键字 (代码或公司名)，空白查询返回空列表。
    /// * `limit`: 返回条数上限。
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<StockMetadata>, MarketError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if query.chars().count() > MAX_QUERY_LEN {
            return Err(MarketError::InvalidSymbol(query.to_string()));
        }

        let mut results = self.store.search_stocks(query, limit).await?;
        if results.len() >= MIN_LOCAL_HITS.min(limit) {
            return Ok(results);
        }

        let remote = match self.provider.search_symbols(query).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Provider search for {:?} failed: {}", query, e);
                return Ok(results);
            }
        };

        let mut seen: HashSet<String> = results.iter().map(|m| m.symbol.clone()).collect();
        for meta in remote {
            if results.len() >= limit {
                break;
            }
            if !seen.insert(meta.symbol.clone()) {
                continue;
            }
            if let Err(e) = self.store.save_stock_metadata(&meta).await {
                warn!("Failed to index {}: {}", meta.symbol, e);
            }
            results.push(meta);
        }
        debug!("Search {:?} -> {} results", query, results.len());
        Ok(results)
    }
}
