use async_trait::async_trait;
use bullpen_core::cache::port::{Cache, CacheExt};
use bullpen_core::common::normalize_symbol;
use bullpen_core::common::time::TimeProvider;
use bullpen_core::market::entity::{PriceQuote, PriceSource};
use bullpen_core::market::error::MarketError;
use bullpen_core::market::port::{PricePort, QuoteProvider};
use bullpen_core::store::port::SystemStore;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// 缓存条目在内存中的最长保留时间，超过后连过期兜底也不再可用
const STALE_RETENTION: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// 写入缓存的报价
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedQuote {
    price: Decimal,
    fetched_at: DateTime<Utc>,
}

fn cache_key(symbol: &str) -> String {
    format!("quote:{}", symbol)
}

/// # Summary
/// 价格链实现，统一为撮合、估值与排行榜提供价格。
///
/// # Logic
/// 1. 激活的人工价格 → `Artificial`。
/// 2. 未超过 `quote_ttl` 的缓存 → `Cached`。
/// 3. 行情源实时报价 (写回缓存) → `Live`。
/// 4. 行情源失败但有过期缓存 → `Stale`，并记录警告。
/// 5. 以上均失败 → 错误。
///
/// # Invariants
/// - 缓存新鲜度以 `TimeProvider` 的时间判定，而不是缓存自身的 TTL。
/// - 缓存读写失败只降级为未命中，不中断价格解析。
pub struct PriceService {
    store: Arc<dyn SystemStore>,
    provider: Arc<dyn QuoteProvider>,
    cache: Arc<dyn Cache>,
    time: Arc<dyn TimeProvider>,
    quote_ttl: Duration,
}

impl PriceService {
    /// # Arguments
    /// * `quote_ttl`: 报价缓存的有效期。
    pub fn new(
        store: Arc<dyn SystemStore>,
        provider: Arc<dyn QuoteProvider>,
        cache: Arc<dyn Cache>,
        time: Arc<dyn TimeProvider>,
        quote_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
            time,
            quote_ttl: Duration::from_std(quote_ttl).unwrap_or(Duration::MAX),
        }
    }

    async fn cached(&self, symbol: &str) -> Option<CachedQuote> {
        match self.cache.get::<CachedQuote>(&cache_key(symbol)).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Quote cache read failed for {}: {}", symbol, e);
                None
            }
        }
    }

    async fn remember(&self, symbol: &str, entry: &CachedQuote) {
        if let Err(e) = self
            .cache
            .set(&cache_key(symbol), entry, Some(STALE_RETENTION))
            .await
        {
            warn!("Quote cache write failed for {}: {}", symbol, e);
        }
    }
}

#[async_trait]
impl PricePort for PriceService {
    async fn quote(&self, symbol: &str) -> Result<PriceQuote, MarketError> {
        let symbol = normalize_symbol(symbol).ok_or_else(|| MarketError::InvalidSymbol(symbol.to_string()))?;

        if let Some(artificial) = self.store.get_artificial_price(&symbol).await?
            && artificial.active
        {
            return Ok(PriceQuote {
                symbol,
                price: artificial.price,
                source: PriceSource::Artificial,
                as_of: artificial.updated_at,
            });
        }

        let now = self.time.now();
        let cached = self.cached(&symbol).await;
        if let Some(hit) = &cached
            && now - hit.fetched_at < self.quote_ttl
        {
            return Ok(PriceQuote {
                symbol,
                price: hit.price,
                source: PriceSource::Cached,
                as_of: hit.fetched_at,
            });
        }

        let live = self
            .provider
            .fetch_quote(&symbol)
            .await
            .and_then(|q| {
                if q.price > Decimal::ZERO {
                    Ok(q)
                } else {
                    Err(MarketError::Parse(format!("non-positive price {} for {}", q.price, symbol)))
                }
            });

        match live {
            Ok(quote) => {
                let entry = CachedQuote {
                    price: quote.price,
                    fetched_at: now,
                };
                self.remember(&symbol, &entry).await;
                debug!("Live quote {} = {}", symbol, quote.price);
                Ok(PriceQuote {
                    symbol,
                    price: quote.price,
                    source: PriceSource::Live,
                    as_of: now,
                })
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!(
                        "Quote provider failed for {} ({}), serving stale price from {}",
                        symbol, e, stale.fetched_at
                    );
                    Ok(PriceQuote {
                        symbol,
                        price: stale.price,
                        source: PriceSource::Stale,
                        as_of: stale.fetched_at,
                    })
                }
                None => match e {
                    MarketError::NotFound(_) => Err(e),
                    other => {
                        warn!("No price available for {}: {}", symbol, other);
                        Err(MarketError::PriceUnavailable(symbol))
                    }
                },
            },
        }
    }

    async fn invalidate(&self, symbol: &str) -> Result<(), MarketError> {
        let symbol = normalize_symbol(symbol).ok_or_else(|| MarketError::InvalidSymbol(symbol.to_string()))?;
        self.cache
            .del(&cache_key(&symbol))
            .await
            .map_err(|e| MarketError::Store(e.to_string()))
    }
}
