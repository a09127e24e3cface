use bullpen_cache::mem::MemCache;
use bullpen_core::common::time::{FakeClockProvider, TimeProvider};
use bullpen_core::market::entity::{ArtificialPrice, MarketOverride, PriceSource};
use bullpen_core::market::error::MarketError;
use bullpen_core::market::port::{MarketClock, PricePort};
use bullpen_core::store::port::{StockMetadata, SystemStore};
use bullpen_core::test_utils::StaticQuoteProvider;
use bullpen_market::clock::MarketService;
use bullpen_market::price::PriceService;
use bullpen_market::search::SearchService;
use bullpen_store::system::SqliteSystemStore;
use chrono::{Duration, NaiveTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    store: Arc<SqliteSystemStore>,
    provider: Arc<StaticQuoteProvider>,
    clock: Arc<FakeClockProvider>,
}

async fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteSystemStore::new(tmp.path()).await.unwrap());
    // 2026-03-02 周一 15:00 UTC = 10:00 EST
    let clock = Arc::new(FakeClockProvider::new(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()));
    Fixture {
        _tmp: tmp,
        store,
        provider: Arc::new(StaticQuoteProvider::new()),
        clock,
    }
}

fn price_service(f: &Fixture) -> PriceService {
    PriceService::new(
        f.store.clone(),
        f.provider.clone(),
        Arc::new(MemCache::new()),
        f.clock.clone(),
        std::time::Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_market_clock_defaults_and_overrides() {
    let f = fixture().await;
    let market = MarketService::new(f.store.clone(), f.clock.clone());

    let status = market.status().await.unwrap();
    assert!(status.is_open);
    assert_eq!(status.settings.override_mode, MarketOverride::Auto);
    assert_eq!(status.server_time, f.clock.now());
    // 默认设置已写回库中
    assert!(f.store.get_market_settings().await.unwrap().is_some());

    // 收盘后
    f.clock.set_time(Utc.with_ymd_and_hms(2026, 3, 2, 21, 30, 0).unwrap());
    assert!(!market.is_open().await.unwrap());

    market.set_override(MarketOverride::ForceOpen).await.unwrap();
    assert!(market.is_open().await.unwrap());

    market.set_override(MarketOverride::Auto).await.unwrap();
    assert!(!market.is_open().await.unwrap());
}

#[tokio::test]
async fn test_market_clock_update_hours_persists() {
    let f = fixture().await;
    let market = MarketService::new(f.store.clone(), f.clock.clone());

    let open = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
    let close = NaiveTime::from_hms_opt(23, 59, 0).unwrap();
    let settings = market.update_hours(open, close, 0, false).await.unwrap();
    assert_eq!(settings.open_time, open);
    assert_eq!(settings.updated_at, Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());

    // 周六也开市
    f.clock.set_time(Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap());
    assert!(market.is_open().await.unwrap());

    // 新实例从库中读取同一份设置
    let reloaded = MarketService::new(f.store.clone(), f.clock.clone());
    let status = reloaded.status().await.unwrap();
    assert_eq!(status.settings.close_time, close);
    assert!(!status.settings.weekdays_only);

    let invalid = market.update_hours(open, close, 15 * 60, true).await;
    assert!(matches!(invalid, Err(MarketError::InvalidSettings(_))));
}

#[tokio::test]
async fn test_price_chain_live_then_cached() {
    let f = fixture().await;
    f.provider.set_price("AAPL", dec!(150.25));
    let prices = price_service(&f);

    let live = prices.quote("aapl").await.unwrap();
    assert_eq!(live.symbol, "AAPL");
    assert_eq!(live.price, dec!(150.25));
    assert_eq!(live.source, PriceSource::Live);

    f.provider.set_price("AAPL", dec!(151));
    let cached = prices.quote("AAPL").await.unwrap();
    assert_eq!(cached.source, PriceSource::Cached);
    assert_eq!(cached.price, dec!(150.25));
    assert_eq!(f.provider.quote_calls(), 1);

    // 超过有效期后重新拉取
    f.clock.advance(Duration::seconds(61));
    let refreshed = prices.quote("AAPL").await.unwrap();
    assert_eq!(refreshed.source, PriceSource::Live);
    assert_eq!(refreshed.price, dec!(151));
    assert_eq!(f.provider.quote_calls(), 2);

    // 主动失效缓存
    prices.invalidate("AAPL").await.unwrap();
    prices.quote("AAPL").await.unwrap();
    assert_eq!(f.provider.quote_calls(), 3);
}

#[tokio::test]
async fn test_price_chain_artificial_overrides_live() {
    let f = fixture().await;
    f.provider.set_price("TSLA", dec!(200));
    let prices = price_service(&f);

    f.store
        .save_artificial_price(&ArtificialPrice {
            symbol: "TSLA".to_string(),
            price: dec!(999.99),
            active: true,
            set_by: "admin".to_string(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let quote = prices.quote("TSLA").await.unwrap();
    assert_eq!(quote.source, PriceSource::Artificial);
    assert_eq!(quote.price, dec!(999.99));
    assert_eq!(f.provider.quote_calls(), 0);

    f.store.deactivate_artificial_price("TSLA", "admin").await.unwrap();
    let quote = prices.quote("TSLA").await.unwrap();
    assert_eq!(quote.source, PriceSource::Live);
    assert_eq!(quote.price, dec!(200));
}

#[tokio::test]
async fn test_price_chain_stale_and_failures() {
    let f = fixture().await;
    f.provider.set_price("MSFT", dec!(400));
    let prices = price_service(&f);

    prices.quote("MSFT").await.unwrap();
    f.clock.advance(Duration::minutes(10));
    f.provider.set_offline(true);

    let stale = prices.quote("MSFT").await.unwrap();
    assert_eq!(stale.source, PriceSource::Stale);
    assert_eq!(stale.price, dec!(400));

    // 没有任何缓存时返回不可用
    let missing = prices.quote("NVDA").await;
    assert!(matches!(missing, Err(MarketError::PriceUnavailable(_))));

    f.provider.set_offline(false);
    let unknown = prices.quote("NVDA").await;
    assert!(matches!(unknown, Err(MarketError::NotFound(_))));

    let invalid = prices.quote("not a symbol").await;
    assert!(matches!(invalid, Err(MarketError::InvalidSymbol(_))));
}

fn meta(symbol: &str, name: &str) -> StockMetadata {
    StockMetadata {
        symbol: symbol.to_string(),
        name: name.to_string(),
        exchange: "NMS".to_string(),
        sector: None,
        currency: "USD".to_string(),
    }
}

#[tokio::test]
async fn test_search_merges_provider_results() {
    let f = fixture().await;
    f.store.save_stock_metadata(&meta("AAPL", "Apple Inc.")).await.unwrap();
    f.provider.add_listing("AAPL", "Apple Inc.");
    f.provider.add_listing("APLE", "Apple Hospitality REIT");
    let search = SearchService::new(f.store.clone(), f.provider.clone());

    let results = search.search("apple", 10).await.unwrap();
    let symbols: Vec<_> = results.iter().map(|m| m.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "APLE"]);

    // 新标的已写入本地索引
    let local = f.store.search_stocks("hospitality", 10).await.unwrap();
    assert_eq!(local.len(), 1);

    // 行情源故障时退回本地结果
    f.provider.set_offline(true);
    let offline = search.search("apple", 10).await.unwrap();
    assert_eq!(offline.len(), 2);

    assert!(search.search("   ", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_skips_provider_with_enough_local_hits() {
    let f = fixture().await;
    for (symbol, name) in [("BA", "Boeing"), ("BAC", "Bank of America"), ("BABA", "Alibaba"), ("BAX", "Baxter"), ("BALL", "Ball Corp")] {
        f.store.save_stock_metadata(&meta(symbol, name)).await.unwrap();
    }
    f.provider.add_listing("BAM", "Brookfield");
    f.provider.set_offline(true);
    let search = SearchService::new(f.store.clone(), f.provider.clone());

    let results = search.search("ba", 10).await.unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|m| m.symbol != "BAM"));
}
