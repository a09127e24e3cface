use bullpen_core::market::error::MarketError;
use bullpen_core::market::port::QuoteProvider;
use bullpen_feed::yahoo::YahooProvider;

fn install_crypto() {
    // reqwest 使用 rustls-no-provider，需要进程级安装加密后端
    let _ignored = rustls::crypto::ring::default_provider().install_default();
}

fn provider() -> YahooProvider {
    install_crypto();
    YahooProvider::new().expect("Failed to build provider")
}

/// # Summary
/// 雅虎财经实时报价的集成测试 (需要外网)。
#[tokio::test]
#[ignore = "requires network access"]
async fn test_yahoo_real_quote() -> anyhow::Result<()> {
    let quote = provider().fetch_quote("AAPL").await?;
    assert_eq!(quote.symbol, "AAPL");
    assert!(quote.price > rust_decimal::Decimal::ZERO);
    println!("AAPL = {} ({:?})", quote.price, quote.as_of);
    Ok(())
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_yahoo_unknown_symbol() {
    let result = provider().fetch_quote("ZZZZZZZZZ").await;
    assert!(matches!(result, Err(MarketError::NotFound(_))), "{:?}", result);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_yahoo_search() -> anyhow::Result<()> {
    let results = provider().search_symbols("apple").await?;
    assert!(results.iter().any(|m| m.symbol == "AAPL"));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    install_crypto();
    let provider = YahooProvider::with_endpoints("http://127.0.0.1:9/chart", "http://127.0.0.1:9/search")
        .expect("Failed to build provider");
    let result = provider.fetch_quote("AAPL").await;
    assert!(matches!(result, Err(MarketError::Network(_))), "{:?}", result);
}
