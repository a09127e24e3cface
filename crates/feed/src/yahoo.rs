use async_trait::async_trait;
use bullpen_core::common::normalize_symbol;
use bullpen_core::market::entity::Quote;
use bullpen_core::market::error::MarketError;
use bullpen_core::market::port::QuoteProvider;
use bullpen_core::store::port::StockMetadata;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const DEFAULT_SEARCH_URL: &str = "https://query1.finance.yahoo.com/v1/finance/search";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// 报价保留的小数位
const PRICE_SCALE: u32 = 4;
/// 单次搜索向上游请求的条数
const SEARCH_COUNT: &str = "10";

/// # Summary
/// Yahoo Finance 行情提供者实现。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端进行通讯，10 秒超时。
/// - 只负责单次请求，不做缓存与重试。
#[derive(Clone)]
pub struct YahooProvider {
    /// 内部使用的 HTTP 客户端
    client: Client,
    chart_url: String,
    search_url: String,
}

impl YahooProvider {
    /// # Summary
    /// 创建一个新的 YahooProvider 实例。
    ///
    /// # Logic
    /// 1. 配置 10 秒超时。
    /// 2. 设置伪装浏览器 Header (User-Agent) 以减少被拦截风险。
    ///
    /// # Returns
    /// HTTP 客户端构建失败 (例如未安装 TLS provider) 时返回 `MarketError::Network`。
    pub fn new() -> Result<Self, MarketError> {
        Self::with_endpoints(DEFAULT_CHART_URL, DEFAULT_SEARCH_URL)
    }

    /// 使用自定义接口地址创建实例 (用于代理或本地模拟服务)
    pub fn with_endpoints(chart_url: &str, search_url: &str) -> Result<Self, MarketError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MarketError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            chart_url: chart_url.trim_end_matches('/').to_string(),
            search_url: search_url.to_string(),
        })
    }
}

/// # Summary
/// Yahoo v8 chart 接口响应顶层结构。
#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<IndicatorQuote>,
}

#[derive(Deserialize, Debug)]
struct IndicatorQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Yahoo v1 search 接口响应
#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<SearchQuote>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SearchQuote {
    symbol: Option<String>,
    #[serde(rename = "shortname")]
    short_name: Option<String>,
    #[serde(rename = "longname")]
    long_name: Option<String>,
    exch_disp: Option<String>,
    exchange: Option<String>,
    quote_type: Option<String>,
    sector: Option<String>,
}

fn to_price(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(PRICE_SCALE).normalize())
        .filter(|d| *d > Decimal::ZERO)
}

/// # Summary
/// 从 chart 响应中提取最新价格。
///
/// # Logic
/// 1. 优先使用 `meta.regularMarketPrice`。
/// 2. 缺失时回退到最后一个非空收盘价。
fn quote_from_chart(symbol: &str, response: ChartResponse) -> Result<Quote, MarketError> {
    if let Some(err) = response.chart.error {
        let code = err.code.unwrap_or_default();
        let description = err.description.unwrap_or_default();
        if code.eq_ignore_ascii_case("not found") {
            return Err(MarketError::NotFound(symbol.to_string()));
        }
        return Err(MarketError::Parse(format!("{}: {}", code, description)));
    }

    let result = response
        .chart
        .result
        .and_then(|mut r| r.pop())
        .ok_or_else(|| MarketError::NotFound(symbol.to_string()))?;

    let meta_price = result.meta.regular_market_price.and_then(to_price);
    let last_close = || {
        let closes = &result.indicators.as_ref()?.quote.first()?.close;
        closes
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, c)| c.and_then(to_price).map(|p| (i, p)))
    };

    let (price, as_of) = match meta_price {
        Some(price) => (price, result.meta.regular_market_time.and_then(timestamp)),
        None => {
            let (i, price) = last_close().ok_or_else(|| MarketError::NotFound(symbol.to_string()))?;
            (price, result.timestamp.get(i).copied().and_then(timestamp))
        }
    };

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        currency: result.meta.currency,
        as_of: as_of.unwrap_or_else(Utc::now),
    })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// # Summary
/// 将搜索结果转换为股票元数据，只保留股票与 ETF。
fn metadata_from_search(response: SearchResponse) -> Vec<StockMetadata> {
    response
        .quotes
        .into_iter()
        .filter(|q| {
            q.quote_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("EQUITY") || t.eq_ignore_ascii_case("ETF"))
        })
        .filter_map(|q| {
            let symbol = normalize_symbol(q.symbol.as_deref()?)?;
            let name = q
                .long_name
                .or(q.short_name)
                .unwrap_or_else(|| symbol.clone());
            Some(StockMetadata {
                name,
                exchange: q.exch_disp.or(q.exchange).unwrap_or_default(),
                sector: q.sector,
                currency: "USD".to_string(),
                symbol,
            })
        })
        .collect()
}

#[async_trait]
impl QuoteProvider for YahooProvider {
    /// # Summary
    /// 通过 v8 chart 接口获取最新价格。
    ///
    /// # Logic
    /// 1. 请求最近 5 个交易日的日线，保证收盘价回退有数据可用。
    /// 2. 404 视为标的不存在，其余非 2xx 视为网络错误。
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketError> {
        let url = format!("{}/{}", self.chart_url, symbol);
        let resp = self
            .client
            .get(&url)
            .query(&[("range", "5d"), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MarketError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(MarketError::Network(format!("HTTP {}", status)));
        }

        let json: ChartResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;
        let quote = quote_from_chart(symbol, json)?;
        debug!("Yahoo quote {} = {}", symbol, quote.price);
        Ok(quote)
    }

    async fn search_symbols(&self, query: &str) -> Result<Vec<StockMetadata>, MarketError> {
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[
                ("q", query),
                ("quotesCount", SEARCH_COUNT),
                ("newsCount", "0"),
            ])
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", resp.status())));
        }

        let json: SearchResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;
        Ok(metadata_from_search(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn chart(json: &str) -> ChartResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_quote_uses_regular_market_price() {
        let resp = chart(
            r#"{"chart":{"result":[{"meta":{"currency":"USD","symbol":"AAPL","regularMarketPrice":189.8400001,"regularMarketTime":1772467200},
            "timestamp":[1772380800],"indicators":{"quote":[{"close":[188.1]}]}}],"error":null}}"#,
        );
        let quote = quote_from_chart("AAPL", resp).unwrap();
        assert_eq!(quote.price, dec!(189.84));
        assert_eq!(quote.currency.as_deref(), Some("USD"));
        assert_eq!(quote.as_of.timestamp(), 1772467200);
    }

    #[test]
    fn test_quote_falls_back_to_last_close() {
        let resp = chart(
            r#"{"chart":{"result":[{"meta":{"currency":"USD"},
            "timestamp":[100,200,300],"indicators":{"quote":[{"close":[10.5,11.25,null]}]}}],"error":null}}"#,
        );
        let quote = quote_from_chart("XYZ", resp).unwrap();
        assert_eq!(quote.price, dec!(11.25));
        assert_eq!(quote.as_of.timestamp(), 200);
    }

    #[test]
    fn test_quote_not_found() {
        let resp = chart(
            r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#,
        );
        assert!(matches!(quote_from_chart("NOPE", resp), Err(MarketError::NotFound(_))));

        let empty = chart(r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{"close":[]}]}}],"error":null}}"#);
        assert!(matches!(quote_from_chart("NOPE", empty), Err(MarketError::NotFound(_))));
    }

    #[test]
    fn test_search_filters_equities() {
        let resp: SearchResponse = serde_json::from_str(
            r#"{"quotes":[
                {"symbol":"AAPL","shortname":"Apple Inc.","longname":"Apple Inc.","exchDisp":"NASDAQ","quoteType":"EQUITY","sector":"Technology"},
                {"symbol":"APLE","shortname":"Apple Hospitality","exchange":"NYQ","quoteType":"EQUITY"},
                {"symbol":"AAPL240621C00100000","shortname":"AAPL Call","quoteType":"OPTION"},
                {"symbol":"spy","shortname":"SPDR S&P 500","exchDisp":"NYSEArca","quoteType":"ETF"},
                {"shortname":"No symbol","quoteType":"EQUITY"}
            ],"news":[]}"#,
        )
        .unwrap();

        let items = metadata_from_search(resp);
        let symbols: Vec<_> = items.iter().map(|m| m.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "APLE", "SPY"]);
        assert_eq!(items[0].sector.as_deref(), Some("Technology"));
        assert_eq!(items[1].exchange, "NYQ");
        assert_eq!(items[2].name, "SPDR S&P 500");
    }
}
