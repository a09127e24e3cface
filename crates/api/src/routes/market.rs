use axum::Json;
use axum::extract::{Path, Query, State};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ApiResponse, MarketStatusResponse, QuoteResponse, SearchQuery, StockMetadataResponse};

const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 50;

/// 搜索股票
///
/// 先查本地索引，命中不足时向行情源补充。
#[utoipa::path(
    get,
    path = "/api/v1/market/search",
    tag = "行情 (Market)",
    params(SearchQuery),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<StockMetadataResponse>>),
        (status = 400, description = "关键字过长")
    )
)]
pub async fn search_stocks(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<Vec<StockMetadataResponse>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
    let results = state.search.search(&query.q, limit).await?;
    Ok(Json(ApiResponse::ok(results.into_iter().map(Into::into).collect())))
}

/// 获取报价
///
/// 返回价格链解析结果，`source` 标明价格来源 (人工/实时/缓存/过期缓存)。
#[utoipa::path(
    get,
    path = "/api/v1/market/quote/{symbol}",
    tag = "行情 (Market)",
    params(
        ("symbol" = String, Path, description = "股票代码")
    ),
    responses(
        (status = 200, description = "成功", body = ApiResponse<QuoteResponse>),
        (status = 404, description = "标的不存在"),
        (status = 503, description = "暂时无法获取价格")
    )
)]
pub async fn get_quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<QuoteResponse>>, ApiError> {
    let quote = state.prices.quote(&symbol).await?;
    Ok(Json(ApiResponse::ok(quote.into())))
}

/// 市场开闭状态与交易时段
#[utoipa::path(
    get,
    path = "/api/v1/market/status",
    tag = "行情 (Market)",
    responses(
        (status = 200, description = "成功", body = ApiResponse<MarketStatusResponse>)
    )
)]
pub async fn market_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MarketStatusResponse>>, ApiError> {
    let status = state.market_clock.status().await?;
    Ok(Json(ApiResponse::ok(status.into())))
}
