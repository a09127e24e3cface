//! # API 统一错误处理
//!
//! 将下层各 crate 的错误类型统一映射到 HTTP 状态码与 JSON 响应体。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bullpen_core::market::error::MarketError;
use bullpen_core::store::error::StoreError;
use bullpen_core::trade::port::TradeError;
use thiserror::Error;

use crate::types::ApiErrorResponse;

/// API 层统一错误枚举
#[derive(Error, Debug)]
pub enum ApiError {
    /// 认证失败 (401)
    #[error("认证失败: {0}")]
    Unauthorized(String),

    /// 权限不足 (403)
    #[error("权限不足: {0}")]
    Forbidden(String),

    /// 资源未找到 (404)
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 请求参数或业务校验错误 (400)
    #[error("请求参数错误: {0}")]
    BadRequest(String),

    /// 资源冲突，如重复注册 (409)
    #[error("资源冲突: {0}")]
    Conflict(String),

    /// 行情暂不可用 (503)
    #[error("服务暂不可用: {0}")]
    Unavailable(String),

    /// 下层业务错误 (500)
    #[error("内部服务错误: {0}")]
    Internal(String),
}

/// 将 `ApiError` 转换为 axum 的 HTTP 响应
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::Internal(msg) => {
                // 内部错误只记录日志，不向客户端透传细节
                tracing::error!("内部服务错误: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "服务器内部错误".to_string(),
                )
            }
        };

        let body = Json(ApiErrorResponse::from_msg(message));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        match err {
            TradeError::AccountNotFound(msg) | TradeError::OrderNotFound(msg) => ApiError::NotFound(msg),
            TradeError::AccountExists(msg) => ApiError::Conflict(msg),
            TradeError::InsufficientFunds { .. }
            | TradeError::InsufficientShares { .. }
            | TradeError::InvalidOrder(_)
            | TradeError::InvalidOrderStatus(_)
            | TradeError::InvalidAmount(_) => ApiError::BadRequest(err.to_string()),
            TradeError::PriceUnavailable(msg) => ApiError::Unavailable(msg),
            TradeError::InternalError(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::NotFound(symbol) => ApiError::NotFound(format!("symbol {}", symbol)),
            MarketError::InvalidSymbol(_) | MarketError::InvalidSettings(_) => ApiError::BadRequest(err.to_string()),
            MarketError::Network(_) | MarketError::PriceUnavailable(_) => ApiError::Unavailable(err.to_string()),
            MarketError::Parse(_) | MarketError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_trade_error_status_mapping() {
        assert_eq!(status(TradeError::AccountNotFound("u".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(TradeError::AccountExists("u".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(TradeError::InsufficientFunds {
                required: dec!(10),
                actual: dec!(1)
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(TradeError::PriceUnavailable("AAPL".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(TradeError::InternalError("boom".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_market_and_store_error_status_mapping() {
        assert_eq!(status(MarketError::NotFound("X".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(MarketError::InvalidSettings("tz".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(MarketError::Network("down".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(StoreError::Conflict("dup".into())), StatusCode::CONFLICT);
        assert_eq!(status(StoreError::Database("io".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
