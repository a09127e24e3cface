//! # 订单路由控制器
//!
//! 下单、撤单与订单历史。开市时订单立即成交，闭市时进入排队。

use axum::Json;
use axum::extract::{Path, Query, State};
use bullpen_core::trade::entity::{AccountId, OrderId, OrderOutcome, OrderRequest, OrderStatus};

use crate::error::ApiError;
use crate::middleware::auth::CurrentUser;
use crate::server::AppState;
use crate::types::{ApiResponse, OrderResponse, OrdersQuery, PlaceOrderRequest, PlaceOrderResponse};

/// 查询当前用户的订单 (按创建时间倒序)
#[utoipa::path(
    get,
    path = "/api/v1/user/orders",
    tag = "订单交易 (Trade)",
    security(("bearer_jwt" = [])),
    params(OrdersQuery),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<OrderResponse>>),
        (status = 400, description = "未知的订单状态")
    )
)]
pub async fn get_orders(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().parse::<OrderStatus>())
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let orders = state.trade_port.orders(&AccountId(user.id), status).await?;
    Ok(Json(ApiResponse::ok(orders.into_iter().map(Into::into).collect())))
}

/// 提交新订单
///
/// 开市时按当前价格立即成交；闭市时排队，买单按参考价冻结资金。
#[utoipa::path(
    post,
    path = "/api/v1/user/orders",
    tag = "订单交易 (Trade)",
    security(("bearer_jwt" = [])),
    request_body = PlaceOrderRequest,
    responses(
        (status = 200, description = "已成交或已排队", body = ApiResponse<PlaceOrderResponse>),
        (status = 400, description = "参数非法、资金或持仓不足"),
        (status = 503, description = "暂时无法获取价格")
    )
)]
pub async fn place_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<Json<ApiResponse<PlaceOrderResponse>>, ApiError> {
    let request = OrderRequest {
        symbol: req.symbol,
        side: req.side,
        shares: req.shares,
    };
    let outcome = state.trade_port.place_order(&AccountId(user.id), request).await?;

    let response = match outcome {
        OrderOutcome::Executed { order, fill } => PlaceOrderResponse {
            executed: true,
            order: order.into(),
            commission: Some(fill.commission),
        },
        OrderOutcome::Queued { order } => PlaceOrderResponse {
            executed: false,
            order: order.into(),
            commission: None,
        },
    };
    Ok(Json(ApiResponse::ok(response)))
}

/// 撤销自己的排队订单
#[utoipa::path(
    delete,
    path = "/api/v1/user/orders/{order_id}",
    tag = "订单交易 (Trade)",
    security(("bearer_jwt" = [])),
    params(
        ("order_id" = String, Path, description = "订单 ID")
    ),
    responses(
        (status = 200, description = "撤单成功", body = ApiResponse<OrderResponse>),
        (status = 400, description = "订单已成交或已撤销"),
        (status = 404, description = "订单不存在")
    )
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ApiError> {
    let order = state
        .trade_port
        .cancel_order(&AccountId(user.id), &OrderId(order_id))
        .await?;
    Ok(Json(ApiResponse::ok(order.into())))
}
