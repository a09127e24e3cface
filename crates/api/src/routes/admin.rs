//! # 管理员专有路由控制器
//!
//! 提供用户管理、余额调整、交易时段、人工价格、挂单队列与审计日志等能力。
//! 对应的路由受 `auth_middleware` 和 `require_admin` 中间件验证保护。
//! 每一次修改操作成功后都会追加一条审计日志。

use axum::Json;
use axum::extract::{Path, Query, State};
use bullpen_core::common::normalize_symbol;
use bullpen_core::market::entity::ArtificialPrice;
use bullpen_core::store::port::{AdminAction, AdminLogEntry, User, UserRole};
use bullpen_core::trade::entity::{AccountId, OrderId};
use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::auth::CurrentUser;
use crate::routes::auth::{create_user_with_account, hash_password, normalize_name, validate_password, validate_username};
use crate::server::AppState;
use crate::types::{
    ActivityQuery, AdminLogResponse, ApiResponse, ArtificialPriceRequest, ArtificialPriceResponse, BalanceMode,
    BalanceRequest, BalanceResponse, CancelReasonQuery, CreateUserRequest, MarketHoursRequest,
    MarketOverrideRequest, MarketStatusResponse, OrderResponse, QueueReportResponse, UpdateRoleRequest,
    UserResponse,
};

const DEFAULT_ACTIVITY_LIMIT: usize = 100;
const MAX_ACTIVITY_LIMIT: usize = 500;

/// # Summary
/// 追加审计日志。
///
/// # Invariants
/// - 日志写入失败不回滚已完成的操作，只记录错误。
async fn audit(
    state: &AppState,
    admin: &User,
    action: AdminAction,
    target: Option<String>,
    details: serde_json::Value,
) {
    let entry = AdminLogEntry {
        id: 0,
        admin_id: admin.id.clone(),
        action,
        target,
        details,
        created_at: Utc::now(),
    };
    match state.system_store.append_admin_log(&entry).await {
        Ok(id) => tracing::info!("Admin {} performed {} (log #{})", admin.id, action, id),
        Err(e) => tracing::error!("Failed to record admin action {} by {}: {}", action, admin.id, e),
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, ApiError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ApiError::BadRequest(format!("Invalid time {:?}, expected HH:MM", raw)))
}

fn parse_symbol(raw: &str) -> Result<String, ApiError> {
    normalize_symbol(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid symbol {:?}", raw)))
}

async fn existing_user(state: &AppState, id: &str) -> Result<User, ApiError> {
    state
        .system_store
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", id)))
}

// ============================================================
//  用户管理
// ============================================================

/// 列出全部用户
#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<UserResponse>>),
        (status = 403, description = "无权限执行此操作")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<UserResponse>>>, ApiError> {
    let users = state.system_store.list_users().await?;
    Ok(Json(ApiResponse::ok(users.iter().map(UserResponse::from).collect())))
}

/// 创建新用户
///
/// 由管理员代建的账号首次登录后必须修改密码。
#[utoipa::path(
    post,
    path = "/api/v1/admin/users",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "用户创建成功", body = ApiResponse<UserResponse>),
        (status = 400, description = "无效的请求参数"),
        (status = 403, description = "无权限执行此操作"),
        (status = 409, description = "用户已存在")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let id = req.id.trim().to_string();
    validate_username(&id)?;
    validate_password(&req.password)?;
    let role = req.role.parse::<UserRole>().map_err(ApiError::BadRequest)?;
    let name = normalize_name(&req.name)?.unwrap_or_else(|| id.clone());

    let password_hash = hash_password(req.password, state.app_config.server.bcrypt_cost).await?;
    let user = User {
        id,
        name,
        password_hash,
        role,
        force_password_change: true,
        created_at: Utc::now(),
    };
    create_user_with_account(&state, &user).await?;

    audit(
        &state,
        &admin,
        AdminAction::CreateUser,
        Some(user.id.clone()),
        json!({ "role": user.role.to_string(), "name": user.name }),
    )
    .await;
    Ok(Json(ApiResponse::ok(UserResponse::from(&user))))
}

/// 修改用户角色
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{user_id}/role",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    params(("user_id" = String, Path, description = "用户 ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "修改成功", body = ApiResponse<UserResponse>),
        (status = 400, description = "非法角色或试图降级自己"),
        (status = 404, description = "用户不存在")
    )
)]
pub async fn update_role(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(user_id): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let role = req.role.parse::<UserRole>().map_err(ApiError::BadRequest)?;
    if user_id == admin.id && role != UserRole::Admin {
        return Err(ApiError::BadRequest("Admins cannot demote themselves".into()));
    }

    let mut user = existing_user(&state, &user_id).await?;
    let previous = user.role;
    state.system_store.update_user_role(&user.id, role).await?;
    user.role = role;
    // 角色变化影响排行榜的参与者
    state.leaderboard.invalidate().await;

    audit(
        &state,
        &admin,
        AdminAction::ChangeRole,
        Some(user.id.clone()),
        json!({ "from": previous.to_string(), "to": role.to_string() }),
    )
    .await;
    Ok(Json(ApiResponse::ok(UserResponse::from(&user))))
}

/// 调整用户余额
///
/// `adjust` 在当前可用余额上增减，`set` 直接设定可用余额。结果不允许为负。
#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/balance",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    params(("user_id" = String, Path, description = "用户 ID")),
    request_body = BalanceRequest,
    responses(
        (status = 200, description = "调整成功", body = ApiResponse<BalanceResponse>),
        (status = 400, description = "金额非法或余额不足"),
        (status = 404, description = "用户不存在")
    )
)]
pub async fn update_balance(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(user_id): Path<String>,
    Json(req): Json<BalanceRequest>,
) -> Result<Json<ApiResponse<BalanceResponse>>, ApiError> {
    let user = existing_user(&state, &user_id).await?;
    let account = AccountId(user.id.clone());
    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("admin adjustment");
    let memo = format!("{} (by {})", reason, admin.id);

    let (action, balance) = match req.mode {
        BalanceMode::Adjust => {
            if req.amount.is_zero() {
                return Err(ApiError::BadRequest("Adjustment amount must not be zero".into()));
            }
            (
                AdminAction::AdjustBalance,
                state.accounts.adjust_balance(&account, req.amount, &memo).await?,
            )
        }
        BalanceMode::Set => (
            AdminAction::SetBalance,
            state.accounts.set_balance(&account, req.amount, &memo).await?,
        ),
    };
    state.leaderboard.invalidate().await;

    audit(
        &state,
        &admin,
        action,
        Some(user.id.clone()),
        json!({ "amount": req.amount.to_string(), "balance": balance.to_string(), "reason": reason }),
    )
    .await;
    Ok(Json(ApiResponse::ok(BalanceResponse {
        user_id: user.id,
        available_balance: balance,
    })))
}

// ============================================================
//  市场控制
// ============================================================

/// 查看市场设置与状态
#[utoipa::path(
    get,
    path = "/api/v1/admin/market",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "成功", body = ApiResponse<MarketStatusResponse>)
    )
)]
pub async fn get_market(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MarketStatusResponse>>, ApiError> {
    let status = state.market_clock.status().await?;
    Ok(Json(ApiResponse::ok(status.into())))
}

/// 修改交易时段
#[utoipa::path(
    put,
    path = "/api/v1/admin/market/hours",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    request_body = MarketHoursRequest,
    responses(
        (status = 200, description = "修改成功", body = ApiResponse<MarketStatusResponse>),
        (status = 400, description = "时间格式或时区偏移非法")
    )
)]
pub async fn update_hours(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Json(req): Json<MarketHoursRequest>,
) -> Result<Json<ApiResponse<MarketStatusResponse>>, ApiError> {
    let open_time = parse_time(&req.open_time)?;
    let close_time = parse_time(&req.close_time)?;
    state
        .market_clock
        .update_hours(open_time, close_time, req.utc_offset_minutes, req.weekdays_only)
        .await?;

    audit(
        &state,
        &admin,
        AdminAction::UpdateMarketHours,
        None,
        json!({
            "open_time": open_time.format("%H:%M").to_string(),
            "close_time": close_time.format("%H:%M").to_string(),
            "utc_offset_minutes": req.utc_offset_minutes,
            "weekdays_only": req.weekdays_only,
        }),
    )
    .await;
    get_market(State(state)).await
}

/// 强制开市 / 强制闭市 / 恢复自动
#[utoipa::path(
    put,
    path = "/api/v1/admin/market/override",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    request_body = MarketOverrideRequest,
    responses(
        (status = 200, description = "修改成功", body = ApiResponse<MarketStatusResponse>)
    )
)]
pub async fn set_override(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Json(req): Json<MarketOverrideRequest>,
) -> Result<Json<ApiResponse<MarketStatusResponse>>, ApiError> {
    state.market_clock.set_override(req.mode).await?;
    audit(
        &state,
        &admin,
        AdminAction::SetMarketOverride,
        None,
        json!({ "mode": req.mode.to_string() }),
    )
    .await;
    get_market(State(state)).await
}

// ============================================================
//  人工价格
// ============================================================

/// 列出全部人工价格
#[utoipa::path(
    get,
    path = "/api/v1/admin/prices",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<ArtificialPriceResponse>>)
    )
)]
pub async fn list_prices(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ArtificialPriceResponse>>>, ApiError> {
    let prices = state.system_store.list_artificial_prices().await?;
    Ok(Json(ApiResponse::ok(prices.into_iter().map(Into::into).collect())))
}

/// 设置人工价格
///
/// 激活后该标的的所有取价 (撮合、估值、排行榜) 都使用此价格。
#[utoipa::path(
    put,
    path = "/api/v1/admin/prices/{symbol}",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    params(("symbol" = String, Path, description = "股票代码")),
    request_body = ArtificialPriceRequest,
    responses(
        (status = 200, description = "设置成功", body = ApiResponse<ArtificialPriceResponse>),
        (status = 400, description = "代码或价格非法")
    )
)]
pub async fn set_price(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(symbol): Path<String>,
    Json(req): Json<ArtificialPriceRequest>,
) -> Result<Json<ApiResponse<ArtificialPriceResponse>>, ApiError> {
    let symbol = parse_symbol(&symbol)?;
    if req.price <= Decimal::ZERO {
        return Err(ApiError::BadRequest("Price must be positive".into()));
    }

    let price = ArtificialPrice {
        symbol: symbol.clone(),
        price: req.price,
        active: true,
        set_by: admin.id.clone(),
        updated_at: Utc::now(),
    };
    state.system_store.save_artificial_price(&price).await?;

    audit(
        &state,
        &admin,
        AdminAction::SetArtificialPrice,
        Some(symbol),
        json!({ "price": req.price.to_string() }),
    )
    .await;
    Ok(Json(ApiResponse::ok(price.into())))
}

/// 停用人工价格，恢复实时行情
#[utoipa::path(
    delete,
    path = "/api/v1/admin/prices/{symbol}",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    params(("symbol" = String, Path, description = "股票代码")),
    responses(
        (status = 200, description = "已停用", body = ApiResponse<String>),
        (status = 404, description = "该标的没有人工价格")
    )
)]
pub async fn clear_price(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let symbol = parse_symbol(&symbol)?;
    if !state
        .system_store
        .deactivate_artificial_price(&symbol, &admin.id)
        .await?
    {
        return Err(ApiError::NotFound(format!("artificial price for {}", symbol)));
    }
    if let Err(e) = state.prices.invalidate(&symbol).await {
        tracing::warn!("Failed to invalidate quote cache for {}: {}", symbol, e);
    }

    audit(
        &state,
        &admin,
        AdminAction::ClearArtificialPrice,
        Some(symbol.clone()),
        json!({}),
    )
    .await;
    Ok(Json(ApiResponse::ok(format!("Artificial price for {} deactivated", symbol))))
}

// ============================================================
//  挂单队列
// ============================================================

/// 列出全部排队中的订单 (先进先出)
#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<OrderResponse>>)
    )
)]
pub async fn list_orders(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ApiError> {
    let orders = state.trade_port.pending_orders().await?;
    Ok(Json(ApiResponse::ok(orders.into_iter().map(Into::into).collect())))
}

/// 撤销任意排队订单
#[utoipa::path(
    delete,
    path = "/api/v1/admin/orders/{order_id}",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    params(
        ("order_id" = String, Path, description = "订单 ID"),
        CancelReasonQuery
    ),
    responses(
        (status = 200, description = "撤单成功", body = ApiResponse<OrderResponse>),
        (status = 400, description = "订单已完结"),
        (status = 404, description = "订单不存在")
    )
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(order_id): Path<String>,
    Query(query): Query<CancelReasonQuery>,
) -> Result<Json<ApiResponse<OrderResponse>>, ApiError> {
    let reason = query.reason.unwrap_or_default();
    let order = state
        .trade_port
        .cancel_any_order(&OrderId(order_id), &reason)
        .await?;

    audit(
        &state,
        &admin,
        AdminAction::CancelOrder,
        Some(order.id.0.clone()),
        json!({ "user_id": order.account_id.0, "reason": reason }),
    )
    .await;
    Ok(Json(ApiResponse::ok(order.into())))
}

/// 立即处理挂单队列
///
/// 不检查开闭市状态，按当前价格撮合全部排队订单。
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/process",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "处理完成", body = ApiResponse<QueueReportResponse>)
    )
)]
pub async fn process_queue(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
) -> Result<Json<ApiResponse<QueueReportResponse>>, ApiError> {
    let report = state.trade_port.process_queue().await?;
    audit(
        &state,
        &admin,
        AdminAction::ProcessQueue,
        None,
        json!({
            "executed": report.executed,
            "cancelled": report.cancelled,
            "deferred": report.deferred,
        }),
    )
    .await;
    Ok(Json(ApiResponse::ok(report.into())))
}

// ============================================================
//  审计日志
// ============================================================

/// 分页查询审计日志 (按时间倒序)
#[utoipa::path(
    get,
    path = "/api/v1/admin/activity",
    tag = "系统管理 (Admin)",
    security(("bearer_jwt" = [])),
    params(ActivityQuery),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<AdminLogResponse>>)
    )
)]
pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ApiResponse<Vec<AdminLogResponse>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).clamp(1, MAX_ACTIVITY_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let admin_id = query.admin_id.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let entries = state.system_store.list_admin_logs(admin_id, limit, offset).await?;
    Ok(Json(ApiResponse::ok(entries.into_iter().map(Into::into).collect())))
}
