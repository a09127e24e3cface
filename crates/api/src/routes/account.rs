//! # 用户资料与资产路由控制器
//!
//! 实现 `/api/v1/user/...` 路径下的资料、组合与成交记录接口。
//! 所有接口只作用于 Token 对应的当前用户。

use axum::Json;
use axum::extract::{Query, State};
use bullpen_core::trade::entity::AccountId;

use crate::error::ApiError;
use crate::middleware::auth::CurrentUser;
use crate::routes::auth::normalize_name;
use crate::server::AppState;
use crate::types::{
    ApiResponse, LedgerEntryResponse, LimitQuery, PortfolioResponse, ProfileResponse, TransactionResponse, UpdateProfileRequest,
};

const DEFAULT_TRANSACTIONS: usize = 50;
const MAX_TRANSACTIONS: usize = 500;

/// 获取当前用户资料
#[utoipa::path(
    get,
    path = "/api/v1/user/profile",
    tag = "账户 (Account)",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "成功", body = ApiResponse<ProfileResponse>),
        (status = 401, description = "未认证"),
        (status = 404, description = "账户不存在")
    )
)]
pub async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<ProfileResponse>>, ApiError> {
    let snapshot = state.accounts.snapshot(&AccountId(user.id.clone())).await?;
    Ok(Json(ApiResponse::ok(ProfileResponse {
        id: user.id,
        name: user.name,
        role: user.role.to_string(),
        available_balance: snapshot.available_balance,
        reserved_balance: snapshot.reserved_balance,
        created_at: user.created_at,
    })))
}

/// 修改显示名称
#[utoipa::path(
    put,
    path = "/api/v1/user/profile",
    tag = "账户 (Account)",
    security(("bearer_jwt" = [])),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "修改成功", body = ApiResponse<ProfileResponse>),
        (status = 400, description = "名称不合法")
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<ProfileResponse>>, ApiError> {
    let name = normalize_name(&req.name)?.ok_or_else(|| ApiError::BadRequest("Name must not be empty".into()))?;
    state.system_store.update_user_name(&user.id, &name).await?;
    user.name = name;
    get_profile(State(state), CurrentUser(user)).await
}

/// 获取投资组合
///
/// 持仓按当前价格估值，行情不可用时退回最近一次的缓存价格。
#[utoipa::path(
    get,
    path = "/api/v1/user/portfolio",
    tag = "账户 (Account)",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "成功", body = ApiResponse<PortfolioResponse>),
        (status = 404, description = "账户不存在")
    )
)]
pub async fn get_portfolio(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<PortfolioResponse>>, ApiError> {
    let portfolio = state.trade_port.portfolio(&AccountId(user.id)).await?;
    Ok(Json(ApiResponse::ok(portfolio.into())))
}

/// 查询成交记录 (按时间倒序)
#[utoipa::path(
    get,
    path = "/api/v1/user/transactions",
    tag = "账户 (Account)",
    security(("bearer_jwt" = [])),
    params(LimitQuery),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<TransactionResponse>>)
    )
)]
pub async fn get_transactions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTIONS).clamp(1, MAX_TRANSACTIONS);
    let fills = state.accounts.list_fills(&AccountId(user.id), limit).await?;
    Ok(Json(ApiResponse::ok(fills.into_iter().map(Into::into).collect())))
}

/// 查询现金流水 (按时间倒序)
///
/// 每一次余额变化 (成交、冻结、解冻、管理员调整) 都对应一条流水。
#[utoipa::path(
    get,
    path = "/api/v1/user/ledger",
    tag = "账户 (Account)",
    security(("bearer_jwt" = [])),
    params(LimitQuery),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<LedgerEntryResponse>>)
    )
)]
pub async fn get_ledger(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<LedgerEntryResponse>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTIONS).clamp(1, MAX_TRANSACTIONS);
    let entries = state.accounts.list_ledger(&AccountId(user.id), limit).await?;
    Ok(Json(ApiResponse::ok(entries.into_iter().map(Into::into).collect())))
}
