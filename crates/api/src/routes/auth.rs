//! # 身份验证路由控制器
//!
//! 实现注册、登录、密码修改等鉴权相关接口。

use axum::Json;
use axum::extract::State;
use bullpen_core::store::port::{User, UserRole};
use bullpen_core::trade::entity::AccountId;
use bullpen_core::trade::port::TradeError;
use chrono::Utc;

use crate::error::ApiError;
use crate::middleware::auth::{CurrentUser, issue_jwt};
use crate::server::AppState;
use crate::types::{ApiResponse, ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest, UserResponse};

/// 密码最短长度
pub const MIN_PASSWORD_LEN: usize = 6;
/// 显示名称最大长度
pub const MAX_NAME_LEN: usize = 64;

/// # Summary
/// 校验登录名。
///
/// # Logic
/// 3-32 位，只允许字母、数字与 `_`、`.`、`-`，且必须以字母或数字开头。
/// 登录名同时用作账户文件名，因此规则比账户存储层更严格。
pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    let starts_ok = username.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let chars_ok = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !(3..=32).contains(&len) || !starts_ok || !chars_ok {
        return Err(ApiError::BadRequest(
            "Username must be 3-32 characters of letters, digits, '_', '.' or '-'".into(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// 规整显示名称，空白时返回 `None`
pub fn normalize_name(name: &str) -> Result<Option<String>, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "Name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(Some(name.to_string()))
}

/// bcrypt 哈希 (在阻塞线程池中执行)
pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(format!("Hash task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
}

/// bcrypt 校验，摘要损坏时视为不匹配
pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| ApiError::Internal(format!("Verify task failed: {}", e)))
}

/// # Summary
/// 创建用户并为其开户。
///
/// # Logic
/// 1. 写入用户记录，重名返回 409。
/// 2. 按配置的初始资金开户；账户文件已存在 (例如历史残留) 时沿用原账户。
/// 3. 开户失败时删除刚写入的用户记录，用户名可重新注册。
pub async fn create_user_with_account(state: &AppState, user: &User) -> Result<(), ApiError> {
    state.system_store.create_user(user).await?;

    let account = AccountId(user.id.clone());
    match state
        .accounts
        .open_account(&account, state.app_config.game.initial_balance)
        .await
    {
        Ok(()) => Ok(()),
        Err(TradeError::AccountExists(_)) => {
            tracing::warn!("Account for new user {} already existed, reusing it", user.id);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Failed to open account for {}: {}", user.id, e);
            if let Err(del_err) = state.system_store.delete_user(&user.id).await {
                tracing::error!("Failed to roll back user {}: {}", user.id, del_err);
            }
            Err(e.into())
        }
    }
}

fn login_response(state: &AppState, user: &User) -> Result<LoginResponse, ApiError> {
    let (token, expires_in) = issue_jwt(
        user,
        &state.app_config.server.jwt_secret,
        state.app_config.server.token_ttl_secs,
    )?;
    Ok(LoginResponse {
        token,
        expires_in,
        user: UserResponse::from(user),
    })
}

/// 注册
///
/// 创建普通用户并发放初始资金，成功后直接返回登录 Token。
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "鉴权 (Auth)",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "注册成功", body = ApiResponse<LoginResponse>),
        (status = 400, description = "用户名或密码不合法"),
        (status = 409, description = "用户名已被占用")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let username = req.username.trim().to_string();
    validate_username(&username)?;
    validate_password(&req.password)?;
    let name = match req.name.as_deref() {
        Some(raw) => normalize_name(raw)?,
        None => None,
    }
    .unwrap_or_else(|| username.clone());

    let password_hash = hash_password(req.password, state.app_config.server.bcrypt_cost).await?;
    let user = User {
        id: username,
        name,
        password_hash,
        role: UserRole::Standard,
        force_password_change: false,
        created_at: Utc::now(),
    };
    create_user_with_account(&state, &user).await?;
    tracing::info!("User {} registered", user.id);

    Ok(Json(ApiResponse::ok(login_response(&state, &user)?)))
}

/// 用户登录
///
/// 验证用户名和密码，颁发 JWT Token。
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "鉴权 (Auth)",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "登录成功", body = ApiResponse<LoginResponse>),
        (status = 401, description = "用户名或密码错误")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let user = state
        .system_store
        .get_user(req.username.trim())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid username or password".into()))?;

    if !verify_password(req.password, user.password_hash.clone()).await? {
        tracing::warn!("Failed login for user {}", user.id);
        return Err(ApiError::Unauthorized("Invalid username or password".into()));
    }

    Ok(Json(ApiResponse::ok(login_response(&state, &user)?)))
}

/// 修改密码
///
/// 验证旧密码并设立新密码。如果用户标记为强制修改密码，此操作会解除该状态。
#[utoipa::path(
    post,
    path = "/api/v1/auth/change_password",
    tag = "鉴权 (Auth)",
    security(("bearer_jwt" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "密码修改成功", body = ApiResponse<String>),
        (status = 400, description = "新密码不合法"),
        (status = 401, description = "原密码错误或未认证")
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    if !verify_password(req.old_password, user.password_hash.clone()).await? {
        tracing::warn!("Failed old password validation for user {}", user.id);
        return Err(ApiError::Unauthorized("Invalid old password".into()));
    }
    validate_password(&req.new_password)?;

    let password_hash = hash_password(req.new_password, state.app_config.server.bcrypt_cost).await?;
    state
        .system_store
        .update_password(&user.id, &password_hash, false)
        .await?;
    tracing::info!("Password changed for user {}", user.id);

    Ok(Json(ApiResponse::ok("Password changed successfully".into())))
}
