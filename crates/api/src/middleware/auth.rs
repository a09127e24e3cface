//! # 鉴权中间件
//!
//! 提供基于 JWT 的身份验证与细粒度角色控制（RBAC）。

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use bullpen_core::store::port::{User, UserRole};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::Claims;

/// 强制改密码期间唯一允许访问的路径
pub const CHANGE_PASSWORD_PATH: &str = "/api/v1/auth/change_password";

/// 提取并验证 Authorization: Bearer <token>
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match req.headers().get(axum::http::header::AUTHORIZATION) {
        Some(header_val) => {
            let s = header_val
                .to_str()
                .map_err(|_| ApiError::Unauthorized("Invalid auth header".into()))?;
            match s.strip_prefix("Bearer ") {
                Some(token) => token.trim().to_string(),
                None => {
                    tracing::warn!("Invalid Bearer format");
                    return Err(ApiError::Unauthorized("Invalid Bearer format".into()));
                }
            }
        }
        None => {
            return Err(ApiError::Unauthorized("Missing Authorization header".into()));
        }
    };

    let claims = match verify_jwt(&token, &state.app_config.server.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("JWT verification failed: {}", e);
            return Err(e);
        }
    };

    // 角色与改密状态以库中最新数据为准，而不是 Token 中的快照
    let user = state
        .system_store
        .get_user(&claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    if user.force_password_change && req.uri().path() != CHANGE_PASSWORD_PATH {
        return Err(ApiError::Forbidden(
            "You must change your password before using the API".into(),
        ));
    }

    req.extensions_mut().insert(user);
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Admin 级别权限校验中间件
/// 必须在 `auth_middleware` 之后应用！
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let user = req
        .extensions()
        .get::<User>()
        .ok_or_else(|| ApiError::Unauthorized("User context not found".into()))?;

    if user.role != UserRole::Admin {
        tracing::warn!("User {} denied admin access to {}", user.id, req.uri().path());
        return Err(ApiError::Forbidden("Admin privileges required".into()));
    }

    Ok(next.run(req).await)
}

/// # Summary
/// 为用户签发 JWT。
///
/// # Returns
/// `(token, 有效期秒数)`
pub fn issue_jwt(user: &User, secret: &str, ttl_secs: u64) -> Result<(String, u64), ApiError> {
    let iat = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
    let claims = Claims {
        sub: user.id.clone(),
        role: user.role.to_string(),
        iat,
        exp: iat.saturating_add(ttl_secs),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("Failed to generate token: {}", e)))?;
    Ok((token, ttl_secs))
}

/// 验证 JWT 返回强类型 Claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::default();
    validation.set_required_spec_claims(&["exp", "sub"]);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

    Ok(token_data.claims)
}

/// 在提取器中获取当前用户的快捷方式
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<User>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Missing User Context".into()))?;
        Ok(CurrentUser(user))
    }
}
