use axum::Json;
use axum::extract::{Query, State};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ApiResponse, LeaderboardEntryResponse, LeaderboardQuery};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// 排行榜
///
/// 按总资产 (现金 + 持仓市值) 降序排列，结果会被短暂缓存。
#[utoipa::path(
    get,
    path = "/api/v1/leaderboard",
    tag = "排行榜 (Leaderboard)",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "成功", body = ApiResponse<Vec<LeaderboardEntryResponse>>)
    )
)]
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<Vec<LeaderboardEntryResponse>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let ranking = state.leaderboard.leaderboard(limit).await?;
    Ok(Json(ApiResponse::ok(ranking.into_iter().map(Into::into).collect())))
}
