//! # API 服务启动器
//!
//! 组装 axum 路由、挂载 Swagger UI、配置 CORS 并绑定 TCP 端口对外提供服务。
//! 本模块不直接启动 `main()`, 而是由 `crates/app` 组装依赖后调用。

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use bullpen_core::config::AppConfig;
use bullpen_core::market::port::{MarketClock, PricePort};
use bullpen_core::store::port::SystemStore;
use bullpen_core::trade::port::{AccountPort, TradePort};
use bullpen_market::search::SearchService;
use bullpen_trade::leaderboard::LeaderboardService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::auth::{auth_middleware, require_admin};
use crate::routes::{account, admin, auth, leaderboard, market, trade};

// ============================================================
//  共享应用状态
// ============================================================

/// 全局应用状态，通过 axum 的 `State` 提取器注入到每个 Handler 中。
///
/// # Invariants
/// - 所有服务在启动前由 `crates/app` 注入，生命周期与进程等同。
#[derive(Clone)]
pub struct AppState {
    /// 用户、人工价格与审计日志
    pub system_store: Arc<dyn SystemStore>,
    /// 账户资金 (开户、余额调整、成交记录)
    pub accounts: Arc<dyn AccountPort>,
    /// 下单、撤单、组合与挂单队列
    pub trade_port: Arc<dyn TradePort>,
    pub prices: Arc<dyn PricePort>,
    pub market_clock: Arc<dyn MarketClock>,
    pub search: Arc<SearchService>,
    pub leaderboard: Arc<LeaderboardService>,
    pub app_config: Arc<AppConfig>,
}

// ============================================================
//  OpenAPI 文档定义
// ============================================================

/// 全局 OpenAPI 文档结构
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bullpen 模拟炒股 API",
        version = "0.1.0",
        description = "Bullpen 模拟炒股游戏的 RESTful API。提供注册登录、行情查询、下单交易、排行榜与后台管理功能。",
        license(name = "MIT")
    ),
    tags(
        (name = "鉴权 (Auth)", description = "注册、登录与密码修改"),
        (name = "账户 (Account)", description = "个人资料、投资组合与成交记录"),
        (name = "订单交易 (Trade)", description = "下单、撤单与订单历史"),
        (name = "行情 (Market)", description = "股票搜索、报价与开闭市状态"),
        (name = "排行榜 (Leaderboard)", description = "按总资产排名"),
        (name = "系统管理 (Admin)", description = "用户、余额、市场时段、人工价格、挂单队列与审计日志")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// 为 OpenAPI 文档注入全局 Bearer JWT 鉴权方案。
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_jwt",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some(
                        "在此处填入登录或注册接口返回的 JWT Token（无需 'Bearer ' 前缀）",
                    ))
                    .build(),
            ),
        );
    }
}

// ============================================================
//  服务构建与启动
// ============================================================

/// # Summary
/// 构建完整的 axum 应用路由树 (含 Swagger UI)。
///
/// # Logic
/// 1. 公开路由：注册、登录、行情、排行榜。
/// 2. 用户路由：挂载 `auth_middleware`。
/// 3. 管理路由：先经 `auth_middleware` 再经 `require_admin`。
pub fn build_router(state: AppState) -> Router {
    let public_router = OpenApiRouter::new()
        .routes(routes!(auth::register))
        .routes(routes!(auth::login))
        .routes(routes!(market::search_stocks))
        .routes(routes!(market::get_quote))
        .routes(routes!(market::market_status))
        .routes(routes!(leaderboard::get_leaderboard));

    let user_protected_router = OpenApiRouter::new()
        .routes(routes!(auth::change_password))
        .routes(routes!(account::get_profile, account::update_profile))
        .routes(routes!(account::get_portfolio))
        .routes(routes!(account::get_transactions))
        .routes(routes!(account::get_ledger))
        .routes(routes!(trade::get_orders, trade::place_order))
        .routes(routes!(trade::cancel_order))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // layer 的执行顺序与声明相反：auth_middleware 先于 require_admin
    let admin_protected_router = OpenApiRouter::new()
        .routes(routes!(admin::list_users, admin::create_user))
        .routes(routes!(admin::update_role))
        .routes(routes!(admin::update_balance))
        .routes(routes!(admin::get_market))
        .routes(routes!(admin::update_hours))
        .routes(routes!(admin::set_override))
        .routes(routes!(admin::list_prices))
        .routes(routes!(admin::set_price, admin::clear_price))
        .routes(routes!(admin::list_orders))
        .routes(routes!(admin::cancel_order))
        .routes(routes!(admin::process_queue))
        .routes(routes!(admin::list_activity))
        .layer(axum::middleware::from_fn(require_admin))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(public_router)
        .merge(user_protected_router)
        .merge(admin_protected_router)
        .with_state(state)
        .split_for_parts();

    // 前端与 API 分离部署，允许所有来源
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// # Summary
/// 绑定端口并对外提供服务，直到 `shutdown` 完成。
///
/// # Arguments
/// * `state` - 由 `crates/app` 注入的共享状态
/// * `bind_addr` - 监听的地址与端口，如 `"0.0.0.0:8080"`
/// * `shutdown` - 完成时触发优雅停机 (不再接受新连接，等待在途请求结束)
pub async fn start_server<F>(
    state: AppState,
    bind_addr: &str,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("🚀 Bullpen API Server listening on {}", listener.local_addr()?);
    tracing::info!("📖 Swagger UI: http://{}/swagger-ui/", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
