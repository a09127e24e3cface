use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bullpen_api::server::{AppState, start_server};
use bullpen_cache::mem::MemCache;
use bullpen_core::common::time::{RealTimeProvider, TimeProvider};
use bullpen_core::config::AppConfig;
use bullpen_feed::yahoo::YahooProvider;
use bullpen_market::clock::MarketService;
use bullpen_market::price::PriceService;
use bullpen_market::search::SearchService;
use bullpen_store::account::SqliteAccountStore;
use bullpen_store::pending_order::SqliteOrderStore;
use bullpen_store::system::SqliteSystemStore;
use bullpen_trade::leaderboard::LeaderboardService;
use bullpen_trade::matcher::LocalMatchEngine;
use bullpen_trade::queue::QueueWorker;
use bullpen_trade::service::TradeService;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod bootstrap;
mod logging;
mod settings;

const CACHE_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 `Arc<dyn Trait>` 注入到 API 层。
///
/// # Logic
/// 1. 加载配置并初始化日志。
/// 2. 实例化基础设施层 (Store、Feed、Cache)。
/// 3. 实例化领域服务层 (价格链、市场时钟、交易、排行榜)。
/// 4. 确保管理员账号存在。
/// 5. 启动挂单队列轮询与 HTTP 服务，收到 Ctrl-C 后依次停机。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let config_path = settings::config_path();
    let config = Arc::new(settings::load(&config_path)?);
    let _log_guard = logging::init_tracing(&config.logging)?;
    info!("Bullpen starting (config: {})", config_path.display());
    if config.server.jwt_secret == AppConfig::default().server.jwt_secret {
        warn!("Using the built-in JWT secret; set BULLPEN__SERVER__JWT_SECRET before deploying");
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    // 2. 基础设施层
    let data_dir = PathBuf::from(&config.database.data_dir);
    let system = Arc::new(SqliteSystemStore::new(&data_dir).await?);
    let accounts = Arc::new(SqliteAccountStore::new(&data_dir)?);
    let orders = Arc::new(SqliteOrderStore::new(system.pool()).await?);
    let feed = Arc::new(YahooProvider::new()?);
    let cache = Arc::new(MemCache::new());
    let janitor = cache.spawn_janitor(CACHE_JANITOR_INTERVAL);
    let time: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);
    info!("Data directory: {}", data_dir.display());

    // 3. 领域服务层
    let prices = Arc::new(PriceService::new(
        system.clone(),
        feed.clone(),
        cache.clone(),
        time.clone(),
        Duration::from_secs(config.game.quote_ttl_secs),
    ));
    let market = Arc::new(MarketService::new(system.clone(), time.clone()));
    let search = Arc::new(SearchService::new(system.clone(), feed));
    let trade = Arc::new(TradeService::new(
        accounts.clone(),
        orders,
        Arc::new(LocalMatchEngine::new(config.game.commission_rate)),
        prices.clone(),
        market.clone(),
        time,
    ));
    let leaderboard = Arc::new(LeaderboardService::new(
        system.clone(),
        trade.clone(),
        cache,
        Duration::from_secs(config.game.leaderboard_ttl_secs),
        config.game.initial_balance,
    ));

    // 4. 管理员账号
    bootstrap::ensure_admin(
        system.as_ref(),
        accounts.as_ref(),
        &config.admin,
        config.server.bcrypt_cost,
        config.game.initial_balance,
    )
    .await?;

    // 5. 后台任务与 HTTP 服务
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = QueueWorker::new(
        trade.clone(),
        market.clone(),
        Duration::from_secs(config.game.queue_poll_secs),
    )
    .spawn(shutdown_rx);

    let state = AppState {
        system_store: system,
        accounts,
        trade_port: trade,
        prices,
        market_clock: market,
        search,
        leaderboard,
        app_config: config.clone(),
    };
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    start_server(state, &bind_addr, shutdown_signal()).await?;

    if shutdown_tx.send(true).is_err() {
        warn!("Queue worker already stopped");
    }
    if let Err(e) = worker.await {
        error!("Queue worker terminated abnormally: {}", e);
    }
    janitor.abort();

    info!("Bullpen stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
