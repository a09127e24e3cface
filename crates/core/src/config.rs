use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub game: GameConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// JWT 有效期 (秒)
    pub token_ttl_secs: u64,
    /// bcrypt 哈希成本因子
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

/// # Summary
/// 游戏规则相关配置。
///
/// # Invariants
/// - `initial_balance` 与 `commission_rate` 必须非负。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// 新用户注册时发放的虚拟资金
    pub initial_balance: Decimal,
    /// 成交佣金比例 (按成交额计算)
    pub commission_rate: Decimal,
    /// 实时报价缓存有效期 (秒)
    pub quote_ttl_secs: u64,
    /// 挂单队列轮询间隔 (秒)
    pub queue_poll_secs: u64,
    /// 排行榜缓存有效期 (秒)
    pub leaderboard_ttl_secs: u64,
}

/// 启动时自动创建的管理员账号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 默认日志过滤级别，可被 `RUST_LOG` 覆盖
    pub level: String,
    /// 滚动日志目录，为空时只输出到 stderr
    pub log_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                jwt_secret: "CHANGE_ME_JWT_SECRET".to_string(), // 仅用于开发环境，部署时必须覆盖
                token_ttl_secs: 86400 * 7,
                bcrypt_cost: 12,
            },
            database: DatabaseConfig {
                data_dir: "data".to_string(),
            },
            game: GameConfig {
                initial_balance: Decimal::new(100_000, 0),
                commission_rate: Decimal::ZERO,
                quote_ttl_secs: 60,
                queue_poll_secs: 30,
                leaderboard_ttl_secs: 30,
            },
            admin: AdminConfig {
                username: "admin".to_string(),
                password: "admin".to_string(),
                name: "Administrator".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_dir: None,
            },
        }
    }
}
