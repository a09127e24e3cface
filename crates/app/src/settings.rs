//! # 配置加载
//!
//! 按 `内置默认值 → 配置文件 → 环境变量` 的顺序叠加，后者覆盖前者。
//! 环境变量形如 `BULLPEN__SERVER__PORT=9000`、`BULLPEN__GAME__COMMISSION_RATE=0.001`。

use std::path::{Path, PathBuf};

use bullpen_core::config::AppConfig;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "BULLPEN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/bullpen.toml";
const ENV_PREFIX: &str = "BULLPEN";

/// 配置文件路径，未设置 `BULLPEN_CONFIG` 时使用 `config/bullpen.toml`
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// # Summary
/// 加载并校验应用配置。
///
/// # Logic
/// 1. 以 `AppConfig::default()` 为底。
/// 2. 叠加配置文件 (不存在时跳过)。
/// 3. 叠加 `BULLPEN__` 前缀的环境变量。
/// 4. 校验游戏参数与密钥。
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(Config::try_from(&AppConfig::default())?)
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app: AppConfig = config.try_deserialize()?;
    validate(&app)?;
    Ok(app)
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::Message(msg.to_string()));

    if config.server.jwt_secret.trim().is_empty() {
        return invalid("server.jwt_secret must not be empty");
    }
    if !(4..=31).contains(&config.server.bcrypt_cost) {
        return invalid("server.bcrypt_cost must be between 4 and 31");
    }
    if config.server.token_ttl_secs == 0 {
        return invalid("server.token_ttl_secs must be positive");
    }
    if config.game.initial_balance.is_sign_negative() {
        return invalid("game.initial_balance must not be negative");
    }
    if config.game.commission_rate.is_sign_negative() || config.game.commission_rate >= Decimal::ONE {
        return invalid("game.commission_rate must be in [0, 1)");
    }
    if config.game.queue_poll_secs == 0 {
        return invalid("game.queue_poll_secs must be positive");
    }
    if config.admin.username.trim().is_empty() || config.admin.password.is_empty() {
        return invalid("admin.username and admin.password must be set");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.game.initial_balance, dec!(100000));
        assert_eq!(config.admin.username, "admin");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bullpen.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090
jwt_secret = "from-file"

[game]
initial_balance = "25000"
commission_rate = "0.001"

[logging]
level = "debug"
log_dir = "logs"
"#
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.jwt_secret, "from-file");
        assert_eq!(config.server.host, "0.0.0.0", "未覆盖的字段保持默认值");
        assert_eq!(config.game.initial_balance, dec!(25000));
        assert_eq!(config.game.commission_rate, dec!(0.001));
        assert_eq!(config.logging.log_dir.as_deref(), Some("logs"));
    }

    #[test]
    fn test_invalid_commission_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bullpen.toml");
        std::fs::write(&path, "[game]\ncommission_rate = \"1.5\"\n").unwrap();
        assert!(load(&path).is_err());
    }
}
