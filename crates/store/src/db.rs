use bullpen_core::store::error::StoreError;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// 写锁冲突时的等待上限
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// # Summary
/// 打开 (必要时创建) 一个 SQLite 文件库。
///
/// # Logic
/// 1. 开启 WAL 与 `synchronous = NORMAL`，读写互不阻塞。
/// 2. 单连接池，库内写入天然串行。
///
/// # Arguments
/// * `path`: 数据库文件路径，父目录必须已存在。
pub async fn open_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::InitError(format!("{}: {}", path.display(), e)))
}

/// 确保目录存在
pub fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(path)
        .map_err(|e| StoreError::InitError(format!("Failed to create {}: {}", path.display(), e)))
}

/// 将 sqlx 错误映射为存储错误
pub fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// # Summary
/// 解析以 TEXT 存储的 Decimal 字段。
///
/// # Returns
/// 库中数据非法时返回 `StoreError::Corrupted`，不静默归零。
pub fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|e| StoreError::Corrupted(format!("{} = {:?}: {}", field, raw, e)))
}

/// 解析以 TEXT 存储的枚举字段
pub fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(StoreError::Corrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("123.45", "price").unwrap(), dec!(123.45));
        assert!(matches!(
            parse_decimal("abc", "price"),
            Err(StoreError::Corrupted(_))
        ));
    }
}
