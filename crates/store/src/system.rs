use crate::db::{db_err, ensure_dir, open_pool, parse_decimal, parse_enum};
use async_trait::async_trait;
use bullpen_core::market::entity::{ArtificialPrice, MarketSettings};
use bullpen_core::store::error::StoreError;
use bullpen_core::store::port::{AdminLogEntry, StockMetadata, SystemStore, User, UserRole};
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// 系统数据库文件名
const SYSTEM_DB: &str = "app.db";

/// 市场设置中时间字段的存储格式
const TIME_FORMAT: &str = "%H:%M:%S";

type UserRow = (String, String, String, String, bool, DateTime<Utc>);
type SettingsRow = (String, String, i32, bool, String, DateTime<Utc>);
type ArtificialRow = (String, String, bool, String, DateTime<Utc>);
type AdminLogRow = (i64, String, String, Option<String>, String, DateTime<Utc>);

/// SystemStore 的 SQLite 实现。
///
/// # Summary
/// 在中心化的 SQLite 数据库 (`app.db`) 中管理全局系统数据：
/// 用户、股票元数据、市场设置、人工价格与管理员审计日志。
///
/// # Invariants
/// * 数据库结构在存储实例创建时初始化。
/// * 所有操作均通过共享的 `SqlitePool` 执行。
/// * `market_settings` 表至多一行 (id = 1)。
pub struct SqliteSystemStore {
    pool: SqlitePool,
}

impl SqliteSystemStore {
    /// 创建新的 SqliteSystemStore 并初始化全局表结构。
    ///
    /// # Logic
    /// 1. 确保数据根目录存在。
    /// 2. 以 WAL 模式打开 `<root>/app.db`。
    /// 3. 执行 DDL 初始化系统表结构。
    ///
    /// # Arguments
    /// * `root` - 数据根目录。
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - 存储实例或初始化错误。
    pub async fn new(root: &Path) -> Result<Self, StoreError> {
        ensure_dir(root)?;
        let db_path = root.join(SYSTEM_DB);
        let pool = open_pool(&db_path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                force_password_change INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stock_metadata (
                symbol TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                exchange TEXT NOT NULL,
                sector TEXT,
                currency TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS market_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                open_time TEXT NOT NULL,
                close_time TEXT NOT NULL,
                utc_offset_minutes INTEGER NOT NULL,
                weekdays_only INTEGER NOT NULL,
                override_mode TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS artificial_prices (
                symbol TEXT PRIMARY KEY,
                price TEXT NOT NULL,
                active INTEGER NOT NULL,
                set_by TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS admin_activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                admin_id TEXT NOT NULL,
                action TEXT NOT NULL,
                target TEXT,
                details TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_admin_log_admin ON admin_activity_log (admin_id, id);
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        info!("System store ready at {}", db_path.display());
        Ok(Self { pool })
    }

    /// 共享连接池，供同库的订单仓储复用
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }
}

fn user_from_row(r: UserRow) -> Result<User, StoreError> {
    Ok(User {
        id: r.0,
        name: r.1,
        password_hash: r.2,
        role: parse_enum(&r.3)?,
        force_password_change: r.4,
        created_at: r.5,
    })
}

/// 单行 UPDATE 未命中时视为用户不存在
fn affected_one(rows: u64, id: &str) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::NotFound(format!("user {}", id)));
    }
    Ok(())
}

fn parse_time(raw: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .map_err(|e| StoreError::Corrupted(format!("time {:?}: {}", raw, e)))
}

fn artificial_from_row(r: ArtificialRow) -> Result<ArtificialPrice, StoreError> {
    Ok(ArtificialPrice {
        price: parse_decimal(&r.1, "artificial_prices.price")?,
        symbol: r.0,
        active: r.2,
        set_by: r.3,
        updated_at: r.4,
    })
}

#[async_trait]
impl SystemStore for SqliteSystemStore {
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, name, password_hash, role, force_password_change, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(user_from_row)
        .transpose()
    }

    /// # Summary
    /// 插入新用户。
    ///
    /// # Logic
    /// 依赖主键唯一约束判重，冲突时返回 `StoreError::Conflict`，
    /// 并发注册同名用户时只有一个会成功。
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (id, name, password_hash, role, force_password_change, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.force_password_change)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict(format!("user {} already exists", user.id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn update_user_name(&self, id: &str, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        affected_one(result.rows_affected(), id)
    }

    async fn update_password(&self, id: &str, password_hash: &str, force_change: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET password_hash = ?, force_password_change = ? WHERE id = ?")
            .bind(password_hash)
            .bind(force_change)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        affected_one(result.rows_affected(), id)
    }

    async fn update_user_role(&self, id: &str, role: UserRole) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        affected_one(result.rows_affected(), id)
    }

    async fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, name, password_hash, role, force_password_change, created_at FROM users ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(user_from_row)
        .collect()
    }

    /// # Summary
    /// 根据代码或名称搜索股票。
    ///
    /// # Logic
    /// 对 `stock_metadata` 表进行 LIKE 模糊匹配，
    /// 排序优先级：代码完全匹配 → 代码前缀匹配 → 其余按代码字母序。
    async fn search_stocks(&self, query: &str, limit: usize) -> Result<Vec<StockMetadata>, StoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let contains = format!("%{}%", escaped);
        let prefix = format!("{}%", escaped);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let records = sqlx::query_as::<_, (String, String, String, Option<String>, String)>(
            r#"
            SELECT symbol, name, exchange, sector, currency FROM stock_metadata
            WHERE symbol LIKE ?1 ESCAPE '\' OR name LIKE ?1 ESCAPE '\'
            ORDER BY
                CASE WHEN symbol = ?2 THEN 0 WHEN symbol LIKE ?3 ESCAPE '\' THEN 1 ELSE 2 END,
                symbol
            LIMIT ?4
            "#,
        )
        .bind(&contains)
        .bind(query.to_uppercase())
        .bind(&prefix)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(|r| StockMetadata {
            symbol: r.0,
            name: r.1,
            exchange: r.2,
            sector: r.3,
            currency: r.4,
        })
        .collect();

        Ok(records)
    }

    async fn save_stock_metadata(&self, metadata: &StockMetadata) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO stock_metadata (symbol, name, exchange, sector, currency) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&metadata.symbol)
        .bind(&metadata.name)
        .bind(&metadata.exchange)
        .bind(&metadata.sector)
        .bind(&metadata.currency)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_market_settings(&self) -> Result<Option<MarketSettings>, StoreError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT open_time, close_time, utc_offset_minutes, weekdays_only, override_mode, updated_at FROM market_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(r) = row else {
            return Ok(None);
        };
        Ok(Some(MarketSettings {
            open_time: parse_time(&r.0)?,
            close_time: parse_time(&r.1)?,
            utc_offset_minutes: r.2,
            weekdays_only: r.3,
            override_mode: parse_enum(&r.4)?,
            updated_at: r.5,
        }))
    }

    async fn save_market_settings(&self, settings: &MarketSettings) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO market_settings
                (id, open_time, close_time, utc_offset_minutes, weekdays_only, override_mode, updated_at)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(settings.open_time.format(TIME_FORMAT).to_string())
        .bind(settings.close_time.format(TIME_FORMAT).to_string())
        .bind(settings.utc_offset_minutes)
        .bind(settings.weekdays_only)
        .bind(settings.override_mode.to_string())
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_artificial_price(&self, symbol: &str) -> Result<Option<ArtificialPrice>, StoreError> {
        sqlx::query_as::<_, ArtificialRow>(
            "SELECT symbol, price, active, set_by, updated_at FROM artificial_prices WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(artificial_from_row)
        .transpose()
    }

    async fn list_artificial_prices(&self) -> Result<Vec<ArtificialPrice>, StoreError> {
        sqlx::query_as::<_, ArtificialRow>(
            "SELECT symbol, price, active, set_by, updated_at FROM artificial_prices ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(artificial_from_row)
        .collect()
    }

    async fn save_artificial_price(&self, price: &ArtificialPrice) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO artificial_prices (symbol, price, active, set_by, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&price.symbol)
        .bind(price.price.to_string())
        .bind(price.active)
        .bind(&price.set_by)
        .bind(price.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn deactivate_artificial_price(&self, symbol: &str, by: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE artificial_prices SET active = 0, set_by = ?, updated_at = ? WHERE symbol = ?",
        )
        .bind(by)
        .bind(Utc::now())
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_admin_log(&self, entry: &AdminLogEntry) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO admin_activity_log (admin_id, action, target, details, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.admin_id)
        .bind(entry.action.to_string())
        .bind(&entry.target)
        .bind(entry.details.to_string())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn list_admin_logs(
        &self,
        admin_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdminLogEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(0);

        let rows = sqlx::query_as::<_, AdminLogRow>(
            r#"
            SELECT id, admin_id, action, target, details, created_at FROM admin_activity_log
            WHERE ?1 IS NULL OR admin_id = ?1
            ORDER BY id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(admin_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                let details = serde_json::from_str(&r.4)
                    .map_err(|e| StoreError::Corrupted(format!("admin log {} details: {}", r.0, e)))?;
                Ok(AdminLogEntry {
                    id: r.0,
                    admin_id: r.1,
                    action: parse_enum(&r.2)?,
                    target: r.3,
                    details,
                    created_at: r.5,
                })
            })
            .collect()
    }
}
