use crate::db::{db_err, ensure_dir, open_pool, parse_decimal, parse_enum};
use async_trait::async_trait;
use bullpen_core::store::error::StoreError;
use bullpen_core::trade::entity::{
    AccountId, AccountSnapshot, Fill, LedgerEntry, OrderId, OrderSide, Position,
};
use bullpen_core::trade::port::{AccountPort, TradeError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 账户库中唯一的资金槽位
const MAIN_SLOT: &str = "MAIN";

type PositionRow = (String, i64, String, String, DateTime<Utc>);
type FillRow = (String, String, String, String, String, i64, DateTime<Utc>);
type LedgerRow = (i64, String, String, String, String, Option<String>, DateTime<Utc>);

/// # Summary
/// 账户资金与持仓的 SQLite 分片实现。
/// 通过一户一库 (`account_<id>.db`) 避免 SQLite 全库写锁成为多用户并发的瓶颈。
///
/// # Invariants
/// - 每个账户库只有一个连接，库内事务天然串行。
/// - 账户库只由 `open_account` 创建，访问不存在的账户返回 `AccountNotFound`。
/// - 每次资金变动都在同一事务中写入 `cash_ledger`。
pub struct SqliteAccountStore {
    base_path: PathBuf,
    pools: DashMap<String, SqlitePool>,
    // 串行化开户，避免同一账户被并发初始化
    open_lock: Mutex<()>,
}

impl SqliteAccountStore {
    /// # Arguments
    /// * `root` - 数据根目录，账户库位于 `<root>/accounts/` 下。
    pub fn new(root: &Path) -> Result<Self, StoreError> {
        let base_path = root.join("accounts");
        ensure_dir(&base_path)?;
        Ok(Self {
            base_path,
            pools: DashMap::new(),
            open_lock: Mutex::new(()),
        })
    }

    /// # Logic
    /// 账户 ID 直接参与文件名，只接受字母、数字、`_`、`-` 与 `.`，且不能以 `.` 开头。
    fn db_path(&self, account_id: &AccountId) -> Result<PathBuf, TradeError> {
        let id = account_id.0.as_str();
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(TradeError::AccountNotFound(id.to_string()));
        }
        Ok(self.base_path.join(format!("account_{}.db", id)))
    }

    /// 获取已开户账户的连接池
    async fn pool(&self, account_id: &AccountId) -> Result<SqlitePool, TradeError> {
        if let Some(pool) = self.pools.get(&account_id.0) {
            return Ok(pool.value().clone());
        }

        let path = self.db_path(account_id)?;
        if !path.exists() {
            return Err(TradeError::AccountNotFound(account_id.0.clone()));
        }
        let pool = open_pool(&path).await?;
        init_schema(&pool).await?;
        Ok(self
            .pools
            .entry(account_id.0.clone())
            .or_insert(pool)
            .value()
            .clone())
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS asset_status (
            id TEXT PRIMARY KEY,
            available_balance TEXT NOT NULL,
            reserved_balance TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS positions (
            symbol TEXT PRIMARY KEY,
            shares INTEGER NOT NULL,
            average_cost TEXT NOT NULL,
            last_price TEXT NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            price TEXT NOT NULL,
            shares INTEGER NOT NULL,
            commission TEXT NOT NULL,
            executed_at DATETIME NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cash_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            available_change TEXT NOT NULL,
            reserved_change TEXT NOT NULL,
            balance_after TEXT NOT NULL,
            memo TEXT,
            created_at DATETIME NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// 读取 (可用, 冻结) 资金
async fn read_balances(conn: &mut SqliteConnection) -> Result<(Decimal, Decimal), TradeError> {
    let row: (String, String) = sqlx::query_as(
        "SELECT available_balance, reserved_balance FROM asset_status WHERE id = ?",
    )
    .bind(MAIN_SLOT)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok((
        parse_decimal(&row.0, "available_balance")?,
        parse_decimal(&row.1, "reserved_balance")?,
    ))
}

async fn write_balances(
    conn: &mut SqliteConnection,
    available: Decimal,
    reserved: Decimal,
    now: DateTime<Utc>,
) -> Result<(), TradeError> {
    if available.is_sign_negative() || reserved.is_sign_negative() {
        return Err(TradeError::InternalError(format!(
            "balance would become negative: available={}, reserved={}",
            available, reserved
        )));
    }
    sqlx::query(
        "UPDATE asset_status SET available_balance = ?, reserved_balance = ?, updated_at = ? WHERE id = ?",
    )
    .bind(available.to_string())
    .bind(reserved.to_string())
    .bind(now)
    .bind(MAIN_SLOT)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

struct LedgerLine<'a> {
    action: &'a str,
    available_change: Decimal,
    reserved_change: Decimal,
    balance_after: Decimal,
    memo: Option<&'a str>,
}

async fn append_ledger(
    conn: &mut SqliteConnection,
    line: LedgerLine<'_>,
    now: DateTime<Utc>,
) -> Result<(), TradeError> {
    sqlx::query(
        "INSERT INTO cash_ledger (action, available_change, reserved_change, balance_after, memo, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(line.action)
    .bind(line.available_change.to_string())
    .bind(line.reserved_change.to_string())
    .bind(line.balance_after.to_string())
    .bind(line.memo)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

fn position_from_row(r: PositionRow) -> Result<Position, StoreError> {
    Ok(Position {
        average_cost: parse_decimal(&r.2, "positions.average_cost")?,
        last_price: parse_decimal(&r.3, "positions.last_price")?,
        symbol: r.0,
        shares: r.1,
        updated_at: r.4,
    })
}

#[async_trait]
impl AccountPort for SqliteAccountStore {
    /// # Summary
    /// 创建账户库并注入初始资金。
    ///
    /// # Logic
    /// 1. 持有开户锁，检查库文件中是否已有资金槽位。
    /// 2. 建表，插入 MAIN 槽位并写入开户流水。
    async fn open_account(&self, account_id: &AccountId, initial_balance: Decimal) -> Result<(), TradeError> {
        if initial_balance.is_sign_negative() {
            return Err(TradeError::InvalidAmount(initial_balance.to_string()));
        }
        let _guard = self.open_lock.lock().await;

        let path = self.db_path(account_id)?;
        let cached = self.pools.get(&account_id.0).map(|p| p.value().clone());
        let pool = match cached {
            Some(pool) => pool,
            None => open_pool(&path).await?,
        };
        init_schema(&pool).await?;

        let now = Utc::now();
        let mut tx = pool.begin().await.map_err(db_err)?;
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM asset_status WHERE id = ?")
            .bind(MAIN_SLOT)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if exists.is_some() {
            return Err(TradeError::AccountExists(account_id.0.clone()));
        }

        sqlx::query(
            "INSERT INTO asset_status (id, available_balance, reserved_balance, updated_at) VALUES (?, ?, '0', ?)",
        )
        .bind(MAIN_SLOT)
        .bind(initial_balance.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        append_ledger(
            &mut tx,
            LedgerLine {
                action: "Open",
                available_change: initial_balance,
                reserved_change: Decimal::ZERO,
                balance_after: initial_balance,
                memo: Some("initial balance"),
            },
            now,
        )
        .await?;
        tx.commit().await.map_err(db_err)?;

        self.pools.insert(account_id.0.clone(), pool);
        info!("Opened account {} with balance {}", account_id, initial_balance);
        Ok(())
    }

    async fn snapshot(&self, account_id: &AccountId) -> Result<AccountSnapshot, TradeError> {
        let pool = self.pool(account_id).await?;
        let mut conn = pool.acquire().await.map_err(db_err)?;

        let (available_balance, reserved_balance) = read_balances(&mut conn).await?;
        let positions = sqlx::query_as::<_, PositionRow>(
            "SELECT symbol, shares, average_cost, last_price, updated_at FROM positions WHERE shares > 0 ORDER BY symbol",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(position_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(AccountSnapshot {
            account_id: account_id.clone(),
            available_balance,
            reserved_balance,
            positions,
        })
    }

    async fn freeze_funds(&self, account_id: &AccountId, amount: Decimal) -> Result<(), TradeError> {
        if amount <= Decimal::ZERO {
            return Err(TradeError::InvalidAmount(amount.to_string()));
        }
        let pool = self.pool(account_id).await?;
        let mut tx = pool.begin().await.map_err(db_err)?;

        let (available, reserved) = read_balances(&mut tx).await?;
        if available < amount {
            return Err(TradeError::InsufficientFunds {
                required: amount,
                actual: available,
            });
        }

        let now = Utc::now();
        let available = available - amount;
        write_balances(&mut tx, available, reserved + amount, now).await?;
        append_ledger(
            &mut tx,
            LedgerLine {
                action: "Freeze",
                available_change: -amount,
                reserved_change: amount,
                balance_after: available,
                memo: None,
            },
            now,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn unfreeze_funds(&self, account_id: &AccountId, amount: Decimal) -> Result<(), TradeError> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let pool = self.pool(account_id).await?;
        let mut tx = pool.begin().await.map_err(db_err)?;

        let (available, reserved) = read_balances(&mut tx).await?;
        let released = if amount > reserved {
            warn!(
                "Account {} unfreeze mismatch: requested {} but only {} reserved",
                account_id, amount, reserved
            );
            reserved
        } else {
            amount
        };

        let now = Utc::now();
        let available = available + released;
        write_balances(&mut tx, available, reserved - released, now).await?;
        append_ledger(
            &mut tx,
            LedgerLine {
                action: "Unfreeze",
                available_change: released,
                reserved_change: -released,
                balance_after: available,
                memo: None,
            },
            now,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// # Summary
    /// 结算一笔成交。
    ///
    /// # Logic
    /// 1. 买入：先释放该订单冻结的资金，再从可用余额扣除成交额与佣金。
    /// 2. 卖出：校验持仓，按成交额减佣金入账。
    /// 3. 更新持仓 (买入按加权平均更新成本，清仓后删除记录)。
    /// 4. 写入成交记录与现金流水。
    async fn apply_fill(&self, account_id: &AccountId, fill: &Fill, reserved: Decimal) -> Result<(), TradeError> {
        if fill.shares <= 0 || fill.price <= Decimal::ZERO {
            return Err(TradeError::InvalidOrder(format!(
                "fill {} has shares={} price={}",
                fill.order_id, fill.shares, fill.price
            )));
        }
        let pool = self.pool(account_id).await?;
        let mut tx = pool.begin().await.map_err(db_err)?;

        let (available, reserved_balance) = read_balances(&mut tx).await?;
        let existing = sqlx::query_as::<_, PositionRow>(
            "SELECT symbol, shares, average_cost, last_price, updated_at FROM positions WHERE symbol = ?",
        )
        .bind(&fill.symbol)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .map(position_from_row)
        .transpose()?;

        let now = fill.executed_at;
        let gross = fill.gross_amount();
        let (new_available, new_reserved) = match fill.side {
            OrderSide::Buy => {
                let released = reserved.max(Decimal::ZERO).min(reserved_balance);
                if released < reserved {
                    warn!(
                        "Account {} fill {} expected {} reserved but only {} present",
                        account_id, fill.order_id, reserved, reserved_balance
                    );
                }
                let spendable = available + released;
                let cost = gross + fill.commission;
                if spendable < cost {
                    return Err(TradeError::InsufficientFunds {
                        required: cost,
                        actual: spendable,
                    });
                }
                (spendable - cost, reserved_balance - released)
            }
            OrderSide::Sell => {
                let held = existing.as_ref().map_or(0, |p| p.shares);
                if held < fill.shares {
                    return Err(TradeError::InsufficientShares {
                        required: fill.shares,
                        available: held,
                    });
                }
                let proceeds = fill.cash_delta();
                if available + proceeds < Decimal::ZERO {
                    return Err(TradeError::InsufficientFunds {
                        required: -proceeds,
                        actual: available,
                    });
                }
                (available + proceeds, reserved_balance)
            }
        };
        write_balances(&mut tx, new_available, new_reserved, now).await?;

        match fill.side {
            OrderSide::Buy => {
                let (old_shares, old_cost) = existing
                    .as_ref()
                    .map_or((0, Decimal::ZERO), |p| (p.shares, p.cost_basis()));
                let shares = old_shares + fill.shares;
                let average_cost = (old_cost + gross) / Decimal::from(shares);
                sqlx::query(
                    "INSERT OR REPLACE INTO positions (symbol, shares, average_cost, last_price, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&fill.symbol)
                .bind(shares)
                .bind(average_cost.normalize().to_string())
                .bind(fill.price.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            OrderSide::Sell => {
                let remaining = existing.as_ref().map_or(0, |p| p.shares) - fill.shares;
                if remaining == 0 {
                    sqlx::query("DELETE FROM positions WHERE symbol = ?")
                        .bind(&fill.symbol)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                } else {
                    sqlx::query("UPDATE positions SET shares = ?, last_price = ?, updated_at = ? WHERE symbol = ?")
                        .bind(remaining)
                        .bind(fill.price.to_string())
                        .bind(now)
                        .bind(&fill.symbol)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
            }
        }

        sqlx::query(
            "INSERT INTO trades (order_id, symbol, side, price, shares, commission, executed_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&fill.order_id.0)
        .bind(&fill.symbol)
        .bind(fill.side.to_string())
        .bind(fill.price.to_string())
        .bind(fill.shares)
        .bind(fill.commission.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let memo = format!("{} {} {} @ {}", fill.side, fill.shares, fill.symbol, fill.price);
        append_ledger(
            &mut tx,
            LedgerLine {
                action: "Fill",
                available_change: new_available - available,
                reserved_change: new_reserved - reserved_balance,
                balance_after: new_available,
                memo: Some(&memo),
            },
            now,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn adjust_balance(&self, account_id: &AccountId, delta: Decimal, memo: &str) -> Result<Decimal, TradeError> {
        let pool = self.pool(account_id).await?;
        let mut tx = pool.begin().await.map_err(db_err)?;

        let (available, reserved) = read_balances(&mut tx).await?;
        let updated = available + delta;
        if updated.is_sign_negative() {
            return Err(TradeError::InsufficientFunds {
                required: -delta,
                actual: available,
            });
        }

        let now = Utc::now();
        write_balances(&mut tx, updated, reserved, now).await?;
        append_ledger(
            &mut tx,
            LedgerLine {
                action: "Adjust",
                available_change: delta,
                reserved_change: Decimal::ZERO,
                balance_after: updated,
                memo: Some(memo),
            },
            now,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        info!("Adjusted balance of {} by {} -> {}", account_id, delta, updated);
        Ok(updated)
    }

    async fn set_balance(&self, account_id: &AccountId, amount: Decimal, memo: &str) -> Result<Decimal, TradeError> {
        if amount.is_sign_negative() {
            return Err(TradeError::InvalidAmount(amount.to_string()));
        }
        let pool = self.pool(account_id).await?;
        let mut tx = pool.begin().await.map_err(db_err)?;

        let (available, reserved) = read_balances(&mut tx).await?;
        let now = Utc::now();
        write_balances(&mut tx, amount, reserved, now).await?;
        append_ledger(
            &mut tx,
            LedgerLine {
                action: "Set",
                available_change: amount - available,
                reserved_change: Decimal::ZERO,
                balance_after: amount,
                memo: Some(memo),
            },
            now,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        info!("Set balance of {} to {}", account_id, amount);
        Ok(amount)
    }

    async fn mark_price(&self, account_id: &AccountId, symbol: &str, price: Decimal) -> Result<(), TradeError> {
        let pool = self.pool(account_id).await?;
        sqlx::query("UPDATE positions SET last_price = ?, updated_at = ? WHERE symbol = ?")
            .bind(price.to_string())
            .bind(Utc::now())
            .bind(symbol)
            .execute(&pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_fills(&self, account_id: &AccountId, limit: usize) -> Result<Vec<Fill>, TradeError> {
        let pool = self.pool(account_id).await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, FillRow>(
            "SELECT order_id, symbol, side, price, commission, shares, executed_at FROM trades ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&pool)
        .await
        .map_err(db_err)?;

        let mut fills = Vec::with_capacity(rows.len());
        for r in rows {
            fills.push(Fill {
                order_id: OrderId(r.0),
                account_id: account_id.clone(),
                symbol: r.1,
                side: parse_enum(&r.2)?,
                price: parse_decimal(&r.3, "trades.price")?,
                commission: parse_decimal(&r.4, "trades.commission")?,
                shares: r.5,
                executed_at: r.6,
            });
        }
        Ok(fills)
    }

    async fn list_ledger(&self, account_id: &AccountId, limit: usize) -> Result<Vec<LedgerEntry>, TradeError> {
        let pool = self.pool(account_id).await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT id, action, available_change, reserved_change, balance_after, memo, created_at FROM cash_ledger ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&pool)
        .await
        .map_err(db_err)?;

        let mut entries = Vec::with_capacity(rows.len());
        for r in rows {
            entries.push(LedgerEntry {
                id: r.0,
                action: r.1,
                available_change: parse_decimal(&r.2, "cash_ledger.available_change")?,
                reserved_change: parse_decimal(&r.3, "cash_ledger.reserved_change")?,
                balance_after: parse_decimal(&r.4, "cash_ledger.balance_after")?,
                memo: r.5,
                created_at: r.6,
            });
        }
        Ok(entries)
    }
}
