use crate::db::{db_err, parse_decimal, parse_enum};
use async_trait::async_trait;
use bullpen_core::store::error::StoreError;
use bullpen_core::trade::entity::{AccountId, Order, OrderId, OrderSide, OrderStatus};
use bullpen_core::trade::port::{PendingOrderPort, TradeError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryInner {
    // 插入序号
    next_seq: u64,
    orders: HashMap<OrderId, (u64, Order)>,
}

/// # Summary
/// 基于内存的订单仓储实现。
///
/// 作为 `PendingOrderPort` 的适配器，用于测试与无需持久化的场景。
pub struct MemoryPendingOrderStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryPendingOrderStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner::default())),
        }
    }
}

impl Default for MemoryPendingOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 按创建时间排序，同一时刻按插入顺序
fn sorted_by_seq(mut items: Vec<(u64, Order)>, newest_first: bool) -> Vec<Order> {
    items.sort_by_key(|(seq, o)| (o.created_at, *seq));
    if newest_first {
        items.reverse();
    }
    items.into_iter().map(|(_, o)| o).collect()
}

#[async_trait]
impl PendingOrderPort for MemoryPendingOrderStore {
    async fn save(&self, order: &Order) -> Result<(), TradeError> {
        let mut guard = self.inner.write().await;
        let existing = guard.orders.get(&order.id).map(|(seq, _)| *seq);
        let seq = match existing {
            Some(seq) => seq,
            None => {
                guard.next_seq += 1;
                guard.next_seq
            }
        };
        guard.orders.insert(order.id.clone(), (seq, order.clone()));
        Ok(())
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<Order>, TradeError> {
        Ok(self.inner.read().await.orders.get(order_id).map(|(_, o)| o.clone()))
    }

    async fn list_by_account(
        &self,
        account_id: &AccountId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, TradeError> {
        let guard = self.inner.read().await;
        let items = guard
            .orders
            .values()
            .filter(|(_, o)| o.account_id == *account_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        Ok(sorted_by_seq(items, true))
    }

    async fn list_pending(&self) -> Result<Vec<Order>, TradeError> {
        let guard = self.inner.read().await;
        let items = guard
            .orders
            .values()
            .filter(|(_, o)| o.is_pending())
            .cloned()
            .collect();
        Ok(sorted_by_seq(items, false))
    }

    async fn pending_sell_shares(&self, account_id: &AccountId, symbol: &str) -> Result<i64, TradeError> {
        let guard = self.inner.read().await;
        Ok(guard
            .orders
            .values()
            .filter(|(_, o)| {
                o.is_pending() && o.side == OrderSide::Sell && o.account_id == *account_id && o.symbol == symbol
            })
            .map(|(_, o)| o.shares)
            .sum())
    }

    async fn complete(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        execution_price: Option<Decimal>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TradeError> {
        let mut guard = self.inner.write().await;
        match guard.orders.get_mut(order_id) {
            Some((_, order)) if order.is_pending() => {
                order.status = status;
                order.execution_price = execution_price;
                order.note = note;
                order.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

type OrderRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

const ORDER_COLUMNS: &str = "id, account_id, symbol, side, shares, reference_price, reserved_funds, status, execution_price, note, created_at, updated_at";

fn order_from_row(r: OrderRow) -> Result<Order, StoreError> {
    Ok(Order {
        id: OrderId(r.0),
        account_id: AccountId(r.1),
        symbol: r.2,
        side: parse_enum(&r.3)?,
        shares: r.4,
        reference_price: parse_decimal(&r.5, "queued_orders.reference_price")?,
        reserved_funds: parse_decimal(&r.6, "queued_orders.reserved_funds")?,
        status: parse_enum(&r.7)?,
        execution_price: r
            .8
            .as_deref()
            .map(|p| parse_decimal(p, "queued_orders.execution_price"))
            .transpose()?,
        note: r.9,
        created_at: r.10,
        updated_at: r.11,
    })
}

/// # Summary
/// 订单仓储的 SQLite 实现，`queued_orders` 表与系统库共用 `app.db`。
///
/// # Invariants
/// - 排队顺序由 `created_at` 决定，同一时刻按插入顺序 (rowid)。
/// - 状态迁移通过带 `status = 'Pending'` 条件的 UPDATE 完成，保证只发生一次。
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// # Arguments
    /// * `pool` - 系统库连接池，见 `SqliteSystemStore::pool`。
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_orders (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                shares INTEGER NOT NULL,
                reference_price TEXT NOT NULL,
                reserved_funds TEXT NOT NULL,
                status TEXT NOT NULL,
                execution_price TEXT,
                note TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_status ON queued_orders (status, created_at);
            CREATE INDEX IF NOT EXISTS idx_orders_account ON queued_orders (account_id, created_at);
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl PendingOrderPort for SqliteOrderStore {
    async fn save(&self, order: &Order) -> Result<(), TradeError> {
        sqlx::query(
            r#"
            INSERT INTO queued_orders
                (id, account_id, symbol, side, shares, reference_price, reserved_funds, status, execution_price, note, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                reserved_funds = excluded.reserved_funds,
                execution_price = excluded.execution_price,
                note = excluded.note,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&order.id.0)
        .bind(&order.account_id.0)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.shares)
        .bind(order.reference_price.to_string())
        .bind(order.reserved_funds.to_string())
        .bind(order.status.to_string())
        .bind(order.execution_price.map(|p| p.to_string()))
        .bind(&order.note)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<Order>, TradeError> {
        let sql = format!("SELECT {} FROM queued_orders WHERE id = ?", ORDER_COLUMNS);
        Ok(sqlx::query_as::<_, OrderRow>(&sql)
            .bind(&order_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(order_from_row)
            .transpose()?)
    }

    async fn list_by_account(
        &self,
        account_id: &AccountId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, TradeError> {
        let sql = format!(
            "SELECT {} FROM queued_orders WHERE account_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY created_at DESC, rowid DESC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(&account_id.0)
            .bind(status.map(|s| s.to_string()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(order_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_pending(&self) -> Result<Vec<Order>, TradeError> {
        let sql = format!(
            "SELECT {} FROM queued_orders WHERE status = ? ORDER BY created_at, rowid",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(OrderStatus::Pending.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(order_from_row).collect::<Result<_, _>>()?)
    }

    async fn pending_sell_shares(&self, account_id: &AccountId, symbol: &str) -> Result<i64, TradeError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(shares) FROM queued_orders WHERE account_id = ? AND symbol = ? AND side = ? AND status = ?",
        )
        .bind(&account_id.0)
        .bind(symbol)
        .bind(OrderSide::Sell.to_string())
        .bind(OrderStatus::Pending.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(total.unwrap_or(0))
    }

    async fn complete(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        execution_price: Option<Decimal>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TradeError> {
        let result = sqlx::query(
            "UPDATE queued_orders SET status = ?, execution_price = ?, note = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(status.to_string())
        .bind(execution_price.map(|p| p.to_string()))
        .bind(note)
        .bind(now)
        .bind(&order_id.0)
        .bind(OrderStatus::Pending.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
