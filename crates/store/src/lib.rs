//! # `bullpen-store` - SQLite 持久化适配器
//!
//! - [`system::SqliteSystemStore`]: 中心库 `app.db`，保存用户、元数据、市场设置、人工价格与审计日志。
//! - [`account::SqliteAccountStore`]: 一户一库 (`accounts/account_<id>.db`)，保存资金、持仓与流水。
//! - [`pending_order`]: 订单仓储，提供内存与 SQLite 两种实现。

pub mod account;
pub mod db;
pub mod pending_order;
pub mod system;
