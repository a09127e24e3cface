//! # `bullpen-api` - HTTP API 网关
//!
//! 本 crate 是 Bullpen 模拟炒股游戏的 HTTP/REST 服务入口。
//! 使用 `axum` 构建路由与控制器，通过 `utoipa` 自动生成 OpenAPI 3.0 Swagger 文档。
//!
//! ## 架构职责
//! - 公开接口：注册、登录、行情搜索与报价、市场状态、排行榜
//! - 执行 JWT 鉴权后分发至 User / Admin 路由组
//! - 调用下层 `TradePort`、`PricePort`、`MarketClock` 完成业务操作
//! - 管理员的每一次修改操作都写入审计日志

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod types;
