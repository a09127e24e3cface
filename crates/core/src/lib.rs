//! # `bullpen-core` - 领域核心
//!
//! 定义模拟炒股游戏的全部领域实体、端口 (Port) 与错误类型。
//! 本 crate 不依赖任何具体基础设施，存储、行情与 HTTP 网关均以 Trait 形式在此声明，
//! 由 `bullpen-store`、`bullpen-feed`、`bullpen-market` 等适配器 crate 实现。

pub mod cache;
pub mod common;
pub mod config;
pub mod market;
pub mod store;
pub mod trade;

#[cfg(feature = "test-utils")]
pub mod test_utils;
