//! # `bullpen-feed` - 第三方行情源适配器
//!
//! 目前只提供 Yahoo Finance 实现，对外暴露为 `QuoteProvider`。

pub mod yahoo;
