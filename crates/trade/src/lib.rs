//! # `bullpen-trade` - 交易领域服务
//!
//! 下单、撤单、排队撮合与排行榜。所有资金变动经由 `AccountPort`，
//! 同一用户的操作由 [`service::TradeService`] 内部的用户锁串行化。

pub mod leaderboard;
pub mod matcher;
pub mod queue;
pub mod service;
