//! # `bullpen-cache` - 进程内缓存
//!
//! 为报价缓存与排行榜缓存提供 `Cache` 端口的内存实现。

pub mod mem;
