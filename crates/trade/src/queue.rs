use bullpen_core::market::port::MarketClock;
use bullpen_core::trade::entity::QueueReport;
use bullpen_core::trade::port::{TradeError, TradePort};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// # Summary
/// 挂单队列的后台轮询任务。
///
/// # Logic
/// 每隔 `every` 检查一次市场时钟，开市时调用 `TradePort::process_queue`。
/// 闭市期间什么也不做，订单继续排队。
pub struct QueueWorker {
    trade: Arc<dyn TradePort>,
    clock: Arc<dyn MarketClock>,
    every: Duration,
}

impl QueueWorker {
    pub fn new(trade: Arc<dyn TradePort>, clock: Arc<dyn MarketClock>, every: Duration) -> Self {
        Self { trade, clock, every }
    }

    /// # Summary
    /// 执行一轮检查。
    ///
    /// # Returns
    /// 闭市时返回 `Ok(None)`，否则返回本轮处理统计。
    pub async fn tick(&self) -> Result<Option<QueueReport>, TradeError> {
        let open = self
            .clock
            .is_open()
            .await
            .map_err(|e| TradeError::InternalError(e.to_string()))?;
        if !open {
            debug!("Market closed, queue untouched");
            return Ok(None);
        }
        self.trade.process_queue().await.map(Some)
    }

    /// # Summary
    /// 在后台启动轮询循环，`shutdown` 变为 `true` 或发送端被丢弃时退出。
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Queue worker started (every {:?})", self.every);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            error!("Queue worker tick failed: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Queue worker stopped");
        })
    }
}
