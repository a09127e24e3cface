use async_trait::async_trait;
use bullpen_core::common::time::TimeProvider;
use bullpen_core::market::entity::{MarketOverride, MarketSettings, MarketStatus};
use bullpen_core::market::error::MarketError;
use bullpen_core::market::port::MarketClock;
use bullpen_core::store::port::SystemStore;
use chrono::NaiveTime;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// # Summary
/// `MarketClock` 的实现，市场设置持久化在 `SystemStore` 中，并在内存中缓存一份。
///
/// # Invariants
/// - 当前时间只从 `TimeProvider` 获取。
/// - 库中尚无设置时使用默认值 (09:30-16:00, UTC-5, 仅工作日) 并写回库中。
/// - 设置的修改在写锁内完成：先落库，再更新内存副本。
pub struct MarketService {
    store: Arc<dyn SystemStore>,
    time: Arc<dyn TimeProvider>,
    settings: RwLock<Option<MarketSettings>>,
}

impl MarketService {
    pub fn new(store: Arc<dyn SystemStore>, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time,
            settings: RwLock::new(None),
        }
    }

    /// 读取当前设置 (首次调用时从库加载)
    pub async fn settings(&self) -> Result<MarketSettings, MarketError> {
        if let Some(settings) = self.settings.read().await.as_ref() {
            return Ok(settings.clone());
        }

        let mut guard = self.settings.write().await;
        if let Some(settings) = guard.as_ref() {
            return Ok(settings.clone());
        }
        let settings = self.load_or_init().await?;
        *guard = Some(settings.clone());
        Ok(settings)
    }

    async fn load_or_init(&self) -> Result<MarketSettings, MarketError> {
        if let Some(settings) = self.store.get_market_settings().await? {
            return Ok(settings);
        }
        let settings = MarketSettings {
            updated_at: self.time.now(),
            ..MarketSettings::default()
        };
        self.store.save_market_settings(&settings).await?;
        info!("Initialized default market settings");
        Ok(settings)
    }

    /// # Logic
    /// 在写锁内读取当前设置，应用修改并落库。
    async fn modify<F>(&self, apply: F) -> Result<MarketSettings, MarketError>
    where
        F: FnOnce(&mut MarketSettings) + Send,
    {
        let mut guard = self.settings.write().await;
        let mut settings = match guard.as_ref() {
            Some(s) => s.clone(),
            None => self.load_or_init().await?,
        };
        apply(&mut settings);
        settings.updated_at = self.time.now();

        self.store.save_market_settings(&settings).await?;
        *guard = Some(settings.clone());
        Ok(settings)
    }
}

#[async_trait]
impl MarketClock for MarketService {
    async fn status(&self) -> Result<MarketStatus, MarketError> {
        let settings = self.settings().await?;
        let now = self.time.now();
        Ok(MarketStatus {
            is_open: settings.is_open_at(now),
            settings,
            server_time: now,
        })
    }

    /// # Summary
    /// 修改交易时段。
    ///
    /// # Returns
    /// 时区偏移超出 ±14 小时返回 `MarketError::InvalidSettings`。
    async fn update_hours(
        &self,
        open_time: NaiveTime,
        close_time: NaiveTime,
        utc_offset_minutes: i32,
        weekdays_only: bool,
    ) -> Result<MarketSettings, MarketError> {
        if utc_offset_minutes.abs() > MarketSettings::MAX_OFFSET_MINUTES {
            return Err(MarketError::InvalidSettings(format!(
                "utc_offset_minutes {} out of range",
                utc_offset_minutes
            )));
        }

        let settings = self
            .modify(|s| {
                s.open_time = open_time;
                s.close_time = close_time;
                s.utc_offset_minutes = utc_offset_minutes;
                s.weekdays_only = weekdays_only;
            })
            .await?;
        info!(
            "Market hours set to {}-{} (UTC{:+} min, weekdays_only={})",
            open_time, close_time, utc_offset_minutes, weekdays_only
        );
        Ok(settings)
    }

    async fn set_override(&self, mode: MarketOverride) -> Result<MarketSettings, MarketError> {
        let settings = self.modify(|s| s.override_mode = mode).await?;
        info!("Market override set to {}", mode);
        Ok(settings)
    }
}
