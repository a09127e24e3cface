use bullpen_core::cache::port::{Cache, CacheExt};
use bullpen_core::store::port::{SystemStore, UserRole};
use bullpen_core::trade::entity::{AccountId, LeaderboardEntry};
use bullpen_core::trade::port::{TradeError, TradePort};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CACHE_KEY: &str = "leaderboard";

/// # Summary
/// 排行榜服务：对全部普通用户的组合估值并排名。
///
/// # Logic
/// 1. 命中缓存时直接截取前 `limit` 名。
/// 2. 否则逐个估值 (持仓价格取不到时退回持仓缓存价)，
///    按总资产降序、用户 ID 升序排名后写入缓存。
///
/// # Invariants
/// - 管理员不参与排名；尚未开户或账户无法读取的用户被跳过。
/// - `gain` 以配置的初始资金为基准。
pub struct LeaderboardService {
    store: Arc<dyn SystemStore>,
    trade: Arc<dyn TradePort>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    initial_balance: Decimal,
}

impl LeaderboardService {
    pub fn new(
        store: Arc<dyn SystemStore>,
        trade: Arc<dyn TradePort>,
        cache: Arc<dyn Cache>,
        ttl: Duration,
        initial_balance: Decimal,
    ) -> Self {
        Self {
            store,
            trade,
            cache,
            ttl,
            initial_balance,
        }
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, TradeError> {
        match self.cache.get::<Vec<LeaderboardEntry>>(CACHE_KEY).await {
            Ok(Some(mut ranking)) => {
                ranking.truncate(limit);
                return Ok(ranking);
            }
            Ok(None) => {}
            Err(e) => warn!("Leaderboard cache read failed: {}", e),
        }

        let mut ranking = self.rank().await?;
        if let Err(e) = self.cache.set(CACHE_KEY, &ranking, Some(self.ttl)).await {
            warn!("Leaderboard cache write failed: {}", e);
        }
        ranking.truncate(limit);
        Ok(ranking)
    }

    /// 丢弃缓存的排名 (余额被管理员修改等场景)
    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.del(CACHE_KEY).await {
            warn!("Leaderboard cache invalidation failed: {}", e);
        }
    }

    async fn rank(&self) -> Result<Vec<LeaderboardEntry>, TradeError> {
        let users = self.store.list_users().await?;

        let mut entries = Vec::with_capacity(users.len());
        for user in users.into_iter().filter(|u| u.role == UserRole::Standard) {
            let portfolio = match self.trade.portfolio(&AccountId(user.id.clone())).await {
                Ok(p) => p,
                Err(TradeError::AccountNotFound(_)) => continue,
                Err(e) => {
                    warn!("Skipping {} in leaderboard: {}", user.id, e);
                    continue;
                }
            };
            let cash = portfolio.available_balance + portfolio.reserved_balance;
            let gain = portfolio.total_value - self.initial_balance;
            let gain_percent = if self.initial_balance.is_zero() {
                Decimal::ZERO
            } else {
                (gain / self.initial_balance * Decimal::ONE_HUNDRED).round_dp(2)
            };
            entries.push(LeaderboardEntry {
                rank: 0,
                user_id: user.id,
                name: user.name,
                cash,
                holdings_value: portfolio.holdings_value,
                total_value: portfolio.total_value,
                gain,
                gain_percent,
            });
        }

        entries.sort_by(|a, b| {
            b.total_value
                .cmp(&a.total_value)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        debug!("Leaderboard recomputed with {} entries", entries.len());
        Ok(entries)
    }
}
