use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// # Summary
/// 行情源返回的原始报价。
///
/// # Invariants
/// - `price` 必须为正数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    // 股票代码
    pub symbol: String,
    // 最新成交价
    pub price: Decimal,
    // 交易货币 (可选)
    pub currency: Option<String>,
    // 报价时间
    pub as_of: DateTime<Utc>,
}

/// # Summary
/// 价格来源，说明一次价格解析最终命中了价格链中的哪一环。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PriceSource {
    /// 管理员注入的人工价格
    Artificial,
    /// 刚从行情源拉取的实时报价
    Live,
    /// 仍在有效期内的缓存报价
    Cached,
    /// 行情源失败时退回的过期缓存
    Stale,
    /// 行情全部不可用时退回的持仓缓存价
    Fallback,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceSource::Artificial => "Artificial",
            PriceSource::Live => "Live",
            PriceSource::Cached => "Cached",
            PriceSource::Stale => "Stale",
            PriceSource::Fallback => "Fallback",
        };
        f.write_str(s)
    }
}

/// # Summary
/// 经过价格链解析后的可交易价格。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: Decimal,
    pub source: PriceSource,
    pub as_of: DateTime<Utc>,
}

/// # Summary
/// 管理员注入的人工价格，激活时覆盖实时行情。
///
/// # Invariants
/// - `price` 必须为正数。
/// - 同一 `symbol` 至多一条记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtificialPrice {
    pub symbol: String,
    pub price: Decimal,
    pub active: bool,
    // 最后修改该价格的管理员
    pub set_by: String,
    pub updated_at: DateTime<Utc>,
}

/// # Summary
/// 管理员对开闭市的强制干预模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum MarketOverride {
    /// 按交易时间表自动开闭市
    Auto,
    /// 强制开市
    ForceOpen,
    /// 强制闭市
    ForceClosed,
}

impl FromStr for MarketOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(MarketOverride::Auto),
            "forceopen" | "force_open" | "open" => Ok(MarketOverride::ForceOpen),
            "forceclosed" | "force_closed" | "closed" => Ok(MarketOverride::ForceClosed),
            _ => Err(format!("Unknown market override: {}", s)),
        }
    }
}

impl fmt::Display for MarketOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketOverride::Auto => write!(f, "Auto"),
            MarketOverride::ForceOpen => write!(f, "ForceOpen"),
            MarketOverride::ForceClosed => write!(f, "ForceClosed"),
        }
    }
}

/// # Summary
/// 模拟市场的交易时间设置。
///
/// # Invariants
/// - `open_time` / `close_time` 是 `utc_offset_minutes` 时区下的本地时间。
/// - `open_time > close_time` 表示跨越午夜的交易时段。
/// - `open_time == close_time` 表示在 `Auto` 模式下永不开市。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSettings {
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    // 交易所所在时区相对 UTC 的偏移 (分钟)，例如纽约冬令时为 -300
    pub utc_offset_minutes: i32,
    // 是否仅在周一至周五开市
    pub weekdays_only: bool,
    pub override_mode: MarketOverride,
    pub updated_at: DateTime<Utc>,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            open_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            utc_offset_minutes: -300,
            weekdays_only: true,
            override_mode: MarketOverride::Auto,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl MarketSettings {
    /// 合法的时区偏移范围 (分钟)
    pub const MAX_OFFSET_MINUTES: i32 = 14 * 60;

    /// # Logic
    /// 返回配置时区，偏移越界时截断到 ±14 小时。
    pub fn timezone(&self) -> FixedOffset {
        let minutes = self
            .utc_offset_minutes
            .clamp(-Self::MAX_OFFSET_MINUTES, Self::MAX_OFFSET_MINUTES);
        FixedOffset::east_opt(minutes * 60).unwrap_or(Utc.fix())
    }

    /// # Summary
    /// 判定给定时刻市场是否开放。
    ///
    /// # Logic
    /// 1. `ForceOpen` / `ForceClosed` 直接决定结果。
    /// 2. 换算为本地时间；`weekdays_only` 时周末闭市。
    ///    跨午夜时段中午夜之后的部分归属前一个交易日。
    /// 3. 判断本地时间是否落在 `[open_time, close_time)` 内。
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        match self.override_mode {
            MarketOverride::ForceOpen => return true,
            MarketOverride::ForceClosed => return false,
            MarketOverride::Auto => {}
        }

        if self.open_time == self.close_time {
            return false;
        }

        let local = now.with_timezone(&self.timezone());
        let t = local.time();

        if self.open_time < self.close_time {
            let in_session = t >= self.open_time && t < self.close_time;
            in_session && (!self.weekdays_only || is_weekday(local.weekday()))
        } else if t >= self.open_time {
            !self.weekdays_only || is_weekday(local.weekday())
        } else if t < self.close_time {
            let session_day = (local - Duration::days(1)).weekday();
            !self.weekdays_only || is_weekday(session_day)
        } else {
            false
        }
    }
}

fn is_weekday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

/// # Summary
/// 对外公开的市场状态快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStatus {
    pub is_open: bool,
    pub settings: MarketSettings,
    pub server_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> MarketSettings {
        MarketSettings {
            open_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            utc_offset_minutes: -300,
            weekdays_only: true,
            override_mode: MarketOverride::Auto,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_regular_session() {
        let s = settings();
        // 2026-03-02 是周一；14:30 UTC = 09:30 EST
        let open = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
        assert!(s.is_open_at(open));
        let before = Utc.with_ymd_and_hms(2026, 3, 2, 14, 29, 59).unwrap();
        assert!(!s.is_open_at(before));
        // 21:00 UTC = 16:00 EST，收盘时刻不含
        let close = Utc.with_ymd_and_hms(2026, 3, 2, 21, 0, 0).unwrap();
        assert!(!s.is_open_at(close));
    }

    #[test]
    fn test_weekend_closed() {
        let s = settings();
        // 2026-03-07 周六
        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        assert!(!s.is_open_at(saturday));

        let mut all_week = settings();
        all_week.weekdays_only = false;
        assert!(all_week.is_open_at(saturday));
    }

    #[test]
    fn test_overrides() {
        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 3, 0, 0).unwrap();
        let mut s = settings();
        s.override_mode = MarketOverride::ForceOpen;
        assert!(s.is_open_at(saturday));

        let monday_noon = Utc.with_ymd_and_hms(2026, 3, 2, 17, 0, 0).unwrap();
        s.override_mode = MarketOverride::ForceClosed;
        assert!(!s.is_open_at(monday_noon));
    }

    #[test]
    fn test_overnight_session() {
        let mut s = settings();
        s.utc_offset_minutes = 0;
        s.open_time = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        s.close_time = NaiveTime::from_hms_opt(2, 0, 0).unwrap();

        // 周一 23:00 开市
        assert!(s.is_open_at(Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap()));
        // 周二 01:00 仍属于周一的交易时段
        assert!(s.is_open_at(Utc.with_ymd_and_hms(2026, 3, 3, 1, 0, 0).unwrap()));
        // 周二 03:00 已收盘
        assert!(!s.is_open_at(Utc.with_ymd_and_hms(2026, 3, 3, 3, 0, 0).unwrap()));
        // 周六 01:00 属于周五的交易时段
        assert!(s.is_open_at(Utc.with_ymd_and_hms(2026, 3, 7, 1, 0, 0).unwrap()));
        // 周日 01:00 属于周六，闭市
        assert!(!s.is_open_at(Utc.with_ymd_and_hms(2026, 3, 8, 1, 0, 0).unwrap()));
    }

    #[test]
    fn test_equal_open_close_never_opens() {
        let mut s = settings();
        s.close_time = s.open_time;
        assert!(!s.is_open_at(Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()));
    }

    #[test]
    fn test_override_parse() {
        assert_eq!("auto".parse::<MarketOverride>(), Ok(MarketOverride::Auto));
        assert_eq!("ForceOpen".parse::<MarketOverride>(), Ok(MarketOverride::ForceOpen));
        assert_eq!("force_closed".parse::<MarketOverride>(), Ok(MarketOverride::ForceClosed));
        assert!("sometimes".parse::<MarketOverride>().is_err());
    }
}
