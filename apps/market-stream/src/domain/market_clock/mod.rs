//! Market Clock
//!
//! Computes the trading-session state of an exchange from its trading-hours
//! configuration and an injected instant. [`compute_status`] is a pure
//! function: the same instant and configuration always produce the same
//! [`MarketStatus`].
//!
//! # Sessions
//!
//! ```text
//! extended-hours market:  04:00 ── PRE_MARKET ── open ── OPEN ── close ── AFTER_HOURS ── 20:00
//! regular market:                               open ── OPEN ── close
//! ```
//!
//! Saturdays and Sundays are always `CLOSED`.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
    Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::quote::Market;

/// Pre-market session start for extended-hours markets (04:00 local).
pub const PRE_MARKET_OPEN_MINUTES: u32 = 4 * 60;

/// After-hours session end for extended-hours markets (20:00 local).
pub const AFTER_HOURS_CLOSE_MINUTES: u32 = 20 * 60;

// =============================================================================
// Session Status
// =============================================================================

/// Trading-session label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Extended session before the regular open.
    PreMarket,
    /// Regular session.
    Open,
    /// Extended session after the regular close.
    AfterHours,
    /// No session active.
    Closed,
}

impl SessionStatus {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreMarket => "PRE_MARKET",
            Self::Open => "OPEN",
            Self::AfterHours => "AFTER_HOURS",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Trading Hours
// =============================================================================

/// Trading-hours configuration of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingHours {
    /// Regular session open, local time.
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    /// Regular session close, local time.
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
    /// IANA timezone identifier.
    pub timezone: String,
    /// Whether pre-market and after-hours sessions exist.
    #[serde(default)]
    pub extended_hours: bool,
}

impl TradingHours {
    /// Create a trading-hours configuration.
    #[must_use]
    pub fn new(open: NaiveTime, close: NaiveTime, timezone: &str, extended_hours: bool) -> Self {
        Self {
            open,
            close,
            timezone: timezone.to_string(),
            extended_hours,
        }
    }

    /// NYSE/Nasdaq: 09:30–16:00 America/New_York with extended sessions.
    #[must_use]
    pub fn us_equities() -> Self {
        Self::new(hm(9, 30), hm(16, 0), "America/New_York", true)
    }

    /// NSE: 09:15–15:30 Asia/Kolkata.
    #[must_use]
    pub fn nse() -> Self {
        Self::new(hm(9, 15), hm(15, 30), "Asia/Kolkata", false)
    }

    /// Whether the configured timezone identifier is known.
    #[must_use]
    pub fn has_valid_timezone(&self) -> bool {
        self.timezone.parse::<Tz>().is_ok()
    }

    /// Session windows as `(start, end, status)` in local minutes since midnight.
    fn sessions(&self) -> Vec<(u32, u32, SessionStatus)> {
        let open = minutes_of(self.open);
        let close = minutes_of(self.close);
        if self.extended_hours {
            vec![
                (PRE_MARKET_OPEN_MINUTES, open, SessionStatus::PreMarket),
                (open, close, SessionStatus::Open),
                (close, AFTER_HOURS_CLOSE_MINUTES, SessionStatus::AfterHours),
            ]
        } else {
            vec![(open, close, SessionStatus::Open)]
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// `"HH:MM"` (de)serialization for [`NaiveTime`].
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Market Status
// =============================================================================

/// Computed session state of one market.
///
/// Exactly one of `next_open_time` / `next_close_time` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatus {
    /// True for any non-closed session.
    pub is_open: bool,
    /// Session label.
    pub status: SessionStatus,
    /// Start of the next session, epoch milliseconds (closed markets only).
    pub next_open_time: Option<i64>,
    /// End of the current session, epoch milliseconds (active sessions only).
    pub next_close_time: Option<i64>,
    /// Instant the status was computed for, epoch milliseconds.
    pub last_update: i64,
    /// Set when a live probe replaced `is_open`, leaving `status` as computed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_open_overridden: bool,
}

impl MarketStatus {
    /// Closed status with no known next open, used before the first computation.
    #[must_use]
    pub const fn unknown(now_ms: i64) -> Self {
        Self {
            is_open: false,
            status: SessionStatus::Closed,
            next_open_time: Some(now_ms),
            next_close_time: None,
            last_update: now_ms,
            is_open_overridden: false,
        }
    }
}

/// Status of both markets, serialized as `{"US": …, "IN": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatusPair {
    /// US market status.
    #[serde(rename = "US")]
    pub us: MarketStatus,
    /// Indian market status.
    #[serde(rename = "IN")]
    pub india: MarketStatus,
}

impl MarketStatusPair {
    /// Status of `market`.
    #[must_use]
    pub const fn get(&self, market: Market) -> &MarketStatus {
        match market {
            Market::Us => &self.us,
            Market::In => &self.india,
        }
    }

    /// Mutable status of `market`.
    pub const fn get_mut(&mut self, market: Market) -> &mut MarketStatus {
        match market {
            Market::Us => &mut self.us,
            Market::In => &mut self.india,
        }
    }
}

// =============================================================================
// Status Computation
// =============================================================================

/// Timezone used to interpret wall-clock boundaries.
enum LocalZone {
    Named(Tz),
    System,
}

impl LocalZone {
    fn resolve(identifier: &str) -> Self {
        identifier.parse::<Tz>().map_or_else(
            |_| {
                tracing::warn!(
                    timezone = identifier,
                    "Unknown timezone identifier, falling back to system local time"
                );
                Self::System
            },
            Self::Named,
        )
    }

    fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Named(tz) => now.with_timezone(tz).naive_local(),
            Self::System => now.with_timezone(&Local).naive_local(),
        }
    }

    fn epoch_ms(&self, local: NaiveDateTime) -> i64 {
        let resolved = match self {
            Self::Named(tz) => tz
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.timestamp_millis()),
            Self::System => Local
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.timestamp_millis()),
        };
        resolved.unwrap_or_else(|| local.and_utc().timestamp_millis())
    }
}

/// Compute the session state of a market at `now`.
#[must_use]
pub fn compute_status(hours: &TradingHours, now: DateTime<Utc>) -> MarketStatus {
    let zone = LocalZone::resolve(&hours.timezone);
    let local = zone.local(now);
    let date = local.date();
    let minutes = local.hour() * 60 + local.minute();
    let last_update = now.timestamp_millis();

    if is_weekend(date.weekday()) {
        let monday = next_weekday(date);
        return MarketStatus {
            is_open: false,
            status: SessionStatus::Closed,
            next_open_time: Some(zone.epoch_ms(at(monday, minutes_of(hours.open)))),
            next_close_time: None,
            last_update,
            is_open_overridden: false,
        };
    }

    let sessions = hours.sessions();

    if let Some(&(_, end, status)) = sessions
        .iter()
        .find(|(start, end, _)| minutes >= *start && minutes < *end)
    {
        return MarketStatus {
            is_open: true,
            status,
            next_open_time: None,
            next_close_time: Some(zone.epoch_ms(at(date, end))),
            last_update,
            is_open_overridden: false,
        };
    }

    let first_start = sessions
        .first()
        .map_or_else(|| minutes_of(hours.open), |(start, _, _)| *start);
    let open_date = if minutes < first_start {
        date
    } else {
        next_weekday(date)
    };

    MarketStatus {
        is_open: false,
        status: SessionStatus::Closed,
        next_open_time: Some(zone.epoch_ms(at(open_date, first_start))),
        next_close_time: None,
        last_update,
        is_open_overridden: false,
    }
}

const fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

fn next_weekday(date: NaiveDate) -> NaiveDate {
    let mut next = date;
    for _ in 0..7 {
        next = next.succ_opt().unwrap_or(next);
        if !is_weekend(next.weekday()) {
            break;
        }
    }
    next
}

fn at(date: NaiveDate, minutes: u32) -> NaiveDateTime {
    let time = NaiveTime::from_num_seconds_from_midnight_opt(minutes * 60, 0).unwrap_or_default();
    NaiveDateTime::new(date, time)
}

// =============================================================================
// Live Status Override
// =============================================================================

/// How a live provider-side status reading is reconciled with the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusOverride {
    /// The live reading is logged but never applied.
    Ignore,
    /// A disagreeing live reading replaces `is_open` only; the session label
    /// and timestamps stay as computed and `is_open_overridden` is set.
    #[default]
    IsOpenOnly,
}

impl StatusOverride {
    /// Reconcile `computed` with a live reading.
    #[must_use]
    pub fn apply(self, mut computed: MarketStatus, live_open: bool) -> MarketStatus {
        if computed.is_open == live_open {
            return computed;
        }
        match self {
            Self::Ignore => computed,
            Self::IsOpenOnly => {
                computed.is_open = live_open;
                computed.is_open_overridden = true;
                computed
            }
        }
    }

    /// Configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::IsOpenOnly => "is-open-only",
        }
    }
}

impl FromStr for StatusOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "is-open-only" | "is_open_only" => Ok(Self::IsOpenOnly),
            other => Err(format!("unknown status override policy: {other}")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
