//! Durations as stored in the backend's DURATION field and used in alarm triggers.

use std::fmt;
use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{DAYS_PER_WEEK, SECONDS_PER_DAY};
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::time::{TemporalValue, ZoneRef};
use crate::tz::{TimeZoneResolver, zoned_from_local};

const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_MINUTE: i64 = 60;

/// Sign, optional "P", then any sequence of "T" and number+unit tokens.
static LENIENT_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])?P?((?:T|\d+[WDHMS])*)$").expect("LENIENT_DURATION should compile")
});

static DURATION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)([WDHMS])").expect("DURATION_TOKEN should compile")
});

/// A signed duration.
///
/// `Days` is a nominal (calendar) duration: adding it to a zoned date-time keeps the
/// wall-clock time across DST changes. `Exact` is an exact amount of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WireDuration {
    Days(i64),
    Exact(Duration),
}

impl WireDuration {
    pub fn zero() -> Self {
        WireDuration::Exact(Duration::zero())
    }

    pub fn is_negative(&self) -> bool {
        match self {
            WireDuration::Days(days) => *days < 0,
            WireDuration::Exact(duration) => *duration < Duration::zero(),
        }
    }

    /// Exact length, counting each day as 24 hours. Saturates at the chrono limits.
    pub fn approx(&self) -> Duration {
        match self {
            WireDuration::Days(days) => Duration::try_days(*days).unwrap_or(if *days < 0 {
                Duration::MIN
            } else {
                Duration::MAX
            }),
            WireDuration::Exact(duration) => *duration,
        }
    }

    pub fn approx_millis(&self) -> i64 {
        self.approx().num_milliseconds()
    }

    /// Duration between two values: whole days between two dates, exact time otherwise.
    pub fn between(
        start: &TemporalValue,
        end: &TemporalValue,
        resolver: &TimeZoneResolver,
    ) -> WireDuration {
        match (start, end) {
            (TemporalValue::Date(start), TemporalValue::Date(end)) => {
                WireDuration::Days((*end - *start).num_days())
            }
            _ => WireDuration::Exact(end.to_utc(resolver) - start.to_utc(resolver)),
        }
    }

    /// `value + self`, or `None` if the result is out of range.
    ///
    /// Dates use calendar-day arithmetic (exact durations are truncated to whole days).
    /// For date-times, `Days` moves the wall-clock time in the value's zone while
    /// `Exact` moves the instant.
    pub fn add_to(
        &self,
        value: &TemporalValue,
        resolver: &TimeZoneResolver,
    ) -> Option<TemporalValue> {
        let added = match (value, self) {
            (TemporalValue::Date(date), WireDuration::Days(days)) => {
                TemporalValue::Date(date.checked_add_signed(Duration::try_days(*days)?)?)
            }
            (TemporalValue::Date(date), WireDuration::Exact(duration)) => TemporalValue::Date(
                date.checked_add_signed(Duration::try_days(duration.num_days())?)?,
            ),
            (TemporalValue::Instant { at, zone }, WireDuration::Exact(duration)) => {
                TemporalValue::Instant {
                    at: at.checked_add_signed(*duration)?,
                    zone: zone.clone(),
                }
            }
            (TemporalValue::Instant { at, zone }, WireDuration::Days(days)) => {
                let days = Duration::try_days(*days)?;
                match zone {
                    ZoneRef::Floating | ZoneRef::Utc => TemporalValue::Instant {
                        at: at.checked_add_signed(days)?,
                        zone: zone.clone(),
                    },
                    ZoneRef::Named(id) => {
                        let tz = resolver.resolve(id);
                        let local = value.local(resolver).checked_add_signed(days)?;
                        TemporalValue::Instant {
                            at: zoned_from_local(tz, local),
                            zone: zone.clone(),
                        }
                    }
                }
            }
        };
        Some(added)
    }

    /// RFC 5545 text: `PnW` for whole weeks, otherwise `PnDTnHnMnS` with zero
    /// components left out. Sub-second parts are dropped.
    pub fn to_rfc5545(&self) -> String {
        let (negative, seconds, nominal) = match self {
            WireDuration::Days(days) => (
                *days < 0,
                days.unsigned_abs().saturating_mul(SECONDS_PER_DAY as u64),
                true,
            ),
            WireDuration::Exact(duration) => (
                *duration < Duration::zero(),
                duration.num_seconds().unsigned_abs(),
                false,
            ),
        };

        let sign = if negative { "-" } else { "" };
        let seconds_per_week = (SECONDS_PER_DAY * DAYS_PER_WEEK) as u64;

        if seconds == 0 {
            return if nominal { "P0D".into() } else { "PT0S".into() };
        }
        if seconds % seconds_per_week == 0 {
            return format!("{sign}P{}W", seconds / seconds_per_week);
        }

        let days = seconds / SECONDS_PER_DAY as u64;
        let hours = seconds % SECONDS_PER_DAY as u64 / SECONDS_PER_HOUR as u64;
        let minutes = seconds % SECONDS_PER_HOUR as u64 / SECONDS_PER_MINUTE as u64;
        let secs = seconds % SECONDS_PER_MINUTE as u64;

        let mut out = format!("{sign}P");
        if days > 0 {
            out.push_str(&format!("{days}D"));
        }
        if hours > 0 || minutes > 0 || secs > 0 {
            out.push('T');
            if hours > 0 {
                out.push_str(&format!("{hours}H"));
            }
            if minutes > 0 {
                out.push_str(&format!("{minutes}M"));
            }
            if secs > 0 {
                out.push_str(&format!("{secs}S"));
            }
        }
        out
    }
}

impl fmt::Display for WireDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc5545())
    }
}

impl From<WireDuration> for String {
    fn from(duration: WireDuration) -> Self {
        duration.to_rfc5545()
    }
}

impl TryFrom<String> for WireDuration {
    type Error = CalBridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(&value)
    }
}

/// Parse a duration from the backend, tolerating the malformed values some
/// clients write.
///
/// Accepted beyond RFC 5545:
/// - missing "P" (`3600S`)
/// - seconds/minutes/hours without "T" (`P3600S`)
/// - weeks mixed with other units (`P2W3600S`, weeks count as 7 days)
/// - units in any order (`P1S2M3H4D1W`)
///
/// "M" always means minutes. Values with only days/weeks become [`WireDuration::Days`].
pub fn parse_duration(text: &str) -> CalBridgeResult<WireDuration> {
    let normalized = text.trim().to_ascii_uppercase();

    if let Some(captures) = LENIENT_DURATION.captures(&normalized) {
        let negative = captures.get(1).is_some_and(|m| m.as_str() == "-");
        let body = captures.get(2).map_or("", |m| m.as_str());

        let (mut days, mut hours, mut minutes, mut seconds) = (0i64, 0i64, 0i64, 0i64);
        let (mut tokens, mut time_tokens) = (0, 0);
        for token in DURATION_TOKEN.captures_iter(body) {
            let amount: i64 = token[1]
                .parse()
                .map_err(|_| CalBridgeError::InvalidDuration(text.to_string()))?;
            let slot = match &token[2] {
                "W" => {
                    let weeks_in_days = amount
                        .checked_mul(DAYS_PER_WEEK)
                        .ok_or_else(|| CalBridgeError::InvalidDuration(text.to_string()))?;
                    days = days
                        .checked_add(weeks_in_days)
                        .ok_or_else(|| CalBridgeError::InvalidDuration(text.to_string()))?;
                    tokens += 1;
                    continue;
                }
                "D" => &mut days,
                "H" => &mut hours,
                "M" => &mut minutes,
                _ => &mut seconds,
            };
            if !matches!(&token[2], "D") {
                time_tokens += 1;
            }
            *slot = slot
                .checked_add(amount)
                .ok_or_else(|| CalBridgeError::InvalidDuration(text.to_string()))?;
            tokens += 1;
        }

        if tokens > 0 {
            let sign = if negative { -1 } else { 1 };

            if hours == 0 && minutes == 0 && seconds == 0 && (days != 0 || time_tokens == 0) {
                // beyond this chrono can't represent the duration
                if Duration::try_days(days).is_none() {
                    return Err(CalBridgeError::InvalidDuration(text.to_string()));
                }
                return Ok(WireDuration::Days(sign * days));
            }

            let total = [
                days.checked_mul(SECONDS_PER_DAY),
                hours.checked_mul(SECONDS_PER_HOUR),
                minutes.checked_mul(SECONDS_PER_MINUTE),
                Some(seconds),
            ]
            .into_iter()
            .try_fold(0i64, |acc, part| acc.checked_add(part?))
            .and_then(|total| Duration::try_seconds(sign * total))
            .ok_or_else(|| CalBridgeError::InvalidDuration(text.to_string()))?;

            return Ok(WireDuration::Exact(total));
        }
    }

    parse_iso8601_duration(&normalized)
        .ok_or_else(|| CalBridgeError::InvalidDuration(text.to_string()))
}

/// Fallback for values outside the lenient grammar, e.g. `P1Y` or `PT1.5S`.
fn parse_iso8601_duration(text: &str) -> Option<WireDuration> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let duration = iso8601::duration(unsigned).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let exact = Duration::from_std(std_duration).ok()?;

    Some(WireDuration::Exact(if negative { -exact } else { exact }))
}
