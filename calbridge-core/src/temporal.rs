//! Start/end/duration reconciliation between items and stored rows.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MappingConfig;
use crate::duration::{WireDuration, parse_duration};
use crate::error::CalBridgeResult;
use crate::time::TemporalValue;
use crate::tz::TimeZoneResolver;

/// Timing columns of an events or tasks row.
///
/// Recurring rows carry `duration`, non-recurring rows `end_millis`/`end_tz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTiming {
    pub start_millis: i64,
    pub start_tz: String,
    pub all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_tz: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Timing of an item as read back from a row.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemTiming {
    pub start: TemporalValue,
    pub end: Option<TemporalValue>,
    pub duration: Option<WireDuration>,
}

#[derive(Debug, Clone, Copy)]
pub struct TemporalReconciler {
    resolver: TimeZoneResolver,
    default_timed_duration: Duration,
    default_all_day_days: i64,
}

impl TemporalReconciler {
    pub fn new(resolver: TimeZoneResolver, config: &MappingConfig) -> Self {
        TemporalReconciler {
            resolver,
            default_timed_duration: config.default_timed_duration(),
            default_all_day_days: config.default_all_day_duration_days,
        }
    }

    pub fn from_config(config: &MappingConfig) -> CalBridgeResult<Self> {
        Ok(Self::new(TimeZoneResolver::from_config(config)?, config))
    }

    pub fn resolver(&self) -> &TimeZoneResolver {
        &self.resolver
    }

    /// Duration assumed for items with neither end nor duration.
    pub fn default_duration(&self, all_day: bool) -> WireDuration {
        if all_day {
            WireDuration::Days(self.default_all_day_days)
        } else {
            WireDuration::Exact(self.default_timed_duration)
        }
    }

    /// Flatten start/end/duration into row columns.
    ///
    /// `end` wins over `duration` for non-recurring rows, `duration` wins over `end`
    /// for recurring rows.
    pub fn to_row(
        &self,
        start: &TemporalValue,
        end: Option<&TemporalValue>,
        duration: Option<&WireDuration>,
        recurring: bool,
    ) -> StoredTiming {
        let resolver = &self.resolver;
        let all_day = start.is_date();
        let start_millis = start.to_millis(resolver);

        let end = end
            .map(|end| end.aligned_to(start, resolver))
            .filter(|end| self.is_valid_end(start, end));
        let duration = duration.and_then(|duration| self.usable_duration(duration, all_day));

        let mut timing = StoredTiming {
            start_millis,
            start_tz: start.storage_tz_id(resolver),
            all_day,
            end_millis: None,
            end_tz: None,
            duration: None,
        };

        if recurring {
            let duration = match (duration, &end) {
                (Some(duration), _) => duration,
                (None, Some(end)) => {
                    let between = WireDuration::between(start, end, resolver);
                    self.usable_duration(&between, all_day)
                        .unwrap_or_else(|| self.default_duration(all_day))
                }
                (None, None) => self.default_duration(all_day),
            };
            timing.duration = Some(duration.to_rfc5545());
        } else {
            let end = end
                .or_else(|| duration.and_then(|duration| self.end_after(start, &duration)))
                .or_else(|| self.end_after(start, &self.default_duration(all_day)));
            if let Some(end) = end {
                timing.end_millis = Some(end.to_millis(resolver));
                timing.end_tz = Some(end.storage_tz_id(resolver));
            }
        }

        timing
    }

    /// Rebuild start/end/duration from row columns.
    pub fn from_row(&self, row: &StoredTiming) -> ItemTiming {
        let start = self.value_from_millis(row.start_millis, Some(&row.start_tz), row.all_day);

        let end = row
            .end_millis
            .map(|millis| {
                let tz = row.end_tz.as_deref().unwrap_or(&row.start_tz);
                self.value_from_millis(millis, Some(tz), row.all_day)
            })
            .filter(|end| self.is_valid_end(&start, end));

        let duration = if end.is_some() {
            None
        } else {
            let parsed = row.duration.as_deref().and_then(|text| match parse_duration(text) {
                Ok(duration) => self.usable_duration(&duration, row.all_day),
                Err(e) => {
                    warn!(duration = text, error = %e, "Ignoring invalid duration");
                    None
                }
            });
            Some(parsed.unwrap_or_else(|| self.default_duration(row.all_day)))
        };

        ItemTiming {
            start,
            end,
            duration,
        }
    }

    /// Value for a stored timestamp. All-day values become dates of the UTC day.
    pub fn value_from_millis(&self, millis: i64, tz: Option<&str>, all_day: bool) -> TemporalValue {
        let at = millis_to_utc(millis);
        if all_day {
            return TemporalValue::Date(at.date_naive());
        }
        match tz {
            Some(id) => TemporalValue::in_zone(at, self.resolver.resolve(id)),
            None => TemporalValue::utc(at),
        }
    }

    /// Whether `end` may follow `start` (strictly later for all-day values).
    pub fn is_valid_end(&self, start: &TemporalValue, end: &TemporalValue) -> bool {
        let (start_utc, end_utc) = (start.to_utc(&self.resolver), end.to_utc(&self.resolver));

        let valid = if start.is_date() {
            end_utc > start_utc
        } else {
            end_utc >= start_utc
        };
        if !valid {
            warn!(start = %start_utc, end = %end_utc, "End before start, dropping end");
        }
        valid
    }

    fn end_after(&self, start: &TemporalValue, duration: &WireDuration) -> Option<TemporalValue> {
        let end = duration.add_to(start, &self.resolver);
        if end.is_none() {
            warn!(duration = %duration, "Duration out of range, dropping it");
        }
        end
    }

    /// Negative durations are dropped; all-day items only know whole days.
    fn usable_duration(&self, duration: &WireDuration, all_day: bool) -> Option<WireDuration> {
        if duration.is_negative() {
            warn!(duration = %duration, "Negative duration, dropping it");
            return None;
        }

        match (duration, all_day) {
            (WireDuration::Exact(exact), true) => {
                let days = exact.num_days();
                debug!(duration = %duration, days, "Rounding all-day duration to days");
                (days > 0).then_some(WireDuration::Days(days))
            }
            (WireDuration::Days(0), true) => None,
            _ => Some(*duration),
        }
    }
}

pub(crate) fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
