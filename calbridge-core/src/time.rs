//! Date and date-time values as they appear in calendar items.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::TZID_ALLDAY;
use crate::tz::{TimeZoneResolver, zoned_from_local};

/// The zone a date-time is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneRef {
    /// No zone; the wall-clock time is read in the default zone.
    Floating,
    Utc,
    /// A zone ID as given by the interchange format (possibly unknown to the backend).
    Named(String),
}

/// A DATE or DATE-TIME value.
///
/// For [`ZoneRef::Floating`], `at` holds the wall-clock time as if it were UTC.
/// For all other zones, `at` is the absolute instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalValue {
    Date(NaiveDate),
    Instant { at: DateTime<Utc>, zone: ZoneRef },
}

impl TemporalValue {
    pub fn utc(at: DateTime<Utc>) -> Self {
        TemporalValue::Instant {
            at,
            zone: ZoneRef::Utc,
        }
    }

    pub fn floating(local: NaiveDateTime) -> Self {
        TemporalValue::Instant {
            at: Utc.from_utc_datetime(&local),
            zone: ZoneRef::Floating,
        }
    }

    /// Wall-clock time `local` in `tz`.
    pub fn zoned(local: NaiveDateTime, tz: Tz) -> Self {
        TemporalValue::Instant {
            at: zoned_from_local(tz, local),
            zone: ZoneRef::Named(tz.name().to_string()),
        }
    }

    /// Absolute instant `at`, labelled with zone `tz`.
    pub fn in_zone(at: DateTime<Utc>, tz: Tz) -> Self {
        if tz == Tz::UTC {
            return Self::utc(at);
        }
        TemporalValue::Instant {
            at,
            zone: ZoneRef::Named(tz.name().to_string()),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, TemporalValue::Date(_))
    }

    pub fn is_utc(&self) -> bool {
        matches!(
            self,
            TemporalValue::Instant {
                zone: ZoneRef::Utc,
                ..
            }
        )
    }

    /// The zone used to interpret this value; `None` for dates.
    pub fn tz(&self, resolver: &TimeZoneResolver) -> Option<Tz> {
        match self {
            TemporalValue::Date(_) => None,
            TemporalValue::Instant { zone, .. } => Some(match zone {
                ZoneRef::Floating => resolver.default_zone(),
                ZoneRef::Utc => Tz::UTC,
                ZoneRef::Named(id) => resolver.resolve(id),
            }),
        }
    }

    /// Absolute instant. Dates are midnight UTC of their day.
    pub fn to_utc(&self, resolver: &TimeZoneResolver) -> DateTime<Utc> {
        match self {
            TemporalValue::Date(date) => Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)),
            TemporalValue::Instant {
                at,
                zone: ZoneRef::Floating,
            } => zoned_from_local(resolver.default_zone(), at.naive_utc()),
            TemporalValue::Instant { at, .. } => *at,
        }
    }

    pub fn to_millis(&self, resolver: &TimeZoneResolver) -> i64 {
        self.to_utc(resolver).timestamp_millis()
    }

    /// Wall-clock time in the value's own zone. Dates are midnight.
    pub fn local(&self, resolver: &TimeZoneResolver) -> NaiveDateTime {
        match self {
            TemporalValue::Date(date) => date.and_time(chrono::NaiveTime::MIN),
            TemporalValue::Instant {
                at,
                zone: ZoneRef::Floating | ZoneRef::Utc,
            } => at.naive_utc(),
            TemporalValue::Instant {
                at,
                zone: ZoneRef::Named(id),
            } => at.with_timezone(&resolver.resolve(id)).naive_local(),
        }
    }

    /// Calendar day in the value's own zone.
    pub fn date(&self, resolver: &TimeZoneResolver) -> NaiveDate {
        match self {
            TemporalValue::Date(date) => *date,
            _ => self.local(resolver).date(),
        }
    }

    /// Zone ID to store for this value in the backend.
    ///
    /// Dates get the all-day sentinel, floating times the default zone.
    pub fn storage_tz_id(&self, resolver: &TimeZoneResolver) -> String {
        match self.tz(resolver) {
            None => TZID_ALLDAY.to_string(),
            Some(tz) => tz.name().to_string(),
        }
    }

    /// Same value with a zone the backend knows. The instant is kept; floating
    /// times and dates stay as they are.
    pub fn with_resolved_zone(&self, resolver: &TimeZoneResolver) -> TemporalValue {
        match self {
            TemporalValue::Instant {
                at,
                zone: ZoneRef::Named(id),
            } => TemporalValue::in_zone(*at, resolver.resolve(id)),
            other => other.clone(),
        }
    }

    /// Convert to the value type of `reference` (DATE or DATE-TIME).
    ///
    /// Date to date-time borrows time-of-day and zone from `reference`,
    /// date-time to date truncates to the calendar day.
    pub fn aligned_to(&self, reference: &TemporalValue, resolver: &TimeZoneResolver) -> TemporalValue {
        match (self, reference) {
            (TemporalValue::Date(_), TemporalValue::Date(_))
            | (TemporalValue::Instant { .. }, TemporalValue::Instant { .. }) => self.clone(),
            (TemporalValue::Instant { .. }, TemporalValue::Date(_)) => {
                TemporalValue::Date(self.date(resolver))
            }
            (TemporalValue::Date(date), TemporalValue::Instant { zone, .. }) => {
                let local = date.and_time(reference.local(resolver).time());
                match zone {
                    ZoneRef::Floating => TemporalValue::floating(local),
                    ZoneRef::Utc => TemporalValue::utc(Utc.from_utc_datetime(&local)),
                    ZoneRef::Named(id) => TemporalValue::Instant {
                        at: zoned_from_local(resolver.resolve(id), local),
                        zone: zone.clone(),
                    },
                }
            }
        }
    }
}

/// One RDATE or EXDATE property: a list of values sharing one property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSet(pub Vec<TemporalValue>);

impl DateSet {
    pub fn new(values: Vec<TemporalValue>) -> Self {
        DateSet(values)
    }

    pub fn values(&self) -> &[TemporalValue] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<TemporalValue>> for DateSet {
    fn from(values: Vec<TemporalValue>) -> Self {
        DateSet(values)
    }
}
