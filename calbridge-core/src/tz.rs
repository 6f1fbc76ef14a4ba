//! Time zone lookup against the zone catalogue known to the storage backend.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::{TZ_VARIANTS, Tz};
use tracing::{debug, warn};

use crate::config::MappingConfig;
use crate::error::CalBridgeResult;

/// Maps arbitrary zone identifiers to zones the backend understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeZoneResolver {
    default_zone: Tz,
}

impl Default for TimeZoneResolver {
    fn default() -> Self {
        TimeZoneResolver { default_zone: Tz::UTC }
    }
}

impl TimeZoneResolver {
    pub fn new(default_zone: Tz) -> Self {
        TimeZoneResolver { default_zone }
    }

    pub fn from_config(config: &MappingConfig) -> CalBridgeResult<Self> {
        Ok(Self::new(config.zone()?))
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    /// Find the best matching zone for `id`.
    ///
    /// 1. exact match, ignoring case
    /// 2. a known zone name contained in `id`, or `id` contained in a known zone name
    ///    (e.g. "Some App: Europe/Vienna")
    /// 3. the default zone
    pub fn resolve(&self, id: &str) -> Tz {
        let id = id.trim();

        if let Some(tz) = TZ_VARIANTS
            .iter()
            .find(|tz| tz.name().eq_ignore_ascii_case(id))
        {
            return *tz;
        }

        if !id.is_empty() {
            // longest match wins
            let approximation = TZ_VARIANTS
                .iter()
                .filter(|tz| id.contains(tz.name()) || tz.name().contains(id))
                .max_by_key(|tz| tz.name().len());

            if let Some(tz) = approximation {
                debug!(id, zone = tz.name(), "Approximated time zone");
                return *tz;
            }
        }

        warn!(id, default = self.default_zone.name(), "Unknown time zone, using default");
        self.default_zone
    }

    /// Like [`TimeZoneResolver::resolve`], but `None` resolves to the default zone.
    pub fn resolve_opt(&self, id: Option<&str>) -> Tz {
        match id {
            Some(id) => self.resolve(id),
            None => self.default_zone,
        }
    }

    /// Whether `id` names a zone of the catalogue exactly (ignoring case).
    pub fn is_known(id: &str) -> bool {
        TZ_VARIANTS
            .iter()
            .any(|tz| tz.name().eq_ignore_ascii_case(id.trim()))
    }
}

/// Interpret a wall-clock time in `tz`.
///
/// Ambiguous times (DST fall back) take the earlier instant; non-existent
/// times (DST spring forward) are moved forward by one hour.
pub fn zoned_from_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
                // No zone has two adjacent gaps; treat the wall-clock time as UTC.
                LocalResult::None => Utc.from_utc_datetime(&local),
            }
        }
    }
}
