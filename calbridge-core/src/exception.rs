//! Exceptions of recurring events: linking them to the main event on write and
//! splitting them into exceptions and cancelled occurrences on read.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CalBridgeError, CalBridgeResult};
use crate::item::{Event, EventStatus};
use crate::time::{DateSet, TemporalValue, ZoneRef};
use crate::tz::TimeZoneResolver;

/// Columns that tie an exception row to the occurrence it replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionLink {
    /// Recurrence ID converted to the value type of the main event's start
    pub anchor: TemporalValue,
    pub original_instance_millis: i64,
    /// All-day flag of the main event (not of the exception)
    pub original_all_day: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ExceptionResolver {
    resolver: TimeZoneResolver,
}

impl ExceptionResolver {
    pub fn new(resolver: TimeZoneResolver) -> Self {
        ExceptionResolver { resolver }
    }

    /// Compute the link columns for `exception` of `main`.
    pub fn link(&self, main: &Event, exception: &Event) -> CalBridgeResult<ExceptionLink> {
        let main_start = main.start.as_ref().ok_or_else(|| {
            CalBridgeError::InvalidItem("Main event of exception has no start time".into())
        })?;
        let recurrence_id = exception.recurrence_id.as_ref().ok_or_else(|| {
            CalBridgeError::InvalidItem("Exception without recurrence ID".into())
        })?;

        let anchor = recurrence_id.aligned_to(main_start, &self.resolver);
        if &anchor != recurrence_id {
            debug!(?recurrence_id, ?anchor, "Aligned recurrence ID with main event start");
        }

        Ok(ExceptionLink {
            original_instance_millis: anchor.to_millis(&self.resolver),
            original_all_day: main_start.is_date(),
            anchor,
        })
    }

    /// Recurrence ID of an exception row.
    pub fn anchor_from_row(
        &self,
        original_instance_millis: i64,
        original_all_day: bool,
        main: &Event,
    ) -> TemporalValue {
        let at = crate::temporal::millis_to_utc(original_instance_millis);
        if original_all_day {
            return TemporalValue::Date(at.date_naive());
        }
        match &main.start {
            Some(start) => self.relabel(at, start),
            None => TemporalValue::utc(at),
        }
    }

    /// Sort exception rows into `main`.
    ///
    /// Cancelled children become one additional EXDATE each (same value type and
    /// zone as the main start); all others become exceptions and inherit the
    /// main event's organizer.
    pub fn attach_children(&self, main: &mut Event, children: Vec<Event>) {
        for mut child in children {
            if child.status == Some(EventStatus::Cancelled) {
                let anchor = child.recurrence_id.as_ref().or(child.start.as_ref());
                match (anchor, &main.start) {
                    (Some(anchor), Some(main_start)) => {
                        let exdate = self.exclusion_for(anchor, main_start);
                        debug!(?exdate, "Cancelled exception becomes EXDATE");
                        main.exclusion_dates.push(DateSet::new(vec![exdate]));
                    }
                    _ => debug!("Ignoring cancelled exception without anchor"),
                }
                continue;
            }

            child.organizer = main.organizer.clone();
            main.exceptions.push(child);
        }
    }

    fn exclusion_for(&self, anchor: &TemporalValue, main_start: &TemporalValue) -> TemporalValue {
        match anchor.aligned_to(main_start, &self.resolver) {
            TemporalValue::Date(date) => TemporalValue::Date(date),
            instant => self.relabel(instant.to_utc(&self.resolver), main_start),
        }
    }

    /// Instant `at` in the zone of `reference`.
    fn relabel(&self, at: DateTime<Utc>, reference: &TemporalValue) -> TemporalValue {
        match reference {
            TemporalValue::Date(_) => TemporalValue::Date(at.date_naive()),
            TemporalValue::Instant { zone, .. } => match zone {
                ZoneRef::Utc => TemporalValue::utc(at),
                ZoneRef::Floating => TemporalValue::floating(
                    at.with_timezone(&self.resolver.default_zone()).naive_local(),
                ),
                ZoneRef::Named(_) => TemporalValue::Instant {
                    at,
                    zone: zone.clone(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RecurrenceRule;
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> TemporalValue {
        TemporalValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn recurring(start: TemporalValue) -> Event {
        Event {
            start: Some(start),
            recurrence_rules: vec![RecurrenceRule::new("FREQ=DAILY;COUNT=10")],
            organizer: Some("organizer@example.com".into()),
            ..Event::default()
        }
    }

    #[test]
    fn test_link_date_time_anchor_on_all_day_event() {
        let resolver = ExceptionResolver::new(TimeZoneResolver::default());
        let main = recurring(date(2024, 5, 1));
        let exception = Event {
            recurrence_id: Some(TemporalValue::utc(Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap())),
            start: Some(TemporalValue::utc(Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap())),
            ..Event::default()
        };

        let link = resolver.link(&main, &exception).unwrap();
        assert_eq!(link.anchor, date(2024, 5, 3));
        assert!(link.original_all_day);
        assert_eq!(
            link.original_instance_millis,
            Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn test_link_date_anchor_on_timed_event() {
        let resolver = ExceptionResolver::new(TimeZoneResolver::default());
        let main = recurring(TemporalValue::zoned(local(2024, 5, 1, 10, 0), chrono_tz::Europe::Vienna));
        let exception = Event {
            recurrence_id: Some(date(2024, 5, 3)),
            start: Some(date(2024, 5, 3)),
            ..Event::default()
        };

        let link = resolver.link(&main, &exception).unwrap();
        assert_eq!(
            link.anchor,
            TemporalValue::zoned(local(2024, 5, 3, 10, 0), chrono_tz::Europe::Vienna)
        );
        assert!(!link.original_all_day);
    }

    #[test]
    fn test_link_requires_anchor() {
        let resolver = ExceptionResolver::new(TimeZoneResolver::default());
        let main = recurring(date(2024, 5, 1));
        let err = resolver.link(&main, &Event::default()).unwrap_err();
        assert!(matches!(err, CalBridgeError::InvalidItem(_)));
    }

    #[test]
    fn test_cancelled_child_becomes_exdate() {
        let resolver = ExceptionResolver::new(TimeZoneResolver::default());
        let start = TemporalValue::zoned(local(2024, 5, 1, 10, 0), chrono_tz::Europe::Vienna);
        let mut main = recurring(start);

        let cancelled = Event {
            recurrence_id: Some(TemporalValue::utc(Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap())),
            status: Some(EventStatus::Cancelled),
            ..Event::default()
        };
        let moved = Event {
            recurrence_id: Some(TemporalValue::zoned(local(2024, 5, 4, 10, 0), chrono_tz::Europe::Vienna)),
            summary: Some("Moved".into()),
            ..Event::default()
        };

        resolver.attach_children(&mut main, vec![cancelled, moved]);

        assert_eq!(main.exceptions.len(), 1);
        assert_eq!(main.exceptions[0].summary.as_deref(), Some("Moved"));
        assert_eq!(main.exceptions[0].organizer.as_deref(), Some("organizer@example.com"));

        assert_eq!(
            main.exclusion_dates,
            vec![DateSet::new(vec![TemporalValue::zoned(
                local(2024, 5, 3, 10, 0),
                chrono_tz::Europe::Vienna
            )])]
        );
    }

    #[test]
    fn test_cancelled_child_of_all_day_event() {
        let resolver = ExceptionResolver::new(TimeZoneResolver::default());
        let mut main = recurring(date(2024, 5, 1));
        main.exclusion_dates.push(DateSet::new(vec![date(2024, 5, 2)]));

        let cancelled = Event {
            recurrence_id: Some(date(2024, 5, 5)),
            status: Some(EventStatus::Cancelled),
            ..Event::default()
        };
        resolver.attach_children(&mut main, vec![cancelled]);

        assert!(main.exceptions.is_empty());
        assert_eq!(main.exclusion_dates.len(), 2);
        assert_eq!(main.exclusion_dates[1], DateSet::new(vec![date(2024, 5, 5)]));
    }

    #[test]
    fn test_anchor_from_row() {
        let resolver = ExceptionResolver::new(TimeZoneResolver::default());
        let main = recurring(TemporalValue::zoned(local(2024, 5, 1, 10, 0), chrono_tz::Europe::Vienna));
        let millis = Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap().timestamp_millis();

        assert_eq!(
            resolver.anchor_from_row(millis, false, &main),
            TemporalValue::zoned(local(2024, 5, 3, 10, 0), chrono_tz::Europe::Vienna)
        );
        assert_eq!(resolver.anchor_from_row(millis, true, &main), date(2024, 5, 3));
    }
}
