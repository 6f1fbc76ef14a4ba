//! RDATE/EXDATE lists and RRULE/EXRULE lists in their stored string form.
//!
//! Event rows store date lists as `[TZID;]date1,date2,...` where a date is
//! `yyyymmddThhmmss` (with TZID) or `yyyymmddThhmmssZ` (UTC). Task rows store
//! plain RFC 5545 values in the zone of the row's `tz` column.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::constants::{
    RECURRENCE_LIST_TZID_SEPARATOR, RECURRENCE_LIST_VALUE_SEPARATOR, RECURRENCE_RULE_SEPARATOR,
};
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::rule::RecurrenceRule;
use crate::time::{DateSet, TemporalValue, ZoneRef};
use crate::tz::TimeZoneResolver;

const DATE_FORMAT: &str = "%Y%m%d";
const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";
const UTC_MIDNIGHT_FORMAT: &str = "%Y%m%dT000000Z";

#[derive(Debug, Clone, Copy)]
pub struct RecurrenceSetCodec {
    resolver: TimeZoneResolver,
}

impl RecurrenceSetCodec {
    pub fn new(resolver: TimeZoneResolver) -> Self {
        RecurrenceSetCodec { resolver }
    }

    /// Encode RDATE/EXDATE lists for an events row. `None` if there are no dates.
    ///
    /// - all-day items: every value becomes `<date>T000000Z`
    /// - the first zoned value selects the zone of the whole list; all other
    ///   date-times are converted into its wall-clock time
    /// - without zoned values, date-times are written in UTC (floating times are
    ///   read in the default zone)
    pub fn encode_dates(&self, sets: &[DateSet], all_day: bool) -> Option<String> {
        let values: Vec<&TemporalValue> = sets.iter().flat_map(|set| set.values()).collect();
        if values.is_empty() {
            return None;
        }

        if all_day {
            let dates: Vec<String> = values
                .iter()
                .map(|value| value.date(&self.resolver).format(UTC_MIDNIGHT_FORMAT).to_string())
                .collect();
            return Some(dates.join(RECURRENCE_LIST_VALUE_SEPARATOR));
        }

        let reference = values.iter().find_map(|value| match value {
            TemporalValue::Instant {
                zone: ZoneRef::Named(id),
                ..
            } => Some(self.resolver.resolve(id)).filter(|tz| *tz != Tz::UTC),
            _ => None,
        });

        let formatted: Vec<String> = values
            .iter()
            .map(|value| match (value, reference) {
                (TemporalValue::Date(date), Some(_)) => {
                    date.and_time(chrono::NaiveTime::MIN).format(DATE_TIME_FORMAT).to_string()
                }
                (TemporalValue::Date(date), None) => date.format(UTC_MIDNIGHT_FORMAT).to_string(),
                (TemporalValue::Instant { .. }, Some(tz)) => value
                    .to_utc(&self.resolver)
                    .with_timezone(&tz)
                    .format(DATE_TIME_FORMAT)
                    .to_string(),
                (TemporalValue::Instant { .. }, None) => format!(
                    "{}Z",
                    value.to_utc(&self.resolver).format(DATE_TIME_FORMAT)
                ),
            })
            .collect();

        let list = formatted.join(RECURRENCE_LIST_VALUE_SEPARATOR);
        Some(match reference {
            Some(tz) => format!("{}{}{}", tz.name(), RECURRENCE_LIST_TZID_SEPARATOR, list),
            None => list,
        })
    }

    /// Decode an events row's RDATE/EXDATE column.
    ///
    /// Every line yields one [`DateSet`]. A `TZID;` prefix selects the zone for the
    /// line; otherwise values ending in `Z` are UTC and all others floating.
    /// Values at `exclude` (milliseconds since the epoch) are skipped.
    pub fn decode_dates(
        &self,
        text: &str,
        all_day: bool,
        exclude: Option<i64>,
    ) -> CalBridgeResult<Vec<DateSet>> {
        let mut sets = Vec::new();

        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let (zone, list) = match line.split_once(RECURRENCE_LIST_TZID_SEPARATOR) {
                Some((tzid, list)) => (Some(self.resolver.resolve(tzid)), list),
                None => (None, line),
            };

            let mut values = Vec::new();
            for raw in list
                .split(RECURRENCE_LIST_VALUE_SEPARATOR)
                .map(str::trim)
                .filter(|raw| !raw.is_empty())
            {
                let value = match parse_list_value(raw)? {
                    ListValue::Date(date) => TemporalValue::Date(date),
                    ListValue::Utc(local) => TemporalValue::utc(Utc.from_utc_datetime(&local)),
                    ListValue::Local(local) => match zone {
                        Some(tz) => TemporalValue::zoned(local, tz),
                        None => TemporalValue::floating(local),
                    },
                };

                let value = if all_day {
                    // all-day lists are stored as midnight UTC
                    match value {
                        TemporalValue::Instant { at, zone: ZoneRef::Utc } => {
                            TemporalValue::Date(at.date_naive())
                        }
                        other => TemporalValue::Date(other.date(&self.resolver)),
                    }
                } else {
                    value
                };

                if exclude.is_some_and(|millis| value.to_millis(&self.resolver) == millis) {
                    continue;
                }
                values.push(value);
            }

            if !values.is_empty() {
                sets.push(DateSet::new(values));
            }
        }

        Ok(sets)
    }

    /// Encode RDATE/EXDATE lists for a tasks row.
    ///
    /// With `tz = None` (all-day task) every value becomes a bare date. Otherwise
    /// UTC values stay UTC and all other values are written as wall-clock time in `tz`.
    pub fn encode_task_dates(&self, sets: &[DateSet], tz: Option<Tz>) -> Option<String> {
        let formatted: Vec<String> = sets
            .iter()
            .flat_map(|set| set.values())
            .map(|value| match (tz, value) {
                (None, value) => value.date(&self.resolver).format(DATE_FORMAT).to_string(),
                (Some(_), TemporalValue::Date(date)) => {
                    date.and_time(chrono::NaiveTime::MIN).format(DATE_TIME_FORMAT).to_string()
                }
                (Some(_), TemporalValue::Instant { at, zone: ZoneRef::Utc }) => {
                    format!("{}Z", at.format(DATE_TIME_FORMAT))
                }
                (Some(tz), value) => value
                    .to_utc(&self.resolver)
                    .with_timezone(&tz)
                    .format(DATE_TIME_FORMAT)
                    .to_string(),
            })
            .collect();

        if formatted.is_empty() {
            None
        } else {
            Some(formatted.join(RECURRENCE_LIST_VALUE_SEPARATOR))
        }
    }

    /// Decode a tasks row's RDATE/EXDATE column into a single [`DateSet`].
    pub fn decode_task_dates(&self, text: &str, tz: Option<Tz>) -> CalBridgeResult<Vec<DateSet>> {
        let mut values = Vec::new();

        for raw in text
            .split(RECURRENCE_LIST_VALUE_SEPARATOR)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
        {
            let value = match (parse_list_value(raw)?, tz) {
                (ListValue::Date(date), _) => TemporalValue::Date(date),
                (ListValue::Utc(local), _) => TemporalValue::utc(Utc.from_utc_datetime(&local)),
                (ListValue::Local(local), Some(tz)) => TemporalValue::zoned(local, tz),
                (ListValue::Local(local), None) => TemporalValue::Date(local.date()),
            };
            values.push(value);
        }

        Ok(if values.is_empty() {
            Vec::new()
        } else {
            vec![DateSet::new(values)]
        })
    }

    /// Join rules for the RRULE/EXRULE column. `None` if there are no rules.
    pub fn encode_rules(rules: &[RecurrenceRule]) -> Option<String> {
        if rules.is_empty() {
            return None;
        }
        Some(
            rules
                .iter()
                .map(RecurrenceRule::as_str)
                .collect::<Vec<_>>()
                .join(RECURRENCE_RULE_SEPARATOR),
        )
    }

    /// Split an RRULE/EXRULE column. Invalid rules are logged and dropped.
    pub fn decode_rules(text: &str) -> Vec<RecurrenceRule> {
        text.split(RECURRENCE_RULE_SEPARATOR)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match RecurrenceRule::parse(line) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(rule = line, error = %e, "Ignoring invalid recurrence rule");
                    None
                }
            })
            .collect()
    }
}

enum ListValue {
    Date(NaiveDate),
    Utc(NaiveDateTime),
    Local(NaiveDateTime),
}

fn parse_list_value(raw: &str) -> CalBridgeResult<ListValue> {
    let invalid = || CalBridgeError::InvalidRecurrenceSet(raw.to_string());

    if let Some(utc) = raw.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, DATE_TIME_FORMAT)
            .map(ListValue::Utc)
            .map_err(|_| invalid());
    }
    if raw.contains('T') {
        return NaiveDateTime::parse_from_str(raw, DATE_TIME_FORMAT)
            .map(ListValue::Local)
            .map_err(|_| invalid());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map(ListValue::Date)
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> RecurrenceSetCodec {
        RecurrenceSetCodec::new(TimeZoneResolver::default())
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> TemporalValue {
        TemporalValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_encode_utc_times() {
        let sets = vec![DateSet::new(vec![
            TemporalValue::utc(Utc.with_ymd_and_hms(2015, 1, 1, 10, 0, 0).unwrap()),
            TemporalValue::utc(Utc.with_ymd_and_hms(2015, 7, 2, 10, 0, 0).unwrap()),
        ])];
        assert_eq!(
            codec().encode_dates(&sets, false).as_deref(),
            Some("20150101T100000Z,20150702T100000Z")
        );
    }

    #[test]
    fn test_encode_same_zone() {
        let sets = vec![DateSet::new(vec![
            TemporalValue::zoned(local(2015, 1, 1, 10, 0), chrono_tz::Europe::Berlin),
            TemporalValue::zoned(local(2015, 7, 2, 11, 0), chrono_tz::Europe::Berlin),
        ])];
        assert_eq!(
            codec().encode_dates(&sets, false).as_deref(),
            Some("Europe/Berlin;20150101T100000,20150702T110000")
        );
    }

    #[test]
    fn test_encode_mixed_zones_uses_first_as_reference() {
        let sets = vec![
            DateSet::new(vec![TemporalValue::zoned(
                local(2015, 1, 1, 10, 0),
                chrono_tz::America::Toronto,
            )]),
            DateSet::new(vec![TemporalValue::zoned(
                local(2015, 7, 2, 10, 0),
                chrono_tz::Europe::Berlin,
            )]),
            DateSet::new(vec![TemporalValue::utc(
                Utc.with_ymd_and_hms(2015, 7, 3, 10, 0, 0).unwrap(),
            )]),
        ];
        // Berlin 10:00 CEST = Toronto 04:00 EDT, 10:00Z = Toronto 06:00 EDT
        assert_eq!(
            codec().encode_dates(&sets, false).as_deref(),
            Some("America/Toronto;20150101T100000,20150702T040000,20150703T060000")
        );
    }

    #[test]
    fn test_encode_all_day() {
        let sets = vec![DateSet::new(vec![
            date(2015, 1, 1),
            TemporalValue::zoned(local(2015, 7, 2, 23, 0), chrono_tz::Europe::Berlin),
        ])];
        assert_eq!(
            codec().encode_dates(&sets, true).as_deref(),
            Some("20150101T000000Z,20150702T000000Z")
        );
        assert_eq!(codec().encode_dates(&[], true), None);
    }

    #[test]
    fn test_decode_zoned_and_utc() {
        let codec = codec();

        let zoned = codec
            .decode_dates("Europe/Berlin;20150101T100000,20150702T110000", false, None)
            .unwrap();
        assert_eq!(
            zoned,
            vec![DateSet::new(vec![
                TemporalValue::zoned(local(2015, 1, 1, 10, 0), chrono_tz::Europe::Berlin),
                TemporalValue::zoned(local(2015, 7, 2, 11, 0), chrono_tz::Europe::Berlin),
            ])]
        );

        let utc = codec.decode_dates("20150101T100000Z", false, None).unwrap();
        assert_eq!(
            utc,
            vec![DateSet::new(vec![TemporalValue::utc(
                Utc.with_ymd_and_hms(2015, 1, 1, 10, 0, 0).unwrap()
            )])]
        );

        let floating = codec.decode_dates("20150101T100000", false, None).unwrap();
        assert_eq!(
            floating,
            vec![DateSet::new(vec![TemporalValue::floating(local(2015, 1, 1, 10, 0))])]
        );
    }

    #[test]
    fn test_decode_multiple_lines() {
        let sets = codec()
            .decode_dates(
                "Europe/Berlin;20150101T100000\nAmerica/Toronto;20150102T100000",
                false,
                None,
            )
            .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(
            sets[1].values()[0],
            TemporalValue::zoned(local(2015, 1, 2, 10, 0), chrono_tz::America::Toronto)
        );
    }

    #[test]
    fn test_decode_all_day_and_exclude() {
        let codec = codec();
        let exclude = Utc.with_ymd_and_hms(2015, 7, 2, 0, 0, 0).unwrap().timestamp_millis();

        let sets = codec
            .decode_dates("20150101T000000Z,20150702T000000Z", true, Some(exclude))
            .unwrap();
        assert_eq!(sets, vec![DateSet::new(vec![date(2015, 1, 1)])]);
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(
            codec().decode_dates("Europe/Berlin;tomorrow", false, None),
            Err(CalBridgeError::InvalidRecurrenceSet(_))
        ));
    }

    #[test]
    fn test_task_dates() {
        let codec = codec();
        let sets = vec![DateSet::new(vec![date(2015, 1, 1), date(2015, 7, 2)])];
        assert_eq!(
            codec
                .encode_task_dates(&sets, Some(chrono_tz::Europe::Berlin))
                .as_deref(),
            Some("20150101T000000,20150702T000000")
        );
        assert_eq!(
            codec.encode_task_dates(&sets, None).as_deref(),
            Some("20150101,20150702")
        );

        let mixed = vec![DateSet::new(vec![
            TemporalValue::utc(Utc.with_ymd_and_hms(2015, 1, 1, 10, 0, 0).unwrap()),
            TemporalValue::zoned(local(2015, 7, 2, 10, 0), chrono_tz::America::Toronto),
        ])];
        assert_eq!(
            codec
                .encode_task_dates(&mixed, Some(chrono_tz::Europe::Berlin))
                .as_deref(),
            Some("20150101T100000Z,20150702T160000")
        );

        let decoded = codec
            .decode_task_dates("20150101T100000Z,20150702T160000", Some(chrono_tz::Europe::Berlin))
            .unwrap();
        assert_eq!(
            decoded,
            vec![DateSet::new(vec![
                TemporalValue::utc(Utc.with_ymd_and_hms(2015, 1, 1, 10, 0, 0).unwrap()),
                TemporalValue::zoned(local(2015, 7, 2, 16, 0), chrono_tz::Europe::Berlin),
            ])]
        );
    }

    #[test]
    fn test_rules() {
        let rules = vec![
            RecurrenceRule::new("FREQ=DAILY;COUNT=3"),
            RecurrenceRule::new("FREQ=WEEKLY;BYDAY=MO"),
        ];
        let encoded = RecurrenceSetCodec::encode_rules(&rules).unwrap();
        assert_eq!(encoded, "FREQ=DAILY;COUNT=3\nFREQ=WEEKLY;BYDAY=MO");
        assert_eq!(RecurrenceSetCodec::decode_rules(&encoded), rules);
        assert_eq!(RecurrenceSetCodec::encode_rules(&[]), None);

        let decoded = RecurrenceSetCodec::decode_rules("FREQ=SOMETIMES\nFREQ=DAILY;COUNT=3");
        assert_eq!(decoded, vec![RecurrenceRule::new("FREQ=DAILY;COUNT=3")]);
    }
}
