//! RRULE / EXRULE values.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rrule::{RRule, Unvalidated};
use serde::{Deserialize, Serialize};

use crate::error::{CalBridgeError, CalBridgeResult};
use crate::time::TemporalValue;

const UNTIL_DATE_FORMAT: &str = "%Y%m%d";
const UNTIL_DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A recurrence rule in its RFC 5545 text form (without the `RRULE:` prefix),
/// e.g. `FREQ=WEEKLY;BYDAY=MO,WE;UNTIL=20240630T220000Z`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecurrenceRule(String);

impl RecurrenceRule {
    /// Wrap rule text without validating it.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let text = text.trim();
        let text = text
            .strip_prefix("RRULE:")
            .or_else(|| text.strip_prefix("EXRULE:"))
            .unwrap_or(text);
        RecurrenceRule(text.to_string())
    }

    /// Wrap rule text, making sure it is a rule the recurrence engine understands.
    pub fn parse(text: &str) -> CalBridgeResult<Self> {
        let rule = Self::new(text);
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> CalBridgeResult<()> {
        if self.0.is_empty() {
            return Err(CalBridgeError::InvalidRecurrenceRule {
                rule: self.0.clone(),
                reason: "empty rule".into(),
            });
        }

        self.0
            .parse::<RRule<Unvalidated>>()
            .map(|_| ())
            .map_err(|e| CalBridgeError::InvalidRecurrenceRule {
                rule: self.0.clone(),
                reason: e.to_string(),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.split(';').filter_map(|part| part.split_once('='))
    }

    /// Raw UNTIL value, if any.
    pub fn until_text(&self) -> Option<&str> {
        self.parts()
            .find(|(key, _)| key.eq_ignore_ascii_case("UNTIL"))
            .map(|(_, value)| value)
    }

    /// UNTIL as DATE, UTC DATE-TIME, or floating DATE-TIME.
    pub fn until(&self) -> Option<TemporalValue> {
        let text = self.until_text()?;

        if let Some(utc) = text.strip_suffix('Z') {
            return NaiveDateTime::parse_from_str(utc, UNTIL_DATE_TIME_FORMAT)
                .ok()
                .map(|dt| TemporalValue::utc(Utc.from_utc_datetime(&dt)));
        }
        if text.contains('T') {
            return NaiveDateTime::parse_from_str(text, UNTIL_DATE_TIME_FORMAT)
                .ok()
                .map(TemporalValue::floating);
        }
        NaiveDate::parse_from_str(text, UNTIL_DATE_FORMAT)
            .ok()
            .map(TemporalValue::Date)
    }

    /// Replace UNTIL. Dates are written as DATE, all other values as UTC DATE-TIME.
    pub fn set_until(&mut self, until: &UntilValue) {
        let formatted = match until {
            UntilValue::Date(date) => date.format(UNTIL_DATE_FORMAT).to_string(),
            UntilValue::Utc(at) => format!("{}Z", at.format(UNTIL_DATE_TIME_FORMAT)),
        };

        let mut replaced = false;
        let parts: Vec<String> = self
            .0
            .split(';')
            .map(|part| match part.split_once('=') {
                Some((key, _)) if key.eq_ignore_ascii_case("UNTIL") => {
                    replaced = true;
                    format!("UNTIL={formatted}")
                }
                _ => part.to_string(),
            })
            .collect();

        self.0 = parts.join(";");
        if !replaced {
            self.0.push_str(&format!(";UNTIL={formatted}"));
        }
    }
}

/// Value written into an UNTIL part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntilValue {
    Date(NaiveDate),
    Utc(chrono::DateTime<Utc>),
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
