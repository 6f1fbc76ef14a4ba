//! Events, tasks, and their alarms.
//!
//! These types mirror the structure of iCalendar components. The interchange
//! parser produces them; the mappers in [`crate::mapping`] turn them into rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::WireDuration;
use crate::rule::RecurrenceRule;
use crate::time::{DateSet, TemporalValue};

/// A calendar event (VEVENT)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: Option<String>,
    pub sequence: Option<i64>,

    pub summary: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,

    pub start: Option<TemporalValue>,
    pub end: Option<TemporalValue>,
    pub duration: Option<WireDuration>,

    // Recurrence fields
    pub recurrence_rules: Vec<RecurrenceRule>,
    pub exclusion_rules: Vec<RecurrenceRule>,
    pub recurrence_dates: Vec<DateSet>,
    pub exclusion_dates: Vec<DateSet>,
    /// Occurrence of the main event this exception replaces (RECURRENCE-ID)
    pub recurrence_id: Option<TemporalValue>,
    /// Exceptions of a recurring event
    pub exceptions: Vec<Event>,

    pub status: Option<EventStatus>,
    pub transparency: Transparency,

    pub organizer: Option<String>,
    pub attendees: Vec<Attendee>,

    pub alarms: Vec<Alarm>,
}

/// An event attendee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub name: Option<String>,
    /// Participation status as given by the interchange format (e.g. "ACCEPTED")
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// Event transparency (busy/free status)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transparency {
    #[default]
    Opaque,
    Transparent,
}

/// A task (VTODO)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub uid: Option<String>,
    pub sequence: Option<i64>,

    pub summary: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,

    pub start: Option<TemporalValue>,
    pub due: Option<TemporalValue>,
    pub duration: Option<WireDuration>,

    pub recurrence_rules: Vec<RecurrenceRule>,
    pub exclusion_rules: Vec<RecurrenceRule>,
    pub recurrence_dates: Vec<DateSet>,
    pub exclusion_dates: Vec<DateSet>,

    pub status: Option<TaskStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0..=100
    pub percent_complete: Option<u8>,
    /// 0 (undefined), 1 (highest) ..= 9 (lowest)
    pub priority: Option<u8>,

    pub organizer: Option<String>,

    pub alarms: Vec<Alarm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    NeedsAction,
    InProcess,
    Completed,
    Cancelled,
}

/// An alarm (VALARM)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub action: AlarmAction,
    /// `None` for malformed alarms without TRIGGER
    pub trigger: Option<AlarmTrigger>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmAction {
    Display,
    Audio,
    Email,
    Other(String),
}

/// Reference point of a relative alarm trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Related {
    #[default]
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlarmTrigger {
    /// Negative offsets trigger before the reference point.
    Relative { offset: WireDuration, related: Related },
    Absolute { at: DateTime<Utc> },
}

impl Alarm {
    pub fn relative(action: AlarmAction, offset: WireDuration, related: Related) -> Self {
        Alarm {
            action,
            trigger: Some(AlarmTrigger::Relative { offset, related }),
            description: None,
        }
    }

    pub fn absolute(action: AlarmAction, at: DateTime<Utc>) -> Self {
        Alarm {
            action,
            trigger: Some(AlarmTrigger::Absolute { at }),
            description: None,
        }
    }
}

/// Shape shared by events and tasks.
pub trait RecurringItem {
    fn start(&self) -> Option<&TemporalValue>;

    /// DTEND for events, DUE for tasks
    fn end_or_due(&self) -> Option<&TemporalValue>;

    fn duration(&self) -> Option<&WireDuration>;

    fn recurrence_rules(&self) -> &[RecurrenceRule];

    fn exclusion_rules(&self) -> &[RecurrenceRule];

    fn recurrence_dates(&self) -> &[DateSet];

    fn exclusion_dates(&self) -> &[DateSet];

    fn alarms(&self) -> &[Alarm];

    /// Whether the item has RRULEs or RDATEs.
    fn is_recurring(&self) -> bool {
        !self.recurrence_rules().is_empty()
            || self.recurrence_dates().iter().any(|set| !set.is_empty())
    }

    fn is_all_day(&self) -> bool {
        self.start().is_some_and(TemporalValue::is_date)
    }
}

impl RecurringItem for Event {
    fn start(&self) -> Option<&TemporalValue> {
        self.start.as_ref()
    }

    fn end_or_due(&self) -> Option<&TemporalValue> {
        self.end.as_ref()
    }

    fn duration(&self) -> Option<&WireDuration> {
        self.duration.as_ref()
    }

    fn recurrence_rules(&self) -> &[RecurrenceRule] {
        &self.recurrence_rules
    }

    fn exclusion_rules(&self) -> &[RecurrenceRule] {
        &self.exclusion_rules
    }

    fn recurrence_dates(&self) -> &[DateSet] {
        &self.recurrence_dates
    }

    fn exclusion_dates(&self) -> &[DateSet] {
        &self.exclusion_dates
    }

    fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }
}

impl RecurringItem for Task {
    fn start(&self) -> Option<&TemporalValue> {
        self.start.as_ref()
    }

    fn end_or_due(&self) -> Option<&TemporalValue> {
        self.due.as_ref()
    }

    fn duration(&self) -> Option<&WireDuration> {
        self.duration.as_ref()
    }

    fn recurrence_rules(&self) -> &[RecurrenceRule] {
        &self.recurrence_rules
    }

    fn exclusion_rules(&self) -> &[RecurrenceRule] {
        &self.exclusion_rules
    }

    fn recurrence_dates(&self) -> &[DateSet] {
        &self.recurrence_dates
    }

    fn exclusion_dates(&self) -> &[DateSet] {
        &self.exclusion_dates
    }

    fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    /// All-day tasks are those whose DTSTART or DUE is a DATE.
    fn is_all_day(&self) -> bool {
        self.start
            .as_ref()
            .or(self.due.as_ref())
            .is_some_and(TemporalValue::is_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_is_recurring() {
        let mut event = Event::default();
        assert!(!event.is_recurring());

        event.recurrence_dates.push(DateSet::default());
        assert!(!event.is_recurring());

        event.recurrence_rules.push(RecurrenceRule::new("FREQ=DAILY"));
        assert!(event.is_recurring());
    }

    #[test]
    fn test_task_all_day_from_due() {
        let task = Task {
            due: Some(TemporalValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())),
            ..Task::default()
        };
        assert!(task.is_all_day());
        assert!(!Event::default().is_all_day());
    }
}
