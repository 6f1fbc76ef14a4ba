//! Repairs for events as they come from servers or the backend.

use tracing::{info, warn};

use crate::error::{CalBridgeError, CalBridgeResult};
use crate::item::Event;
use crate::rule::{RecurrenceRule, UntilValue};
use crate::time::TemporalValue;
use crate::tz::TimeZoneResolver;

/// Fix inconsistencies of `event` and its exceptions in place.
///
/// - an end before the start is removed
/// - UNTIL of every RRULE gets the value type of the start
/// - RRULEs ending before the start are removed
/// - exceptions lose their RRULEs
///
/// Fails if the event has no start.
pub fn repair_event(event: &mut Event, resolver: &TimeZoneResolver) -> CalBridgeResult<()> {
    let start = correct_start_and_end(event, resolver)?;

    for rule in &mut event.recurrence_rules {
        align_until(rule, &start, resolver);
    }
    event
        .recurrence_rules
        .retain(|rule| !ends_before_start(rule, &start, resolver));

    for exception in &mut event.exceptions {
        if !exception.recurrence_rules.is_empty() {
            warn!(uid = ?exception.uid, "Removing RRULEs of exception");
            exception.recurrence_rules.clear();
        }
        if exception.start.is_some() {
            correct_start_and_end(exception, resolver)?;
        }
    }

    Ok(())
}

fn correct_start_and_end(
    event: &mut Event,
    resolver: &TimeZoneResolver,
) -> CalBridgeResult<TemporalValue> {
    let start = event
        .start
        .clone()
        .ok_or_else(|| CalBridgeError::InvalidItem("Event without start time".into()))?;

    let ends_before_start = event
        .end
        .as_ref()
        .is_some_and(|end| end.to_utc(resolver) < start.to_utc(resolver));
    if ends_before_start {
        warn!(uid = ?event.uid, "DTSTART after DTEND, removing DTEND");
        event.end = None;
    }

    Ok(start)
}

fn align_until(rule: &mut RecurrenceRule, start: &TemporalValue, resolver: &TimeZoneResolver) {
    let Some(until) = rule.until() else {
        return;
    };

    let replacement = match (&until, start) {
        (TemporalValue::Instant { .. }, TemporalValue::Date(_)) => {
            warn!(rule = %rule, "DTSTART has DATE, but UNTIL has DATE-TIME; making UNTIL a DATE");
            UntilValue::Date(until.date(resolver))
        }
        (TemporalValue::Date(_), TemporalValue::Instant { .. }) => {
            warn!(rule = %rule, "DTSTART has DATE-TIME, but UNTIL has DATE; copying time from DTSTART");
            UntilValue::Utc(until.aligned_to(start, resolver).to_utc(resolver))
        }
        _ => return,
    };

    let previous = rule.to_string();
    rule.set_until(&replacement);
    info!(rule = %rule, previous = %previous, "Repaired UNTIL");
}

fn ends_before_start(
    rule: &RecurrenceRule,
    start: &TemporalValue,
    resolver: &TimeZoneResolver,
) -> bool {
    let ends_before = rule
        .until()
        .is_some_and(|until| until.to_utc(resolver) < start.to_utc(resolver));
    if ends_before {
        warn!(rule = %rule, "Removing RRULE with UNTIL before DTSTART");
    }
    ends_before
}
