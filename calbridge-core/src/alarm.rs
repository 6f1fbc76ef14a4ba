//! Alarm triggers as "minutes before start" values.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::MILLIS_PER_MINUTE;
use crate::duration::WireDuration;
use crate::item::{Alarm, AlarmAction, AlarmTrigger, RecurringItem, Related};
use crate::tz::TimeZoneResolver;

/// How the backend notifies about a reminder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderMethod {
    #[default]
    Default,
    Alert,
    Email,
}

impl ReminderMethod {
    pub fn for_action(action: &AlarmAction) -> Self {
        match action {
            AlarmAction::Display | AlarmAction::Audio => ReminderMethod::Alert,
            AlarmAction::Email => ReminderMethod::Email,
            AlarmAction::Other(_) => ReminderMethod::Default,
        }
    }

    pub fn to_action(self) -> AlarmAction {
        match self {
            ReminderMethod::Email => AlarmAction::Email,
            ReminderMethod::Alert | ReminderMethod::Default => AlarmAction::Display,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlarmNormalizer {
    resolver: TimeZoneResolver,
}

impl AlarmNormalizer {
    pub fn new(resolver: TimeZoneResolver) -> Self {
        AlarmNormalizer { resolver }
    }

    /// Minutes before the reference point at which `alarm` fires (negative: after).
    ///
    /// With `allow_end_related = false`, END-related triggers are moved to START by
    /// subtracting the item's duration. Returns `None` when that's not possible or
    /// the alarm has no usable trigger.
    pub fn trigger_to_minutes<I: RecurringItem>(
        &self,
        alarm: &Alarm,
        item: &I,
        allow_end_related: bool,
    ) -> Option<(Related, i64)> {
        match alarm.trigger.as_ref() {
            Some(AlarmTrigger::Relative { offset, related }) => {
                // day-based offsets count 24 hours per day
                let mut millis_before = -offset.approx_millis();
                let mut related = *related;

                if related == Related::End && !allow_end_related {
                    let Some(duration) = self.item_duration(item) else {
                        warn!("Item without duration, can't calculate END-related alarm");
                        return None;
                    };
                    related = Related::Start;
                    millis_before = millis_before.saturating_sub(duration.num_milliseconds());
                }

                Some((related, millis_before / MILLIS_PER_MINUTE))
            }
            Some(AlarmTrigger::Absolute { at }) => {
                let Some(start) = item.start() else {
                    warn!("Absolute alarm trigger requires a start time, ignoring alarm");
                    return None;
                };
                let minutes = (start.to_utc(&self.resolver) - *at).num_minutes();
                Some((Related::Start, minutes))
            }
            None => {
                warn!(action = ?alarm.action, "Alarm without trigger, ignoring");
                None
            }
        }
    }

    /// Exact time between start and end/due (or start + duration).
    fn item_duration<I: RecurringItem>(&self, item: &I) -> Option<Duration> {
        let start = item.start()?;
        let end = match (item.end_or_due(), item.duration()) {
            (Some(end), _) => end.clone(),
            (None, Some(duration)) => duration.add_to(start, &self.resolver)?,
            (None, None) => return None,
        };
        Some(end.to_utc(&self.resolver) - start.to_utc(&self.resolver))
    }
}

/// Relative trigger for a stored "minutes before" value.
pub fn minutes_to_trigger(minutes: i64, related: Related) -> AlarmTrigger {
    AlarmTrigger::Relative {
        offset: WireDuration::Exact(
            Duration::try_minutes(minutes.saturating_neg()).unwrap_or(if minutes > 0 {
                Duration::MIN
            } else {
                Duration::MAX
            }),
        ),
        related,
    }
}
