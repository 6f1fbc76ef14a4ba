//! Events <-> `events`, `reminders`, and `attendees` rows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    ATTENDEES_TABLE, EVENT_ID_COLUMN, EVENTS_TABLE, ORIGINAL_ID_COLUMN, REMINDERS_TABLE,
    from_values, to_values, uid_or_new,
};
use crate::alarm::{AlarmNormalizer, ReminderMethod, minutes_to_trigger};
use crate::batch::{BatchOperation, BatchWriter, Selection, StorageTransport};
use crate::config::MappingConfig;
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::exception::ExceptionResolver;
use crate::item::{Alarm, Attendee, Event, EventStatus, RecurringItem, Related, Transparency};
use crate::recurrence_set::RecurrenceSetCodec;
use crate::repair::repair_event;
use crate::temporal::{StoredTiming, TemporalReconciler};
use crate::time::DateSet;
use crate::tz::TimeZoneResolver;

/// Columns of an `events` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub calendar_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(flatten)]
    pub timing: StoredTiming,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exrule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exdate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub transparency: Transparency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,

    /// Exceptions only: occurrence of the main event that is replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_instance_time: Option<i64>,
    /// Exceptions only: whether the main event is all-day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_all_day: Option<bool>,
}

/// Columns of a `reminders` row (besides the event reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRow {
    /// Minutes before start; negative values are after start
    pub minutes: i64,
    #[serde(default)]
    pub method: ReminderMethod,
}

/// Row values of an event or exception plus its child rows (table, values).
struct PreparedRow {
    values: Map<String, Value>,
    children: Vec<(&'static str, Map<String, Value>)>,
}

struct PreparedEvent {
    main: PreparedRow,
    exceptions: Vec<PreparedRow>,
}

#[derive(Debug, Clone, Copy)]
pub struct EventMapper {
    reconciler: TemporalReconciler,
    codec: RecurrenceSetCodec,
    exceptions: ExceptionResolver,
    alarms: AlarmNormalizer,
}

impl EventMapper {
    pub fn new(resolver: TimeZoneResolver, config: &MappingConfig) -> Self {
        EventMapper {
            reconciler: TemporalReconciler::new(resolver, config),
            codec: RecurrenceSetCodec::new(resolver),
            exceptions: ExceptionResolver::new(resolver),
            alarms: AlarmNormalizer::new(resolver),
        }
    }

    pub fn from_config(config: &MappingConfig) -> CalBridgeResult<Self> {
        Ok(Self::new(TimeZoneResolver::from_config(config)?, config))
    }

    fn resolver(&self) -> &TimeZoneResolver {
        self.reconciler.resolver()
    }

    /// Queue the rows of `event` (repaired first) and its exceptions.
    ///
    /// Returns the batch index of the main row insert. Nothing is queued when the
    /// event can't be mapped.
    pub fn enqueue_insert(
        &self,
        batch: &mut BatchWriter,
        calendar_id: i64,
        event: &Event,
    ) -> CalBridgeResult<usize> {
        let prepared = self.prepare(calendar_id, event)?;
        Ok(Self::push(batch, prepared))
    }

    /// Queue deletion of event `id`, its exceptions, and all their child rows.
    pub fn enqueue_delete(&self, batch: &mut BatchWriter, id: i64) {
        for table in [REMINDERS_TABLE, ATTENDEES_TABLE] {
            batch.enqueue(
                BatchOperation::delete(table).with_selection(Selection::new(ORIGINAL_ID_COLUMN, id)),
            );
            batch.enqueue(
                BatchOperation::delete(table).with_selection(Selection::new(EVENT_ID_COLUMN, id)),
            );
        }
        batch.enqueue(
            BatchOperation::delete(EVENTS_TABLE).with_selection(Selection::new(ORIGINAL_ID_COLUMN, id)),
        );
        batch.enqueue(BatchOperation::delete(EVENTS_TABLE).with_selection(Selection::by_id(id)));
    }

    /// Replace event `id` by `event` (delete and re-insert).
    ///
    /// Returns the batch index of the new main row insert.
    pub fn enqueue_update(
        &self,
        batch: &mut BatchWriter,
        id: i64,
        calendar_id: i64,
        event: &Event,
    ) -> CalBridgeResult<usize> {
        let prepared = self.prepare(calendar_id, event)?;
        self.enqueue_delete(batch, id);
        Ok(Self::push(batch, prepared))
    }

    /// Read event `id` with its exceptions. `None` if there's no such row.
    pub fn load<T: StorageTransport + ?Sized>(
        &self,
        transport: &T,
        id: i64,
    ) -> CalBridgeResult<Option<Event>> {
        let Some(record) = transport
            .query(EVENTS_TABLE, Some(&Selection::by_id(id)))?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let row: EventRow = from_values(&record.values)?;
        let mut event = self.event_from_row(&row);
        self.load_children(transport, id, &mut event)?;

        if event.attendees.is_empty() {
            event.organizer = None;
        }

        let mut children = Vec::new();
        for record in transport.query(EVENTS_TABLE, Some(&Selection::new(ORIGINAL_ID_COLUMN, id)))? {
            let row: EventRow = from_values(&record.values)?;
            let mut child = self.event_from_row(&row);
            match row.original_instance_time {
                Some(millis) => {
                    child.recurrence_id = Some(self.exceptions.anchor_from_row(
                        millis,
                        row.original_all_day.unwrap_or(row.timing.all_day),
                        &event,
                    ));
                }
                None => warn!(id = record.id, "Exception row without original instance time"),
            }
            self.load_children(transport, record.id, &mut child)?;
            children.push(child);
        }
        self.exceptions.attach_children(&mut event, children);

        Ok(Some(event))
    }

    fn event_row(
        &self,
        calendar_id: i64,
        event: &Event,
        uid: &str,
        recurring: bool,
    ) -> CalBridgeResult<EventRow> {
        let start = event
            .start
            .as_ref()
            .ok_or_else(|| CalBridgeError::InvalidItem("Event without start time".into()))?;
        let timing =
            self.reconciler
                .to_row(start, event.end.as_ref(), event.duration.as_ref(), recurring);

        let all_day = timing.all_day;
        let (rrule, rdate, exrule, exdate) = if recurring {
            (
                RecurrenceSetCodec::encode_rules(&event.recurrence_rules),
                self.codec.encode_dates(&event.recurrence_dates, all_day),
                RecurrenceSetCodec::encode_rules(&event.exclusion_rules),
                self.codec.encode_dates(&event.exclusion_dates, all_day),
            )
        } else {
            (None, None, None, None)
        };

        Ok(EventRow {
            calendar_id,
            uid: Some(uid.to_string()),
            sequence: event.sequence,
            title: event.summary.clone(),
            location: event.location.clone(),
            description: event.description.clone(),
            timing,
            rrule,
            rdate,
            exrule,
            exdate,
            status: event.status,
            transparency: event.transparency,
            organizer: event.organizer.clone(),
            original_instance_time: None,
            original_all_day: None,
        })
    }

    /// Repair `event` and build all of its rows.
    fn prepare(&self, calendar_id: i64, event: &Event) -> CalBridgeResult<PreparedEvent> {
        let mut event = event.clone();
        repair_event(&mut event, self.resolver())?;

        let uid = uid_or_new(event.uid.as_deref());
        let main_row = self.event_row(calendar_id, &event, &uid, event.is_recurring())?;

        let mut exceptions = Vec::with_capacity(event.exceptions.len());
        for exception in &event.exceptions {
            let link = self.exceptions.link(&event, exception)?;
            let mut exception = exception.clone();
            if exception.start.is_none() {
                exception.start = Some(link.anchor.clone());
            }

            let mut row = self.event_row(calendar_id, &exception, &uid, false)?;
            row.original_instance_time = Some(link.original_instance_millis);
            row.original_all_day = Some(link.original_all_day);
            exceptions.push(PreparedRow {
                values: to_values(&row)?,
                children: self.child_rows(&exception)?,
            });
        }

        debug!(uid = %uid, exceptions = exceptions.len(), "Prepared event rows");
        Ok(PreparedEvent {
            main: PreparedRow {
                values: to_values(&main_row)?,
                children: self.child_rows(&event)?,
            },
            exceptions,
        })
    }

    fn push(batch: &mut BatchWriter, prepared: PreparedEvent) -> usize {
        let main_index =
            batch.enqueue(BatchOperation::insert(EVENTS_TABLE).with_values(prepared.main.values));
        for (table, values) in prepared.main.children {
            batch.enqueue(
                BatchOperation::insert(table)
                    .with_values(values)
                    .with_back_reference(EVENT_ID_COLUMN, main_index),
            );
        }

        for exception in prepared.exceptions {
            let index = batch.enqueue(
                BatchOperation::insert(EVENTS_TABLE)
                    .with_values(exception.values)
                    .with_back_reference(ORIGINAL_ID_COLUMN, main_index),
            );
            for (table, values) in exception.children {
                batch.enqueue(
                    BatchOperation::insert(table)
                        .with_values(values)
                        .with_back_reference(EVENT_ID_COLUMN, index)
                        .with_back_reference(ORIGINAL_ID_COLUMN, main_index),
                );
            }
        }

        main_index
    }

    /// Reminder and attendee rows of `event`.
    fn child_rows(&self, event: &Event) -> CalBridgeResult<Vec<(&'static str, Map<String, Value>)>> {
        let mut rows = Vec::with_capacity(event.alarms.len() + event.attendees.len());

        for alarm in &event.alarms {
            let Some((_, minutes)) = self.alarms.trigger_to_minutes(alarm, event, false) else {
                continue;
            };
            let row = ReminderRow {
                minutes,
                method: ReminderMethod::for_action(&alarm.action),
            };
            rows.push((REMINDERS_TABLE, to_values(&row)?));
        }

        for attendee in &event.attendees {
            rows.push((ATTENDEES_TABLE, to_values(attendee)?));
        }

        Ok(rows)
    }

    fn event_from_row(&self, row: &EventRow) -> Event {
        let timing = self.reconciler.from_row(&row.timing);
        let start_millis = row.timing.start_millis;
        let all_day = row.timing.all_day;

        let recurring = row.rrule.is_some() || row.rdate.is_some();
        let (end, duration) = if recurring {
            (None, timing.duration)
        } else {
            (timing.end, None)
        };

        Event {
            uid: row.uid.clone(),
            sequence: row.sequence,
            summary: row.title.clone(),
            location: row.location.clone(),
            description: row.description.clone(),
            start: Some(timing.start),
            end,
            duration,
            recurrence_rules: row
                .rrule
                .as_deref()
                .map(RecurrenceSetCodec::decode_rules)
                .unwrap_or_default(),
            exclusion_rules: row
                .exrule
                .as_deref()
                .map(RecurrenceSetCodec::decode_rules)
                .unwrap_or_default(),
            recurrence_dates: self.dates_or_empty(row.rdate.as_deref(), all_day, Some(start_millis)),
            exclusion_dates: self.dates_or_empty(row.exdate.as_deref(), all_day, None),
            status: row.status,
            transparency: row.transparency,
            organizer: row.organizer.clone(),
            ..Event::default()
        }
    }

    fn dates_or_empty(&self, text: Option<&str>, all_day: bool, exclude: Option<i64>) -> Vec<DateSet> {
        let Some(text) = text else {
            return Vec::new();
        };
        self.codec
            .decode_dates(text, all_day, exclude)
            .unwrap_or_else(|e| {
                warn!(dates = text, error = %e, "Ignoring invalid date list");
                Vec::new()
            })
    }

    fn load_children<T: StorageTransport + ?Sized>(
        &self,
        transport: &T,
        id: i64,
        event: &mut Event,
    ) -> CalBridgeResult<()> {
        let by_event = Selection::new(EVENT_ID_COLUMN, id);

        for record in transport.query(REMINDERS_TABLE, Some(&by_event))? {
            let row: ReminderRow = from_values(&record.values)?;
            event.alarms.push(Alarm {
                action: row.method.to_action(),
                trigger: Some(minutes_to_trigger(row.minutes, Related::Start)),
                description: None,
            });
        }

        for record in transport.query(ATTENDEES_TABLE, Some(&by_event))? {
            let attendee: Attendee = from_values(&record.values)?;
            event.attendees.push(attendee);
        }

        Ok(())
    }
}
