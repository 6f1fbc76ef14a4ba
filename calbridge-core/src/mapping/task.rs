//! Tasks <-> `tasks` and `task_alarms` rows.
//!
//! Unlike event rows, a task row has a single `tz` column for all of its
//! date-times. It is empty for all-day tasks.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{TASK_ALARMS_TABLE, TASK_ID_COLUMN, TASKS_TABLE, from_values, to_values, uid_or_new};
use crate::alarm::{AlarmNormalizer, ReminderMethod, minutes_to_trigger};
use crate::batch::{BatchOperation, BatchWriter, Selection, StorageTransport};
use crate::config::MappingConfig;
use crate::constants::TZID_ALLDAY;
use crate::error::CalBridgeResult;
use crate::item::{Alarm, RecurringItem, Related, Task, TaskStatus};
use crate::recurrence_set::RecurrenceSetCodec;
use crate::temporal::{StoredTiming, TemporalReconciler, millis_to_utc};
use crate::time::DateSet;
use crate::tz::TimeZoneResolver;

/// Columns of a `tasks` row. Empty columns are written as `null` so that
/// updates clear them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub list_id: i64,
    pub uid: Option<String>,
    pub sequence: Option<i64>,

    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,

    pub tz: Option<String>,
    pub is_allday: bool,
    pub dtstart: Option<i64>,
    pub due: Option<i64>,
    pub duration: Option<String>,

    pub rrule: Option<String>,
    pub rdate: Option<String>,
    pub exrule: Option<String>,
    pub exdate: Option<String>,

    pub status: Option<TaskStatus>,
    pub completed: Option<i64>,
    pub percent_complete: Option<u8>,
    pub priority: Option<u8>,
    pub organizer: Option<String>,
}

/// Columns of a `task_alarms` row (besides the task reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAlarmRow {
    /// Minutes before the reference point; negative values are after it
    pub minutes: i64,
    #[serde(default)]
    pub related: Related,
    #[serde(default)]
    pub method: ReminderMethod,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskMapper {
    reconciler: TemporalReconciler,
    codec: RecurrenceSetCodec,
    alarms: AlarmNormalizer,
}

impl TaskMapper {
    pub fn new(resolver: TimeZoneResolver, config: &MappingConfig) -> Self {
        TaskMapper {
            reconciler: TemporalReconciler::new(resolver, config),
            codec: RecurrenceSetCodec::new(resolver),
            alarms: AlarmNormalizer::new(resolver),
        }
    }

    pub fn from_config(config: &MappingConfig) -> CalBridgeResult<Self> {
        Ok(Self::new(TimeZoneResolver::from_config(config)?, config))
    }

    fn resolver(&self) -> &TimeZoneResolver {
        self.reconciler.resolver()
    }

    /// Queue the task row and its alarm rows. Returns the batch index of the task insert.
    pub fn enqueue_insert(
        &self,
        batch: &mut BatchWriter,
        list_id: i64,
        task: &Task,
    ) -> CalBridgeResult<usize> {
        let row = self.task_row(list_id, task);
        let alarms = self.alarm_rows(task)?;

        let index = batch.enqueue(BatchOperation::insert(TASKS_TABLE).with_values(to_values(&row)?));
        for values in alarms {
            batch.enqueue(
                BatchOperation::insert(TASK_ALARMS_TABLE)
                    .with_values(values)
                    .with_back_reference(TASK_ID_COLUMN, index),
            );
        }

        debug!(uid = ?row.uid, "Queued task");
        Ok(index)
    }

    /// Queue an in-place update of task `id`. Its alarms are replaced.
    ///
    /// Returns the batch index of the task update.
    pub fn enqueue_update(
        &self,
        batch: &mut BatchWriter,
        id: i64,
        list_id: i64,
        task: &Task,
    ) -> CalBridgeResult<usize> {
        let values = to_values(&self.task_row(list_id, task))?;
        let alarms = self.alarm_rows(task)?;

        let index = batch.enqueue(
            BatchOperation::update(TASKS_TABLE)
                .with_selection(Selection::by_id(id))
                .with_values(values),
        );
        batch.enqueue(
            BatchOperation::delete(TASK_ALARMS_TABLE)
                .with_selection(Selection::new(TASK_ID_COLUMN, id)),
        );
        for values in alarms {
            batch.enqueue(
                BatchOperation::insert(TASK_ALARMS_TABLE)
                    .with_values(values)
                    .with_value(TASK_ID_COLUMN, id),
            );
        }
        Ok(index)
    }

    /// Queue deletion of task `id` and its alarms.
    pub fn enqueue_delete(&self, batch: &mut BatchWriter, id: i64) {
        batch.enqueue(
            BatchOperation::delete(TASK_ALARMS_TABLE)
                .with_selection(Selection::new(TASK_ID_COLUMN, id)),
        );
        batch.enqueue(BatchOperation::delete(TASKS_TABLE).with_selection(Selection::by_id(id)));
    }

    /// Read task `id` with its alarms. `None` if there's no such row.
    pub fn load<T: StorageTransport + ?Sized>(
        &self,
        transport: &T,
        id: i64,
    ) -> CalBridgeResult<Option<Task>> {
        let Some(record) = transport
            .query(TASKS_TABLE, Some(&Selection::by_id(id)))?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let row: TaskRow = from_values(&record.values)?;
        let mut task = self.task_from_row(&row);

        for record in transport.query(TASK_ALARMS_TABLE, Some(&Selection::new(TASK_ID_COLUMN, id)))? {
            let row: TaskAlarmRow = from_values(&record.values)?;
            task.alarms.push(Alarm {
                action: row.method.to_action(),
                trigger: Some(minutes_to_trigger(row.minutes, row.related)),
                description: None,
            });
        }

        Ok(Some(task))
    }

    /// Zone of the task's `tz` column: the zone of DTSTART, else of DUE, else the
    /// default zone. `None` for all-day tasks.
    fn row_zone(&self, task: &Task) -> Option<Tz> {
        if task.is_all_day() {
            return None;
        }
        let resolver = self.resolver();
        task.start
            .as_ref()
            .and_then(|start| start.tz(resolver))
            .or_else(|| task.due.as_ref().and_then(|due| due.tz(resolver)))
            .or(Some(resolver.default_zone()))
    }

    /// Task timing goes through the reconciler: recurring tasks keep a
    /// DURATION, the others a DUE. Without DTSTART only DUE is kept.
    fn task_row(&self, list_id: i64, task: &Task) -> TaskRow {
        let resolver = self.resolver();
        let all_day = task.is_all_day();
        let tz = self.row_zone(task);

        let (dtstart, due, duration) = match &task.start {
            Some(start) => {
                let timing = self.reconciler.to_row(
                    start,
                    task.due.as_ref(),
                    task.duration.as_ref(),
                    task.is_recurring(),
                );
                (Some(timing.start_millis), timing.end_millis, timing.duration)
            }
            None => {
                if task.duration.is_some() {
                    warn!(uid = ?task.uid, "Task has DURATION without DTSTART, ignoring DURATION");
                }
                (None, task.due.as_ref().map(|due| due.to_millis(resolver)), None)
            }
        };

        TaskRow {
            list_id,
            uid: Some(uid_or_new(task.uid.as_deref())),
            sequence: task.sequence,
            title: task.summary.clone(),
            location: task.location.clone(),
            description: task.description.clone(),
            tz: tz.map(|tz| tz.name().to_string()),
            is_allday: all_day,
            dtstart,
            due,
            duration,
            rrule: RecurrenceSetCodec::encode_rules(&task.recurrence_rules),
            rdate: self.codec.encode_task_dates(&task.recurrence_dates, tz),
            exrule: RecurrenceSetCodec::encode_rules(&task.exclusion_rules),
            exdate: self.codec.encode_task_dates(&task.exclusion_dates, tz),
            status: task.status,
            completed: task.completed_at.map(|at| at.timestamp_millis()),
            percent_complete: task.percent_complete,
            priority: task.priority,
            organizer: task.organizer.clone(),
        }
    }

    fn alarm_rows(&self, task: &Task) -> CalBridgeResult<Vec<Map<String, Value>>> {
        task.alarms
            .iter()
            .filter_map(|alarm| {
                let (related, minutes) = self.alarms.trigger_to_minutes(alarm, task, true)?;
                Some(TaskAlarmRow {
                    minutes,
                    related,
                    method: ReminderMethod::for_action(&alarm.action),
                })
            })
            .map(|row| to_values(&row))
            .collect()
    }

    fn task_from_row(&self, row: &TaskRow) -> Task {
        let resolver = self.resolver();
        let tz = if row.is_allday {
            None
        } else {
            row.tz.as_deref().map(|id| resolver.resolve(id))
        };

        let (start, due, duration) = match row.dtstart {
            Some(start_millis) => {
                let timing = self.reconciler.from_row(&StoredTiming {
                    start_millis,
                    start_tz: tz.map_or_else(|| TZID_ALLDAY.to_string(), |tz| tz.name().to_string()),
                    all_day: row.is_allday,
                    end_millis: row.due,
                    end_tz: None,
                    duration: row.duration.clone(),
                });
                (Some(timing.start), timing.end, timing.duration)
            }
            None => {
                let due = row.due.map(|millis| {
                    self.reconciler
                        .value_from_millis(millis, tz.map(|tz| tz.name()), row.is_allday)
                });
                (None, due, None)
            }
        };

        Task {
            uid: row.uid.clone(),
            sequence: row.sequence,
            summary: row.title.clone(),
            location: row.location.clone(),
            description: row.description.clone(),
            start,
            due,
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
            recurrence_dates: self.dates_or_empty(row.rdate.as_deref(), tz),
            exclusion_dates: self.dates_or_empty(row.exdate.as_deref(), tz),
            status: row.status,
            completed_at: row.completed.map(millis_to_utc),
            percent_complete: row.percent_complete,
            priority: row.priority,
            organizer: row.organizer.clone(),
            alarms: Vec::new(),
        }
    }

    fn dates_or_empty(&self, text: Option<&str>, tz: Option<Tz>) -> Vec<DateSet> {
        let Some(text) = text else {
            return Vec::new();
        };
        self.codec.decode_task_dates(text, tz).unwrap_or_else(|e| {
            warn!(dates = text, error = %e, "Ignoring invalid task date list");
            Vec::new()
        })
    }
}
