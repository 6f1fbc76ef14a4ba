//! Mapping of iCalendar events and tasks to row-based storage and back.
//!
//! This crate sits between an iCalendar parser and a storage backend that
//! keeps events, tasks, and their child rows in tables:
//! - `tz`, `time`, `duration`, `rule`: zone resolution and temporal values
//! - `temporal`, `recurrence_set`, `exception`, `alarm`: the field conversions
//! - `batch`: dependent row operations committed through a [`StorageTransport`]
//! - `mapping`: complete events/tasks to and from rows

pub mod alarm;
pub mod batch;
pub mod config;
pub mod constants;
pub mod duration;
pub mod error;
pub mod exception;
pub mod item;
pub mod mapping;
pub mod memory;
pub mod recurrence_set;
pub mod repair;
pub mod rule;
pub mod temporal;
pub mod time;
pub mod tz;

pub use alarm::{AlarmNormalizer, ReminderMethod};
pub use batch::{
    BatchOperation, BatchState, BatchWriter, OperationKind, OperationResult, Selection,
    StorageTransport, StoredRecord,
};
pub use config::MappingConfig;
pub use duration::{WireDuration, parse_duration};
pub use error::{CalBridgeError, CalBridgeResult, TransportError};
pub use exception::ExceptionResolver;
pub use item::{
    Alarm, AlarmAction, AlarmTrigger, Attendee, Event, EventStatus, RecurringItem, Related, Task,
    TaskStatus, Transparency,
};
pub use mapping::{EventMapper, TaskMapper};
pub use memory::MemoryTransport;
pub use recurrence_set::RecurrenceSetCodec;
pub use repair::repair_event;
pub use rule::RecurrenceRule;
pub use temporal::{ItemTiming, StoredTiming, TemporalReconciler};
pub use time::{DateSet, TemporalValue, ZoneRef};
pub use tz::TimeZoneResolver;
