//! Storage-format constants shared by the row mappers.

/// Time zone ID stored for all-day events (the storage backend expects UTC there).
pub const TZID_ALLDAY: &str = "UTC";

/// Separates the time zone ID from the dates in an RDATE/EXDATE field (`TZID;date1,date2`).
pub const RECURRENCE_LIST_TZID_SEPARATOR: char = ';';

/// Separates the dates in an RDATE/EXDATE field.
pub const RECURRENCE_LIST_VALUE_SEPARATOR: &str = ",";

/// Separates multiple RRULEs/EXRULEs in one RRULE/EXRULE field.
pub const RECURRENCE_RULE_SEPARATOR: &str = "\n";

/// Maximum number of operations per yield point for task backends built on a
/// SQLite content provider.
pub const TASKS_OPERATIONS_PER_YIELD_POINT: usize = 499;

pub const DEFAULT_ZONE: &str = "UTC";
pub const DEFAULT_TIMED_DURATION_MINUTES: i64 = 60;
pub const DEFAULT_ALL_DAY_DURATION_DAYS: i64 = 1;

pub const MILLIS_PER_MINUTE: i64 = 60_000;
pub const SECONDS_PER_DAY: i64 = 86_400;
pub const DAYS_PER_WEEK: i64 = 7;
