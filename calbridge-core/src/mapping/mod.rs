//! Turning events and tasks into row operations and back.
//!
//! Every item becomes one main row plus child rows (reminders, attendees,
//! exceptions) that back-reference the main row, all queued on a
//! [`BatchWriter`](crate::batch::BatchWriter) and committed together.

pub mod event;
pub mod task;

pub use event::EventMapper;
pub use task::TaskMapper;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{CalBridgeError, CalBridgeResult};

pub const EVENTS_TABLE: &str = "events";
pub const REMINDERS_TABLE: &str = "reminders";
pub const ATTENDEES_TABLE: &str = "attendees";
pub const TASKS_TABLE: &str = "tasks";
pub const TASK_ALARMS_TABLE: &str = "task_alarms";

/// Column of child rows pointing to their event
pub const EVENT_ID_COLUMN: &str = "event_id";
/// Column of alarm rows pointing to their task
pub const TASK_ID_COLUMN: &str = "task_id";
/// Column of exception rows pointing to their main event
pub const ORIGINAL_ID_COLUMN: &str = "original_id";

fn to_values<T: Serialize>(row: &T) -> CalBridgeResult<Map<String, Value>> {
    match serde_json::to_value(row)? {
        Value::Object(values) => Ok(values),
        other => Err(CalBridgeError::InvalidItem(format!(
            "Row doesn't serialize to an object: {other}"
        ))),
    }
}

fn from_values<T: DeserializeOwned>(values: &Map<String, Value>) -> CalBridgeResult<T> {
    Ok(serde_json::from_value(Value::Object(values.clone()))?)
}

/// UID of an item, or a new random one.
fn uid_or_new(uid: Option<&str>) -> String {
    match uid {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        title: Option<String>,
        #[serde(default)]
        minutes: i64,
    }

    #[test]
    fn test_values_roundtrip() {
        let row = Row {
            title: Some("Standup".into()),
            minutes: 15,
        };
        let values = to_values(&row).unwrap();
        assert_eq!(values.get("minutes"), Some(&Value::from(15)));
        assert_eq!(from_values::<Row>(&values).unwrap(), row);
    }

    #[test]
    fn test_from_values_type_mismatch() {
        let mut values = Map::new();
        values.insert("minutes".into(), Value::from("soon"));
        assert!(matches!(
            from_values::<Row>(&values),
            Err(CalBridgeError::Serialization(_))
        ));
    }

    #[test]
    fn test_uid_or_new() {
        assert_eq!(uid_or_new(Some("abc")), "abc");
        let generated = uid_or_new(None);
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
        assert_ne!(uid_or_new(Some("")), "");
    }
}
