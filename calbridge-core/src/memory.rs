//! In-memory [`StorageTransport`].

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tracing::debug;

use crate::batch::{
    BatchOperation, OperationKind, OperationResult, Selection, StorageTransport, StoredRecord,
};
use crate::error::TransportError;

type Table = BTreeMap<i64, Map<String, Value>>;

/// Tables of JSON rows kept in memory.
///
/// Batches are applied atomically. With a payload limit, batches whose JSON
/// encoding exceeds the limit are rejected with [`TransportError::TooLarge`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    tables: HashMap<String, Table>,
    last_id: i64,
    max_payload_bytes: Option<usize>,
    transactions: usize,
    pending_failure: Option<TransportError>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload_limit(max_payload_bytes: usize) -> Self {
        MemoryTransport {
            max_payload_bytes: Some(max_payload_bytes),
            ..Self::default()
        }
    }

    /// Number of successfully applied batches.
    pub fn transactions(&self) -> usize {
        self.transactions
    }

    /// Make the next `apply_batch` call fail with `error`.
    pub fn fail_next_batch(&mut self, error: TransportError) {
        self.pending_failure = Some(error);
    }

    /// Number of rows in `target`.
    pub fn row_count(&self, target: &str) -> usize {
        self.tables.get(target).map_or(0, BTreeMap::len)
    }

    fn payload_size(operations: &[BatchOperation]) -> Result<usize, TransportError> {
        serde_json::to_vec(operations)
            .map(|payload| payload.len())
            .map_err(|e| TransportError::Unavailable(format!("Couldn't encode batch: {e}")))
    }
}

impl StorageTransport for MemoryTransport {
    fn apply_batch(
        &mut self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<OperationResult>, TransportError> {
        if let Some(error) = self.pending_failure.take() {
            return Err(error);
        }

        if let Some(limit) = self.max_payload_bytes {
            let size = Self::payload_size(&operations)?;
            if size > limit {
                return Err(TransportError::TooLarge { size, limit });
            }
        }

        // work on a copy so that a failing operation leaves the tables untouched
        let mut tables = self.tables.clone();
        let mut last_id = self.last_id;
        let mut results: Vec<OperationResult> = Vec::with_capacity(operations.len());

        for (index, operation) in operations.into_iter().enumerate() {
            let mut values = operation.values;
            for (column, reference) in operation.back_references {
                let id = results
                    .get(reference)
                    .filter(|_| reference < index)
                    .and_then(|result| result.id)
                    .ok_or_else(|| TransportError::OperationFailed {
                        index,
                        reason: format!(
                            "Back reference to #{reference} doesn't point to a created row"
                        ),
                    })?;
                values.insert(column, Value::from(id));
            }

            let table = tables.entry(operation.target).or_default();
            let result = match operation.kind {
                OperationKind::Insert => {
                    last_id += 1;
                    table.insert(last_id, values);
                    OperationResult::created(last_id)
                }
                OperationKind::Update => {
                    let selection = required_selection(index, operation.selection.as_ref())?;
                    let mut count = 0;
                    for (id, row) in table.iter_mut() {
                        if selection.matches(*id, row) {
                            row.extend(values.clone());
                            count += 1;
                        }
                    }
                    OperationResult::affected(count)
                }
                OperationKind::Delete => {
                    let selection = required_selection(index, operation.selection.as_ref())?;
                    let before = table.len();
                    table.retain(|id, row| !selection.matches(*id, row));
                    OperationResult::affected(before - table.len())
                }
            };
            results.push(result);
        }

        self.tables = tables;
        self.last_id = last_id;
        self.transactions += 1;
        debug!(operations = results.len(), transaction = self.transactions, "Applied batch");
        Ok(results)
    }

    fn query(
        &self,
        target: &str,
        selection: Option<&Selection>,
    ) -> Result<Vec<StoredRecord>, TransportError> {
        let Some(table) = self.tables.get(target) else {
            return Ok(Vec::new());
        };

        Ok(table
            .iter()
            .filter(|(id, row)| selection.is_none_or(|selection| selection.matches(**id, row)))
            .map(|(id, row)| StoredRecord {
                id: *id,
                values: row.clone(),
            })
            .collect())
    }
}

fn required_selection(
    index: usize,
    selection: Option<&Selection>,
) -> Result<&Selection, TransportError> {
    selection.ok_or_else(|| TransportError::OperationFailed {
        index,
        reason: "Update/delete without selection".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_update_delete() {
        let mut transport = MemoryTransport::new();

        let results = transport
            .apply_batch(vec![
                BatchOperation::insert("events").with_value("title", "A"),
                BatchOperation::insert("reminders")
                    .with_value("minutes", 15)
                    .with_back_reference("event_id", 0),
            ])
            .unwrap();
        assert_eq!(results[0], OperationResult::created(1));
        assert_eq!(results[1], OperationResult::created(2));

        let reminders = transport.query("reminders", None).unwrap();
        assert_eq!(reminders[0].values.get("event_id"), Some(&Value::from(1)));

        let results = transport
            .apply_batch(vec![
                BatchOperation::update("events")
                    .with_selection(Selection::by_id(1))
                    .with_value("title", "B"),
                BatchOperation::delete("reminders").with_selection(Selection::new("event_id", 1)),
            ])
            .unwrap();
        assert_eq!(results, vec![OperationResult::affected(1), OperationResult::affected(1)]);

        let events = transport.query("events", Some(&Selection::by_id(1))).unwrap();
        assert_eq!(events[0].values.get("title"), Some(&Value::from("B")));
        assert_eq!(transport.row_count("reminders"), 0);
        assert_eq!(transport.transactions(), 2);
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let mut transport = MemoryTransport::new();

        let err = transport
            .apply_batch(vec![
                BatchOperation::insert("events"),
                BatchOperation::delete("events"),
            ])
            .unwrap_err();

        assert!(matches!(err, TransportError::OperationFailed { index: 1, .. }));
        assert_eq!(transport.row_count("events"), 0);
        assert_eq!(transport.transactions(), 0);
    }

    #[test]
    fn test_forward_back_reference_fails() {
        let mut transport = MemoryTransport::new();
        let err = transport
            .apply_batch(vec![BatchOperation::insert("reminders").with_back_reference("event_id", 0)])
            .unwrap_err();
        assert!(matches!(err, TransportError::OperationFailed { index: 0, .. }));
    }

    #[test]
    fn test_payload_limit() {
        let mut transport = MemoryTransport::with_payload_limit(50);
        let err = transport
            .apply_batch(vec![BatchOperation::insert("events").with_value("description", "x".repeat(100))])
            .unwrap_err();
        assert!(err.is_too_large());
    }
}
