//! Batched row operations with back references, committed through a
//! [`StorageTransport`].
//!
//! Operations are queued first and committed together. A back reference lets an
//! operation use the id of a row that an earlier operation of the same batch
//! creates. When the transport rejects a batch as too large, the batch is split
//! in halves (losing atomicity) until every part fits.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::config::MappingConfig;
use crate::error::{CalBridgeError, CalBridgeResult, TransportError};

/// Column holding a row's id.
pub const ID_COLUMN: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

/// `column = value` filter for updates, deletes, and queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub column: String,
    pub value: Value,
}

impl Selection {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Selection {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn by_id(id: i64) -> Self {
        Self::new(ID_COLUMN, id)
    }

    pub fn matches(&self, id: i64, values: &Map<String, Value>) -> bool {
        if self.column == ID_COLUMN {
            return self.value.as_i64() == Some(id);
        }
        values.get(&self.column) == Some(&self.value)
    }
}

/// One queued row operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOperation {
    pub kind: OperationKind,
    /// Table the operation works on
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    pub values: Map<String, Value>,
    /// Column -> index of the operation whose resulting id is written into the column
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub back_references: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub yield_allowed: bool,
}

impl BatchOperation {
    fn new(kind: OperationKind, target: impl Into<String>) -> Self {
        BatchOperation {
            kind,
            target: target.into(),
            selection: None,
            values: Map::new(),
            back_references: BTreeMap::new(),
            yield_allowed: false,
        }
    }

    pub fn insert(target: impl Into<String>) -> Self {
        Self::new(OperationKind::Insert, target)
    }

    pub fn update(target: impl Into<String>) -> Self {
        Self::new(OperationKind::Update, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, target)
    }

    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Set `column` only if `value` is `Some`.
    pub fn with_optional_value<V: Into<Value>>(
        self,
        column: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        match value {
            Some(value) => self.with_value(column, value),
            None => self,
        }
    }

    pub fn with_values(mut self, values: Map<String, Value>) -> Self {
        self.values.extend(values);
        self
    }

    /// Write the id created by operation `index` into `column`.
    pub fn with_back_reference(mut self, column: impl Into<String>, index: usize) -> Self {
        self.back_references.insert(column.into(), index);
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// Result of one applied operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    /// Id of the created row (inserts)
    pub id: Option<i64>,
    /// Number of affected rows (updates, deletes)
    pub count: Option<usize>,
}

impl OperationResult {
    pub fn created(id: i64) -> Self {
        OperationResult {
            id: Some(id),
            count: None,
        }
    }

    pub fn affected(count: usize) -> Self {
        OperationResult {
            id: None,
            count: Some(count),
        }
    }

    fn affected_rows(&self) -> usize {
        match (self.count, self.id) {
            (Some(count), _) => count,
            (None, Some(_)) => 1,
            (None, None) => 0,
        }
    }
}

/// A row as returned by [`StorageTransport::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub values: Map<String, Value>,
}

/// Storage backend that applies batches atomically.
///
/// Back references in a submitted batch are indexes into that batch.
pub trait StorageTransport {
    fn apply_batch(
        &mut self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<OperationResult>, TransportError>;

    fn query(
        &self,
        target: &str,
        selection: Option<&Selection>,
    ) -> Result<Vec<StoredRecord>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Queuing,
    Committing,
    Done,
    /// Commit failed after some split parts had been committed
    PartiallyCommitted,
    Failed,
}

#[derive(Debug)]
pub struct BatchWriter {
    queue: Vec<BatchOperation>,
    results: Vec<Option<OperationResult>>,
    max_operations_per_yield_point: Option<usize>,
    state: BatchState,
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BatchWriter {
    pub fn new(max_operations_per_yield_point: Option<usize>) -> Self {
        BatchWriter {
            queue: Vec::new(),
            results: Vec::new(),
            max_operations_per_yield_point,
            state: BatchState::Queuing,
        }
    }

    pub fn from_config(config: &MappingConfig) -> Self {
        Self::new(config.max_operations_per_yield_point)
    }

    /// Queue an operation and return its index (for back references).
    pub fn enqueue(&mut self, operation: BatchOperation) -> usize {
        if self.state != BatchState::Queuing {
            self.state = BatchState::Queuing;
            self.results.clear();
        }
        self.queue.push(operation);
        self.queue.len() - 1
    }

    /// Index the next enqueued operation will get.
    pub fn next_back_reference_index(&self) -> usize {
        self.queue.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Result of operation `index` of the last commit.
    pub fn result(&self, index: usize) -> Option<&OperationResult> {
        self.results.get(index).and_then(Option::as_ref)
    }

    /// Commit all queued operations and empty the queue.
    ///
    /// Returns the number of affected rows.
    pub fn commit<T: StorageTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> CalBridgeResult<usize> {
        let queued = self.queue.len();
        if queued == 0 {
            self.state = BatchState::Done;
            return Ok(0);
        }

        self.state = BatchState::Committing;
        debug!(operations = queued, "Committing batch");
        if tracing::enabled!(tracing::Level::TRACE) {
            for (index, operation) in self.queue.iter().enumerate() {
                trace!(index, ?operation, "Queued operation");
            }
        }

        self.results = vec![None; queued];
        let outcome = self.run_batch(transport, 0, queued);
        self.queue.clear();

        match outcome {
            Ok(()) => {
                let affected = self
                    .results
                    .iter()
                    .flatten()
                    .map(OperationResult::affected_rows)
                    .sum();
                debug!(affected, "Batch committed");
                self.state = BatchState::Done;
                Ok(affected)
            }
            Err(e) => {
                self.state = if self.results.iter().any(Option::is_some) {
                    BatchState::PartiallyCommitted
                } else {
                    BatchState::Failed
                };
                Err(e)
            }
        }
    }

    /// Apply operations `start..end` in one transaction, splitting on "too large".
    fn run_batch<T: StorageTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        start: usize,
        end: usize,
    ) -> CalBridgeResult<()> {
        if end == start {
            return Ok(());
        }

        let operations = self.prepare_span(start, end)?;
        match transport.apply_batch(operations) {
            Ok(results) => {
                let expected = end - start;
                if results.len() != expected {
                    warn!(
                        returned = results.len(),
                        expected, "Batch returned unexpected number of results"
                    );
                }
                for (offset, result) in results.into_iter().take(expected).enumerate() {
                    self.results[start + offset] = Some(result);
                }
                Ok(())
            }
            Err(e) if e.is_too_large() => {
                if end - start <= 1 {
                    return Err(CalBridgeError::TransactionTooLarge(e));
                }

                warn!(start, end, "Transaction too large, splitting (losing atomicity)");
                let mid = start + (end - start) / 2;
                self.run_batch(transport, start, mid)?;
                self.run_batch(transport, mid, end)
            }
            Err(e) => Err(CalBridgeError::Storage(e)),
        }
    }

    /// Copy operations `start..end` for submission.
    ///
    /// Back references to operations before `start` are replaced by the ids those
    /// operations produced; all other back references are shifted to the span.
    fn prepare_span(&self, start: usize, end: usize) -> CalBridgeResult<Vec<BatchOperation>> {
        let mut operations = Vec::with_capacity(end - start);

        for (position, queued) in self.queue[start..end].iter().enumerate() {
            let mut operation = queued.clone();
            operation.back_references.clear();

            for (column, &index) in &queued.back_references {
                if index < start {
                    let id = self
                        .results
                        .get(index)
                        .and_then(Option::as_ref)
                        .and_then(|result| result.id)
                        .ok_or(CalBridgeError::MissingResult(index))?;
                    operation.values.insert(column.clone(), Value::from(id));
                } else {
                    operation.back_references.insert(column.clone(), index - start);
                }
            }

            if self
                .max_operations_per_yield_point
                .is_some_and(|max| max > 0 && (position + 1) % max == 0)
            {
                operation.yield_allowed = true;
            }

            operations.push(operation);
        }

        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;

    /// Records submitted batches and creates ids 1, 2, 3, ...
    ///
    /// Batches with more than `max_operations` operations are rejected as too large.
    #[derive(Default)]
    struct RecordingTransport {
        batches: Vec<Vec<BatchOperation>>,
        next_id: i64,
        max_operations: Option<usize>,
    }

    impl StorageTransport for RecordingTransport {
        fn apply_batch(
            &mut self,
            operations: Vec<BatchOperation>,
        ) -> Result<Vec<OperationResult>, TransportError> {
            if let Some(limit) = self.max_operations.filter(|&limit| operations.len() > limit) {
                return Err(TransportError::TooLarge {
                    size: operations.len(),
                    limit,
                });
            }

            let results = operations
                .iter()
                .map(|operation| match operation.kind {
                    OperationKind::Insert => {
                        self.next_id += 1;
                        OperationResult::created(self.next_id)
                    }
                    _ => OperationResult::affected(2),
                })
                .collect();
            self.batches.push(operations);
            Ok(results)
        }

        fn query(
            &self,
            _target: &str,
            _selection: Option<&Selection>,
        ) -> Result<Vec<StoredRecord>, TransportError> {
            Ok(Vec::new())
        }
    }

    fn init_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn payload_size(operations: &[BatchOperation]) -> usize {
        serde_json::to_vec(operations).unwrap().len()
    }

    #[test]
    fn test_enqueue_returns_indexes() {
        let mut batch = BatchWriter::default();
        assert_eq!(batch.next_back_reference_index(), 0);
        assert_eq!(batch.enqueue(BatchOperation::insert("events")), 0);
        assert_eq!(batch.next_back_reference_index(), 1);
        assert_eq!(batch.enqueue(BatchOperation::insert("reminders")), 1);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.state(), BatchState::Queuing);
    }

    #[test]
    fn test_commit_empty_batch() {
        let mut transport = RecordingTransport::default();
        let mut batch = BatchWriter::default();
        assert_eq!(batch.commit(&mut transport).unwrap(), 0);
        assert!(transport.batches.is_empty());
    }

    #[test]
    fn test_affected_count() {
        let mut transport = RecordingTransport::default();
        let mut batch = BatchWriter::default();
        batch.enqueue(BatchOperation::insert("events"));
        batch.enqueue(BatchOperation::delete("reminders").with_selection(Selection::new("event_id", 1)));

        assert_eq!(batch.commit(&mut transport).unwrap(), 3);
        assert_eq!(batch.state(), BatchState::Done);
        assert_eq!(batch.result(0), Some(&OperationResult::created(1)));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_yield_points() {
        let mut transport = RecordingTransport::default();
        let mut batch = BatchWriter::new(Some(2));
        for _ in 0..5 {
            batch.enqueue(BatchOperation::insert("tasks"));
        }
        batch.commit(&mut transport).unwrap();

        let flags: Vec<bool> = transport.batches[0].iter().map(|op| op.yield_allowed).collect();
        assert_eq!(flags, vec![false, true, false, true, false]);
    }

    #[test]
    fn test_split_large_batch_with_back_references() {
        init_logging();
        let mut batch = BatchWriter::default();
        let main = batch.enqueue(BatchOperation::insert("events").with_value("title", "Main"));
        for n in 0..2000 {
            batch.enqueue(
                BatchOperation::insert("reminders")
                    .with_value("minutes", n)
                    .with_back_reference("event_id", main),
            );
        }

        let mut transport = MemoryTransport::with_payload_limit(20_000);
        let affected = batch.commit(&mut transport).unwrap();

        assert_eq!(affected, 2001);
        assert!(transport.transactions() > 1);

        let main_id = batch.result(main).and_then(|r| r.id).unwrap();
        let reminders = transport
            .query("reminders", Some(&Selection::new("event_id", main_id)))
            .unwrap();
        assert_eq!(reminders.len(), 2000);
    }

    #[test]
    fn test_split_shifts_back_references_within_span() {
        init_logging();
        let mut batch = BatchWriter::default();
        let main = batch.enqueue(BatchOperation::insert("events").with_value("title", "Main"));
        batch.enqueue(
            BatchOperation::insert("reminders")
                .with_value("minutes", 10)
                .with_back_reference("event_id", main),
        );
        let exception = batch.enqueue(
            BatchOperation::insert("events")
                .with_value("title", "Moved")
                .with_back_reference("original_id", main),
        );
        let reminder = batch.enqueue(
            BatchOperation::insert("reminders")
                .with_value("minutes", 5)
                .with_back_reference("event_id", exception)
                .with_back_reference("original_id", main),
        );

        let mut transport = RecordingTransport {
            max_operations: Some(2),
            ..RecordingTransport::default()
        };
        assert_eq!(batch.commit(&mut transport).unwrap(), 4);
        assert_eq!(transport.batches.len(), 2);

        let main_id = batch.result(main).and_then(|r| r.id).unwrap();
        let exception_id = batch.result(exception).and_then(|r| r.id).unwrap();
        assert_eq!((main_id, exception_id), (1, 3));

        let lower = &transport.batches[0];
        assert_eq!(lower[1].back_references, BTreeMap::from([("event_id".to_string(), 0)]));

        let upper = &transport.batches[1];
        // references below the span become ids, references inside it are shifted
        assert!(upper[0].back_references.is_empty());
        assert_eq!(upper[0].values.get("original_id"), Some(&Value::from(main_id)));
        assert_eq!(upper[1].back_references, BTreeMap::from([("event_id".to_string(), 0)]));
        assert_eq!(upper[1].values.get("original_id"), Some(&Value::from(main_id)));
        assert_eq!(batch.result(reminder), Some(&OperationResult::created(4)));
    }

    #[test]
    fn test_split_chain_resolves_to_parent_ids() {
        let mut batch = BatchWriter::default();
        let mut previous = batch.enqueue(BatchOperation::insert("events"));
        for _ in 1..6 {
            previous = batch.enqueue(
                BatchOperation::insert("events").with_back_reference("original_id", previous),
            );
        }

        let mut transport = RecordingTransport {
            max_operations: Some(2),
            ..RecordingTransport::default()
        };
        batch.commit(&mut transport).unwrap();

        // 6 -> 3 + 3 -> (1 + 2) + (1 + 2)
        let sizes: Vec<usize> = transport.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 2, 1, 2]);

        let id = |index: usize| Value::from(batch.result(index).and_then(|r| r.id).unwrap());
        let parent = |op: &BatchOperation| op.values.get("original_id").cloned();
        let reference = |op: &BatchOperation| op.back_references.get("original_id").copied();

        let batches = &transport.batches;
        assert_eq!(parent(&batches[1][0]), Some(id(0)));
        assert_eq!(reference(&batches[1][1]), Some(0));
        assert_eq!(parent(&batches[2][0]), Some(id(2)));
        assert_eq!(parent(&batches[3][0]), Some(id(3)));
        assert_eq!(reference(&batches[3][1]), Some(0));
        assert_eq!(parent(&batches[3][1]), None);
        assert_eq!(batch.result(5), Some(&OperationResult::created(6)));
    }

    #[test]
    fn test_single_oversized_operation_is_fatal() {
        init_logging();
        let mut batch = BatchWriter::default();
        batch.enqueue(BatchOperation::insert("events").with_value("description", "x".repeat(1000)));

        let mut transport = MemoryTransport::with_payload_limit(100);
        let err = batch.commit(&mut transport).unwrap_err();

        assert!(matches!(err, CalBridgeError::TransactionTooLarge(_)));
        assert!(err.is_storage_failure());
        assert_eq!(batch.state(), BatchState::Failed);
        assert_eq!(transport.transactions(), 0);
    }

    #[test]
    fn test_back_reference_to_operation_without_id() {
        let update = BatchOperation::update("events")
            .with_selection(Selection::by_id(1))
            .with_value("title", "x".repeat(200));
        let insert = BatchOperation::insert("reminders")
            .with_value("minutes", 15)
            .with_back_reference("event_id", 0);
        let limit = payload_size(std::slice::from_ref(&update))
            .max(payload_size(std::slice::from_ref(&insert)));

        let mut transport = MemoryTransport::with_payload_limit(limit);
        let mut batch = BatchWriter::default();
        batch.enqueue(update);
        batch.enqueue(insert);

        let err = batch.commit(&mut transport).unwrap_err();
        assert!(matches!(err, CalBridgeError::MissingResult(0)));
        assert_eq!(batch.state(), BatchState::PartiallyCommitted);
    }

    #[test]
    fn test_other_transport_errors_are_fatal() {
        let mut transport = MemoryTransport::default();
        transport.fail_next_batch(TransportError::Unavailable("provider died".into()));

        let mut batch = BatchWriter::default();
        batch.enqueue(BatchOperation::insert("events"));
        batch.enqueue(BatchOperation::insert("events"));

        let err = batch.commit(&mut transport).unwrap_err();
        assert!(matches!(err, CalBridgeError::Storage(TransportError::Unavailable(_))));
        assert_eq!(batch.state(), BatchState::Failed);
    }
}
