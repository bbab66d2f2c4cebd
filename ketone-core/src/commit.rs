use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::deferred::{self, Deferred, Settlement};
use crate::error::StoreError;
use crate::record::{Operation, Record};

/// Records sent together in one request.
#[derive(Debug, Clone)]
pub(crate) struct PlannedBatch {
    pub(crate) type_name: String,
    pub(crate) operation: Operation,
    pub(crate) bulk: bool,
    pub(crate) records: Vec<Record>,
}

/// Groups records for sending.
///
/// In bulk mode records of one type and operation share a batch. Types keep
/// the order of their first record; within a type creates go first, then
/// updates, then deletes. Otherwise every record gets its own batch, in
/// input order.
pub(crate) fn plan(records: Vec<(Record, Operation)>, bulk: bool) -> Vec<PlannedBatch> {
    if !bulk {
        return records
            .into_iter()
            .map(|(record, operation)| PlannedBatch {
                type_name: record.type_name().to_string(),
                operation,
                bulk: false,
                records: vec![record],
            })
            .collect();
    }

    let mut groups: IndexMap<String, [Vec<Record>; 3]> = IndexMap::new();
    for (record, operation) in records {
        let slot = match operation {
            Operation::Create => 0,
            Operation::Update => 1,
            Operation::Delete => 2,
        };
        groups.entry(record.type_name().to_string()).or_default()[slot].push(record);
    }

    let mut batches = Vec::new();
    for (type_name, slots) in groups {
        let operations = [Operation::Create, Operation::Update, Operation::Delete];
        for (operation, records) in operations.into_iter().zip(slots) {
            if records.is_empty() {
                continue;
            }
            batches.push(PlannedBatch {
                type_name: type_name.clone(),
                operation,
                bulk: true,
                records,
            });
        }
    }
    batches
}

/// Handle to one `commit()` call. Settles once every batch has finished:
/// resolved if all succeeded, rejected with the first failure otherwise.
#[derive(Clone)]
pub struct Commit {
    inner: Arc<Mutex<CommitProgress>>,
}

struct CommitProgress {
    batch_count: usize,
    remaining: usize,
    first_error: Option<StoreError>,
    ready: Deferred,
}

impl Commit {
    pub(crate) fn new(batch_count: usize) -> Self {
        let mut progress = CommitProgress {
            batch_count,
            remaining: batch_count,
            first_error: None,
            ready: Deferred::default(),
        };
        if batch_count == 0 {
            progress.ready.settle(Ok(()));
        }
        Commit {
            inner: Arc::new(Mutex::new(progress)),
        }
    }

    /// Number of requests this commit sent.
    pub fn batch_count(&self) -> usize {
        self.inner.lock().batch_count
    }

    pub fn is_settled(&self) -> bool {
        self.inner.lock().ready.is_settled()
    }

    pub fn settlement(&self) -> Settlement {
        self.inner.lock().ready.settlement()
    }

    pub fn on_settled(&self, callback: impl FnOnce(&Result<(), StoreError>) + Send + 'static) {
        deferred::on_settled_with(|w| self.inner.lock().ready.register(w), callback)
    }

    pub async fn settled(&self) -> Result<(), StoreError> {
        deferred::settled_with(|w| self.inner.lock().ready.register(w)).await
    }

    pub(crate) fn batch_finished(&self, outcome: Result<(), StoreError>) {
        let fired = {
            let mut progress = self.inner.lock();
            if let Err(err) = outcome {
                progress.first_error.get_or_insert(err);
            }
            progress.remaining = progress.remaining.saturating_sub(1);
            if progress.remaining > 0 {
                return;
            }
            let outcome = match progress.first_error.clone() {
                Some(err) => Err(err),
                None => Ok(()),
            };
            progress.ready.settle(outcome)
        };
        deferred::fire_all(fired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::RecordId;
    use crate::record::RecordState;
    use crate::schema::TypeDescriptor;
    use std::sync::Weak;

    fn record(client_id: u64, type_name: &str) -> Record {
        Record::new(
            client_id,
            Arc::new(TypeDescriptor::new(type_name)),
            Weak::new(),
            Some(RecordId::from(client_id as i64)),
            RecordState::Loaded,
        )
    }

    #[test]
    fn single_mode_keeps_input_order() {
        let a = record(1, "person");
        let b = record(2, "group");
        let batches = plan(
            vec![(a.clone(), Operation::Delete), (b.clone(), Operation::Create)],
            false,
        );
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].records, vec![a]);
        assert_eq!(batches[0].operation, Operation::Delete);
        assert!(!batches[0].bulk);
        assert_eq!(batches[1].records, vec![b]);
    }

    #[test]
    fn bulk_mode_groups_by_type_then_operation() {
        let p1 = record(1, "person");
        let g1 = record(2, "group");
        let p2 = record(3, "person");
        let p3 = record(4, "person");
        let batches = plan(
            vec![
                (p1.clone(), Operation::Delete),
                (g1.clone(), Operation::Update),
                (p2.clone(), Operation::Create),
                (p3.clone(), Operation::Delete),
            ],
            true,
        );
        let summary: Vec<_> = batches
            .iter()
            .map(|b| (b.type_name.as_str(), b.operation, b.records.len()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("person", Operation::Create, 1),
                ("person", Operation::Delete, 2),
                ("group", Operation::Update, 1),
            ]
        );
        assert_eq!(batches[1].records, vec![p1, p3]);
    }

    #[test]
    fn commit_settles_after_every_batch() {
        let commit = Commit::new(2);
        commit.batch_finished(Err(StoreError::Protocol("first".into())));
        assert!(!commit.is_settled());
        commit.batch_finished(Err(StoreError::Protocol("second".into())));
        assert_eq!(
            commit.settlement(),
            Settlement::Rejected(StoreError::Protocol("first".into()))
        );
    }

    #[test]
    fn empty_commit_is_settled() {
        let commit = Commit::new(0);
        assert_eq!(commit.batch_count(), 0);
        assert_eq!(commit.settlement(), Settlement::Resolved);
    }
}
