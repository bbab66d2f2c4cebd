use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::deferred::{self, Deferred, Fired, Settlement};
use crate::error::StoreError;
use crate::id::RecordId;
use crate::record::{Record, RecordInner};
use crate::store::{Store, StoreShared};

pub(crate) type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Where the members of a collection come from.
pub(crate) enum Source {
    /// Every record the find-all requests for the type returned.
    All,
    Query(Value),
    /// A fixed list of references.
    Many,
    /// An opaque relationship token.
    Reference,
    Filter(Predicate),
}

/// An ordered, in-place updated list of records.
///
/// Handles are returned before the backing request finishes; members are
/// appended as responses arrive. Clones share the same list.
#[derive(Clone)]
pub struct LiveCollection {
    pub(crate) inner: Arc<CollectionInner>,
}

pub(crate) struct CollectionInner {
    type_name: String,
    source: Source,
    store: Weak<StoreShared>,
    state: Mutex<CollectionState>,
}

#[derive(Default)]
struct CollectionState {
    records: Vec<Record>,
    owner: Option<Weak<RecordInner>>,
    name: Option<String>,
    polymorphic: bool,
    ready: Deferred,
}

impl LiveCollection {
    pub(crate) fn new(type_name: &str, source: Source, store: Weak<StoreShared>) -> Self {
        LiveCollection {
            inner: Arc::new(CollectionInner {
                type_name: type_name.to_string(),
                source,
                store,
                state: Mutex::new(CollectionState::default()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<CollectionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<CollectionInner>) -> Option<LiveCollection> {
        weak.upgrade().map(|inner| LiveCollection { inner })
    }

    pub(crate) fn source(&self) -> &Source {
        &self.inner.source
    }

    pub(crate) fn predicate(&self) -> Option<Predicate> {
        match &self.inner.source {
            Source::Filter(predicate) => Some(Arc::clone(predicate)),
            _ => None,
        }
    }

    /// Attaches relationship metadata.
    pub(crate) fn tag(&self, owner: &Record, name: &str, polymorphic: bool) {
        let mut state = self.inner.state.lock();
        state.owner = Some(owner.downgrade());
        state.name = Some(name.to_string());
        state.polymorphic = polymorphic;
    }

    /// Appends records that are not members yet, keeping their order.
    pub(crate) fn merge(&self, records: &[Record]) {
        let mut state = self.inner.state.lock();
        for record in records {
            if !state.records.contains(record) {
                state.records.push(record.clone());
            }
        }
    }

    pub(crate) fn push(&self, record: Record) {
        self.merge(std::slice::from_ref(&record));
    }

    pub(crate) fn remove(&self, record: &Record) {
        self.inner.state.lock().records.retain(|member| member != record);
    }

    pub(crate) fn settle(&self, outcome: Result<(), StoreError>) -> Option<Fired> {
        self.inner.state.lock().ready.settle(outcome)
    }

    /// Marks a new request round; waiters registered from now on wait for it.
    pub(crate) fn begin_round(&self) {
        self.inner.state.lock().ready.reset();
    }

    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.inner.state.lock().records.get(index).cloned()
    }

    pub fn first(&self) -> Option<Record> {
        self.get(0)
    }

    pub fn last(&self) -> Option<Record> {
        self.inner.state.lock().records.last().cloned()
    }

    /// Current members, in order.
    pub fn to_vec(&self) -> Vec<Record> {
        self.inner.state.lock().records.clone()
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.inner.state.lock().records.contains(record)
    }

    /// Ids of the members that have one.
    pub fn ids(&self) -> Vec<RecordId> {
        self.to_vec().iter().filter_map(Record::id).collect()
    }

    /// The record owning this collection, for relationship collections.
    pub fn owner(&self) -> Option<Record> {
        let owner = self.inner.state.lock().owner.clone()?;
        Record::upgrade(&owner)
    }

    /// Relationship name, for relationship collections.
    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.inner.state.lock().polymorphic
    }

    /// True once the latest request round succeeded.
    pub fn is_loaded(&self) -> bool {
        self.settlement() == Settlement::Resolved
    }

    pub fn settlement(&self) -> Settlement {
        self.inner.state.lock().ready.settlement()
    }

    pub fn on_settled(&self, callback: impl FnOnce(&Result<(), StoreError>) + Send + 'static) {
        deferred::on_settled_with(|w| self.inner.state.lock().ready.register(w), callback)
    }

    pub async fn settled(&self) -> Result<(), StoreError> {
        deferred::settled_with(|w| self.inner.state.lock().ready.register(w)).await
    }

    /// Re-issues the request behind a find-all or query collection and merges
    /// the results. Existing members are never removed.
    pub fn update(&self) -> Result<(), StoreError> {
        let store = self
            .inner
            .store
            .upgrade()
            .map(Store::from_shared)
            .ok_or(StoreError::Detached)?;
        store.refresh(self)
    }
}

impl PartialEq for LiveCollection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LiveCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LiveCollection")
            .field("type", &self.inner.type_name)
            .field("len", &state.records.len())
            .field("name", &state.name)
            .field("settlement", &state.ready.settlement())
            .finish()
    }
}
