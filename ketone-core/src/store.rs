use parking_lot::{Mutex, ReentrantMutex};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::adapter::{Adapter, CommitBatch, Completion, FindRequest};
use crate::collection::{CollectionInner, LiveCollection, Predicate, Source};
use crate::commit::{self, Commit};
use crate::deferred::{self, Fired};
use crate::error::{Failure, SchemaError, StoreError};
use crate::id::RecordId;
use crate::identity::IdentityMap;
use crate::record::{Operation, Record, RecordState};
use crate::relationship::{HasManyRef, Reference};
use crate::schema::{RelationshipKind, TypeDescriptor, TypeRegistry};
use crate::serializer::{Extracted, Normalized, Primary, Shape};

/// The record store.
///
/// Owns the identity map and drives the adapter. Handles are cheap to clone
/// and share one store.
///
/// Every response is applied under a store-wide lock, in this order:
/// sideloaded collections, then primary data, then state changes, then
/// filters, then settlement callbacks. Callbacks may call back into the
/// store.
#[derive(Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

pub(crate) struct StoreShared {
    registry: TypeRegistry,
    adapter: Box<dyn Adapter>,
    identity: Mutex<IdentityMap>,
    find_all: Mutex<HashMap<String, LiveCollection>>,
    filters: Mutex<Vec<(String, Weak<CollectionInner>)>>,
    apply: ReentrantMutex<()>,
    next_client_id: AtomicU64,
}

/// Touched records and detached waiters collected while applying a response.
#[derive(Default)]
struct Applied {
    touched: Vec<Record>,
    fired: Vec<Fired>,
}

impl Applied {
    fn fire(&mut self, fired: Option<Fired>) {
        self.fired.extend(fired);
    }
}

impl Store {
    /// Creates a store after checking that every relationship target is
    /// registered.
    pub fn new(registry: TypeRegistry, adapter: impl Adapter + 'static) -> Result<Self, SchemaError> {
        registry.validate()?;
        Ok(Store {
            shared: Arc::new(StoreShared {
                registry,
                adapter: Box::new(adapter),
                identity: Mutex::new(IdentityMap::default()),
                find_all: Mutex::new(HashMap::new()),
                filters: Mutex::new(Vec::new()),
                apply: ReentrantMutex::new(()),
                next_client_id: AtomicU64::new(1),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<StoreShared>) -> Self {
        Store { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreShared> {
        Arc::downgrade(&self.shared)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.shared.registry
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.shared.adapter.as_ref()
    }

    fn descriptor(&self, type_name: &str) -> Result<Arc<TypeDescriptor>, StoreError> {
        Ok(Arc::clone(self.shared.registry.get(type_name)?))
    }

    fn new_record(
        &self,
        descriptor: Arc<TypeDescriptor>,
        id: Option<RecordId>,
        state: RecordState,
    ) -> Record {
        let client_id = self.shared.next_client_id.fetch_add(1, Ordering::Relaxed);
        Record::new(client_id, descriptor, self.downgrade(), id, state)
    }

    /// Creates a new, unsaved record.
    ///
    /// `properties` is a JSON object keyed by record-space names. Attributes
    /// take values; belongs-to relationships take an id (or `{"id", "type"}`
    /// when polymorphic); has-many relationships take a list of those. An
    /// `id` key assigns a client-side id.
    pub fn create_record(&self, type_name: &str, properties: Value) -> Result<Record, StoreError> {
        let descriptor = self.descriptor(type_name)?;
        let properties = match properties {
            Value::Null => Map::new(),
            Value::Object(properties) => properties,
            _ => return Err(StoreError::Unsupported("record properties must be a JSON object")),
        };
        let normalized = properties_to_normalized(&descriptor, properties)?;
        let record = self.new_record(descriptor, normalized.id.clone(), RecordState::New);
        {
            let mut identity = self.shared.identity.lock();
            if let Some(id) = &normalized.id {
                if identity.get(type_name, id).is_some() {
                    return Err(StoreError::Unsupported("a record with this id already exists"));
                }
                identity.insert(type_name, id.clone(), &record);
            }
            identity.track(&record);
        }
        deferred::fire_all(record.apply_load(&normalized));
        log::debug!("created {} record {}", type_name, record.client_id());
        self.record_changed(&record);
        Ok(record)
    }

    /// Returns the record for (type, id), fetching it if it is not in the
    /// store. A record that is still loading is returned as is; no second
    /// request is made.
    pub fn find(&self, type_name: &str, id: impl Into<RecordId>) -> Result<Record, StoreError> {
        let id = id.into();
        let (record, created) = self.find_or_shell(type_name, id.clone())?;
        if created {
            let store = self.downgrade();
            let shell = record.clone();
            let requested = id.clone();
            self.adapter_find(
                type_name,
                FindRequest::One(id),
                Box::new(move |result| {
                    if let Some(shared) = store.upgrade() {
                        Store::from_shared(shared).apply_find_one(&shell, &requested, result);
                    }
                }),
            )?;
        }
        Ok(record)
    }

    /// The record for (type, id) if the store has it. Never fetches.
    pub fn peek(&self, type_name: &str, id: impl Into<RecordId>) -> Option<Record> {
        self.shared.identity.lock().get(type_name, &id.into())
    }

    /// Fetches every record of a type into a live collection.
    ///
    /// The collection is shared by every call for the type; each call
    /// issues a new request, carrying the last since token, and merges the
    /// results.
    pub fn find_all(&self, type_name: &str) -> Result<LiveCollection, StoreError> {
        self.descriptor(type_name)?;
        let collection = self
            .shared
            .find_all
            .lock()
            .entry(type_name.to_string())
            .or_insert_with(|| LiveCollection::new(type_name, Source::All, self.downgrade()))
            .clone();
        self.fetch_collection(&collection, FindRequest::All)?;
        Ok(collection)
    }

    /// Fetches the records matching a query. The query is sent verbatim as
    /// request data.
    pub fn find_query(&self, type_name: &str, query: Value) -> Result<LiveCollection, StoreError> {
        self.descriptor(type_name)?;
        let collection =
            LiveCollection::new(type_name, Source::Query(query.clone()), self.downgrade());
        self.fetch_collection(&collection, FindRequest::Query(query))?;
        Ok(collection)
    }

    /// Returns the records for `ids`, in that order, fetching the missing ones
    /// with a single request.
    pub fn find_many<I>(&self, type_name: &str, ids: I) -> Result<LiveCollection, StoreError>
    where
        I: IntoIterator,
        I::Item: Into<RecordId>,
    {
        self.descriptor(type_name)?;
        let references = ids
            .into_iter()
            .map(|id| Reference::new(type_name, id))
            .collect();
        self.find_references(type_name, references)
    }

    /// Loads server data without a request. `raw` is in wire form and must
    /// carry an id.
    pub fn load(&self, type_name: &str, raw: Value) -> Result<Record, StoreError> {
        let mut records = self.load_many(type_name, vec![raw])?;
        records.pop().ok_or(StoreError::MissingId(type_name.to_string()))
    }

    pub fn load_many(&self, type_name: &str, raws: Vec<Value>) -> Result<Vec<Record>, StoreError> {
        let descriptor = self.descriptor(type_name)?;
        let serializer = self.shared.adapter.serializer();
        let entities = raws
            .iter()
            .map(|raw| serializer.normalize(&descriptor, raw))
            .collect::<Result<Vec<_>, _>>()?;
        if entities.iter().any(|e| e.id.is_none()) {
            return Err(StoreError::MissingId(type_name.to_string()));
        }

        let _apply = self.shared.apply.lock();
        let mut applied = Applied::default();
        let records = entities
            .iter()
            .map(|entity| self.ingest(&descriptor, entity, &mut applied))
            .collect();
        self.finish(applied);
        Ok(records)
    }

    /// A live collection of every loaded, non-deleted record of a type.
    pub fn all(&self, type_name: &str) -> Result<LiveCollection, StoreError> {
        self.filter(type_name, |_| true)
    }

    /// A live collection of the loaded, non-deleted records of a type that
    /// match `predicate`.
    ///
    /// The predicate is re-run whenever a record of the type is created,
    /// loaded, or changed locally. It runs without store locks held.
    pub fn filter(
        &self,
        type_name: &str,
        predicate: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Result<LiveCollection, StoreError> {
        self.descriptor(type_name)?;
        let predicate: Predicate = Arc::new(predicate);
        let collection = LiveCollection::new(
            type_name,
            Source::Filter(Arc::clone(&predicate)),
            self.downgrade(),
        );
        let candidates = self.shared.identity.lock().records_of(type_name);
        let matching: Vec<Record> = candidates
            .into_iter()
            .filter(|record| filterable(record) && predicate(record))
            .collect();
        collection.merge(&matching);
        self.shared
            .filters
            .lock()
            .push((type_name.to_string(), collection.downgrade()));
        deferred::fire_all(collection.settle(Ok(())));
        Ok(collection)
    }

    /// Sends every new, dirty, and deleted record to the adapter.
    ///
    /// Records that are already saving are skipped. Invalid and errored
    /// records are sent again with their pending operation.
    pub fn commit(&self) -> Commit {
        let records = self.shared.identity.lock().all();
        let picked: Vec<(Record, Operation)> = records
            .into_iter()
            .filter_map(|record| record.begin_commit().map(|operation| (record, operation)))
            .collect();
        let batches = commit::plan(picked, self.shared.adapter.bulk_commit());
        let handle = Commit::new(batches.len());
        log::debug!("committing {} batch(es)", batches.len());

        for batch in batches {
            let Some(descriptor) = batch.records.first().map(|r| Arc::clone(r.descriptor())) else {
                handle.batch_finished(Ok(()));
                continue;
            };
            log::debug!(
                "sending {:?} of {} {} record(s)",
                batch.operation,
                batch.records.len(),
                batch.type_name
            );
            let request = CommitBatch {
                operation: batch.operation,
                bulk: batch.bulk,
                snapshots: batch.records.iter().map(Record::snapshot).collect(),
            };
            let store = self.downgrade();
            let finished = handle.clone();
            let target = Arc::clone(&descriptor);
            let records = batch.records;
            let operation = batch.operation;
            let bulk = batch.bulk;
            self.shared.adapter.commit(
                &descriptor,
                request,
                Box::new(move |result| match store.upgrade() {
                    Some(shared) => Store::from_shared(shared)
                        .apply_commit(&target, operation, bulk, &records, result, &finished),
                    None => finished.batch_finished(Err(StoreError::Detached)),
                }),
            );
        }
        handle
    }

    /// Removes a record from the store and from every collection the store
    /// maintains. Loading and saving records cannot be unloaded.
    pub fn unload(&self, record: &Record) -> Result<(), StoreError> {
        let state = record.state();
        if matches!(state, RecordState::Loading | RecordState::Saving) {
            return Err(StoreError::InvalidTransition {
                state,
                event: "unload",
            });
        }
        self.shared.identity.lock().remove(record);
        let collections: Vec<LiveCollection> = {
            let mut collections: Vec<LiveCollection> =
                self.shared.find_all.lock().values().cloned().collect();
            collections.extend(
                self.shared
                    .filters
                    .lock()
                    .iter()
                    .filter_map(|(_, weak)| LiveCollection::upgrade(weak)),
            );
            collections
        };
        for collection in collections {
            collection.remove(record);
        }
        record.clear_resolved();
        log::debug!("unloaded {} record {}", record.type_name(), record.client_id());
        Ok(())
    }

    /// Re-runs filters for a record changed outside a response.
    pub(crate) fn record_changed(&self, record: &Record) {
        self.refresh_filters(std::slice::from_ref(record));
    }

    pub(crate) fn find_or_shell(
        &self,
        type_name: &str,
        id: RecordId,
    ) -> Result<(Record, bool), StoreError> {
        let descriptor = self.descriptor(type_name)?;
        let mut identity = self.shared.identity.lock();
        if let Some(existing) = identity.get(type_name, &id) {
            return Ok((existing, false));
        }
        let shell = self.new_record(descriptor, Some(id.clone()), RecordState::Loading);
        identity.track(&shell);
        identity.insert(type_name, id, &shell);
        Ok((shell, true))
    }

    pub(crate) fn adapter_find(
        &self,
        type_name: &str,
        request: FindRequest,
        complete: Completion,
    ) -> Result<(), StoreError> {
        let descriptor = self.descriptor(type_name)?;
        self.shared.adapter.find(&descriptor, request, complete);
        Ok(())
    }

    /// Starts a request round for a collection.
    pub(crate) fn fetch_collection(
        &self,
        collection: &LiveCollection,
        request: FindRequest,
    ) -> Result<(), StoreError> {
        collection.begin_round();
        let store = self.downgrade();
        let target = collection.clone();
        self.adapter_find(
            collection.type_name(),
            request,
            Box::new(move |result| {
                if let Some(shared) = store.upgrade() {
                    Store::from_shared(shared).apply_find_collection(&target, result);
                }
            }),
        )
    }

    pub(crate) fn refresh(&self, collection: &LiveCollection) -> Result<(), StoreError> {
        let request = match collection.source() {
            Source::All => FindRequest::All,
            Source::Query(query) => FindRequest::Query(query.clone()),
            _ => {
                return Err(StoreError::Unsupported(
                    "only find-all and query collections can be updated",
                ));
            }
        };
        self.fetch_collection(collection, request)
    }

    fn extract(
        &self,
        descriptor: &TypeDescriptor,
        shape: Shape,
        result: Result<Option<Value>, Failure>,
    ) -> Result<Option<Extracted>, StoreError> {
        match result {
            Err(failure) => Err(failure.into_store_error()),
            Ok(None) => Ok(None),
            Ok(Some(json)) => self
                .shared
                .adapter
                .serializer()
                .extract(&self.shared.registry, descriptor, shape, &json)
                .map(Some),
        }
    }

    /// Loads one entity into the identity map, creating the record if needed.
    /// The entity must have an id.
    fn ingest(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        entity: &Normalized,
        applied: &mut Applied,
    ) -> Record {
        let record = {
            let mut identity = self.shared.identity.lock();
            let existing = entity
                .id
                .as_ref()
                .and_then(|id| identity.get(descriptor.name(), id));
            match existing {
                Some(record) => record,
                None => {
                    let record = self.new_record(
                        Arc::clone(descriptor),
                        entity.id.clone(),
                        RecordState::Loaded,
                    );
                    identity.track(&record);
                    if let Some(id) = &entity.id {
                        identity.insert(descriptor.name(), id.clone(), &record);
                    }
                    record
                }
            }
        };
        applied.fire(record.apply_load(entity));
        applied.touched.push(record.clone());
        record
    }

    fn ingest_sideloads(&self, extracted: &Extracted, applied: &mut Applied) {
        for (descriptor, entities) in &extracted.sideloads {
            log::debug!("sideloading {} {} record(s)", entities.len(), descriptor.name());
            for entity in entities {
                self.ingest(descriptor, entity, applied);
            }
        }
    }

    fn apply_find_one(&self, shell: &Record, requested: &RecordId, result: Result<Option<Value>, Failure>) {
        let _apply = self.shared.apply.lock();
        let mut applied = Applied::default();
        let descriptor = Arc::clone(shell.descriptor());
        let outcome = self
            .extract(&descriptor, Shape::One, result)
            .and_then(|extracted| {
                let extracted = extracted.ok_or_else(|| empty_response(&descriptor))?;
                let Primary::One(entity) = &extracted.primary else {
                    return Err(missing_root(descriptor.name()));
                };
                self.ingest_sideloads(&extracted, &mut applied);
                if let Some(id) = entity.id.clone().filter(|id| id != requested) {
                    self.bind_alias(shell, requested, id);
                }
                applied.fire(shell.apply_load(entity));
                applied.touched.push(shell.clone());
                Ok(())
            });
        if let Err(err) = outcome {
            log_failure("find", descriptor.name(), &err);
            applied.fire(shell.fail_load(err));
        }
        self.finish(applied);
    }

    /// The server answered a find for `alias` with the record `id`.
    fn bind_alias(&self, shell: &Record, alias: &RecordId, id: RecordId) {
        let mut identity = self.shared.identity.lock();
        match identity.get(shell.type_name(), &id) {
            Some(existing) if existing != *shell => {
                log::warn!(
                    "{} `{}` resolved to id {} which is already taken by another record",
                    shell.type_name(),
                    alias,
                    id
                );
            }
            _ => {
                log::debug!("{} `{}` is an alias of {}", shell.type_name(), alias, id);
                identity.insert(shell.type_name(), id.clone(), shell);
            }
        }
        drop(identity);
        shell.assign_id(id);
    }

    pub(crate) fn apply_find_many(
        &self,
        type_name: &str,
        shells: &[Record],
        result: Result<Option<Value>, Failure>,
    ) {
        let _apply = self.shared.apply.lock();
        let mut applied = Applied::default();
        let outcome = self.descriptor(type_name).and_then(|descriptor| {
            let extracted = self
                .extract(&descriptor, Shape::Many, result)?
                .ok_or_else(|| empty_response(&descriptor))?;
            let Primary::Many(entities) = &extracted.primary else {
                return Err(missing_root(&self.shared.adapter.serializer().plural_root(type_name)));
            };
            require_ids(type_name, entities)?;
            self.ingest_sideloads(&extracted, &mut applied);
            for entity in entities {
                self.ingest(&descriptor, entity, &mut applied);
            }
            Ok(())
        });
        let error = match outcome {
            Ok(()) => None,
            Err(err) => {
                log_failure("find-many", type_name, &err);
                Some(err)
            }
        };
        for shell in shells {
            let err = error.clone().unwrap_or_else(|| {
                StoreError::Protocol(format!(
                    "{} {} missing from the response",
                    type_name,
                    shell.id().map(|id| id.to_string()).unwrap_or_default()
                ))
            });
            applied.fire(shell.fail_load(err));
        }
        self.finish(applied);
    }

    fn apply_find_collection(&self, collection: &LiveCollection, result: Result<Option<Value>, Failure>) {
        let _apply = self.shared.apply.lock();
        let mut applied = Applied::default();
        let type_name = collection.type_name().to_string();
        let outcome = self.descriptor(&type_name).and_then(|descriptor| {
            let extracted = self
                .extract(&descriptor, Shape::Many, result)?
                .ok_or_else(|| empty_response(&descriptor))?;
            let Primary::Many(entities) = &extracted.primary else {
                return Err(missing_root(&self.shared.adapter.serializer().plural_root(&type_name)));
            };
            require_ids(&type_name, entities)?;
            self.ingest_sideloads(&extracted, &mut applied);
            let records: Vec<Record> = entities
                .iter()
                .map(|entity| self.ingest(&descriptor, entity, &mut applied))
                .collect();
            log::debug!("{} {} record(s) arrived for a collection", records.len(), type_name);
            collection.merge(&records);
            Ok(())
        });
        if let Err(err) = &outcome {
            log_failure("collection fetch", &type_name, err);
        }
        applied.fire(collection.settle(outcome));
        self.finish(applied);
    }

    fn apply_commit(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        operation: Operation,
        bulk: bool,
        records: &[Record],
        result: Result<Option<Value>, Failure>,
        handle: &Commit,
    ) {
        let _apply = self.shared.apply.lock();
        let mut applied = Applied::default();
        let outcome = match result {
            Err(Failure::Invalid(wire)) => {
                let errors = self
                    .shared
                    .adapter
                    .serializer()
                    .errors_to_record_space(descriptor, wire);
                log::debug!("{} commit rejected: {:?}", descriptor.name(), errors);
                for record in records {
                    applied.fire(record.commit_invalid(errors.clone()));
                }
                Err(StoreError::Validation(errors))
            }
            result => {
                let outcome = self
                    .extract(descriptor, if bulk { Shape::Many } else { Shape::One }, result)
                    .and_then(|extracted| {
                        self.apply_commit_response(descriptor, operation, records, extracted, &mut applied)
                    });
                if let Err(err) = &outcome {
                    log_failure("commit", descriptor.name(), err);
                    for record in records {
                        applied.fire(record.commit_failed(err.clone()));
                    }
                }
                outcome
            }
        };
        applied.touched.extend(records.iter().cloned());
        self.finish(applied);
        handle.batch_finished(outcome);
    }

    /// Matches a successful commit response to the batch and applies it.
    /// Nothing is changed unless the whole response is usable.
    fn apply_commit_response(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        operation: Operation,
        records: &[Record],
        extracted: Option<Extracted>,
        applied: &mut Applied,
    ) -> Result<(), StoreError> {
        let type_name = descriptor.name();
        let primary = extracted
            .as_ref()
            .map(|e| e.primary.clone())
            .unwrap_or(Primary::Absent);
        let entities: Vec<Option<Normalized>> = match (operation, primary) {
            (Operation::Delete, _) | (Operation::Update, Primary::Absent) => {
                vec![None; records.len()]
            }
            (Operation::Create, Primary::Absent) => return Err(missing_root(type_name)),
            (_, Primary::One(entity)) => {
                if operation == Operation::Create && entity.id.is_none() {
                    return Err(StoreError::Protocol(format!("created {type_name} has no id")));
                }
                let mut entities = vec![None; records.len()];
                if let Some(first) = entities.first_mut() {
                    *first = Some(entity);
                }
                entities
            }
            (Operation::Create, Primary::Many(entities)) => {
                if entities.len() != records.len() {
                    return Err(StoreError::Protocol(format!(
                        "sent {} {} record(s), {} came back",
                        records.len(),
                        type_name,
                        entities.len()
                    )));
                }
                require_ids(type_name, &entities)?;
                entities.into_iter().map(Some).collect()
            }
            (Operation::Update, Primary::Many(entities)) => records
                .iter()
                .map(|record| {
                    let id = record.id();
                    entities.iter().find(|e| e.id.is_some() && e.id == id).cloned()
                })
                .collect(),
        };

        if let Some(extracted) = &extracted {
            self.ingest_sideloads(extracted, applied);
        }
        for (record, entity) in records.iter().zip(entities) {
            let created = operation == Operation::Create;
            applied.fire(record.commit_succeeded(entity.as_ref()));
            if created {
                self.bind_created(record);
            }
        }
        Ok(())
    }

    /// Makes a freshly created record reachable by its new id.
    fn bind_created(&self, record: &Record) {
        let Some(id) = record.id() else {
            return;
        };
        let displaced = self
            .shared
            .identity
            .lock()
            .insert(record.type_name(), id.clone(), record);
        if let Some(displaced) = displaced {
            log::warn!(
                "created {} {} replaces record {} in the identity map",
                record.type_name(),
                id,
                displaced.client_id()
            );
        }
    }

    /// Runs filters over the touched records, then fires waiters.
    fn finish(&self, applied: Applied) {
        self.refresh_filters(&applied.touched);
        deferred::fire_all(applied.fired);
    }

    fn refresh_filters(&self, records: &[Record]) {
        let filters: Vec<(String, LiveCollection)> = {
            let mut filters = self.shared.filters.lock();
            filters.retain(|(_, weak)| weak.strong_count() > 0);
            filters
                .iter()
                .filter_map(|(type_name, weak)| {
                    LiveCollection::upgrade(weak).map(|c| (type_name.clone(), c))
                })
                .collect()
        };
        if filters.is_empty() {
            return;
        }
        let mut seen = HashSet::new();
        for record in records {
            if !seen.insert(record.client_id()) {
                continue;
            }
            for (type_name, collection) in &filters {
                if type_name != record.type_name() {
                    continue;
                }
                let Some(predicate) = collection.predicate() else {
                    continue;
                };
                if filterable(record) && predicate(record) {
                    collection.push(record.clone());
                } else {
                    collection.remove(record);
                }
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("types", &self.shared.registry.types().map(|d| d.name().to_string()).collect::<Vec<_>>())
            .field("bulk_commit", &self.shared.adapter.bulk_commit())
            .finish()
    }
}

impl Drop for StoreShared {
    fn drop(&mut self) {
        // Resolved relationships hold records strongly and can form cycles.
        for record in self.identity.get_mut().clear() {
            record.clear_resolved();
        }
    }
}

fn filterable(record: &Record) -> bool {
    record.state() != RecordState::Loading && !record.is_deleted()
}

fn require_ids(type_name: &str, entities: &[Normalized]) -> Result<(), StoreError> {
    match entities.iter().position(|e| e.id.is_none()) {
        Some(index) => Err(StoreError::Protocol(format!(
            "{type_name} entry {index} has no id"
        ))),
        None => Ok(()),
    }
}

fn missing_root(root: &str) -> StoreError {
    StoreError::Protocol(format!("response has no `{root}` root"))
}

fn empty_response(descriptor: &TypeDescriptor) -> StoreError {
    StoreError::Protocol(format!("empty response for {}", descriptor.name()))
}

fn log_failure(action: &str, type_name: &str, err: &StoreError) {
    match err {
        StoreError::Protocol(_) => log::error!("{action} for {type_name} failed: {err}"),
        _ => log::debug!("{action} for {type_name} failed: {err}"),
    }
}

/// Converts `create_record` properties to record space.
fn properties_to_normalized(
    descriptor: &TypeDescriptor,
    properties: Map<String, Value>,
) -> Result<Normalized, StoreError> {
    let mut normalized = Normalized::new(None);
    for (key, value) in properties {
        if key == "id" {
            normalized.id = match &value {
                Value::Null => None,
                other => Some(RecordId::from_json(other).ok_or_else(|| StoreError::Decode {
                    field: key.clone(),
                    message: format!("{other} is not an id"),
                })?),
            };
            continue;
        }
        if let Some(attribute) = descriptor.get_attribute(&key) {
            normalized
                .attributes
                .insert(key, attribute.codec.deserialize(&value));
            continue;
        }
        let Some(relationship) = descriptor.get_relationship(&key) else {
            return Err(StoreError::UnknownAttribute {
                type_name: descriptor.name().to_string(),
                attribute: key,
            });
        };
        let reference = |value: &Value| -> Result<Reference, StoreError> {
            let (id, type_name) = match value {
                Value::Object(object) => (
                    object.get("id").and_then(RecordId::from_json),
                    object.get("type").and_then(Value::as_str).map(str::to_string),
                ),
                scalar => (RecordId::from_json(scalar), None),
            };
            let type_name = match (type_name, relationship.polymorphic) {
                (Some(type_name), _) => type_name,
                (None, false) => relationship.target.clone(),
                (None, true) => {
                    return Err(StoreError::Decode {
                        field: relationship.name.clone(),
                        message: "polymorphic references need a type".to_string(),
                    });
                }
            };
            let id = id.ok_or_else(|| StoreError::Decode {
                field: relationship.name.clone(),
                message: format!("{value} is not an id"),
            })?;
            Ok(Reference::new(type_name, id))
        };
        match relationship.kind {
            RelationshipKind::BelongsTo => {
                let target = match &value {
                    Value::Null => None,
                    other => Some(reference(other)?),
                };
                normalized.belongs_to.insert(key, target);
            }
            RelationshipKind::HasMany => {
                let items = match &value {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items.iter().map(&reference).collect::<Result<_, _>>()?,
                    other => {
                        return Err(StoreError::Decode {
                            field: key,
                            message: format!("{other} is not a list of ids"),
                        });
                    }
                };
                normalized.has_many.insert(key, HasManyRef::Ids(items));
            }
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RestAdapter;
    use crate::config::AdapterConfig;
    use crate::schema::Codec;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    fn setup() -> (Arc<MemoryTransport>, Store) {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                TypeDescriptor::new("person")
                    .attr("name", Codec::String)
                    .belongs_to("group", "group"),
            )
            .register(
                TypeDescriptor::new("group")
                    .attr("name", Codec::String)
                    .has_many("people", "person"),
            );
        let transport = Arc::new(MemoryTransport::new());
        let adapter = RestAdapter::new(
            Arc::clone(&transport),
            AdapterConfig::new().with_plural("person", "people"),
        );
        let store = Store::new(registry, adapter).unwrap();
        (transport, store)
    }

    #[test]
    fn unknown_types_are_rejected() {
        let (_, store) = setup();
        assert!(matches!(
            store.find("robot", 1),
            Err(StoreError::Schema(SchemaError::UnknownType(_)))
        ));
    }

    #[test]
    fn registry_is_validated() {
        let mut registry = TypeRegistry::new();
        registry.register(TypeDescriptor::new("person").belongs_to("group", "group"));
        let adapter = RestAdapter::new(MemoryTransport::new(), AdapterConfig::new());
        assert!(Store::new(registry, adapter).is_err());
    }

    #[test]
    fn create_record_accepts_relationship_ids() {
        let (_, store) = setup();
        let person = store
            .create_record("person", json!({"name": "Tom", "group": 1}))
            .unwrap();
        assert!(person.is_new());
        assert_eq!(person.belongs_to_id("group").unwrap(), Some(RecordId::from(1)));
        assert!(matches!(
            store.create_record("person", json!({"nickname": "T"})),
            Err(StoreError::UnknownAttribute { .. })
        ));
        assert!(store.create_record("person", json!([1])).is_err());
    }

    #[test]
    fn client_ids_must_be_unique() {
        let (_, store) = setup();
        store.create_record("person", json!({"id": 5})).unwrap();
        assert!(store.peek("person", 5).is_some());
        assert!(store.create_record("person", json!({"id": "5"})).is_err());
    }

    #[test]
    fn load_requires_an_id() {
        let (_, store) = setup();
        assert_eq!(
            store.load("person", json!({"name": "Tom"})),
            Err(StoreError::MissingId("person".into()))
        );
    }

    #[test]
    fn unload_forgets_the_record() {
        let (transport, store) = setup();
        let person = store.load("person", json!({"id": 1})).unwrap();
        let everyone = store.all("person").unwrap();
        assert_eq!(everyone.len(), 1);
        store.unload(&person).unwrap();
        assert!(store.peek("person", 1).is_none());
        assert!(everyone.is_empty());

        let again = store.find("person", 1).unwrap();
        assert_ne!(again, person);
        assert_eq!(transport.request_count(), 1);
        assert!(store.unload(&again).is_err());
    }

    #[test]
    fn dropping_the_store_detaches_records() {
        let (_, store) = setup();
        let person = store.load("person", json!({"id": 1})).unwrap();
        drop(store);
        assert_eq!(person.belongs_to("group"), Err(StoreError::Detached));
    }
}
