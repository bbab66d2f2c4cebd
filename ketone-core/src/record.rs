use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::collection::LiveCollection;
use crate::deferred::{self, Deferred, Fired, Settlement};
use crate::error::{Errors, StoreError};
use crate::id::RecordId;
use crate::model::Model;
use crate::relationship::{HasManyRef, Reference};
use crate::schema::{RelationshipKind, TypeDescriptor};
use crate::serializer::Normalized;
use crate::store::{Store, StoreShared};

/// Lifecycle state of a record.
///
/// A record marked for deletion but not yet committed is `Dirty` with
/// [`Record::is_deleted`] set; `Deleted` means the deletion is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Shell waiting for its first server data.
    Loading,
    Loaded,
    /// Created locally, not yet persisted.
    New,
    Dirty,
    /// Handed to the adapter; waiting for the response.
    Saving,
    Deleted,
    /// The server rejected the last commit with validation errors.
    Invalid,
    /// The last request failed.
    Error,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordState::Loading => "loading",
            RecordState::Loaded => "loaded",
            RecordState::New => "new",
            RecordState::Dirty => "dirty",
            RecordState::Saving => "saving",
            RecordState::Deleted => "deleted",
            RecordState::Invalid => "invalid",
            RecordState::Error => "in error",
        };
        f.write_str(name)
    }
}

/// What the next commit sends for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Serializable view of a record taken when it is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub type_name: String,
    pub client_id: u64,
    pub id: Option<RecordId>,
    /// Record-space attribute values, local changes applied.
    pub attributes: IndexMap<String, Value>,
    /// Only relationships with a known value; `None` is an explicit null.
    pub belongs_to: IndexMap<String, Option<Reference>>,
    pub has_many: IndexMap<String, Vec<Reference>>,
}

/// Handle to a live record. Clones share the same instance.
#[derive(Clone)]
pub struct Record {
    pub(crate) inner: Arc<RecordInner>,
}

pub(crate) struct RecordInner {
    client_id: u64,
    descriptor: Arc<TypeDescriptor>,
    store: Weak<StoreShared>,
    data: Mutex<RecordData>,
}

#[derive(Clone)]
enum LocalTarget {
    Record(Record),
    Cleared,
}

struct RecordData {
    id: Option<RecordId>,
    state: RecordState,
    deleted: bool,
    pending: Option<Operation>,
    attributes: IndexMap<String, Value>,
    changes: IndexMap<String, Value>,
    belongs_to: IndexMap<String, Option<Reference>>,
    local_belongs_to: IndexMap<String, LocalTarget>,
    has_many: IndexMap<String, HasManyRef>,
    resolved_belongs_to: HashMap<String, Option<Record>>,
    resolved_has_many: HashMap<String, LiveCollection>,
    errors: Errors,
    last_error: Option<StoreError>,
    ready: Deferred,
}

impl RecordData {
    fn new(id: Option<RecordId>, state: RecordState, pending: Option<Operation>) -> Self {
        RecordData {
            id,
            state,
            deleted: false,
            pending,
            attributes: IndexMap::new(),
            changes: IndexMap::new(),
            belongs_to: IndexMap::new(),
            local_belongs_to: IndexMap::new(),
            has_many: IndexMap::new(),
            resolved_belongs_to: HashMap::new(),
            resolved_has_many: HashMap::new(),
            errors: Errors::new(),
            last_error: None,
            ready: Deferred::default(),
        }
    }

    /// State a record returns to once it may be committed again.
    fn uncommitted_state(&self) -> RecordState {
        match self.pending {
            Some(Operation::Create) => RecordState::New,
            _ => RecordState::Dirty,
        }
    }

    fn invalid(&self, event: &'static str) -> StoreError {
        let state = if self.deleted && self.state == RecordState::Dirty {
            RecordState::Deleted
        } else {
            self.state
        };
        StoreError::InvalidTransition { state, event }
    }

    /// Moves the record into a state where local edits are allowed.
    fn begin_edit(&mut self) -> Result<(), StoreError> {
        if self.deleted {
            return Err(self.invalid("modify"));
        }
        match self.state {
            RecordState::Loaded => {
                self.state = RecordState::Dirty;
                self.pending = Some(Operation::Update);
            }
            RecordState::New | RecordState::Dirty => {}
            // A shell whose find failed has nothing to commit.
            RecordState::Error if self.pending.is_none() => return Err(self.invalid("modify")),
            RecordState::Error => self.state = self.uncommitted_state(),
            RecordState::Invalid => {}
            RecordState::Loading | RecordState::Saving | RecordState::Deleted => {
                return Err(self.invalid("modify"));
            }
        }
        Ok(())
    }

    /// Clears validation errors for `name`; an invalid record with no errors
    /// left becomes committable again.
    fn clear_error(&mut self, name: &str) {
        if self.state != RecordState::Invalid {
            return;
        }
        self.errors.shift_remove(name);
        if self.errors.is_empty() {
            self.state = self.uncommitted_state();
        }
    }

    fn attribute(&self, name: &str) -> Option<&Value> {
        self.changes.get(name).or_else(|| self.attributes.get(name))
    }
}

impl Record {
    pub(crate) fn new(
        client_id: u64,
        descriptor: Arc<TypeDescriptor>,
        store: Weak<StoreShared>,
        id: Option<RecordId>,
        state: RecordState,
    ) -> Self {
        let pending = match state {
            RecordState::New => Some(Operation::Create),
            _ => None,
        };
        let mut data = RecordData::new(id, state, pending);
        if state != RecordState::Loading {
            data.ready.settle(Ok(()));
        }
        Record {
            inner: Arc::new(RecordInner {
                client_id,
                descriptor,
                store,
                data: Mutex::new(data),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RecordInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<RecordInner>) -> Option<Record> {
        weak.upgrade().map(|inner| Record { inner })
    }

    pub(crate) fn store(&self) -> Result<Store, StoreError> {
        self.inner
            .store
            .upgrade()
            .map(Store::from_shared)
            .ok_or(StoreError::Detached)
    }

    pub fn type_name(&self) -> &str {
        self.inner.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.inner.descriptor
    }

    /// Store-local identifier, stable for the record's lifetime.
    pub fn client_id(&self) -> u64 {
        self.inner.client_id
    }

    pub fn id(&self) -> Option<RecordId> {
        self.inner.data.lock().id.clone()
    }

    pub fn state(&self) -> RecordState {
        self.inner.data.lock().state
    }

    pub fn is_loaded(&self) -> bool {
        self.state() != RecordState::Loading
    }

    pub fn is_new(&self) -> bool {
        self.state() == RecordState::New
    }

    pub fn is_saving(&self) -> bool {
        self.state() == RecordState::Saving
    }

    /// True while the record has changes the server has not acknowledged.
    pub fn is_dirty(&self) -> bool {
        let data = self.inner.data.lock();
        match data.state {
            RecordState::New | RecordState::Dirty | RecordState::Saving => true,
            RecordState::Invalid | RecordState::Error => data.pending.is_some(),
            RecordState::Loading | RecordState::Loaded | RecordState::Deleted => false,
        }
    }

    pub fn is_deleted(&self) -> bool {
        let data = self.inner.data.lock();
        data.deleted || data.state == RecordState::Deleted
    }

    pub fn is_valid(&self) -> bool {
        self.state() != RecordState::Invalid
    }

    pub fn is_error(&self) -> bool {
        self.state() == RecordState::Error
    }

    /// The operation the next commit will send, if any.
    pub fn pending_operation(&self) -> Option<Operation> {
        self.inner.data.lock().pending
    }

    /// Current value of an attribute, local changes included.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.inner.data.lock().attribute(name).cloned()
    }

    /// Decodes an attribute into a Rust value. A missing attribute decodes
    /// from `null`.
    pub fn decode<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let value = self.attribute(name).unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| StoreError::Decode {
            field: name.to_string(),
            message: err.to_string(),
        })
    }

    /// Sets an attribute locally.
    ///
    /// A loaded record becomes dirty. On an invalid record the errors for
    /// this attribute are cleared.
    pub fn set(&self, name: &str, value: impl Serialize) -> Result<(), StoreError> {
        let attribute = self.inner.descriptor.get_attribute(name).ok_or_else(|| {
            StoreError::UnknownAttribute {
                type_name: self.type_name().to_string(),
                attribute: name.to_string(),
            }
        })?;
        let value = serde_json::to_value(value).map_err(|err| StoreError::Decode {
            field: name.to_string(),
            message: err.to_string(),
        })?;
        let value = attribute.codec.deserialize(&value);
        {
            let mut data = self.inner.data.lock();
            if data.attribute(name) == Some(&value) {
                return Ok(());
            }
            data.begin_edit()?;
            data.changes.insert(name.to_string(), value);
            data.clear_error(name);
        }
        self.notify_changed();
        Ok(())
    }

    pub fn errors(&self) -> Errors {
        self.inner.data.lock().errors.clone()
    }

    /// The failure of the last request made for this record.
    pub fn last_error(&self) -> Option<StoreError> {
        self.inner.data.lock().last_error.clone()
    }

    /// Raw id of a belongs-to relationship, without resolving it.
    pub fn belongs_to_id(&self, name: &str) -> Result<Option<RecordId>, StoreError> {
        Ok(self.belongs_to_reference(name)?.map(|r| r.id))
    }

    /// Raw reference of a belongs-to relationship, without resolving it.
    pub fn belongs_to_reference(&self, name: &str) -> Result<Option<Reference>, StoreError> {
        self.inner
            .descriptor
            .expect_relationship(name, RelationshipKind::BelongsTo)?;
        let (local, raw) = {
            let data = self.inner.data.lock();
            (
                data.local_belongs_to.get(name).cloned(),
                data.belongs_to.get(name).cloned().flatten(),
            )
        };
        Ok(match local {
            Some(LocalTarget::Record(target)) => target.reference(),
            Some(LocalTarget::Cleared) => None,
            None => raw,
        })
    }

    /// Ids of a has-many relationship, without resolving it. An opaque token
    /// yields no ids until the collection is resolved.
    pub fn has_many_ids(&self, name: &str) -> Result<Vec<RecordId>, StoreError> {
        Ok(self
            .has_many_references(name)?
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    fn has_many_references(&self, name: &str) -> Result<Option<Vec<Reference>>, StoreError> {
        self.inner
            .descriptor
            .expect_relationship(name, RelationshipKind::HasMany)?;
        let (resolved, raw) = {
            let data = self.inner.data.lock();
            (
                data.resolved_has_many.get(name).cloned(),
                data.has_many.get(name).cloned(),
            )
        };
        if let Some(collection) = resolved {
            return Ok(Some(
                collection
                    .to_vec()
                    .iter()
                    .filter_map(Record::reference)
                    .collect(),
            ));
        }
        Ok(match raw {
            Some(HasManyRef::Ids(refs)) => Some(refs),
            Some(HasManyRef::Token(_)) | None => None,
        })
    }

    /// Resolves a belongs-to relationship, fetching the target if it is not
    /// in the store yet. The returned record may still be loading.
    pub fn belongs_to(&self, name: &str) -> Result<Option<Record>, StoreError> {
        self.store()?.resolve_belongs_to(self, name)
    }

    /// Resolves a has-many relationship into a live collection. Missing
    /// members are fetched with one request per target type.
    pub fn has_many(&self, name: &str) -> Result<LiveCollection, StoreError> {
        self.store()?.resolve_has_many(self, name)
    }

    /// Points a belongs-to relationship at `target`, or clears it.
    pub fn set_belongs_to(&self, name: &str, target: Option<&Record>) -> Result<(), StoreError> {
        let relationship = self
            .inner
            .descriptor
            .expect_relationship(name, RelationshipKind::BelongsTo)?;
        if let Some(target) = target {
            if !relationship.polymorphic && target.type_name() != relationship.target {
                return Err(StoreError::Unsupported(
                    "belongs-to target has the wrong type",
                ));
            }
        }
        {
            let mut data = self.inner.data.lock();
            data.begin_edit()?;
            let local = match target {
                Some(record) => LocalTarget::Record(record.clone()),
                None => LocalTarget::Cleared,
            };
            data.local_belongs_to.insert(name.to_string(), local);
            data.resolved_belongs_to
                .insert(name.to_string(), target.cloned());
            data.clear_error(name);
        }
        self.notify_changed();
        Ok(())
    }

    /// Appends `member` to a has-many relationship, resolving it first.
    pub fn add_to_has_many(&self, name: &str, member: &Record) -> Result<(), StoreError> {
        let relationship = self
            .inner
            .descriptor
            .expect_relationship(name, RelationshipKind::HasMany)?;
        if !relationship.polymorphic && member.type_name() != relationship.target {
            return Err(StoreError::Unsupported(
                "has-many member has the wrong type",
            ));
        }
        let collection = self.has_many(name)?;
        {
            let mut data = self.inner.data.lock();
            data.begin_edit()?;
            data.clear_error(name);
        }
        collection.push(member.clone());
        self.notify_changed();
        Ok(())
    }

    /// Marks the record for deletion. A record that was never persisted is
    /// deleted immediately; others are deleted on the next commit.
    pub fn delete_record(&self) -> Result<(), StoreError> {
        {
            let mut data = self.inner.data.lock();
            if data.deleted || data.state == RecordState::Deleted {
                return Ok(());
            }
            match data.state {
                RecordState::Loading | RecordState::Saving => {
                    return Err(data.invalid("delete"));
                }
                RecordState::Error if data.pending.is_none() => {
                    return Err(data.invalid("delete"));
                }
                RecordState::New => {
                    data.state = RecordState::Deleted;
                    data.pending = None;
                    data.deleted = true;
                }
                RecordState::Invalid | RecordState::Error
                    if data.pending == Some(Operation::Create) =>
                {
                    data.state = RecordState::Deleted;
                    data.pending = None;
                    data.deleted = true;
                    data.errors.clear();
                }
                _ => {
                    data.state = RecordState::Dirty;
                    data.pending = Some(Operation::Delete);
                    data.deleted = true;
                    data.errors.clear();
                }
            }
        }
        self.notify_changed();
        Ok(())
    }

    pub fn settlement(&self) -> Settlement {
        self.inner.data.lock().ready.settlement()
    }

    /// Runs `callback` once the record's outstanding request settles, or
    /// right away if nothing is outstanding.
    pub fn on_settled(&self, callback: impl FnOnce(&Result<(), StoreError>) + Send + 'static) {
        deferred::on_settled_with(|w| self.inner.data.lock().ready.register(w), callback)
    }

    pub async fn settled(&self) -> Result<(), StoreError> {
        deferred::settled_with(|w| self.inner.data.lock().ready.register(w)).await
    }

    pub fn to_model<M: Model>(&self) -> Result<M, StoreError> {
        M::from_record(self)
    }

    /// Captures the record for serialization.
    pub fn snapshot(&self) -> Snapshot {
        let (id, attributes, raw_belongs_to, local, raw_has_many, resolved) = {
            let data = self.inner.data.lock();
            let mut attributes = data.attributes.clone();
            for (name, value) in &data.changes {
                attributes.insert(name.clone(), value.clone());
            }
            (
                data.id.clone(),
                attributes,
                data.belongs_to.clone(),
                data.local_belongs_to.clone(),
                data.has_many.clone(),
                data.resolved_has_many.clone(),
            )
        };

        let mut belongs_to = raw_belongs_to;
        for (name, target) in local {
            let reference = match target {
                LocalTarget::Record(record) => record.reference(),
                LocalTarget::Cleared => None,
            };
            belongs_to.insert(name, reference);
        }

        let mut has_many = IndexMap::new();
        for relationship in self.inner.descriptor.relationships() {
            if relationship.kind != RelationshipKind::HasMany {
                continue;
            }
            let references = match (resolved.get(&relationship.name), raw_has_many.get(&relationship.name)) {
                (Some(collection), _) => collection
                    .to_vec()
                    .iter()
                    .filter_map(Record::reference)
                    .collect(),
                (None, Some(HasManyRef::Ids(refs))) => refs.clone(),
                _ => continue,
            };
            has_many.insert(relationship.name.clone(), references);
        }

        Snapshot {
            type_name: self.type_name().to_string(),
            client_id: self.client_id(),
            id,
            attributes,
            belongs_to,
            has_many,
        }
    }

    /// Reference to this record, once it has an id.
    pub fn reference(&self) -> Option<Reference> {
        self.id().map(|id| Reference::new(self.type_name(), id))
    }

    fn notify_changed(&self) {
        if let Ok(store) = self.store() {
            store.record_changed(self);
        }
    }

    // Transitions driven by the store. Each returns the readiness waiters to
    // fire once every lock is released.

    /// Merges server data. Only a loading shell changes state.
    pub(crate) fn apply_load(&self, normalized: &Normalized) -> Option<Fired> {
        let mut data = self.inner.data.lock();
        self.merge(&mut data, normalized);
        if data.state == RecordState::Loading {
            data.state = RecordState::Loaded;
            data.last_error = None;
            return data.ready.settle(Ok(()));
        }
        None
    }

    /// A find for this shell failed.
    pub(crate) fn fail_load(&self, error: StoreError) -> Option<Fired> {
        let mut data = self.inner.data.lock();
        if data.state != RecordState::Loading {
            return None;
        }
        data.state = RecordState::Error;
        data.last_error = Some(error.clone());
        data.ready.settle(Err(error))
    }

    /// Moves a committable record to Saving and returns what to send.
    pub(crate) fn begin_commit(&self) -> Option<Operation> {
        let mut data = self.inner.data.lock();
        let committable = matches!(
            data.state,
            RecordState::New | RecordState::Dirty | RecordState::Invalid | RecordState::Error
        );
        let operation = data.pending.filter(|_| committable)?;
        data.state = RecordState::Saving;
        data.ready.reset();
        Some(operation)
    }

    /// The server acknowledged the commit. `normalized` is the record's part
    /// of the response, if any.
    pub(crate) fn commit_succeeded(&self, normalized: Option<&Normalized>) -> Option<Fired> {
        let mut data = self.inner.data.lock();
        if data.state != RecordState::Saving {
            return None;
        }
        let changes = std::mem::take(&mut data.changes);
        data.attributes.extend(changes);
        let local = std::mem::take(&mut data.local_belongs_to);
        for (name, target) in local {
            match target {
                LocalTarget::Record(record) => match record.reference() {
                    Some(reference) => {
                        data.belongs_to.insert(name, Some(reference));
                    }
                    // The target has no id yet; keep pointing at it.
                    None => {
                        data.local_belongs_to
                            .insert(name, LocalTarget::Record(record));
                    }
                },
                LocalTarget::Cleared => {
                    data.belongs_to.insert(name, None);
                }
            }
        }
        if let Some(normalized) = normalized {
            self.merge(&mut data, normalized);
        }
        data.state = if data.pending == Some(Operation::Delete) {
            RecordState::Deleted
        } else {
            RecordState::Loaded
        };
        data.deleted = data.state == RecordState::Deleted;
        data.pending = None;
        data.errors.clear();
        data.last_error = None;
        data.ready.settle(Ok(()))
    }

    pub(crate) fn commit_invalid(&self, errors: Errors) -> Option<Fired> {
        let mut data = self.inner.data.lock();
        if data.state != RecordState::Saving {
            return None;
        }
        let error = StoreError::Validation(errors.clone());
        data.state = RecordState::Invalid;
        data.errors = errors;
        data.last_error = Some(error.clone());
        data.ready.settle(Err(error))
    }

    pub(crate) fn commit_failed(&self, error: StoreError) -> Option<Fired> {
        let mut data = self.inner.data.lock();
        if data.state != RecordState::Saving {
            return None;
        }
        data.state = RecordState::Error;
        data.last_error = Some(error.clone());
        data.ready.settle(Err(error))
    }

    pub(crate) fn cached_has_many(&self, name: &str) -> Option<LiveCollection> {
        self.inner.data.lock().resolved_has_many.get(name).cloned()
    }

    /// Caches a resolved collection unless another thread got there first.
    pub(crate) fn cache_has_many(&self, name: &str, collection: LiveCollection) -> LiveCollection {
        self.inner
            .data
            .lock()
            .resolved_has_many
            .entry(name.to_string())
            .or_insert(collection)
            .clone()
    }

    pub(crate) fn raw_has_many(&self, name: &str) -> Option<HasManyRef> {
        self.inner.data.lock().has_many.get(name).cloned()
    }

    pub(crate) fn cached_belongs_to(&self, name: &str) -> Option<Option<Record>> {
        self.inner.data.lock().resolved_belongs_to.get(name).cloned()
    }

    pub(crate) fn cache_belongs_to(&self, name: &str, target: Option<Record>) -> Option<Record> {
        self.inner
            .data
            .lock()
            .resolved_belongs_to
            .entry(name.to_string())
            .or_insert(target)
            .clone()
    }

    /// Sets the id of a record created locally.
    pub(crate) fn assign_id(&self, id: RecordId) {
        self.inner.data.lock().id = Some(id);
    }

    /// Drops resolved relationship caches. Used to break reference cycles when
    /// the store goes away.
    pub(crate) fn clear_resolved(&self) {
        let mut data = self.inner.data.lock();
        data.resolved_belongs_to.clear();
        data.resolved_has_many.clear();
        data.local_belongs_to.clear();
    }

    fn merge(&self, data: &mut RecordData, normalized: &Normalized) {
        if data.id.is_none() {
            data.id = normalized.id.clone();
        }
        for (name, value) in &normalized.attributes {
            data.attributes.insert(name.clone(), value.clone());
        }
        for (name, reference) in &normalized.belongs_to {
            if data.belongs_to.get(name) != Some(reference) {
                data.resolved_belongs_to.remove(name);
            }
            data.belongs_to.insert(name.clone(), reference.clone());
        }
        for (name, raw) in &normalized.has_many {
            if data.has_many.get(name) != Some(raw) {
                data.resolved_has_many.remove(name);
            }
            data.has_many.insert(name.clone(), raw.clone());
        }
        // Local belongs-to overrides keep their resolved target.
        for (name, target) in &data.local_belongs_to {
            let resolved = match target {
                LocalTarget::Record(record) => Some(record.clone()),
                LocalTarget::Cleared => None,
            };
            data.resolved_belongs_to.insert(name.clone(), resolved);
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("Record")
            .field("type", &self.type_name())
            .field("client_id", &self.inner.client_id)
            .field("id", &data.id)
            .field("state", &data.state)
            .field("deleted", &data.deleted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Codec;
    use serde_json::json;

    fn person(state: RecordState) -> Record {
        let descriptor = Arc::new(
            TypeDescriptor::new("person")
                .attr("name", Codec::String)
                .attr("age", Codec::Number),
        );
        let id = (state != RecordState::New).then(|| RecordId::from(1));
        Record::new(1, descriptor, Weak::new(), id, state)
    }

    fn loaded(name: &str) -> Normalized {
        let mut normalized = Normalized::new(Some(RecordId::from(1)));
        normalized
            .attributes
            .insert("name".into(), json!(name));
        normalized
    }

    #[test]
    fn set_dirties_a_loaded_record() {
        let record = person(RecordState::Loaded);
        record.set("name", "Tom").unwrap();
        assert_eq!(record.state(), RecordState::Dirty);
        assert_eq!(record.pending_operation(), Some(Operation::Update));
        assert!(record.is_dirty());
        assert_eq!(record.attribute("name"), Some(json!("Tom")));
    }

    #[test]
    fn set_keeps_new_records_new() {
        let record = person(RecordState::New);
        record.set("name", "Tom").unwrap();
        assert_eq!(record.state(), RecordState::New);
        assert_eq!(record.pending_operation(), Some(Operation::Create));
    }

    #[test]
    fn set_rejects_unknown_attributes_and_busy_records() {
        let record = person(RecordState::Loaded);
        assert!(matches!(
            record.set("nickname", "T"),
            Err(StoreError::UnknownAttribute { .. })
        ));

        let loading = person(RecordState::Loading);
        assert_eq!(
            loading.set("name", "T"),
            Err(StoreError::InvalidTransition {
                state: RecordState::Loading,
                event: "modify"
            })
        );
    }

    #[test]
    fn setting_the_same_value_is_not_a_change() {
        let record = person(RecordState::Loading);
        record.apply_load(&loaded("Tom"));
        record.set("name", "Tom").unwrap();
        assert_eq!(record.state(), RecordState::Loaded);
    }

    #[test]
    fn values_pass_through_the_codec() {
        let record = person(RecordState::New);
        record.set("age", "42").unwrap();
        assert_eq!(record.attribute("age"), Some(json!(42)));
        assert_eq!(record.decode::<u32>("age").unwrap(), 42);
        assert_eq!(record.decode::<Option<String>>("name").unwrap(), None);
    }

    #[test]
    fn loading_settles_the_shell() {
        let record = person(RecordState::Loading);
        assert_eq!(record.settlement(), Settlement::Pending);
        deferred::fire_all(record.apply_load(&loaded("Tom")));
        assert_eq!(record.state(), RecordState::Loaded);
        assert_eq!(record.settlement(), Settlement::Resolved);
    }

    #[test]
    fn server_data_does_not_clobber_local_changes() {
        let record = person(RecordState::Loaded);
        record.set("name", "Local").unwrap();
        record.apply_load(&loaded("Server"));
        assert_eq!(record.state(), RecordState::Dirty);
        assert_eq!(record.attribute("name"), Some(json!("Local")));
    }

    #[test]
    fn commit_round_trip() {
        let record = person(RecordState::Loaded);
        record.set("name", "Tom").unwrap();
        assert_eq!(record.begin_commit(), Some(Operation::Update));
        assert!(record.is_saving());
        assert_eq!(record.begin_commit(), None);
        assert_eq!(record.settlement(), Settlement::Pending);

        deferred::fire_all(record.commit_succeeded(None));
        assert_eq!(record.state(), RecordState::Loaded);
        assert!(!record.is_dirty());
        assert_eq!(record.attribute("name"), Some(json!("Tom")));
        assert_eq!(record.settlement(), Settlement::Resolved);
    }

    #[test]
    fn validation_failure_keeps_the_pending_operation() {
        let record = person(RecordState::New);
        record.begin_commit();
        let mut errors = Errors::new();
        errors.insert("name".into(), vec!["can't be blank".into()]);
        deferred::fire_all(record.commit_invalid(errors.clone()));

        assert_eq!(record.state(), RecordState::Invalid);
        assert!(!record.is_valid());
        assert_eq!(record.errors(), errors);
        assert_eq!(record.pending_operation(), Some(Operation::Create));
        assert_eq!(
            record.settlement(),
            Settlement::Rejected(StoreError::Validation(errors))
        );

        record.set("name", "Tom").unwrap();
        assert_eq!(record.state(), RecordState::New);
        assert!(record.errors().is_empty());
    }

    #[test]
    fn transport_failure_can_be_retried() {
        let record = person(RecordState::Loaded);
        record.set("name", "Tom").unwrap();
        record.begin_commit();
        record.commit_failed(StoreError::Transport {
            status: Some(500),
            body: String::new(),
        });
        assert!(record.is_error());
        assert_eq!(record.begin_commit(), Some(Operation::Update));
    }

    #[test]
    fn deleting_a_loaded_record() {
        let record = person(RecordState::Loaded);
        record.delete_record().unwrap();
        assert!(record.is_deleted());
        assert!(record.is_dirty());
        assert_eq!(record.state(), RecordState::Dirty);
        assert!(record.set("name", "x").is_err());

        assert_eq!(record.begin_commit(), Some(Operation::Delete));
        record.commit_succeeded(None);
        assert_eq!(record.state(), RecordState::Deleted);
        assert!(record.is_deleted());
        assert!(!record.is_dirty());
    }

    #[test]
    fn deleting_a_new_record_needs_no_commit() {
        let record = person(RecordState::New);
        record.delete_record().unwrap();
        assert_eq!(record.state(), RecordState::Deleted);
        assert_eq!(record.pending_operation(), None);
        assert_eq!(record.begin_commit(), None);
    }

    #[test]
    fn deleting_while_saving_is_rejected() {
        let record = person(RecordState::New);
        record.begin_commit();
        assert!(matches!(
            record.delete_record(),
            Err(StoreError::InvalidTransition { event: "delete", .. })
        ));
    }

    #[test]
    fn failed_find_moves_shell_to_error() {
        let record = person(RecordState::Loading);
        deferred::fire_all(record.fail_load(StoreError::Transport {
            status: Some(404),
            body: String::new(),
        }));
        assert!(record.is_error());
        assert!(record.last_error().is_some());
        assert!(!record.is_dirty());
        assert_eq!(record.begin_commit(), None);
    }

    #[test]
    fn failed_find_rejects_edits() {
        let record = person(RecordState::Loading);
        deferred::fire_all(record.fail_load(StoreError::Transport {
            status: Some(404),
            body: String::new(),
        }));

        let err = record.set("name", "Tom").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                state: RecordState::Error,
                event: "modify"
            }
        ));
        assert!(matches!(
            record.delete_record(),
            Err(StoreError::InvalidTransition { event: "delete", .. })
        ));
        assert!(record.is_error());
        assert!(!record.is_dirty());
        assert!(!record.is_deleted());
        assert_eq!(record.pending_operation(), None);
    }
}
