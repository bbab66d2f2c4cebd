use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::adapter::FindRequest;
use crate::collection::{LiveCollection, Source};
use crate::deferred;
use crate::error::StoreError;
use crate::id::RecordId;
use crate::record::{Record, RecordState};
use crate::schema::RelationshipKind;
use crate::store::Store;

/// A typed pointer to a record that may not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub type_name: String,
    pub id: RecordId,
}

impl Reference {
    pub fn new(type_name: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Reference {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

/// Raw value of a has-many relationship as the server sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum HasManyRef {
    Ids(Vec<Reference>),
    /// Opaque token handed back to the adapter, e.g. `{"url": "/people/1/roles"}`.
    Token(Value),
}

impl Store {
    pub(crate) fn resolve_belongs_to(
        &self,
        owner: &Record,
        name: &str,
    ) -> Result<Option<Record>, StoreError> {
        owner
            .descriptor()
            .expect_relationship(name, RelationshipKind::BelongsTo)?;
        if let Some(cached) = owner.cached_belongs_to(name) {
            return Ok(cached);
        }
        let target = match owner.belongs_to_reference(name)? {
            Some(reference) => Some(self.find(&reference.type_name, reference.id)?),
            None => None,
        };
        Ok(owner.cache_belongs_to(name, target))
    }

    pub(crate) fn resolve_has_many(
        &self,
        owner: &Record,
        name: &str,
    ) -> Result<LiveCollection, StoreError> {
        let relationship = owner
            .descriptor()
            .expect_relationship(name, RelationshipKind::HasMany)?
            .clone();
        if let Some(cached) = owner.cached_has_many(name) {
            return Ok(cached);
        }
        let collection = match owner.raw_has_many(name) {
            Some(HasManyRef::Token(token)) => {
                log::debug!(
                    "resolving {}.{} through token {}",
                    owner.type_name(),
                    name,
                    token
                );
                self.find_by_token(&relationship.target, token)?
            }
            Some(HasManyRef::Ids(references)) => {
                self.find_references(&relationship.target, references)?
            }
            None => self.find_references(&relationship.target, Vec::new())?,
        };
        collection.tag(owner, name, relationship.polymorphic);
        Ok(owner.cache_has_many(name, collection))
    }

    /// Builds a collection over `references`, in their order.
    ///
    /// Records missing from the store are created as loading shells and
    /// fetched with one find-many request per concrete type. The collection
    /// settles once every member that was loading has settled.
    pub(crate) fn find_references(
        &self,
        type_name: &str,
        references: Vec<Reference>,
    ) -> Result<LiveCollection, StoreError> {
        // No shells until every type is known, so a bad entry leaves nothing
        // loading without a request.
        for reference in &references {
            self.registry().get(&reference.type_name)?;
        }
        let collection = LiveCollection::new(type_name, Source::Many, self.downgrade());
        let mut members = Vec::with_capacity(references.len());
        let mut missing: IndexMap<String, Vec<Record>> = IndexMap::new();
        for reference in references {
            let (record, created) = self.find_or_shell(&reference.type_name, reference.id)?;
            if created {
                missing
                    .entry(reference.type_name.clone())
                    .or_default()
                    .push(record.clone());
            }
            members.push(record);
        }
        collection.merge(&members);

        let loading: Vec<Record> = members
            .iter()
            .filter(|record| record.state() == RecordState::Loading)
            .cloned()
            .collect();
        if loading.is_empty() {
            deferred::fire_all(collection.settle(Ok(())));
        } else {
            let progress = Arc::new(Mutex::new((loading.len(), None::<StoreError>)));
            for record in &loading {
                let progress = Arc::clone(&progress);
                let collection = collection.clone();
                record.on_settled(move |outcome| {
                    let finished = {
                        let mut progress = progress.lock();
                        progress.0 -= 1;
                        if let Err(err) = outcome {
                            progress.1.get_or_insert_with(|| err.clone());
                        }
                        (progress.0 == 0).then(|| progress.1.take())
                    };
                    if let Some(first_error) = finished {
                        let outcome = match first_error {
                            Some(err) => Err(err),
                            None => Ok(()),
                        };
                        deferred::fire_all(collection.settle(outcome));
                    }
                });
            }
        }

        for (type_name, shells) in missing {
            let ids: Vec<RecordId> = shells.iter().filter_map(Record::id).collect();
            log::debug!("fetching {} {} record(s)", ids.len(), type_name);
            let store = self.downgrade();
            let target = type_name.clone();
            self.adapter_find(
                &type_name,
                FindRequest::Many(ids),
                Box::new(move |result| {
                    if let Some(store) = store.upgrade().map(Store::from_shared) {
                        store.apply_find_many(&target, &shells, result);
                    }
                }),
            )?;
        }
        Ok(collection)
    }

    fn find_by_token(&self, type_name: &str, token: Value) -> Result<LiveCollection, StoreError> {
        let collection = LiveCollection::new(type_name, Source::Reference, self.downgrade());
        self.fetch_collection(&collection, FindRequest::Reference(token))?;
        Ok(collection)
    }
}
