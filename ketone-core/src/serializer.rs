//! Conversion between records and the JSON envelopes of the REST protocol.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::AdapterConfig;
use crate::error::{Errors, StoreError};
use crate::id::RecordId;
use crate::inflect::{Inflector, camelize, underscore};
use crate::record::Snapshot;
use crate::relationship::{HasManyRef, Reference};
use crate::schema::{Attribute, Relationship, RelationshipKind, TypeDescriptor, TypeRegistry};

/// One entity of a payload, converted to record space. Only keys present in
/// the payload are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub id: Option<RecordId>,
    pub attributes: IndexMap<String, Value>,
    pub belongs_to: IndexMap<String, Option<Reference>>,
    pub has_many: IndexMap<String, HasManyRef>,
}

impl Normalized {
    pub fn new(id: Option<RecordId>) -> Self {
        Normalized {
            id,
            ..Default::default()
        }
    }
}

/// Expected primary root of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Singular root holding one object.
    One,
    /// Plural root holding an array.
    Many,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primary {
    Absent,
    One(Normalized),
    Many(Vec<Normalized>),
}

/// A parsed response: the primary entity or entities plus every sideloaded
/// collection, in payload order.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub primary: Primary,
    pub sideloads: Vec<(Arc<TypeDescriptor>, Vec<Normalized>)>,
}

#[derive(Debug, Clone)]
pub struct Serializer {
    inflector: Inflector,
    sideload_as: IndexMap<String, String>,
    meta_key: String,
    since_key: String,
}

impl Serializer {
    pub fn new(config: &AdapterConfig) -> Self {
        Serializer {
            inflector: Inflector::with_overrides(&config.plurals),
            sideload_as: config.sideload_as.clone(),
            meta_key: config.meta_key.clone(),
            since_key: config.since_key.clone(),
        }
    }

    pub fn inflector(&self) -> &Inflector {
        &self.inflector
    }

    /// Root key for one record of the type.
    pub fn singular_root(&self, type_name: &str) -> String {
        type_name.to_string()
    }

    /// Root key for a list of the type, also its URL segment.
    pub fn plural_root(&self, type_name: &str) -> String {
        self.inflector.pluralize(type_name)
    }

    pub fn attribute_key(&self, attribute: &Attribute) -> String {
        attribute
            .key
            .clone()
            .unwrap_or_else(|| underscore(&attribute.name))
    }

    /// `group` -> `group_id`, `personType` -> `person_type_id`.
    pub fn belongs_to_key(&self, relationship: &Relationship) -> String {
        relationship
            .key
            .clone()
            .unwrap_or_else(|| format!("{}_id", underscore(&relationship.name)))
    }

    /// `people` -> `person_ids`.
    pub fn has_many_key(&self, relationship: &Relationship) -> String {
        relationship.key.clone().unwrap_or_else(|| {
            format!(
                "{}_ids",
                self.inflector.singularize(&underscore(&relationship.name))
            )
        })
    }

    /// Companion key naming the concrete type of a polymorphic belongs-to.
    pub fn polymorphic_type_key(&self, relationship: &Relationship) -> String {
        format!("{}_type", underscore(&relationship.name))
    }

    fn relationship_key(&self, relationship: &Relationship) -> String {
        match relationship.kind {
            RelationshipKind::BelongsTo => self.belongs_to_key(relationship),
            RelationshipKind::HasMany => self.has_many_key(relationship),
        }
    }

    /// Builds the wire object for a record.
    pub fn serialize(
        &self,
        descriptor: &TypeDescriptor,
        snapshot: &Snapshot,
        include_id: bool,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        if include_id {
            if let Some(id) = &snapshot.id {
                out.insert("id".to_string(), id.to_json());
            }
        }
        for attribute in descriptor.attributes() {
            if let Some(value) = snapshot.attributes.get(&attribute.name) {
                out.insert(self.attribute_key(attribute), attribute.codec.serialize(value));
            }
        }
        for relationship in descriptor.relationships() {
            match relationship.kind {
                RelationshipKind::BelongsTo => {
                    let Some(reference) = snapshot.belongs_to.get(&relationship.name) else {
                        continue;
                    };
                    out.insert(
                        self.belongs_to_key(relationship),
                        reference
                            .as_ref()
                            .map(|r| r.id.to_json())
                            .unwrap_or(Value::Null),
                    );
                    if relationship.polymorphic {
                        out.insert(
                            self.polymorphic_type_key(relationship),
                            reference
                                .as_ref()
                                .map(|r| Value::from(r.type_name.as_str()))
                                .unwrap_or(Value::Null),
                        );
                    }
                }
                RelationshipKind::HasMany => {
                    let Some(references) = snapshot.has_many.get(&relationship.name) else {
                        continue;
                    };
                    let ids = references
                        .iter()
                        .map(|r| {
                            if relationship.polymorphic {
                                serde_json::json!({ "id": r.id.to_json(), "type": r.type_name })
                            } else {
                                r.id.to_json()
                            }
                        })
                        .collect();
                    out.insert(self.has_many_key(relationship), Value::Array(ids));
                }
            }
        }
        out
    }

    /// Converts one wire object of `descriptor`'s type to record space.
    pub fn normalize(
        &self,
        descriptor: &TypeDescriptor,
        raw: &Value,
    ) -> Result<Normalized, StoreError> {
        let object = raw.as_object().ok_or_else(|| {
            StoreError::Protocol(format!("{} payload is not an object", descriptor.name()))
        })?;
        let id = match object.get("id") {
            None | Some(Value::Null) => None,
            Some(value) => Some(RecordId::from_json(value).ok_or_else(|| {
                StoreError::Protocol(format!("invalid {} id {}", descriptor.name(), value))
            })?),
        };
        let mut normalized = Normalized::new(id);

        for attribute in descriptor.attributes() {
            if let Some(value) = object.get(&self.attribute_key(attribute)) {
                normalized
                    .attributes
                    .insert(attribute.name.clone(), attribute.codec.deserialize(value));
            }
        }

        for relationship in descriptor.relationships() {
            let Some(value) = object.get(&self.relationship_key(relationship)) else {
                continue;
            };
            match relationship.kind {
                RelationshipKind::BelongsTo => {
                    let type_hint = object.get(&self.polymorphic_type_key(relationship));
                    let reference = self.belongs_to_reference(relationship, value, type_hint)?;
                    normalized
                        .belongs_to
                        .insert(relationship.name.clone(), reference);
                }
                RelationshipKind::HasMany => {
                    let raw = self.has_many_ref(relationship, value)?;
                    normalized.has_many.insert(relationship.name.clone(), raw);
                }
            }
        }
        Ok(normalized)
    }

    fn belongs_to_reference(
        &self,
        relationship: &Relationship,
        value: &Value,
        type_hint: Option<&Value>,
    ) -> Result<Option<Reference>, StoreError> {
        if value.is_null() {
            return Ok(None);
        }
        if let Value::Object(_) = value {
            return self.typed_reference(relationship, value).map(Some);
        }
        let id = RecordId::from_json(value).ok_or_else(|| {
            StoreError::Protocol(format!("invalid id for {}: {}", relationship.name, value))
        })?;
        let type_name = if relationship.polymorphic {
            match type_hint.and_then(Value::as_str) {
                Some(type_name) => underscore(type_name),
                None => {
                    return Err(StoreError::Protocol(format!(
                        "polymorphic {} without a {}",
                        relationship.name,
                        self.polymorphic_type_key(relationship)
                    )));
                }
            }
        } else {
            relationship.target.clone()
        };
        Ok(Some(Reference::new(type_name, id)))
    }

    fn has_many_ref(
        &self,
        relationship: &Relationship,
        value: &Value,
    ) -> Result<HasManyRef, StoreError> {
        let items = match value {
            Value::Null => return Ok(HasManyRef::Ids(Vec::new())),
            Value::Array(items) => items,
            token => return Ok(HasManyRef::Token(token.clone())),
        };
        let mut references = Vec::with_capacity(items.len());
        for item in items {
            let reference = match item {
                Value::Object(_) => self.typed_reference(relationship, item)?,
                _ if relationship.polymorphic => {
                    return Err(StoreError::Protocol(format!(
                        "polymorphic {} entries need an id and a type",
                        relationship.name
                    )));
                }
                scalar => Reference::new(
                    relationship.target.clone(),
                    RecordId::from_json(scalar).ok_or_else(|| {
                        StoreError::Protocol(format!(
                            "invalid id in {}: {}",
                            relationship.name, scalar
                        ))
                    })?,
                ),
            };
            references.push(reference);
        }
        Ok(HasManyRef::Ids(references))
    }

    /// Reads `{"id": .., "type": ..}`; the type defaults to the declared target.
    fn typed_reference(
        &self,
        relationship: &Relationship,
        value: &Value,
    ) -> Result<Reference, StoreError> {
        let id = value
            .get("id")
            .and_then(RecordId::from_json)
            .ok_or_else(|| {
                StoreError::Protocol(format!("reference without id in {}", relationship.name))
            })?;
        let type_name = match value.get("type").and_then(Value::as_str) {
            Some(type_name) => underscore(type_name),
            None if !relationship.polymorphic => relationship.target.clone(),
            None => {
                return Err(StoreError::Protocol(format!(
                    "polymorphic {} entry without a type",
                    relationship.name
                )));
            }
        };
        Ok(Reference::new(type_name, id))
    }

    /// Splits a response into its primary root and sideloaded collections.
    ///
    /// Every top-level key other than the primary root and the meta key must
    /// name a registered type, either through a sideload alias or as a plural.
    pub fn extract(
        &self,
        registry: &TypeRegistry,
        primary: &TypeDescriptor,
        shape: Shape,
        json: &Value,
    ) -> Result<Extracted, StoreError> {
        let object = json
            .as_object()
            .ok_or_else(|| StoreError::Protocol("response is not a JSON object".to_string()))?;
        let primary_key = match shape {
            Shape::One => self.singular_root(primary.name()),
            Shape::Many => self.plural_root(primary.name()),
        };

        let mut extracted = Extracted {
            primary: Primary::Absent,
            sideloads: Vec::new(),
        };
        for (key, value) in object {
            if *key == primary_key {
                extracted.primary = match shape {
                    Shape::One => Primary::One(self.normalize(primary, value)?),
                    Shape::Many => Primary::Many(self.normalize_list(primary, key, value)?),
                };
            } else if *key == self.meta_key {
                continue;
            } else {
                let type_name = self
                    .sideload_as
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| self.inflector.singularize(key));
                let descriptor = registry.get(&type_name).map_err(|_| {
                    StoreError::Protocol(format!("unknown top-level key `{key}`"))
                })?;
                let entities = self.normalize_list(descriptor, key, value)?;
                if let Some(missing) = entities.iter().position(|e| e.id.is_none()) {
                    return Err(StoreError::Protocol(format!(
                        "sideloaded `{key}` entry {missing} has no id"
                    )));
                }
                extracted.sideloads.push((Arc::clone(descriptor), entities));
            }
        }
        Ok(extracted)
    }

    fn normalize_list(
        &self,
        descriptor: &TypeDescriptor,
        key: &str,
        value: &Value,
    ) -> Result<Vec<Normalized>, StoreError> {
        let items = value
            .as_array()
            .ok_or_else(|| StoreError::Protocol(format!("`{key}` is not an array")))?;
        items
            .iter()
            .map(|item| self.normalize(descriptor, item))
            .collect()
    }

    /// Incremental-sync token of a response, if it carries one.
    pub fn since_token(&self, json: &Value) -> Option<Value> {
        json.get(&self.meta_key)?
            .get(&self.since_key)
            .filter(|token| !token.is_null())
            .cloned()
    }

    /// Renames validation error keys from wire to record space.
    pub fn errors_to_record_space(&self, descriptor: &TypeDescriptor, wire: Errors) -> Errors {
        wire.into_iter()
            .map(|(key, messages)| {
                let name = descriptor
                    .attributes()
                    .find(|a| self.attribute_key(a) == key)
                    .map(|a| a.name.clone())
                    .or_else(|| {
                        descriptor
                            .relationships()
                            .find(|r| self.relationship_key(r) == key)
                            .map(|r| r.name.clone())
                    })
                    .unwrap_or_else(|| camelize(&key));
                (name, messages)
            })
            .collect()
    }
}
