use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::SchemaError;
use crate::model::Model;

/// How an attribute value is converted between wire and record space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    String,
    Number,
    Boolean,
    /// RFC 3339 strings in record space; accepts RFC 3339 or epoch
    /// milliseconds on the wire.
    Date,
    /// Passed through untouched.
    #[default]
    Raw,
}

impl Codec {
    /// Converts a wire value into its record-space form.
    pub fn deserialize(&self, wire: &Value) -> Value {
        if wire.is_null() {
            return Value::Null;
        }
        match self {
            Codec::Raw => wire.clone(),
            Codec::String => match wire {
                Value::String(_) => wire.clone(),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                other => Value::String(other.to_string()),
            },
            Codec::Number => match wire {
                Value::Number(_) => wire.clone(),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .map(number_value)
                    .unwrap_or(Value::Null),
                Value::Bool(b) => Value::from(u8::from(*b)),
                _ => Value::Null,
            },
            Codec::Boolean => match wire {
                Value::Bool(_) => wire.clone(),
                Value::String(s) => Value::Bool(s == "true"),
                Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
                _ => Value::Bool(false),
            },
            Codec::Date => match wire {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| date_value(dt.with_timezone(&Utc)))
                    .unwrap_or(Value::Null),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map(date_value)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
        }
    }

    /// Converts a record-space value into its wire form.
    pub fn serialize(&self, value: &Value) -> Value {
        match self {
            // Record-space dates are already canonical RFC 3339 strings.
            Codec::Date | Codec::Raw => value.clone(),
            _ => self.deserialize(value),
        }
    }
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn date_value(dt: DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// A declared attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    /// Wire name override; defaults to the underscored attribute name.
    pub key: Option<String>,
    pub codec: Codec,
}

impl Attribute {
    pub fn new(name: impl Into<String>, codec: Codec) -> Self {
        Attribute {
            name: name.into(),
            key: None,
            codec,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    HasMany,
    BelongsTo,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::HasMany => "hasMany",
            RelationshipKind::BelongsTo => "belongsTo",
        }
    }
}

/// A declared relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub kind: RelationshipKind,
    /// Target type name. For polymorphic relationships this is only a label;
    /// the concrete type comes from the raw data.
    pub target: String,
    pub polymorphic: bool,
    /// Wire name override for the foreign key.
    pub key: Option<String>,
}

impl Relationship {
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Relationship {
            name: name.into(),
            kind: RelationshipKind::BelongsTo,
            target: target.into(),
            polymorphic: false,
            key: None,
        }
    }

    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Relationship {
            name: name.into(),
            kind: RelationshipKind::HasMany,
            target: target.into(),
            polymorphic: false,
            key: None,
        }
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Schema of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    name: String,
    attributes: IndexMap<String, Attribute>,
    relationships: IndexMap<String, Relationship>,
}

impl TypeDescriptor {
    /// Creates an empty descriptor. `name` is the underscored singular
    /// (`person_type`).
    pub fn new(name: impl Into<String>) -> Self {
        TypeDescriptor {
            name: name.into(),
            attributes: IndexMap::new(),
            relationships: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(self, name: impl Into<String>, codec: Codec) -> Self {
        self.attribute(Attribute::new(name, codec))
    }

    /// Declares an attribute. A later declaration of the same name replaces
    /// the earlier one, whatever its kind.
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        if self.relationships.shift_remove(&attribute.name).is_some() {
            log::debug!(
                "{}.{} redeclared as an attribute",
                self.name,
                attribute.name
            );
        }
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    pub fn belongs_to(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(Relationship::belongs_to(name, target))
    }

    pub fn has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(Relationship::has_many(name, target))
    }

    /// Declares a relationship. A later declaration of the same name replaces
    /// the earlier one, whatever its kind.
    pub fn relationship(mut self, relationship: Relationship) -> Self {
        let replaced = self.attributes.shift_remove(&relationship.name).is_some()
            || self.relationships.contains_key(&relationship.name);
        if replaced {
            log::debug!("{}.{} redeclared", self.name, relationship.name);
        }
        self.relationships
            .insert(relationship.name.clone(), relationship);
        self
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn get_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.get(name)
    }

    /// Looks up a relationship and checks its kind.
    pub fn expect_relationship(
        &self,
        name: &str,
        kind: RelationshipKind,
    ) -> Result<&Relationship, SchemaError> {
        let relationship =
            self.relationships
                .get(name)
                .ok_or_else(|| SchemaError::UnknownRelationship {
                    type_name: self.name.clone(),
                    name: name.to_string(),
                })?;
        if relationship.kind != kind {
            return Err(SchemaError::KindMismatch {
                type_name: self.name.clone(),
                name: name.to_string(),
                expected: kind.as_str(),
            });
        }
        Ok(relationship)
    }
}

/// All record types known to a store.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing any earlier one of the same name.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.types
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        self
    }

    /// Registers the descriptor generated for a model struct.
    pub fn register_model<M: Model>(&mut self) -> &mut Self {
        self.register(M::descriptor())
    }

    /// Extends an already registered type.
    pub fn reopen(
        &mut self,
        name: &str,
        extend: impl FnOnce(TypeDescriptor) -> TypeDescriptor,
    ) -> Result<&mut Self, SchemaError> {
        let slot = self
            .types
            .get_mut(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))?;
        *slot = Arc::new(extend(slot.as_ref().clone()));
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<TypeDescriptor>, SchemaError> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> {
        self.types.values()
    }

    /// Checks that every non-polymorphic relationship targets a registered
    /// type.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for descriptor in self.types.values() {
            for relationship in descriptor.relationships() {
                if relationship.polymorphic || self.types.contains_key(&relationship.target) {
                    continue;
                }
                return Err(SchemaError::UnknownTarget {
                    type_name: descriptor.name.clone(),
                    name: relationship.name.clone(),
                    target: relationship.target.clone(),
                });
            }
        }
        Ok(())
    }
}
