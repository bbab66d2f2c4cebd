use indexmap::IndexMap;
use serde_json::Value;

use crate::record::RecordState;
use crate::transport::HttpFailure;

/// Per-attribute validation messages, keyed by attribute name.
pub type Errors = IndexMap<String, Vec<String>>;

/// Error type for store operations.
///
/// Cloneable because one failure is handed to every waiter of a record,
/// collection, or commit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("validation failed on {}", .0.keys().cloned().collect::<Vec<_>>().join(", "))]
    Validation(Errors),

    #[error("transport failure (status {status:?}): {body}")]
    Transport { status: Option<u16>, body: String },

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("cannot {event} a record that is {state}")]
    InvalidTransition {
        state: RecordState,
        event: &'static str,
    },

    #[error("the store owning this record has been dropped")]
    Detached,

    #[error("unknown attribute `{attribute}` on `{type_name}`")]
    UnknownAttribute { type_name: String, attribute: String },

    #[error("record of type `{0}` has no id")]
    MissingId(String),

    #[error("cannot decode `{field}`: {message}")]
    Decode { field: String, message: String },

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Error type for type registry lookups and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("`{type_name}` has no relationship `{name}`")]
    UnknownRelationship { type_name: String, name: String },

    #[error("relationship `{type_name}.{name}` targets unknown type `{target}`")]
    UnknownTarget {
        type_name: String,
        name: String,
        target: String,
    },

    #[error("`{type_name}.{name}` is not a {expected} relationship")]
    KindMismatch {
        type_name: String,
        name: String,
        expected: &'static str,
    },
}

/// Error type for loading an adapter configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A classified adapter failure, before it is attached to records.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// 422 with an `errors` object. Keys are still in wire space.
    Invalid(Errors),
    Transport { status: Option<u16>, body: String },
    Protocol(String),
}

impl Failure {
    /// Converts into the error handed to waiters. Validation keys are
    /// expected to be in record space already.
    pub fn into_store_error(self) -> StoreError {
        match self {
            Failure::Invalid(errors) => StoreError::Validation(errors),
            Failure::Transport { status, body } => StoreError::Transport { status, body },
            Failure::Protocol(message) => StoreError::Protocol(message),
        }
    }
}

/// Sorts a transport failure into validation, protocol, or transport.
///
/// Only a 422 whose body carries an `errors` object is a validation failure.
/// A 422 without one, or a failure reported with a success status (an
/// unparseable 2xx body), is a protocol failure. Everything else is a
/// transport failure.
pub fn classify(failure: HttpFailure) -> Failure {
    match failure.status {
        Some(422) => match parse_errors(&failure.body) {
            Some(errors) => Failure::Invalid(errors),
            None => Failure::Protocol(format!(
                "422 response without an errors object: {}",
                failure.body
            )),
        },
        Some(status) if (200..300).contains(&status) => {
            Failure::Protocol(format!("unparseable {status} response: {}", failure.body))
        }
        status => Failure::Transport {
            status,
            body: failure.body,
        },
    }
}

fn parse_errors(body: &str) -> Option<Errors> {
    let json: Value = serde_json::from_str(body).ok()?;
    let object = json.get("errors")?.as_object()?;
    let mut errors = Errors::new();
    for (key, messages) in object {
        let list = match messages {
            Value::Array(items) => items
                .iter()
                .map(|m| match m {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Value::String(s) => vec![s.clone()],
            other => vec![other.to_string()],
        };
        errors.insert(key.clone(), list);
    }
    Some(errors)
}
