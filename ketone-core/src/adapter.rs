use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AdapterConfig;
use crate::error::{Failure, classify};
use crate::id::RecordId;
use crate::record::{Operation, Snapshot};
use crate::schema::TypeDescriptor;
use crate::serializer::Serializer;
use crate::transport::{HttpRequest, Method, Transport};

/// What a find asks the server for.
#[derive(Debug, Clone, PartialEq)]
pub enum FindRequest {
    One(RecordId),
    All,
    /// Query parameters, forwarded verbatim.
    Query(Value),
    Many(Vec<RecordId>),
    /// Opaque relationship token.
    Reference(Value),
}

/// Records of one type sharing an operation, sent together.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    pub operation: Operation,
    /// Use the bulk envelope even for a single record.
    pub bulk: bool,
    pub snapshots: Vec<Snapshot>,
}

/// Receives a classified adapter outcome. `Ok(None)` is an empty body.
pub type Completion = Box<dyn FnOnce(Result<Option<Value>, Failure>) + Send>;

/// Talks to the backend on behalf of the store.
pub trait Adapter: Send + Sync {
    fn serializer(&self) -> &Serializer;

    /// Whether commits group same-type, same-operation records.
    fn bulk_commit(&self) -> bool;

    fn find(&self, descriptor: &TypeDescriptor, request: FindRequest, complete: Completion);

    fn commit(&self, descriptor: &TypeDescriptor, batch: CommitBatch, complete: Completion);
}

/// Adapter for REST backends following the `/<plural>[/<id>]` convention.
pub struct RestAdapter<T> {
    transport: T,
    config: AdapterConfig,
    serializer: Serializer,
    since: Arc<Mutex<HashMap<String, Value>>>,
}

impl<T: Transport> RestAdapter<T> {
    pub fn new(transport: T, config: AdapterConfig) -> Self {
        let config = config.normalized();
        let serializer = Serializer::new(&config);
        RestAdapter {
            transport,
            config,
            serializer,
            since: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// `[url][/namespace]/<plural>[/<suffix>]`
    pub fn build_url(&self, type_name: &str, suffix: Option<&str>) -> String {
        let mut url = self.config.url.clone();
        if let Some(namespace) = &self.config.namespace {
            url.push('/');
            url.push_str(namespace);
        }
        url.push('/');
        url.push_str(&self.serializer.plural_root(type_name));
        if let Some(suffix) = suffix {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    /// The token recorded by the last response for `key`, if any.
    pub fn since_token(&self, key: &str) -> Option<Value> {
        self.since.lock().get(key).cloned()
    }

    fn since_key(type_name: &str, query: Option<&Value>) -> String {
        match query {
            Some(query) => format!("{type_name}?{query}"),
            None => type_name.to_string(),
        }
    }

    /// Adds the stored since token for `key` to the request data.
    fn with_since(&self, key: &str, data: Option<Value>) -> Option<Value> {
        let Some(token) = self.since_token(key) else {
            return data;
        };
        let mut object = match data {
            Some(Value::Object(object)) => object,
            _ => Map::new(),
        };
        object.insert(self.config.since_param.clone(), token);
        Some(Value::Object(object))
    }

    fn send(&self, request: HttpRequest, since_key: Option<String>, complete: Completion) {
        log::debug!("{} {}", request.method, request.url);
        let tracker = since_key.map(|key| (key, Arc::clone(&self.since), self.serializer.clone()));
        self.transport.request(
            request,
            Box::new(move |outcome| {
                let outcome = outcome.map_err(classify);
                if let (Ok(Some(json)), Some((key, since, serializer))) = (&outcome, tracker) {
                    if let Some(token) = serializer.since_token(json) {
                        log::debug!("since token for {key} is now {token}");
                        since.lock().insert(key, token);
                    }
                }
                complete(outcome);
            }),
        );
    }

    fn reference_request(&self, type_name: &str, token: Value) -> HttpRequest {
        match token.get("url").and_then(Value::as_str) {
            Some(url) => {
                let url = if url.contains("://") {
                    url.to_string()
                } else {
                    format!("{}{}", self.config.url, url)
                };
                HttpRequest {
                    url,
                    method: Method::Get,
                    data: None,
                }
            }
            None => HttpRequest {
                url: self.build_url(type_name, None),
                method: Method::Get,
                data: Some(token),
            },
        }
    }

    fn single_request(
        &self,
        descriptor: &TypeDescriptor,
        operation: Operation,
        snapshot: &Snapshot,
    ) -> Result<HttpRequest, Failure> {
        let type_name = descriptor.name();
        let root = self.serializer.singular_root(type_name);
        let mut body = Map::new();
        body.insert(
            root,
            Value::Object(self.serializer.serialize(descriptor, snapshot, false)),
        );
        Ok(match operation {
            Operation::Create => HttpRequest {
                url: self.build_url(type_name, None),
                method: Method::Post,
                data: Some(Value::Object(body)),
            },
            Operation::Update => HttpRequest {
                url: self.build_url(type_name, Some(require_id(type_name, snapshot)?.as_key().as_ref())),
                method: Method::Put,
                data: Some(Value::Object(body)),
            },
            Operation::Delete => HttpRequest {
                url: self.build_url(type_name, Some(require_id(type_name, snapshot)?.as_key().as_ref())),
                method: Method::Delete,
                data: None,
            },
        })
    }

    fn bulk_request(
        &self,
        descriptor: &TypeDescriptor,
        operation: Operation,
        snapshots: &[Snapshot],
    ) -> Result<HttpRequest, Failure> {
        let type_name = descriptor.name();
        let items = snapshots
            .iter()
            .map(|snapshot| {
                Ok(match operation {
                    Operation::Create => {
                        Value::Object(self.serializer.serialize(descriptor, snapshot, false))
                    }
                    Operation::Update => {
                        require_id(type_name, snapshot)?;
                        Value::Object(self.serializer.serialize(descriptor, snapshot, true))
                    }
                    Operation::Delete => require_id(type_name, snapshot)?.to_json(),
                })
            })
            .collect::<Result<Vec<_>, Failure>>()?;
        let mut body = Map::new();
        body.insert(self.serializer.plural_root(type_name), Value::Array(items));
        let (method, suffix) = match operation {
            Operation::Create => (Method::Post, None),
            Operation::Update => (Method::Put, Some("bulk")),
            Operation::Delete => (Method::Delete, Some("bulk")),
        };
        Ok(HttpRequest {
            url: self.build_url(type_name, suffix),
            method,
            data: Some(Value::Object(body)),
        })
    }
}

fn require_id<'a>(type_name: &str, snapshot: &'a Snapshot) -> Result<&'a RecordId, Failure> {
    snapshot
        .id
        .as_ref()
        .ok_or_else(|| Failure::Protocol(format!("{type_name} record has no id to send")))
}

impl<T: Transport> Adapter for RestAdapter<T> {
    fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    fn bulk_commit(&self) -> bool {
        self.config.bulk_commit
    }

    fn find(&self, descriptor: &TypeDescriptor, request: FindRequest, complete: Completion) {
        let type_name = descriptor.name();
        let (request, since_key) = match request {
            FindRequest::One(id) => (
                HttpRequest {
                    url: self.build_url(type_name, Some(id.as_key().as_ref())),
                    method: Method::Get,
                    data: None,
                },
                None,
            ),
            FindRequest::All => {
                let key = Self::since_key(type_name, None);
                (
                    HttpRequest {
                        url: self.build_url(type_name, None),
                        method: Method::Get,
                        data: self.with_since(&key, None),
                    },
                    Some(key),
                )
            }
            FindRequest::Query(query) => {
                let key = Self::since_key(type_name, Some(&query));
                (
                    HttpRequest {
                        url: self.build_url(type_name, None),
                        method: Method::Get,
                        data: self.with_since(&key, Some(query)),
                    },
                    Some(key),
                )
            }
            FindRequest::Many(ids) => (
                HttpRequest {
                    url: self.build_url(type_name, None),
                    method: Method::Get,
                    data: Some(serde_json::json!({
                        "ids": ids.iter().map(RecordId::to_json).collect::<Vec<_>>()
                    })),
                },
                None,
            ),
            FindRequest::Reference(token) => (self.reference_request(type_name, token), None),
        };
        self.send(request, since_key, complete);
    }

    fn commit(&self, descriptor: &TypeDescriptor, batch: CommitBatch, complete: Completion) {
        let request = if batch.bulk {
            self.bulk_request(descriptor, batch.operation, &batch.snapshots)
        } else {
            match batch.snapshots.as_slice() {
                [snapshot] => self.single_request(descriptor, batch.operation, snapshot),
                _ => Err(Failure::Protocol(
                    "a single-record commit needs exactly one record".to_string(),
                )),
            }
        };
        match request {
            Ok(request) => self.send(request, None, complete),
            Err(failure) => complete(Err(failure)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use indexmap::IndexMap;
    use serde_json::json;

    fn person() -> TypeDescriptor {
        TypeDescriptor::new("person").attr("name", crate::schema::Codec::String)
    }

    fn adapter(config: AdapterConfig) -> (Arc<MemoryTransport>, RestAdapter<Arc<MemoryTransport>>) {
        let transport = Arc::new(MemoryTransport::new());
        let adapter = RestAdapter::new(Arc::clone(&transport), config.with_plural("person", "people"));
        (transport, adapter)
    }

    fn snapshot(id: Option<i64>, name: &str) -> Snapshot {
        let mut attributes = IndexMap::new();
        attributes.insert("name".to_string(), json!(name));
        Snapshot {
            type_name: "person".into(),
            client_id: 1,
            id: id.map(RecordId::from),
            attributes,
            belongs_to: IndexMap::new(),
            has_many: IndexMap::new(),
        }
    }

    fn ignore() -> Completion {
        Box::new(|_| {})
    }

    #[test]
    fn urls() {
        let (_, plain) = adapter(AdapterConfig::new());
        assert_eq!(plain.build_url("person", Some("1")), "/people/1");
        let (_, namespaced) = adapter(AdapterConfig::new().with_namespace("ember"));
        assert_eq!(namespaced.build_url("person", Some("1")), "/ember/people/1");
        let (_, rooted) = adapter(AdapterConfig::new().with_url("http://api.ember.dev"));
        assert_eq!(rooted.build_url("person", Some("1")), "http://api.ember.dev/people/1");
        assert_eq!(rooted.build_url("group", Some("bulk")), "http://api.ember.dev/groups/bulk");
    }

    #[test]
    fn urls_from_raw_config_fields() {
        let config = AdapterConfig {
            url: "http://api.ember.dev/".to_string(),
            namespace: Some("/v1/".to_string()),
            ..AdapterConfig::default()
        };
        let (_, adapter) = adapter(config);
        assert_eq!(adapter.build_url("person", None), "http://api.ember.dev/v1/people");
    }

    #[test]
    fn find_many_sends_ids() {
        let (transport, adapter) = adapter(AdapterConfig::new());
        adapter.find(
            &person(),
            FindRequest::Many(vec![RecordId::from(1), RecordId::from("2")]),
            ignore(),
        );
        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "/people");
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.data, Some(json!({"ids": [1, "2"]})));
    }

    #[test]
    fn since_tokens_are_tracked_per_query() {
        let (transport, adapter) = adapter(AdapterConfig::new().with_since_param("lastToken"));
        adapter.find(&person(), FindRequest::All, ignore());
        assert_eq!(transport.last_request().unwrap().data, None);
        transport.respond(json!({"meta": {"since": "123"}, "people": []}));

        adapter.find(&person(), FindRequest::All, ignore());
        assert_eq!(transport.last_request().unwrap().data, Some(json!({"lastToken": "123"})));

        adapter.find(&person(), FindRequest::Query(json!({"page": 1})), ignore());
        assert_eq!(transport.last_request().unwrap().data, Some(json!({"page": 1})));
    }

    #[test]
    fn reference_tokens() {
        let (transport, adapter) = adapter(AdapterConfig::new().with_url("http://api.ember.dev"));
        adapter.find(&person(), FindRequest::Reference(json!({"url": "/groups/1/people"})), ignore());
        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "http://api.ember.dev/groups/1/people");
        assert_eq!(request.data, None);

        adapter.find(&person(), FindRequest::Reference(json!({"group": 1})), ignore());
        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "http://api.ember.dev/people");
        assert_eq!(request.data, Some(json!({"group": 1})));
    }

    #[test]
    fn single_commit_shapes() {
        let (transport, adapter) = adapter(AdapterConfig::new());
        let batch = |operation, id| CommitBatch {
            operation,
            bulk: false,
            snapshots: vec![snapshot(id, "Tom")],
        };
        adapter.commit(&person(), batch(Operation::Create, None), ignore());
        adapter.commit(&person(), batch(Operation::Update, Some(1)), ignore());
        adapter.commit(&person(), batch(Operation::Delete, Some(1)), ignore());
        let requests = transport.requests();
        assert_eq!(
            requests[0],
            HttpRequest {
                url: "/people".into(),
                method: Method::Post,
                data: Some(json!({"person": {"name": "Tom"}})),
            }
        );
        assert_eq!(requests[1].url, "/people/1");
        assert_eq!(requests[1].method, Method::Put);
        assert_eq!(requests[1].data, Some(json!({"person": {"name": "Tom"}})));
        assert_eq!(requests[2].method, Method::Delete);
        assert_eq!(requests[2].data, None);
    }

    #[test]
    fn bulk_commit_shapes() {
        let (transport, adapter) = adapter(AdapterConfig::new().with_bulk_commit(true));
        adapter.commit(
            &person(),
            CommitBatch {
                operation: Operation::Update,
                bulk: true,
                snapshots: vec![snapshot(Some(1), "A"), snapshot(Some(2), "B")],
            },
            ignore(),
        );
        adapter.commit(
            &person(),
            CommitBatch {
                operation: Operation::Delete,
                bulk: true,
                snapshots: vec![snapshot(Some(1), "A"), snapshot(Some(2), "B")],
            },
            ignore(),
        );
        let requests = transport.requests();
        assert_eq!(requests[0].url, "/people/bulk");
        assert_eq!(
            requests[0].data,
            Some(json!({"people": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]}))
        );
        assert_eq!(requests[1].method, Method::Delete);
        assert_eq!(requests[1].data, Some(json!({"people": [1, 2]})));
    }

    #[test]
    fn updates_without_an_id_fail_locally() {
        let (transport, adapter) = adapter(AdapterConfig::new());
        let outcome = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&outcome);
        adapter.commit(
            &person(),
            CommitBatch {
                operation: Operation::Update,
                bulk: false,
                snapshots: vec![snapshot(None, "Tom")],
            },
            Box::new(move |result| *sink.lock() = Some(result)),
        );
        assert_eq!(transport.request_count(), 0);
        assert!(matches!(*outcome.lock(), Some(Err(Failure::Protocol(_)))));
    }

    #[test]
    fn failures_are_classified() {
        let (transport, adapter) = adapter(AdapterConfig::new());
        let outcome = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&outcome);
        adapter.find(
            &person(),
            FindRequest::One(RecordId::from(1)),
            Box::new(move |result| *sink.lock() = Some(result)),
        );
        transport.fail(422, r#"{"errors": {"name": ["can't be blank"]}}"#);
        assert!(matches!(*outcome.lock(), Some(Err(Failure::Invalid(_)))));
    }
}
