//! The HTTP boundary.
//!
//! The store never talks to the network itself. It hands a [`HttpRequest`] and
//! a completion callback to a [`Transport`], which calls back exactly once with
//! either the parsed response body or an [`HttpFailure`].

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    /// Query parameters for GET, the JSON body otherwise.
    pub data: Option<Value>,
}

/// A non-2xx response or a failure to get a response at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    /// None when no response arrived.
    pub status: Option<u16>,
    pub body: String,
}

/// Receives the outcome of one request. `Ok(None)` is an empty 2xx body.
pub type Responder = Box<dyn FnOnce(Result<Option<Value>, HttpFailure>) + Send>;

pub trait Transport: Send + Sync {
    /// Starts a request. `respond` must be called exactly once.
    fn request(&self, request: HttpRequest, respond: Responder);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(&self, request: HttpRequest, respond: Responder) {
        (**self).request(request, respond)
    }
}

/// A transport that records requests and completes them on demand, in the
/// order they were issued.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    log: Vec<HttpRequest>,
    pending: VecDeque<(HttpRequest, Responder)>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request issued so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.state.lock().log.last().cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Completes the oldest pending request with a JSON body.
    pub fn respond(&self, body: Value) -> Option<HttpRequest> {
        self.complete(Ok(Some(body)))
    }

    /// Completes the oldest pending request with an empty 2xx body.
    pub fn respond_empty(&self) -> Option<HttpRequest> {
        self.complete(Ok(None))
    }

    /// Fails the oldest pending request.
    pub fn fail(&self, status: u16, body: impl Into<String>) -> Option<HttpRequest> {
        self.complete(Err(HttpFailure {
            status: Some(status),
            body: body.into(),
        }))
    }

    /// Fails the oldest pending request without a response.
    pub fn disconnect(&self) -> Option<HttpRequest> {
        self.complete(Err(HttpFailure {
            status: None,
            body: "connection reset".to_string(),
        }))
    }

    fn complete(&self, outcome: Result<Option<Value>, HttpFailure>) -> Option<HttpRequest> {
        // The responder may issue new requests, so the lock is released first.
        let (request, respond) = self.state.lock().pending.pop_front()?;
        respond(outcome);
        Some(request)
    }
}

impl Transport for MemoryTransport {
    fn request(&self, request: HttpRequest, respond: Responder) {
        log::debug!("{} {}", request.method, request.url);
        let mut state = self.state.lock();
        state.log.push(request.clone());
        state.pending.push_back((request, respond));
    }
}
