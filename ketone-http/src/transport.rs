use ketone_core::{HttpFailure, HttpRequest, Method, Responder, Transport};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use crate::error::HttpError;
use crate::query::encode_query;

/// A [`Transport`] sending requests with `reqwest` on a tokio runtime.
///
/// Each request runs as its own task; the responder is called from that task.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    runtime: Handle,
}

impl HttpTransport {
    /// Creates a transport spawning onto `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self::with_client(reqwest::Client::new(), runtime)
    }

    /// Creates a transport on the runtime of the calling task.
    pub fn current() -> Result<Self, HttpError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Creates a transport with a preconfigured client (headers, timeouts, TLS).
    pub fn with_client(http: reqwest::Client, runtime: Handle) -> Self {
        Self { http, runtime }
    }

    /// Sends one request and reads the JSON body. An empty 2xx body is `None`.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: HttpRequest) -> Result<Option<Value>, HttpError> {
        let builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
            Method::Put => self.http.put(&request.url),
            Method::Delete => self.http.delete(&request.url),
        };
        let builder = match (&request.method, &request.data) {
            (_, None) => builder,
            (Method::Get, Some(data)) => builder.query(&encode_query(data)),
            (_, Some(data)) => builder.json(data),
        };

        let response = builder
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "received response");

        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|source| HttpError::Json {
                status: status.as_u16(),
                body,
                source,
            })
    }
}

impl Transport for HttpTransport {
    fn request(&self, request: HttpRequest, respond: Responder) {
        let transport = self.clone();
        self.runtime.spawn(async move {
            let outcome = transport
                .execute(request)
                .await
                .map_err(HttpError::into_failure);
            respond(outcome);
        });
    }
}

impl From<HttpError> for HttpFailure {
    fn from(err: HttpError) -> Self {
        err.into_failure()
    }
}
