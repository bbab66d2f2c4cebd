//! HTTP transport for ketone stores.
//!
//! [`HttpTransport`] implements [`ketone_core::Transport`] with `reqwest`,
//! running each request as a task on a tokio runtime. GET data is sent as
//! bracket-style query parameters, everything else as a JSON body.
//!
//! # Example
//!
//! ```ignore
//! use ketone_core::{AdapterConfig, RestAdapter, Store, TypeRegistry};
//! use ketone_http::HttpTransport;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = HttpTransport::current().unwrap();
//!     let config = AdapterConfig::new().with_url("https://api.example.com");
//!     let store = Store::new(TypeRegistry::new(), RestAdapter::new(transport, config)).unwrap();
//! }
//! ```

mod error;
mod query;
mod transport;

pub use error::HttpError;
pub use query::encode_query;
pub use transport::HttpTransport;
