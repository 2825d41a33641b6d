//! Document-management service abstraction.
//!
//! The `DocumentService` trait is what the pipeline talks to; the HTTP
//! implementation targets the platform REST API.

mod http;
mod types;

pub use http::HttpDocumentService;
pub use types::*;
