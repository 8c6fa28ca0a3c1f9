//! Synchronous client core for a TeamCity-style build server REST API.
//!
//! # Overview
//! Queues, cancels and stops builds, queries build details and history, and
//! downloads build artifacts. `BuildServerClient` turns each operation into
//! one authenticated HTTP exchange executed by a `Transport`.
//!
//! # Design
//! - `TransportClient` owns connection policy (timeouts, TLS verification)
//!   and the bearer credential. It is immutable and safe to share.
//! - `BuildServerClient` owns payload shapes and status interpretation. Each
//!   operation is split into `build_*` (produces request) and `parse_*`
//!   (consumes response) so the I/O boundary is explicit.
//! - Caller input is validated before any request is sent; no operation is
//!   retried.

pub mod client;
pub mod error;
pub mod http;
pub mod input;
pub mod query;
pub mod transport;
pub mod types;

pub use client::BuildServerClient;
pub use error::{BuildServerError, ErrorKind, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use input::{parse_dependencies, parse_dependency, parse_key_value, parse_properties};
pub use query::{normalize_status, page_offset, BuildListQuery, BuildStatus};
pub use transport::{Transport, TransportClient, TransportConfig};
pub use types::{
    Artifact, BuildComment, BuildDetails, BuildListResult, BuildProperty, BuildRequest,
    BuildTypeRef, DependencyRef, DependencySet, NewBuild, PropertySet, StopRequest,
};
