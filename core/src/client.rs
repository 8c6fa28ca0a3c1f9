//! Build operations façade over the build server REST API.
//!
//! # Design
//! Every operation is split in three: a `build_*` method that validates
//! input and produces an `HttpRequest`, a `parse_*` method that maps an
//! `HttpResponse` to a typed outcome, and a high-level method that runs the
//! exchange through the shared `Transport`. The split keeps every payload
//! and status-code rule testable without a server.
//!
//! Status interpretation lives here rather than in the transport because
//! operations disagree about what a status means: 404 on the queue endpoint
//! means the build already left the queue, 404 on the builds endpoint means
//! the build does not exist.
//!
//! Nothing is retried. `start_build` in particular enqueues a new build on
//! every successful call.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{BuildServerError, Result};
use crate::http::{HttpRequest, HttpResponse};
use crate::query::BuildListQuery;
use crate::transport::{Transport, TransportClient, TransportConfig};
use crate::types::{Artifact, BuildDetails, BuildListResult, NewBuild, StopRequest};

const BUILDS_PATH: &str = "/app/rest/builds";
const QUEUE_PATH: &str = "/app/rest/buildQueue";

/// Stateless client for build server operations.
///
/// Cloning is cheap; clones share the same transport.
#[derive(Debug)]
pub struct BuildServerClient<T: Transport = TransportClient> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for BuildServerClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl BuildServerClient<TransportClient> {
    /// Create a client with a fresh `ureq`-backed transport.
    pub fn connect(config: &TransportConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(TransportClient::new(config)?)))
    }
}

impl<T: Transport> BuildServerClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // -----------------------------------------------------------------------
    // High-level operations
    // -----------------------------------------------------------------------

    pub fn get_build(&self, id: u64) -> Result<BuildDetails> {
        let response = self.transport.execute(self.build_get_build(id))?;
        self.parse_get_build(id, response)
    }

    pub fn list_builds(&self, query: &BuildListQuery) -> Result<BuildListResult> {
        let response = self.transport.execute(self.build_list_builds(query)?)?;
        self.parse_list_builds(response)
    }

    /// Enqueue a build and return its id. Not idempotent.
    pub fn start_build(&self, input: &NewBuild) -> Result<u64> {
        let request = self.build_start_build(input)?;
        let response = self.transport.execute(request)?;
        let details = self.parse_start_build(response)?;
        info!(
            id = details.id,
            pipeline = %input.pipeline_id,
            "build queued"
        );
        Ok(details.id)
    }

    pub fn cancel_queued_build(&self, id: u64, comment: Option<&str>) -> Result<()> {
        let response = self
            .transport
            .execute(self.build_cancel_queued_build(id, comment)?)?;
        self.parse_cancel_queued_build(id, response)?;
        info!(id, "queued build cancelled");
        Ok(())
    }

    pub fn stop_build(&self, id: u64, comment: Option<&str>) -> Result<()> {
        let response = self.transport.execute(self.build_stop_build(id, comment)?)?;
        self.parse_stop_build(id, response)?;
        info!(id, "running build stopped");
        Ok(())
    }

    /// Fetch an artifact file. The content is returned untouched together
    /// with the content type the server declared.
    pub fn get_artifact_text_file(&self, path: &str, id: u64) -> Result<Artifact> {
        let response = self.transport.execute(self.build_get_artifact(path, id)?)?;
        self.parse_get_artifact(path, id, response)
    }

    // -----------------------------------------------------------------------
    // Request builders
    // -----------------------------------------------------------------------

    pub fn build_get_build(&self, id: u64) -> HttpRequest {
        HttpRequest::get(format!("{BUILDS_PATH}/id:{id}"))
    }

    pub fn build_list_builds(&self, query: &BuildListQuery) -> Result<HttpRequest> {
        let request = HttpRequest::get(BUILDS_PATH);
        Ok(match query.locator()? {
            Some(locator) => request.with_query("locator", locator),
            None => request,
        })
    }

    pub fn build_start_build(&self, input: &NewBuild) -> Result<HttpRequest> {
        let payload = input.to_request()?;
        let body = serde_json::to_vec(&payload).map_err(|e| BuildServerError::Encode(e.to_string()))?;
        debug!(pipeline = %input.pipeline_id, bytes = body.len(), "queue payload encoded");
        Ok(HttpRequest::post_json(QUEUE_PATH, body))
    }

    pub fn build_cancel_queued_build(&self, id: u64, comment: Option<&str>) -> Result<HttpRequest> {
        let body = encode_stop(&StopRequest::cancel(comment))?;
        Ok(HttpRequest::post_json(format!("{QUEUE_PATH}/id:{id}"), body))
    }

    pub fn build_stop_build(&self, id: u64, comment: Option<&str>) -> Result<HttpRequest> {
        let body = encode_stop(&StopRequest::cancel(comment))?;
        Ok(HttpRequest::post_json(format!("{BUILDS_PATH}/id:{id}"), body))
    }

    pub fn build_get_artifact(&self, path: &str, id: u64) -> Result<HttpRequest> {
        let encoded = encode_artifact_path(path)?;
        Ok(HttpRequest::get(format!("{BUILDS_PATH}/id:{id}/artifacts/content/{encoded}"))
            .with_header("accept", "*/*"))
    }

    // -----------------------------------------------------------------------
    // Response parsers
    // -----------------------------------------------------------------------

    pub fn parse_get_build(&self, id: u64, response: HttpResponse) -> Result<BuildDetails> {
        if response.status == 404 {
            return Err(BuildServerError::NotFound(format!("build {id}")));
        }
        expect_success(&response)?;
        decode(&response)
    }

    pub fn parse_list_builds(&self, response: HttpResponse) -> Result<BuildListResult> {
        if response.status == 404 {
            return Err(BuildServerError::NotFound(response.body_text()));
        }
        expect_success(&response)?;
        decode(&response)
    }

    pub fn parse_start_build(&self, response: HttpResponse) -> Result<BuildDetails> {
        expect_success(&response)?;
        let details: BuildDetails = decode(&response)?;
        if details.id == 0 {
            return Err(BuildServerError::Decode {
                message: "queued build response carries no build id".to_string(),
                body_len: response.body.len(),
                snippet: response.body_text().chars().take(200).collect(),
            });
        }
        Ok(details)
    }

    /// 404 and 409 from the queue endpoint both mean the build is no longer
    /// queued: it started, finished, or was never there.
    pub fn parse_cancel_queued_build(&self, id: u64, response: HttpResponse) -> Result<()> {
        match response.status {
            404 | 409 => Err(BuildServerError::InvalidState(format!(
                "build {id} is not queued: {}",
                response.body_text().trim()
            ))),
            _ => expect_success(&response),
        }
    }

    pub fn parse_stop_build(&self, id: u64, response: HttpResponse) -> Result<()> {
        match response.status {
            404 => Err(BuildServerError::NotFound(format!("build {id}"))),
            409 => Err(BuildServerError::InvalidState(format!(
                "build {id} is not running: {}",
                response.body_text().trim()
            ))),
            _ => expect_success(&response),
        }
    }

    pub fn parse_get_artifact(&self, path: &str, id: u64, response: HttpResponse) -> Result<Artifact> {
        if response.status == 404 {
            return Err(BuildServerError::NotFound(format!(
                "artifact {path:?} in build {id}"
            )));
        }
        expect_success(&response)?;
        let content_type = response.content_type().map(str::to_string);
        Ok(Artifact {
            content: response.body,
            content_type,
        })
    }
}

fn expect_success(response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(BuildServerError::UnexpectedStatus {
        status: response.status,
        body: response.body_text(),
    })
}

fn decode<D: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<D> {
    serde_json::from_slice(&response.body).map_err(|e| BuildServerError::decode(&e, &response.body))
}

fn encode_stop(payload: &StopRequest) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| BuildServerError::Encode(e.to_string()))
}

/// Percent-encode each segment of a relative artifact path.
fn encode_artifact_path(path: &str) -> Result<String> {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(BuildServerError::invalid_argument("artifact path must not be empty"));
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment == "." || segment == ".." {
            return Err(BuildServerError::invalid_argument(format!(
                "artifact path {path:?} must not contain '.' or '..' segments"
            )));
        }
        segments.push(urlencoding::encode(segment).into_owned());
    }
    Ok(segments.join("/"))
}
