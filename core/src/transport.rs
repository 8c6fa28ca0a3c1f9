//! Authenticated HTTP transport for the build server.
//!
//! # Design
//! `Transport` is the seam between the façade and the network. The
//! production implementation, `TransportClient`, wraps a blocking `ureq`
//! agent configured once from a `TransportConfig` and never mutated
//! afterwards, so one instance can be shared across threads. It never
//! interprets HTTP status codes: a 404 is data for the façade, not an error
//! here. Only failures to complete the exchange are errors.
//!
//! ureq establishes TCP and TLS inside a single connect phase, so that phase
//! is bounded by `dial_timeout + tls_handshake_timeout`; name resolution is
//! bounded by `dial_timeout` and the whole call by `request_timeout`.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use tracing::debug;
use ureq::tls::TlsConfig;
use ureq::Agent;

use crate::error::{BuildServerError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BODY_BYTES: u64 = 1024 * 1024 * 1024;

/// Executes one HTTP exchange against the build server.
///
/// Implementations must be safe to share between threads and must return
/// either the complete response or an error, never a partial body.
pub trait Transport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Connection policy and credential for one build server.
#[derive(Clone)]
pub struct TransportConfig {
    pub server_url: String,
    pub token: String,
    pub request_timeout: Duration,
    pub dial_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    /// Skip TLS certificate verification (self-signed internal servers).
    pub insecure: bool,
}

impl TransportConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            request_timeout: DEFAULT_TIMEOUT,
            dial_timeout: DEFAULT_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TIMEOUT,
            insecure: false,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    /// Set all three timeouts at once.
    pub fn with_timeouts(self, timeout: Duration) -> Self {
        self.with_request_timeout(timeout)
            .with_dial_timeout(timeout)
            .with_tls_handshake_timeout(timeout)
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    fn base_url(&self) -> Result<String> {
        let url = self.server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(BuildServerError::invalid_argument(format!(
                "server URL {url:?} must start with http:// or https://"
            )));
        }
        Ok(url.trim_end_matches('/').to_string())
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("server_url", &self.server_url)
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("dial_timeout", &self.dial_timeout)
            .field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// `Transport` backed by a blocking `ureq` agent.
#[derive(Clone)]
pub struct TransportClient {
    agent: Agent,
    base_url: String,
    authorization: String,
}

impl TransportClient {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.request_timeout))
            .timeout_resolve(Some(config.dial_timeout))
            .timeout_connect(Some(config.dial_timeout + config.tls_handshake_timeout))
            .tls_config(
                TlsConfig::builder()
                    .disable_verification(config.insecure)
                    .build(),
            )
            .build()
            .new_agent();

        Ok(Self {
            agent,
            base_url,
            authorization: format!("Bearer {}", config.token),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Default headers, with any caller-supplied header of the same name
    /// taking precedence.
    fn headers(&self, request: &HttpRequest) -> Vec<(String, String)> {
        let mut headers = vec![
            ("authorization".to_string(), self.authorization.clone()),
            ("accept".to_string(), "application/json".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        for (name, value) in &request.headers {
            match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some(existing) => existing.1 = value.clone(),
                None => headers.push((name.clone(), value.clone())),
            }
        }
        headers
    }
}

impl fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Transport for TransportClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let headers = self.headers(&request);
        let context = format!("{} {}", request.method.as_str(), request.path);

        let result = match request.method {
            HttpMethod::Get => {
                let mut builder = self.agent.get(&url);
                for (key, value) in &request.query {
                    builder = builder.query(key, value);
                }
                for (name, value) in &headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()
            }
            HttpMethod::Post => {
                let mut builder = self.agent.post(&url);
                for (key, value) in &request.query {
                    builder = builder.query(key, value);
                }
                for (name, value) in &headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                match &request.body {
                    Some(body) => builder.send(&body[..]),
                    None => builder.send_empty(),
                }
            }
        };
        let mut response = result.map_err(|e| map_ureq_error(&context, e))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| map_ureq_error(&format!("{context}: reading body"), e))?;

        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status,
            bytes = body.len(),
            "build server exchange"
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FailureKind {
    Timeout,
    Tls,
    Other,
}

fn map_ureq_error(context: &str, err: ureq::Error) -> BuildServerError {
    let message = format!("{context}: {err}");
    let kind = classify(&err);
    debug!(error = %message, "build server exchange failed");
    let source: Option<Box<dyn StdError + Send + Sync>> = Some(Box::new(err));
    match kind {
        FailureKind::Timeout => BuildServerError::TransportTimeout { message, source },
        FailureKind::Tls => BuildServerError::TransportTls { message, source },
        FailureKind::Other => BuildServerError::Transport { message, source },
    }
}

fn classify(err: &ureq::Error) -> FailureKind {
    match err {
        ureq::Error::Timeout(_) => FailureKind::Timeout,
        ureq::Error::Tls(_) | ureq::Error::Rustls(_) => FailureKind::Tls,
        ureq::Error::Io(io_err) => classify_io(io_err),
        _ => FailureKind::Other,
    }
}

fn classify_io(err: &io::Error) -> FailureKind {
    if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
        return FailureKind::Timeout;
    }
    match err.get_ref() {
        Some(inner) if inner.is::<rustls::Error>() => FailureKind::Tls,
        _ => FailureKind::Other,
    }
}
