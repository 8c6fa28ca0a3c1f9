//! Error types for the build server client.
//!
//! # Design
//! Callers need to tell apart five situations: bad input caught before any
//! I/O, a network failure, a response that does not decode, a missing build
//! or artifact, and a lifecycle transition the server refused. Each gets its
//! own variant. Statuses an operation does not expect at all land in
//! `UnexpectedStatus` with the raw status and body.

use std::error::Error as StdError;

use thiserror::Error;

type Cause = Box<dyn StdError + Send + Sync + 'static>;

const SNIPPET_LEN: usize = 200;

/// Errors returned by the transport and the build operations façade.
#[derive(Debug, Error)]
pub enum BuildServerError {
    /// Malformed caller input, detected before any network call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("transport timeout: {message}")]
    TransportTimeout {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("TLS error: {message}")]
    TransportTls {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// The response body did not match the expected shape.
    #[error("failed to decode response ({body_len} bytes): {message}; body starts with {snippet:?}")]
    Decode {
        message: String,
        body_len: usize,
        snippet: String,
    },

    /// The request payload could not be serialized to JSON.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The server confirmed the build or artifact does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cancel or stop is not valid for the build's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unexpected HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Coarse classification of a `BuildServerError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Transport,
    TransportTimeout,
    TransportTls,
    Decode,
    Encode,
    NotFound,
    InvalidState,
    UnexpectedStatus,
}

impl BuildServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildServerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BuildServerError::Transport { .. } => ErrorKind::Transport,
            BuildServerError::TransportTimeout { .. } => ErrorKind::TransportTimeout,
            BuildServerError::TransportTls { .. } => ErrorKind::TransportTls,
            BuildServerError::Decode { .. } => ErrorKind::Decode,
            BuildServerError::Encode(_) => ErrorKind::Encode,
            BuildServerError::NotFound(_) => ErrorKind::NotFound,
            BuildServerError::InvalidState(_) => ErrorKind::InvalidState,
            BuildServerError::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BuildServerError::InvalidArgument(message.into())
    }

    /// Build a `Decode` error carrying the body size and a short prefix of it.
    pub fn decode(err: &serde_json::Error, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        BuildServerError::Decode {
            message: err.to_string(),
            body_len: body.len(),
            snippet: text.chars().take(SNIPPET_LEN).collect(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::TransportTimeout | ErrorKind::TransportTls
        )
    }
}

pub type Result<T> = std::result::Result<T, BuildServerError>;
