//! Error types for the fetch core.
//!
//! # Design
//! Only construction-time problems surface as `Err` to callers: an invalid
//! request (`RequestError`) or an engine that could not start
//! (`EngineError`). Everything that goes wrong while a task runs is turned
//! into an `ApiResult` value by the pipeline. `TransportError` is therefore
//! never propagated; it is captured on the `HttpResponse` of the attempt that
//! produced it.

use thiserror::Error;

/// Errors returned by `RequestBuilder::build`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Query and header entries need both a key and a value.
    #[error("invalid {kind} entry, key [{key}] value [{value}]")]
    EmptyEntry {
        kind: &'static str,
        key: String,
        value: String,
    },

    #[error("invalid {which} timeout: {millis} ms (minimum {minimum} ms)")]
    TimeoutTooSmall {
        which: &'static str,
        millis: u64,
        minimum: u64,
    },

    #[error("invalid try count: {0}")]
    InvalidTryCount(u32),

    #[error("pinned certificate is empty")]
    EmptyCertificate,

    #[error("basic auth secret is empty")]
    EmptyAuthSecret,

    #[error("GET does not support file upload")]
    FileOnGet,

    #[error("invalid file part: {0}")]
    InvalidFilePart(String),

    #[error("file is missing or unreadable: {0}")]
    UnreadableFile(String),
}

/// A failure captured during one transport attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("pinned certificate could not be parsed: {0}")]
    InvalidCertificate(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while constructing an `Engine`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("worker pool could not be built: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    #[error("global engine is already initialized")]
    AlreadyInitialized,
}

/// Returned by `ApiTask::write_cache`. The engine logs it and moves on.
#[derive(Debug, Error)]
#[error("cache write failed: {message}")]
pub struct CacheError {
    pub message: String,
}

impl CacheError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returned by `ApiTask::parse_response` when the body cannot become a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseFailure {
    /// The body is not in the expected format.
    #[error("malformed response body")]
    Malformed,

    /// The body is well-formed but carries an error reported by the server.
    #[error("server error [{code}]: {message:?}")]
    Server {
        code: String,
        message: Option<String>,
    },
}

impl ParseFailure {
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        ParseFailure::Server {
            code: code.into(),
            message: Some(message.into()),
        }
    }
}

impl From<serde_json::Error> for ParseFailure {
    fn from(_: serde_json::Error) -> Self {
        ParseFailure::Malformed
    }
}
