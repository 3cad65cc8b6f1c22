//! Error types for the codec, the request model and the fetcher.
//!
//! # Design
//! Each failure family gets its own enum so callers can tell at the type
//! level where a failure came from. Codec errors surface synchronously from
//! `encode`/`decode`; `TransportError` is only ever delivered through a
//! fetch completion (callback or future). None of them are fatal: the
//! caller decides whether to retry, log or give up.

use std::fmt::Display;

use serde_json::error::Category;

/// A value could not be represented as JSON.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// JSON has no literal for NaN or the infinities.
    #[error("non-finite float {0} cannot be represented in JSON")]
    NonFiniteFloat(f64),

    /// The serializer rejected the value, e.g. a map with non-string keys.
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised by the value's own `Serialize` implementation.
    #[error("serialization failed: {0}")]
    Custom(String),
}

impl serde::ser::Error for EncodingError {
    fn custom<T: Display>(msg: T) -> Self {
        EncodingError::Custom(msg.to_string())
    }
}

/// Bytes could not be turned back into the requested shape.
///
/// Decoding never yields a partially built value: any of these variants means
/// nothing was produced.
#[derive(Debug, thiserror::Error)]
pub enum DecodingError {
    /// The input is not well-formed JSON.
    #[error("malformed JSON at line {line} column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// The input ended before the value was complete.
    #[error("truncated JSON at line {line} column {column}")]
    Truncated { line: usize, column: usize },

    /// Well-formed JSON that does not fit the target type: a missing
    /// required field, a wrong scalar type, an unknown enum variant.
    #[error("JSON does not match the expected shape: {message}")]
    Shape { message: String },

    #[error("I/O error while decoding: {0}")]
    Io(String),
}

impl From<serde_json::Error> for DecodingError {
    fn from(e: serde_json::Error) -> Self {
        let (line, column) = (e.line(), e.column());
        match e.classify() {
            Category::Eof => DecodingError::Truncated { line, column },
            Category::Syntax => DecodingError::Syntax {
                message: e.to_string(),
                line,
                column,
            },
            Category::Data => DecodingError::Shape {
                message: e.to_string(),
            },
            Category::Io => DecodingError::Io(e.to_string()),
        }
    }
}

/// A request could not be constructed.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Only `http` and `https` targets can be fetched.
    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("unknown HTTP method {0:?}")]
    UnknownMethod(String),
}

/// The network layer failed to deliver a response.
///
/// HTTP error statuses are not transport errors: a 404 or 500 arrives as a
/// normal `HttpResponse`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("host not found")]
    HostNotFound,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection failed")]
    ConnectionFailed,

    #[error("request timed out")]
    Timeout,

    /// The response body exceeded the configured limit (in bytes).
    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(u64),

    #[error("I/O error: {0}")]
    Io(String),

    /// The peer spoke something that is not valid HTTP, or the request
    /// itself could not be put on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport panicked or the background job was lost.
    #[error("request aborted: {0}")]
    Aborted(String),

    /// The background pool could not be started.
    #[error("failed to start fetch runtime: {0}")]
    Runtime(String),
}
