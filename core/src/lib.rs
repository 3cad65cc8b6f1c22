//! JSON codec and non-blocking HTTP fetcher.
//!
//! # Overview
//! Two independent pieces that share no state:
//! - `JsonCodec` turns typed values into JSON bytes and back.
//! - `Fetcher` sends HTTP requests on its own background pool and reports
//!   each outcome through a completion callback or a future.
//!
//! # Design
//! - Every failure is a typed `Result`: `EncodingError` and `DecodingError`
//!   come back from the codec call itself, `TransportError` arrives with the
//!   fetch completion. Nothing is retried.
//! - The fetcher is an owned value created by the caller; the network is
//!   reached through the `Transport` trait so tests can simulate it.
//! - HTTP error statuses are ordinary responses; only network failures are
//!   errors.

pub mod codec;
pub mod error;
pub mod fetcher;
mod finite;
pub mod http;
pub mod transport;

pub use crate::codec::{CodecConfig, EncodedPayload, JsonCodec, NonFiniteFloats};
pub use crate::error::{DecodingError, EncodingError, RequestError, TransportError};
pub use crate::fetcher::{Completion, DataTask, Fetcher, FetcherConfig, TaskState};
pub use crate::http::{HttpMethod, HttpRequest, HttpResponse};
pub use crate::transport::{Transport, UreqTransport};
