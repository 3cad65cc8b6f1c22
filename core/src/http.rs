//! HTTP requests and responses described as plain data.
//!
//! # Design
//! A request is built, moved into the fetcher, and never touched again; a
//! response is produced once by a transport and handed to the caller. Both
//! keep their fields public so tests and alternative transports can build
//! them directly.
//!
//! Request headers are an ordered list of pairs because the same name may
//! legitimately appear more than once. Response headers use
//! `http::HeaderMap`, whose lookups ignore ASCII case.

use std::fmt;
use std::str::FromStr;

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::codec::JsonCodec;
use crate::error::{DecodingError, EncodingError, RequestError};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Whether the method conventionally carries a request body. Transports
    /// still send a body set on any other method.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(RequestError::UnknownMethod(s.to_string())),
        }
    }
}

/// An HTTP request to an absolute `http` or `https` URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: &str) -> Result<Self, RequestError> {
        let parsed = Url::parse(url).map_err(|source| RequestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(RequestError::UnsupportedScheme(other.to_string())),
        }
        Ok(Self {
            method,
            url: parsed,
            headers: Vec::new(),
            body: None,
        })
    }

    pub fn get(url: &str) -> Result<Self, RequestError> {
        Self::new(HttpMethod::Get, url)
    }

    /// Append a header. Earlier values for the same name are kept.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replace every value of `name` (compared case-insensitively) with
    /// `value`.
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Encode `value` with `codec` as the body and mark it as JSON.
    pub fn with_json<T: Serialize + ?Sized>(
        self,
        codec: &JsonCodec,
        value: &T,
    ) -> Result<Self, EncodingError> {
        let payload = codec.encode(value)?;
        Ok(self
            .set_header("content-type", "application/json")
            .with_body(payload.into_bytes()))
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Where the response came from, after any redirects were followed.
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First value of header `name`, compared case-insensitively.
    ///
    /// Absent headers, and values that are not visible ASCII, yield `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of header `name` in the order received.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Canonical reason phrase, e.g. `"Not Found"`, or `"Unknown"`.
    pub fn status_text(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self, codec: &JsonCodec) -> Result<T, DecodingError> {
        codec.decode(&self.body)
    }
}
