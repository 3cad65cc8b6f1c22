//! The seam between the fetcher and the network.
//!
//! # Design
//! `Transport` is a blocking, object-safe trait: it takes a request and
//! returns the buffered response or the reason none arrived. The fetcher
//! runs it on its background pool, so an implementation never has to know
//! about callbacks or futures. Tests plug in simulated transports; real
//! traffic goes through `UreqTransport`.

use std::io;

use ureq::typestate::{WithBody, WithoutBody};
use ureq::{Agent, Body, RequestBuilder, ResponseExt};
use url::Url;

use crate::error::TransportError;
use crate::fetcher::FetcherConfig;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Delivers one request and returns its response.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `Transport` backed by a `ureq::Agent`.
///
/// Every status code comes back as a response; only failures to reach the
/// server or read its reply are errors. A request body is sent whenever the
/// request carries one, whatever the method.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
    max_body_bytes: u64,
}

impl UreqTransport {
    pub fn new(config: &FetcherConfig) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(config.timeout())
            .build()
            .new_agent();
        Self {
            agent,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let result = match request.method {
            HttpMethod::Get => call(self.agent.get(url), request),
            HttpMethod::Head => call(self.agent.head(url), request),
            HttpMethod::Delete => call(self.agent.delete(url), request),
            HttpMethod::Options => call(self.agent.options(url), request),
            HttpMethod::Post => send(self.agent.post(url), request),
            HttpMethod::Put => send(self.agent.put(url), request),
            HttpMethod::Patch => send(self.agent.patch(url), request),
        };
        let mut response = result.map_err(|e| map_request_error(e, &request.url))?;

        // Redirects are followed by the agent; report where we ended up.
        let final_url = Url::parse(&response.get_uri().to_string())
            .unwrap_or_else(|_| request.url.clone());

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .body_mut()
            .with_config()
            .limit(self.max_body_bytes)
            .read_to_vec()
            .map_err(map_error)?;

        Ok(HttpResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

fn call(
    mut builder: RequestBuilder<WithoutBody>,
    request: &HttpRequest,
) -> Result<http::Response<Body>, ureq::Error> {
    if request.body.is_some() {
        return send(builder.force_send_body(), request);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.call()
}

fn send(
    mut builder: RequestBuilder<WithBody>,
    request: &HttpRequest,
) -> Result<http::Response<Body>, ureq::Error> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match &request.body {
        Some(body) => builder.send(body.as_slice()),
        None => builder.send_empty(),
    }
}

/// Map a failed request to `url`, telling resolver failures apart from
/// other I/O errors.
///
/// The resolver reports a failed lookup as plain I/O, so an `Io` error for a
/// host that does not resolve is a DNS failure.
fn map_request_error(err: ureq::Error, url: &Url) -> TransportError {
    match map_error(err) {
        TransportError::Io(message) if !resolves(url) => {
            log::debug!("{url}: lookup failed: {message}");
            TransportError::HostNotFound
        }
        other => other,
    }
}

fn resolves(url: &Url) -> bool {
    url.socket_addrs(|| None)
        .map(|addrs| !addrs.is_empty())
        .unwrap_or(false)
}

fn map_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::HostNotFound => TransportError::HostNotFound,
        ureq::Error::ConnectionFailed => TransportError::ConnectionFailed,
        ureq::Error::Timeout(_) => TransportError::Timeout,
        ureq::Error::BodyExceedsLimit(limit) => TransportError::BodyTooLarge(limit),
        ureq::Error::Io(e) => match e.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        },
        other => TransportError::Protocol(other.to_string()),
    }
}
