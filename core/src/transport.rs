//! The seam between the client and the network.
//!
//! # Design
//! The client only depends on `Transport`. `UreqTransport` is the blocking
//! implementation used in production and in the live integration test; unit
//! tests plug in scripted transports instead.
//!
//! Non-2xx statuses are returned as data, never as `Err`. Only failures where
//! no response was obtained at all become a `TransportError`. Redirects are
//! not followed because the remote API reports update targets with a 303.

use std::fmt;

use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// A failure where no HTTP response was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Short machine-readable code, e.g. `connection_failed` or `timeout`.
    pub code: String,
    pub message: String,
}

impl TransportError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Executes one HTTP exchange.
pub trait Transport {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request)
    }
}

/// Blocking transport backed by a `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let content_type = request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| "application/json".to_string());

        let result = match (request.method, request.body) {
            (HttpMethod::Get, _) => with_headers(self.agent.get(&request.url), &request.headers).call(),
            (HttpMethod::Delete, _) => with_headers(self.agent.delete(&request.url), &request.headers).call(),
            (HttpMethod::Post, Some(body)) => with_headers(self.agent.post(&request.url), &request.headers)
                .content_type(&content_type)
                .send(body.as_bytes()),
            (HttpMethod::Post, None) => with_headers(self.agent.post(&request.url), &request.headers).send_empty(),
            (HttpMethod::Put, Some(body)) => with_headers(self.agent.put(&request.url), &request.headers)
                .content_type(&content_type)
                .send(body.as_bytes()),
            (HttpMethod::Put, None) => with_headers(self.agent.put(&request.url), &request.headers).send_empty(),
        };

        let mut response = result.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.body_mut().read_to_string().map_err(transport_error)?;

        Ok(HttpResponse { status, headers, body })
    }
}

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &[(String, String)]) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        if !name.eq_ignore_ascii_case("content-type") {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
}

fn transport_error(err: ureq::Error) -> TransportError {
    let code = match &err {
        ureq::Error::Timeout(_) => "timeout",
        ureq::Error::HostNotFound => "host_not_found",
        ureq::Error::ConnectionFailed => "connection_failed",
        ureq::Error::Io(_) => "io",
        _ => "transport",
    };
    TransportError::new(code, err.to_string())
}
