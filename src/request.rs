//! The abstract, engine-facing request and its translation from the
//! transport request.
//!
//! One [`Request`] is built per accepted request and discarded when the
//! engine is done with it. Translation is where routing happens in this
//! layer: the incoming URL must fall under one of the configured base URIs
//! (or the authority fallback must be enabled) or the request fails with
//! [`Error::Routing`] before the engine ever sees it.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, Method, Version};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use url::Url;

use crate::config::HostConfig;
use crate::error::{BoxError, Error};
use crate::matcher;

/// The split request URL: the matched base on one side, the app-local
/// remainder on the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    pub scheme: String,
    pub host: String,
    /// `None` when the request arrived on the scheme's default port.
    pub port: Option<u16>,
    /// The matched base URI's path, trailing slash trimmed. Empty for a
    /// root base.
    pub base_path: String,
    /// The app-local path, always starting with `/`.
    pub path: String,
    /// The raw query string, without the leading `?`. Empty when absent.
    pub query: String,
}

/// An incoming request, translated off the transport for the engine.
pub struct Request {
    method: Method,
    url: RequestUrl,
    headers: HeaderMap,
    body: UnsyncBoxBody<Bytes, BoxError>,
    expected_length: u64,
    remote_addr: Option<SocketAddr>,
    client_certificate: Option<Vec<u8>>,
    protocol_version: String,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &RequestUrl {
        &self.url
    }

    /// All request headers. Keys compare case-insensitively and values keep
    /// their arrival order.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body length announced by the request: the parsed `Content-Length`
    /// when the header carries exactly one numeric value, 0 otherwise.
    pub fn expected_length(&self) -> u64 {
        self.expected_length
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The client certificate, when client certificates are enabled and the
    /// connection presented one.
    pub fn client_certificate(&self) -> Option<&[u8]> {
        self.client_certificate.as_deref()
    }

    /// The negotiated protocol, e.g. `HTTP/1.1` or `HTTP/2`.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Streaming access to the request body.
    pub fn body_mut(&mut self) -> &mut UnsyncBoxBody<Bytes, BoxError> {
        &mut self.body
    }

    /// Reads the remaining body into memory.
    pub async fn body_bytes(&mut self) -> Result<Bytes, Error> {
        let body = std::mem::replace(&mut self.body, empty_body());
        let collected = body
            .collect()
            .await
            .map_err(|e| Error::Translation(format!("request body: {e}")))?;
        Ok(collected.to_bytes())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("expected_length", &self.expected_length)
            .field("remote_addr", &self.remote_addr)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

fn empty_body() -> UnsyncBoxBody<Bytes, BoxError> {
    http_body_util::Empty::new().map_err(|never| match never {}).boxed_unsync()
}

/// Builds the abstract request from the transport request.
///
/// Generic over the body so tests can feed it in-memory bodies; the host
/// passes hyper's incoming body.
pub(crate) fn translate<B>(
    req: http::Request<B>,
    base_uris: &[Url],
    config: &HostConfig,
    scheme: &str,
    remote_addr: Option<SocketAddr>,
    client_certificate: Option<Vec<u8>>,
) -> Result<Request, Error>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let full_url = absolute_url(&req, scheme)?;

    let base = matcher::find_base_uri(base_uris, &full_url, config.allow_authority_fallback)
        .ok_or_else(|| Error::Routing(full_url.to_string()))?;

    let url = RequestUrl {
        scheme: full_url.scheme().to_owned(),
        host: full_url.host_str().unwrap_or_default().to_owned(),
        port: full_url.port(),
        base_path: base.path().trim_end_matches('/').to_owned(),
        path: matcher::app_local_path(&base, &full_url),
        query: full_url.query().unwrap_or_default().to_owned(),
    };

    let certificate = if config.enable_client_certificates {
        client_certificate
    } else {
        None
    };

    let protocol_version = protocol_version_string(req.version());
    let (parts, body) = req.into_parts();
    let expected_length = expected_request_length(&parts.headers);

    Ok(Request {
        method: parts.method,
        url,
        expected_length,
        headers: parts.headers,
        body: body.map_err(Into::into).boxed_unsync(),
        remote_addr,
        client_certificate: certificate,
        protocol_version,
    })
}

/// Reconstructs the absolute request URL from the listener's scheme, the
/// request authority and the path + query.
fn absolute_url<B>(req: &http::Request<B>, scheme: &str) -> Result<Url, Error> {
    // HTTP/2 carries the authority in the URI; HTTP/1.x in the Host header.
    let authority = match req.uri().authority() {
        Some(a) => a.to_string(),
        None => req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| Error::Translation("request carries no authority".to_owned()))?,
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Url::parse(&format!("{scheme}://{authority}{path_and_query}"))
        .map_err(|e| Error::Translation(format!("request url: {e}")))
}

/// The expected body length: 0 if `Content-Length` is absent, has zero or
/// more than one value, or does not parse; else the parsed value.
pub(crate) fn expected_request_length(headers: &HeaderMap) -> u64 {
    let mut values = headers.get_all(CONTENT_LENGTH).iter();
    let (Some(value), None) = (values.next(), values.next()) else {
        return 0;
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Formats the protocol version the engine sees. HTTP/2 has no meaningful
/// minor version, so it gets a single-field form; everything else keeps the
/// two-field form.
fn protocol_version_string(version: Version) -> String {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
    .to_owned()
}
