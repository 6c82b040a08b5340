//! The abstract, engine-facing response and its translation onto the
//! transport response.
//!
//! The engine never writes to the wire. It hands back a [`Response`] whose
//! body is a *producing function*: given a [`BodySink`], write your bytes.
//! How those bytes reach the socket is this module's decision, driven by
//! [`allow_chunked_encoding`](crate::HostConfig::allow_chunked_encoding):
//!
//! - **streamed** — the producer runs on its own task, chunks flow through a
//!   channel-backed body, and the transport applies its default framing
//!   (chunked on HTTP/1.1 absent an explicit length);
//! - **buffered** — the producer runs to completion into memory first and
//!   the response goes out with an explicit `Content-Length`, which disables
//!   chunked framing.
//!
//! In buffered mode a `Content-Length` the engine set explicitly wins over
//! the buffered byte count, even when the two disagree. The engine said so;
//! the adapter does not second-guess it.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use hyper::ext::ReasonPhrase;
use tokio::sync::mpsc;

use crate::config::HostConfig;
use crate::error::Error;
use crate::headers;

type BoxedContents =
    Box<dyn FnOnce(BodySink) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send>> + Send>;

// ── BodySink ─────────────────────────────────────────────────────────────────

/// Where a response body producer writes its bytes.
pub struct BodySink {
    tx: mpsc::Sender<Bytes>,
}

impl BodySink {
    /// Writes one chunk. Fails with `BrokenPipe` once the receiving side of
    /// the response is gone (client disconnected, connection aborted).
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> io::Result<()> {
        self.tx
            .send(chunk.into())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body closed"))
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing response, as produced by the engine.
///
/// ```rust
/// use berth::Response;
/// use http::StatusCode;
///
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// Response::bytes("application/json", br#"{"id":1}"#.to_vec())
///     .with_header("location", "/users/1")
///     .with_cookie("session=abc; HttpOnly");
/// ```
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) cookies: Vec<String>,
    pub(crate) reason_phrase: Option<String>,
    pub(crate) content_type: Option<String>,
    pub(crate) contents: BoxedContents,
}

impl Response {
    /// An empty `200 OK`.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            cookies: Vec::new(),
            reason_phrase: None,
            content_type: None,
            contents: Box::new(|_| Box::pin(async { Ok(()) })),
        }
    }

    /// A bodyless response with the given status.
    pub fn status(status: StatusCode) -> Self {
        Self { status, ..Self::new() }
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::bytes("text/plain; charset=utf-8", body.into().into_bytes())
    }

    /// `200 OK` with the given content type and in-memory body.
    pub fn bytes(content_type: &str, body: Vec<u8>) -> Self {
        Self::new()
            .with_content_type(content_type)
            .with_contents(move |mut sink| async move { sink.write(body).await })
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Appends a header. Names are matched case-insensitively downstream;
    /// repeated names produce repeated headers in order.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends one cookie, sent as its own `Set-Cookie` header.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub fn with_reason_phrase(mut self, reason: impl Into<String>) -> Self {
        self.reason_phrase = Some(reason.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Replaces the body producer. The function receives the sink and writes
    /// the body, chunk by chunk.
    pub fn with_contents<F, Fut>(mut self, contents: F) -> Self
    where
        F: FnOnce(BodySink) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        self.contents = Box::new(move |sink| Box::pin(contents(sink)));
        self
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

// ── Translation onto the transport ───────────────────────────────────────────

impl Response {
    /// Writes this response onto a transport response: headers copied minus
    /// the transport-owned ones, cookies appended, reason phrase and content
    /// type set, and the body framed per the configured encoding policy.
    pub(crate) async fn into_transport(
        self,
        config: &HostConfig,
    ) -> Result<http::Response<OutboundBody>, Error> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.headers {
            if headers::is_transport_owned(name) {
                continue;
            }
            headers.append(header_name(name)?, header_value(value)?);
        }

        for cookie in &self.cookies {
            headers.append(SET_COOKIE, header_value(cookie)?);
        }

        if let Some(content_type) = &self.content_type {
            headers.insert(CONTENT_TYPE, header_value(content_type)?);
        }

        let status = self.status;
        let reason_phrase = self.reason_phrase.clone();

        let body = if config.allow_chunked_encoding {
            self.streamed_body(config)
        } else {
            let (body, length) = self.buffered_body().await?;
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            body
        };

        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        if let Some(reason) = reason_phrase {
            let phrase = ReasonPhrase::try_from(reason.into_bytes())
                .map_err(|e| Error::Translation(format!("reason phrase: {e}")))?;
            response.extensions_mut().insert(phrase);
        }

        Ok(response)
    }

    /// Default-framed output: the producer runs on its own task and chunks
    /// stream straight through. A producer failure is reported through the
    /// unhandled-error callback; the body simply ends where it ended.
    fn streamed_body(self, config: &HostConfig) -> OutboundBody {
        let (tx, rx) = mpsc::channel(16);
        let producer = (self.contents)(BodySink { tx });
        let report = config.on_unhandled_error.clone();

        tokio::spawn(async move {
            if let Err(e) = producer.await {
                report(&Error::Io(e));
            }
        });

        OutboundBody::Streamed(ChannelBody { rx })
    }

    /// Explicit-length output: run the producer to completion into memory,
    /// then send the buffer. A `Content-Length` the engine set explicitly is
    /// trusted as-is and not reconciled against the buffer size; one that
    /// does not parse fails the request. The streamed path never reads it.
    async fn buffered_body(self) -> Result<(OutboundBody, u64), Error> {
        let explicit_length = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .map(|(_, value)| value.trim().parse::<u64>())
            .transpose()
            .map_err(|e| Error::Translation(format!("explicit content length: {e}")))?;

        let (tx, mut rx) = mpsc::channel(16);
        let producer = (self.contents)(BodySink { tx });

        let drain = async {
            let mut buffer = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buffer.extend_from_slice(&chunk);
            }
            buffer
        };

        let (result, buffer) = tokio::join!(producer, drain);
        result.map_err(Error::Io)?;

        let length = explicit_length.unwrap_or(buffer.len() as u64);
        Ok((OutboundBody::Buffered(Full::new(Bytes::from(buffer))), length))
    }
}

fn header_name(name: &str) -> Result<HeaderName, Error> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::Translation(format!("invalid header name: {name:?}")))
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Translation(format!("invalid header value: {value:?}")))
}

// ── Transport body ───────────────────────────────────────────────────────────

/// A body fed chunk by chunk from the producer's task.
pub(crate) struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut().rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The body handed to hyper: fully buffered or streamed, one type either way.
pub(crate) enum OutboundBody {
    Buffered(Full<Bytes>),
    Streamed(ChannelBody),
}

impl fmt::Debug for OutboundBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(body) => {
                f.debug_struct("Buffered").field("len", &body.size_hint().exact()).finish()
            }
            Self::Streamed(_) => f.debug_struct("Streamed").finish_non_exhaustive(),
        }
    }
}

impl Body for OutboundBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(body) => Pin::new(body).poll_frame(cx),
            Self::Streamed(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(body) => body.is_end_stream(),
            Self::Streamed(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Buffered(body) => body.size_hint(),
            Self::Streamed(_) => SizeHint::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn buffered_config() -> HostConfig {
        HostConfig { allow_chunked_encoding: false, ..HostConfig::default() }
    }

    async fn body_bytes(body: OutboundBody) -> Bytes {
        body.collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn buffered_output_sets_the_buffered_length() {
        let transport = Response::text("hi").into_transport(&buffered_config()).await.unwrap();
        assert_eq!(transport.headers()[CONTENT_LENGTH], "2");
        assert!(transport.headers().get("transfer-encoding").is_none());
        assert_eq!(body_bytes(transport.into_body()).await, Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn explicit_content_length_wins_over_the_buffer_size() {
        let transport = Response::bytes("text/plain", b"body".to_vec())
            .with_header("Content-Length", "10")
            .into_transport(&buffered_config())
            .await
            .unwrap();
        assert_eq!(transport.headers()[CONTENT_LENGTH], "10");
        assert_eq!(body_bytes(transport.into_body()).await, Bytes::from_static(b"body"));
    }

    #[tokio::test]
    async fn malformed_explicit_length_fails_buffered_translation() {
        let err = Response::text("x")
            .with_header("content-length", "ten")
            .into_transport(&buffered_config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Translation(_)));
    }

    #[tokio::test]
    async fn malformed_explicit_length_is_ignored_when_streaming() {
        let transport = Response::text("x")
            .with_header("content-length", "ten")
            .into_transport(&HostConfig::default())
            .await
            .unwrap();
        assert!(transport.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(body_bytes(transport.into_body()).await, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn transport_owned_headers_are_not_copied() {
        let transport = Response::text("x")
            .with_header("Transfer-Encoding", "gzip")
            .with_header("Keep-Alive", "timeout=5")
            .with_header("X-Custom", "1")
            .into_transport(&buffered_config())
            .await
            .unwrap();
        assert!(transport.headers().get("transfer-encoding").is_none());
        assert!(transport.headers().get("keep-alive").is_none());
        assert_eq!(transport.headers()["x-custom"], "1");
    }

    #[tokio::test]
    async fn cookies_become_set_cookie_headers_in_order() {
        let transport = Response::new()
            .with_cookie("a=1")
            .with_cookie("b=2")
            .into_transport(&buffered_config())
            .await
            .unwrap();
        let cookies: Vec<_> = transport
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn content_type_status_and_reason_are_applied() {
        let transport = Response::bytes("application/json", b"{}".to_vec())
            .with_status(StatusCode::CREATED)
            .with_reason_phrase("Made It")
            .into_transport(&buffered_config())
            .await
            .unwrap();
        assert_eq!(transport.status(), StatusCode::CREATED);
        assert_eq!(transport.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            transport.extensions().get::<ReasonPhrase>().unwrap().as_bytes(),
            b"Made It"
        );
    }

    #[tokio::test]
    async fn streamed_output_carries_no_content_length() {
        let response = Response::new().with_contents(|mut sink| async move {
            sink.write(&b"one,"[..]).await?;
            sink.write(&b"two"[..]).await
        });
        let transport = response.into_transport(&HostConfig::default()).await.unwrap();
        assert!(transport.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(body_bytes(transport.into_body()).await, Bytes::from_static(b"one,two"));
    }
}
