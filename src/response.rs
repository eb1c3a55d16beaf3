//! Response facade and the body union.
//!
//! Middleware never writes to the wire. It mutates this facade (status,
//! headers, body, message) and the finalizer performs the single
//! terminating write once the chain settles. The body's shape is decided
//! once, at assignment, as a [`Body`] variant; the finalizer matches on the
//! variant instead of re-inspecting an opaque value.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use futures_util::stream::BoxStream;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use serde_json::Value;
use tracing::warn;

use crate::app::AppInner;

/// Type-erased body used at the transport boundary, on both the request
/// and response side.
pub type RawBody = UnsyncBoxBody<Bytes, io::Error>;

/// Erases a chunk of in-memory bytes into a [`RawBody`].
pub(crate) fn raw_body(data: impl Into<Bytes>) -> RawBody {
    Full::new(data.into()).map_err(io::Error::other).boxed_unsync()
}

// ── Body ─────────────────────────────────────────────────────────────────────

/// The response payload, tagged by shape at assignment time.
pub enum Body {
    /// No payload assigned. Finalizes as a human-readable status text.
    Empty,
    /// Sent verbatim as UTF-8 text.
    Text(String),
    /// Sent verbatim as raw bytes.
    Binary(Bytes),
    /// Piped into the response chunk by chunk.
    Stream(BoxStream<'static, io::Result<Bytes>>),
    /// Structured data, serialized to JSON at finalize time.
    Json(Value),
}

impl Body {
    /// Wraps a byte stream as a response body.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Self {
        Self::Stream(Box::pin(stream))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Text(text) => {
                if text.trim_start().starts_with('<') {
                    Some("text/html; charset=utf-8")
                } else {
                    Some("text/plain; charset=utf-8")
                }
            }
            Self::Binary(_) | Self::Stream(_) => Some("application/octet-stream"),
            Self::Json(_) => Some("application/json"),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Binary(data) => f.debug_tuple("Binary").field(&data.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// The response facade for one request.
///
/// Owned by the [`Context`](crate::Context); most mutation happens through
/// the context's forwarding accessors, but the facade is public for
/// middleware that wants to pass it around.
pub struct Response {
    pub(crate) app: Arc<AppInner>,
    pub(crate) status: StatusCode,
    pub(crate) explicit_status: bool,
    pub(crate) message: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) headers_sent: bool,
    pub(crate) writable: bool,
}

impl Response {
    pub(crate) fn new(app: Arc<AppInner>) -> Self {
        // Default headers are inherited from the application's response
        // template at creation.
        let headers = app.templates.response.clone();
        Self {
            app,
            // Not found until a middleware says otherwise.
            status: StatusCode::NOT_FOUND,
            explicit_status: false,
            message: None,
            headers,
            body: Body::Empty,
            headers_sent: false,
            writable: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status explicitly. An explicit status is never overridden
    /// by body assignment.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.explicit_status = true;
    }

    /// The explicit status message consulted by the finalizer when the
    /// body is empty.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets a header, replacing any previous value. Invalid names or
    /// values are dropped with a warning rather than aborting the request.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = name, "invalid header name dropped");
            return;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            warn!(header = %name, "invalid header value dropped");
            return;
        };
        self.headers.insert(name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.headers.remove(name);
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Assigns the response body.
    ///
    /// Side effects mirror what assignment means for an HTTP response: a
    /// non-empty body promotes a still-implicit status to `200 OK`, a
    /// content type is chosen when none is set, and content-length is
    /// recorded for bodies whose length is knowable up front.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();

        if !body.is_empty() && !self.explicit_status {
            self.status = StatusCode::OK;
        }

        if !self.headers.contains_key(header::CONTENT_TYPE) {
            if let Some(content_type) = body.default_content_type() {
                self.headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }

        match &body {
            Body::Text(text) => {
                self.headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(text.len()));
            }
            Body::Binary(data) => {
                self.headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(data.len()));
            }
            // A stream's length is unknown; JSON length is computed at
            // finalize time from the serialization.
            Body::Stream(_) | Body::Json(_) => {
                self.headers.remove(header::CONTENT_LENGTH);
            }
            Body::Empty => {}
        }

        self.body = body;
    }

    /// Whether headers have already reached the wire. Once true, the
    /// finalizer stops touching content-length.
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Records that headers reached the wire. Transport adapters driving
    /// [`Dispatcher`](crate::Dispatcher) directly set this when they flush
    /// early.
    pub fn set_headers_sent(&mut self, sent: bool) {
        self.headers_sent = sent;
    }

    /// Whether the underlying transport can still be written to. A
    /// middleware that takes over the connection should clear this.
    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    /// Environment tag of the owning application.
    pub fn env(&self) -> &str {
        &self.app.env
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::context::testing;

    fn response() -> Response {
        testing::context().response
    }

    #[test]
    fn body_assignment_promotes_implicit_status() {
        let mut res = response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        res.set_body("hello");
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn body_assignment_keeps_explicit_status() {
        let mut res = response();
        res.set_status(StatusCode::CREATED);
        res.set_body("made");
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    #[test]
    fn text_body_defaults_to_plain_text() {
        let mut res = response();
        res.set_body("hello");
        assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(res.header("content-length"), Some("5"));
    }

    #[test]
    fn leading_angle_bracket_sniffs_as_html() {
        let mut res = response();
        res.set_body("<h1>hi</h1>");
        assert_eq!(res.header("content-type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn explicit_content_type_wins_over_sniffing() {
        let mut res = response();
        res.set_header("content-type", "application/xml");
        res.set_body("<ok/>");
        assert_eq!(res.header("content-type"), Some("application/xml"));
    }

    #[test]
    fn json_body_clears_stale_content_length() {
        let mut res = response();
        res.set_body("hello");
        res.set_body(json!({ "replaced": true }));
        assert_eq!(res.header("content-length"), None);
        assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn invalid_header_is_dropped_not_fatal() {
        let mut res = response();
        res.set_header("bad name", "x");
        res.set_header("x-ok", "value\r\ninjected");
        assert!(res.headers().is_empty());
    }
}
