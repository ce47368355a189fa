//! Request and response value types.
//!
//! A message is a method/target or status, a header map and an optional
//! [`Entity`]. Entities own their [`ByteSource`]; always go through
//! [`Entity::source_mut`] rather than holding on to a source, because making a
//! body replayable may replace it.

use crate::retry::StopReason;
use crate::source::{ByteSource, SeekRead};
use bytes::Bytes;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::io::{self, Read};
use std::time::Duration;
use url::Url;

/// Header name to value. Keys are compared exactly as given.
pub type Headers = HashMap<String, String>;

/// Content type used for structured bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Returns `true` if `content_type` declares JSON, ignoring case and parameters.
pub fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Looks a header up by name, ignoring ASCII case.
///
/// Header maps keep keys as given, so lookups that must match any spelling
/// (content negotiation, redaction) go through here.
pub fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// The byte-bearing payload of a message.
#[derive(Debug)]
pub struct Entity {
    content_type: Option<String>,
    content_length: i64,
    source: ByteSource,
}

impl Entity {
    /// Creates an entity from its parts. Use `-1` for an unknown length.
    pub fn new(content_type: Option<String>, content_length: i64, source: ByteSource) -> Self {
        Self {
            content_type,
            content_length,
            source,
        }
    }

    /// An entity backed by an in-memory buffer.
    pub fn from_bytes(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as i64;
        Self::new(Some(content_type.into()), len, ByteSource::from_bytes(bytes))
    }

    /// A JSON entity from an already-encoded document.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::from_bytes(JSON_CONTENT_TYPE, body)
    }

    /// A plain-text entity.
    pub fn text(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::from_bytes("text/plain", body)
    }

    /// An entity backed by a seekable reader, such as an open file.
    pub fn from_seekable<R>(content_type: impl Into<String>, content_length: i64, reader: R) -> Self
    where
        R: SeekRead + 'static,
    {
        Self::new(
            Some(content_type.into()),
            content_length,
            ByteSource::from_seekable(reader),
        )
    }

    /// An entity backed by a forward-only stream.
    pub fn from_reader<R>(content_type: impl Into<String>, content_length: i64, reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::new(
            Some(content_type.into()),
            content_length,
            ByteSource::from_reader(reader),
        )
    }

    /// The declared content type.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The declared length, or `-1` if unknown.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// Returns `true` if the content type is JSON.
    pub fn is_json(&self) -> bool {
        is_json(self.content_type())
    }

    /// The current byte source.
    pub fn source_mut(&mut self) -> &mut ByteSource {
        &mut self.source
    }

    /// Makes the body replayable and marks the current position.
    pub fn prepare_replay(&mut self) -> io::Result<()> {
        let hint = usize::try_from(self.content_length).unwrap_or(0);
        self.source.make_replayable(hint)?;
        self.source.mark()
    }

    /// Rewinds the body to the position saved by [`prepare_replay`](Self::prepare_replay).
    pub fn reset(&mut self) -> io::Result<()> {
        self.source.reset()
    }

    /// Reads the rest of the body.
    pub fn bytes(&mut self) -> io::Result<Bytes> {
        self.source.read_remaining()
    }
}

/// An outgoing request.
///
/// # Examples
///
/// ```
/// use gridcall::{Entity, Request};
/// use http::Method;
///
/// let url = url::Url::parse("https://api.example.com/2.0/sheets/1/rows").unwrap();
/// let request = Request::new(Method::POST, url)
///     .with_header("Accept", "application/json")
///     .with_query_param("allowPartialSuccess", "true")
///     .with_entity(Entity::json(r#"[{"cells":[]}]"#));
///
/// assert_eq!(request.url.query(), Some("allowPartialSuccess=true"));
/// assert!(request.entity.is_some());
/// ```
#[derive(Debug)]
pub struct Request {
    /// The HTTP method.
    pub method: Method,

    /// The absolute target URL.
    pub url: Url,

    /// Request headers.
    pub headers: Headers,

    /// The request body, if any.
    pub entity: Option<Entity>,
}

impl Request {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            entity: None,
        }
    }

    /// Sets a header, replacing any value under the same key.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Appends a query parameter to the target URL.
    pub fn with_query_param(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair(key.as_ref(), value.as_ref());
        self
    }

    /// Attaches a body.
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Returns a header value, ignoring case in the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response as returned by the executor.
///
/// Failure responses are returned just like successes; inspect
/// [`status`](Self::status) and the body to map them to outcomes.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code.
    pub status: StatusCode,

    /// Response headers.
    pub headers: Headers,

    /// The response body, if any.
    pub entity: Option<Entity>,

    /// The number of attempts made to obtain this response.
    ///
    /// This is `1` for requests that were not retried.
    pub attempts: usize,

    /// Total time spent on the request, including backoff waits.
    pub elapsed: Duration,

    /// Why the retry loop stopped, for failure responses.
    pub stop_reason: Option<StopReason>,
}

impl Response {
    /// Creates a response with the given status and nothing else.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            entity: None,
            attempts: 1,
            elapsed: Duration::ZERO,
            stop_reason: None,
        }
    }

    /// Sets a header, replacing any value under the same key.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attaches a body.
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value, ignoring case in the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The body's content type, if there is a body.
    pub fn content_type(&self) -> Option<&str> {
        self.entity.as_ref().and_then(Entity::content_type)
    }

    /// Reads the rest of the body. Empty if there is no body.
    pub fn bytes(&mut self) -> io::Result<Bytes> {
        match self.entity.as_mut() {
            Some(entity) => entity.bytes(),
            None => Ok(Bytes::new()),
        }
    }

    /// Reads the rest of the body as UTF-8, replacing invalid sequences.
    pub fn text(&mut self) -> io::Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
