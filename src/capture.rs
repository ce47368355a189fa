//! Redacted, size-bounded records of request/response exchanges.
//!
//! Capture only ever looks at [`Snapshot`]s, so tracing a body never takes
//! bytes away from the retry loop or the caller.

use crate::config::{TraceConfig, TruncateLength};
use crate::message::{find_header, is_json, Entity, Headers, Request, Response};
use crate::trace::TraceFlag;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;

/// Shown in place of the masked part of a sensitive header value.
pub const REDACTION_PREFIX: &str = "****";

/// Appended to bodies that were cut short.
pub const ELLIPSIS: &str = "...";

/// A bounded copy of an entity's bytes, taken for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Up to `limit` bytes from the entity's current position.
    pub bytes: Bytes,
    /// The entity's declared content type.
    pub content_type: Option<String>,
    /// The entity's declared length.
    pub content_length: i64,
    /// Whether the entity had more bytes than were copied.
    pub truncated: bool,
}

impl Snapshot {
    /// Copies up to `limit` bytes of `entity` without consuming them.
    pub fn take(entity: &mut Entity, limit: usize) -> io::Result<Self> {
        let (bytes, truncated) = entity.source_mut().peek(limit)?;
        Ok(Self {
            bytes,
            content_type: entity.content_type().map(str::to_owned),
            content_length: entity.content_length(),
            truncated,
        })
    }
}

/// Returns `true` for headers whose values must not be logged in full.
pub fn is_sensitive_header(name: &str) -> bool {
    name.to_ascii_lowercase().contains("authorization")
}

/// Masks all but the last four characters of a value.
///
/// # Examples
///
/// ```
/// use gridcall::capture::redact;
///
/// assert_eq!(redact("Bearer abcdefghij"), "****ghij");
/// assert_eq!(redact("abc"), "****abc");
/// ```
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let keep = chars.len().min(4);
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}{}", REDACTION_PREFIX, tail)
}

/// The traced view of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    /// The HTTP method.
    pub method: String,
    /// The target URL, query included.
    pub url: String,
    /// Headers with credentials redacted, when header tracing is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// The rendered body snapshot, when body tracing is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// The traced view of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseRecord {
    /// The numeric status code.
    pub status: u16,
    /// Headers with credentials redacted, when header tracing is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// The rendered body snapshot, when body tracing is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// One traced exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    /// The attempt this exchange belongs to, starting at 1.
    pub attempt: usize,
    /// The request side, when any request flag is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestRecord>,
    /// The response side, when any response flag is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
}

impl TraceRecord {
    /// Renders the record as a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}

/// Produces [`TraceRecord`]s according to a [`TraceConfig`].
///
/// # Examples
///
/// ```
/// use gridcall::capture::DiagnosticCapture;
/// use gridcall::config::TraceConfig;
/// use gridcall::{Entity, Request, Response};
/// use http::{Method, StatusCode};
///
/// let capture = DiagnosticCapture::new(TraceConfig::parse("Request,Response", None).unwrap());
/// let url = url::Url::parse("https://api.example.com/2.0/sheets").unwrap();
/// let mut request =
///     Request::new(Method::GET, url).with_header("Authorization", "Bearer abcdefghij");
/// let mut response = Response::new(StatusCode::OK).with_entity(Entity::json(r#"{"data":[]}"#));
///
/// let record = capture.capture(1, &mut request, &mut response).unwrap();
/// let headers = record.request.unwrap().headers.unwrap();
/// assert_eq!(headers["Authorization"], "****ghij");
/// assert_eq!(record.response.unwrap().body.as_deref(), Some(r#"{"data":[]}"#));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DiagnosticCapture {
    config: TraceConfig,
}

impl DiagnosticCapture {
    /// Creates a capture for the given configuration.
    pub fn new(config: TraceConfig) -> Self {
        Self { config }
    }

    /// Returns `true` if any part of an exchange is traced.
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// The configuration in use.
    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Records one exchange. Bodies are read through snapshots and left in place.
    pub fn capture(
        &self,
        attempt: usize,
        request: &mut Request,
        response: &mut Response,
    ) -> io::Result<TraceRecord> {
        let flags = self.config.flags;

        let request_record = if flags.any_request() {
            let body = self.render_body(
                &request.headers,
                request.entity.as_mut(),
                flags.contains(TraceFlag::RequestBody),
                flags.contains(TraceFlag::RequestBodySummary),
            )?;
            Some(RequestRecord {
                method: request.method.to_string(),
                url: request.url.to_string(),
                headers: flags
                    .contains(TraceFlag::RequestHeaders)
                    .then(|| redacted_headers(&request.headers)),
                body,
            })
        } else {
            None
        };

        let response_record = if flags.any_response() {
            let body = self.render_body(
                &response.headers,
                response.entity.as_mut(),
                flags.contains(TraceFlag::ResponseBody),
                flags.contains(TraceFlag::ResponseBodySummary),
            )?;
            Some(ResponseRecord {
                status: response.status.as_u16(),
                headers: flags
                    .contains(TraceFlag::ResponseHeaders)
                    .then(|| redacted_headers(&response.headers)),
                body,
            })
        } else {
            None
        };

        Ok(TraceRecord {
            attempt,
            request: request_record,
            response: response_record,
        })
    }

    /// Captures an exchange and logs it. Capture failures are logged, never raised.
    pub fn emit(&self, attempt: usize, request: &mut Request, response: &mut Response) {
        match self.capture(attempt, request, response) {
            Ok(record) => {
                tracing::info!(
                    target: "gridcall::trace",
                    record = %record.to_json(),
                    "HTTP exchange"
                );
            }
            Err(e) => {
                tracing::warn!(
                    target: "gridcall::trace",
                    error = %e,
                    "Failed to capture HTTP exchange"
                );
            }
        }
    }

    fn render_body(
        &self,
        headers: &Headers,
        entity: Option<&mut Entity>,
        full: bool,
        summary: bool,
    ) -> io::Result<Option<String>> {
        if !full && !summary {
            return Ok(None);
        }
        let Some(entity) = entity else {
            return Ok(None);
        };

        if !is_json(entity.content_type()) || find_header(headers, "Content-Disposition").is_some()
        {
            return Ok(Some(format!(
                "possibly-binary({}, {})",
                entity.content_type().unwrap_or("unknown"),
                entity.content_length()
            )));
        }

        let snapshot = Snapshot::take(entity, self.config.snapshot_limit)?;
        let text = String::from_utf8_lossy(&snapshot.bytes);
        let limit = if full {
            TruncateLength::Unlimited
        } else {
            self.config.truncate
        };
        Ok(Some(truncate(&text, limit, snapshot.truncated)))
    }
}

fn redacted_headers(headers: &Headers) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive_header(name) {
                redact(value)
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

fn truncate(text: &str, limit: TruncateLength, already_truncated: bool) -> String {
    let cut = match limit {
        TruncateLength::Limit(n) => text.char_indices().nth(n).map(|(idx, _)| idx),
        TruncateLength::Unlimited => None,
    };
    match cut {
        Some(idx) => format!("{}{}", &text[..idx], ELLIPSIS),
        None if already_truncated => format!("{}{}", text, ELLIPSIS),
        None => text.to_string(),
    }
}
