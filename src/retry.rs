//! Deciding whether a failure response is worth retrying.
//!
//! Status codes alone do not say whether a failure is transient: the service
//! reports that in the JSON error body. [`RetryDecision`] decodes the body,
//! checks the error code against the transient allow-list, asks the
//! [`BackoffPolicy`] for a delay and waits it out.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::DecodeError;
use crate::message::Response;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The structured error reported in a failure body.
///
/// Decoded from `{"errorCode": 4003, "message": "...", "refId": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecodedError {
    /// The service error code.
    #[serde(rename = "errorCode")]
    pub code: i64,

    /// A human-readable description.
    #[serde(default)]
    pub message: String,

    /// Reference id for support requests, when the service provides one.
    #[serde(rename = "refId", default)]
    pub ref_id: Option<String>,
}

impl DecodedError {
    /// Creates a decoded error without a reference id.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ref_id: None,
        }
    }

    /// The transient classification of this error, if it has one.
    pub fn transient(&self) -> Option<TransientCode> {
        TransientCode::from_code(self.code)
    }
}

impl fmt::Display for DecodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

/// Turns failure bodies into [`DecodedError`]s.
///
/// The default [`JsonErrorDecoder`] uses `serde_json`; swap it out when the
/// service's error envelope differs.
pub trait ErrorDecoder: Send + Sync {
    /// Decodes a failure body.
    fn decode(&self, body: &[u8]) -> Result<DecodedError, DecodeError>;
}

/// Decodes the standard JSON error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorDecoder;

impl ErrorDecoder for JsonErrorDecoder {
    fn decode(&self, body: &[u8]) -> Result<DecodedError, DecodeError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Error codes that mean the same request may succeed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientCode {
    /// 4001: the service is offline for maintenance.
    Maintenance,
    /// 4002: the request timed out on the server.
    ServerTimeout,
    /// 4003: the rate limit was exceeded.
    RateLimited,
    /// 4004: an unexpected error occurred; retrying may succeed.
    Unexpected,
}

impl TransientCode {
    /// Classifies an error code. `None` means the code is not transient.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            4001 => Some(Self::Maintenance),
            4002 => Some(Self::ServerTimeout),
            4003 => Some(Self::RateLimited),
            4004 => Some(Self::Unexpected),
            _ => None,
        }
    }

    /// The numeric error code.
    pub fn code(self) -> i64 {
        match self {
            Self::Maintenance => 4001,
            Self::ServerTimeout => 4002,
            Self::RateLimited => 4003,
            Self::Unexpected => 4004,
        }
    }
}

/// Per-request retry bookkeeping, owned by the executor.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Failed attempts so far.
    pub previous_attempts: usize,
    /// Time spent on the request so far.
    pub elapsed: Duration,
    /// The most recent decoded failure.
    pub last_error: Option<DecodedError>,
}

impl RetryContext {
    /// A context for a request that has not been attempted yet.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Why a failure response ended the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The body was not declared as JSON, so it was not interpreted.
    NotJson {
        /// The declared content type, if any.
        content_type: Option<String>,
    },
    /// The body was JSON-typed but could not be decoded.
    Undecodable(String),
    /// The error code is not in the transient allow-list.
    NonTransient {
        /// The decoded error code.
        code: i64,
    },
    /// Another wait would exceed the time budget.
    BudgetExhausted {
        /// Failed attempts so far.
        attempts: usize,
        /// Time spent so far.
        elapsed: Duration,
    },
    /// The wait was cancelled by the caller.
    Cancelled,
}

impl From<DecodeError> for StopReason {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::NotJson { content_type } => StopReason::NotJson { content_type },
            other => StopReason::Undecodable(other.to_string()),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NotJson { content_type } => {
                write!(f, "response is not JSON ({:?})", content_type)
            }
            StopReason::Undecodable(reason) => write!(f, "undecodable error body: {}", reason),
            StopReason::NonTransient { code } => write!(f, "error code {} is not transient", code),
            StopReason::BudgetExhausted { attempts, elapsed } => write!(
                f,
                "retry budget exhausted after {} attempts in {:?}",
                attempts, elapsed
            ),
            StopReason::Cancelled => write!(f, "retry wait cancelled"),
        }
    }
}

/// A decision to try again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retry {
    /// The wait before the next attempt.
    pub delay: Duration,
    /// The transient error that triggered the retry.
    pub error: DecodedError,
}

/// Decodes failure bodies, classifies them and waits out the backoff.
///
/// # Examples
///
/// ```
/// use gridcall::backoff::{BackoffPolicy, Jitter};
/// use gridcall::{Entity, Response, RetryContext, RetryDecision, StopReason};
/// use http::StatusCode;
/// use std::time::Duration;
///
/// let decision = RetryDecision::new(
///     BackoffPolicy::default().with_jitter(Jitter::Fixed(Duration::ZERO)),
/// );
/// let context = RetryContext { previous_attempts: 1, ..RetryContext::new() };
///
/// let mut response = Response::new(StatusCode::BAD_REQUEST)
///     .with_entity(Entity::json(r#"{"errorCode":1006,"message":"Not Found"}"#));
/// assert_eq!(
///     decision.evaluate(&context, &mut response),
///     Err(StopReason::NonTransient { code: 1006 })
/// );
///
/// let mut response = Response::new(StatusCode::TOO_MANY_REQUESTS)
///     .with_entity(Entity::json(r#"{"errorCode":4003,"message":"Rate limit exceeded."}"#));
/// let retry = decision.evaluate(&context, &mut response).unwrap();
/// assert_eq!(retry.delay, Duration::from_secs(2));
/// ```
#[derive(Clone)]
pub struct RetryDecision {
    policy: BackoffPolicy,
    decoder: Arc<dyn ErrorDecoder>,
}

impl RetryDecision {
    /// Creates a decision using the JSON error decoder.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_decoder(policy, Arc::new(JsonErrorDecoder))
    }

    /// Creates a decision with a custom error decoder.
    pub fn with_decoder(policy: BackoffPolicy, decoder: Arc<dyn ErrorDecoder>) -> Self {
        Self { policy, decoder }
    }

    /// The backoff policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Decides without waiting.
    ///
    /// Reads the response body; the caller is responsible for rewinding it.
    /// `context.previous_attempts` is the retry number handed to the backoff policy.
    pub fn evaluate(
        &self,
        context: &RetryContext,
        response: &mut Response,
    ) -> Result<Retry, StopReason> {
        let error = self.decode(response)?;

        if error.transient().is_none() {
            tracing::debug!(
                error_code = error.code,
                message = %error.message,
                ref_id = ?error.ref_id,
                "Error code is not transient"
            );
            return Err(StopReason::NonTransient { code: error.code });
        }

        let attempt = context.previous_attempts.max(1);
        match self.policy.decide(attempt, context.elapsed, &error) {
            Backoff::Delay(delay) => Ok(Retry { delay, error }),
            Backoff::Abort => {
                tracing::warn!(
                    error_code = error.code,
                    attempts = attempt,
                    elapsed_ms = context.elapsed.as_millis() as u64,
                    budget_ms = self.policy.budget().as_millis() as u64,
                    "Retry budget exhausted"
                );
                Err(StopReason::BudgetExhausted {
                    attempts: attempt,
                    elapsed: context.elapsed,
                })
            }
        }
    }

    /// Decides, and if the answer is to retry, waits for the backoff delay.
    ///
    /// Cancelling `cancel` during the wait ends the retry loop with
    /// [`StopReason::Cancelled`].
    pub async fn should_retry(
        &self,
        context: &RetryContext,
        response: &mut Response,
        cancel: &CancellationToken,
    ) -> Result<Retry, StopReason> {
        let retry = self.evaluate(context, response)?;

        tracing::info!(
            delay_ms = retry.delay.as_millis() as u64,
            attempt = context.previous_attempts,
            error_code = retry.error.code,
            "Retrying request after delay"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(attempt = context.previous_attempts, "Retry wait cancelled");
                Err(StopReason::Cancelled)
            }
            _ = tokio::time::sleep(retry.delay) => Ok(retry),
        }
    }

    fn decode(&self, response: &mut Response) -> Result<DecodedError, DecodeError> {
        let content_type = response.content_type().map(str::to_owned);
        match response.entity.as_mut() {
            Some(entity) if entity.is_json() => {
                let body = entity.bytes()?;
                self.decoder.decode(&body)
            }
            _ => Err(DecodeError::NotJson { content_type }),
        }
    }
}

impl fmt::Debug for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDecision")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
