//! Request execution with body-aware retries.
//!
//! The [`Executor`] type is the main entry point for sending requests.
//! Use [`ExecutorBuilder`] to configure and create executors.

use crate::{
    capture::DiagnosticCapture,
    config::{RetryConfig, TraceConfig},
    message::{Headers, Request, Response},
    retry::{ErrorDecoder, JsonErrorDecoder, RetryContext, RetryDecision, StopReason},
    transport::{ReqwestTransport, Transport},
    Error, Result,
};
use http::{HeaderName, HeaderValue, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Sends requests, retrying transient failures reported in the response body.
///
/// The executor is designed to be reused and shared: clones are cheap, and
/// concurrent calls each get their own retry state and byte sources. The only
/// shared resource is the transport's connection pool.
///
/// # Examples
///
/// ```no_run
/// use gridcall::{config::RetryConfig, Entity, Executor};
/// use http::Method;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), gridcall::Error> {
/// let executor = Executor::builder()
///     .base_url("https://api.example.com/2.0/")?
///     .access_token("my-token")
///     .retry_config(RetryConfig::builder()
///         .max_retry_time(Duration::from_secs(30))
///         .build())
///     .build()?;
///
/// let request = executor
///     .request(Method::POST, "sheets/123/rows")?
///     .with_entity(Entity::json(r#"[{"toBottom":true,"cells":[]}]"#));
///
/// let mut response = executor.execute(request).await?;
/// let body = response.text()?;
/// println!("{} after {} attempt(s): {}", response.status, response.attempts, body);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: Headers,
    retry: RetryDecision,
    capture: DiagnosticCapture,
}

impl Executor {
    /// Creates a new `ExecutorBuilder` for configuring an executor.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Starts a request for a path relative to the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not form a valid URL.
    pub fn request(&self, method: Method, path: impl AsRef<str>) -> Result<Request> {
        let url = self
            .inner
            .base_url
            .join(path.as_ref().trim_start_matches('/'))?;
        Ok(Request::new(method, url))
    }

    /// Sends a request, retrying transient failures, and returns the final response.
    ///
    /// Non-2xx responses are returned, not raised, once retrying stops. Only
    /// transport failures produce an error.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but a backoff wait ends early when
    /// `cancel` is triggered. The last response is returned in that case.
    pub async fn execute_with_cancel(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.apply_default_headers(&mut request);

        let start_time = Instant::now();
        let mut context = RetryContext::new();

        loop {
            let attempt = context.previous_attempts + 1;

            if let Some(entity) = request.entity.as_mut() {
                entity.prepare_replay()?;
            }

            tracing::debug!(
                method = %request.method,
                url = %request.url,
                attempt = attempt,
                "Executing HTTP request"
            );

            let sent = self.inner.transport.send(&mut request).await;

            if let Some(entity) = request.entity.as_mut() {
                entity.reset()?;
            }

            let mut response = match sent {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        method = %request.method,
                        url = %request.url,
                        "Request failed"
                    );
                    return Err(e);
                }
            };

            context.elapsed = start_time.elapsed();

            tracing::info!(
                status = response.status.as_u16(),
                latency_ms = context.elapsed.as_millis() as u64,
                attempt = attempt,
                "Received HTTP response"
            );

            if self.inner.capture.is_enabled() {
                self.inner.capture.emit(attempt, &mut request, &mut response);
            }

            if response.is_success() {
                return Ok(finish(response, attempt, start_time, None));
            }

            if let Some(entity) = response.entity.as_mut() {
                entity.prepare_replay()?;
            }

            context.previous_attempts = attempt;
            let outcome = self
                .inner
                .retry
                .should_retry(&context, &mut response, cancel)
                .await;

            if let Some(entity) = response.entity.as_mut() {
                entity.reset()?;
            }

            match outcome {
                Ok(retry) => {
                    context.last_error = Some(retry.error);
                    // Releases the failed attempt before the next one starts.
                    drop(response);
                }
                Err(reason) => {
                    tracing::warn!(
                        status = response.status.as_u16(),
                        attempt = attempt,
                        method = %request.method,
                        url = %request.url,
                        reason = %reason,
                        "Returning failure response"
                    );
                    return Ok(finish(response, attempt, start_time, Some(reason)));
                }
            }
        }
    }

    fn apply_default_headers(&self, request: &mut Request) {
        for (name, value) in &self.inner.default_headers {
            if request.header(name).is_none() {
                request.headers.insert(name.clone(), value.clone());
            }
        }
    }
}

fn finish(
    mut response: Response,
    attempts: usize,
    start_time: Instant,
    stop_reason: Option<StopReason>,
) -> Response {
    response.attempts = attempts;
    response.elapsed = start_time.elapsed();
    response.stop_reason = stop_reason;
    response
}

/// Builder for configuring and creating an [`Executor`].
///
/// # Examples
///
/// ```no_run
/// use gridcall::{config::TraceConfig, ExecutorBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), gridcall::Error> {
/// let executor = ExecutorBuilder::new()
///     .base_url("https://api.example.com/2.0/")?
///     .timeout(Duration::from_secs(30))
///     .trace_config(TraceConfig::parse("Request,Response", Some("512"))?)
///     .default_header("Accept", "application/json")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ExecutorBuilder {
    base_url: Option<Url>,
    default_headers: Headers,
    transport: Option<Arc<dyn Transport>>,
    error_decoder: Option<Arc<dyn ErrorDecoder>>,
    retry_config: RetryConfig,
    trace_config: TraceConfig,
    timeout: Option<Duration>,
}

impl ExecutorBuilder {
    /// Creates a new `ExecutorBuilder` with default settings.
    pub fn new() -> Self {
        let mut default_headers = Headers::new();
        default_headers.insert(
            "User-Agent".to_string(),
            concat!("gridcall/", env!("CARGO_PKG_VERSION")).to_string(),
        );
        Self {
            base_url: None,
            default_headers,
            transport: None,
            error_decoder: None,
            retry_config: RetryConfig::default(),
            trace_config: TraceConfig::default(),
            timeout: None,
        }
    }

    /// Sets the base URL that request paths are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        let mut url = Url::parse(url.as_ref())?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.base_url = Some(url);
        Ok(self)
    }

    /// Adds a header sent with every request that does not set it itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case(name.as_ref()));
        self.default_headers
            .insert(name.as_ref().to_string(), value.as_ref().to_string());
        Ok(self)
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn access_token(mut self, token: impl AsRef<str>) -> Self {
        self.default_headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case("Authorization"));
        self.default_headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", token.as_ref()),
        );
        self
    }

    /// Sets the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.default_headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case("User-Agent"));
        self.default_headers
            .insert("User-Agent".to_string(), user_agent.into());
        self
    }

    /// Sets the per-attempt timeout of the default transport.
    ///
    /// Ignored when a custom transport is supplied.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses a custom transport instead of the default `reqwest` one.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Uses a custom decoder for failure bodies.
    pub fn error_decoder<D: ErrorDecoder + 'static>(mut self, decoder: D) -> Self {
        self.error_decoder = Some(Arc::new(decoder));
        self
    }

    /// Sets the retry configuration.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Sets the diagnostic trace configuration.
    pub fn trace_config(mut self, config: TraceConfig) -> Self {
        self.trace_config = config;
        self
    }

    /// Builds the configured `Executor`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or if the default transport
    /// cannot be created.
    pub fn build(self) -> Result<Executor> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let mut transport = ReqwestTransport::new()?;
                if let Some(timeout) = self.timeout {
                    transport = transport.with_timeout(timeout);
                }
                Arc::new(transport)
            }
        };

        let decoder = self
            .error_decoder
            .unwrap_or_else(|| Arc::new(JsonErrorDecoder));

        Ok(Executor {
            inner: Arc::new(ExecutorInner {
                transport,
                base_url,
                default_headers: self.default_headers,
                retry: RetryDecision::with_decoder(self.retry_config.policy(), decoder),
                capture: DiagnosticCapture::new(self.trace_config),
            }),
        })
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
