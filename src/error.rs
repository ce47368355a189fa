//! Error types for request execution.
//!
//! Application-level failures (4xx/5xx responses carrying a body) are never
//! errors here: they come back from [`Executor::execute`](crate::Executor::execute)
//! as ordinary responses. [`Error`] only covers failures where no response could
//! be obtained at all, plus configuration mistakes.

/// The main error type for request execution.
///
/// # Examples
///
/// ```no_run
/// use gridcall::{Error, Executor};
/// use http::Method;
///
/// # async fn example() -> Result<(), Error> {
/// let executor = Executor::builder()
///     .base_url("https://api.example.com/2.0/")?
///     .build()?;
///
/// let request = executor.request(Method::GET, "sheets")?;
/// match executor.execute(request).await {
///     Ok(mut response) => {
///         let body = response.text()?;
///         println!("status {}: {}", response.status, body);
///     }
///     Err(Error::Network(e)) => eprintln!("transport failed: {}", e),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection refused, DNS lookup failed, timeout, etc.).
    ///
    /// This wraps the underlying `reqwest::Error`. No retry loop runs for these:
    /// they never produce a decodable response body.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Reading or writing an entity's bytes failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration was provided.
    ///
    /// This indicates a problem with how the executor or request was configured,
    /// such as a missing base URL or an unparseable header.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if the request never reached a definitive response.
    ///
    /// Configuration and URL errors are raised before anything is sent.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }
}

/// Why a failure body could not be turned into a [`DecodedError`](crate::DecodedError).
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The response did not declare a JSON content type, so its body is not trusted.
    #[error("response content type {content_type:?} is not JSON")]
    NotJson {
        /// The declared content type, if any.
        content_type: Option<String>,
    },

    /// The body was JSON-typed but did not match the structured error shape.
    #[error("malformed error body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The body could not be read.
    #[error("failed to read error body: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for request execution.
pub type Result<T> = std::result::Result<T, Error>;
