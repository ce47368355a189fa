//! # gridcall - resilient request execution for tabular-data service APIs
//!
//! gridcall is the request engine underneath a typed client for a remote
//! spreadsheet-style service. Resource methods build a [`Request`] and hand it
//! to an [`Executor`], which sends it, decides from the *error body* whether a
//! failure is transient, backs off, replays the request body byte-for-byte and
//! returns the final [`Response`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use gridcall::{Entity, Executor};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gridcall::Error> {
//!     let executor = Executor::builder()
//!         .base_url("https://api.example.com/2.0/")?
//!         .access_token("my-token")
//!         .build()?;
//!
//!     let request = executor
//!         .request(Method::PUT, "sheets/123/rows")?
//!         .with_entity(Entity::json(r#"[{"id":7,"cells":[{"columnId":1,"value":"done"}]}]"#));
//!
//!     let mut response = executor.execute(request).await?;
//!     let body = response.text()?;
//!     if response.is_success() {
//!         println!("updated: {}", body);
//!     } else {
//!         // Non-transient failures, or transient ones that ran out of budget.
//!         eprintln!("{} ({:?}): {}", response.status, response.stop_reason, body);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Body-aware retries** - only error codes the service marks as transient
//!   (maintenance, server timeout, rate limit, unexpected error) are retried
//! - **Exponential backoff with jitter** - bounded by a total time budget (15 s by default)
//! - **Replayable bodies** - uploads from forward-only streams are buffered once
//!   and resent byte-for-byte
//! - **Cancellation** - backoff waits can be cut short with a `CancellationToken`
//! - **Redacted tracing** - opt-in structured records of each exchange, with
//!   authorization headers masked and binary bodies elided
//!
//! ## Error Handling
//!
//! Only transport failures are errors. HTTP failures come back as responses:
//!
//! ```no_run
//! use gridcall::{Error, Executor, StopReason};
//! use http::Method;
//!
//! # async fn example(executor: Executor) -> Result<(), Error> {
//! let request = executor.request(Method::GET, "sheets/1")?;
//! match executor.execute(request).await {
//!     Ok(response) if response.is_success() => println!("ok"),
//!     Ok(response) => match response.stop_reason {
//!         Some(StopReason::BudgetExhausted { attempts, .. }) => {
//!             eprintln!("still failing after {} attempts", attempts)
//!         }
//!         other => eprintln!("failed with {}: {:?}", response.status, other),
//!     },
//!     Err(e) => eprintln!("transport error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod capture;
pub mod config;
mod error;
mod executor;
mod message;
pub mod retry;
pub mod source;
pub mod trace;
pub mod transport;

pub use error::{DecodeError, Error, Result};
pub use executor::{Executor, ExecutorBuilder};
pub use message::{find_header, is_json, Entity, Headers, Request, Response, JSON_CONTENT_TYPE};
pub use retry::{DecodedError, ErrorDecoder, RetryContext, RetryDecision, StopReason};
pub use source::ByteSource;
pub use tokio_util::sync::CancellationToken;
pub use transport::{ReqwestTransport, Transport};
