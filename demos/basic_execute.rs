//! Basic example sending a request through the executor with tracing on.
//!
//! This example shows how to:
//! - Configure an executor with a token, retry budget and trace flags
//! - Send a JSON request and read the final response
//! - Inspect attempt metadata and why retrying stopped
//!
//! Run with: `GRIDCALL_TOKEN=... cargo run --example basic_execute`

use gridcall::config::{RetryConfig, TraceConfig};
use gridcall::{Entity, Error, Executor};
use http::Method;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Trace records are logged under the gridcall::trace target
    tracing_subscriber::fmt()
        .with_env_filter("gridcall=debug,basic_execute=info")
        .init();

    let token = std::env::var("GRIDCALL_TOKEN").unwrap_or_default();
    let trace_parts = std::env::var("GRIDCALL_TRACE").unwrap_or_else(|_| "Request,Response".into());
    let trace_truncate = std::env::var("GRIDCALL_TRACE_TRUNCATE").ok();

    let executor = Executor::builder()
        .base_url("https://api.smartsheet.com/2.0/")?
        .access_token(token)
        .timeout(Duration::from_secs(30))
        .retry_config(
            RetryConfig::builder()
                .max_retry_time(Duration::from_secs(20))
                .build(),
        )
        .trace_config(TraceConfig::parse(&trace_parts, trace_truncate.as_deref())?)
        .build()?;

    println!("=== GET Request Example ===");
    let request = executor
        .request(Method::GET, "sheets")?
        .with_query_param("pageSize", "5");
    let mut response = executor.execute(request).await?;

    println!("Status: {}", response.status);
    println!("Attempts: {}", response.attempts);
    println!("Elapsed: {:?}", response.elapsed);
    let body = response.text()?;
    println!("Body: {}", body);
    println!();

    println!("=== POST Request Example ===");
    let request = executor
        .request(Method::POST, "sheets")?
        .with_entity(Entity::json(concat!(
            r#"{"name":"gridcall demo","#,
            r#""columns":[{"title":"Task","primary":true,"type":"TEXT_NUMBER"}]}"#,
        )));
    let mut response = executor.execute(request).await?;

    println!("Status: {}", response.status);
    println!("Was retried: {}", response.was_retried());
    if let Some(reason) = &response.stop_reason {
        println!("Stopped because: {}", reason);
    }
    let body = response.text()?;
    println!("Body: {}", body);

    Ok(())
}
