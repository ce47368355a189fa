//! The seam between the executor and the network.

use crate::message::{Entity, Headers, Request, Response};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use std::time::Duration;

/// Sends one request attempt and returns whatever the server answered.
///
/// Implementations read the request entity from its current position and must
/// return any definitive HTTP response, whatever its status, as `Ok`. `Err` is
/// reserved for failures where no response was obtained.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs a single attempt.
    async fn send(&self, request: &mut Request) -> Result<Response>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
///
/// Response bodies are read to the end before returning, which hands the
/// connection back to the pool as soon as the attempt is over.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Creates a transport with a default `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self::from_client(client))
    }

    /// Wraps an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Sets a timeout applied to every attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &mut Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(entity) = request.entity.as_mut() {
            if request
                .headers
                .keys()
                .all(|name| !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
            {
                if let Some(content_type) = entity.content_type() {
                    builder = builder.header(CONTENT_TYPE, content_type);
                }
            }
            let body: Bytes = entity.bytes()?;
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;

        let mut result = Response::new(status);
        result.headers = headers;
        if !body.is_empty() || content_type.is_some() {
            let len = body.len() as i64;
            result.entity = Some(Entity::new(content_type, len, body.into()));
        }
        Ok(result)
    }
}
