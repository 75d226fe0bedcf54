//! HTTP transport seam.
//!
//! The engine only needs a status code and a byte stream; everything else
//! about the transport lives behind [`Fetcher`]. Tests swap in stub
//! implementations, production uses [`HttpFetcher`] over `reqwest`.
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::manifest::RequestConfig;

/// Streaming response body; chunks arrive as they are read off the wire.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

pub struct FetchResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a GET for the `url` in the request config and yields the status
/// code plus the body as a stream.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &RequestConfig) -> Result<FetchResponse>;
}

/// Default fetcher backed by a shared `reqwest::Client`.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("failed to build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &RequestConfig) -> Result<FetchResponse> {
        let url = request
            .url()
            .ok_or_else(|| anyhow!("request config is missing a url"))?;

        let mut builder = self.client.get(url);
        if let Some(headers) = request.get("headers").and_then(|value| value.as_object()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(name.as_str(), value);
                }
            }
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from))
            .boxed();

        Ok(FetchResponse { status, body })
    }
}
