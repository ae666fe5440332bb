// src/fetch.rs
//! Outbound HTTP reads: the circulars index/bodies and pre-rendered alert images.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Raw bytes plus the server-declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
    async fn fetch_bytes(&self, url: &str) -> Result<Fetched>;
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url} non-2xx"))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpFetch for HttpClient {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.get(url).await?.text().await.context("reading body")
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Fetched> {
        let resp = self.get(url).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());
        let bytes = resp.bytes().await.context("reading body")?.to_vec();
        Ok(Fetched {
            bytes,
            content_type,
        })
    }
}
