//! Retrieval of GTFS Realtime vehicle-position feeds.

pub mod auth;
mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::parser::{FeedSnapshot, parse_feed, snapshot};

/// Fetches `url` and returns the response body.
///
/// # Errors
///
/// Fails on transport errors and non-success HTTP statuses.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Delivers one snapshot of vehicle observations per poll.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn poll(&self) -> Result<FeedSnapshot>;
}

/// Polls a feed over HTTP.
pub struct HttpFeedSource<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> HttpFeedSource<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> FeedSource for HttpFeedSource<C> {
    async fn poll(&self) -> Result<FeedSnapshot> {
        let bytes = fetch_bytes(&self.client, &self.url)
            .await
            .with_context(|| format!("fetching {}", self.url))?;
        debug!(bytes = bytes.len(), "Feed bytes received, parsing");
        let feed = parse_feed(&bytes)?;
        Ok(snapshot(&feed))
    }
}

/// Reads a feed saved to disk; every poll re-reads the file.
pub struct FileFeedSource {
    path: PathBuf,
}

impl FileFeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for FileFeedSource {
    async fn poll(&self) -> Result<FeedSnapshot> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let feed = parse_feed(&bytes)?;
        Ok(snapshot(&feed))
    }
}
