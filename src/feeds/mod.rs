//! Remote data sources: typed envelopes, validators and the HTTP client.
//!
//! Each source is a black-box JSON endpoint. Requests only decode the body into
//! a loose envelope; deciding whether the envelope is usable is the job of the
//! per-source `validate` function, which is what the retry controller calls.

pub mod music;
pub mod news;
pub mod quote;

pub use music::{MusicEnvelope, Track};
pub use news::{NewsEnvelope, NewsSection};
pub use quote::{QuotationRecord, QuoteEnvelope};

use crate::fetch::FetchError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::fmt;

pub const DEFAULT_API_BASE: &str = "https://api.vvhan.com/api";
pub const DEFAULT_CHART: &str = "飙升榜";

// Shared HTTP client with reasonable defaults for timeouts
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!("fishpond/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_default()
});

/// Names a data source for caching, scheduling and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKey {
    News,
    Quotation,
    Music,
}

impl SourceKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKey::News => "news",
            SourceKey::Quotation => "quotation",
            SourceKey::Music => "music",
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three upstream endpoints.
#[async_trait]
pub trait FeedApi: Send + Sync {
    async fn news(&self) -> Result<NewsEnvelope, FetchError>;
    async fn quotation(&self) -> Result<QuoteEnvelope, FetchError>;
    async fn music(&self) -> Result<MusicEnvelope, FetchError>;
}

pub struct HttpFeeds {
    client: Client,
    base: String,
    chart: String,
}

impl HttpFeeds {
    pub fn new(base: &str, chart: &str) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            base: base.trim_end_matches('/').to_string(),
            chart: chart.to_string(),
        }
    }

    fn news_url(&self) -> String {
        format!("{}/hotlist/all", self.base)
    }

    fn quotation_url(&self) -> String {
        format!("{}/ian/rand?type=json", self.base)
    }

    fn music_url(&self) -> String {
        format!(
            "{}/wyMusic/{}?type=json",
            self.base,
            urlencoding::encode(&self.chart)
        )
    }

    async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R, FetchError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Transport(format!("HTTP {}", resp.status())));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl FeedApi for HttpFeeds {
    async fn news(&self) -> Result<NewsEnvelope, FetchError> {
        self.get_json(&self.news_url()).await
    }

    async fn quotation(&self) -> Result<QuoteEnvelope, FetchError> {
        self.get_json(&self.quotation_url()).await
    }

    async fn music(&self) -> Result<MusicEnvelope, FetchError> {
        self.get_json(&self.music_url()).await
    }
}
