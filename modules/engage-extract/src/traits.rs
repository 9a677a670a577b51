// Trait seams for everything the engine talks to over the network or a subprocess.
//
// WebClient: plain HTTP GET plus bounded redirect resolution
// BrowserSession: one live automated-browser profile (clear, blank, render, release)
// BrowserProvider: opens sessions for a platform's pool
// MetadataTool: the video metadata subprocess (yt-dlp)
// PostScraper: hosted single-post scraper runs (Apify)
// AuthHandshake: out-of-band login that yields a reusable session token
//
// Production implementations live in `clients`; in-memory mocks in `testing`.

use async_trait::async_trait;

use apify_client::{FacebookPost, InstagramPost};
use engage_common::{AuthContext, Platform};

use crate::error::FetchError;

/// A successful (2xx) HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResponse {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub body: String,
}

#[async_trait]
pub trait WebClient: Send + Sync {
    /// GET `url`, sending `cookie` as the Cookie header when present.
    /// Non-2xx responses are `FetchError::Status`.
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<WebResponse, FetchError>;

    /// Follow redirects from `url` without fetching bodies. More than
    /// `max_hops` redirects is `FetchError::TooManyRedirects`.
    async fn resolve_redirects(&self, url: &str, max_hops: usize) -> Result<String, FetchError>;
}

/// A page as the browser rendered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// URL the browser ended on, after redirects and client-side routing.
    pub final_url: String,
    pub html: String,
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn id(&self) -> &str;

    /// Clear the HTTP cache and per-origin storage (local, session, indexeddb) for `origins`.
    async fn clear_state(&self, origins: &[&str]) -> Result<(), FetchError>;

    async fn navigate_blank(&self) -> Result<(), FetchError>;

    async fn render(&self, url: &str, auth: &AuthContext) -> Result<RenderedPage, FetchError>;

    /// Tear the session down. Later calls may fail.
    async fn release(&self) -> Result<(), FetchError>;
}

pub trait BrowserProvider: Send + Sync {
    /// Open session number `slot` for `platform`'s pool.
    fn open(&self, platform: Platform, slot: usize) -> Box<dyn BrowserSession>;
}

#[async_trait]
pub trait MetadataTool: Send + Sync {
    /// Structured metadata for one video. Exactly one invocation, bounded by the tool timeout.
    async fn video_metadata(&self, url: &str) -> Result<serde_json::Value, FetchError>;

    /// Up to `max` top-level comments. Counts from this call are never used.
    async fn video_comments(
        &self,
        url: &str,
        max: usize,
    ) -> Result<Vec<serde_json::Value>, FetchError>;
}

#[async_trait]
pub trait PostScraper: Send + Sync {
    async fn instagram_post(&self, url: &str) -> Result<Option<InstagramPost>, FetchError>;

    async fn facebook_post(&self, url: &str) -> Result<Option<FacebookPost>, FetchError>;
}

#[async_trait]
pub trait AuthHandshake: Send + Sync {
    fn platform(&self) -> Platform;

    /// Run the login flow once and return the resulting credentials.
    async fn login(&self) -> Result<AuthContext, FetchError>;
}
