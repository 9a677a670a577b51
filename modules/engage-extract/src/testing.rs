// Test mocks for the extraction engine.
//
// One mock per trait boundary, plus a scripted strategy:
// - MockWebClient (WebClient) — HashMap-based URL→response sequence
// - MockMetadataTool (MetadataTool) — URL→metadata sequence, comment lists, call counts,
//   optional comment-download delay
// - MockBrowser / MockBrowserSession (BrowserProvider / BrowserSession) — URL→render
//   sequence with a shared log of clears, blanks, renders and releases
// - MockPostScraper (PostScraper) — URL→dataset item JSON
// - MockLogin (AuthHandshake) — fixed outcome, call count
// - ScriptedStrategy (SourceStrategy) — closures per tier, with an optional delay
//
// Sequences return their entries in order and then keep repeating the last one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use apify_client::{FacebookPost, InstagramPost};
use engage_common::{AuthContext, ContentTarget, ExtractionCandidate, Platform};

use crate::error::{FetchError, TierError};
use crate::strategy::{SourceStrategy, TierContext, TierSpec};
use crate::traits::{
    AuthHandshake, BrowserProvider, BrowserSession, MetadataTool, PostScraper, RenderedPage,
    WebClient, WebResponse,
};

/// Entry `calls` of `seq`, repeating the last entry once the sequence runs out.
fn nth_or_last<T: Clone>(seq: &[T], calls: usize) -> Option<T> {
    seq.get(calls).or_else(|| seq.last()).cloned()
}

/// Bump and return the previous call count for `key`.
fn next_call(counts: &Mutex<HashMap<String, usize>>, key: &str) -> usize {
    let mut counts = counts.lock().unwrap();
    let n = counts.entry(key.to_string()).or_insert(0);
    *n += 1;
    *n - 1
}

// ---------------------------------------------------------------------------
// MockWebClient
// ---------------------------------------------------------------------------

/// HashMap-based web client. Unregistered URLs are network errors; unregistered
/// redirects resolve to the URL itself.
/// Builder pattern: `.on_get()`, `.on_status()`, `.on_redirect()`, `.on_error()`.
#[derive(Default)]
pub struct MockWebClient {
    responses: HashMap<String, Vec<Result<WebResponse, FetchError>>>,
    redirects: HashMap<String, Result<String, FetchError>>,
    calls: Mutex<HashMap<String, usize>>,
    log: Mutex<Vec<(String, Option<String>)>>,
}

impl MockWebClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(self, url: &str, body: impl Into<String>) -> Self {
        let response = WebResponse {
            status: 200,
            final_url: url.to_string(),
            body: body.into(),
        };
        self.push(url, Ok(response))
    }

    pub fn on_status(self, url: &str, status: u16) -> Self {
        let err = FetchError::Status {
            status,
            url: url.to_string(),
        };
        self.push(url, Err(err))
    }

    pub fn on_error(self, url: &str, err: FetchError) -> Self {
        self.push(url, Err(err))
    }

    /// `url` redirects to `final_url`, which serves `body`.
    pub fn on_redirect(mut self, url: &str, final_url: &str, body: impl Into<String>) -> Self {
        self.redirects
            .insert(url.to_string(), Ok(final_url.to_string()));
        let response = WebResponse {
            status: 200,
            final_url: final_url.to_string(),
            body: body.into(),
        };
        self.push(url, Ok(response))
    }

    /// Resolving `url` fails with `err`.
    pub fn on_redirect_error(mut self, url: &str, err: FetchError) -> Self {
        self.redirects.insert(url.to_string(), Err(err));
        self
    }

    fn push(mut self, url: &str, response: Result<WebResponse, FetchError>) -> Self {
        self.responses
            .entry(url.to_string())
            .or_default()
            .push(response);
        self
    }

    /// URLs requested through `get`, in order.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    /// Cookie headers sent with each `get`, in order.
    pub fn cookies(&self) -> Vec<Option<String>> {
        self.log.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl WebClient for MockWebClient {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<WebResponse, FetchError> {
        self.log
            .lock()
            .unwrap()
            .push((url.to_string(), cookie.map(str::to_string)));
        let n = next_call(&self.calls, url);
        self.responses
            .get(url)
            .and_then(|seq| nth_or_last(seq, n))
            .unwrap_or_else(|| {
                Err(FetchError::Network(format!(
                    "MockWebClient: no response registered for {url}"
                )))
            })
    }

    async fn resolve_redirects(&self, url: &str, _max_hops: usize) -> Result<String, FetchError> {
        self.redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| Ok(url.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockMetadataTool
// ---------------------------------------------------------------------------

/// URL-keyed stand-in for the metadata subprocess.
#[derive(Default)]
pub struct MockMetadataTool {
    metadata: HashMap<String, Vec<Result<Value, FetchError>>>,
    comments: HashMap<String, Vec<Value>>,
    comment_delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockMetadataTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_metadata(mut self, url: &str, metadata: Value) -> Self {
        self.metadata
            .entry(url.to_string())
            .or_default()
            .push(Ok(metadata));
        self
    }

    /// The tool exits non-zero with `stderr`.
    pub fn on_tool_error(mut self, url: &str, stderr: &str) -> Self {
        let err = FetchError::Tool {
            tool: "yt-dlp".to_string(),
            code: Some(1),
            stderr: stderr.to_string(),
        };
        self.metadata.entry(url.to_string()).or_default().push(Err(err));
        self
    }

    pub fn on_comments(mut self, url: &str, comments: Vec<Value>) -> Self {
        self.comments.insert(url.to_string(), comments);
        self
    }

    /// Sleep before every comment download.
    pub fn with_comment_delay(mut self, delay: Duration) -> Self {
        self.comment_delay = Some(delay);
        self
    }

    /// Number of `video_metadata` invocations for `url`.
    pub fn metadata_calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MetadataTool for MockMetadataTool {
    async fn video_metadata(&self, url: &str) -> Result<Value, FetchError> {
        let n = next_call(&self.calls, url);
        self.metadata
            .get(url)
            .and_then(|seq| nth_or_last(seq, n))
            .unwrap_or_else(|| {
                Err(FetchError::Tool {
                    tool: "yt-dlp".to_string(),
                    code: Some(1),
                    stderr: format!("MockMetadataTool: nothing registered for {url}"),
                })
            })
    }

    async fn video_comments(&self, url: &str, max: usize) -> Result<Vec<Value>, FetchError> {
        if let Some(delay) = self.comment_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .comments
            .get(url)
            .map(|c| c.iter().take(max).cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

/// Everything the mock sessions were asked to do, across all sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    /// Session ids in the order they were opened.
    pub opened: Vec<String>,
    pub clears: usize,
    pub blanks: usize,
    /// URLs rendered, in order.
    pub renders: Vec<String>,
    pub releases: usize,
}

#[derive(Default)]
struct BrowserScript {
    pages: HashMap<String, Vec<Result<RenderedPage, FetchError>>>,
    render_delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
    log: Mutex<SessionLog>,
}

/// Scripted browser. Unregistered URLs render an empty page at that URL.
/// Builder pattern: `.on_render()`, `.on_render_error()`, `.with_render_delay()`.
#[derive(Default)]
pub struct MockBrowser {
    script: Arc<BrowserScript>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendering `url` lands on `final_url` with `html`.
    pub fn on_render(self, url: &str, final_url: &str, html: impl Into<String>) -> Self {
        let page = RenderedPage {
            final_url: final_url.to_string(),
            html: html.into(),
        };
        self.push(url, Ok(page))
    }

    pub fn on_render_error(self, url: &str, err: FetchError) -> Self {
        self.push(url, Err(err))
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.script_mut().render_delay = Some(delay);
        self
    }

    fn push(mut self, url: &str, page: Result<RenderedPage, FetchError>) -> Self {
        self.script_mut()
            .pages
            .entry(url.to_string())
            .or_default()
            .push(page);
        self
    }

    fn script_mut(&mut self) -> &mut BrowserScript {
        Arc::get_mut(&mut self.script).expect("MockBrowser configured after opening sessions")
    }

    /// Snapshot of the shared session log.
    pub fn log(&self) -> SessionLog {
        self.script.log.lock().unwrap().clone()
    }
}

impl BrowserProvider for MockBrowser {
    fn open(&self, platform: Platform, slot: usize) -> Box<dyn BrowserSession> {
        let script = self.script.clone();
        let id = format!("{platform}-{slot}");
        script.log.lock().unwrap().opened.push(id.clone());
        Box::new(MockBrowserSession { id, script })
    }
}

pub struct MockBrowserSession {
    id: String,
    script: Arc<BrowserScript>,
}

#[async_trait]
impl BrowserSession for MockBrowserSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn clear_state(&self, _origins: &[&str]) -> Result<(), FetchError> {
        self.script.log.lock().unwrap().clears += 1;
        Ok(())
    }

    async fn navigate_blank(&self) -> Result<(), FetchError> {
        self.script.log.lock().unwrap().blanks += 1;
        Ok(())
    }

    async fn render(&self, url: &str, _auth: &AuthContext) -> Result<RenderedPage, FetchError> {
        if let Some(delay) = self.script.render_delay {
            tokio::time::sleep(delay).await;
        }
        self.script.log.lock().unwrap().renders.push(url.to_string());
        let n = next_call(&self.script.calls, url);
        self.script
            .pages
            .get(url)
            .and_then(|seq| nth_or_last(seq, n))
            .unwrap_or_else(|| {
                Ok(RenderedPage {
                    final_url: url.to_string(),
                    html: String::new(),
                })
            })
    }

    async fn release(&self) -> Result<(), FetchError> {
        self.script.log.lock().unwrap().releases += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockPostScraper
// ---------------------------------------------------------------------------

/// URL-keyed dataset items, as the hosted scraper would return them.
/// Unregistered URLs yield an empty dataset.
#[derive(Default)]
pub struct MockPostScraper {
    instagram: HashMap<String, Value>,
    facebook: HashMap<String, Value>,
}

impl MockPostScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_instagram(mut self, url: &str, item: Value) -> Self {
        self.instagram.insert(url.to_string(), item);
        self
    }

    pub fn on_facebook(mut self, url: &str, item: Value) -> Self {
        self.facebook.insert(url.to_string(), item);
        self
    }
}

#[async_trait]
impl PostScraper for MockPostScraper {
    async fn instagram_post(&self, url: &str) -> Result<Option<InstagramPost>, FetchError> {
        self.instagram
            .get(url)
            .map(|item| serde_json::from_value(item.clone()).map_err(FetchError::from))
            .transpose()
    }

    async fn facebook_post(&self, url: &str) -> Result<Option<FacebookPost>, FetchError> {
        self.facebook
            .get(url)
            .map(|item| serde_json::from_value(item.clone()).map_err(FetchError::from))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// MockLogin
// ---------------------------------------------------------------------------

pub struct MockLogin {
    platform: Platform,
    outcome: Result<AuthContext, FetchError>,
    calls: AtomicUsize,
}

impl MockLogin {
    pub fn succeeding(platform: Platform, token: &str) -> Self {
        Self {
            platform,
            outcome: Ok(AuthContext::SessionToken(token.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(platform: Platform) -> Self {
        Self {
            platform,
            outcome: Err(FetchError::Browser("login timed out".to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthHandshake for MockLogin {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn login(&self) -> Result<AuthContext, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

// ---------------------------------------------------------------------------
// ScriptedStrategy
// ---------------------------------------------------------------------------

type TierScript =
    Box<dyn Fn(&ContentTarget, &TierContext) -> Result<Vec<ExtractionCandidate>, TierError> + Send + Sync>;

/// A strategy whose tiers are closures. Records every attempt as (url, tier index).
pub struct ScriptedStrategy {
    platform: Platform,
    tiers: Vec<TierSpec>,
    scripts: Vec<TierScript>,
    delay: Option<Duration>,
    attempts: Mutex<Vec<(String, usize)>>,
}

impl ScriptedStrategy {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            tiers: Vec::new(),
            scripts: Vec::new(),
            delay: None,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn tier<F>(mut self, spec: TierSpec, script: F) -> Self
    where
        F: Fn(&ContentTarget, &TierContext) -> Result<Vec<ExtractionCandidate>, TierError>
            + Send
            + Sync
            + 'static,
    {
        self.tiers.push(spec);
        self.scripts.push(Box::new(script));
        self
    }

    /// Sleep before every attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> Vec<(String, usize)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceStrategy for ScriptedStrategy {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn tiers(&self) -> &[TierSpec] {
        &self.tiers
    }

    async fn attempt(
        &self,
        target: &ContentTarget,
        tier_index: usize,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.attempts
            .lock()
            .unwrap()
            .push((target.url().to_string(), tier_index));
        let script = self
            .scripts
            .get(tier_index)
            .ok_or(TierError::Exhausted(tier_index))?;
        script(target, cx)
    }
}
