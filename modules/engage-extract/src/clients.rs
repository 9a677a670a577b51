// Production implementations of the trait seams.
//
// HttpWebClient: reqwest, desktop UA, manual redirect walking
// YtDlp: yt-dlp subprocess under a single timeout
// BrowserlessBrowser: persistent-profile sessions on a browserless instance
// PostScraper for Apify: hosted single-post scraper runs
// BrowserLoginHandshake: scan-based login, polled until the session cookie appears

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use apify_client::{ApifyClient, FacebookPost, InstagramPost};
use browserless_client::{BrowserCookie, BrowserlessClient, RenderOptions, DESKTOP_USER_AGENT};
use engage_common::{AuthContext, Cookie, Platform};

use crate::error::FetchError;
use crate::services::xiaohongshu::SESSION_COOKIE;
use crate::traits::{
    AuthHandshake, BrowserProvider, BrowserSession, MetadataTool, PostScraper, RenderedPage,
    WebClient, WebResponse,
};

/// Cookie a bare session token is sent as, per platform.
pub fn token_cookie(platform: Platform) -> &'static str {
    match platform {
        Platform::Video => "SID",
        Platform::Photo => "sessionid",
        Platform::Social => "xs",
        Platform::Forum => "dcsrd",
        Platform::Note => SESSION_COOKIE,
    }
}

/// Domain cookies are installed on before rendering.
fn cookie_domain(platform: Platform) -> &'static str {
    match platform {
        Platform::Video => ".youtube.com",
        Platform::Photo => ".instagram.com",
        Platform::Social => ".facebook.com",
        Platform::Forum => ".dcard.tw",
        Platform::Note => ".xiaohongshu.com",
    }
}

// --- HTTP ---

pub struct HttpWebClient {
    client: reqwest::Client,
    /// Same settings, but never follows redirects. Used to walk short links hop by hop.
    no_redirect: reqwest::Client,
}

impl HttpWebClient {
    pub fn new(timeout: Duration) -> Self {
        let build = |policy: reqwest::redirect::Policy| {
            reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(DESKTOP_USER_AGENT)
                .redirect(policy)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new())
        };
        Self {
            client: build(reqwest::redirect::Policy::limited(10)),
            no_redirect: build(reqwest::redirect::Policy::none()),
        }
    }
}

#[async_trait]
impl WebClient for HttpWebClient {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<WebResponse, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9,zh-TW;q=0.8");
        if let Some(cookie) = cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.text().await?;
        Ok(WebResponse {
            status: status.as_u16(),
            final_url,
            body,
        })
    }

    async fn resolve_redirects(&self, url: &str, max_hops: usize) -> Result<String, FetchError> {
        let mut current =
            url::Url::parse(url).map_err(|e| FetchError::Parse(format!("{url}: {e}")))?;

        for _ in 0..=max_hops {
            let resp = self.no_redirect.get(current.as_str()).send().await?;
            if !resp.status().is_redirection() {
                return Ok(current.to_string());
            }
            let Some(location) = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Ok(current.to_string());
            };
            current = current
                .join(location)
                .map_err(|e| FetchError::Parse(format!("bad Location {location:?}: {e}")))?;
        }

        Err(FetchError::TooManyRedirects {
            url: url.to_string(),
            hops: max_hops,
        })
    }
}

// --- yt-dlp ---

pub struct YtDlp {
    bin: String,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    async fn run_json(&self, args: &[&str]) -> Result<serde_json::Value, FetchError> {
        let result = tokio::time::timeout(
            self.timeout,
            Command::new(&self.bin).args(args).kill_on_drop(true).output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(FetchError::Tool {
                    tool: self.bin.clone(),
                    code: None,
                    stderr: format!("failed to launch: {e}"),
                })
            }
            Err(_) => return Err(FetchError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(bin = %self.bin, code = ?output.status.code(), stderr = %stderr, "yt-dlp exited with error");
            return Err(FetchError::Tool {
                tool: self.bin.clone(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl MetadataTool for YtDlp {
    async fn video_metadata(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        self.run_json(&["-J", "--skip-download", "--no-warnings", "--no-playlist", url])
            .await
    }

    async fn video_comments(
        &self,
        url: &str,
        max: usize,
    ) -> Result<Vec<serde_json::Value>, FetchError> {
        let extractor_args = format!("youtube:max_comments={max},all,0;comment_sort=top");
        let meta = self
            .run_json(&[
                "-J",
                "--skip-download",
                "--no-warnings",
                "--no-playlist",
                "--write-comments",
                "--extractor-args",
                &extractor_args,
                url,
            ])
            .await?;

        Ok(meta
            .get("comments")
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter(|c| c.get("parent").and_then(|p| p.as_str()) == Some("root"))
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// --- Browserless ---

pub struct BrowserlessBrowser {
    client: Arc<BrowserlessClient>,
    settle: Duration,
}

impl BrowserlessBrowser {
    pub fn new(client: Arc<BrowserlessClient>) -> Self {
        Self {
            client,
            settle: Duration::from_millis(1500),
        }
    }
}

impl BrowserProvider for BrowserlessBrowser {
    fn open(&self, platform: Platform, slot: usize) -> Box<dyn BrowserSession> {
        Box::new(BrowserlessSession {
            client: self.client.clone(),
            platform,
            profile: format!("{platform}-{slot}"),
            settle: self.settle,
        })
    }
}

/// One persistent browser profile. Every call goes to the same profile directory.
pub struct BrowserlessSession {
    client: Arc<BrowserlessClient>,
    platform: Platform,
    profile: String,
    settle: Duration,
}

impl BrowserlessSession {
    fn cookies_for(&self, auth: &AuthContext) -> Vec<BrowserCookie> {
        let domain = cookie_domain(self.platform).to_string();
        let to_browser = |name: &str, value: &str| BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.clone(),
        };
        match auth {
            AuthContext::None => Vec::new(),
            AuthContext::Cookies(cookies) => cookies
                .iter()
                .map(|c| to_browser(&c.name, &c.value))
                .collect(),
            AuthContext::SessionToken(token) => {
                vec![to_browser(token_cookie(self.platform), token)]
            }
        }
    }
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    fn id(&self) -> &str {
        &self.profile
    }

    async fn clear_state(&self, origins: &[&str]) -> Result<(), FetchError> {
        Ok(self.client.clear_state(&self.profile, origins).await?)
    }

    async fn navigate_blank(&self) -> Result<(), FetchError> {
        Ok(self.client.navigate_blank(&self.profile).await?)
    }

    async fn render(&self, url: &str, auth: &AuthContext) -> Result<RenderedPage, FetchError> {
        let opts = RenderOptions {
            cookies: self.cookies_for(auth),
            wait: self.settle,
        };
        let page = self.client.render(&self.profile, url, &opts).await?;
        if let Some(status) = page.status.filter(|s| *s >= 400) {
            return Err(FetchError::Status {
                status,
                url: page.url,
            });
        }
        Ok(RenderedPage {
            final_url: page.url,
            html: page.html,
        })
    }

    async fn release(&self) -> Result<(), FetchError> {
        // Profiles persist on disk; parking the tab is all there is to release.
        Ok(self.client.navigate_blank(&self.profile).await?)
    }
}

// --- Apify ---

#[async_trait]
impl PostScraper for ApifyClient {
    async fn instagram_post(&self, url: &str) -> Result<Option<InstagramPost>, FetchError> {
        Ok(self.scrape_instagram_post(url).await?)
    }

    async fn facebook_post(&self, url: &str) -> Result<Option<FacebookPost>, FetchError> {
        Ok(self.scrape_facebook_post(url).await?)
    }
}

// --- Login ---

const XHS_LOGIN_URL: &str = "https://www.xiaohongshu.com/explore";
const LOGIN_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Opens the platform's login page in a dedicated profile and waits for the
/// operator to scan the QR code. The session cookie is the token.
pub struct BrowserLoginHandshake {
    client: Arc<BrowserlessClient>,
    platform: Platform,
    login_url: String,
    cookie_name: &'static str,
    timeout: Duration,
}

impl BrowserLoginHandshake {
    pub fn xiaohongshu(client: Arc<BrowserlessClient>, timeout: Duration) -> Self {
        Self {
            client,
            platform: Platform::Note,
            login_url: XHS_LOGIN_URL.to_string(),
            cookie_name: SESSION_COOKIE,
            timeout,
        }
    }

    fn profile(&self) -> String {
        format!("{}-login", self.platform)
    }

    async fn poll_cookie(&self, profile: &str) -> Result<String, FetchError> {
        loop {
            let cookies = self.client.cookies(profile, &self.login_url).await?;
            if let Some(c) = cookies
                .into_iter()
                .find(|c| c.name == self.cookie_name && !c.value.is_empty())
            {
                return Ok(c.value);
            }
            tokio::time::sleep(LOGIN_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl AuthHandshake for BrowserLoginHandshake {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn login(&self) -> Result<AuthContext, FetchError> {
        let profile = self.profile();
        info!(
            platform = %self.platform,
            profile = %profile,
            timeout_secs = self.timeout.as_secs(),
            "Waiting for scan-based login"
        );
        self.client
            .render(&profile, &self.login_url, &RenderOptions::default())
            .await?;

        let token = tokio::time::timeout(self.timeout, self.poll_cookie(&profile))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        info!(platform = %self.platform, "Login handshake completed");
        Ok(AuthContext::Cookies(vec![Cookie {
            name: self.cookie_name.to_string(),
            value: token,
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_become_platform_cookies() {
        let session = BrowserlessSession {
            client: Arc::new(BrowserlessClient::new("http://localhost:3000", None)),
            platform: Platform::Note,
            profile: "note-0".into(),
            settle: Duration::ZERO,
        };
        let cookies = session.cookies_for(&AuthContext::SessionToken("abc".into()));
        assert_eq!(
            cookies,
            vec![BrowserCookie {
                name: "web_session".into(),
                value: "abc".into(),
                domain: ".xiaohongshu.com".into(),
            }]
        );
        assert!(session.cookies_for(&AuthContext::None).is_empty());
    }

    #[test]
    fn sessions_are_named_per_platform_slot() {
        let browser = BrowserlessBrowser::new(Arc::new(BrowserlessClient::new(
            "http://localhost:3000",
            None,
        )));
        assert_eq!(browser.open(Platform::Photo, 1).id(), "photo-1");
    }

    #[tokio::test]
    async fn missing_binary_is_a_tool_error() {
        let tool = YtDlp::new("/nonexistent/yt-dlp-binary", Duration::from_secs(5));
        let err = tool.video_metadata("https://www.youtube.com/watch?v=x").await.unwrap_err();
        assert!(matches!(err, FetchError::Tool { code: None, .. }));
    }
}
