pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Desktop User-Agent sent by every rendered page.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Runs inside Browserless. Masks the webdriver flag, applies cookies,
/// navigates, and reports the URL the browser actually ended on.
const RENDER_FN: &str = r#"
export default async function ({ page, context }) {
  await page.setUserAgent(context.userAgent);
  await page.evaluateOnNewDocument(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
  });
  if (context.cookies.length > 0) {
    await page.setCookie(...context.cookies);
  }
  const response = await page.goto(context.url, { waitUntil: 'networkidle2', timeout: context.timeoutMs });
  if (context.waitMs > 0) {
    await new Promise((r) => setTimeout(r, context.waitMs));
  }
  return {
    data: {
      url: page.url(),
      status: response ? response.status() : null,
      html: await page.content(),
    },
    type: 'application/json',
  };
}
"#;

/// Clears cache, cookies and per-origin storage for the persistent profile,
/// then leaves the tab on a blank page.
const CLEAR_FN: &str = r#"
export default async function ({ page, context }) {
  const client = await page.target().createCDPSession();
  await client.send('Network.clearBrowserCache');
  for (const origin of context.origins) {
    await client.send('Storage.clearDataForOrigin', {
      origin,
      storageTypes: 'local_storage,session_storage,indexeddb,cache_storage,service_workers',
    });
  }
  await page.goto('about:blank');
  return { data: { url: page.url() }, type: 'application/json' };
}
"#;

const COOKIES_FN: &str = r#"
export default async function ({ page, context }) {
  await page.goto(context.url, { waitUntil: 'domcontentloaded' });
  const cookies = await page.cookies();
  return {
    data: cookies.map((c) => ({ name: c.name, value: c.value, domain: c.domain })),
    type: 'application/json',
  };
}
"#;

const BLANK_FN: &str = r#"
export default async function ({ page }) {
  await page.goto('about:blank');
  return { data: { url: page.url() }, type: 'application/json' };
}
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub cookies: Vec<BrowserCookie>,
    /// Extra settle time after network idle.
    pub wait: Duration,
}

/// Result of rendering a URL.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderedPage {
    /// URL the browser ended on after redirects and client-side routing.
    pub url: String,
    pub status: Option<u16>,
    pub html: String,
}

#[derive(Debug, Deserialize)]
struct UrlOnly {
    url: String,
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    nav_timeout: Duration,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            nav_timeout: Duration::from_secs(45),
        }
    }

    /// Render `url` in the persistent profile `profile`.
    pub async fn render(&self, profile: &str, url: &str, opts: &RenderOptions) -> Result<RenderedPage> {
        tracing::debug!(profile, url, "browserless: rendering");
        let context = serde_json::json!({
            "url": url,
            "userAgent": DESKTOP_USER_AGENT,
            "cookies": opts.cookies,
            "waitMs": opts.wait.as_millis() as u64,
            "timeoutMs": self.nav_timeout.as_millis() as u64,
        });
        self.run_function(profile, RENDER_FN, context).await
    }

    /// Wipe browser-local state for the given origins and park the tab on `about:blank`.
    pub async fn clear_state(&self, profile: &str, origins: &[&str]) -> Result<()> {
        tracing::debug!(profile, origins = origins.len(), "browserless: clearing state");
        let context = serde_json::json!({ "origins": origins });
        let landed: UrlOnly = self.run_function(profile, CLEAR_FN, context).await?;
        expect_blank(&landed.url)
    }

    /// Cookies the persistent profile holds after visiting `url`.
    pub async fn cookies(&self, profile: &str, url: &str) -> Result<Vec<BrowserCookie>> {
        self.run_function(profile, COOKIES_FN, serde_json::json!({ "url": url }))
            .await
    }

    pub async fn navigate_blank(&self, profile: &str) -> Result<()> {
        let landed: UrlOnly = self
            .run_function(profile, BLANK_FN, serde_json::json!({}))
            .await?;
        expect_blank(&landed.url)
    }

    async fn run_function<T: serde::de::DeserializeOwned>(
        &self,
        profile: &str,
        code: &str,
        context: serde_json::Value,
    ) -> Result<T> {
        let endpoint = self.endpoint("function", Some(profile));
        let body = serde_json::json!({ "code": code, "context": context });

        let resp = self.client.post(&endpoint).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| BrowserlessError::Parse(e.to_string()))
    }

    fn endpoint(&self, path: &str, profile: Option<&str>) -> String {
        let mut params = Vec::new();
        if let Some(ref token) = self.token {
            params.push(format!("token={token}"));
        }
        if let Some(profile) = profile {
            params.push(format!("launch={}", launch_param(profile)));
        }
        if params.is_empty() {
            format!("{}/{}", self.base_url, path)
        } else {
            format!("{}/{}?{}", self.base_url, path, params.join("&"))
        }
    }
}

/// URL-encoded launch options pinning the browser to a per-session profile directory.
fn launch_param(profile: &str) -> String {
    let launch = serde_json::json!({
        "args": [format!("--user-data-dir=/tmp/engage-profiles/{profile}")],
        "stealth": true,
    });
    url::form_urlencoded::byte_serialize(launch.to_string().as_bytes()).collect()
}

fn expect_blank(url: &str) -> Result<()> {
    if url == "about:blank" {
        Ok(())
    } else {
        Err(BrowserlessError::UnexpectedPage(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_token_and_profile() {
        let client = BrowserlessClient::new("http://browser:3000/", Some("secret"));
        let url = client.endpoint("function", Some("photo-0"));
        assert!(url.starts_with("http://browser:3000/function?token=secret&launch="));
        assert!(url.contains("photo-0"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn launch_options_survive_query_decoding() {
        let client = BrowserlessClient::new("http://browser:3000", None);
        let url = client.endpoint("function", Some("note-1"));
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
        let (key, value) = url::form_urlencoded::parse(query.as_bytes()).next().unwrap();
        assert_eq!(key, "launch");
        let launch: serde_json::Value = serde_json::from_str(&value).unwrap();
        assert_eq!(
            launch["args"][0],
            "--user-data-dir=/tmp/engage-profiles/note-1"
        );
        assert_eq!(launch["stealth"], true);
    }

    #[test]
    fn endpoint_has_no_query_without_token_or_profile() {
        let client = BrowserlessClient::new("http://browser:3000", None);
        assert_eq!(client.endpoint("function", None), "http://browser:3000/function");
    }

    #[test]
    fn non_blank_landing_is_an_error() {
        assert!(expect_blank("about:blank").is_ok());
        assert!(matches!(
            expect_blank("https://www.instagram.com/"),
            Err(BrowserlessError::UnexpectedPage(_))
        ));
    }
}
