pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{
    FacebookMedia, FacebookPost, FacebookPostInput, FacebookUser, InstagramComment, InstagramPost,
    InstagramPostInput, RunData, StartUrl,
};

use serde::de::DeserializeOwned;
use serde::Serialize;
use types::ApiResponse;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Actor ID for apify/instagram-scraper.
const INSTAGRAM_SCRAPER: &str = "shu8hvrXbJbY3Eb9W";

/// Actor ID for apify/facebook-posts-scraper.
const FACEBOOK_POSTS_SCRAPER: &str = "KoJrdxJCTtpon81KY";

/// Pass successful responses through; classify the rest.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApifyError::from_status(status.as_u16(), body))
}

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (self-hosted proxy, test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Start an actor run. Returns immediately with run metadata.
    pub async fn start_run<I: Serialize>(&self, actor_id: &str, input: &I) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;

        let resp = check(resp).await?;

        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Poll until a run completes. Uses `waitForFinish=60` for efficient long-polling.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        loop {
            let url = format!("{}/actor-runs/{}?waitForFinish=60", self.base_url, run_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;

            let resp = check(resp).await?;

            let api_resp: ApiResponse<RunData> = resp.json().await?;
            match api_resp.data.status.as_str() {
                "SUCCEEDED" => return Ok(api_resp.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(ApifyError::RunFailed {
                        run_id: run_id.to_string(),
                        status: api_resp.data.status,
                    });
                }
                _ => {
                    tracing::debug!(run_id, status = %api_resp.data.status, "Run still in progress");
                    continue;
                }
            }
        }
    }

    /// Fetch dataset items from a completed run.
    pub async fn get_dataset_items<T: DeserializeOwned>(&self, dataset_id: &str) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items?format=json", self.base_url, dataset_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let resp = check(resp).await?;

        let items: Vec<T> = resp.json().await?;
        Ok(items)
    }

    /// Start a run, wait for it, and return its dataset.
    async fn run_to_completion<I: Serialize, T: DeserializeOwned>(
        &self,
        actor_id: &str,
        input: &I,
    ) -> Result<Vec<T>> {
        let run = self.start_run(actor_id, input).await?;
        tracing::info!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::info!(
            run_id = %completed.id,
            dataset_id = %completed.default_dataset_id,
            "Run completed, fetching results"
        );

        self.get_dataset_items(&completed.default_dataset_id).await
    }

    /// Scrape a single Instagram post by URL. `None` when the dataset is empty.
    pub async fn scrape_instagram_post(&self, post_url: &str) -> Result<Option<InstagramPost>> {
        tracing::info!(post_url, "Starting Instagram post scrape");

        let input = InstagramPostInput {
            direct_urls: vec![post_url.to_string()],
            results_type: "posts".to_string(),
            results_limit: 1,
        };
        let posts: Vec<InstagramPost> = self.run_to_completion(INSTAGRAM_SCRAPER, &input).await?;
        tracing::info!(count = posts.len(), "Fetched Instagram posts");

        Ok(posts.into_iter().next())
    }

    /// Scrape a single Facebook post by URL. `None` when the dataset is empty.
    pub async fn scrape_facebook_post(&self, post_url: &str) -> Result<Option<FacebookPost>> {
        tracing::info!(post_url, "Starting Facebook post scrape");

        let input = FacebookPostInput {
            start_urls: vec![StartUrl {
                url: post_url.to_string(),
            }],
            results_limit: 1,
        };
        let posts: Vec<FacebookPost> = self
            .run_to_completion(FACEBOOK_POSTS_SCRAPER, &input)
            .await?;
        tracing::info!(count = posts.len(), "Fetched Facebook posts");

        Ok(posts.into_iter().next())
    }
}
