use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// A start URL entry for actor input.
#[derive(Debug, Clone, Serialize)]
pub struct StartUrl {
    pub url: String,
}

// --- Instagram post scraper ---

/// Input for the apify/instagram-scraper actor, addressed by post URL.
#[derive(Debug, Clone, Serialize)]
pub struct InstagramPostInput {
    #[serde(rename = "directUrls")]
    pub direct_urls: Vec<String>,
    #[serde(rename = "resultsType")]
    pub results_type: String,
    #[serde(rename = "resultsLimit")]
    pub results_limit: u32,
}

/// A single Instagram post from the Apify dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct InstagramPost {
    pub url: Option<String>,
    #[serde(rename = "shortCode")]
    pub short_code: Option<String>,
    pub caption: Option<String>,
    #[serde(rename = "ownerUsername")]
    pub owner_username: Option<String>,
    #[serde(rename = "displayUrl")]
    pub display_url: Option<String>,
    #[serde(rename = "likesCount")]
    pub likes_count: Option<i64>,
    #[serde(rename = "commentsCount")]
    pub comments_count: Option<i64>,
    #[serde(rename = "videoViewCount")]
    pub video_view_count: Option<i64>,
    #[serde(rename = "latestComments", default)]
    pub latest_comments: Vec<InstagramComment>,
    /// Set by the actor when the post could not be scraped, e.g. `"not_found"`.
    pub error: Option<String>,
    #[serde(rename = "errorDescription")]
    pub error_description: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstagramComment {
    #[serde(rename = "ownerUsername")]
    pub owner_username: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "likesCount")]
    pub likes_count: Option<i64>,
}

// --- Facebook post scraper ---

/// Input for the apify/facebook-posts-scraper actor.
#[derive(Debug, Clone, Serialize)]
pub struct FacebookPostInput {
    #[serde(rename = "startUrls")]
    pub start_urls: Vec<StartUrl>,
    #[serde(rename = "resultsLimit")]
    pub results_limit: u32,
}

/// A single Facebook post from the Apify dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct FacebookPost {
    pub url: Option<String>,
    #[serde(rename = "postId")]
    pub post_id: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "pageName")]
    pub page_name: Option<String>,
    pub user: Option<FacebookUser>,
    pub likes: Option<i64>,
    pub comments: Option<i64>,
    pub shares: Option<i64>,
    #[serde(rename = "viewsCount")]
    pub views_count: Option<i64>,
    #[serde(default)]
    pub media: Vec<FacebookMedia>,
    pub error: Option<String>,
}

impl FacebookPost {
    /// Page name, falling back to the posting user's name.
    pub fn author(&self) -> Option<&str> {
        self.page_name
            .as_deref()
            .or_else(|| self.user.as_ref().and_then(|u| u.name.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacebookUser {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacebookMedia {
    pub thumbnail: Option<String>,
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instagram_post_tolerates_missing_fields() {
        let post: InstagramPost = serde_json::from_str(
            r#"{"shortCode":"Cabc","ownerUsername":"cafe","likesCount":270,"commentsCount":2}"#,
        )
        .unwrap();
        assert_eq!(post.likes_count, Some(270));
        assert!(post.latest_comments.is_empty());
        assert!(post.error.is_none());
    }

    #[test]
    fn facebook_author_falls_back_to_user() {
        let post: FacebookPost =
            serde_json::from_str(r#"{"user":{"name":"Jane"},"likes":4}"#).unwrap();
        assert_eq!(post.author(), Some("Jane"));
    }
}
