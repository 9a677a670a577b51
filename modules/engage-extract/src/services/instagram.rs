// Instagram strategy: hosted post scraper, the post page's embedded media JSON,
// the session-rendered open-graph summary, scoped free-text patterns and, once
// the platform is escalated, the public embed page.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use serde_json::Value;
use tracing::{debug, info};

use apify_client::InstagramPost;
use engage_common::{
    ContentTarget, ExtractionCandidate, FailureReason, Field, Platform, RawComment, RawValue, Tier,
};

use super::{check_page_markers, meta_property, select_attr, select_text};
use crate::error::TierError;
use crate::scoping::{json_object_at, mask_comment_spans, near, nearest_capture};
use crate::strategy::{
    find_object, json_count, json_str, spec_at, Candidates, SourceStrategy, TierContext, TierSpec,
};
use crate::traits::{PostScraper, WebClient, WebResponse};

const TIERS: [TierSpec; 5] = [
    TierSpec::direct(Tier::Primary, "apify-post"),
    TierSpec::direct(Tier::Embedded, "shared-data"),
    TierSpec::session(Tier::Rendered, "session-meta"),
    TierSpec::direct(Tier::Pattern, "shortcode-regex"),
    TierSpec::fallback(Tier::Rendered, "embed-captioned"),
];

const ORIGINS: &[&str] = &["https://www.instagram.com"];

const NOT_FOUND: &[&str] = &[
    "Sorry, this page isn&#39;t available",
    "Sorry, this page isn't available",
    "The link you followed may be broken",
];
const LOGIN_WALL: &[&str] = &["<title>Login • Instagram</title>"];

/// Script assignments that carry the post's media object.
const MEDIA_MARKERS: &[&str] = &[
    "window._sharedData = ",
    "window.__additionalDataLoaded(",
    "\"shortcode_media\":",
    "\"xdt_api__v1__media__shortcode__web_info\":",
];

const PATTERN_RADIUS: usize = 5000;
const THUMBNAIL_MAX_WIDTH: u64 = 640;
const AUTHOR_RADIUS: usize = 2000;

static OG_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)^\s*([\d.,]+[KkMm]?) likes?, ([\d.,]+[KkMm]?) comments? - ([A-Za-z0-9._]+) on [^:]*:\s*"(.*)"\s*\.?\s*$"#,
    )
    .unwrap()
});
static LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:like_count|edge_media_preview_like":\{"count|edge_liked_by":\{"count)":(\d+)"#)
        .unwrap()
});
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:comment_count|edge_media_to_(?:parent_)?comment":\{"count)":(\d+)"#).unwrap()
});
static VIEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:video_view_count|play_count|view_count)":(\d+)"#).unwrap()
});
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""username":"([A-Za-z0-9._]+)""#).unwrap());
static EMBED_LIKES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.,]+[KkMm]?)\s+likes?").unwrap());
static EMBED_COMMENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"View all ([\d.,]+[KkMm]?) comments").unwrap());

pub struct InstagramStrategy {
    scraper: Option<Arc<dyn PostScraper>>,
    web: Arc<dyn WebClient>,
}

impl InstagramStrategy {
    pub fn new(scraper: Option<Arc<dyn PostScraper>>, web: Arc<dyn WebClient>) -> Self {
        Self { scraper, web }
    }

    async fn scraped(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let Some(scraper) = &self.scraper else {
            return Err(TierError::Skipped("no post scraper"));
        };
        info!(url = target.url(), "instagram: starting scraper run");
        let post = scraper
            .instagram_post(target.url())
            .await?
            .ok_or_else(|| TierError::malformed("scraper returned no item"))?;
        scraped_candidates(target, spec, &post)
    }

    async fn shared_data(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let page = self.post_page(target, cx).await?;
        if page.final_url.contains("/accounts/login") {
            return Err(TierError::failure(
                FailureReason::AccessDenied,
                "redirected to login",
            ));
        }
        check_page_markers(&page.body, NOT_FOUND, LOGIN_WALL)?;

        let shortcode = target.identifier().unwrap_or_default();
        let media = find_media(&page.body, shortcode)
            .ok_or_else(|| TierError::malformed(format!("no media object for {shortcode}")))?;
        Ok(media_candidates(spec, &media))
    }

    async fn session_meta(
        &self,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let html = cx.rendered_html()?;
        check_page_markers(html, NOT_FOUND, LOGIN_WALL)?;
        let summary = OpenGraphSummary::parse(html);

        let mut c = Candidates::new(spec);
        c.corroborated(summary.author.is_some())
            .text(Field::Author, summary.author.as_deref())
            .count(Field::LikeCount, summary.likes.as_deref())
            .count(Field::CommentCount, summary.comments.as_deref())
            .text(Field::Body, summary.caption.as_deref())
            .text(Field::Thumbnail, summary.image.as_deref());
        Ok(c.finish())
    }

    async fn shortcode_patterns(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let cached = cx.any_html().map(str::to_string);
        let html = match cached {
            Some(html) => html,
            None => self.post_page(target, cx).await?.body,
        };
        let shortcode = target.identifier().unwrap_or_default();
        let masked = mask_comment_spans(&html);
        let anchor = [format!("\"shortcode\":\"{shortcode}\""), format!("\"code\":\"{shortcode}\"")]
            .into_iter()
            .find_map(|needle| masked.find(&needle))
            .ok_or_else(|| TierError::malformed(format!("shortcode {shortcode} not on page")))?;

        let owner = nearest_capture(&USERNAME_RE, &masked, anchor, PATTERN_RADIUS);
        let mut c = Candidates::new(spec);
        c.corroborated(owner.is_some())
            .text(Field::Author, owner.as_ref().map(|(_, name)| name.as_str()));
        let owner_needle = owner
            .as_ref()
            .map(|(_, name)| format!("\"username\":\"{name}\""))
            .unwrap_or_default();

        for (field, re) in [
            (Field::LikeCount, &*LIKE_RE),
            (Field::CommentCount, &*COMMENT_RE),
            (Field::ViewCount, &*VIEW_RE),
        ] {
            if let Some((pos, value)) = nearest_capture(re, &masked, anchor, PATTERN_RADIUS) {
                c.corroborated(near(&masked, pos, &owner_needle, AUTHOR_RADIUS))
                    .count(field, Some(&value));
            }
        }
        Ok(c.finish())
    }

    async fn embed_page(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let shortcode = target.identifier().unwrap_or_default();
        let url = format!("https://www.instagram.com/p/{shortcode}/embed/captioned/");
        debug!(url = %url, "instagram: fetching embed page");
        let page = self.web.get(&url, None).await?;
        check_page_markers(&page.body, NOT_FOUND, &[])?;
        let embed = EmbedFields::parse(&page.body);

        let mut c = Candidates::new(spec);
        c.corroborated(embed.author.is_some())
            .text(Field::Author, embed.author.as_deref())
            .count(Field::LikeCount, embed.likes.as_deref())
            .count(Field::CommentCount, embed.comments.as_deref())
            .text(Field::Body, embed.caption.as_deref())
            .text(Field::Thumbnail, embed.image.as_deref());
        Ok(c.finish())
    }

    async fn post_page(
        &self,
        target: &ContentTarget,
        cx: &mut TierContext,
    ) -> Result<WebResponse, TierError> {
        if let Some(page) = &cx.fetched {
            return Ok(page.clone());
        }
        let cookie = cx.auth.cookie_header("sessionid");
        let page = self.web.get(target.url(), cookie.as_deref()).await?;
        cx.fetched = Some(page.clone());
        Ok(page)
    }
}

fn scraped_candidates(
    target: &ContentTarget,
    spec: &TierSpec,
    post: &InstagramPost,
) -> Result<Vec<ExtractionCandidate>, TierError> {
    if let Some(error) = &post.error {
        let message = post.error_description.clone().unwrap_or_else(|| error.clone());
        let reason = match error.as_str() {
            "not_found" | "no_items" => FailureReason::NotFound,
            "restricted_page" | "private" | "login_required" => FailureReason::AccessDenied,
            _ => FailureReason::MalformedResponse,
        };
        return Err(TierError::failure(reason, message));
    }
    if let (Some(got), Some(want)) = (post.short_code.as_deref(), target.identifier()) {
        if got != want {
            return Err(TierError::malformed(format!(
                "scraper returned {got}, not {want}"
            )));
        }
    }

    let comments = post
        .latest_comments
        .iter()
        .map(|comment| RawComment {
            author: comment.owner_username.clone().unwrap_or_default(),
            text: comment.text.clone().unwrap_or_default(),
            likes: comment.likes_count.map(RawValue::Integer),
        })
        .collect::<Vec<_>>();

    let mut c = Candidates::new(spec);
    c.corroborated(post.owner_username.is_some())
        .text(Field::Author, post.owner_username.as_deref())
        .integer(Field::LikeCount, post.likes_count)
        .integer(Field::CommentCount, post.comments_count)
        .integer(Field::ViewCount, post.video_view_count)
        .text(Field::Thumbnail, post.display_url.as_deref())
        .text(Field::Body, post.caption.as_deref());
    if !comments.is_empty() {
        c.comments(Some(comments));
    }
    Ok(c.finish())
}

/// The media object for `shortcode`, from whichever script assignment carries it.
fn find_media(html: &str, shortcode: &str) -> Option<Value> {
    if shortcode.is_empty() {
        return None;
    }
    let is_post = |m: &serde_json::Map<String, Value>| {
        ["shortcode", "code"]
            .iter()
            .any(|key| m.get(*key).and_then(Value::as_str) == Some(shortcode))
    };

    MEDIA_MARKERS.iter().find_map(|marker| {
        let mut from = 0;
        while let Some(at) = html.get(from..)?.find(marker) {
            let start = from + at + marker.len();
            if let Some(blob) = json_object_at(html, start) {
                if let Ok(value) = serde_json::from_str::<Value>(blob) {
                    if let Some(media) = find_object(&value, &is_post) {
                        return Some(media.clone());
                    }
                }
            }
            from = start;
        }
        None
    })
}

/// Candidates from a graphql (`edge_*`) or v1 (`*_count`) media object.
fn media_candidates(spec: &TierSpec, media: &Value) -> Vec<ExtractionCandidate> {
    let first = |paths: &[&[&str]]| paths.iter().find_map(|p| json_count(media, p));
    let text = |paths: &[&[&str]]| paths.iter().find_map(|p| json_str(media, p));

    let author = text(&[&["owner", "username"], &["user", "username"]]);
    let likes = first(&[
        &["edge_media_preview_like", "count"],
        &["edge_liked_by", "count"],
        &["like_count"],
    ]);
    let comments = first(&[
        &["edge_media_to_parent_comment", "count"],
        &["edge_media_to_comment", "count"],
        &["comment_count"],
    ]);
    let views = first(&[&["video_view_count"], &["play_count"], &["view_count"]]);
    let resources = media
        .get("display_resources")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let thumbnail = preferred_resource(resources)
        .or_else(|| {
            text(&[
                &["display_url"],
                &["image_versions2", "candidates", "0", "url"],
                &["thumbnail_src"],
            ])
        })
        .or_else(|| resources.first().and_then(|r| json_str(r, &["src"])));
    let caption = text(&[
        &["edge_media_to_caption", "edges", "0", "node", "text"],
        &["caption", "text"],
    ]);

    let mut c = Candidates::new(spec);
    c.corroborated(author.is_some())
        .text(Field::Author, author)
        .push(Field::LikeCount, likes)
        .push(Field::CommentCount, comments)
        .push(Field::ViewCount, views)
        .text(Field::Thumbnail, thumbnail)
        .text(Field::Body, caption);
    c.finish()
}

/// Largest `display_resources` entry no wider than 640 px.
fn preferred_resource(resources: &[Value]) -> Option<&str> {
    resources
        .iter()
        .filter_map(|r| {
            let width = r.get("config_width").and_then(Value::as_u64)?;
            let src = json_str(r, &["src"])?;
            (width <= THUMBNAIL_MAX_WIDTH).then_some((width, src))
        })
        .max_by_key(|(width, _)| *width)
        .map(|(_, src)| src)
}

#[derive(Debug, Default)]
struct OpenGraphSummary {
    author: Option<String>,
    likes: Option<String>,
    comments: Option<String>,
    caption: Option<String>,
    image: Option<String>,
}

impl OpenGraphSummary {
    fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let mut summary = Self {
            image: meta_property(&doc, "og:image"),
            ..Self::default()
        };
        let description = meta_property(&doc, "og:description")
            .or_else(|| select_attr(&doc, r#"meta[name="description"]"#, "content"));
        if let Some(caps) = description.as_deref().and_then(|d| OG_SUMMARY_RE.captures(d)) {
            summary.likes = Some(caps[1].to_string());
            summary.comments = Some(caps[2].to_string());
            summary.author = Some(caps[3].to_string());
            summary.caption = Some(caps[4].to_string());
        }
        summary
    }
}

#[derive(Debug, Default)]
struct EmbedFields {
    author: Option<String>,
    likes: Option<String>,
    comments: Option<String>,
    caption: Option<String>,
    image: Option<String>,
}

impl EmbedFields {
    fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let author = select_text(&doc, ".UsernameText");
        let likes = select_text(&doc, ".SocialProof a")
            .and_then(|t| EMBED_LIKES_RE.captures(&t).map(|c| c[1].to_string()));
        let comments = EMBED_COMMENTS_RE.captures(html).map(|c| c[1].to_string());
        // The caption block starts with the author's name.
        let caption = select_text(&doc, ".Caption").map(|text| match &author {
            Some(name) => text.strip_prefix(name.as_str()).unwrap_or(&text).trim().to_string(),
            None => text,
        });
        let image = select_attr(&doc, "img.EmbeddedMediaImage", "src");
        Self {
            author,
            likes,
            comments,
            caption,
            image,
        }
    }
}

#[async_trait]
impl SourceStrategy for InstagramStrategy {
    fn platform(&self) -> Platform {
        Platform::Photo
    }

    fn tiers(&self) -> &[TierSpec] {
        &TIERS
    }

    fn session_origins(&self) -> &[&'static str] {
        ORIGINS
    }

    async fn attempt(
        &self,
        target: &ContentTarget,
        tier_index: usize,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let spec = spec_at(&TIERS, tier_index)?;
        match tier_index {
            0 => self.scraped(target, spec).await,
            1 => self.shared_data(target, spec, cx).await,
            2 => self.session_meta(spec, cx).await,
            3 => self.shortcode_patterns(target, spec, cx).await,
            _ => self.embed_page(target, spec).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPostScraper, MockWebClient};
    use crate::traits::RenderedPage;
    use engage_common::AuthContext;
    use serde_json::json;

    const URL: &str = "https://www.instagram.com/p/Cabc123/";

    fn target() -> ContentTarget {
        ContentTarget::new(Platform::Photo, URL).with_identifier("Cabc123")
    }

    fn cx() -> TierContext {
        TierContext::new(AuthContext::None, 10)
    }

    fn value(candidates: &[ExtractionCandidate], field: Field) -> Option<&RawValue> {
        candidates.iter().find(|c| c.field == field).map(|c| &c.value)
    }

    #[tokio::test]
    async fn scraper_tier_maps_post_fields() {
        let scraper = MockPostScraper::new().on_instagram(
            URL,
            json!({
                "shortCode": "Cabc123", "ownerUsername": "cafe.seoul", "likesCount": 270,
                "commentsCount": 2, "caption": "new menu",
                "latestComments": [{"ownerUsername": "kim", "text": "want!", "likesCount": 3}]
            }),
        );
        let strategy = InstagramStrategy::new(Some(Arc::new(scraper)), Arc::new(MockWebClient::new()));
        let candidates = strategy.attempt(&target(), 0, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Integer(270)));
        assert_eq!(value(&candidates, Field::CommentCount), Some(&RawValue::Integer(2)));
        assert_eq!(value(&candidates, Field::Author), Some(&RawValue::Text("cafe.seoul".into())));
        assert!(value(&candidates, Field::CommentList).is_some());
    }

    #[tokio::test]
    async fn scraper_tier_is_skipped_without_scraper() {
        let strategy = InstagramStrategy::new(None, Arc::new(MockWebClient::new()));
        let err = strategy.attempt(&target(), 0, &mut cx()).await.unwrap_err();
        assert!(matches!(err, TierError::Skipped(_)));
    }

    #[tokio::test]
    async fn scraper_error_maps_to_not_found() {
        let scraper = MockPostScraper::new()
            .on_instagram(URL, json!({"error": "not_found", "errorDescription": "Post does not exist"}));
        let strategy = InstagramStrategy::new(Some(Arc::new(scraper)), Arc::new(MockWebClient::new()));
        let err = strategy.attempt(&target(), 0, &mut cx()).await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::NotFound));
    }

    #[tokio::test]
    async fn shared_data_picks_the_requested_post() {
        let page = r#"<script>window._sharedData = {"entry_data":{"PostPage":[{"graphql":{"shortcode_media":{
            "shortcode":"Cabc123","owner":{"username":"cafe.seoul"},
            "edge_media_preview_like":{"count":270},"edge_media_to_parent_comment":{"count":2},
            "display_url":"https://cdn/x.jpg",
            "edge_sidecar_to_children":{"edges":[{"node":{"shortcode":"Zother","edge_media_preview_like":{"count":9170}}}]}
        }}}]}};</script>"#;
        let web = MockWebClient::new().on_get(URL, page);
        let strategy = InstagramStrategy::new(None, Arc::new(web));
        let candidates = strategy.attempt(&target(), 1, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Integer(270)));
        assert_eq!(value(&candidates, Field::CommentCount), Some(&RawValue::Integer(2)));
        assert!(candidates.iter().all(|c| c.corroborated));
    }

    #[tokio::test]
    async fn thumbnail_prefers_largest_resource_within_640px() {
        let page = r#"<script>window._sharedData = {"entry_data":{"PostPage":[{"graphql":{"shortcode_media":{
            "shortcode":"Cabc123","owner":{"username":"cafe.seoul"},"edge_media_preview_like":{"count":270},
            "display_resources":[
                {"src":"https://cdn/320.jpg","config_width":320},
                {"src":"https://cdn/640.jpg","config_width":640},
                {"src":"https://cdn/1080.jpg","config_width":1080}
            ]
        }}}]}};</script>"#;
        let web = MockWebClient::new().on_get(URL, page);
        let strategy = InstagramStrategy::new(None, Arc::new(web));
        let candidates = strategy.attempt(&target(), 1, &mut cx()).await.unwrap();

        assert_eq!(
            value(&candidates, Field::Thumbnail),
            Some(&RawValue::Text("https://cdn/640.jpg".into()))
        );
    }

    #[tokio::test]
    async fn thumbnail_falls_back_to_display_url_when_resources_are_large() {
        let page = r#"<script>window._sharedData = {"entry_data":{"PostPage":[{"graphql":{"shortcode_media":{
            "shortcode":"Cabc123","owner":{"username":"cafe.seoul"},"edge_media_preview_like":{"count":270},
            "display_url":"https://cdn/display.jpg",
            "display_resources":[{"src":"https://cdn/1080.jpg","config_width":1080}]
        }}}]}};</script>"#;
        let web = MockWebClient::new().on_get(URL, page);
        let strategy = InstagramStrategy::new(None, Arc::new(web));
        let candidates = strategy.attempt(&target(), 1, &mut cx()).await.unwrap();

        assert_eq!(
            value(&candidates, Field::Thumbnail),
            Some(&RawValue::Text("https://cdn/display.jpg".into()))
        );
    }

    #[tokio::test]
    async fn login_redirect_is_access_denied() {
        let web = MockWebClient::new().on_redirect(
            URL,
            "https://www.instagram.com/accounts/login/?next=/p/Cabc123/",
            "<html></html>",
        );
        let strategy = InstagramStrategy::new(None, Arc::new(web));
        let err = strategy.attempt(&target(), 1, &mut cx()).await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::AccessDenied));
    }

    #[tokio::test]
    async fn session_meta_reads_open_graph_summary() {
        let html = r#"<html><head>
            <meta property="og:description" content="1,204 likes, 37 comments - cafe.seoul on March 3, 2024: &quot;new menu&quot;.">
            <meta property="og:image" content="https://cdn/thumb.jpg">
        </head></html>"#;
        let strategy = InstagramStrategy::new(None, Arc::new(MockWebClient::new()));
        let mut cx = cx();
        cx.rendered = Some(RenderedPage {
            final_url: URL.into(),
            html: html.into(),
        });
        let candidates = strategy.attempt(&target(), 2, &mut cx).await.unwrap();

        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Count("1,204".into())));
        assert_eq!(value(&candidates, Field::CommentCount), Some(&RawValue::Count("37".into())));
        assert_eq!(value(&candidates, Field::Body), Some(&RawValue::Text("new menu".into())));
        assert!(candidates.iter().all(|c| c.tier == Tier::Rendered));
    }

    #[tokio::test]
    async fn pattern_tier_ignores_comment_like_counts() {
        let page = r#"{"items":[{"code":"Cabc123","user":{"username":"cafe.seoul"},"like_count":270,
            "preview_comments":[{"text":"yum","like_count":9170}],"comment_count":2}]}"#;
        let web = MockWebClient::new().on_get(URL, page);
        let strategy = InstagramStrategy::new(None, Arc::new(web));
        let candidates = strategy.attempt(&target(), 3, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Count("270".into())));
        let likes = candidates.iter().find(|c| c.field == Field::LikeCount).unwrap();
        assert!(likes.corroborated);
        assert_eq!(likes.tier, Tier::Pattern);
    }

    #[tokio::test]
    async fn embed_page_is_parsed_from_dom() {
        let embed = r#"<div class="Header"><span class="UsernameText">cafe.seoul</span></div>
            <img class="EmbeddedMediaImage" src="https://cdn/e.jpg">
            <div class="SocialProof"><a href="/p/Cabc123/">1,204 likes</a></div>
            <div class="Caption"><a class="CaptionUsername">cafe.seoul</a> new menu</div>
            <a class="CaptionComments">View all 37 comments</a>"#;
        let web = MockWebClient::new()
            .on_get("https://www.instagram.com/p/Cabc123/embed/captioned/", embed);
        let strategy = InstagramStrategy::new(None, Arc::new(web));
        let candidates = strategy.attempt(&target(), 4, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::Author), Some(&RawValue::Text("cafe.seoul".into())));
        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Count("1,204".into())));
        assert_eq!(value(&candidates, Field::CommentCount), Some(&RawValue::Count("37".into())));
        assert_eq!(value(&candidates, Field::Body), Some(&RawValue::Text("new menu".into())));
        assert!(candidates.iter().all(|c| c.tier == Tier::Rendered));
    }
}
