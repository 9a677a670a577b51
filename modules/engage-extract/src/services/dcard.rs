// Dcard strategy: the public post API, the post page's __NEXT_DATA__ (fetched,
// then rendered when a challenge page blocks plain fetches) and count patterns.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info};

use engage_common::{
    ContentTarget, ExtractionCandidate, FailureReason, Field, Platform, RawComment, RawValue, Tier,
};

use super::join_body;
use crate::error::{FetchError, TierError};
use crate::scoping::{json_object_at, mask_comment_spans, nearest_capture};
use crate::strategy::{
    find_object, json_count, json_str, spec_at, Candidates, SourceStrategy, TierContext, TierSpec,
};
use crate::traits::{WebClient, WebResponse};

const API_BASE: &str = "https://www.dcard.tw/service/api/v2/posts";

const TIERS: [TierSpec; 4] = [
    TierSpec::direct(Tier::Primary, "api-v2"),
    TierSpec::direct(Tier::Embedded, "next-data"),
    TierSpec::session(Tier::Rendered, "session-next-data"),
    TierSpec::direct(Tier::Pattern, "count-regex"),
];

const ORIGINS: &[&str] = &["https://www.dcard.tw"];

/// Markers of the edge challenge page served instead of content.
const CHALLENGE: &[&str] = &["Just a moment...", "cf-chl", "challenge-platform"];
const ANONYMOUS: &str = "Anonymous";
const PATTERN_RADIUS: usize = 3000;

static LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""likeCount"\s*:\s*(\d+)"#).unwrap());
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""commentCount"\s*:\s*(\d+)"#).unwrap());
static SCHOOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""school"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

pub struct DcardStrategy {
    web: Arc<dyn WebClient>,
}

impl DcardStrategy {
    pub fn new(web: Arc<dyn WebClient>) -> Self {
        Self { web }
    }

    async fn api(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let post_id = target.identifier().unwrap_or_default();
        let url = format!("{API_BASE}/{post_id}");
        info!(url = %url, "dcard: calling post api");
        let response = self.web.get(&url, None).await?;
        check_challenge(&response.body)?;
        let post: Value = serde_json::from_str(&response.body).map_err(FetchError::from)?;
        if post.get("id").and_then(Value::as_u64).map(|id| id.to_string()).as_deref()
            != Some(post_id)
        {
            return Err(TierError::malformed(format!("api returned a post other than {post_id}")));
        }

        let mut c = post_candidates(spec, &post);
        c.comments(self.comments(post_id, cx.max_comments).await);
        Ok(c.finish())
    }

    /// Top-level comments for the post. Failures only cost the comment list.
    async fn comments(&self, post_id: &str, max: usize) -> Option<Vec<RawComment>> {
        let url = format!("{API_BASE}/{post_id}/comments?limit={}", max.max(1));
        let response = match self.web.get(&url, None).await {
            Ok(response) => response,
            Err(e) => {
                debug!(post_id, error = %e, "dcard: comment api failed");
                return None;
            }
        };
        let items: Vec<Value> = serde_json::from_str(&response.body).ok()?;
        let comments: Vec<RawComment> = items
            .iter()
            .filter(|c| !c.get("hidden").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|c| {
                let text = json_str(c, &["content"])?.to_string();
                Some(RawComment {
                    author: json_str(c, &["school"]).unwrap_or(ANONYMOUS).to_string(),
                    text,
                    likes: json_count(c, &["likeCount"]),
                })
            })
            .collect();
        (!comments.is_empty()).then_some(comments)
    }

    async fn next_data(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let page = self.post_page(target, cx).await?;
        candidates_from_page(target, spec, &page.body)
    }

    fn rendered_next_data(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        candidates_from_page(target, spec, cx.rendered_html()?)
    }

    async fn count_patterns(
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
        check_challenge(&html)?;
        let post_id = target.identifier().unwrap_or_default();
        let masked = mask_comment_spans(&html);
        let anchor = id_anchor(&masked, post_id)
            .ok_or_else(|| TierError::malformed(format!("post {post_id} not on page")))?;

        // Prefer the object that carries the id; fall back to a window around it.
        let scope = masked[..anchor]
            .rfind('{')
            .and_then(|start| json_object_at(&masked, start).map(|obj| (start, obj)))
            .filter(|(start, obj)| start + obj.len() > anchor)
            .map(|(_, obj)| obj);
        let capture = |re: &Regex| match scope {
            Some(obj) => re.captures(obj).map(|c| c[1].to_string()),
            None => nearest_capture(re, &masked, anchor, PATTERN_RADIUS).map(|(_, v)| v),
        };

        let mut c = Candidates::new(spec);
        c.corroborated(scope.is_some())
            .text(Field::Author, capture(&SCHOOL_RE).as_deref())
            .count(Field::LikeCount, capture(&LIKE_RE).as_deref())
            .count(Field::CommentCount, capture(&COMMENT_RE).as_deref());
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
        let page = self.web.get(target.url(), None).await?;
        cx.fetched = Some(page.clone());
        Ok(page)
    }
}

/// Offset of `"id":<post_id>` not followed by another digit.
fn id_anchor(text: &str, post_id: &str) -> Option<usize> {
    if post_id.is_empty() || !post_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let needle = format!("\"id\":{post_id}");
    text.match_indices(&needle)
        .map(|(at, _)| at)
        .find(|at| {
            !text
                .as_bytes()
                .get(at + needle.len())
                .is_some_and(u8::is_ascii_digit)
        })
}

fn check_challenge(body: &str) -> Result<(), TierError> {
    match CHALLENGE.iter().find(|m| body.contains(**m)) {
        Some(marker) => Err(TierError::failure(
            FailureReason::Blocked,
            format!("challenge page ({marker:?})"),
        )),
        None => Ok(()),
    }
}

/// Post fields shared by the api payload and the embedded page data.
fn post_candidates(spec: &TierSpec, post: &Value) -> Candidates {
    let author = json_str(post, &["member", "nickname"])
        .or_else(|| json_str(post, &["school"]))
        .unwrap_or(ANONYMOUS);
    let content = json_str(post, &["content"])
        .filter(|s| !s.trim().is_empty())
        .or_else(|| json_str(post, &["excerpt"]));
    let thumbnail = ["media", "mediaMeta"].iter().find_map(|key| {
        json_str(post, &[*key, "0", "url"]).or_else(|| json_str(post, &[*key, "0", "thumbnail"]))
    });

    let mut c = Candidates::new(spec);
    c.corroborated(true)
        .text(Field::Author, Some(author))
        .push(Field::LikeCount, json_count(post, &["likeCount"]))
        .push(Field::CommentCount, json_count(post, &["commentCount"]))
        .push(Field::ShareCount, json_count(post, &["shareCount"]))
        .push(Field::ViewCount, json_count(post, &["viewCount"]))
        .text(Field::Thumbnail, thumbnail)
        .push(
            Field::Body,
            join_body(json_str(post, &["title"]), content).map(RawValue::Text),
        );
    c
}

fn candidates_from_page(
    target: &ContentTarget,
    spec: &TierSpec,
    html: &str,
) -> Result<Vec<ExtractionCandidate>, TierError> {
    check_challenge(html)?;
    let post_id: u64 = target
        .identifier()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| TierError::malformed("target has no numeric post id"))?;

    let blob = next_data_blob(html).ok_or_else(|| TierError::malformed("no __NEXT_DATA__"))?;
    let data: Value = serde_json::from_str(&blob).map_err(FetchError::from)?;
    let post = find_object(&data, &|m| {
        m.get("id").and_then(Value::as_u64) == Some(post_id) && m.contains_key("likeCount")
    })
    .ok_or_else(|| TierError::malformed(format!("post {post_id} not in __NEXT_DATA__")))?;
    Ok(post_candidates(spec, post).finish())
}

fn next_data_blob(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
}

#[async_trait]
impl SourceStrategy for DcardStrategy {
    fn platform(&self) -> Platform {
        Platform::Forum
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
            0 => self.api(target, spec, cx).await,
            1 => self.next_data(target, spec, cx).await,
            2 => self.rendered_next_data(target, spec, cx),
            _ => self.count_patterns(target, spec, cx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWebClient;
    use engage_common::AuthContext;

    const URL: &str = "https://www.dcard.tw/f/food/p/255000001";
    const API: &str = "https://www.dcard.tw/service/api/v2/posts/255000001";

    fn target() -> ContentTarget {
        ContentTarget::new(Platform::Forum, URL).with_identifier("255000001")
    }

    fn cx() -> TierContext {
        TierContext::new(AuthContext::None, 10)
    }

    fn value(candidates: &[ExtractionCandidate], field: Field) -> Option<&RawValue> {
        candidates.iter().find(|c| c.field == field).map(|c| &c.value)
    }

    #[tokio::test]
    async fn api_tier_reads_post_and_comments() {
        let web = MockWebClient::new()
            .on_get(
                API,
                r#"{"id":255000001,"title":"Best noodles","content":"Try this","school":"NTU",
                    "likeCount":1520,"commentCount":0,"media":[{"url":"https://megapx/1.jpg"}]}"#,
            )
            .on_get(
                &format!("{API}/comments?limit=10"),
                r#"[{"school":"NCCU","content":"agree","likeCount":4},{"hidden":true,"content":"x"}]"#,
            );
        let strategy = DcardStrategy::new(Arc::new(web));
        let candidates = strategy.attempt(&target(), 0, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::Author), Some(&RawValue::Text("NTU".into())));
        assert_eq!(value(&candidates, Field::CommentCount), Some(&RawValue::Integer(0)));
        assert_eq!(
            value(&candidates, Field::Body),
            Some(&RawValue::Text("Best noodles\n\nTry this".into()))
        );
        match value(&candidates, Field::CommentList) {
            Some(RawValue::Comments(list)) => assert_eq!(list.len(), 1),
            other => panic!("unexpected comment list {other:?}"),
        }
    }

    #[tokio::test]
    async fn api_404_is_not_found() {
        let web = MockWebClient::new().on_status(API, 404);
        let strategy = DcardStrategy::new(Arc::new(web));
        let err = strategy.attempt(&target(), 0, &mut cx()).await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::NotFound));
    }

    #[tokio::test]
    async fn challenge_page_is_blocked() {
        let web = MockWebClient::new()
            .on_get(API, "<html><title>Just a moment...</title></html>");
        let strategy = DcardStrategy::new(Arc::new(web));
        let err = strategy.attempt(&target(), 0, &mut cx()).await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::Blocked));
    }

    #[tokio::test]
    async fn next_data_matches_post_id() {
        let page = r#"<html><body><script id="__NEXT_DATA__" type="application/json">
            {"props":{"pageProps":{"related":[{"id":1,"likeCount":9170}],
            "post":{"id":255000001,"likeCount":270,"commentCount":3,"title":"t"}}}}
            </script></body></html>"#;
        let web = MockWebClient::new().on_get(URL, page);
        let strategy = DcardStrategy::new(Arc::new(web));
        let candidates = strategy.attempt(&target(), 1, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Integer(270)));
        assert_eq!(value(&candidates, Field::Author), Some(&RawValue::Text("Anonymous".into())));
    }

    #[tokio::test]
    async fn pattern_tier_ignores_longer_ids_sharing_the_prefix() {
        let page = r#"{"id":2550000012,"school":"NCCU","likeCount":9170} {"id":255000001,"school":"NTU","likeCount":270}"#;
        let web = MockWebClient::new().on_get(URL, page);
        let strategy = DcardStrategy::new(Arc::new(web));
        let candidates = strategy.attempt(&target(), 3, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Count("270".into())));
        assert_eq!(value(&candidates, Field::Author), Some(&RawValue::Text("NTU".into())));
    }

    #[test]
    fn id_anchor_requires_a_whole_id() {
        assert_eq!(id_anchor(r#"{"id":12345}"#, "1234"), None);
        assert_eq!(id_anchor(r#"{"id":12345} {"id":1234,"#, "1234"), Some(14));
        assert_eq!(id_anchor(r#"{"id":1234}"#, ""), None);
    }

    #[tokio::test]
    async fn pattern_tier_anchors_on_post_id() {
        let page = r#"{"id":1,"likeCount":9170} ... {"id":255000001,"school":"NTU","likeCount":270,"commentCount":3}"#;
        let web = MockWebClient::new().on_get(URL, page);
        let strategy = DcardStrategy::new(Arc::new(web));
        let candidates = strategy.attempt(&target(), 3, &mut cx()).await.unwrap();

        assert_eq!(value(&candidates, Field::LikeCount), Some(&RawValue::Count("270".into())));
        assert_eq!(value(&candidates, Field::Author), Some(&RawValue::Text("NTU".into())));
    }
}
