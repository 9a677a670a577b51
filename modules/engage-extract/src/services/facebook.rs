// Facebook strategy: hosted post scraper, then three readings of one guarded
// session render (scoped relay JSON, the post's DOM, author-scoped text
// patterns) and, once the platform is escalated, the basic mobile site.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use apify_client::FacebookPost;
use engage_common::{ContentTarget, ExtractionCandidate, FailureReason, Field, Platform, Tier};

use super::{check_page_markers, json_unescape, meta_property, select_text};
use crate::error::TierError;
use crate::router::facebook_author_slug;
use crate::scoping::{mask_comment_spans, near, nearest_capture};
use crate::strategy::{spec_at, Candidates, SourceStrategy, TierContext, TierSpec};
use crate::traits::{PostScraper, WebClient};

const TIERS: [TierSpec; 5] = [
    TierSpec::direct(Tier::Primary, "apify-post"),
    TierSpec::session(Tier::Embedded, "scoped-json"),
    TierSpec::session(Tier::Rendered, "session-dom"),
    TierSpec::session(Tier::Pattern, "author-scoped-regex"),
    TierSpec::fallback(Tier::Rendered, "mbasic"),
];

const ORIGINS: &[&str] = &["https://www.facebook.com"];

const NOT_FOUND: &[&str] = &[
    "This content isn't available",
    "This content isn&#039;t available",
    "Content Unavailable",
    "Sorry, this page isn't available",
];
const LOGIN_WALL: &[&str] = &[r#"id="login_form""#, "<title>Log in to Facebook"];

const JSON_RADIUS: usize = 15_000;
const TEXT_RADIUS: usize = 8_000;
const AUTHOR_RADIUS: usize = 2_000;

static REACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""reaction_count":\{"count":(\d+)|"i18n_reaction_count":"([^"]+)""#).unwrap()
});
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""comment_count":\{"total_count":(\d+)|"total_comment_count":(\d+)|"comments":\{"total_count":(\d+)"#,
    )
    .unwrap()
});
static SHARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""share_count":\{"count":(\d+)|"i18n_share_count":"([^"]+)""#).unwrap()
});
static VIEW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:video_view_count|play_count)":(\d+)"#).unwrap());
static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:owning_profile":|actors":\[)\{[^{}]*?"name":"((?:[^"\\]|\\.)*)""#).unwrap()
});
static THUMBNAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""preferred_thumbnail":\{"image":\{"uri":"((?:[^"\\]|\\.)*)"|"preferred_thumbnail_image":\{"uri":"((?:[^"\\]|\\.)*)""#,
    )
    .unwrap()
});
static MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""message":\{"text":"((?:[^"\\]|\\.)*)""#).unwrap());

static LABEL_REACTIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:like:\s*)?([\d.,]+\s?[KkMm]?)\s+(?:reactions?|people|likes?)\b").unwrap()
});
static TEXT_COMMENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([\d.,]+\s?[KkMm]?)\s+comments?$").unwrap());
static TEXT_SHARES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([\d.,]+\s?[KkMm]?)\s+shares?$").unwrap());
static TEXT_VIEWS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([\d.,]+\s?[KkMm]?)\s+(?:views|plays)$").unwrap());

static PLAIN_REACTIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"All reactions:\s*(?:<[^>]*>\s*)*([\d.,]+\s?[KkMm]?)|"reaction_count":\{"count":(\d+)"#)
        .unwrap()
});
static PLAIN_COMMENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*([\d.,]+\s?[KkMm]?)\s+comments?\s*<").unwrap());
static PLAIN_SHARES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*([\d.,]+\s?[KkMm]?)\s+shares?\s*<").unwrap());

static MBASIC_REACTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.,]+\s?[KkMm]?)$").unwrap());
static MBASIC_COMMENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d.,]+\s?[KkMm]?)\s+comments?").unwrap());

pub struct FacebookStrategy {
    scraper: Option<Arc<dyn PostScraper>>,
    web: Arc<dyn WebClient>,
}

impl FacebookStrategy {
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
        info!(url = target.url(), "facebook: starting scraper run");
        let post = scraper
            .facebook_post(target.url())
            .await?
            .ok_or_else(|| TierError::malformed("scraper returned no item"))?;
        scraped_candidates(target, spec, &post)
    }

    fn scoped_json(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let html = cx.rendered_html()?;
        check_page_markers(html, NOT_FOUND, LOGIN_WALL)?;
        let post_id = target.identifier().unwrap_or_default();
        let masked = mask_comment_spans(html);
        let anchor = find_anchor(&masked, &[post_id])
            .ok_or_else(|| TierError::malformed(format!("post {post_id} not in page data")))?;

        let author = nearest_capture(&AUTHOR_RE, &masked, anchor, JSON_RADIUS)
            .map(|(_, raw)| json_unescape(&raw));
        let author_needle = author
            .as_ref()
            .map(|name| format!("\"name\":\"{}\"", name.replace('"', "\\\"")))
            .unwrap_or_default();

        let mut c = Candidates::new(spec);
        c.corroborated(author.is_some())
            .text(Field::Author, author.as_deref());
        for (field, re) in [
            (Field::LikeCount, &*REACTION_RE),
            (Field::CommentCount, &*COMMENT_RE),
            (Field::ShareCount, &*SHARE_RE),
            (Field::ViewCount, &*VIEW_RE),
        ] {
            if let Some((pos, value)) = nearest_capture(re, &masked, anchor, JSON_RADIUS) {
                c.corroborated(near(&masked, pos, &author_needle, AUTHOR_RADIUS))
                    .count(field, Some(&value));
            }
        }
        let thumbnail = nearest_capture(&THUMBNAIL_RE, &masked, anchor, JSON_RADIUS)
            .map(|(_, raw)| json_unescape(&raw));
        let message = nearest_capture(&MESSAGE_RE, &masked, anchor, JSON_RADIUS)
            .map(|(_, raw)| json_unescape(&raw));
        c.corroborated(author.is_some())
            .text(Field::Thumbnail, thumbnail.as_deref())
            .text(Field::Body, message.as_deref());
        Ok(c.finish())
    }

    fn session_dom(
        &self,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let html = cx.rendered_html()?;
        check_page_markers(html, NOT_FOUND, LOGIN_WALL)?;
        let post = PostDom::parse(html);

        let mut c = Candidates::new(spec);
        c.corroborated(post.author.is_some())
            .text(Field::Author, post.author.as_deref())
            .count(Field::LikeCount, post.reactions.as_deref())
            .count(Field::CommentCount, post.comments.as_deref())
            .count(Field::ShareCount, post.shares.as_deref())
            .count(Field::ViewCount, post.views.as_deref())
            .text(Field::Thumbnail, post.image.as_deref())
            .text(Field::Body, post.message.as_deref());
        Ok(c.finish())
    }

    fn author_scoped_patterns(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let html = cx.rendered_html()?;
        let slug = facebook_author_slug(target.url());
        let post_id = target.identifier().unwrap_or_default();
        let masked = mask_comment_spans(html);
        let anchor = find_anchor(&masked, &[slug.as_deref().unwrap_or_default(), post_id])
            .ok_or_else(|| TierError::malformed("neither author nor post id on page"))?;

        let mut c = Candidates::new(spec);
        c.corroborated(slug.is_some());
        for (field, re) in [
            (Field::LikeCount, &*PLAIN_REACTIONS_RE),
            (Field::CommentCount, &*PLAIN_COMMENTS_RE),
            (Field::ShareCount, &*PLAIN_SHARES_RE),
        ] {
            if let Some((_, value)) = nearest_capture(re, &masked, anchor, TEXT_RADIUS) {
                c.count(field, Some(&value));
            }
        }
        Ok(c.finish())
    }

    async fn mbasic(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let url = mbasic_url(target.url());
        debug!(url = %url, "facebook: fetching basic page");
        let cookie = cx.auth.cookie_header("xs");
        let page = self.web.get(&url, cookie.as_deref()).await?;
        if page.final_url.contains("/login") {
            return Err(TierError::failure(
                FailureReason::AccessDenied,
                "redirected to login",
            ));
        }
        check_page_markers(&page.body, NOT_FOUND, LOGIN_WALL)?;
        let post = BasicDom::parse(&page.body);

        let mut c = Candidates::new(spec);
        c.corroborated(post.author.is_some())
            .text(Field::Author, post.author.as_deref())
            .count(Field::LikeCount, post.reactions.as_deref())
            .count(Field::CommentCount, post.comments.as_deref())
            .text(Field::Body, post.message.as_deref());
        Ok(c.finish())
    }
}

fn scraped_candidates(
    target: &ContentTarget,
    spec: &TierSpec,
    post: &FacebookPost,
) -> Result<Vec<ExtractionCandidate>, TierError> {
    if let Some(error) = &post.error {
        let lowered = error.to_ascii_lowercase();
        let reason = if lowered.contains("not found") || lowered.contains("not available") {
            FailureReason::NotFound
        } else if lowered.contains("login") || lowered.contains("private") {
            FailureReason::AccessDenied
        } else {
            FailureReason::MalformedResponse
        };
        return Err(TierError::failure(reason, error.clone()));
    }
    // Only numeric ids are comparable; pfbid forms are opaque per viewer.
    if let (Some(got), Some(want)) = (post.post_id.as_deref(), target.identifier()) {
        let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if numeric(got) && numeric(want) && got != want {
            return Err(TierError::malformed(format!(
                "scraper returned post {got}, not {want}"
            )));
        }
    }

    let author = post.author();
    let mut c = Candidates::new(spec);
    c.corroborated(author.is_some())
        .text(Field::Author, author)
        .integer(Field::LikeCount, post.likes)
        .integer(Field::CommentCount, post.comments)
        .integer(Field::ShareCount, post.shares)
        .integer(Field::ViewCount, post.views_count)
        .text(
            Field::Thumbnail,
            post.media.iter().find_map(|m| m.thumbnail.as_deref()),
        )
        .text(Field::Body, post.text.as_deref());
    Ok(c.finish())
}

/// Offset of the first non-empty needle found, as a JSON value or bare text.
fn find_anchor(text: &str, needles: &[&str]) -> Option<usize> {
    needles
        .iter()
        .filter(|n| !n.is_empty())
        .find_map(|n| text.find(&format!("\"{n}\"")).or_else(|| text.find(*n)))
}

fn mbasic_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.set_host(Some("mbasic.facebook.com")).is_ok() {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        Err(_) => url.to_string(),
    }
}

/// Whether `el` sits inside a comment article.
fn in_comment(el: &ElementRef<'_>) -> bool {
    el.ancestors().any(|node| {
        node.value().as_element().is_some_and(|e| {
            e.attr("role") == Some("article")
                && e.attr("aria-label").is_some_and(|l| l.starts_with("Comment"))
        })
    })
}

fn collapsed_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Default)]
struct PostDom {
    author: Option<String>,
    reactions: Option<String>,
    comments: Option<String>,
    shares: Option<String>,
    views: Option<String>,
    image: Option<String>,
    message: Option<String>,
}

impl PostDom {
    fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let mut post = Self {
            author: select_text(&doc, "h2 strong")
                .or_else(|| select_text(&doc, "h3 strong"))
                .or_else(|| meta_property(&doc, "og:title")),
            image: meta_property(&doc, "og:image"),
            message: select_text(&doc, r#"[data-ad-preview="message"]"#)
                .or_else(|| select_text(&doc, r#"[data-ad-comet-preview="message"]"#)),
            ..Self::default()
        };

        if let Ok(labelled) = Selector::parse("[aria-label]") {
            for el in doc.select(&labelled).filter(|el| !in_comment(el)) {
                let Some(label) = el.value().attr("aria-label") else {
                    continue;
                };
                if post.reactions.is_none() {
                    post.reactions = LABEL_REACTIONS_RE.captures(label.trim()).map(|c| c[1].to_string());
                }
            }
        }
        if let Ok(spans) = Selector::parse("span") {
            for el in doc.select(&spans).filter(|el| !in_comment(el)) {
                let text = collapsed_text(&el);
                let capture = |re: &Regex| re.captures(&text).map(|c| c[1].to_string());
                post.comments = post.comments.take().or_else(|| capture(&TEXT_COMMENTS_RE));
                post.shares = post.shares.take().or_else(|| capture(&TEXT_SHARES_RE));
                post.views = post.views.take().or_else(|| capture(&TEXT_VIEWS_RE));
            }
        }
        post
    }
}

#[derive(Debug, Default)]
struct BasicDom {
    author: Option<String>,
    reactions: Option<String>,
    comments: Option<String>,
    message: Option<String>,
}

impl BasicDom {
    fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let reactions = select_text(&doc, r#"a[href*="/ufi/reaction/profile/browser/"]"#)
            .and_then(|t| MBASIC_REACTIONS_RE.captures(&t).map(|c| c[1].to_string()));
        let comments = select_text(&doc, r#"a[href*="comment"]"#)
            .and_then(|t| MBASIC_COMMENTS_RE.captures(&t).map(|c| c[1].to_string()));
        Self {
            author: select_text(&doc, "h3 strong a").or_else(|| select_text(&doc, "header h3 a")),
            reactions,
            comments,
            message: select_text(&doc, r#"div[data-ft] p"#),
        }
    }
}

#[async_trait]
impl SourceStrategy for FacebookStrategy {
    fn platform(&self) -> Platform {
        Platform::Social
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
            1 => self.scoped_json(target, spec, cx),
            2 => self.session_dom(spec, cx),
            3 => self.author_scoped_patterns(target, spec, cx),
            _ => self.mbasic(target, spec, cx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPostScraper, MockWebClient};
    use crate::traits::RenderedPage;
    use engage_common::{AuthContext, RawValue};
    use serde_json::json;

    const URL: &str = "https://www.facebook.com/cafeseoul/posts/1234567890";

    fn target() -> ContentTarget {
        ContentTarget::new(Platform::Social, URL).with_identifier("1234567890")
    }

    fn rendered(html: &str) -> TierContext {
        let mut cx = TierContext::new(AuthContext::None, 10);
        cx.rendered = Some(RenderedPage {
            final_url: URL.into(),
            html: html.into(),
        });
        cx
    }

    fn candidate(candidates: &[ExtractionCandidate], field: Field) -> Option<&ExtractionCandidate> {
        candidates.iter().find(|c| c.field == field)
    }

    fn strategy() -> FacebookStrategy {
        FacebookStrategy::new(None, Arc::new(MockWebClient::new()))
    }

    #[tokio::test]
    async fn scraper_tier_maps_counts() {
        let scraper = MockPostScraper::new().on_facebook(
            URL,
            json!({"postId": "1234567890", "pageName": "Cafe Seoul", "likes": 270, "comments": 12, "shares": 3}),
        );
        let strategy = FacebookStrategy::new(Some(Arc::new(scraper)), Arc::new(MockWebClient::new()));
        let candidates = strategy.attempt(&target(), 0, &mut TierContext::default()).await.unwrap();

        assert_eq!(candidate(&candidates, Field::LikeCount).unwrap().value, RawValue::Integer(270));
        assert_eq!(candidate(&candidates, Field::ShareCount).unwrap().value, RawValue::Integer(3));
    }

    #[tokio::test]
    async fn scraper_tier_rejects_other_post() {
        let scraper = MockPostScraper::new()
            .on_facebook(URL, json!({"postId": "999", "pageName": "Cafe Seoul", "likes": 9170}));
        let strategy = FacebookStrategy::new(Some(Arc::new(scraper)), Arc::new(MockWebClient::new()));
        let err = strategy
            .attempt(&target(), 0, &mut TierContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::MalformedResponse));
    }

    #[tokio::test]
    async fn scoped_json_ignores_comment_reactions() {
        let html = r#"<script>{"node":{"post_id":"1234567890","owning_profile":{"__typename":"Page","name":"Cafe Seoul","id":"55"},
            "comet_sections":{"feedback":{"reaction_count":{"count":270},"comment_count":{"total_count":12},
            "share_count":{"count":3},"comments":{"edges":[{"node":{"__typename":"Comment","body":{"text":"wow"},
            "feedback":{"reaction_count":{"count":9170}}}}]}}},"message":{"text":"New menu été"}}}</script>"#;
        let candidates = strategy().attempt(&target(), 1, &mut rendered(html)).await.unwrap();

        let likes = candidate(&candidates, Field::LikeCount).unwrap();
        assert_eq!(likes.value, RawValue::Count("270".into()));
        assert!(likes.corroborated);
        assert_eq!(
            candidate(&candidates, Field::Author).unwrap().value,
            RawValue::Text("Cafe Seoul".into())
        );
        assert_eq!(
            candidate(&candidates, Field::Body).unwrap().value,
            RawValue::Text("New menu été".into())
        );
    }

    #[tokio::test]
    async fn scoped_json_reads_both_thumbnail_shapes() {
        for thumbnail in [
            r#""preferred_thumbnail":{"image":{"uri":"https:\/\/scontent\/x.jpg"}}"#,
            r#""preferred_thumbnail_image":{"uri":"https:\/\/scontent\/x.jpg"}"#,
        ] {
            let html = format!(
                r#"<script>{{"post_id":"1234567890","owning_profile":{{"name":"Cafe Seoul"}},
                "reaction_count":{{"count":270}},{thumbnail}}}</script>"#
            );
            let candidates = strategy().attempt(&target(), 1, &mut rendered(&html)).await.unwrap();

            assert_eq!(
                candidate(&candidates, Field::Thumbnail).map(|c| &c.value),
                Some(&RawValue::Text("https://scontent/x.jpg".into())),
                "{thumbnail}"
            );
        }
    }

    #[tokio::test]
    async fn session_dom_skips_comment_articles() {
        let html = r#"<div role="article">
            <h2><strong>Cafe Seoul</strong></h2>
            <div data-ad-preview="message">New menu</div>
            <span aria-label="Like: 270 people"></span>
            <span>12 comments</span><span>3 shares</span>
            <div role="article" aria-label="Comment by Kim">
                <span aria-label="9,170 reactions"></span><span>40 comments</span>
            </div>
        </div>"#;
        let candidates = strategy().attempt(&target(), 2, &mut rendered(html)).await.unwrap();

        assert_eq!(candidate(&candidates, Field::LikeCount).unwrap().value, RawValue::Count("270".into()));
        assert_eq!(candidate(&candidates, Field::CommentCount).unwrap().value, RawValue::Count("12".into()));
        assert_eq!(candidate(&candidates, Field::ShareCount).unwrap().value, RawValue::Count("3".into()));
        assert!(candidates.iter().all(|c| c.tier == Tier::Rendered));
    }

    #[tokio::test]
    async fn unavailable_content_is_not_found() {
        let err = strategy()
            .attempt(&target(), 1, &mut rendered("<span>This content isn't available right now</span>"))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::NotFound));
    }

    #[tokio::test]
    async fn session_tiers_skip_without_render() {
        let err = strategy()
            .attempt(&target(), 3, &mut TierContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Skipped(_)));
    }

    #[tokio::test]
    async fn mbasic_fallback_reads_basic_dom() {
        let page = r#"<header><h3><strong><a href="/cafeseoul">Cafe Seoul</a></strong></h3></header>
            <div data-ft="{}"><p>New menu</p></div>
            <a href="/ufi/reaction/profile/browser/?ft_ent_identifier=1234567890">270</a>
            <a href="/story.php?comment">12 Comments</a>"#;
        let web = MockWebClient::new()
            .on_get("https://mbasic.facebook.com/cafeseoul/posts/1234567890", page);
        let strategy = FacebookStrategy::new(None, Arc::new(web));
        let candidates = strategy
            .attempt(&target(), 4, &mut TierContext::default())
            .await
            .unwrap();

        assert_eq!(candidate(&candidates, Field::Author).unwrap().value, RawValue::Text("Cafe Seoul".into()));
        assert_eq!(candidate(&candidates, Field::LikeCount).unwrap().value, RawValue::Count("270".into()));
        assert_eq!(candidate(&candidates, Field::CommentCount).unwrap().value, RawValue::Count("12".into()));
    }
}
