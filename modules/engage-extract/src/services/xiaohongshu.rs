// Xiaohongshu strategy: the note page's __INITIAL_STATE__, the session-rendered
// engage bar, then interact-count patterns. Notes carry no public view count.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::info;

use engage_common::{
    ContentTarget, ExtractionCandidate, FailureReason, Field, Platform, RawComment, RawValue, Tier,
};

use super::{check_page_markers, join_body, json_unescape, meta_property};
use crate::error::{FetchError, TierError};
use crate::scoping::{json_object_after, mask_comment_spans, nearest_capture};
use crate::strategy::{
    find_object, json_at, json_count, json_str, spec_at, Candidates, SourceStrategy, TierContext,
    TierSpec,
};
use crate::traits::{WebClient, WebResponse};

const TIERS: [TierSpec; 3] = [
    TierSpec::direct(Tier::Embedded, "initial-state"),
    TierSpec::session(Tier::Rendered, "session-dom"),
    TierSpec::direct(Tier::Pattern, "interact-regex"),
];

const ORIGINS: &[&str] = &[
    "https://www.xiaohongshu.com",
    "https://edith.xiaohongshu.com",
];

/// Session cookie set by the QR login.
pub const SESSION_COOKIE: &str = "web_session";

const NOT_FOUND: &[&str] = &["当前笔记暂时无法浏览", "笔记不存在", "你访问的页面不见了"];
const LOGIN_WALL: &[&str] = &["登录后查看", "website-login/captcha"];

/// Button labels the engage bar shows in place of a zero count.
const ZERO_LABELS: &[&str] = &["赞", "点赞", "评论", "分享", "收藏"];

const PATTERN_RADIUS: usize = 5000;
const AUTHOR_RADIUS: usize = 2000;

static UNDEFINED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([:\[,])\s*undefined\b").unwrap());
static LIKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""likedCount"\s*:\s*"?([\d.,]+[万wWkK]?)"?"#).unwrap());
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""commentCount"\s*:\s*"?([\d.,]+[万wWkK]?)"?"#).unwrap());
static SHARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""shareCount"\s*:\s*"?([\d.,]+[万wWkK]?)"?"#).unwrap());
static NICKNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""nickname"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

pub struct XiaohongshuStrategy {
    web: Arc<dyn WebClient>,
}

impl XiaohongshuStrategy {
    pub fn new(web: Arc<dyn WebClient>) -> Self {
        Self { web }
    }

    async fn initial_state(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let page = self.note_page(target, cx).await?;
        if page.final_url.contains("/login") || page.final_url.contains("website-login") {
            return Err(TierError::failure(
                FailureReason::AccessDenied,
                "redirected to login",
            ));
        }
        check_page_markers(&page.body, NOT_FOUND, LOGIN_WALL)?;

        let note_id = target.identifier().unwrap_or_default();
        let state = parse_initial_state(&page.body)
            .ok_or_else(|| TierError::malformed("no __INITIAL_STATE__"))??;
        let note = json_at(&state, &["note", "noteDetailMap", note_id, "note"])
            .filter(|n| n.is_object() && !n.as_object().is_some_and(|m| m.is_empty()))
            .or_else(|| {
                find_object(&state, &|m| {
                    m.get("noteId").and_then(Value::as_str) == Some(note_id)
                        && m.contains_key("interactInfo")
                })
            })
            .ok_or_else(|| TierError::malformed(format!("note {note_id} not in state")))?;

        let image = ["urlDefault", "url"]
            .iter()
            .find_map(|key| json_str(note, &["imageList", "0", *key]));
        let mut c = Candidates::new(spec);
        c.corroborated(true)
            .text(Field::Author, json_str(note, &["user", "nickname"]))
            .push(Field::LikeCount, json_count(note, &["interactInfo", "likedCount"]))
            .push(Field::CommentCount, json_count(note, &["interactInfo", "commentCount"]))
            .push(Field::ShareCount, json_count(note, &["interactInfo", "shareCount"]))
            .text(Field::Thumbnail, image)
            .push(
                Field::Body,
                join_body(json_str(note, &["title"]), json_str(note, &["desc"])).map(RawValue::Text),
            );
        Ok(c.finish())
    }

    fn session_dom(
        &self,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let html = cx.rendered_html()?;
        check_page_markers(html, NOT_FOUND, LOGIN_WALL)?;
        let note = NoteDom::parse(html, cx.max_comments);

        let mut c = Candidates::new(spec);
        c.corroborated(note.author.is_some())
            .text(Field::Author, note.author.as_deref())
            .count(Field::LikeCount, note.likes.as_deref())
            .count(Field::CommentCount, note.comments.as_deref())
            .count(Field::ShareCount, note.shares.as_deref())
            .text(Field::Thumbnail, note.image.as_deref())
            .push(
                Field::Body,
                join_body(note.title.as_deref(), note.desc.as_deref()).map(RawValue::Text),
            );
        if !note.comment_list.is_empty() {
            c.comments(Some(note.comment_list));
        }
        Ok(c.finish())
    }

    async fn interact_patterns(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let cached = cx.any_html().map(str::to_string);
        let html = match cached {
            Some(html) => html,
            None => self.note_page(target, cx).await?.body,
        };
        check_page_markers(&html, NOT_FOUND, LOGIN_WALL)?;
        let note_id = target.identifier().unwrap_or_default();
        let masked = mask_comment_spans(&html);
        let anchor = masked
            .find(&format!("\"{note_id}\""))
            .ok_or_else(|| TierError::malformed(format!("note {note_id} not on page")))?;

        let author = nearest_capture(&NICKNAME_RE, &masked, anchor, PATTERN_RADIUS)
            .map(|(pos, raw)| (pos, json_unescape(&raw)));
        let mut c = Candidates::new(spec);
        c.corroborated(author.is_some())
            .text(Field::Author, author.as_ref().map(|(_, name)| name.as_str()));
        let author_pos = author.as_ref().map(|(pos, _)| *pos);

        for (field, re) in [
            (Field::LikeCount, &*LIKED_RE),
            (Field::CommentCount, &*COMMENT_RE),
            (Field::ShareCount, &*SHARE_RE),
        ] {
            if let Some((pos, value)) = nearest_capture(re, &masked, anchor, PATTERN_RADIUS) {
                let corroborated = author_pos.is_some_and(|at| pos.abs_diff(at) <= AUTHOR_RADIUS);
                c.corroborated(corroborated).count(field, Some(&value));
            }
        }
        Ok(c.finish())
    }

    async fn note_page(
        &self,
        target: &ContentTarget,
        cx: &mut TierContext,
    ) -> Result<WebResponse, TierError> {
        if let Some(page) = &cx.fetched {
            return Ok(page.clone());
        }
        info!(url = target.url(), "xiaohongshu: fetching note page");
        let cookie = cx.auth.cookie_header(SESSION_COOKIE);
        let page = self.web.get(target.url(), cookie.as_deref()).await?;
        cx.fetched = Some(page.clone());
        Ok(page)
    }
}

/// The page's `__INITIAL_STATE__`, with JavaScript `undefined` turned into `null`.
fn parse_initial_state(html: &str) -> Option<Result<Value, TierError>> {
    let blob = json_object_after(html, "window.__INITIAL_STATE__=")
        .or_else(|| json_object_after(html, "window.__INITIAL_STATE__ ="))?;
    let cleaned = UNDEFINED_RE.replace_all(blob, "${1}null");
    Some(serde_json::from_str(&cleaned).map_err(|e| TierError::Fetch(FetchError::from(e))))
}

/// Count text from the engage bar; bare button labels mean zero.
fn engage_count(text: Option<String>) -> Option<String> {
    text.map(|t| {
        if ZERO_LABELS.contains(&t.as_str()) {
            "0".to_string()
        } else {
            t
        }
    })
}

fn in_comment(el: &ElementRef<'_>) -> bool {
    el.ancestors().any(|node| {
        node.value().as_element().is_some_and(|e| {
            e.classes()
                .any(|c| c == "comments-container" || c == "comment-item" || c == "parent-comment")
        })
    })
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First non-empty text for `selector` outside the comment section.
fn note_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .filter(|el| !in_comment(el))
        .map(text_of)
        .find(|t| !t.is_empty())
}

#[derive(Debug, Default)]
struct NoteDom {
    author: Option<String>,
    likes: Option<String>,
    comments: Option<String>,
    shares: Option<String>,
    title: Option<String>,
    desc: Option<String>,
    image: Option<String>,
    comment_list: Vec<RawComment>,
}

impl NoteDom {
    fn parse(html: &str, max_comments: usize) -> Self {
        let doc = Html::parse_document(html);
        Self {
            author: note_text(&doc, ".author-wrapper .username")
                .or_else(|| note_text(&doc, ".author .name")),
            likes: engage_count(note_text(&doc, ".interact-container .like-wrapper .count")
                .or_else(|| note_text(&doc, ".like-wrapper .count"))),
            comments: engage_count(note_text(&doc, ".interact-container .chat-wrapper .count")
                .or_else(|| note_text(&doc, ".chat-wrapper .count"))),
            shares: engage_count(note_text(&doc, ".interact-container .share-wrapper .count")),
            title: note_text(&doc, "#detail-title"),
            desc: note_text(&doc, "#detail-desc"),
            image: meta_property(&doc, "og:image"),
            comment_list: parse_comments(&doc, max_comments),
        }
    }
}

fn parse_comments(doc: &Html, max: usize) -> Vec<RawComment> {
    let (Ok(item), Ok(name), Ok(text), Ok(likes)) = (
        Selector::parse(".parent-comment > .comment-item"),
        Selector::parse(".author .name"),
        Selector::parse(".note-text"),
        Selector::parse(".like .count"),
    ) else {
        return Vec::new();
    };
    doc.select(&item)
        .filter_map(|comment| {
            let first = |sel: &Selector| comment.select(sel).next().map(text_of);
            Some(RawComment {
                author: first(&name).unwrap_or_default(),
                text: first(&text).filter(|t| !t.is_empty())?,
                likes: engage_count(first(&likes)).map(RawValue::Count),
            })
        })
        .take(max)
        .collect()
}

#[async_trait]
impl SourceStrategy for XiaohongshuStrategy {
    fn platform(&self) -> Platform {
        Platform::Note
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
            0 => self.initial_state(target, spec, cx).await,
            1 => self.session_dom(spec, cx),
            _ => self.interact_patterns(target, spec, cx).await,
        }
    }
}
