// YouTube strategy: yt-dlp metadata, then the watch page's embedded player
// response, then free-text patterns over the same page.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use engage_common::{
    ContentTarget, ExtractionCandidate, FailureReason, Field, Platform, RawComment, RawValue, Tier,
};

use super::join_body;
use crate::error::{FetchError, TierError};
use crate::scoping::json_object_after;
use crate::strategy::{
    json_at, json_count, json_str, spec_at, Candidates, SourceStrategy, TierContext, TierSpec,
};
use crate::traits::{MetadataTool, WebClient};

const TIERS: [TierSpec; 3] = [
    TierSpec::direct(Tier::Primary, "yt-dlp"),
    TierSpec::direct(Tier::Embedded, "player-response"),
    TierSpec::direct(Tier::Pattern, "watch-page-regex"),
];

/// Share of the tier's remaining time the comment download may use.
const COMMENT_BUDGET_SHARE: f64 = 0.8;

static VIEW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""viewCount":"(\d+)""#).unwrap());
static LIKE_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"along with ([\d,]+) other (?:people|person)").unwrap());
static COMMENT_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""commentCount":\{"simpleText":"([^"]+)"\}"#).unwrap()
});
static OWNER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""ownerChannelName":"((?:[^"\\]|\\.)*)""#).unwrap());

/// yt-dlp stderr fragments and what they say about the video.
const TOOL_MARKERS: &[(&str, FailureReason)] = &[
    ("Private video", FailureReason::AccessDenied),
    ("members-only", FailureReason::AccessDenied),
    ("confirm your age", FailureReason::AccessDenied),
    ("Video unavailable", FailureReason::NotFound),
    ("This video has been removed", FailureReason::NotFound),
    ("does not exist", FailureReason::NotFound),
    ("Sign in to confirm you", FailureReason::Blocked),
    ("HTTP Error 429", FailureReason::RateLimited),
];

pub struct YoutubeStrategy {
    tool: Arc<dyn MetadataTool>,
    web: Arc<dyn WebClient>,
}

impl YoutubeStrategy {
    pub fn new(tool: Arc<dyn MetadataTool>, web: Arc<dyn WebClient>) -> Self {
        Self { tool, web }
    }

    async fn metadata(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        info!(url = target.url(), "youtube: fetching metadata");
        let meta = self
            .tool
            .video_metadata(target.url())
            .await
            .map_err(classify_tool_error)?;

        let author = json_str(&meta, &["uploader"]).or_else(|| json_str(&meta, &["channel"]));
        let mut c = Candidates::new(spec);
        c.corroborated(author.is_some())
            .text(Field::Author, author)
            .push(Field::LikeCount, json_count(&meta, &["like_count"]))
            // The basic call reports the full count; the comment download below is capped.
            .push(Field::CommentCount, json_count(&meta, &["comment_count"]))
            .push(Field::ViewCount, json_count(&meta, &["view_count"]))
            .text(Field::Thumbnail, json_str(&meta, &["thumbnail"]))
            .push(
                Field::Body,
                join_body(json_str(&meta, &["title"]), json_str(&meta, &["description"]))
                    .map(RawValue::Text),
            );

        match self.comments(target, cx).await {
            Ok(items) => {
                c.comments(Some(
                    items
                        .iter()
                        .filter(|i| json_str(i, &["parent"]).map_or(true, |p| p == "root"))
                        .map(|i| RawComment {
                            author: json_str(i, &["author"]).unwrap_or_default().to_string(),
                            text: json_str(i, &["text"]).unwrap_or_default().to_string(),
                            likes: json_count(i, &["like_count"]),
                        })
                        .collect(),
                ));
            }
            Err(e) => debug!(url = target.url(), error = %e, "youtube: comment download failed"),
        }

        Ok(c.finish())
    }

    /// The comment download, capped so the metadata already in hand survives
    /// a slow download.
    async fn comments(
        &self,
        target: &ContentTarget,
        cx: &TierContext,
    ) -> Result<Vec<Value>, FetchError> {
        let download = self.tool.video_comments(target.url(), cx.max_comments);
        let Some(left) = cx.remaining() else {
            return download.await;
        };
        let budget = left.mul_f64(COMMENT_BUDGET_SHARE);
        tokio::time::timeout(budget, download)
            .await
            .map_err(|_| FetchError::Timeout(budget))?
    }

    async fn player_response(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let html = self.watch_page(target, cx).await?;
        let blob = json_object_after(&html, "ytInitialPlayerResponse = ")
            .or_else(|| json_object_after(&html, "ytInitialPlayerResponse="))
            .ok_or_else(|| TierError::malformed("no ytInitialPlayerResponse"))?;
        let player: Value = serde_json::from_str(blob).map_err(FetchError::from)?;

        match json_str(&player, &["playabilityStatus", "status"]) {
            Some("ERROR") => {
                return Err(TierError::failure(FailureReason::NotFound, "video unavailable"))
            }
            Some("LOGIN_REQUIRED") | Some("UNPLAYABLE") => {
                return Err(TierError::failure(
                    FailureReason::AccessDenied,
                    "video requires sign-in",
                ))
            }
            _ => {}
        }

        let video_id = json_str(&player, &["videoDetails", "videoId"]);
        if video_id.is_some() && video_id != target.identifier() {
            return Err(TierError::malformed(format!(
                "player response is for {video_id:?}, not {:?}",
                target.identifier()
            )));
        }

        let details = json_at(&player, &["videoDetails"]).cloned().unwrap_or(Value::Null);
        let thumbnail = details["thumbnail"]["thumbnails"]
            .as_array()
            .and_then(|t| t.last())
            .and_then(|t| t["url"].as_str());

        let mut c = Candidates::new(spec);
        c.corroborated(true)
            .text(Field::Author, json_str(&details, &["author"]))
            .push(Field::ViewCount, json_count(&details, &["viewCount"]))
            .text(Field::Thumbnail, thumbnail)
            .push(
                Field::Body,
                join_body(
                    json_str(&details, &["title"]),
                    json_str(&details, &["shortDescription"]),
                )
                .map(RawValue::Text),
            );
        Ok(c.finish())
    }

    async fn page_patterns(
        &self,
        target: &ContentTarget,
        spec: &TierSpec,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let html = self.watch_page(target, cx).await?;
        let first = |re: &Regex| re.captures(&html).map(|c| c[1].to_string());

        let mut c = Candidates::new(spec);
        c.text(Field::Author, first(&OWNER_RE).as_deref())
            .count(Field::ViewCount, first(&VIEW_RE).as_deref())
            .count(Field::LikeCount, first(&LIKE_LABEL_RE).as_deref())
            .count(Field::CommentCount, first(&COMMENT_COUNT_RE).as_deref());
        Ok(c.finish())
    }

    async fn watch_page(
        &self,
        target: &ContentTarget,
        cx: &mut TierContext,
    ) -> Result<String, TierError> {
        if let Some(page) = &cx.fetched {
            return Ok(page.body.clone());
        }
        let cookie = cx.auth.cookie_header("SID");
        let page = self.web.get(target.url(), cookie.as_deref()).await?;
        let body = page.body.clone();
        cx.fetched = Some(page);
        Ok(body)
    }
}

fn classify_tool_error(err: FetchError) -> TierError {
    if let FetchError::Tool { stderr, .. } = &err {
        if let Some((marker, reason)) = TOOL_MARKERS.iter().find(|(m, _)| stderr.contains(m)) {
            return TierError::failure(*reason, format!("yt-dlp: {marker}"));
        }
    }
    TierError::Fetch(err)
}

#[async_trait]
impl SourceStrategy for YoutubeStrategy {
    fn platform(&self) -> Platform {
        Platform::Video
    }

    fn tiers(&self) -> &[TierSpec] {
        &TIERS
    }

    async fn attempt(
        &self,
        target: &ContentTarget,
        tier_index: usize,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError> {
        let spec = spec_at(&TIERS, tier_index)?;
        match tier_index {
            0 => self.metadata(target, spec, cx).await,
            1 => self.player_response(target, spec, cx).await,
            _ => self.page_patterns(target, spec, cx).await,
        }
    }
}
