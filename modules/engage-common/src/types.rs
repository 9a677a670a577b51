use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TargetError;

// --- Platforms ---

/// The five supported content platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// YouTube.
    Video,
    /// Instagram.
    Photo,
    /// Facebook.
    Social,
    /// Dcard.
    Forum,
    /// Xiaohongshu.
    Note,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Video,
        Platform::Photo,
        Platform::Social,
        Platform::Forum,
        Platform::Note,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Video => "video",
            Platform::Photo => "photo",
            Platform::Social => "social",
            Platform::Forum => "forum",
            Platform::Note => "note",
        }
    }

    pub fn site_name(&self) -> &'static str {
        match self {
            Platform::Video => "YouTube",
            Platform::Photo => "Instagram",
            Platform::Social => "Facebook",
            Platform::Forum => "Dcard",
            Platform::Note => "Xiaohongshu",
        }
    }

    /// Detect the platform from a URL host. Subdomains (`m.`, `www.`, `mbasic.`) are accepted.
    pub fn detect(url: &str) -> Option<Platform> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

        if matches("youtube.com") || matches("youtu.be") {
            Some(Platform::Video)
        } else if matches("instagram.com") || matches("instagr.am") {
            Some(Platform::Photo)
        } else if matches("facebook.com") || matches("fb.com") || matches("fb.watch") {
            Some(Platform::Social)
        } else if matches("dcard.tw") {
            Some(Platform::Forum)
        } else if matches("xiaohongshu.com") || matches("xhslink.com") {
            Some(Platform::Note)
        } else {
            None
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Targets ---

/// Identity of one item to extract. Immutable once created: canonicalization
/// produces a new target rather than editing this one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentTarget {
    platform: Platform,
    url: String,
    identifier: Option<String>,
}

impl ContentTarget {
    pub fn new(platform: Platform, url: impl Into<String>) -> Self {
        Self {
            platform,
            url: url.into(),
            identifier: None,
        }
    }

    /// Build a target from a bare URL, detecting its platform from the host.
    pub fn from_url(url: &str) -> Result<Self, TargetError> {
        let trimmed = url.trim();
        if url::Url::parse(trimmed).is_err() {
            return Err(TargetError::InvalidUrl(trimmed.to_string()));
        }
        let platform = Platform::detect(trimmed)
            .ok_or_else(|| TargetError::UnsupportedPlatform(trimmed.to_string()))?;
        Ok(Self::new(platform, trimmed))
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
}

// --- Candidates ---

/// Output fields. Every record carries all of them, available or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Author,
    LikeCount,
    CommentCount,
    ShareCount,
    ViewCount,
    Thumbnail,
    Body,
    CommentList,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Author,
        Field::LikeCount,
        Field::CommentCount,
        Field::ShareCount,
        Field::ViewCount,
        Field::Thumbnail,
        Field::Body,
        Field::CommentList,
    ];

    pub const ENGAGEMENT: [Field; 4] = [
        Field::LikeCount,
        Field::CommentCount,
        Field::ShareCount,
        Field::ViewCount,
    ];

    pub fn is_count(&self) -> bool {
        Self::ENGAGEMENT.contains(self)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Author => "author",
            Field::LikeCount => "like_count",
            Field::CommentCount => "comment_count",
            Field::ShareCount => "share_count",
            Field::ViewCount => "view_count",
            Field::Thumbnail => "thumbnail",
            Field::Body => "body",
            Field::CommentList => "comment_list",
        };
        f.write_str(name)
    }
}

/// Structural reliability of the strategy that produced a candidate.
/// Ordering follows reliability: `Primary > Embedded > Rendered > Pattern`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Embedded,
    Rendered,
    Pattern,
}

impl Tier {
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Primary => 4,
            Tier::Embedded => 3,
            Tier::Rendered => 2,
            Tier::Pattern => 1,
        }
    }
}

impl PartialOrd for Tier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Embedded => write!(f, "embedded"),
            Tier::Rendered => write!(f, "rendered"),
            Tier::Pattern => write!(f, "pattern"),
        }
    }
}

/// A comment as scraped, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawComment {
    pub author: String,
    pub text: String,
    pub likes: Option<RawValue>,
}

/// Value exactly as a strategy found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// Text that may still carry escapes, entities or markup.
    Text(String),
    /// A numeral as displayed, e.g. `"1.2万"` or `"3,400"`.
    Count(String),
    /// A number taken from structured JSON. Signed so corrupted negatives are visible.
    Integer(i64),
    Comments(Vec<RawComment>),
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<i64> for RawValue {
    fn from(n: i64) -> Self {
        RawValue::Integer(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionCandidate {
    pub field: Field,
    pub value: RawValue,
    pub tier: Tier,
    /// The author name appeared next to the value in the same source fragment.
    pub corroborated: bool,
    pub strategy: &'static str,
}

impl ExtractionCandidate {
    pub fn new(field: Field, value: impl Into<RawValue>, tier: Tier, strategy: &'static str) -> Self {
        Self {
            field,
            value: value.into(),
            tier,
            corroborated: false,
            strategy,
        }
    }

    pub fn corroborated(mut self, corroborated: bool) -> Self {
        self.corroborated = corroborated;
        self
    }

    /// Higher is better. Tier dominates; corroboration breaks ties within a tier.
    pub fn confidence(&self) -> u8 {
        self.tier.rank() * 2 + u8::from(self.corroborated)
    }
}

// --- Records ---

/// A resolved field. `Unavailable` is distinct from zero or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FieldValue<T> {
    Available(T),
    #[default]
    Unavailable,
}

impl<T> FieldValue<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, FieldValue::Available(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            FieldValue::Available(v) => Some(v),
            FieldValue::Unavailable => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            FieldValue::Available(v) => Some(v),
            FieldValue::Unavailable => None,
        }
    }
}

impl<T> From<Option<T>> for FieldValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => FieldValue::Available(v),
            None => FieldValue::Unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub text: String,
    pub likes: Option<u64>,
}

/// Where a resolved field came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSource {
    pub tier: Tier,
    pub strategy: String,
    /// Candidates considered after ceiling and normalization rejections.
    pub candidates: usize,
    /// Candidates dropped for exceeding the plausibility ceiling or failing to normalize.
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvenanceFlag {
    /// Re-extraction produced the same engagement payload as another URL by the same author.
    DuplicateSuspectedUnresolved { matched_url: String },
    /// Re-extraction after a duplicate suspicion produced different values.
    DuplicateResolvedByRetry { matched_url: String },
    /// The session guard had to reload the page once before the identifiers matched.
    SessionReloaded,
    /// The platform was escalated to its non-session fallback before this target ran.
    Escalated,
}

/// Debugging metadata. Not meant for end consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub fields: BTreeMap<Field, FieldSource>,
    /// Fields that had candidates but none survived validation.
    pub unresolved: Vec<Field>,
    pub flags: Vec<ProvenanceFlag>,
}

impl Provenance {
    pub fn has_flag(&self, pred: impl Fn(&ProvenanceFlag) -> bool) -> bool {
        self.flags.iter().any(pred)
    }
}

/// The reconciled output for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub target: ContentTarget,
    pub author: FieldValue<String>,
    pub likes: FieldValue<u64>,
    pub comments: FieldValue<u64>,
    pub shares: FieldValue<u64>,
    pub views: FieldValue<u64>,
    pub thumbnail: FieldValue<String>,
    pub body: FieldValue<String>,
    pub comment_list: FieldValue<Vec<Comment>>,
    pub provenance: Provenance,
    pub extracted_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn count(&self, field: Field) -> Option<&FieldValue<u64>> {
        match field {
            Field::LikeCount => Some(&self.likes),
            Field::CommentCount => Some(&self.comments),
            Field::ShareCount => Some(&self.shares),
            Field::ViewCount => Some(&self.views),
            _ => None,
        }
    }

    /// The engagement tuple compared by the duplicate-author check.
    pub fn engagement(&self) -> [FieldValue<u64>; 4] {
        [
            self.likes.clone(),
            self.comments.clone(),
            self.shares.clone(),
            self.views.clone(),
        ]
    }
}

// --- Sessions & credentials ---

/// State tracked by one session guard. Never shared between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFingerprint {
    pub last_requested: Option<String>,
    pub last_rendered: Option<String>,
    /// Incremented every time browser-local state is cleared.
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Opaque per-platform authentication, supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AuthContext {
    #[default]
    None,
    Cookies(Vec<Cookie>),
    SessionToken(String),
}

impl AuthContext {
    pub fn is_none(&self) -> bool {
        matches!(self, AuthContext::None)
    }

    /// Render as a `Cookie` header value. A session token is sent as
    /// `token_cookie=<token>`.
    pub fn cookie_header(&self, token_cookie: &str) -> Option<String> {
        match self {
            AuthContext::None => None,
            AuthContext::Cookies(cookies) if cookies.is_empty() => None,
            AuthContext::Cookies(cookies) => Some(
                cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            AuthContext::SessionToken(token) => Some(format!("{token_cookie}={token}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    by_platform: BTreeMap<Platform, AuthContext>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, auth: AuthContext) -> Self {
        self.by_platform.insert(platform, auth);
        self
    }

    pub fn get(&self, platform: Platform) -> AuthContext {
        self.by_platform.get(&platform).cloned().unwrap_or_default()
    }
}
