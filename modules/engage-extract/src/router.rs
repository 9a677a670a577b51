// Target routing: canonical URLs and per-platform identifiers, from the URL alone (no HTTP).
// Short links that only a redirect can explain are reported as such so the engine
// can resolve them before any tier runs.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use engage_common::{ContentTarget, Platform};

static YOUTUBE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap());
static XHS_NOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{24}$").unwrap());
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static FB_POST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+|pfbid[0-9A-Za-z]+)$").unwrap());

/// First path segments on facebook.com that are routes, not page or user slugs.
const FB_RESERVED: &[&str] = &[
    "permalink.php",
    "story.php",
    "photo.php",
    "photo",
    "watch",
    "reel",
    "share",
    "groups",
    "profile.php",
    "video.php",
    "events",
];

/// Query parameters Xiaohongshu requires to serve a note to a logged-out client.
const XHS_KEPT_PARAMS: &[&str] = &["xsec_token", "xsec_source"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    /// Canonical URL and the identifier the rendered page must show.
    Ready { url: String, identifier: String },
    /// A short or share link; only following its redirects reveals the target.
    NeedsRedirect,
    /// The URL is on the platform but does not address a single item.
    Unrecognized,
}

/// Canonicalize `url` for `platform`.
pub fn canonicalize(platform: Platform, url: &str) -> Canonical {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return Canonical::Unrecognized;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match platform {
        Platform::Video => youtube(&parsed, &host, &segments),
        Platform::Photo => instagram(&segments),
        Platform::Social => facebook(&parsed, &host, &segments),
        Platform::Forum => dcard(&segments),
        Platform::Note => xiaohongshu(&parsed, &host, &segments),
    }
}

/// Canonical target for an already-resolved URL, carrying its identifier.
pub fn canonical_target(platform: Platform, url: &str) -> Option<ContentTarget> {
    match canonicalize(platform, url) {
        Canonical::Ready { url, identifier } => {
            Some(ContentTarget::new(platform, url).with_identifier(identifier))
        }
        _ => None,
    }
}

/// Identifier addressed by `url`, if it addresses a single item.
pub fn identifier_from_url(platform: Platform, url: &str) -> Option<String> {
    match canonicalize(platform, url) {
        Canonical::Ready { identifier, .. } => Some(identifier),
        _ => None,
    }
}

/// Page or user slug for a Facebook post URL (`facebook.com/{slug}/posts/...`).
pub fn facebook_author_slug(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let first = parsed.path_segments()?.find(|s| !s.is_empty())?;
    if FB_RESERVED.contains(&first) {
        return None;
    }
    Some(first.to_string())
}

fn ready(url: String, identifier: &str) -> Canonical {
    Canonical::Ready {
        url,
        identifier: identifier.to_string(),
    }
}

fn youtube(parsed: &Url, host: &str, segments: &[&str]) -> Canonical {
    let id: Option<String> = if host == "youtu.be" || host.ends_with(".youtu.be") {
        segments.first().map(|s| s.to_string())
    } else {
        match segments {
            ["watch", ..] => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            ["shorts" | "embed" | "v" | "live", id, ..] => Some(id.to_string()),
            _ => None,
        }
    };
    match id.filter(|id| YOUTUBE_ID_RE.is_match(id)) {
        Some(id) => ready(format!("https://www.youtube.com/watch?v={id}"), &id),
        None => Canonical::Unrecognized,
    }
}

fn instagram(segments: &[&str]) -> Canonical {
    let code = match segments {
        ["p" | "reel" | "reels" | "tv", code, ..] => Some(*code),
        [_, "p" | "reel", code, ..] => Some(*code),
        _ => None,
    };
    match code.filter(|c| c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')) {
        Some(code) => ready(format!("https://www.instagram.com/p/{code}/"), code),
        None => Canonical::Unrecognized,
    }
}

fn facebook(parsed: &Url, host: &str, segments: &[&str]) -> Canonical {
    if host == "fb.watch" || host.ends_with(".fb.watch") {
        return Canonical::NeedsRedirect;
    }
    if matches!(segments.first(), Some(&"share")) {
        return Canonical::NeedsRedirect;
    }

    let query = |key: &str| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };
    fn valid(id: &str) -> bool {
        FB_POST_ID_RE.is_match(id)
    }

    match segments {
        ["permalink.php" | "story.php", ..] => match (query("story_fbid"), query("id")) {
            (Some(story), Some(owner)) if valid(&story) => ready(
                format!("https://www.facebook.com/permalink.php?story_fbid={story}&id={owner}"),
                &story,
            ),
            (Some(story), None) if valid(&story) => ready(
                format!("https://www.facebook.com/permalink.php?story_fbid={story}"),
                &story,
            ),
            _ => Canonical::Unrecognized,
        },
        ["photo" | "photo.php", ..] => match query("fbid") {
            Some(id) if valid(&id) => {
                ready(format!("https://www.facebook.com/photo/?fbid={id}"), &id)
            }
            _ => Canonical::Unrecognized,
        },
        ["watch", ..] => match query("v") {
            Some(id) if valid(&id) => {
                ready(format!("https://www.facebook.com/watch/?v={id}"), &id)
            }
            _ => Canonical::Unrecognized,
        },
        ["reel", id, ..] if valid(*id) => {
            ready(format!("https://www.facebook.com/reel/{id}"), id)
        }
        ["groups", group, "posts" | "permalink", id, ..] if valid(*id) => ready(
            format!("https://www.facebook.com/groups/{group}/posts/{id}"),
            id,
        ),
        [slug, "posts", id, ..] if valid(*id) => {
            ready(format!("https://www.facebook.com/{slug}/posts/{id}"), id)
        }
        [slug, "videos", rest @ ..] => match rest.iter().rev().find(|s| valid(**s)) {
            Some(id) => ready(format!("https://www.facebook.com/{slug}/videos/{id}"), id),
            None => Canonical::Unrecognized,
        },
        _ => Canonical::Unrecognized,
    }
}

fn dcard(segments: &[&str]) -> Canonical {
    match segments {
        ["f", forum, "p", id, ..] if DIGITS_RE.is_match(id) => {
            ready(format!("https://www.dcard.tw/f/{forum}/p/{id}"), id)
        }
        ["p", id, ..] if DIGITS_RE.is_match(id) => {
            ready(format!("https://www.dcard.tw/p/{id}"), id)
        }
        _ => Canonical::Unrecognized,
    }
}

fn xiaohongshu(parsed: &Url, host: &str, segments: &[&str]) -> Canonical {
    if host == "xhslink.com" || host.ends_with(".xhslink.com") {
        return Canonical::NeedsRedirect;
    }
    let id = match segments {
        ["explore", id, ..] => Some(*id),
        ["discovery", "item", id, ..] => Some(*id),
        ["user", "profile", _, id, ..] => Some(*id),
        _ => None,
    };
    let Some(id) = id.filter(|id| XHS_NOTE_RE.is_match(id)) else {
        return Canonical::Unrecognized;
    };

    let kept: Vec<String> = parsed
        .query_pairs()
        .filter(|(k, _)| XHS_KEPT_PARAMS.contains(&&**k))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    let url = if kept.is_empty() {
        format!("https://www.xiaohongshu.com/explore/{id}")
    } else {
        format!("https://www.xiaohongshu.com/explore/{id}?{}", kept.join("&"))
    };
    ready(url, id)
}
