use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::ConfigError;
use crate::types::{Field, Platform};

/// Upper bounds beyond which a count is treated as corrupted rather than large.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlausibilityCeilings {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub views: u64,
}

impl Default for PlausibilityCeilings {
    fn default() -> Self {
        Self {
            likes: 1_000_000_000,
            comments: 100_000_000,
            shares: 100_000_000,
            views: 100_000_000_000,
        }
    }
}

impl PlausibilityCeilings {
    pub fn for_field(&self, field: Field) -> Option<u64> {
        match field {
            Field::LikeCount => Some(self.likes),
            Field::CommentCount => Some(self.comments),
            Field::ShareCount => Some(self.shares),
            Field::ViewCount => Some(self.views),
            _ => None,
        }
    }
}

/// Per-platform pacing, concurrency and validation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSettings {
    /// Minimum gap between two requests to the platform.
    pub min_request_interval: Duration,
    /// Concurrent targets for this platform. Session-backed tiers are
    /// additionally limited to one target per live session.
    pub max_concurrency: usize,
    /// Budget for a single tier attempt.
    pub tier_timeout: Duration,
    /// Consecutive blocked targets before switching to the non-session fallback.
    pub escalate_after_blocks: Option<u32>,
    pub max_redirect_hops: usize,
    pub ceilings: PlausibilityCeilings,
}

impl PlatformSettings {
    pub fn for_platform(platform: Platform) -> Self {
        let base = Self {
            min_request_interval: Duration::ZERO,
            max_concurrency: 1,
            tier_timeout: Duration::from_secs(30),
            escalate_after_blocks: None,
            max_redirect_hops: 5,
            ceilings: PlausibilityCeilings::default(),
        };
        match platform {
            Platform::Video => Self {
                min_request_interval: Duration::from_secs(1),
                max_concurrency: 4,
                tier_timeout: Duration::from_secs(60),
                ..base
            },
            Platform::Photo => Self {
                min_request_interval: Duration::from_secs(5),
                escalate_after_blocks: Some(2),
                ..base
            },
            Platform::Social => Self {
                min_request_interval: Duration::from_secs(3),
                escalate_after_blocks: Some(2),
                ..base
            },
            Platform::Forum => Self {
                min_request_interval: Duration::from_secs(8),
                tier_timeout: Duration::from_secs(20),
                ..base
            },
            Platform::Note => Self {
                min_request_interval: Duration::from_secs(2),
                ..base
            },
        }
    }
}

/// Engine configuration. Defaults are usable as-is; `from_env` overrides them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub platforms: BTreeMap<Platform, PlatformSettings>,
    /// Wait before re-extracting a suspected duplicate.
    pub duplicate_retry_delay: Duration,
    /// Capacity of the per-batch recent extraction ring.
    pub recent_log_capacity: usize,
    pub max_comments: usize,
    /// Live automated-browser sessions per session-backed platform.
    pub browser_sessions: usize,
    /// Budget for the scan-based login handshake.
    pub login_timeout: Duration,

    // External services
    pub apify_api_token: Option<String>,
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub ytdlp_bin: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platforms: Platform::ALL
                .iter()
                .map(|p| (*p, PlatformSettings::for_platform(*p)))
                .collect(),
            duplicate_retry_delay: Duration::from_secs(3),
            recent_log_capacity: 32,
            max_comments: 10,
            browser_sessions: 1,
            login_timeout: Duration::from_secs(120),
            apify_api_token: None,
            browserless_url: None,
            browserless_token: None,
            ytdlp_bin: "yt-dlp".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(lookup);
        let mut config = Self::default();

        config.apify_api_token = vars.optional("APIFY_API_TOKEN");
        config.browserless_url = vars.optional("BROWSERLESS_URL");
        config.browserless_token = vars.optional("BROWSERLESS_TOKEN");
        if let Some(bin) = vars.optional("YTDLP_BIN") {
            config.ytdlp_bin = bin;
        }
        if let Some(ms) = vars.parsed::<u64>("ENGAGE_DUPLICATE_RETRY_MS")? {
            config.duplicate_retry_delay = Duration::from_millis(ms);
        }
        if let Some(n) = vars.parsed::<usize>("ENGAGE_MAX_COMMENTS")? {
            config.max_comments = n;
        }
        if let Some(n) = vars.parsed::<usize>("ENGAGE_BROWSER_SESSIONS")? {
            config.browser_sessions = n.max(1);
        }

        for (platform, settings) in config.platforms.iter_mut() {
            let prefix = format!("ENGAGE_{}", platform.as_str().to_ascii_uppercase());
            if let Some(ms) = vars.parsed::<u64>(&format!("{prefix}_DELAY_MS"))? {
                settings.min_request_interval = Duration::from_millis(ms);
            }
            if let Some(n) = vars.parsed::<usize>(&format!("{prefix}_CONCURRENCY"))? {
                settings.max_concurrency = n.max(1);
            }
            if let Some(secs) = vars.parsed::<u64>(&format!("{prefix}_TIER_TIMEOUT_SECS"))? {
                settings.tier_timeout = Duration::from_secs(secs);
            }
            // Plausibility ceilings, not list sizes: ENGAGE_MAX_COMMENTS is the comment list.
            if let Some(n) = vars.parsed::<u64>(&format!("{prefix}_LIKE_CEILING"))? {
                settings.ceilings.likes = n;
            }
            if let Some(n) = vars.parsed::<u64>(&format!("{prefix}_COMMENT_CEILING"))? {
                settings.ceilings.comments = n;
            }
            if let Some(n) = vars.parsed::<u64>(&format!("{prefix}_SHARE_CEILING"))? {
                settings.ceilings.shares = n;
            }
            if let Some(n) = vars.parsed::<u64>(&format!("{prefix}_VIEW_CEILING"))? {
                settings.ceilings.views = n;
            }
        }

        Ok(config)
    }

    pub fn settings(&self, platform: Platform) -> PlatformSettings {
        self.platforms
            .get(&platform)
            .cloned()
            .unwrap_or_else(|| PlatformSettings::for_platform(platform))
    }

    /// Log which external services are configured, without their secrets.
    pub fn log_redacted(&self) {
        info!(
            apify = self.apify_api_token.is_some(),
            browserless = self.browserless_url.is_some(),
            ytdlp_bin = %self.ytdlp_bin,
            browser_sessions = self.browser_sessions,
            "Engine configuration loaded"
        );
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.optional(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid {
                    key: key.to_string(),
                    value: raw,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_platforms_have_their_own_delays() {
        let config = EngineConfig::default();
        assert_eq!(
            config.settings(Platform::Photo).min_request_interval,
            Duration::from_secs(5)
        );
        assert_eq!(
            config.settings(Platform::Forum).min_request_interval,
            Duration::from_secs(8)
        );
        assert_eq!(config.settings(Platform::Social).escalate_after_blocks, Some(2));
    }

    #[test]
    fn ceilings_cover_only_count_fields() {
        let ceilings = PlausibilityCeilings::default();
        assert_eq!(ceilings.for_field(Field::ViewCount), Some(100_000_000_000));
        assert_eq!(ceilings.for_field(Field::Author), None);
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn comment_list_size_and_comment_ceiling_are_separate_keys() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("ENGAGE_MAX_COMMENTS", "25"),
            ("ENGAGE_VIDEO_COMMENT_CEILING", "5000"),
        ]))
        .unwrap();

        assert_eq!(config.max_comments, 25);
        let video = config.settings(Platform::Video).ceilings;
        assert_eq!(video.comments, 5000);
        assert_eq!(video.likes, PlausibilityCeilings::default().likes);
        assert_eq!(
            config.settings(Platform::Photo).ceilings.comments,
            PlausibilityCeilings::default().comments
        );
    }

    #[test]
    fn old_max_field_keys_no_longer_set_ceilings() {
        let config =
            EngineConfig::from_lookup(lookup(&[("ENGAGE_FORUM_MAX_LIKES", "10")])).unwrap();
        assert_eq!(
            config.settings(Platform::Forum).ceilings.likes,
            PlausibilityCeilings::default().likes
        );
    }

    #[test]
    fn unparseable_override_names_its_key() {
        let err = EngineConfig::from_lookup(lookup(&[("ENGAGE_NOTE_VIEW_CEILING", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ENGAGE_NOTE_VIEW_CEILING"));
    }
}
