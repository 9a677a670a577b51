// Source strategy: one implementation per platform, each an ordered list of tiers
// from most structured to most fragile. The engine walks the list; a strategy only
// knows how to run one tier at a time.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use engage_common::{
    AuthContext, ContentTarget, ExtractionCandidate, Field, Platform, RawComment, RawValue, Tier,
};

use crate::error::TierError;
use crate::traits::{RenderedPage, WebResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierMode {
    /// Fetches on its own: HTTP, subprocess or hosted scraper.
    Direct,
    /// Reads the page rendered by a guarded browser session.
    Session,
    /// Non-session fallback, run only once the platform has been escalated.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub tier: Tier,
    pub name: &'static str,
    pub mode: TierMode,
}

impl TierSpec {
    pub const fn direct(tier: Tier, name: &'static str) -> Self {
        Self {
            tier,
            name,
            mode: TierMode::Direct,
        }
    }

    pub const fn session(tier: Tier, name: &'static str) -> Self {
        Self {
            tier,
            name,
            mode: TierMode::Session,
        }
    }

    pub const fn fallback(tier: Tier, name: &'static str) -> Self {
        Self {
            tier,
            name,
            mode: TierMode::Fallback,
        }
    }
}

/// Per-target scratch state shared by the tiers of one extraction.
#[derive(Debug, Clone, Default)]
pub struct TierContext {
    pub auth: AuthContext,
    /// Set by the engine before a session tier runs.
    pub rendered: Option<RenderedPage>,
    /// Page fetched by an earlier direct tier, reused by later pattern tiers.
    pub fetched: Option<WebResponse>,
    pub max_comments: usize,
    /// When the engine gives up on the running tier.
    pub deadline: Option<Instant>,
}

impl TierContext {
    pub fn new(auth: AuthContext, max_comments: usize) -> Self {
        Self {
            auth,
            rendered: None,
            fetched: None,
            max_comments,
            deadline: None,
        }
    }

    /// Time left before the running tier is abandoned. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn rendered_html(&self) -> Result<&str, TierError> {
        self.rendered
            .as_ref()
            .map(|p| p.html.as_str())
            .ok_or(TierError::Skipped("no rendered page"))
    }

    /// Best available page source: rendered first, then fetched.
    pub fn any_html(&self) -> Option<&str> {
        self.rendered
            .as_ref()
            .map(|p| p.html.as_str())
            .or_else(|| self.fetched.as_ref().map(|r| r.body.as_str()))
    }
}

#[async_trait]
pub trait SourceStrategy: Send + Sync {
    fn platform(&self) -> Platform;

    fn tiers(&self) -> &[TierSpec];

    /// Origins whose browser-local storage the session guard wipes between targets.
    fn session_origins(&self) -> &[&'static str] {
        &[]
    }

    /// URL a session tier renders. Defaults to the canonical URL.
    fn render_url(&self, target: &ContentTarget) -> String {
        target.url().to_string()
    }

    /// Run tier `tier_index` for `target`. An index past the end is `TierError::Exhausted`.
    async fn attempt(
        &self,
        target: &ContentTarget,
        tier_index: usize,
        cx: &mut TierContext,
    ) -> Result<Vec<ExtractionCandidate>, TierError>;
}

/// Collects candidates for one tier, skipping absent values.
pub(crate) struct Candidates {
    tier: Tier,
    strategy: &'static str,
    corroborated: bool,
    items: Vec<ExtractionCandidate>,
}

impl Candidates {
    pub(crate) fn new(spec: &TierSpec) -> Self {
        Self {
            tier: spec.tier,
            strategy: spec.name,
            corroborated: false,
            items: Vec::new(),
        }
    }

    /// Mark subsequent candidates as corroborated by an adjacent author match.
    pub(crate) fn corroborated(&mut self, corroborated: bool) -> &mut Self {
        self.corroborated = corroborated;
        self
    }

    pub(crate) fn push(&mut self, field: Field, value: Option<RawValue>) -> &mut Self {
        if let Some(value) = value {
            self.items.push(
                ExtractionCandidate::new(field, value, self.tier, self.strategy)
                    .corroborated(self.corroborated),
            );
        }
        self
    }

    pub(crate) fn text(&mut self, field: Field, value: Option<&str>) -> &mut Self {
        let value = value
            .filter(|v| !v.trim().is_empty())
            .map(|v| RawValue::Text(v.to_string()));
        self.push(field, value)
    }

    pub(crate) fn integer(&mut self, field: Field, value: Option<i64>) -> &mut Self {
        self.push(field, value.map(RawValue::Integer))
    }

    pub(crate) fn count(&mut self, field: Field, value: Option<&str>) -> &mut Self {
        let value = value
            .filter(|v| !v.trim().is_empty())
            .map(|v| RawValue::Count(v.to_string()));
        self.push(field, value)
    }

    pub(crate) fn comments(&mut self, comments: Option<Vec<RawComment>>) -> &mut Self {
        self.push(Field::CommentList, comments.map(RawValue::Comments))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn finish(self) -> Vec<ExtractionCandidate> {
        self.items
    }
}

/// Look up `spec` for `tier_index`, or report the strategy as exhausted.
pub(crate) fn spec_at(tiers: &[TierSpec], tier_index: usize) -> Result<&TierSpec, TierError> {
    tiers.get(tier_index).ok_or(TierError::Exhausted(tier_index))
}

// --- JSON helpers shared by the platform strategies ---

pub(crate) fn json_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| match v {
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => v.get(*key),
    })
}

pub(crate) fn json_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    json_at(value, path).and_then(Value::as_str)
}

/// A count that may be stored as a JSON number or as a display string.
pub(crate) fn json_count(value: &Value, path: &[&str]) -> Option<RawValue> {
    match json_at(value, path)? {
        Value::Number(n) => n.as_i64().map(RawValue::Integer),
        Value::String(s) if !s.trim().is_empty() => Some(RawValue::Count(s.clone())),
        _ => None,
    }
}

/// Depth-first search for the first object satisfying `pred`.
pub(crate) fn find_object<'a>(
    value: &'a Value,
    pred: &dyn Fn(&serde_json::Map<String, Value>) -> bool,
) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if pred(map) {
                return Some(value);
            }
            map.values().find_map(|v| find_object(v, pred))
        }
        Value::Array(items) => items.iter().find_map(|v| find_object(v, pred)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_paths_walk_objects_and_arrays() {
        let v = json!({"a": {"list": [{"n": 3}, {"n": "1.2万"}]}});
        assert_eq!(json_count(&v, &["a", "list", "0", "n"]), Some(RawValue::Integer(3)));
        assert_eq!(
            json_count(&v, &["a", "list", "1", "n"]),
            Some(RawValue::Count("1.2万".into()))
        );
        assert_eq!(json_count(&v, &["a", "missing"]), None);
    }

    #[test]
    fn find_object_locates_nested_match() {
        let v = json!({"x": [{"id": 1}, {"id": 2, "likeCount": 7}]});
        let found = find_object(&v, &|m| m.get("id") == Some(&json!(2))).unwrap();
        assert_eq!(found["likeCount"], 7);
    }

    #[test]
    fn candidates_skip_absent_and_blank_values() {
        let spec = TierSpec::direct(Tier::Embedded, "test");
        let mut c = Candidates::new(&spec);
        c.text(Field::Author, Some("  "))
            .text(Field::Body, None)
            .integer(Field::LikeCount, Some(0))
            .corroborated(true)
            .count(Field::CommentCount, Some("2"));
        let items = c.finish();
        assert_eq!(items.len(), 2);
        assert!(!items[0].corroborated);
        assert!(items[1].corroborated);
        assert_eq!(items[0].value, RawValue::Integer(0));
    }
}
