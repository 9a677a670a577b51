// Metric reconciler: one final value per field from candidates that may
// disagree, with the winning tier kept as provenance.
//
// Per field: normalize every candidate (ceiling violations and unparseable
// values are dropped outright), then pick the best by tier, then by author
// corroboration, then first seen. The largest value never wins on size alone.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use engage_common::{
    ContentRecord, ContentTarget, ExtractionCandidate, Field, FieldSource, FieldValue,
    PlausibilityCeilings, Provenance,
};

use crate::normalize::{NormalizedValue, Normalizer};

/// The value chosen for one field and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: NormalizedValue,
    pub source: FieldSource,
}

/// Outcome for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No tier proposed a value.
    Unavailable,
    /// Candidates existed, none survived validation.
    Unresolved { rejected: usize },
    Resolved(Resolved),
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    normalizer: Normalizer,
}

impl Reconciler {
    pub fn new(ceilings: PlausibilityCeilings, max_comments: usize) -> Self {
        Self {
            normalizer: Normalizer::new(ceilings, max_comments),
        }
    }

    /// Resolve a single field from `candidates`, ignoring candidates for other fields.
    pub fn resolve(&self, field: Field, candidates: &[ExtractionCandidate]) -> Resolution {
        let mut considered = 0usize;
        let mut rejected = 0usize;
        let mut best: Option<(&ExtractionCandidate, NormalizedValue)> = None;

        for candidate in candidates.iter().filter(|c| c.field == field) {
            let value = match self.normalizer.normalize(field, &candidate.value) {
                Ok(value) => value,
                Err(e) => {
                    debug!(
                        field = %field,
                        tier = %candidate.tier,
                        strategy = candidate.strategy,
                        error = %e,
                        "Candidate rejected"
                    );
                    rejected += 1;
                    continue;
                }
            };
            considered += 1;

            // Strictly better only: an equal-confidence candidate never displaces
            // the first one seen.
            let better = match &best {
                None => true,
                Some((current, _)) => candidate.confidence() > current.confidence(),
            };
            if better {
                best = Some((candidate, value));
            }
        }

        match best {
            Some((winner, value)) => Resolution::Resolved(Resolved {
                value,
                source: FieldSource {
                    tier: winner.tier,
                    strategy: winner.strategy.to_string(),
                    candidates: considered,
                    rejected,
                },
            }),
            None if rejected > 0 => Resolution::Unresolved { rejected },
            None => Resolution::Unavailable,
        }
    }

    /// Reconcile every field into a record. Fields nothing proposed are unavailable.
    pub fn reconcile(
        &self,
        target: &ContentTarget,
        candidates: &[ExtractionCandidate],
    ) -> ContentRecord {
        let mut record = ContentRecord {
            target: target.clone(),
            author: FieldValue::Unavailable,
            likes: FieldValue::Unavailable,
            comments: FieldValue::Unavailable,
            shares: FieldValue::Unavailable,
            views: FieldValue::Unavailable,
            thumbnail: FieldValue::Unavailable,
            body: FieldValue::Unavailable,
            comment_list: FieldValue::Unavailable,
            provenance: Provenance::default(),
            extracted_at: Utc::now(),
        };
        let mut sources = BTreeMap::new();

        for field in Field::ALL {
            let resolved = match self.resolve(field, candidates) {
                Resolution::Unavailable => continue,
                Resolution::Unresolved { .. } => {
                    record.provenance.unresolved.push(field);
                    continue;
                }
                Resolution::Resolved(resolved) => resolved,
            };
            match (field, resolved.value) {
                (Field::Author, NormalizedValue::Text(s)) => record.author = FieldValue::Available(s),
                (Field::Thumbnail, NormalizedValue::Text(s)) => {
                    record.thumbnail = FieldValue::Available(s)
                }
                (Field::Body, NormalizedValue::Text(s)) => record.body = FieldValue::Available(s),
                (Field::LikeCount, NormalizedValue::Count(n)) => {
                    record.likes = FieldValue::Available(n)
                }
                (Field::CommentCount, NormalizedValue::Count(n)) => {
                    record.comments = FieldValue::Available(n)
                }
                (Field::ShareCount, NormalizedValue::Count(n)) => {
                    record.shares = FieldValue::Available(n)
                }
                (Field::ViewCount, NormalizedValue::Count(n)) => {
                    record.views = FieldValue::Available(n)
                }
                (Field::CommentList, NormalizedValue::Comments(list)) => {
                    record.comment_list = FieldValue::Available(list)
                }
                _ => continue,
            }
            sources.insert(field, resolved.source);
        }

        record.provenance.fields = sources;
        record
    }

    /// Author plus at least one engagement metric survive normalization.
    pub fn satisfies_mandatory(&self, candidates: &[ExtractionCandidate]) -> bool {
        let valid = |field: Field| matches!(self.resolve(field, candidates), Resolution::Resolved(_));
        valid(Field::Author) && Field::ENGAGEMENT.into_iter().any(valid)
    }
}

/// A record worth returning: it names an author or carries at least one metric.
pub fn has_usable(record: &ContentRecord) -> bool {
    record.author.is_available()
        || Field::ENGAGEMENT
            .into_iter()
            .filter_map(|f| record.count(f))
            .any(FieldValue::is_available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engage_common::{Platform, RawComment, RawValue, Tier};

    fn reconciler() -> Reconciler {
        Reconciler::new(PlausibilityCeilings::default(), 10)
    }

    fn target() -> ContentTarget {
        ContentTarget::new(Platform::Photo, "https://www.instagram.com/p/AAA111/")
    }

    fn likes(value: i64, tier: Tier) -> ExtractionCandidate {
        ExtractionCandidate::new(Field::LikeCount, value, tier, "test")
    }

    #[test]
    fn higher_tier_beats_larger_value() {
        let candidates = vec![likes(9170, Tier::Pattern), likes(270, Tier::Embedded)];
        let record = reconciler().reconcile(&target(), &candidates);
        assert_eq!(record.likes, FieldValue::Available(270));
        assert_eq!(record.provenance.fields[&Field::LikeCount].tier, Tier::Embedded);
        assert_eq!(record.provenance.fields[&Field::LikeCount].candidates, 2);
    }

    #[test]
    fn corroboration_breaks_tier_ties() {
        let candidates = vec![
            likes(9170, Tier::Pattern),
            likes(270, Tier::Pattern).corroborated(true),
        ];
        let record = reconciler().reconcile(&target(), &candidates);
        assert_eq!(record.likes, FieldValue::Available(270));
    }

    #[test]
    fn first_seen_wins_remaining_ties() {
        let candidates = vec![likes(12, Tier::Rendered), likes(9170, Tier::Rendered)];
        let record = reconciler().reconcile(&target(), &candidates);
        assert_eq!(record.likes, FieldValue::Available(12));
    }

    #[test]
    fn values_above_ceiling_are_excluded_before_ranking() {
        let ceilings = PlausibilityCeilings {
            likes: 100_000,
            ..PlausibilityCeilings::default()
        };
        let reconciler = Reconciler::new(ceilings, 10);
        let candidates = vec![likes(5_000_000, Tier::Primary), likes(310, Tier::Pattern)];

        let record = reconciler.reconcile(&target(), &candidates);
        assert_eq!(record.likes, FieldValue::Available(310));
        assert_eq!(record.provenance.fields[&Field::LikeCount].rejected, 1);
    }

    #[test]
    fn only_implausible_candidates_leave_field_unresolved() {
        let candidates = vec![
            likes(-4, Tier::Primary),
            ExtractionCandidate::new(Field::LikeCount, "n/a", Tier::Pattern, "test"),
        ];
        let record = reconciler().reconcile(&target(), &candidates);
        assert_eq!(record.likes, FieldValue::Unavailable);
        assert_eq!(record.provenance.unresolved, vec![Field::LikeCount]);
    }

    #[test]
    fn zero_is_available_and_absence_is_not() {
        let candidates = vec![likes(0, Tier::Embedded)];
        let record = reconciler().reconcile(&target(), &candidates);
        assert_eq!(record.likes, FieldValue::Available(0));
        assert_eq!(record.shares, FieldValue::Unavailable);
        assert!(record.provenance.unresolved.is_empty());
    }

    #[test]
    fn low_comment_counts_are_kept() {
        for n in 1..=3 {
            let candidates = vec![ExtractionCandidate::new(
                Field::CommentCount,
                RawValue::Count(n.to_string()),
                Tier::Rendered,
                "test",
            )];
            let record = reconciler().reconcile(&target(), &candidates);
            assert_eq!(record.comments, FieldValue::Available(n));
        }
    }

    #[test]
    fn mandatory_set_needs_author_and_a_metric() {
        let r = reconciler();
        let author = ExtractionCandidate::new(Field::Author, "alice", Tier::Embedded, "test");
        assert!(!r.satisfies_mandatory(&[author.clone()]));
        assert!(!r.satisfies_mandatory(&[likes(3, Tier::Embedded)]));
        assert!(r.satisfies_mandatory(&[author.clone(), likes(3, Tier::Embedded)]));
        assert!(!r.satisfies_mandatory(&[author, likes(-1, Tier::Embedded)]));
    }

    #[test]
    fn every_field_is_reported() {
        let candidates = vec![
            ExtractionCandidate::new(Field::Author, "alice", Tier::Primary, "test"),
            ExtractionCandidate::new(
                Field::CommentList,
                RawValue::Comments(vec![RawComment {
                    author: "bob".into(),
                    text: "nice &amp; clean".into(),
                    likes: Some(RawValue::Integer(2)),
                }]),
                Tier::Primary,
                "test",
            ),
        ];
        let record = reconciler().reconcile(&target(), &candidates);
        assert!(has_usable(&record));
        assert_eq!(record.views, FieldValue::Unavailable);
        assert_eq!(record.comment_list.as_option().unwrap()[0].text, "nice & clean");

        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "author", "likes", "comments", "shares", "views", "thumbnail", "body", "comment_list",
        ] {
            assert!(json.get(key).is_some(), "{key} missing");
        }
    }

    #[test]
    fn record_without_author_or_metrics_is_unusable() {
        let candidates = vec![ExtractionCandidate::new(Field::Body, "hello", Tier::Pattern, "test")];
        let record = reconciler().reconcile(&target(), &candidates);
        assert!(!has_usable(&record));
    }
}
