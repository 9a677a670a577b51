// Duplicate-author guard: catches session leakage that slipped past the session
// guard by comparing each record with recent records by the same author.
//
// A suspect record is re-extracted once after a short wait. A second identical
// payload is accepted but flagged; a changed payload replaces the first and is
// flagged as resolved. Records are never dropped.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use engage_common::{ContentRecord, ExtractionFailure, FieldValue, ProvenanceFlag};

/// Bounded ring of the most recent records of one batch.
#[derive(Debug)]
pub struct RecentExtractionLog {
    capacity: usize,
    entries: VecDeque<ContentRecord>,
}

impl RecentExtractionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, record: ContentRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Most recent record by the same author on the same platform, from a
    /// different URL, with an identical engagement tuple.
    pub fn find_match(&self, record: &ContentRecord) -> Option<&ContentRecord> {
        let FieldValue::Available(author) = &record.author else {
            return None;
        };
        let engagement = record.engagement();
        if !engagement.iter().any(FieldValue::is_available) {
            return None;
        }

        self.entries.iter().rev().find(|prev| {
            prev.target.platform() == record.target.platform()
                && prev.target.url() != record.target.url()
                && prev.author.as_option() == Some(author)
                && prev.engagement() == engagement
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Owns the batch's recent log. The log is only touched under its lock.
pub struct DuplicateAuthorGuard {
    log: Mutex<RecentExtractionLog>,
    retry_delay: Duration,
}

impl DuplicateAuthorGuard {
    pub fn new(capacity: usize, retry_delay: Duration) -> Self {
        Self {
            log: Mutex::new(RecentExtractionLog::new(capacity)),
            retry_delay,
        }
    }

    /// Check `record` against the log and, on a suspected leak, wait and call
    /// `reextract` exactly once. The accepted record is appended to the log.
    pub async fn check_and_retry<F, Fut>(
        &self,
        record: ContentRecord,
        reextract: F,
    ) -> ContentRecord
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ContentRecord, ExtractionFailure>>,
    {
        // One guard across check and push: concurrent records by one author
        // must see each other.
        let matched_url = {
            let mut log = self.log.lock().await;
            let found = log.find_match(&record).map(|m| m.target.url().to_string());
            match found {
                Some(url) => url,
                None => {
                    log.push(record.clone());
                    return record;
                }
            }
        };

        warn!(
            url = record.target.url(),
            matched_url = %matched_url,
            author = ?record.author.as_option(),
            "Identical engagement from the same author at another URL, re-extracting"
        );
        tokio::time::sleep(self.retry_delay).await;

        let retried = reextract().await;
        let mut log = self.log.lock().await;
        let accepted = match retried {
            Ok(mut retried) => {
                if log.find_match(&retried).is_some() {
                    info!(url = retried.target.url(), "Duplicate persisted after retry, accepting with flag");
                    retried
                        .provenance
                        .flags
                        .push(ProvenanceFlag::DuplicateSuspectedUnresolved { matched_url });
                } else {
                    info!(url = retried.target.url(), "Retry produced a distinct payload");
                    retried
                        .provenance
                        .flags
                        .push(ProvenanceFlag::DuplicateResolvedByRetry { matched_url });
                }
                retried
            }
            Err(failure) => {
                warn!(
                    url = record.target.url(),
                    error = %failure,
                    "Re-extraction failed, keeping first result"
                );
                let mut record = record;
                record
                    .provenance
                    .flags
                    .push(ProvenanceFlag::DuplicateSuspectedUnresolved { matched_url });
                record
            }
        };

        log.push(accepted.clone());
        accepted
    }

    /// Forget the batch. Called when a batch finishes.
    pub async fn reset(&self) {
        self.log.lock().await.clear();
    }

    pub async fn logged(&self) -> usize {
        self.log.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engage_common::{ContentTarget, FailureReason, Platform, Provenance};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(url: &str, author: &str, likes: u64, comments: u64) -> ContentRecord {
        ContentRecord {
            target: ContentTarget::new(Platform::Photo, url),
            author: FieldValue::Available(author.to_string()),
            likes: FieldValue::Available(likes),
            comments: FieldValue::Available(comments),
            shares: FieldValue::Unavailable,
            views: FieldValue::Unavailable,
            thumbnail: FieldValue::Unavailable,
            body: FieldValue::Unavailable,
            comment_list: FieldValue::Unavailable,
            provenance: Provenance::default(),
            extracted_at: Utc::now(),
        }
    }

    async fn never() -> Result<ContentRecord, ExtractionFailure> {
        unreachable!("first record has nothing to match")
    }

    const A: &str = "https://www.instagram.com/p/AAA/";
    const B: &str = "https://www.instagram.com/p/BBB/";

    #[test]
    fn matches_same_author_same_payload_different_url() {
        let mut log = RecentExtractionLog::new(4);
        log.push(record(A, "alice", 270, 3));

        assert!(log.find_match(&record(B, "alice", 270, 3)).is_some());
        assert!(log.find_match(&record(A, "alice", 270, 3)).is_none(), "same URL");
        assert!(log.find_match(&record(B, "bob", 270, 3)).is_none(), "other author");
        assert!(log.find_match(&record(B, "alice", 271, 3)).is_none(), "other payload");
    }

    #[test]
    fn all_unavailable_payloads_never_match() {
        let mut log = RecentExtractionLog::new(4);
        let mut empty = record(A, "alice", 0, 0);
        empty.likes = FieldValue::Unavailable;
        empty.comments = FieldValue::Unavailable;
        log.push(empty.clone());

        let mut other = empty;
        other.target = ContentTarget::new(Platform::Photo, B);
        assert!(log.find_match(&other).is_none());
    }

    #[test]
    fn ring_forgets_oldest_entries() {
        let mut log = RecentExtractionLog::new(2);
        log.push(record(A, "alice", 1, 1));
        log.push(record("https://www.instagram.com/p/X/", "x", 2, 2));
        log.push(record("https://www.instagram.com/p/Y/", "y", 3, 3));
        assert_eq!(log.len(), 2);
        assert!(log.find_match(&record(B, "alice", 1, 1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unique_record_passes_without_retry() {
        let guard = DuplicateAuthorGuard::new(8, Duration::from_secs(3));
        let calls = AtomicUsize::new(0);

        let out = guard
            .check_and_retry(record(A, "alice", 270, 3), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ExtractionFailure>(record(A, "alice", 270, 3))
            })
            .await;

        assert!(out.provenance.flags.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(guard.logged().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_duplicate_is_flagged_after_one_retry() {
        let guard = DuplicateAuthorGuard::new(8, Duration::from_secs(3));
        guard.check_and_retry(record(A, "alice", 270, 3), never).await;

        let calls = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();
        let out = guard
            .check_and_retry(record(B, "alice", 270, 3), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ExtractionFailure>(record(B, "alice", 270, 3))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(
            out.provenance.flags,
            vec![ProvenanceFlag::DuplicateSuspectedUnresolved {
                matched_url: A.to_string()
            }]
        );
        assert_eq!(out.likes, FieldValue::Available(270));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_records_from_one_author_see_each_other() {
        let guard = DuplicateAuthorGuard::new(8, Duration::from_secs(3));
        // Both checks queue on the lock before either runs.
        let held = guard.log.lock().await;

        let first = guard.check_and_retry(record(A, "alice", 270, 3), || async {
            Ok::<_, ExtractionFailure>(record(A, "alice", 270, 3))
        });
        let second = guard.check_and_retry(record(B, "alice", 270, 3), || async {
            Ok::<_, ExtractionFailure>(record(B, "alice", 270, 3))
        });
        let release = async move {
            tokio::task::yield_now().await;
            drop(held);
        };
        let (a, b, ()) = tokio::join!(first, second, release);

        let flagged = [&a, &b]
            .iter()
            .filter(|r| !r.provenance.flags.is_empty())
            .count();
        assert_eq!(flagged, 1, "exactly one of the pair is suspected");
        assert_eq!(guard.logged().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_payload_replaces_the_suspect() {
        let guard = DuplicateAuthorGuard::new(8, Duration::from_secs(3));
        guard.check_and_retry(record(A, "alice", 270, 3), never).await;

        let out = guard
            .check_and_retry(record(B, "alice", 270, 3), || async {
                Ok::<_, ExtractionFailure>(record(B, "alice", 41, 0))
            })
            .await;

        assert_eq!(out.likes, FieldValue::Available(41));
        assert!(out.provenance.has_flag(|f| matches!(
            f,
            ProvenanceFlag::DuplicateResolvedByRetry { .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_retry_keeps_the_first_result() {
        let guard = DuplicateAuthorGuard::new(8, Duration::from_millis(10));
        guard.check_and_retry(record(A, "alice", 270, 3), never).await;

        let out = guard
            .check_and_retry(record(B, "alice", 270, 3), || async {
                Err::<ContentRecord, _>(ExtractionFailure::new(
                    Platform::Photo,
                    B,
                    FailureReason::Blocked,
                    "challenge page",
                ))
            })
            .await;

        assert_eq!(out.target.url(), B);
        assert!(out.provenance.has_flag(|f| matches!(
            f,
            ProvenanceFlag::DuplicateSuspectedUnresolved { .. }
        )));
    }
}
