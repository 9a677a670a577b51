// Session integrity: every render through a reused browser profile starts from
// wiped storage and a blank page, and the rendered page must be the requested item.
//
// GuardedSession: one live session plus its fingerprint
// SessionPool: per-platform pool; one in-flight target per session

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use engage_common::{AuthContext, ContentTarget, FailureReason, Platform, SessionFingerprint};

use crate::error::TierError;
use crate::router::identifier_from_url;
use crate::traits::{BrowserProvider, BrowserSession, RenderedPage};

/// A page that passed the identity check.
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    pub page: RenderedPage,
    /// The first render did not match and the page had to be loaded again.
    pub reloaded: bool,
}

pub struct GuardedSession {
    platform: Platform,
    session: Box<dyn BrowserSession>,
    fingerprint: SessionFingerprint,
}

impl GuardedSession {
    pub fn new(platform: Platform, session: Box<dyn BrowserSession>) -> Self {
        Self {
            platform,
            session,
            fingerprint: SessionFingerprint::default(),
        }
    }

    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn fingerprint(&self) -> &SessionFingerprint {
        &self.fingerprint
    }

    /// Render `render_url` for `target` with a clean slate. A page that shows a
    /// different item is reset and loaded once more; a second mismatch is Blocked.
    pub async fn guarded(
        &mut self,
        target: &ContentTarget,
        render_url: &str,
        origins: &[&str],
        auth: &AuthContext,
    ) -> Result<GuardOutcome, TierError> {
        self.fingerprint.last_requested = target.identifier().map(str::to_string);

        for attempt in 0..2 {
            self.reset(origins).await?;
            let page = self.session.render(render_url, auth).await?;
            let rendered = identifier_from_url(self.platform, &page.final_url);
            self.fingerprint.last_rendered = rendered.clone();

            if self.shows_target(target, rendered.as_deref(), &page.html) {
                if attempt > 0 {
                    info!(
                        session = self.session.id(),
                        url = target.url(),
                        "Session matched target after reload"
                    );
                }
                return Ok(GuardOutcome {
                    page,
                    reloaded: attempt > 0,
                });
            }

            warn!(
                session = self.session.id(),
                url = target.url(),
                expected = ?target.identifier(),
                rendered = ?rendered,
                final_url = %page.final_url,
                attempt,
                "Rendered page does not match requested target"
            );
        }

        Err(TierError::failure(
            FailureReason::Blocked,
            format!(
                "session {} kept rendering another item for {}",
                self.session.id(),
                target.url()
            ),
        ))
    }

    /// Wipe browser-local state and park on a blank page. Starts a new epoch.
    async fn reset(&mut self, origins: &[&str]) -> Result<(), TierError> {
        self.session.clear_state(origins).await?;
        self.session.navigate_blank().await?;
        self.fingerprint.epoch += 1;
        debug!(
            session = self.session.id(),
            epoch = self.fingerprint.epoch,
            "Session state reset"
        );
        Ok(())
    }

    /// The final URL names the target, or the page body carries the target's
    /// identifier (client-side routes, Facebook's numeric-to-pfbid redirects).
    fn shows_target(&self, target: &ContentTarget, rendered: Option<&str>, html: &str) -> bool {
        let Some(expected) = target.identifier() else {
            return true;
        };
        rendered == Some(expected) || html.contains(expected)
    }

    async fn release(&self) {
        if let Err(e) = self.session.release().await {
            warn!(session = self.session.id(), error = %e, "Failed to release browser session");
        }
    }
}

/// Sessions for one platform. Opened lazily up to `capacity`; a leased session
/// serves exactly one target at a time.
pub struct SessionPool {
    platform: Platform,
    provider: Arc<dyn BrowserProvider>,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<GuardedSession>>>,
    opened: Mutex<usize>,
}

impl SessionPool {
    pub fn new(platform: Platform, provider: Arc<dyn BrowserProvider>, capacity: usize) -> Self {
        Self {
            platform,
            provider,
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
            opened: Mutex::new(0),
        }
    }

    /// Wait for a free session. The lease returns it to the pool on drop.
    pub async fn lease(&self) -> Result<SessionLease, TierError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TierError::Skipped("session pool closed"))?;

        let reused = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let session = match reused {
            Some(session) => session,
            None => {
                let slot = {
                    let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
                    *opened += 1;
                    *opened - 1
                };
                info!(platform = %self.platform, slot, "Opening browser session");
                GuardedSession::new(self.platform, self.provider.open(self.platform, slot))
            }
        };

        Ok(SessionLease {
            session: Some(session),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }

    /// Release every idle session. Leased sessions are released once returned
    /// and this is called again.
    pub async fn release_all(&self) {
        let sessions: Vec<GuardedSession> =
            std::mem::take(&mut *self.idle.lock().unwrap_or_else(|e| e.into_inner()));
        for session in &sessions {
            session.release().await;
        }
        if !sessions.is_empty() {
            info!(platform = %self.platform, released = sessions.len(), "Browser sessions released");
        }
    }
}

pub struct SessionLease {
    session: Option<GuardedSession>,
    idle: Arc<Mutex<Vec<GuardedSession>>>,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    pub fn session(&mut self) -> &mut GuardedSession {
        self.session
            .as_mut()
            .unwrap_or_else(|| unreachable!("session is only taken on drop"))
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.idle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBrowser;

    const IG_POST: &str = "https://www.instagram.com/p/AAA111/";

    fn target() -> ContentTarget {
        ContentTarget::new(Platform::Photo, IG_POST).with_identifier("AAA111")
    }

    fn session(browser: &MockBrowser) -> GuardedSession {
        GuardedSession::new(Platform::Photo, browser.open(Platform::Photo, 0))
    }

    #[tokio::test]
    async fn clears_state_before_rendering() {
        let browser = MockBrowser::new().on_render(IG_POST, IG_POST, "<html>AAA111</html>");
        let mut guarded = session(&browser);

        let outcome = guarded
            .guarded(&target(), IG_POST, &["https://www.instagram.com"], &AuthContext::None)
            .await
            .unwrap();

        assert!(!outcome.reloaded);
        let log = browser.log();
        assert_eq!(log.clears, 1);
        assert_eq!(log.blanks, 1);
        assert_eq!(log.renders, vec![IG_POST.to_string()]);
        assert_eq!(guarded.fingerprint().epoch, 1);
        assert_eq!(guarded.fingerprint().last_rendered.as_deref(), Some("AAA111"));
    }

    #[tokio::test]
    async fn mismatch_reloads_exactly_once() {
        let stale = "https://www.instagram.com/p/ZZZ999/";
        let browser = MockBrowser::new()
            .on_render(IG_POST, stale, "<html>ZZZ999</html>")
            .on_render(IG_POST, IG_POST, "<html>AAA111</html>");
        let mut guarded = session(&browser);

        let outcome = guarded
            .guarded(&target(), IG_POST, &[], &AuthContext::None)
            .await
            .unwrap();

        assert!(outcome.reloaded);
        assert_eq!(outcome.page.final_url, IG_POST);
        let log = browser.log();
        assert_eq!(log.renders.len(), 2);
        assert_eq!(log.clears, 2);
        assert_eq!(guarded.fingerprint().epoch, 2);
    }

    #[tokio::test]
    async fn persistent_mismatch_is_blocked() {
        let stale = "https://www.instagram.com/p/ZZZ999/";
        let browser = MockBrowser::new().on_render(IG_POST, stale, "<html>ZZZ999</html>");
        let mut guarded = session(&browser);

        let err = guarded
            .guarded(&target(), IG_POST, &[], &AuthContext::None)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), Some(FailureReason::Blocked));
        assert_eq!(browser.log().renders.len(), 2);
    }

    #[tokio::test]
    async fn url_without_identifier_falls_back_to_page_body() {
        let browser = MockBrowser::new().on_render(
            IG_POST,
            "https://www.instagram.com/",
            r#"<script>{"shortcode":"AAA111"}</script>"#,
        );
        let mut guarded = session(&browser);

        let outcome = guarded
            .guarded(&target(), IG_POST, &[], &AuthContext::None)
            .await;

        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn pool_reuses_returned_sessions() {
        let browser = Arc::new(MockBrowser::new());
        let pool = SessionPool::new(Platform::Note, browser.clone(), 1);

        let first_id = {
            let mut lease = pool.lease().await.unwrap();
            lease.session().id().to_string()
        };
        let mut lease = pool.lease().await.unwrap();
        assert_eq!(lease.session().id(), first_id);
        drop(lease);

        pool.release_all().await;
        let log = browser.log();
        assert_eq!(log.opened, vec!["note-0".to_string()]);
        assert_eq!(log.releases, 1);
    }

    #[tokio::test]
    async fn pool_serializes_targets_per_session() {
        let browser = Arc::new(MockBrowser::new());
        let pool = SessionPool::new(Platform::Photo, browser, 1);

        let held = pool.lease().await.unwrap();
        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), pool.lease()).await;
        assert!(waiting.is_err(), "second lease must wait for the first");
        drop(held);
        assert!(pool.lease().await.is_ok());
    }
}
