//! Extraction engine: canonicalize, pace, authenticate, walk a platform's tiers,
//! reconcile, then check the result against recent records by the same author.
//!
//! One `ExtractionEngine` serves a whole batch. Each platform gets its own pacer,
//! block tracker, worker limit and (when a browser is configured) session pool.
//! Nothing that fails for one target ever aborts the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use apify_client::ApifyClient;
use browserless_client::BrowserlessClient;
use engage_common::{
    AuthContext, ContentRecord, ContentTarget, Credentials, EngineConfig, ExtractionCandidate,
    ExtractionFailure, FailureReason, Platform, PlatformSettings, ProvenanceFlag,
};

use crate::clients::{BrowserLoginHandshake, BrowserlessBrowser, HttpWebClient, YtDlp};
use crate::duplicate::DuplicateAuthorGuard;
use crate::error::TierError;
use crate::reconcile::{has_usable, Reconciler};
use crate::router::{self, Canonical};
use crate::services::{
    DcardStrategy, FacebookStrategy, InstagramStrategy, XiaohongshuStrategy, YoutubeStrategy,
};
use crate::session::SessionPool;
use crate::strategy::{SourceStrategy, TierContext, TierMode};
use crate::throttle::{BlockTracker, Pacer};
use crate::traits::{AuthHandshake, BrowserProvider, MetadataTool, PostScraper, WebClient};

/// Timeout for plain HTTP requests made by the production web client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the engine talks to. Collaborators left unset disable the tiers
/// that need them; they never fail a target on their own.
#[derive(Clone, TypedBuilder)]
pub struct EngineDeps {
    pub web: Arc<dyn WebClient>,
    pub metadata: Arc<dyn MetadataTool>,
    #[builder(default)]
    pub scraper: Option<Arc<dyn PostScraper>>,
    #[builder(default)]
    pub browser: Option<Arc<dyn BrowserProvider>>,
    #[builder(default)]
    pub login: Option<Arc<dyn AuthHandshake>>,
    #[builder(default)]
    pub credentials: Credentials,
    #[builder(default)]
    pub config: EngineConfig,
    /// Replace the built-in strategy for a platform.
    #[builder(default)]
    pub strategies: Vec<Arc<dyn SourceStrategy>>,
}

impl EngineDeps {
    /// Production clients for whatever `config` has credentials for.
    pub fn from_config(config: EngineConfig, credentials: Credentials) -> Self {
        let web: Arc<dyn WebClient> = Arc::new(HttpWebClient::new(HTTP_TIMEOUT));
        let metadata: Arc<dyn MetadataTool> = Arc::new(YtDlp::new(
            config.ytdlp_bin.clone(),
            config.settings(Platform::Video).tier_timeout,
        ));
        let scraper = config
            .apify_api_token
            .clone()
            .map(|token| Arc::new(ApifyClient::new(token)) as Arc<dyn PostScraper>);
        let browserless = config.browserless_url.as_deref().map(|url| {
            Arc::new(BrowserlessClient::new(
                url,
                config.browserless_token.as_deref(),
            ))
        });
        let browser = browserless
            .clone()
            .map(|client| Arc::new(BrowserlessBrowser::new(client)) as Arc<dyn BrowserProvider>);
        let login = browserless.map(|client| {
            Arc::new(BrowserLoginHandshake::xiaohongshu(client, config.login_timeout))
                as Arc<dyn AuthHandshake>
        });

        Self::builder()
            .web(web)
            .metadata(metadata)
            .scraper(scraper)
            .browser(browser)
            .login(login)
            .credentials(credentials)
            .config(config)
            .build()
    }
}

/// Per-platform state shared by every target of that platform.
struct PlatformRuntime {
    strategy: Arc<dyn SourceStrategy>,
    settings: PlatformSettings,
    pacer: Pacer,
    blocks: BlockTracker,
    workers: Semaphore,
    sessions: Option<SessionPool>,
    reconciler: Reconciler,
}

/// What one walk over a platform's tiers produced.
struct TierWalk {
    candidates: Vec<ExtractionCandidate>,
    errors: Vec<FailureReason>,
    satisfied: bool,
    reloaded: bool,
}

pub struct ExtractionEngine {
    web: Arc<dyn WebClient>,
    platforms: BTreeMap<Platform, PlatformRuntime>,
    credentials: Credentials,
    login: Option<Arc<dyn AuthHandshake>>,
    login_result: OnceCell<Option<AuthContext>>,
    duplicates: DuplicateAuthorGuard,
    config: EngineConfig,
}

impl ExtractionEngine {
    pub fn new(deps: EngineDeps) -> Self {
        let EngineDeps {
            web,
            metadata,
            scraper,
            browser,
            login,
            credentials,
            config,
            strategies,
        } = deps;

        let mut platforms = BTreeMap::new();
        for platform in Platform::ALL {
            let strategy = strategies
                .iter()
                .find(|s| s.platform() == platform)
                .cloned()
                .unwrap_or_else(|| {
                    default_strategy(platform, &web, &metadata, scraper.as_ref())
                });
            let settings = config.settings(platform);
            let uses_sessions = strategy
                .tiers()
                .iter()
                .any(|spec| spec.mode == TierMode::Session);
            let sessions = browser
                .as_ref()
                .filter(|_| uses_sessions)
                .map(|b| SessionPool::new(platform, b.clone(), config.browser_sessions));

            platforms.insert(
                platform,
                PlatformRuntime {
                    pacer: Pacer::new(platform, settings.min_request_interval),
                    blocks: BlockTracker::new(platform, settings.escalate_after_blocks),
                    workers: Semaphore::new(settings.max_concurrency.max(1)),
                    reconciler: Reconciler::new(settings.ceilings, config.max_comments),
                    strategy,
                    sessions,
                    settings,
                },
            );
        }

        info!(
            browser = browser.is_some(),
            scraper = scraper.is_some(),
            login = login.is_some(),
            "Extraction engine ready"
        );

        Self {
            web,
            platforms,
            credentials,
            login,
            login_result: OnceCell::new(),
            duplicates: DuplicateAuthorGuard::new(
                config.recent_log_capacity,
                config.duplicate_retry_delay,
            ),
            config,
        }
    }

    /// Extract one target: the full pipeline plus the duplicate-author check.
    pub async fn extract(&self, target: &ContentTarget) -> Result<ContentRecord, ExtractionFailure> {
        let record = self.extract_once(target).await?;
        Ok(self
            .duplicates
            .check_and_retry(record, || self.extract_once(target))
            .await)
    }

    /// Extract every target, honoring per-platform worker limits. Results come
    /// back in input order. Cancelling `cancel` fails unfinished targets with
    /// `Cancelled` and releases every browser session.
    pub async fn extract_batch(
        &self,
        targets: &[ContentTarget],
        cancel: CancellationToken,
    ) -> Vec<Result<ContentRecord, ExtractionFailure>> {
        info!(targets = targets.len(), "Batch started");
        let parallelism: usize = self
            .platforms
            .values()
            .map(|rt| rt.settings.max_concurrency.max(1))
            .sum();

        let jobs = targets.iter().enumerate().map(|(index, target)| {
            let cancel = cancel.clone();
            async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(cancelled(target)),
                    result = self.extract_with_permit(target) => result,
                };
                (index, outcome)
            }
        });

        let mut slots: Vec<Option<Result<ContentRecord, ExtractionFailure>>> =
            (0..targets.len()).map(|_| None).collect();
        let mut completed = stream::iter(jobs).buffer_unordered(parallelism.max(1));
        while let Some((index, outcome)) = completed.next().await {
            slots[index] = Some(outcome);
        }
        drop(completed);

        if cancel.is_cancelled() {
            warn!("Batch cancelled, releasing browser sessions");
            self.release_sessions().await;
        }
        self.duplicates.reset().await;

        let results: Vec<_> = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| slot.unwrap_or_else(|| Err(cancelled(target))))
            .collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            targets = targets.len(),
            failed,
            "Batch finished"
        );
        results
    }

    /// Release every automated-browser session.
    pub async fn shutdown(&self) {
        self.release_sessions().await;
        info!("Extraction engine shut down");
    }

    /// Whether `platform` has switched to its non-session fallback.
    pub fn is_escalated(&self, platform: Platform) -> bool {
        self.platforms
            .get(&platform)
            .is_some_and(|rt| rt.blocks.is_escalated())
    }

    async fn release_sessions(&self) {
        for runtime in self.platforms.values() {
            if let Some(pool) = &runtime.sessions {
                pool.release_all().await;
            }
        }
    }

    async fn extract_with_permit(
        &self,
        target: &ContentTarget,
    ) -> Result<ContentRecord, ExtractionFailure> {
        let runtime = self.runtime(target)?;
        let _permit = runtime.workers.acquire().await.map_err(|_| {
            ExtractionFailure::new(
                target.platform(),
                target.url(),
                FailureReason::Cancelled,
                "worker pool closed",
            )
        })?;
        self.extract(target).await
    }

    fn runtime(&self, target: &ContentTarget) -> Result<&PlatformRuntime, ExtractionFailure> {
        self.platforms.get(&target.platform()).ok_or_else(|| {
            ExtractionFailure::new(
                target.platform(),
                target.url(),
                FailureReason::MalformedResponse,
                "no strategy registered for platform",
            )
        })
    }

    /// One pass of the pipeline, without the duplicate-author check.
    async fn extract_once(
        &self,
        target: &ContentTarget,
    ) -> Result<ContentRecord, ExtractionFailure> {
        let runtime = self.runtime(target)?;
        let target = self.canonicalize(runtime, target).await?;
        runtime.pacer.wait().await;

        let escalated = runtime.blocks.is_escalated();
        let auth = self.auth_for(target.platform()).await;
        let mut cx = TierContext::new(auth, self.config.max_comments);

        info!(
            platform = %target.platform(),
            url = target.url(),
            escalated,
            "Extracting"
        );
        let walk = self.walk_tiers(runtime, &target, &mut cx, escalated).await;

        let blocked = walk
            .errors
            .iter()
            .any(|r| matches!(r, FailureReason::Blocked | FailureReason::RateLimited));
        if walk.satisfied {
            runtime.blocks.record_ok();
        } else if blocked {
            runtime.blocks.record_blocked();
        }

        let mut record = runtime.reconciler.reconcile(&target, &walk.candidates);
        if walk.reloaded {
            record.provenance.flags.push(ProvenanceFlag::SessionReloaded);
        }
        if escalated {
            record.provenance.flags.push(ProvenanceFlag::Escalated);
        }

        if !has_usable(&record) {
            let reason = most_specific(&walk.errors);
            warn!(
                platform = %target.platform(),
                url = target.url(),
                reason = %reason,
                candidates = walk.candidates.len(),
                "No usable record"
            );
            return Err(ExtractionFailure::new(
                target.platform(),
                target.url(),
                reason,
                format!("no tier produced an author or a metric ({} candidates)", walk.candidates.len()),
            ));
        }

        info!(
            platform = %target.platform(),
            url = target.url(),
            fields = record.provenance.fields.len(),
            unresolved = record.provenance.unresolved.len(),
            "Extracted"
        );
        Ok(record)
    }

    async fn walk_tiers(
        &self,
        runtime: &PlatformRuntime,
        target: &ContentTarget,
        cx: &mut TierContext,
        escalated: bool,
    ) -> TierWalk {
        let strategy = runtime.strategy.as_ref();
        let timeout = runtime.settings.tier_timeout;
        let mut walk = TierWalk {
            candidates: Vec::new(),
            errors: Vec::new(),
            satisfied: false,
            reloaded: false,
        };
        let mut render_attempted = false;

        for (index, spec) in strategy.tiers().iter().enumerate() {
            match spec.mode {
                TierMode::Fallback if !escalated => continue,
                TierMode::Session if escalated => continue,
                TierMode::Session if !render_attempted => {
                    render_attempted = true;
                    match tokio::time::timeout(timeout, self.render(runtime, target, cx)).await {
                        Ok(Ok(reloaded)) => walk.reloaded = reloaded,
                        Ok(Err(e)) => {
                            log_tier_error(target, spec.name, &e);
                            walk.errors.extend(e.reason());
                        }
                        Err(_) => {
                            warn!(url = target.url(), tier = spec.name, "Session render timed out");
                            walk.errors.push(FailureReason::Timeout);
                        }
                    }
                }
                _ => {}
            }

            cx.deadline = Some(tokio::time::Instant::now() + timeout);
            let attempt = tokio::time::timeout(timeout, strategy.attempt(target, index, cx)).await;
            match attempt {
                Ok(Ok(found)) => {
                    debug!(
                        url = target.url(),
                        tier = spec.name,
                        candidates = found.len(),
                        "Tier produced candidates"
                    );
                    walk.candidates.extend(found);
                }
                Ok(Err(TierError::Exhausted(_))) => break,
                Ok(Err(e)) => {
                    log_tier_error(target, spec.name, &e);
                    walk.errors.extend(e.reason());
                }
                Err(_) => {
                    warn!(url = target.url(), tier = spec.name, timeout_secs = timeout.as_secs(), "Tier timed out");
                    walk.errors.push(FailureReason::Timeout);
                }
            }

            if runtime.reconciler.satisfies_mandatory(&walk.candidates) {
                walk.satisfied = true;
                break;
            }
        }

        walk
    }

    /// Render the target through a guarded session and stash the page for the
    /// session tiers. Returns whether the guard had to reload.
    async fn render(
        &self,
        runtime: &PlatformRuntime,
        target: &ContentTarget,
        cx: &mut TierContext,
    ) -> Result<bool, TierError> {
        let pool = runtime
            .sessions
            .as_ref()
            .ok_or(TierError::Skipped("no browser configured"))?;
        let mut lease = pool.lease().await?;
        let render_url = runtime.strategy.render_url(target);
        let outcome = lease
            .session()
            .guarded(target, &render_url, runtime.strategy.session_origins(), &cx.auth)
            .await?;
        cx.rendered = Some(outcome.page);
        Ok(outcome.reloaded)
    }

    /// Canonical target with its identifier. Short links are resolved first;
    /// a redirect chain that cannot be followed is Blocked.
    async fn canonicalize(
        &self,
        runtime: &PlatformRuntime,
        target: &ContentTarget,
    ) -> Result<ContentTarget, ExtractionFailure> {
        let platform = target.platform();
        let fail = |reason, message: String| {
            ExtractionFailure::new(platform, target.url(), reason, message)
        };

        match router::canonicalize(platform, target.url()) {
            Canonical::Ready { url, identifier } => {
                Ok(ContentTarget::new(platform, url).with_identifier(identifier))
            }
            Canonical::Unrecognized => Err(fail(
                FailureReason::NotFound,
                "URL does not address a single item".to_string(),
            )),
            Canonical::NeedsRedirect => {
                let resolved = self
                    .web
                    .resolve_redirects(target.url(), runtime.settings.max_redirect_hops)
                    .await
                    .map_err(|e| fail(FailureReason::Blocked, format!("redirect resolution failed: {e}")))?;
                debug!(from = target.url(), to = %resolved, "Short link resolved");
                router::canonical_target(platform, &resolved).ok_or_else(|| {
                    fail(
                        FailureReason::Blocked,
                        format!("short link landed on {resolved}"),
                    )
                })
            }
        }
    }

    /// Caller-supplied credentials win. Otherwise the platform's login
    /// handshake runs once per engine; a failed login means no auth.
    async fn auth_for(&self, platform: Platform) -> AuthContext {
        let supplied = self.credentials.get(platform);
        if !supplied.is_none() {
            return supplied;
        }
        let Some(login) = self.login.as_ref().filter(|l| l.platform() == platform) else {
            return AuthContext::None;
        };

        self.login_result
            .get_or_init(|| async {
                match login.login().await {
                    Ok(auth) => {
                        info!(platform = %platform, "Login handshake succeeded");
                        Some(auth)
                    }
                    Err(e) => {
                        warn!(platform = %platform, error = %e, "Login handshake failed, continuing without a session");
                        None
                    }
                }
            })
            .await
            .clone()
            .unwrap_or_default()
    }
}

fn default_strategy(
    platform: Platform,
    web: &Arc<dyn WebClient>,
    metadata: &Arc<dyn MetadataTool>,
    scraper: Option<&Arc<dyn PostScraper>>,
) -> Arc<dyn SourceStrategy> {
    match platform {
        Platform::Video => Arc::new(YoutubeStrategy::new(metadata.clone(), web.clone())),
        Platform::Photo => Arc::new(InstagramStrategy::new(scraper.cloned(), web.clone())),
        Platform::Social => Arc::new(FacebookStrategy::new(scraper.cloned(), web.clone())),
        Platform::Forum => Arc::new(DcardStrategy::new(web.clone())),
        Platform::Note => Arc::new(XiaohongshuStrategy::new(web.clone())),
    }
}

fn log_tier_error(target: &ContentTarget, tier: &str, err: &TierError) {
    match err {
        TierError::Skipped(why) => debug!(url = target.url(), tier, why, "Tier skipped"),
        _ => warn!(url = target.url(), tier, error = %err, "Tier failed"),
    }
}

/// The most specific reason recorded, or MalformedResponse when tiers ran
/// without a definite failure.
fn most_specific(errors: &[FailureReason]) -> FailureReason {
    errors
        .iter()
        .copied()
        .max_by_key(FailureReason::specificity)
        .unwrap_or(FailureReason::MalformedResponse)
}

fn cancelled(target: &ContentTarget) -> ExtractionFailure {
    ExtractionFailure::new(
        target.platform(),
        target.url(),
        FailureReason::Cancelled,
        "batch cancelled",
    )
}
