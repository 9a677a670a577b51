//! Session guard, escalation, login and pacing as seen through the engine.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use engage_common::{
    AuthContext, ContentTarget, EngineConfig, ExtractionCandidate, FailureReason, Field,
    FieldValue, Platform, ProvenanceFlag, Tier,
};
use engage_extract::testing::{
    MockBrowser, MockLogin, MockMetadataTool, MockWebClient, ScriptedStrategy,
};
use engage_extract::traits::{AuthHandshake, BrowserProvider};
use engage_extract::{EngineDeps, ExtractionEngine, SourceStrategy, TierError, TierSpec};

const POST_1: &str = "https://www.instagram.com/p/POST1/";
const POST_2: &str = "https://www.instagram.com/p/POST2/";
const POST_3: &str = "https://www.instagram.com/p/POST3/";

fn unpaced_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    for settings in config.platforms.values_mut() {
        settings.min_request_interval = Duration::ZERO;
    }
    config
}

/// Session tier reads `likes=N` from the rendered page; a challenge page is Blocked.
/// The fallback tier always works.
fn photo_strategy() -> ScriptedStrategy {
    let session = TierSpec::session(Tier::Rendered, "session-dom");
    let fallback = TierSpec::fallback(Tier::Pattern, "embed");
    ScriptedStrategy::new(Platform::Photo)
        .tier(session, move |_, cx| {
            let html = cx.rendered_html()?;
            if html.contains("challenge") {
                return Err(TierError::failure(FailureReason::Blocked, "challenge page"));
            }
            let likes = html
                .split("likes=")
                .nth(1)
                .and_then(|rest| rest.split('<').next())
                .unwrap_or_default()
                .to_string();
            Ok(vec![
                ExtractionCandidate::new(Field::Author, "photographer", session.tier, session.name),
                ExtractionCandidate::new(
                    Field::LikeCount,
                    engage_common::RawValue::Count(likes),
                    session.tier,
                    session.name,
                ),
            ])
        })
        .tier(fallback, move |target, _| {
            let likes = match target.identifier() {
                Some("POST3") => 33i64,
                _ => 1i64,
            };
            Ok(vec![
                ExtractionCandidate::new(Field::Author, "photographer", fallback.tier, fallback.name),
                ExtractionCandidate::new(Field::LikeCount, likes, fallback.tier, fallback.name),
            ])
        })
}

fn engine(browser: Arc<MockBrowser>, strategy: Arc<ScriptedStrategy>) -> ExtractionEngine {
    ExtractionEngine::new(
        EngineDeps::builder()
            .web(Arc::new(MockWebClient::new()))
            .metadata(Arc::new(MockMetadataTool::new()))
            .browser(Some(browser as Arc<dyn BrowserProvider>))
            .config(unpaced_config())
            .strategies(vec![strategy as Arc<dyn SourceStrategy>])
            .build(),
    )
}

#[tokio::test]
async fn stale_render_is_reloaded_and_flagged() {
    let browser = Arc::new(
        MockBrowser::new()
            .on_render(POST_1, POST_1, "<p>POST1 likes=270</p>")
            .on_render(POST_2, POST_1, "<p>POST1 likes=270</p>")
            .on_render(POST_2, POST_2, "<p>POST2 likes=41</p>"),
    );
    let engine = engine(browser.clone(), Arc::new(photo_strategy()));

    let first = engine
        .extract(&ContentTarget::new(Platform::Photo, POST_1))
        .await
        .unwrap();
    let second = engine
        .extract(&ContentTarget::new(Platform::Photo, POST_2))
        .await
        .unwrap();

    assert_eq!(first.likes, FieldValue::Available(270));
    assert!(first.provenance.flags.is_empty());
    assert_eq!(second.likes, FieldValue::Available(41));
    assert_eq!(second.provenance.flags, vec![ProvenanceFlag::SessionReloaded]);

    let log = browser.log();
    assert_eq!(log.renders.len(), 3);
    assert_eq!(log.clears, 3, "state is cleared before every render");
    assert_eq!(log.blanks, 3);
    assert_eq!(log.opened.len(), 1);
}

#[tokio::test]
async fn persistent_mismatch_surfaces_blocked() {
    let browser = Arc::new(MockBrowser::new().on_render(POST_2, POST_1, "<p>POST1 likes=270</p>"));
    let engine = engine(browser.clone(), Arc::new(photo_strategy()));

    let err = engine
        .extract(&ContentTarget::new(Platform::Photo, POST_2))
        .await
        .unwrap_err();

    assert_eq!(err.reason, FailureReason::Blocked);
    assert_eq!(browser.log().renders.len(), 2, "exactly one reload");
}

#[tokio::test]
async fn two_consecutive_blocks_escalate_to_fallback() {
    let browser = Arc::new(
        MockBrowser::new()
            .on_render(POST_1, POST_1, "<p>POST1 challenge</p>")
            .on_render(POST_2, POST_2, "<p>POST2 challenge</p>"),
    );
    let strategy = Arc::new(photo_strategy());
    let engine = engine(browser.clone(), strategy.clone());

    for url in [POST_1, POST_2] {
        let err = engine
            .extract(&ContentTarget::new(Platform::Photo, url))
            .await
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::Blocked);
    }
    assert!(engine.is_escalated(Platform::Photo));

    let record = engine
        .extract(&ContentTarget::new(Platform::Photo, POST_3))
        .await
        .unwrap();

    assert_eq!(record.likes, FieldValue::Available(33));
    assert!(record.provenance.flags.contains(&ProvenanceFlag::Escalated));
    assert_eq!(browser.log().renders.len(), 2, "escalated targets skip the session");
    let tiers: Vec<usize> = strategy.attempts().into_iter().map(|(_, i)| i).collect();
    assert_eq!(tiers, vec![0, 0, 1]);
}

#[tokio::test]
async fn login_runs_once_and_token_is_reused() {
    let login = Arc::new(MockLogin::succeeding(Platform::Note, "tok-123"));
    let spec = TierSpec::direct(Tier::Embedded, "initial-state");
    let strategy = ScriptedStrategy::new(Platform::Note).tier(spec, move |target, cx| {
        assert_eq!(cx.auth, AuthContext::SessionToken("tok-123".into()));
        let likes = if target.url().ends_with('1') { 10i64 } else { 20i64 };
        Ok(vec![
            ExtractionCandidate::new(Field::Author, "note-author", spec.tier, spec.name),
            ExtractionCandidate::new(Field::LikeCount, likes, spec.tier, spec.name),
        ])
    });
    let engine = ExtractionEngine::new(
        EngineDeps::builder()
            .web(Arc::new(MockWebClient::new()))
            .metadata(Arc::new(MockMetadataTool::new()))
            .login(Some(login.clone() as Arc<dyn AuthHandshake>))
            .config(unpaced_config())
            .strategies(vec![Arc::new(strategy) as Arc<dyn SourceStrategy>])
            .build(),
    );

    let targets = vec![
        ContentTarget::new(
            Platform::Note,
            "https://www.xiaohongshu.com/explore/aaaaaaaaaaaaaaaaaaaaaaa1",
        ),
        ContentTarget::new(
            Platform::Note,
            "https://www.xiaohongshu.com/explore/aaaaaaaaaaaaaaaaaaaaaaa2",
        ),
    ];
    let results = engine.extract_batch(&targets, CancellationToken::new()).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(login.calls(), 1);
}

#[tokio::test]
async fn failed_login_degrades_without_aborting() {
    let login = Arc::new(MockLogin::failing(Platform::Note));
    let spec = TierSpec::direct(Tier::Pattern, "interact-regex");
    let strategy = ScriptedStrategy::new(Platform::Note).tier(spec, move |_, cx| {
        assert!(cx.auth.is_none());
        Ok(vec![
            ExtractionCandidate::new(Field::Author, "note-author", spec.tier, spec.name),
            ExtractionCandidate::new(Field::CommentCount, 2i64, spec.tier, spec.name),
        ])
    });
    let engine = ExtractionEngine::new(
        EngineDeps::builder()
            .web(Arc::new(MockWebClient::new()))
            .metadata(Arc::new(MockMetadataTool::new()))
            .login(Some(login.clone() as Arc<dyn AuthHandshake>))
            .config(unpaced_config())
            .strategies(vec![Arc::new(strategy) as Arc<dyn SourceStrategy>])
            .build(),
    );

    let record = engine
        .extract(&ContentTarget::new(
            Platform::Note,
            "https://www.xiaohongshu.com/explore/bbbbbbbbbbbbbbbbbbbbbbbb",
        ))
        .await
        .unwrap();

    assert_eq!(record.comments, FieldValue::Available(2));
    assert_eq!(login.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_platform_is_paced_by_its_own_delay() {
    let spec = TierSpec::direct(Tier::Primary, "api-v2");
    let strategy = ScriptedStrategy::new(Platform::Forum).tier(spec, move |target, _| {
        let likes = if target.url().ends_with('1') { 5i64 } else { 6i64 };
        Ok(vec![
            ExtractionCandidate::new(Field::Author, "NTU", spec.tier, spec.name),
            ExtractionCandidate::new(Field::LikeCount, likes, spec.tier, spec.name),
        ])
    });
    let mut config = EngineConfig::default();
    config
        .platforms
        .get_mut(&Platform::Forum)
        .unwrap()
        .min_request_interval = Duration::from_secs(8);
    let engine = ExtractionEngine::new(
        EngineDeps::builder()
            .web(Arc::new(MockWebClient::new()))
            .metadata(Arc::new(MockMetadataTool::new()))
            .config(config)
            .strategies(vec![Arc::new(strategy) as Arc<dyn SourceStrategy>])
            .build(),
    );

    let start = tokio::time::Instant::now();
    let targets = vec![
        ContentTarget::new(Platform::Forum, "https://www.dcard.tw/f/mood/p/2001"),
        ContentTarget::new(Platform::Forum, "https://www.dcard.tw/f/mood/p/2002"),
    ];
    let results = engine.extract_batch(&targets, CancellationToken::new()).await;

    assert!(results.iter().all(Result::is_ok));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(8), "paced: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(9), "paced once: {elapsed:?}");
}
