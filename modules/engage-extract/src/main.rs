use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engage_common::{
    AuthContext, ContentRecord, ContentTarget, Credentials, EngineConfig, ExtractionFailure,
    Platform,
};
use engage_extract::{EngineDeps, ExtractionEngine};

/// Extract engagement metadata for post URLs and print one JSON line per URL.
#[derive(Parser, Debug)]
#[command(name = "engage-extract", version)]
struct Args {
    /// Post URLs (YouTube, Instagram, Facebook, Dcard, Xiaohongshu).
    #[arg(required = true)]
    urls: Vec<String>,

    /// Session token for a platform, as `platform=token` (e.g. `note=abc123`).
    #[arg(long = "token", value_parser = parse_token)]
    tokens: Vec<(Platform, String)>,
}

fn parse_token(raw: &str) -> Result<(Platform, String), String> {
    let (name, token) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected platform=token, got {raw:?}"))?;
    let platform = Platform::ALL
        .into_iter()
        .find(|p| p.as_str() == name)
        .ok_or_else(|| format!("unknown platform {name:?}"))?;
    Ok((platform, token.to_string()))
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Line<'a> {
    Record { url: &'a str, record: ContentRecord },
    Failure { url: &'a str, failure: ExtractionFailure },
    Invalid { url: &'a str, error: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("engage=info".parse()?))
        .init();

    let args = Args::parse();

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    config.log_redacted();

    let credentials = args
        .tokens
        .into_iter()
        .fold(Credentials::new(), |creds, (platform, token)| {
            creds.with(platform, AuthContext::SessionToken(token))
        });

    // Invalid URLs are reported in place; only valid ones reach the engine.
    let parsed: Vec<(&str, Result<ContentTarget, String>)> = args
        .urls
        .iter()
        .map(|url| (url.as_str(), ContentTarget::from_url(url).map_err(|e| e.to_string())))
        .collect();
    let targets: Vec<ContentTarget> = parsed
        .iter()
        .filter_map(|(_, t)| t.as_ref().ok().cloned())
        .collect();

    let engine = ExtractionEngine::new(EngineDeps::from_config(config, credentials));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling batch");
            on_ctrl_c.cancel();
        }
    });

    info!(targets = targets.len(), "Starting extraction");
    let mut results = engine.extract_batch(&targets, cancel).await.into_iter();
    engine.shutdown().await;

    for (url, target) in &parsed {
        let url = *url;
        let line = match target {
            Err(error) => Line::Invalid {
                url,
                error: error.clone(),
            },
            Ok(_) => match results.next() {
                Some(Ok(record)) => Line::Record { url, record },
                Some(Err(failure)) => Line::Failure { url, failure },
                None => break,
            },
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    Ok(())
}
