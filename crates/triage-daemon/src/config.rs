use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use triage::TriageConfig;

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Conversational triage daemon (JSON lines on stdio)", long_about = None)]
pub struct Args {
    /// TOML config file: triage policy at the top level, adapters under [daemon]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Protocol catalog TOML (overrides TRIAGE_CATALOG_PATH; built-in catalog if unset)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Responder roster TOML (overrides TRIAGE_ROSTER_PATH)
    #[arg(long)]
    pub roster: Option<PathBuf>,

    /// Append archived sessions, alerts and handoffs to this JSON-lines file
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// Sentiment scoring endpoint (overrides TRIAGE_SENTIMENT_URL; lexicon scorer if unset)
    #[arg(long)]
    pub sentiment_url: Option<String>,

    /// Emergency webhook (overrides TRIAGE_DISPATCH_WEBHOOK; log-only if unset)
    #[arg(long)]
    pub dispatch_webhook: Option<String>,

    /// Acknowledgement window in seconds (overrides TRIAGE_ACK_TIMEOUT_SECS)
    #[arg(long)]
    pub ack_timeout_secs: Option<u64>,

    /// Risk score that opens a crisis alert (overrides TRIAGE_ESCALATION_THRESHOLD)
    #[arg(long)]
    pub escalation_threshold: Option<u8>,

    /// Timeout for outbound HTTP calls in seconds
    #[arg(long)]
    pub http_timeout_secs: Option<u64>,

    /// Forward every published event to stdout, not only subscribed ones
    #[arg(long, default_value_t = false)]
    pub tap: bool,
}

/// `[daemon]` table of the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DaemonSection {
    catalog: Option<PathBuf>,
    roster: Option<PathBuf>,
    archive: Option<PathBuf>,
    sentiment_url: Option<String>,
    dispatch_webhook: Option<String>,
    http_timeout_secs: Option<u64>,
    tap: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    triage: TriageConfig,
    #[serde(default)]
    daemon: DaemonSection,
}

/// Fully resolved daemon configuration: file, then env, then CLI flags
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub triage: TriageConfig,
    pub catalog_path: Option<PathBuf>,
    pub roster_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub sentiment_url: Option<String>,
    pub dispatch_webhook: Option<String>,
    pub http_timeout: Duration,
    pub tap: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            triage: TriageConfig::default(),
            catalog_path: None,
            roster_path: None,
            archive_path: None,
            sentiment_url: None,
            dispatch_webhook: None,
            http_timeout: Duration::from_secs(10),
            tap: false,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl DaemonConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => Self::read_file(path)?,
            None => ConfigFile::default(),
        };

        let mut triage = file.triage;
        triage.apply_env();
        if let Some(secs) = args.ack_timeout_secs {
            triage.ack_timeout_secs = secs;
        }
        if let Some(threshold) = args.escalation_threshold {
            triage.escalation_threshold = threshold;
        }
        triage.validate().context("Invalid triage configuration")?;

        let daemon = file.daemon;
        let http_timeout_secs = args
            .http_timeout_secs
            .or_else(|| env_var("TRIAGE_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()))
            .or(daemon.http_timeout_secs)
            .unwrap_or(10);

        Ok(Self {
            triage,
            catalog_path: args
                .catalog
                .or_else(|| env_var("TRIAGE_CATALOG_PATH").map(PathBuf::from))
                .or(daemon.catalog),
            roster_path: args
                .roster
                .or_else(|| env_var("TRIAGE_ROSTER_PATH").map(PathBuf::from))
                .or(daemon.roster),
            archive_path: args
                .archive
                .or_else(|| env_var("TRIAGE_ARCHIVE_PATH").map(PathBuf::from))
                .or(daemon.archive),
            sentiment_url: args
                .sentiment_url
                .or_else(|| env_var("TRIAGE_SENTIMENT_URL"))
                .or(daemon.sentiment_url),
            dispatch_webhook: args
                .dispatch_webhook
                .or_else(|| env_var("TRIAGE_DISPATCH_WEBHOOK"))
                .or(daemon.dispatch_webhook),
            http_timeout: Duration::from_secs(http_timeout_secs.max(1)),
            tap: args.tap || daemon.tap,
        })
    }

    fn read_file(path: &Path) -> Result<ConfigFile> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
