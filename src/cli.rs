//! Command-line interface definitions for the finance digest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Secrets and endpoints can be provided via environment variables; every
//! tunable has a flag with the production default.

use crate::api::{DEFAULT_API_BASE, DEFAULT_MODEL};
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the finance digest.
///
/// # Examples
///
/// ```sh
/// # Daily run with the built-in feeds
/// OPENAI_API_KEY=sk-... SERVER_CHAN_KEYS=SCT1,SCT2 finance_digest
///
/// # Preview the digest without pushing it
/// OPENAI_API_KEY=sk-... finance_digest --dry-run --sources feeds.yaml
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional YAML file replacing the built-in feed registry
    #[arg(short, long)]
    pub sources: Option<PathBuf>,

    /// Entries taken from the top of each feed
    #[arg(long, default_value_t = 5)]
    pub max_per_source: usize,

    /// Requests in flight across the whole run
    #[arg(long, default_value_t = 8)]
    pub max_concurrency: usize,

    /// Requests in flight per host
    #[arg(long, default_value_t = 2)]
    pub per_host_concurrency: usize,

    /// Allow the headless-browser tier for every article, not only force-render domains
    #[arg(long)]
    pub render_fallback: bool,

    /// Never start a headless browser
    #[arg(long, conflicts_with = "render_fallback")]
    pub no_render: bool,

    /// Browser executable for rendering (looked up on PATH when omitted)
    #[arg(long, env = "CHROME_BIN")]
    pub browser: Option<PathBuf>,

    /// Extra domain whose articles always qualify for rendering (repeatable)
    #[arg(long = "force-render-domain")]
    pub force_render_domains: Vec<String>,

    /// Cancel acquisition after this many seconds and continue with partial results
    #[arg(long, default_value_t = 600)]
    pub run_timeout_secs: u64,

    /// Maximum characters in the delivered digest
    #[arg(long, default_value_t = 2000)]
    pub max_digest_length: usize,

    /// Maximum entry lines listed in the digest
    #[arg(long, default_value_t = 30)]
    pub max_links: usize,

    /// Maximum characters of article text sent to the summarizer
    #[arg(long, default_value_t = 60_000)]
    pub max_corpus_chars: usize,

    /// Offset from UTC, in hours, used to date the digest
    #[arg(long, default_value_t = 8, allow_hyphen_values = true)]
    pub utc_offset_hours: i32,

    /// Build and print the digest without delivering it
    #[arg(long)]
    pub dry_run: bool,

    /// API key for the chat completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Comma-separated ServerChan send keys
    #[arg(long, env = "SERVER_CHAN_KEYS", hide_env_values = true)]
    pub server_chan_keys: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Model used for the summary
    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,
}
