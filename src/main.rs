//! # Finance Digest
//!
//! A daily financial news digest: pulls a fixed set of RSS/Atom feeds grouped
//! into categories, extracts readable text from the linked articles, has an
//! OpenAI-compatible LLM write an analysis of the day, and pushes a length
//! bounded Markdown digest to ServerChan.
//!
//! ## Usage
//!
//! ```sh
//! OPENAI_API_KEY=sk-... SERVER_CHAN_KEYS=SCT... finance_digest
//! finance_digest --dry-run --sources feeds.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Feeds**: every registry feed is retrieved with retries ([`feeds`])
//! 2. **Extraction**: the top entries of each feed go through static fetch,
//!    client-redirect following, readability parsing and an optional headless
//!    browser tier ([`extract`])
//! 3. **Aggregation**: results are assembled in registry order ([`aggregator`])
//! 4. **Summary**: the bounded corpus is sent to the LLM ([`api`])
//! 5. **Delivery**: the digest is assembled and pushed ([`digest`], [`notify`])
//!
//! A run timeout or Ctrl-C cancels acquisition; whatever was gathered by then is
//! still summarized and delivered.

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregator;
mod api;
mod cli;
mod config;
mod digest;
mod extract;
mod feeds;
mod http;
mod models;
mod notify;
mod pipeline;
mod sources;
#[cfg(test)]
mod test_support;
mod utils;

use aggregator::{AggregatorSettings, RunAggregator};
use api::{ChatCompletionsClient, RetrySummarizer};
use cli::Cli;
use config::{AppConfig, RenderMode};
use digest::DigestAssembler;
use extract::ExtractSettings;
use extract::render::{HeadlessBrowser, RenderSettings};
use feeds::FeedRetrySettings;
use http::{HttpFetcher, Throttled};
use notify::ServerChanSink;
use pipeline::{Pipeline, PipelineSettings};

const FETCH_TIMEOUT: Duration = Duration::from_secs(12);
const SUMMARIZER_TIMEOUT: Duration = Duration::from_secs(120);
const SUMMARIZER_RETRIES: usize = 3;
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Cancel `cancel` when the run timeout elapses or Ctrl-C arrives.
fn arm_cancellation(cancel: &CancellationToken, run_timeout: Duration) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(run_timeout) => {
                warn!(?run_timeout, "Run timeout reached; cancelling acquisition");
            }
            res = tokio::signal::ctrl_c() => {
                match res {
                    Ok(()) => warn!("Interrupted; cancelling acquisition"),
                    Err(e) => {
                        error!(error = %e, "Cannot listen for Ctrl-C");
                        return;
                    }
                }
            }
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}

fn browser_for(config: &AppConfig) -> Option<HeadlessBrowser> {
    let browser = match &config.render {
        RenderMode::Disabled => None,
        RenderMode::Detect => HeadlessBrowser::detect(RenderSettings::default()),
        RenderMode::Binary(path) => Some(HeadlessBrowser::new(path.clone(), RenderSettings::default())),
    };
    if let Some(browser) = &browser {
        debug!(binary = %browser.binary().display(), "Render tier enabled");
    }
    if browser.is_none() && config.render != RenderMode::Disabled {
        warn!("No headless browser found; render fallback unavailable");
    }
    browser
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("finance_digest starting up");

    let args = Cli::parse();
    debug!(?args.sources, dry_run = args.dry_run, "Parsed CLI arguments");

    let config = match AppConfig::from_cli(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration rejected");
            return Err(e.into());
        }
    };

    // ---- Build clients ----
    let fetcher = Throttled::new(
        HttpFetcher::new(FETCH_TIMEOUT)?,
        config.max_concurrency,
        config.per_host_concurrency,
    );
    let browser = browser_for(&config);
    let extract_settings = ExtractSettings {
        force_render_domains: config.force_render_domains.clone(),
        ..ExtractSettings::default()
    };
    let aggregator = RunAggregator::new(
        &fetcher,
        browser.as_ref(),
        FeedRetrySettings::default(),
        &extract_settings,
        AggregatorSettings {
            max_concurrency: config.max_concurrency,
            render_fallback: config.render_fallback,
        },
    );
    let summarizer = RetrySummarizer::new(
        ChatCompletionsClient::new(&config.api_base, &config.api_key, &config.model, SUMMARIZER_TIMEOUT)?,
        SUMMARIZER_RETRIES,
        Duration::from_secs(1),
    );
    let sink = ServerChanSink::new(config.server_chan_keys.clone(), NOTIFY_TIMEOUT)?;

    let pipeline = Pipeline::new(
        aggregator,
        &config.registry,
        &summarizer,
        &sink,
        DigestAssembler::new(config.max_digest_length, config.max_links),
        PipelineSettings {
            max_per_source: config.max_per_source,
            max_corpus_chars: config.max_corpus_chars,
            utc_offset_hours: config.utc_offset_hours,
            dry_run: config.dry_run,
        },
    );

    // ---- Run ----
    let cancel = CancellationToken::new();
    arm_cancellation(&cancel, config.run_timeout);
    let result = pipeline.run(&cancel).await;
    cancel.cancel();

    let report = match &result {
        Ok(report) => report,
        Err(e) => e.report(),
    };
    if config.dry_run {
        println!("{}", report.digest);
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        attempted = report.output.stats.attempted,
        succeeded = report.output.stats.succeeded,
        failed = report.output.stats.failed,
        "Execution complete"
    );

    if let Err(e) = result {
        error!(error = %e, "Run finished with errors");
        return Err(e.into());
    }
    Ok(())
}
