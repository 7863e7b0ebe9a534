//! One end-to-end digest run.
//!
//! ```text
//! aggregate ──► summarize (skipped on empty corpus) ──► assemble ──► notify
//! ```
//!
//! Acquisition never fails. Summarizer and delivery failures are reported as
//! [`PipelineError`] *after* the digest went out, carrying the full
//! [`RunReport`] so nothing gathered is lost.

use crate::aggregator::{RunAggregator, bound_corpus};
use crate::api::Summarizer;
use crate::digest::{DigestAssembler, digest_title};
use crate::extract::render::Render;
use crate::http::Fetch;
use crate::models::RunOutput;
use crate::notify::{DeliveryReport, NotificationSink};
use crate::sources::FeedRegistry;
use crate::utils::today_date;
use std::error::Error;
use std::fmt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Summary text used when the summarizer gave up.
pub const SUMMARY_UNAVAILABLE: &str =
    "_Summary unavailable: the analysis service did not return a result for this run._";

/// What happened to the analysis section of the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryStatus {
    Generated,
    /// Nothing was extracted, so there was nothing to summarize.
    Skipped,
    /// The summarizer gave up; carries its last error.
    Failed(String),
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Digest date (`YYYY-MM-DD`) at the configured UTC offset.
    pub date: String,
    /// Acquisition results, possibly partial after cancellation.
    pub output: RunOutput,
    pub summary: SummaryStatus,
    /// The assembled Markdown digest, already length-bounded.
    pub digest: String,
    /// `None` on dry runs.
    pub delivery: Option<DeliveryReport>,
}

/// A run that finished but should exit with a failure status.
///
/// Both variants are raised only after the digest was assembled (and, unless
/// dry-running, sent), so the report is always complete.
#[derive(Debug)]
pub enum PipelineError {
    /// The summarizer exhausted its retries; the digest went out with
    /// [`SUMMARY_UNAVAILABLE`] in place of the analysis.
    Summarizer { message: String, report: Box<RunReport> },
    /// Every notification destination rejected the digest.
    Delivery { report: Box<RunReport> },
}

impl PipelineError {
    /// The report of the run that failed.
    pub fn report(&self) -> &RunReport {
        match self {
            PipelineError::Summarizer { report, .. } | PipelineError::Delivery { report } => report,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Summarizer { message, .. } => write!(f, "summarizer failed: {message}"),
            PipelineError::Delivery { report } => {
                let failed = report.delivery.as_ref().map_or(0, |d| d.failed());
                write!(f, "digest delivery failed for all {failed} destinations")
            }
        }
    }
}

impl Error for PipelineError {}

/// Per-run knobs for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Entries admitted from the top of each feed.
    pub max_per_source: usize,
    /// Upper bound on the corpus handed to the summarizer, in characters.
    pub max_corpus_chars: usize,
    /// Offset used to date the digest.
    pub utc_offset_hours: i32,
    /// Assemble the digest but do not send it.
    pub dry_run: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_per_source: 5,
            max_corpus_chars: 60_000,
            utc_offset_hours: 8,
            dry_run: false,
        }
    }
}

/// Wires acquisition, summary, assembly and delivery into one run.
pub struct Pipeline<'a, F, R, S, N> {
    aggregator: RunAggregator<'a, F, R>,
    registry: &'a FeedRegistry,
    summarizer: &'a S,
    sink: &'a N,
    assembler: DigestAssembler,
    settings: PipelineSettings,
}

impl<'a, F, R, S, N> Pipeline<'a, F, R, S, N>
where
    F: Fetch,
    R: Render,
    S: Summarizer,
    N: NotificationSink,
{
    /// Assemble a pipeline from its stages.
    ///
    /// # Arguments
    ///
    /// * `aggregator` - Acquisition over feeds and articles
    /// * `registry` - Sources to pull, in digest order
    /// * `summarizer` - Writes the analysis section
    /// * `sink` - Destinations for the finished digest
    /// * `assembler` - Digest layout and length bound
    /// * `settings` - Per-run limits and the dry-run switch
    pub fn new(
        aggregator: RunAggregator<'a, F, R>,
        registry: &'a FeedRegistry,
        summarizer: &'a S,
        sink: &'a N,
        assembler: DigestAssembler,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            aggregator,
            registry,
            summarizer,
            sink,
            assembler,
            settings,
        }
    }

    /// Run once: aggregate, summarize, assemble, deliver.
    ///
    /// # Returns
    ///
    /// The [`RunReport`], or a [`PipelineError`] carrying it when the summary
    /// or every delivery failed.
    #[instrument(level = "info", skip_all, fields(dry_run = self.settings.dry_run))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        let t0 = Instant::now();
        let date = today_date(self.settings.utc_offset_hours);

        let output = self
            .aggregator
            .run(self.registry, self.settings.max_per_source, cancel)
            .await;

        let (summary_text, summary) = self.summarize(&output).await;
        let digest = self.assembler.assemble(&output, &summary_text, &date);
        info!(chars = digest.chars().count(), "Digest assembled");

        let delivery = if self.settings.dry_run {
            info!("Dry run; skipping delivery");
            None
        } else {
            let title = format!("📌 {}", digest_title(&date));
            let report = self.sink.send(&title, &digest).await;
            info!(
                delivered = report.delivered(),
                failed = report.failed(),
                "Delivery finished"
            );
            Some(report)
        };

        let report = RunReport {
            date,
            output,
            summary,
            digest,
            delivery,
        };
        info!(secs = t0.elapsed().as_secs(), "Pipeline run finished");

        if let SummaryStatus::Failed(message) = &report.summary {
            return Err(PipelineError::Summarizer {
                message: message.clone(),
                report: Box::new(report),
            });
        }
        if report.delivery.as_ref().is_some_and(DeliveryReport::all_failed) {
            return Err(PipelineError::Delivery {
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    async fn summarize(&self, output: &RunOutput) -> (String, SummaryStatus) {
        if output.analysis_corpus.trim().is_empty() {
            warn!("No article text extracted; skipping summarization");
            return (String::new(), SummaryStatus::Skipped);
        }
        let corpus = bound_corpus(&output.analysis_corpus, self.settings.max_corpus_chars);
        info!(chars = corpus.chars().count(), "Requesting summary");
        match self.summarizer.summarize(corpus).await {
            Ok(summary) => (summary, SummaryStatus::Generated),
            Err(e) => {
                error!(error = %e, "Summarization failed; digest will carry a placeholder");
                (SUMMARY_UNAVAILABLE.to_string(), SummaryStatus::Failed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorSettings;
    use crate::digest::NO_CONTENT_NOTICE;
    use crate::extract::ExtractSettings;
    use crate::feeds::FeedRetrySettings;
    use crate::test_support::{
        CannedSummarizer, RecordingSink, ScriptedFetcher, ScriptedRenderer, article_page, prose, rss,
    };
    use std::time::Duration;

    struct Fixture {
        fetcher: ScriptedFetcher,
        registry: FeedRegistry,
        extract: ExtractSettings,
    }

    impl Fixture {
        fn new(with_articles: bool) -> Self {
            let fetcher = ScriptedFetcher::new();
            fetcher.route_ok(
                "https://feed.example/rss",
                &rss(&[("Rates hold", "https://news.example/a"), ("Oil slips", "https://news.example/b")]),
            );
            if with_articles {
                fetcher.route_ok("https://news.example/a", &article_page(&prose("Rates held steady.")));
                fetcher.route_ok("https://news.example/b", &article_page(&prose("Oil slipped again.")));
            }
            Self {
                fetcher,
                registry: FeedRegistry::from_pairs([("Markets", vec![("Wire", "https://feed.example/rss")])]),
                extract: ExtractSettings {
                    max_retries: 1,
                    backoff_unit: Duration::ZERO,
                    force_render_domains: Vec::new(),
                },
            }
        }

        fn aggregator(&self) -> RunAggregator<'_, ScriptedFetcher, ScriptedRenderer> {
            RunAggregator::new(
                &self.fetcher,
                None,
                FeedRetrySettings {
                    max_retries: 1,
                    delay: Duration::ZERO,
                },
                &self.extract,
                AggregatorSettings::default(),
            )
        }
    }

    async fn run(
        fixture: &Fixture,
        summarizer: &CannedSummarizer,
        sink: &RecordingSink,
        settings: PipelineSettings,
    ) -> Result<RunReport, PipelineError> {
        Pipeline::new(
            fixture.aggregator(),
            &fixture.registry,
            summarizer,
            sink,
            DigestAssembler::default(),
            settings,
        )
        .run(&CancellationToken::new())
        .await
    }

    #[tokio::test]
    async fn test_full_run_delivers_digest() {
        let fixture = Fixture::new(true);
        let summarizer = CannedSummarizer::ok("Rates and oil dominated.");
        let sink = RecordingSink::new(&[("SCT1****", true), ("SCT2****", false)]);

        let report = run(&fixture, &summarizer, &sink, PipelineSettings::default())
            .await
            .unwrap();

        assert_eq!(report.summary, SummaryStatus::Generated);
        assert_eq!(report.output.stats.succeeded, 2);
        assert!(report.digest.contains("Rates and oil dominated."));

        let inputs = summarizer.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].contains("### Rates hold"));

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, format!("📌 {} Finance News Digest", report.date));
        assert_eq!(sent[0].1, report.digest);
        assert_eq!(report.delivery.as_ref().unwrap().delivered(), 1);
    }

    #[tokio::test]
    async fn test_empty_corpus_skips_summarizer() {
        let fixture = Fixture::new(false);
        let summarizer = CannedSummarizer::ok("unused");
        let sink = RecordingSink::new(&[("SCT1****", true)]);

        let report = run(&fixture, &summarizer, &sink, PipelineSettings::default())
            .await
            .unwrap();

        assert_eq!(report.summary, SummaryStatus::Skipped);
        assert!(summarizer.inputs.lock().unwrap().is_empty());
        assert!(report.digest.contains(NO_CONTENT_NOTICE));
        assert_eq!(report.output.stats.failed, 2);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_summarizer_failure_still_notifies() {
        let fixture = Fixture::new(true);
        let summarizer = CannedSummarizer::failing("quota exceeded");
        let sink = RecordingSink::new(&[("SCT1****", true)]);

        let err = run(&fixture, &summarizer, &sink, PipelineSettings::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Summarizer { .. }));
        assert!(err.to_string().contains("quota exceeded"));
        let report = err.report();
        assert_eq!(report.output.stats.succeeded, 2);
        assert!(report.digest.contains(SUMMARY_UNAVAILABLE));
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_destinations_failing_is_delivery_error() {
        let fixture = Fixture::new(true);
        let summarizer = CannedSummarizer::ok("ok");
        let sink = RecordingSink::new(&[("SCT1****", false), ("SCT2****", false)]);

        let err = run(&fixture, &summarizer, &sink, PipelineSettings::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Delivery { .. }));
        assert_eq!(err.report().summary, SummaryStatus::Generated);
    }

    #[tokio::test]
    async fn test_dry_run_skips_delivery() {
        let fixture = Fixture::new(true);
        let summarizer = CannedSummarizer::ok("ok");
        let sink = RecordingSink::new(&[("SCT1****", false)]);
        let settings = PipelineSettings {
            dry_run: true,
            ..PipelineSettings::default()
        };

        let report = run(&fixture, &summarizer, &sink, settings).await.unwrap();

        assert!(report.delivery.is_none());
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corpus_is_bounded_before_summarizing() {
        let fixture = Fixture::new(true);
        let summarizer = CannedSummarizer::ok("ok");
        let sink = RecordingSink::new(&[("SCT1****", true)]);
        let settings = PipelineSettings {
            max_corpus_chars: 500,
            ..PipelineSettings::default()
        };

        let report = run(&fixture, &summarizer, &sink, settings).await.unwrap();

        let inputs = summarizer.inputs.lock().unwrap();
        assert!(inputs[0].chars().count() <= 500);
        assert!(report.output.analysis_corpus.chars().count() > 500);
    }
}
