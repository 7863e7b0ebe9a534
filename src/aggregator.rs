//! Drives one acquisition run over the whole registry.
//!
//! Feeds and articles share one pool of at most `max_concurrency` in-flight
//! tasks. A source's admitted entries are queued for extraction the moment its
//! feed arrives, ahead of feeds not yet started, so a slow or hanging feed never
//! holds back sources that are already done.
//!
//! Tasks finish in any order, but every result lands in a pre-assigned
//! `(source, entry)` slot and the output is assembled from the slots in registry
//! order, so it does not depend on timing. Cancellation drops whatever is still
//! in flight; every entry that completed before it is kept and counted.

use crate::extract::render::Render;
use crate::extract::{ArticleExtractor, ExtractSettings};
use crate::feeds::{FeedError, FeedRetriever, FeedRetrySettings};
use crate::http::Fetch;
use crate::models::{
    ArticleResult, CategoryDigest, EntryLine, FeedEntry, Outcome, RunOutput, RunStats,
    SourceSection,
};
use crate::sources::{FeedRegistry, FeedSource};
use crate::utils::take_chars;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::fmt::Write;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Run-level limits.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Requests (feeds or articles) in flight at once.
    pub max_concurrency: usize,
    /// Let every article use the render tier, not just force-render domains.
    pub render_fallback: bool,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            render_fallback: false,
        }
    }
}

/// A unit of work for the shared pool.
enum Task {
    Feed { slot: usize },
    Article { slot: usize, index: usize, link: Url },
}

/// A finished [`Task`].
enum Done {
    Feed {
        slot: usize,
        result: Result<Vec<FeedEntry>, FeedError>,
    },
    Article {
        slot: usize,
        index: usize,
        result: ArticleResult,
    },
}

/// What is known about one source so far.
#[derive(Default)]
struct SourceSlot {
    /// Admitted entries, in feed order. Empty until the feed arrives.
    entries: Vec<FeedEntry>,
    /// Per entry: `None` while pending, `Some(None)` for an entry without a
    /// usable link, `Some(Some(result))` once extracted.
    results: Vec<Option<Option<ArticleResult>>>,
}

/// Runs feed retrieval and article extraction for a whole registry.
///
/// Borrows the fetcher, the optional renderer and the extraction settings for
/// its lifetime; one aggregator can serve any number of runs.
pub struct RunAggregator<'a, F, R> {
    retriever: FeedRetriever<'a, F>,
    extractor: ArticleExtractor<'a, F, R>,
    settings: AggregatorSettings,
}

impl<'a, F: Fetch, R: Render> RunAggregator<'a, F, R> {
    /// Build an aggregator over shared clients.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - HTTP client used for both feeds and article pages
    /// * `renderer` - Headless browser for the render tier, if one is available
    /// * `feed_settings` - Retry policy for feed retrieval
    /// * `extract_settings` - Retry policy and force-render list for articles
    /// * `settings` - Concurrency cap and render-fallback switch
    pub fn new(
        fetcher: &'a F,
        renderer: Option<&'a R>,
        feed_settings: FeedRetrySettings,
        extract_settings: &'a ExtractSettings,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            retriever: FeedRetriever::new(fetcher, feed_settings),
            extractor: ArticleExtractor::new(fetcher, renderer, extract_settings),
            settings,
        }
    }

    /// Acquire articles from every source in `registry`.
    ///
    /// Never fails: unreachable feeds and unextractable articles only show up
    /// in the stats. A cancelled run returns every entry that completed before
    /// the cancellation.
    ///
    /// # Arguments
    ///
    /// * `registry` - Sources to pull, in output order
    /// * `max_per_source` - Entries admitted from the top of each feed
    /// * `cancel` - Stops the run; in-flight work is dropped
    #[instrument(level = "info", skip_all, fields(feeds = registry.len(), max_per_source))]
    pub async fn run(
        &self,
        registry: &FeedRegistry,
        max_per_source: usize,
        cancel: &CancellationToken,
    ) -> RunOutput {
        let t0 = Instant::now();
        let sources: Vec<&FeedSource> = registry.sources().collect();
        let concurrency = self.settings.max_concurrency.max(1);
        let allow_render = self.settings.render_fallback;

        let mut slots: Vec<SourceSlot> = sources.iter().map(|_| SourceSlot::default()).collect();
        let mut queue: VecDeque<Task> = (0..sources.len()).map(|slot| Task::Feed { slot }).collect();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < concurrency {
                match queue.pop_front() {
                    Some(task) => in_flight.push(self.perform(&sources, task, allow_render)),
                    None => break,
                }
            }
            if in_flight.is_empty() {
                break;
            }
            let running = in_flight.len();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        in_flight = running,
                        queued = queue.len(),
                        "Run cancelled; keeping completed results"
                    );
                    break;
                }
                next = in_flight.next() => match next {
                    Some(Done::Feed { slot, result: Ok(entries) }) => {
                        admit(&mut slots[slot], &mut queue, slot, entries, max_per_source);
                        debug!(
                            source = %sources[slot].name,
                            admitted = slots[slot].entries.len(),
                            "Feed ready; entries queued"
                        );
                    }
                    Some(Done::Feed { slot, result: Err(e) }) => {
                        warn!(
                            category = %sources[slot].category,
                            source = %sources[slot].name,
                            error = %e,
                            "Skipping source"
                        );
                    }
                    Some(Done::Article { slot, index, result }) => {
                        slots[slot].results[index] = Some(Some(result));
                    }
                    None => break,
                }
            }
        }
        drop(in_flight);

        let output = assemble(registry, &sources, slots);
        let elapsed = t0.elapsed();
        info!(
            attempted = output.stats.attempted,
            succeeded = output.stats.succeeded,
            failed = output.stats.failed,
            categories = output.category_digests.len(),
            corpus_chars = output.analysis_corpus.chars().count(),
            secs = elapsed.as_secs(),
            "Run aggregation complete"
        );
        output
    }

    async fn perform(&self, sources: &[&FeedSource], task: Task, allow_render: bool) -> Done {
        match task {
            Task::Feed { slot } => Done::Feed {
                slot,
                result: self.retriever.retrieve(&sources[slot].url).await,
            },
            Task::Article { slot, index, link } => Done::Article {
                slot,
                index,
                result: self.extractor.extract(&link, allow_render).await,
            },
        }
    }
}

/// Record a source's admitted entries and queue their extraction ahead of
/// feeds that have not started yet.
fn admit(
    slot_state: &mut SourceSlot,
    queue: &mut VecDeque<Task>,
    slot: usize,
    entries: Vec<FeedEntry>,
    max_per_source: usize,
) {
    slot_state.entries = entries.into_iter().take(max_per_source).collect();
    slot_state.results = slot_state
        .entries
        .iter()
        .map(|entry| entry.link.is_none().then_some(None))
        .collect();
    for (index, entry) in slot_state.entries.iter().enumerate().rev() {
        if let Some(link) = &entry.link {
            queue.push_front(Task::Article {
                slot,
                index,
                link: link.clone(),
            });
        }
    }
}

/// Build the run output from completed slots, in registry and feed order.
///
/// Entries still pending (cancelled runs) are left out entirely, so the stats
/// only count finished work.
fn assemble(registry: &FeedRegistry, sources: &[&FeedSource], slots: Vec<SourceSlot>) -> RunOutput {
    let mut sections: Vec<Vec<EntryLine>> = Vec::with_capacity(slots.len());
    let mut corpus = String::new();
    let mut stats = RunStats::default();

    for (source, slot) in sources.iter().zip(slots) {
        let mut lines = Vec::new();
        for (entry, result) in slot.entries.into_iter().zip(slot.results) {
            let Some(result) = result else {
                continue;
            };
            let outcome = match &result {
                Some(article) => article.outcome,
                None => {
                    warn!(
                        source = %source.name,
                        title = %entry.title,
                        "Entry has no usable link; counted as failed"
                    );
                    Outcome::Failed
                }
            };
            stats.record(outcome);
            if let Some(article) = result.filter(ArticleResult::is_success) {
                debug!(url = %article.url, chars = article.text.chars().count(), "Adding article to corpus");
                let _ = write!(corpus, "### {}\n{}\n\n", entry.title, article.text);
            }
            lines.push(EntryLine {
                title: entry.title,
                link: entry.link,
                outcome,
            });
        }
        sections.push(lines);
    }

    RunOutput {
        analysis_corpus: corpus,
        category_digests: group_by_category(registry, sections),
        stats,
    }
}

/// The first `max_chars` characters of `corpus`, cut back to an entry boundary
/// when one exists inside the limit.
pub fn bound_corpus(corpus: &str, max_chars: usize) -> &str {
    let prefix = take_chars(corpus, max_chars);
    if prefix.len() == corpus.len() {
        return corpus;
    }
    match prefix.rfind("\n\n### ") {
        Some(cut) => &prefix[..cut + 2],
        None => prefix,
    }
}

/// Regroup per-source slots under their categories, dropping empty ones.
fn group_by_category(
    registry: &FeedRegistry,
    sections: Vec<Vec<EntryLine>>,
) -> Vec<CategoryDigest> {
    let mut slots = sections.into_iter();
    let mut digests = Vec::new();
    for (category, sources) in registry.categories() {
        let category_sections: Vec<SourceSection> = sources
            .iter()
            .zip(slots.by_ref())
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(source, entries)| SourceSection {
                source: source.name.clone(),
                entries,
            })
            .collect();
        if !category_sections.is_empty() {
            digests.push(CategoryDigest {
                category: category.to_string(),
                sections: category_sections,
            });
        }
    }
    digests
}
