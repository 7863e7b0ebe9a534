//! Data models shared by the acquisition pipeline.
//!
//! Everything here lives for exactly one run:
//! - [`FeedEntry`]: one item parsed out of a feed response
//! - [`ArticleText`]: extracted text that passed the length rule
//! - [`ArticleResult`]: the outcome of extracting text from one article page
//! - [`RunStats`], [`CategoryDigest`], [`RunOutput`]: what a run accumulates
//!
//! The static feed registry lives in [`crate::sources`].

use std::fmt;
use url::Url;

/// Upper bound on the article text kept per successful extraction, in characters.
pub const MAX_ARTICLE_CHARS: usize = 3000;

/// Extracted text must be strictly longer than this to count as an article.
pub const MIN_ARTICLE_CHARS: usize = 200;

/// A single item from a syndication feed.
///
/// `link` is only populated when the feed gave an absolute `http`/`https` URL
/// (or a relative one that resolved against the feed URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// The entry headline.
    pub title: String,
    /// The article page this entry points to, if usable.
    pub link: Option<Url>,
}

/// Whether an extraction produced usable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failed => f.write_str("failed"),
        }
    }
}

/// Article text that passed the length rule: trimmed, more than
/// [`MIN_ARTICLE_CHARS`] characters, and cut to at most [`MAX_ARTICLE_CHARS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleText(String);

impl ArticleText {
    /// Apply the length rule to `text`.
    ///
    /// # Returns
    ///
    /// `None` when the trimmed text is too short. Longer text is cut on a
    /// character boundary.
    pub fn qualify(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.chars().count() <= MIN_ARTICLE_CHARS {
            return None;
        }
        Some(Self(text.chars().take(MAX_ARTICLE_CHARS).collect()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The result of running the article extractor over one URL.
///
/// Construct through [`ArticleResult::success`] or [`ArticleResult::failed`]
/// so that a success always carries qualifying text and a failure none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleResult {
    /// The URL the extractor was given, before any redirect.
    pub url: Url,
    /// Extracted text; empty unless `outcome` is `Success`.
    pub text: String,
    pub outcome: Outcome,
}

impl ArticleResult {
    pub fn success(url: Url, text: ArticleText) -> Self {
        Self {
            url,
            text: text.0,
            outcome: Outcome::Success,
        }
    }

    pub fn failed(url: Url) -> Self {
        Self {
            url,
            text: String::new(),
            outcome: Outcome::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Per-run counters. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunStats {
    /// Count one admitted entry with its final outcome.
    pub fn record(&mut self, outcome: Outcome) {
        self.attempted += 1;
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// One admitted entry as listed in the digest, whether or not text was extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLine {
    pub title: String,
    pub link: Option<Url>,
    pub outcome: Outcome,
}

/// The entries a single source contributed to its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSection {
    pub source: String,
    pub entries: Vec<EntryLine>,
}

/// All non-empty source sections of one category, in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDigest {
    pub category: String,
    pub sections: Vec<SourceSection>,
}

/// Everything one run hands to the digest assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Titles and text of every successful extraction, in registry order.
    pub analysis_corpus: String,
    pub category_digests: Vec<CategoryDigest>,
    pub stats: RunStats,
}

impl RunOutput {
    /// Number of entry lines across all categories.
    pub fn link_count(&self) -> usize {
        self.category_digests
            .iter()
            .flat_map(|c| c.sections.iter())
            .map(|s| s.entries.len())
            .sum()
    }
}
