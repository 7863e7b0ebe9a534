//! Markdown digest assembly.

use crate::models::{CategoryDigest, EntryLine, RunOutput, SourceSection};
use crate::utils::take_chars;
use itertools::Itertools;

/// Appended when the digest had to be cut.
pub const TRUNCATION_MARKER: &str = "\n\n…(content too long, truncated)";

/// Characters kept free below the limit when truncating.
pub const SAFETY_MARGIN: usize = 100;

/// Summary section text when nothing could be extracted.
pub const NO_CONTENT_NOTICE: &str =
    "_No summary: no article text could be extracted from any source in this run._";

/// Link lines listed in a digest by default.
pub const DEFAULT_MAX_LINKS: usize = 30;

/// Title line used for both the digest header and the push notification.
pub fn digest_title(date: &str) -> String {
    format!("{date} Finance News Digest")
}

/// Renders a [`RunOutput`] plus a summary into a length-bounded Markdown message.
#[derive(Debug, Clone)]
pub struct DigestAssembler {
    /// Digest bound in characters, marker included.
    pub max_total_length: usize,
    /// Entry lines listed, counted across categories in registry order.
    pub max_links: usize,
}

impl Default for DigestAssembler {
    fn default() -> Self {
        Self {
            max_total_length: 2000,
            max_links: DEFAULT_MAX_LINKS,
        }
    }
}

impl DigestAssembler {
    /// # Arguments
    ///
    /// * `max_total_length` - Digest bound in characters, marker included
    /// * `max_links` - Entry lines listed before the rest are summarized as a count
    pub fn new(max_total_length: usize, max_links: usize) -> Self {
        Self {
            max_total_length,
            max_links,
        }
    }

    /// Render the digest for one run.
    ///
    /// Only the first `max_links` entries (registry order) get a line; the
    /// remainder is reported as a count. The whole message is then bounded by
    /// `max_total_length`.
    pub fn assemble(&self, output: &RunOutput, summary: &str, date: &str) -> String {
        let summary = if output.analysis_corpus.trim().is_empty() {
            NO_CONTENT_NOTICE
        } else {
            summary.trim()
        };

        let listed = cap_links(&output.category_digests, self.max_links);
        let listed_count: usize = listed
            .iter()
            .flat_map(|c| &c.sections)
            .map(|s| s.entries.len())
            .sum();
        let mut digest = format!(
            "📅 **{}**\n\n✍️ **AI Summary:**\n{summary}\n\n---\n\n📎 **News links ({listed_count}):**\n",
            digest_title(date),
        );
        for category in &listed {
            digest.push('\n');
            digest.push_str(&render_category(category));
        }
        let omitted = output.link_count() - listed_count;
        if omitted > 0 {
            digest.push_str(&format!("\n_…and {omitted} more not listed._\n"));
        }
        self.truncate(digest)
    }

    /// Cut `digest` to the limit, leaving the safety margin and appending the marker.
    fn truncate(&self, digest: String) -> String {
        if digest.chars().count() <= self.max_total_length {
            return digest;
        }
        let room = self
            .max_total_length
            .saturating_sub(TRUNCATION_MARKER.chars().count());
        let keep = room - SAFETY_MARGIN.min(room / 2);
        format!("{}{TRUNCATION_MARKER}", take_chars(&digest, keep).trim_end())
    }
}

/// The first `max_links` entry lines across `categories`, dropping sections
/// and categories left empty.
fn cap_links(categories: &[CategoryDigest], max_links: usize) -> Vec<CategoryDigest> {
    let mut remaining = max_links;
    categories
        .iter()
        .filter_map(|category| {
            let sections: Vec<SourceSection> = category
                .sections
                .iter()
                .filter_map(|section| {
                    let take = section.entries.len().min(remaining);
                    remaining -= take;
                    (take > 0).then(|| SourceSection {
                        source: section.source.clone(),
                        entries: section.entries[..take].to_vec(),
                    })
                })
                .collect();
            (!sections.is_empty()).then(|| CategoryDigest {
                category: category.category.clone(),
                sections,
            })
        })
        .collect()
}

fn render_category(category: &CategoryDigest) -> String {
    let sections = category
        .sections
        .iter()
        .map(|section| {
            format!(
                "### {}\n{}\n",
                section.source,
                section.entries.iter().map(render_entry).join("\n")
            )
        })
        .join("\n");
    format!("## {}\n\n{sections}", category.category)
}

fn render_entry(entry: &EntryLine) -> String {
    match &entry.link {
        Some(link) => format!("- [{}]({})", entry.title.replace(['[', ']'], ""), link),
        None => format!("- {}", entry.title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, RunStats};
    use url::Url;

    fn line(title: &str, link: Option<&str>) -> EntryLine {
        EntryLine {
            title: title.to_string(),
            link: link.map(|l| Url::parse(l).unwrap()),
            outcome: Outcome::Success,
        }
    }

    fn sample(entries: usize) -> RunOutput {
        RunOutput {
            analysis_corpus: "### A\nbody\n\n".to_string(),
            category_digests: vec![
                CategoryDigest {
                    category: "🇺🇸 US Economy".to_string(),
                    sections: vec![SourceSection {
                        source: "MarketWatch".to_string(),
                        entries: (0..entries)
                            .map(|i| line(&format!("Story {i}"), Some(&format!("https://mw.example/{i}"))))
                            .collect(),
                    }],
                },
                CategoryDigest {
                    category: "🌍 World Economy".to_string(),
                    sections: vec![SourceSection {
                        source: "BBC".to_string(),
                        entries: vec![line("[Live] No link", None)],
                    }],
                },
            ],
            stats: RunStats::default(),
        }
    }

    #[test]
    fn test_layout() {
        let digest = DigestAssembler::default().assemble(&sample(2), "Stocks up.", "2025-01-02");
        assert!(digest.starts_with("📅 **2025-01-02 Finance News Digest**\n\n✍️ **AI Summary:**\nStocks up.\n\n---\n"));
        assert!(digest.contains("📎 **News links (3):**"));
        assert!(digest.contains(
            "## 🇺🇸 US Economy\n\n### MarketWatch\n- [Story 0](https://mw.example/0)\n- [Story 1](https://mw.example/1)\n"
        ));
        assert!(digest.contains("## 🌍 World Economy\n\n### BBC\n- [Live] No link\n"));
        let us = digest.find("US Economy").unwrap();
        let world = digest.find("World Economy").unwrap();
        assert!(us < world);
        assert!(!digest.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_empty_corpus_notice() {
        let output = RunOutput::default();
        let digest = DigestAssembler::default().assemble(&output, "", "2025-01-02");
        assert!(digest.contains(NO_CONTENT_NOTICE));
        assert!(digest.contains("News links (0)"));
    }

    #[test]
    fn test_truncation_respects_limit() {
        let output = sample(200);
        let summary = "增长".repeat(500);
        for limit in [2000, 500, 120, TRUNCATION_MARKER.chars().count()] {
            let digest = DigestAssembler::new(limit, usize::MAX).assemble(&output, &summary, "2025-01-02");
            assert!(digest.chars().count() <= limit, "limit {limit}");
            assert!(digest.ends_with(TRUNCATION_MARKER));
        }
    }

    #[test]
    fn test_truncation_keeps_safety_margin() {
        let digest = DigestAssembler::new(2000, usize::MAX).assemble(&sample(200), "s", "2025-01-02");
        let len = digest.chars().count();
        assert!(len <= 2000 - SAFETY_MARGIN);
        assert!(len > 1700);
    }

    #[test]
    fn test_link_cap_counts_across_categories() {
        let digest = DigestAssembler::new(10_000, 2).assemble(&sample(5), "s", "2025-01-02");
        assert!(digest.contains("📎 **News links (2):**"));
        assert!(digest.contains("- [Story 1](https://mw.example/1)"));
        assert!(!digest.contains("Story 2"));
        assert!(!digest.contains("World Economy"));
        assert!(digest.contains("_…and 4 more not listed._"));
        assert!(!digest.contains(TRUNCATION_MARKER));

        let all = DigestAssembler::new(10_000, 6).assemble(&sample(5), "s", "2025-01-02");
        assert!(all.contains("News links (6)"));
        assert!(all.contains("World Economy"));
        assert!(!all.contains("more not listed"));
    }

    #[test]
    fn test_default_lists_thirty_links() {
        let digest = DigestAssembler::new(100_000, DEFAULT_MAX_LINKS).assemble(&sample(40), "s", "2025-01-02");
        assert!(digest.contains("News links (30)"));
        assert!(digest.contains("- [Story 29](https://mw.example/29)"));
        assert!(!digest.contains("Story 30]"));
        assert!(digest.contains("_…and 11 more not listed._"));
    }
}
