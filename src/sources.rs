//! The feed source registry.
//!
//! An ordered list of categories, each holding an ordered list of named feeds.
//! Category order is the order the digest is printed in; source order inside a
//! category is kept exactly as written so runs are reproducible.
//!
//! The built-in registry mirrors the sources the bot has always pulled from.
//! A YAML file can replace it:
//!
//! ```yaml
//! categories:
//!   - name: "🇺🇸 US Economy"
//!     sources:
//!       - name: "MarketWatch"
//!         url: "https://www.marketwatch.com/rss/topstories"
//! force_render_domains: ["36kr.com"]
//! ```

use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::path::Path;
use tracing::{info, instrument};

/// A named feed belonging to a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub category: String,
    /// Display name used in the digest.
    pub name: String,
    /// Feed URL as configured; parsed on retrieval.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryConfig {
    name: String,
    sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct SourceConfig {
    name: String,
    url: String,
}

/// On-disk shape of a sources file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub force_render_domains: Vec<String>,
}

/// Problems with a sources file.
#[derive(Debug)]
pub enum SourcesError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Empty,
    InvalidUrl { source: String, url: String },
}

impl fmt::Display for SourcesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcesError::Io(e) => write!(f, "cannot read sources file: {e}"),
            SourcesError::Yaml(e) => write!(f, "invalid sources file: {e}"),
            SourcesError::Empty => write!(f, "sources file defines no feeds"),
            SourcesError::InvalidUrl { source, url } => {
                write!(f, "source {source:?} has an invalid feed url {url:?}")
            }
        }
    }
}

impl Error for SourcesError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SourcesError::Io(e) => Some(e),
            SourcesError::Yaml(e) => Some(e),
            _ => None,
        }
    }
}

/// Ordered category → feed mapping. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRegistry {
    categories: Vec<(String, Vec<FeedSource>)>,
}

impl FeedRegistry {
    /// Build a registry from `(category, [(name, url)])` pairs.
    pub fn from_pairs<C, N, U>(pairs: impl IntoIterator<Item = (C, Vec<(N, U)>)>) -> Self
    where
        C: Into<String>,
        N: Into<String>,
        U: Into<String>,
    {
        let categories = pairs
            .into_iter()
            .map(|(category, sources)| {
                let category = category.into();
                let sources = sources
                    .into_iter()
                    .map(|(name, url)| FeedSource {
                        category: category.clone(),
                        name: name.into(),
                        url: url.into(),
                    })
                    .collect();
                (category, sources)
            })
            .collect();
        Self { categories }
    }

    /// Parse a sources file body. Returns the registry and its force-render list.
    pub fn from_yaml_str(yaml: &str) -> Result<(Self, Vec<String>), SourcesError> {
        let file: SourcesFile = serde_yaml::from_str(yaml).map_err(SourcesError::Yaml)?;
        for source in file.categories.iter().flat_map(|c| c.sources.iter()) {
            match url::Url::parse(&source.url) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                _ => {
                    return Err(SourcesError::InvalidUrl {
                        source: source.name.clone(),
                        url: source.url.clone(),
                    });
                }
            }
        }
        let registry = Self::from_pairs(file.categories.into_iter().map(|c| {
            (
                c.name,
                c.sources.into_iter().map(|s| (s.name, s.url)).collect::<Vec<_>>(),
            )
        }));
        if registry.is_empty() {
            return Err(SourcesError::Empty);
        }
        Ok((registry, file.force_render_domains))
    }

    /// Load a sources file from disk.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<(Self, Vec<String>), SourcesError> {
        let yaml = std::fs::read_to_string(path).map_err(SourcesError::Io)?;
        let loaded = Self::from_yaml_str(&yaml)?;
        info!(
            categories = loaded.0.categories.len(),
            feeds = loaded.0.len(),
            "Loaded sources file"
        );
        Ok(loaded)
    }

    /// Categories with their sources, in registry order.
    pub fn categories(&self) -> impl Iterator<Item = (&str, &[FeedSource])> {
        self.categories
            .iter()
            .map(|(name, sources)| (name.as_str(), sources.as_slice()))
    }

    /// Every source, categories first then sources, in registry order.
    pub fn sources(&self) -> impl Iterator<Item = &FeedSource> {
        self.categories.iter().flat_map(|(_, sources)| sources.iter())
    }

    /// Number of feeds across all categories.
    pub fn len(&self) -> usize {
        self.categories.iter().map(|(_, s)| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FeedRegistry {
    fn default() -> Self {
        Self::from_pairs([
            (
                "💲 Wallstreetcn",
                vec![("Wallstreetcn", "https://dedicated.wallstreetcn.com/rss.xml")],
            ),
            ("💻 36Kr", vec![("36Kr", "https://36kr.com/feed")]),
            (
                "🇨🇳 China Economy",
                vec![
                    ("HKET China", "https://www.hket.com/rss/china"),
                    ("Eastmoney", "http://rss.eastmoney.com/rss_partener.xml"),
                    (
                        "Baidu Stock Focus",
                        "http://news.baidu.com/n?cmd=1&class=stock&tn=rss&sub=0",
                    ),
                    ("China News Finance", "https://www.chinanews.com.cn/rss/finance.xml"),
                    ("NBS Latest Releases", "https://www.stats.gov.cn/sj/zxfb/rss.xml"),
                ],
            ),
            (
                "🇺🇸 US Economy",
                vec![
                    (
                        "WSJ US Business",
                        "https://feeds.content.dowjones.io/public/rss/WSJcomUSBusiness",
                    ),
                    (
                        "WSJ Markets",
                        "https://feeds.content.dowjones.io/public/rss/RSSMarketsMain",
                    ),
                    ("MarketWatch Top Stories", "https://www.marketwatch.com/rss/topstories"),
                    ("ZeroHedge", "https://feeds.feedburner.com/zerohedge/feed"),
                    ("ETF Trends", "https://www.etftrends.com/feed/"),
                ],
            ),
            (
                "🌍 World Economy",
                vec![
                    (
                        "WSJ Economy",
                        "https://feeds.content.dowjones.io/public/rss/socialeconomyfeed",
                    ),
                    ("BBC Business", "http://feeds.bbci.co.uk/news/business/rss.xml"),
                ],
            ),
        ])
    }
}

/// Domains known to serve their article text only after script execution.
pub fn default_force_render_domains() -> Vec<String> {
    ["wallstreetcn.com", "36kr.com", "marketwatch.com"]
        .into_iter()
        .map(String::from)
        .collect()
}
