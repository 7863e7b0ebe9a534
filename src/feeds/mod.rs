//! Feed retrieval with bounded retries.
//!
//! A feed that parses but has no entries is treated like a failed fetch: in
//! practice an empty feed from these sources means we were blocked, not that
//! nothing was published.

pub mod parser;

use crate::http::{Fetch, feed_headers};
use crate::models::FeedEntry;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Retry policy for feed retrieval.
#[derive(Debug, Clone)]
pub struct FeedRetrySettings {
    /// Total attempts per feed, including the first.
    pub max_retries: usize,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for FeedRetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Why a feed could not be retrieved.
#[derive(Debug)]
pub enum FeedError {
    InvalidUrl(String),
    Exhausted { attempts: usize, last: String },
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::InvalidUrl(url) => write!(f, "invalid feed url {url:?}"),
            FeedError::Exhausted { attempts, last } => {
                write!(f, "feed unavailable after {attempts} attempts: {last}")
            }
        }
    }
}

impl Error for FeedError {}

/// Fetches and parses one feed URL at a time.
pub struct FeedRetriever<'a, F> {
    fetcher: &'a F,
    settings: FeedRetrySettings,
}

impl<'a, F: Fetch> FeedRetriever<'a, F> {
    /// # Arguments
    ///
    /// * `fetcher` - Client used for every feed request
    /// * `settings` - Attempt count and fixed delay between attempts
    pub fn new(fetcher: &'a F, settings: FeedRetrySettings) -> Self {
        Self { fetcher, settings }
    }

    /// Retrieve the entries of `url`, retrying on errors and empty results.
    ///
    /// Makes at most `max_retries` requests and never sleeps after the last one.
    #[instrument(level = "info", skip(self))]
    pub async fn retrieve(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError> {
        let feed_url = Url::parse(url).map_err(|_| FeedError::InvalidUrl(url.to_string()))?;
        let attempts = self.settings.max_retries.max(1);
        let mut last = String::from("no attempt made");

        for attempt in 1..=attempts {
            match self.attempt(&feed_url).await {
                Ok(entries) if !entries.is_empty() => {
                    info!(attempt, count = entries.len(), "Feed retrieved");
                    return Ok(entries);
                }
                Ok(_) => {
                    last = "feed has no entries".to_string();
                    warn!(attempt, max = attempts, "Feed returned no entries");
                }
                Err(e) => {
                    last = e.to_string();
                    warn!(attempt, max = attempts, error = %e, "Feed attempt failed");
                }
            }
            if attempt < attempts {
                debug!(delay = ?self.settings.delay, "Waiting before next feed attempt");
                sleep(self.settings.delay).await;
            }
        }

        Err(FeedError::Exhausted { attempts, last })
    }

    async fn attempt(&self, feed_url: &Url) -> Result<Vec<FeedEntry>, Box<dyn Error>> {
        let page = self.fetcher.fetch(feed_url, &feed_headers()).await?;
        if page.status != 200 {
            return Err(format!("http status {}", page.status).into());
        }
        Ok(parser::parse_feed(&page.body, Some(&page.final_url))?)
    }
}
