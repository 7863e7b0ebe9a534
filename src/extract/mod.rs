//! Tiered article text extraction.
//!
//! Each article URL goes through these stages:
//!
//! 1. **Static fetch** with a rotated browser identity. Non-200 is a retry; a
//!    short body is a retry too unless it is a redirect shell or this is the
//!    last attempt.
//! 2. **Redirect check**: a script or meta-refresh redirect is followed once
//!    and its target becomes the working body.
//! 3. **Structured parse** through [`readability::extract_text`].
//! 4. **Success check**: more than 200 characters, cut to 3000.
//! 5. **Backoff** of `2 × attempt` units, then back to 1 while attempts remain.
//! 6. **Render fallback** through a headless browser, when one is available and
//!    either the call allows it or the host is on the force-render list.
//! 7. Otherwise the article is `Failed`.
//!
//! Every stage reports a [`Step`]; only the final success/failure reaches the
//! caller; the causes go to the log.

pub mod readability;
pub mod redirect;
pub mod render;

use crate::http::{Fetch, Page, article_headers};
use crate::models::{ArticleResult, ArticleText};
use crate::utils::host_matches;
use render::Render;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Bodies shorter than this look truncated or blocked.
pub const MIN_BODY_CHARS: usize = 300;

/// Rendered paragraphs must be longer than this to count as prose.
pub const MIN_RENDERED_PARAGRAPH_CHARS: usize = 40;

/// Outcome of one extraction stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Qualifying text, already truncated.
    Success(ArticleText),
    /// Transient problem; another attempt may help.
    Retry(String),
    /// Nothing further will help for this tier.
    Failed(String),
}

/// Knobs for [`ArticleExtractor`].
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    /// Static fetch attempts, including the first.
    pub max_retries: usize,
    /// Backoff before attempt `n + 1` is `2 × n × backoff_unit`.
    pub backoff_unit: Duration,
    /// Hosts (and their subdomains) that always qualify for the render tier.
    pub force_render_domains: Vec<String>,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            force_render_domains: Vec::new(),
        }
    }
}

impl ExtractSettings {
    /// Sleep after failed static attempt `attempt` (1-based).
    ///
    /// # Returns
    ///
    /// `2 × attempt × backoff_unit`: 2 s, 4 s, 6 s... with the default unit.
    pub fn backoff(&self, attempt: usize) -> Duration {
        self.backoff_unit.saturating_mul(2 * attempt as u32)
    }
}

/// Status and length gate on a fetched page.
///
/// `is_shell` exempts redirect shells from the length check; they are short by nature.
pub fn check_response(page: &Page, is_last: bool, is_shell: bool) -> Result<(), String> {
    if page.status != 200 {
        return Err(format!("http status {}", page.status));
    }
    let len = page.body.chars().count();
    if len < MIN_BODY_CHARS && !is_last && !is_shell {
        return Err(format!("body too short ({len} chars)"));
    }
    Ok(())
}

/// Gate extracted text through [`ArticleText::qualify`].
pub fn success_check(text: &str) -> Step {
    match ArticleText::qualify(text) {
        Some(text) => Step::Success(text),
        None => Step::Retry(format!("too little text ({} chars)", text.trim().chars().count())),
    }
}

/// Runs the tiered extraction for one URL at a time.
pub struct ArticleExtractor<'a, F, R> {
    fetcher: &'a F,
    renderer: Option<&'a R>,
    settings: &'a ExtractSettings,
}

impl<'a, F: Fetch, R: Render> ArticleExtractor<'a, F, R> {
    /// # Arguments
    ///
    /// * `fetcher` - Client for article pages and redirect targets
    /// * `renderer` - Headless browser; `None` disables the render tier
    /// * `settings` - Attempt count, backoff unit and force-render hosts
    pub fn new(fetcher: &'a F, renderer: Option<&'a R>, settings: &'a ExtractSettings) -> Self {
        Self {
            fetcher,
            renderer,
            settings,
        }
    }

    /// Whether the render tier may run for `url`.
    pub fn render_eligible(&self, url: &Url, allow_render: bool) -> bool {
        self.renderer.is_some()
            && (allow_render || host_matches(url, &self.settings.force_render_domains))
    }

    /// Extract readable text from `url`.
    #[instrument(level = "info", skip_all, fields(%url, allow_render))]
    pub async fn extract(&self, url: &Url, allow_render: bool) -> ArticleResult {
        let attempts = self.settings.max_retries.max(1);

        for attempt in 1..=attempts {
            let is_last = attempt == attempts;
            match self.static_attempt(url, is_last).await {
                Step::Success(text) => {
                    info!(attempt, chars = text.as_str().chars().count(), "Extracted article");
                    return ArticleResult::success(url.clone(), text);
                }
                Step::Retry(reason) => {
                    warn!(attempt, max = attempts, %reason, "Static attempt failed");
                }
                Step::Failed(reason) => {
                    warn!(attempt, %reason, "Static extraction abandoned");
                    break;
                }
            }
            if !is_last {
                let delay = self.settings.backoff(attempt);
                debug!(?delay, "Backing off");
                sleep(delay).await;
            }
        }

        if let Some(renderer) = self.renderer.filter(|_| self.render_eligible(url, allow_render)) {
            match self.render_attempt(renderer, url).await {
                Step::Success(text) => {
                    info!(chars = text.as_str().chars().count(), "Extracted article via render");
                    return ArticleResult::success(url.clone(), text);
                }
                Step::Retry(reason) | Step::Failed(reason) => {
                    warn!(%reason, "Render fallback failed");
                }
            }
        }

        warn!("Article extraction failed");
        ArticleResult::failed(url.clone())
    }

    /// One pass of fetch → redirect check → parse → success check.
    async fn static_attempt(&self, url: &Url, is_last: bool) -> Step {
        if !matches!(url.scheme(), "http" | "https") {
            return Step::Failed(format!("unsupported scheme {}", url.scheme()));
        }
        let headers = article_headers();
        let page = match self.fetcher.fetch(url, &headers).await {
            Ok(page) => page,
            Err(e) => return Step::Retry(format!("fetch error: {e}")),
        };

        let target = redirect::find_redirect(&page.body, &page.final_url);
        if let Err(reason) = check_response(&page, is_last, target.is_some()) {
            return Step::Retry(reason);
        }

        let body = match target {
            Some(target) => {
                info!(%target, "Following client-side redirect");
                match self.fetcher.fetch(&target, &headers).await {
                    Ok(next) if next.status == 200 => next.body,
                    Ok(next) => return Step::Retry(format!("redirect target status {}", next.status)),
                    Err(e) => return Step::Retry(format!("redirect fetch error: {e}")),
                }
            }
            None => page.body,
        };

        success_check(&readability::extract_text(&body))
    }

    async fn render_attempt(&self, renderer: &R, url: &Url) -> Step {
        match renderer.render(url).await {
            Ok(html) => success_check(&render::paragraph_text(&html, MIN_RENDERED_PARAGRAPH_CHARS)),
            Err(e) => Step::Failed(format!("render error: {e}")),
        }
    }
}
