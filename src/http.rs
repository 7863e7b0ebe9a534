//! HTTP plumbing shared by the feed retriever and the article extractor.
//!
//! - [`Fetch`]: one GET with a set of request headers
//! - [`HttpFetcher`]: the reqwest implementation
//! - [`Throttled`]: decorator capping global and per-host concurrency
//! - [`feed_headers`] / [`article_headers`]: browser-like header profiles
//!
//! Many of the feeds and article hosts reject the default client signature,
//! so every request goes out looking like a desktop browser.

use once_cell::sync::Lazy;
use rand::rng;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;

/// A request header as a static name and an owned value.
pub type Header = (&'static str, String);

/// A fetched page.
#[derive(Debug, Clone)]
pub struct Page {
    /// HTTP status code.
    pub status: u16,
    /// URL after following HTTP redirects.
    pub final_url: Url,
    /// Decoded body text.
    pub body: String,
}

/// A single HTTP GET.
///
/// Implementations must apply their own timeout; callers never wait on a
/// request without one.
pub trait Fetch {
    async fn fetch(&self, url: &Url, headers: &[Header]) -> Result<Page, Box<dyn Error>>;
}

const FEED_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    ]
});

/// Headers for feed requests: a fixed desktop browser signature.
pub fn feed_headers() -> Vec<Header> {
    vec![
        ("User-Agent", FEED_USER_AGENT.to_string()),
        (
            "Accept",
            "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5"
                .to_string(),
        ),
    ]
}

/// Headers for article requests. The user agent is drawn from the pool on every call.
pub fn article_headers() -> Vec<Header> {
    let ua = USER_AGENTS.choose(&mut rng()).copied().unwrap_or(FEED_USER_AGENT);
    vec![
        ("User-Agent", ua.to_string()),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("Accept-Language", "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7".to_string()),
        ("Referer", "https://www.google.com/".to_string()),
        ("Connection", "keep-alive".to_string()),
    ]
}

/// The user agent a render session should present.
pub fn render_user_agent() -> &'static str {
    USER_AGENTS.first().copied().unwrap_or(FEED_USER_AGENT)
}

/// reqwest-backed [`Fetch`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client whose every request carries `timeout`.
    ///
    /// Connecting is capped at 5 s within that, and up to 10 redirects are
    /// followed.
    ///
    /// # Returns
    ///
    /// An error only when the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url, headers: &[Header]) -> Result<Page, Box<dyn Error>> {
        let t0 = Instant::now();
        let mut request = self.client.get(url.as_str());
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response.text().await?;
        debug!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "GET complete"
        );
        Ok(Page {
            status,
            final_url,
            body,
        })
    }
}

/// Wraps any [`Fetch`] with a global and a per-host concurrency cap.
///
/// Permits are held for the whole request, so at most `global` requests are in
/// flight overall and at most `per_host` against any one host. The host permit
/// is taken first; a request queued behind a busy host holds no global slot.
pub struct Throttled<F> {
    inner: F,
    global: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl<F> Throttled<F> {
    /// Wrap `inner`.
    ///
    /// # Arguments
    ///
    /// * `inner` - The fetcher doing the actual requests
    /// * `global` - Requests in flight across all hosts (at least 1)
    /// * `per_host` - Requests in flight against a single host (at least 1)
    pub fn new(inner: F, global: usize, per_host: usize) -> Self {
        Self {
            inner,
            global: Arc::new(Semaphore::new(global.max(1))),
            per_host_limit: per_host.max(1),
            per_host: Mutex::new(HashMap::new()),
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = match self.per_host.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }
}

impl<F: Fetch> Fetch for Throttled<F> {
    async fn fetch(&self, url: &Url, headers: &[Header]) -> Result<Page, Box<dyn Error>> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host_sem = self.host_semaphore(&host);
        let waited = Instant::now();
        let _host = host_sem.acquire_owned().await?;
        let _global = self.global.clone().acquire_owned().await?;
        let waited = waited.elapsed();
        if waited > Duration::from_secs(5) {
            warn!(%host, waited_ms = waited.as_millis() as u64, "Waited long for a request slot");
        }
        self.inner.fetch(url, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_article_headers_rotate_from_pool() {
        for _ in 0..20 {
            let headers = article_headers();
            let ua = &headers.iter().find(|(k, _)| *k == "User-Agent").unwrap().1;
            assert!(USER_AGENTS.iter().any(|known| known == ua));
            assert!(headers.iter().any(|(k, _)| *k == "Referer"));
            assert!(headers.iter().any(|(k, v)| *k == "Connection" && v == "keep-alive"));
        }
    }

    #[test]
    fn test_feed_headers_fixed_agent() {
        let headers = feed_headers();
        assert_eq!(headers[0], ("User-Agent", FEED_USER_AGENT.to_string()));
    }

    /// Records the peak number of requests in flight.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Fetch for Gauge {
        async fn fetch(&self, url: &Url, _headers: &[Header]) -> Result<Page, Box<dyn Error>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Page {
                status: 200,
                final_url: url.clone(),
                body: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_throttled_caps_per_host() {
        use futures::future::join_all;

        let throttled = Throttled::new(
            Gauge {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            8,
            2,
        );
        let url = Url::parse("https://one.example/x").unwrap();
        join_all((0..6).map(|_| throttled.fetch(&url, &[]))).await;
        assert!(throttled.inner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_throttled_caps_globally() {
        use futures::future::join_all;

        let throttled = Throttled::new(
            Gauge {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            3,
            10,
        );
        let urls: Vec<Url> = (0..8)
            .map(|i| Url::parse(&format!("https://h{i}.example/x")).unwrap())
            .collect();
        join_all(urls.iter().map(|u| throttled.fetch(u, &[]))).await;
        assert!(throttled.inner.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_busy_host_does_not_starve_other_hosts() {
        use crate::test_support::ScriptedFetcher;
        use futures::future::join_all;

        let scripted = ScriptedFetcher::new();
        scripted.route_stall("https://slow.example/x");
        scripted.route_ok("https://fast.example/x", "ok");
        let throttled = Throttled::new(scripted, 2, 1);

        let slow = Url::parse("https://slow.example/x").unwrap();
        let fast = Url::parse("https://fast.example/x").unwrap();
        let stuck = join_all((0..3).map(|_| throttled.fetch(&slow, &[])));

        let fast_page = tokio::select! {
            biased;
            _ = stuck => None,
            res = tokio::time::timeout(Duration::from_secs(2), throttled.fetch(&fast, &[])) => Some(res),
        };

        let page = fast_page.unwrap().expect("fast host starved").unwrap();
        assert_eq!(page.body, "ok");
        assert_eq!(throttled.inner.calls_to("https://slow.example/x"), 1);
    }
}
