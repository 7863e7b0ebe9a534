//! Script-capable page rendering, used as the last extraction tier.
//!
//! [`HeadlessBrowser`] drives a locally installed Chromium-family browser in
//! headless mode and dumps the DOM once a virtual-time budget has elapsed. The
//! capability is optional: when no browser is found the extractor simply has no
//! render tier.

use crate::extract::readability::paragraphs;
use crate::http::render_user_agent;
use scraper::Html;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use url::Url;

/// Browser executables looked up on `PATH`, in order.
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "microsoft-edge",
];

/// Loads a page with script execution and returns the resulting HTML.
pub trait Render {
    async fn render(&self, url: &Url) -> Result<String, Box<dyn Error>>;
}

/// Settings for the headless browser.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// How long scripts get to run before the DOM is captured.
    pub settle: Duration,
    /// Hard limit on a whole render session.
    pub timeout: Duration,
    /// Concurrent browser processes.
    pub max_sessions: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            timeout: Duration::from_secs(25),
            max_sessions: 2,
        }
    }
}

/// Headless Chromium driven through `--dump-dom`.
#[derive(Debug)]
pub struct HeadlessBrowser {
    binary: PathBuf,
    settings: RenderSettings,
    sessions: Semaphore,
}

impl HeadlessBrowser {
    pub fn new(binary: PathBuf, settings: RenderSettings) -> Self {
        let sessions = Semaphore::new(settings.max_sessions.max(1));
        Self {
            binary,
            settings,
            sessions,
        }
    }

    /// Look for a known browser on `PATH`.
    pub fn detect(settings: RenderSettings) -> Option<Self> {
        let path = std::env::var_os("PATH")?;
        let found = std::env::split_paths(&path).find_map(|dir| {
            BROWSER_CANDIDATES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
        })?;
        info!(binary = %found.display(), "Found headless browser for render fallback");
        Some(Self::new(found, settings))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, url: &Url) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .arg(format!("--user-agent={}", render_user_agent()))
            .arg(format!("--virtual-time-budget={}", self.settings.settle.as_millis()))
            .arg("--dump-dom")
            .arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Render for HeadlessBrowser {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn render(&self, url: &Url) -> Result<String, Box<dyn Error>> {
        let _session = self.sessions.acquire().await?;
        let t0 = Instant::now();
        let output = timeout(self.settings.timeout, self.command(url).output())
            .await
            .map_err(|_| format!("render session exceeded {:?}", self.settings.timeout))??;
        if !output.status.success() {
            return Err(format!("browser exited with {}", output.status).into());
        }
        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            bytes = html.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Render session complete"
        );
        Ok(html)
    }
}

/// Join the paragraphs of a rendered page that are longer than `min_chars`.
pub fn paragraph_text(html: &str, min_chars: usize) -> String {
    let document = Html::parse_document(html);
    paragraphs(document.root_element())
        .into_iter()
        .filter(|p| p.chars().count() > min_chars)
        .collect::<Vec<_>>()
        .join("\n")
}
