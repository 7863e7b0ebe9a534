//! Scripted stand-ins for the network-facing traits, shared by the unit tests.

use crate::api::Summarizer;
use crate::extract::render::Render;
use crate::http::{Fetch, Header, Page};
use crate::notify::{DeliveryReport, DestinationOutcome, NotificationSink};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone)]
enum Reply {
    Page { status: u16, body: String },
    Error(String),
    Stall,
}

/// A [`Fetch`] that replays queued replies per URL.
///
/// Replies for a URL are served in order; the last one repeats forever.
/// Unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, url: &str, reply: Reply) {
        let key = Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.routes.lock().unwrap().entry(key).or_default().push_back(reply);
    }

    pub fn route_ok(&self, url: &str, body: &str) {
        self.route_status(url, 200, body);
    }

    pub fn route_status(&self, url: &str, status: u16, body: &str) {
        self.push(
            url,
            Reply::Page {
                status,
                body: body.to_string(),
            },
        );
    }

    pub fn route_error(&self, url: &str, message: &str) {
        self.push(url, Reply::Error(message.to_string()));
    }

    /// Never answer requests for `url`.
    pub fn route_stall(&self, url: &str) {
        self.push(url, Reply::Stall);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        let key = Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.calls.lock().unwrap().iter().filter(|c| **c == key).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetch for ScriptedFetcher {
    async fn fetch(&self, url: &Url, _headers: &[Header]) -> Result<Page, Box<dyn Error>> {
        let key = url.to_string();
        self.calls.lock().unwrap().push(key.clone());
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        tokio::task::yield_now().await;
        match reply {
            Some(Reply::Page { status, body }) => Ok(Page {
                status,
                final_url: url.clone(),
                body,
            }),
            Some(Reply::Error(message)) => Err(message.into()),
            Some(Reply::Stall) => std::future::pending().await,
            None => Ok(Page {
                status: 404,
                final_url: url.clone(),
                body: "not found".to_string(),
            }),
        }
    }
}

/// A [`Render`] that returns fixed HTML per URL and counts sessions.
#[derive(Default)]
pub struct ScriptedRenderer {
    pages: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, html: &str) {
        let key = Url::parse(url).unwrap().to_string();
        self.pages.lock().unwrap().insert(key, html.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Render for ScriptedRenderer {
    async fn render(&self, url: &Url) -> Result<String, Box<dyn Error>> {
        self.calls.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| "render session failed".into())
    }
}

/// A [`Summarizer`] that echoes a canned answer or fails.
pub struct CannedSummarizer {
    pub answer: Result<String, String>,
    pub inputs: Mutex<Vec<String>>,
}

impl CannedSummarizer {
    pub fn ok(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            inputs: Mutex::new(Vec::new()),
        }
    }
}

impl Summarizer for CannedSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, Box<dyn Error>> {
        self.inputs.lock().unwrap().push(text.to_string());
        self.answer.clone().map_err(|e| e.into())
    }
}

/// A [`NotificationSink`] that records what it was asked to send.
pub struct RecordingSink {
    pub destinations: Vec<(String, bool)>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new(destinations: &[(&str, bool)]) -> Self {
        Self {
            destinations: destinations
                .iter()
                .map(|(d, ok)| (d.to_string(), *ok))
                .collect(),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl NotificationSink for RecordingSink {
    async fn send(&self, title: &str, body: &str) -> DeliveryReport {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        DeliveryReport {
            outcomes: self
                .destinations
                .iter()
                .map(|(destination, ok)| DestinationOutcome {
                    destination: destination.clone(),
                    result: if *ok { Ok(()) } else { Err("rejected".to_string()) },
                })
                .collect(),
        }
    }
}

/// Build an RSS 2.0 document from `(title, link)` pairs.
pub fn rss(items: &[(&str, &str)]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>"#);
    for (title, link) in items {
        xml.push_str(&format!("<item><title>{title}</title><link>{link}</link></item>"));
    }
    xml.push_str("</channel></rss>");
    xml
}

/// An article page whose body paragraphs carry `text`, padded past the short-body threshold.
pub fn article_page(text: &str) -> String {
    format!(
        r#"<html><head><title>t</title><style>.x {{ color: red; }}</style></head>
<body><nav><a href="/">Home</a></nav>
<article><p>{text}</p></article>
<footer><p>Copyright</p></footer>
<!-- {pad} --></body></html>"#,
        pad = "-".repeat(300)
    )
}

/// Article prose long enough to qualify as extracted text.
pub fn prose(seed: &str) -> String {
    format!("{seed} ").repeat(60).trim().to_string()
}
