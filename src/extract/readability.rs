//! Readability-style text extraction from article HTML.
//!
//! Picks the container that holds the most paragraph text among a handful of
//! well-known article wrappers, and falls back to every paragraph on the page,
//! then to all visible body text. A JSON-LD `articleBody` wins when it is longer
//! than what the markup gave us.

use crate::utils::normalize_whitespace;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};

static CANDIDATES: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article",
        "[itemprop='articleBody']",
        "main",
        ".article-content",
        ".article-body",
        ".article__body",
        ".articleBody",
        ".post-content",
        ".entry-content",
        ".story-body",
        ".content-article",
        "#article",
        "#articleBody",
        "#content",
    ]
    .iter()
    .filter_map(|s| Selector::parse(s).ok())
    .collect()
});

static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static JSON_LD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script[type='application/ld+json']").unwrap());

const SKIPPED: &[&str] = &["script", "style", "noscript", "template", "svg", "iframe"];

/// Visible text under `element`, skipping script-like subtrees.
pub fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| SKIPPED.iter().any(|s| *s == e.name()))
            });
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
    normalize_whitespace(&out)
}

/// Non-empty normalized paragraph texts under `root`, in document order.
pub fn paragraphs(root: ElementRef<'_>) -> Vec<String> {
    root.select(&PARAGRAPH)
        .map(visible_text)
        .filter(|p| !p.is_empty())
        .collect()
}

fn json_ld_article_body(document: &Html) -> Option<String> {
    fn find(value: &serde_json::Value) -> Option<&str> {
        match value {
            serde_json::Value::Object(map) => map
                .get("articleBody")
                .and_then(|b| b.as_str())
                .or_else(|| map.values().find_map(find)),
            serde_json::Value::Array(items) => items.iter().find_map(find),
            _ => None,
        }
    }

    document
        .select(&JSON_LD)
        .filter_map(|script| {
            serde_json::from_str::<serde_json::Value>(script.text().collect::<String>().trim()).ok()
        })
        .find_map(|json| find(&json).map(normalize_whitespace))
}

/// Extract the readable article text of an HTML document.
///
/// Paragraphs are joined with newlines. Returns an empty string when the page
/// has no visible text at all.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let best_container = CANDIDATES
        .iter()
        .flat_map(|selector| document.select(selector))
        .map(|element| {
            let paras = paragraphs(element);
            let score: usize = paras.iter().map(|p| p.chars().count()).sum();
            (score, paras)
        })
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, paras)| paras);

    let mut text = match best_container {
        Some(paras) => paras.join("\n"),
        None => {
            let all = paragraphs(document.root_element());
            if all.is_empty() {
                document
                    .select(&BODY)
                    .next()
                    .map(visible_text)
                    .unwrap_or_default()
            } else {
                all.join("\n")
            }
        }
    };

    if let Some(body) = json_ld_article_body(&document) {
        if body.chars().count() > text.chars().count() {
            text = body;
        }
    }
    text
}
