//! Feed document parsing.
//!
//! Handles RSS 2.0, RSS 1.0 (RDF) and Atom with a single pass over quick-xml
//! events. Only titles and links are kept; everything else in an entry is
//! skipped.

use crate::models::FeedEntry;
use crate::utils::normalize_whitespace;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::error::Error;
use std::fmt;
use url::Url;

const UNTITLED: &str = "(untitled)";

#[derive(Debug)]
pub enum FeedParseError {
    Xml(quick_xml::Error),
    NotAFeed,
}

impl fmt::Display for FeedParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedParseError::Xml(e) => write!(f, "malformed feed xml: {e}"),
            FeedParseError::NotAFeed => write!(f, "document is not an rss or atom feed"),
        }
    }
}

impl Error for FeedParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FeedParseError::Xml(e) => Some(e),
            FeedParseError::NotAFeed => None,
        }
    }
}

/// Which text field of the current entry we are inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Guid { permalink: bool },
}

#[derive(Debug, Default)]
struct PendingEntry {
    title: String,
    link: Option<String>,
    atom_link: Option<String>,
    guid: Option<String>,
}

impl PendingEntry {
    fn finish(self, base: Option<&Url>) -> FeedEntry {
        let title = normalize_whitespace(&unescape(&self.title));
        let title = if title.is_empty() {
            UNTITLED.to_string()
        } else {
            title
        };
        let link = [self.link, self.atom_link, self.guid]
            .into_iter()
            .flatten()
            .find_map(|raw| usable_link(&raw, base));
        FeedEntry { title, link }
    }
}

/// Resolve a raw link into an absolute http(s) URL.
fn usable_link(raw: &str, base: Option<&Url>) -> Option<Url> {
    let raw = unescape(raw.trim());
    if raw.is_empty() {
        return None;
    }
    let parsed = match Url::parse(&raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(&raw).ok()?,
        Err(_) => return None,
    };
    matches!(parsed.scheme(), "http" | "https").then_some(parsed)
}

fn unescape(raw: &str) -> String {
    match quick_xml::escape::unescape(raw) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// An Atom `<link>` is the article link when it has no `rel` or `rel="alternate"`.
fn atom_alternate_href(e: &BytesStart<'_>) -> Option<String> {
    match attr(e, b"rel").as_deref() {
        None | Some("alternate") => attr(e, b"href"),
        Some(_) => None,
    }
}

/// Parse a feed body into entries, in document order.
///
/// `base` resolves relative entry links (usually the feed URL). A document with
/// no feed root is an error; a feed with no entries is an empty list.
pub fn parse_feed(xml: &str, base: Option<&Url>) -> Result<Vec<FeedEntry>, FeedParseError> {
    let mut reader = Reader::from_str(xml);

    let mut entries = Vec::new();
    let mut saw_root = false;
    let mut pending: Option<PendingEntry> = None;
    let mut field: Option<Field> = None;
    let mut depth_in_entry = 0usize;

    loop {
        match reader.read_event().map_err(FeedParseError::Xml)? {
            Event::Start(e) => {
                let local = e.local_name();
                let name = local.as_ref();
                if let Some(entry) = pending.as_mut() {
                    depth_in_entry += 1;
                    if depth_in_entry == 1 {
                        field = match name {
                            b"title" => Some(Field::Title),
                            b"link" => {
                                if let Some(href) = atom_alternate_href(&e) {
                                    entry.atom_link.get_or_insert(href);
                                }
                                Some(Field::Link)
                            }
                            b"guid" | b"id" => Some(Field::Guid {
                                permalink: attr(&e, b"isPermaLink").as_deref() != Some("false"),
                            }),
                            _ => None,
                        };
                    }
                } else {
                    match name {
                        b"rss" | b"RDF" | b"feed" | b"channel" => saw_root = true,
                        b"item" | b"entry" => {
                            pending = Some(PendingEntry::default());
                            depth_in_entry = 0;
                        }
                        _ => {}
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(entry) = pending.as_mut() {
                    if e.local_name().as_ref() == b"link" {
                        if let Some(href) = atom_alternate_href(&e) {
                            entry.atom_link.get_or_insert(href);
                        }
                    }
                }
            }
            Event::Text(t) => {
                push_text(&mut pending, field, &String::from_utf8_lossy(&t));
            }
            Event::CData(c) => {
                // CDATA is literal; escape it so the single unescape pass leaves it intact.
                let raw = String::from_utf8_lossy(&c).into_owned();
                push_text(&mut pending, field, &quick_xml::escape::escape(&raw));
            }
            Event::GeneralRef(r) => {
                let name = String::from_utf8_lossy(&r).into_owned();
                push_text(&mut pending, field, &format!("&{name};"));
            }
            Event::End(e) => {
                let local = e.local_name();
                let name = local.as_ref();
                if pending.is_some() {
                    if depth_in_entry == 0 && matches!(name, b"item" | b"entry") {
                        if let Some(entry) = pending.take() {
                            entries.push(entry.finish(base));
                        }
                        field = None;
                    } else {
                        depth_in_entry = depth_in_entry.saturating_sub(1);
                        if depth_in_entry == 0 {
                            field = None;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root && entries.is_empty() {
        return Err(FeedParseError::NotAFeed);
    }
    Ok(entries)
}

fn push_text(pending: &mut Option<PendingEntry>, field: Option<Field>, text: &str) {
    let Some(entry) = pending.as_mut() else {
        return;
    };
    match field {
        Some(Field::Title) => entry.title.push_str(text),
        Some(Field::Link) => entry.link.get_or_insert_with(String::new).push_str(text),
        Some(Field::Guid { permalink: true }) => {
            entry.guid.get_or_insert_with(String::new).push_str(text)
        }
        Some(Field::Guid { permalink: false }) | None => {}
    }
}
