//! Detection of client-side redirect shells.
//!
//! Some hosts answer non-browser clients with a tiny page whose only job is to
//! send a browser somewhere else via script or a meta refresh. The real content
//! lives at the target.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>(.*?)</script>").unwrap());

static LOCATION_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\blocation(?:\.href)?\s*=\s*["']([^"']+)["']"#).unwrap()
});

static LOCATION_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\blocation\.(?:replace|assign)\(\s*["']([^"']+)["']\s*\)"#).unwrap()
});

static META_REFRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["'][^"']*?url\s*=\s*['"]?([^"'>\s]+)"#,
    )
    .unwrap()
});

/// Find the redirect target of a shell page, resolved against `base`.
///
/// Only script blocks and meta refresh tags are inspected, so inline event
/// handlers on ordinary pages do not count. A target equal to `base` or with a
/// non-http(s) scheme is ignored.
pub fn find_redirect(html: &str, base: &Url) -> Option<Url> {
    let from_scripts = SCRIPT_BLOCK
        .captures_iter(html)
        .filter_map(|block| block.get(1))
        .flat_map(|script| {
            let script = script.as_str();
            LOCATION_ASSIGN
                .captures_iter(script)
                .chain(LOCATION_CALL.captures_iter(script))
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect::<Vec<_>>()
        });
    let from_meta = META_REFRESH
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()));

    from_scripts
        .chain(from_meta)
        .filter_map(|raw| resolve(&raw, base))
        .find(|target| target != base)
}

fn resolve(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.replace("\\/", "/").replace("&amp;", "&");
    let target = base.join(raw.trim()).ok()?;
    matches!(target.scheme(), "http" | "https").then_some(target)
}
