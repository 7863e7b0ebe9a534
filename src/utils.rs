//! Small helpers for string bounds, whitespace, hosts and dates.

use chrono::{FixedOffset, Utc};

/// Truncate a string for logging purposes.
///
/// Keeps the first `max` characters and appends the number of bytes dropped.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// The first `max` characters of `s`.
pub fn take_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        None => s,
        Some((cut, _)) => &s[..cut],
    }
}

/// Collapse runs of whitespace (newlines included) into single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `url`'s host is one of `domains` or a subdomain of one.
pub fn host_matches(url: &url::Url, domains: &[String]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        !domain.is_empty()
            && (host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

/// Today's date (`YYYY-MM-DD`) at a fixed UTC offset in hours.
pub fn today_date(utc_offset_hours: i32) -> String {
    let now = Utc::now();
    match FixedOffset::east_opt(utc_offset_hours.clamp(-23, 23) * 3600) {
        Some(offset) => now.with_timezone(&offset).format("%Y-%m-%d").to_string(),
        None => now.format("%Y-%m-%d").to_string(),
    }
}

/// Hide all but the first few characters of a secret for logs and reports.
pub fn mask_secret(secret: &str) -> String {
    let visible = take_chars(secret, 4);
    if visible.len() == secret.len() {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
