//! Canonicalization of extracted records.
//!
//! [`normalize`] is pure and idempotent: `normalize(normalize(r)) ==
//! normalize(r)`. The canonical URL it produces is the record identity used
//! by the sink.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;
use url::Url;

use crate::models::ArticleRecord;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %B %Y", "%B %d, %Y", "%d/%m/%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn normalize(record: ArticleRecord) -> ArticleRecord {
    ArticleRecord {
        url: canonical_url(&record.url),
        title: clean_text(&record.title),
        published_date: normalize_date(&record.published_date),
        image_url: record.image_url.trim().to_string(),
        summary: clean_text(&record.summary),
    }
}

/// Reduce a URL to `scheme://host[:port]/path` without a trailing slash.
///
/// Query strings (tracking parameters included) and fragments are dropped.
/// Anything that is not an absolute http(s) URL is returned trimmed.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(
///     canonical_url("https://WWW.insead.edu/news/story/?utm_source=x#top"),
///     "https://www.insead.edu/news/story"
/// );
/// ```
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if !matches!(url.scheme(), "http" | "https") {
        return trimmed.to_string();
    }

    let host = url.host_str().unwrap_or_default();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    format!("{}://{}{}{}", url.scheme(), host, port, url.path())
        .trim_end_matches('/')
        .to_string()
}

/// Normalize a publication date to `YYYY-MM-DD`.
///
/// Timestamps keep the calendar date of their own offset. Unparseable input
/// yields an empty string.
pub fn normalize_date(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }
    match parse_date(s) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => {
            warn!(raw = %s, "Unparseable publication date; leaving it empty");
            String::new()
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        })
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn clean_text(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}
