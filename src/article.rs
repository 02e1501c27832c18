//! Normalized article entity and wire-document ingestion.
//!
//! Source documents arrive with a dynamic shape: ids may be numbers or
//! strings, the image field is `imageUrl` or `image`, the teaser is `snippet`
//! or `description`, and `date` is anything from RFC 3339 to a long-form US
//! locale string. All of that is resolved exactly once at ingestion; the rest
//! of the crate only ever sees the fixed-shape [`Article`].
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer};

// ============================================================================
// Article Identity
// ============================================================================

/// Opaque, stable article identifier.
///
/// Sources use numeric or string ids interchangeably; both are carried as
/// strings and compared byte-for-byte. Uniqueness is assumed, not verified —
/// id-keyed lookups take the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleId(Arc<str>);

impl ArticleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Accept both `"id": "abc"` and `"id": 123` from the wire.
fn deserialize_id<'de, D>(deserializer: D) -> Result<ArticleId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => ArticleId::new(s),
        Raw::Num(n) => ArticleId::new(n.to_string()),
    })
}

// ============================================================================
// Normalized Entity
// ============================================================================

/// Fixed-shape article as used by the feed pipeline.
///
/// String fields use `Arc<str>` so cloning into cache entries and view
/// snapshots is a reference-count bump, not a copy.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: ArticleId,
    /// Fine-grained topic label; drives the preferred-categories feed.
    pub category: Arc<str>,
    /// Coarser desk/section label; drives the main category filter.
    pub section: Arc<str>,
    pub title_biased: Arc<str>,
    pub title_unbiased: Arc<str>,
    /// Epoch seconds parsed from the source `date` string; `None` when the
    /// string was unparsable. Parsing never fails the ingest.
    pub published: Option<i64>,
    pub snippet: Arc<str>,
    pub body: Arc<str>,
    pub image_url: Option<Arc<str>>,
}

impl Article {
    /// Headline to display for the given bias mode.
    ///
    /// Either variant may be empty; the requested one wins when present,
    /// then the other, then a placeholder.
    pub fn display_title(&self, unbiased: bool) -> &str {
        let (wanted, other) = if unbiased {
            (&self.title_unbiased, &self.title_biased)
        } else {
            (&self.title_biased, &self.title_unbiased)
        };
        if !wanted.is_empty() {
            wanted
        } else if !other.is_empty() {
            other
        } else {
            "(untitled)"
        }
    }
}

// ============================================================================
// Wire Document
// ============================================================================

/// Raw article document as served by the news API.
///
/// Alternate field names are folded here via serde aliases; conversion to
/// [`Article`] happens in [`ArticleDoc::normalize`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDoc {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: ArticleId,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub title_biased: String,
    #[serde(default)]
    pub title_unbiased: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, alias = "description")]
    pub snippet: String,
    #[serde(default, alias = "content")]
    pub body: String,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
}

impl ArticleDoc {
    /// Resolve the dynamic wire shape into a fixed [`Article`].
    pub fn normalize(self) -> Article {
        let published = parse_published(&self.date);
        if published.is_none() && !self.date.is_empty() {
            tracing::debug!(id = %self.id, date = %self.date, "Unparsable article date, sorting as earliest");
        }
        Article {
            id: self.id,
            category: Arc::from(self.category),
            section: Arc::from(self.section),
            title_biased: Arc::from(self.title_biased),
            title_unbiased: Arc::from(self.title_unbiased),
            published,
            snippet: Arc::from(self.snippet),
            body: Arc::from(self.body),
            image_url: self.image_url.filter(|u| !u.is_empty()).map(Arc::from),
        }
    }
}

// ============================================================================
// Date Parsing
// ============================================================================

/// US timezone abbreviations that appear in long-form source dates.
/// Offsets in seconds east of UTC.
const TZ_ABBREVIATIONS: &[(&str, i32)] = &[
    ("EST", -5 * 3600),
    ("EDT", -4 * 3600),
    ("CST", -6 * 3600),
    ("CDT", -5 * 3600),
    ("MST", -7 * 3600),
    ("MDT", -6 * 3600),
    ("PST", -8 * 3600),
    ("PDT", -7 * 3600),
    ("UTC", 0),
    ("GMT", 0),
];

/// Datetime formats tried for long-form locale strings, after the timezone
/// abbreviation (if any) has been stripped. Order matters: with-minutes
/// variants first.
const LOCALE_DATETIME_FORMATS: &[&str] = &[
    "%B %d, %Y, %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y, %I:%M %p",
    "%b %d, %Y %I:%M %p",
];

const LOCALE_DATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y"];

/// Parse a loosely-formatted source date into epoch seconds.
///
/// Accepted shapes, in order:
/// 1. RFC 3339 (`2023-06-01T12:30:00Z`, offset variants)
/// 2. Bare ISO datetime without zone (`2023-06-01T12:30:00`), taken as UTC
/// 3. Bare ISO date (`2023-06-01`), taken as UTC midnight
/// 4. Long-form US locale strings (`June 1, 2023, 4:30 PM EDT`)
///
/// Returns `None` for anything else — callers must treat an unparsable date
/// as sorting-earliest rather than an error.
pub fn parse_published(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc().timestamp());
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc().timestamp());
    }

    parse_locale_date(raw)
}

/// Handle `"June 1, 2023, 4:30 PM EDT"` and friends.
fn parse_locale_date(raw: &str) -> Option<i64> {
    let (stripped, offset_secs) = strip_tz_abbreviation(raw);

    let offset = FixedOffset::east_opt(offset_secs)?;

    for fmt in LOCALE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, fmt) {
            let local = naive.and_local_timezone(offset).single()?;
            return Some(local.with_timezone(&Utc).timestamp());
        }
    }

    for fmt in LOCALE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(stripped, fmt) {
            let local = date
                .and_time(NaiveTime::MIN)
                .and_local_timezone(offset)
                .single()?;
            return Some(local.with_timezone(&Utc).timestamp());
        }
    }

    None
}

/// Split a trailing timezone abbreviation off a date string.
///
/// Returns the remainder and the abbreviation's UTC offset in seconds
/// (0 when no known abbreviation is present).
fn strip_tz_abbreviation(raw: &str) -> (&str, i32) {
    if let Some((head, tail)) = raw.rsplit_once(' ') {
        let tail = tail.trim();
        for (abbr, offset) in TZ_ABBREVIATIONS {
            if tail.eq_ignore_ascii_case(abbr) {
                return (head.trim_end(), *offset);
            }
        }
    }
    (raw, 0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc_json(json: &str) -> Article {
        serde_json::from_str::<ArticleDoc>(json).unwrap().normalize()
    }

    #[test]
    fn test_id_accepts_string_and_number() {
        let a = doc_json(r#"{"id": "abc-1"}"#);
        assert_eq!(a.id.as_str(), "abc-1");

        let b = doc_json(r#"{"id": 42}"#);
        assert_eq!(b.id.as_str(), "42");
    }

    #[test]
    fn test_image_field_alternates() {
        let a = doc_json(r#"{"id": 1, "imageUrl": "https://img/a.jpg"}"#);
        assert_eq!(a.image_url.as_deref(), Some("https://img/a.jpg"));

        let b = doc_json(r#"{"id": 2, "image": "https://img/b.jpg"}"#);
        assert_eq!(b.image_url.as_deref(), Some("https://img/b.jpg"));

        let c = doc_json(r#"{"id": 3, "image": ""}"#);
        assert_eq!(c.image_url, None);
    }

    #[test]
    fn test_snippet_field_alternates() {
        let a = doc_json(r#"{"id": 1, "snippet": "teaser"}"#);
        assert_eq!(&*a.snippet, "teaser");

        let b = doc_json(r#"{"id": 2, "description": "teaser too"}"#);
        assert_eq!(&*b.snippet, "teaser too");
    }

    #[test]
    fn test_display_title_fallbacks() {
        let a = doc_json(r#"{"id": 1, "titleBiased": "Loud!", "titleUnbiased": "Quiet"}"#);
        assert_eq!(a.display_title(false), "Loud!");
        assert_eq!(a.display_title(true), "Quiet");

        let only_biased = doc_json(r#"{"id": 2, "titleBiased": "Loud!"}"#);
        assert_eq!(only_biased.display_title(true), "Loud!");

        let only_unbiased = doc_json(r#"{"id": 3, "titleUnbiased": "Quiet"}"#);
        assert_eq!(only_unbiased.display_title(false), "Quiet");

        let neither = doc_json(r#"{"id": 4}"#);
        assert_eq!(neither.display_title(false), "(untitled)");
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_published("2023-06-01T00:00:00Z"), Some(1685577600));
        // Offset form normalizes to the same instant
        assert_eq!(
            parse_published("2023-05-31T20:00:00-04:00"),
            Some(1685577600)
        );
    }

    #[test]
    fn test_parse_bare_iso_forms() {
        assert_eq!(parse_published("2023-06-01"), Some(1685577600));
        assert_eq!(parse_published("2023-06-01T06:30:00"), Some(1685601000));
    }

    #[test]
    fn test_parse_locale_with_us_timezone() {
        // 8:00 PM EDT on May 31 == midnight UTC on June 1
        assert_eq!(
            parse_published("May 31, 2023, 8:00 PM EDT"),
            Some(1685577600)
        );
        // Date-only locale form, EST
        assert_eq!(parse_published("June 1, 2023 EST"), Some(1685595600));
    }

    #[test]
    fn test_unparsable_dates_yield_none() {
        assert_eq!(parse_published(""), None);
        assert_eq!(parse_published("yesterday"), None);
        assert_eq!(parse_published("13/45/9999"), None);
        assert_eq!(parse_published("June 1st of last year, probably"), None);
    }

    #[test]
    fn test_normalize_keeps_unparsable_date_article() {
        let a = doc_json(r#"{"id": 1, "date": "not a date", "titleBiased": "T"}"#);
        assert_eq!(a.published, None);
        assert_eq!(&*a.title_biased, "T");
    }
}
