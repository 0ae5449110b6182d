//! Canonical normalizer: maps heterogeneous source records onto the
//! canonical tender shape through fixed-priority alias lists.
//!
//! Source feeds mix French and English field names (title/titre,
//! buyer/acheteur, ...). Each canonical field probes an explicit, ordered
//! alias list and takes the first non-empty value. Malformed input never
//! fails normalization; unresolvable fields come back empty or `None`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A raw listing record as emitted by a source adapter, keyed by the
/// source's own field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    pub fields: Map<String, JsonValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    pub fn set(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// First non-empty value among `aliases`, stringified and trimmed.
    fn first(&self, aliases: &[&str]) -> String {
        for alias in aliases {
            if let Some(value) = self.fields.get(*alias) {
                let text = match value {
                    JsonValue::String(s) => s.trim().to_string(),
                    JsonValue::Number(n) => n.to_string(),
                    JsonValue::Bool(b) => b.to_string(),
                    _ => String::new(),
                };
                if !text.is_empty() {
                    return text;
                }
            }
        }
        String::new()
    }
}

/// Normalized, not-yet-classified tender fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenderDraft {
    pub title: String,
    pub buyer: String,
    pub country: String,
    pub region: String,
    pub url: String,
    pub published_at: Option<NaiveDate>,
    pub closing_at: Option<NaiveDate>,
    pub budget: Option<f64>,
}

const TITLE_ALIASES: &[&str] = &[
    "title",
    "titre",
    "objet",
    "noticeTitleEn",
    "noticeTitleFr",
    "notice_title",
    "summary",
    "name",
];

const BUYER_ALIASES: &[&str] = &[
    "buyer",
    "acheteur",
    "organisme",
    "organisation",
    "buyerName",
    "procuringEntity",
    "organizationName-en",
    "organizationName-fr",
    "agency",
];

const URL_ALIASES: &[&str] = &[
    "url",
    "lien",
    "lienAvis",
    "link",
    "noticeURL",
    "notice_url",
    "tenderNoticeUrl-en",
    "tenderNoticeUrl-fr",
];

const PUBLISHED_ALIASES: &[&str] = &[
    "published_at",
    "date_publication",
    "datePublication",
    "publicationDate",
    "publishedDate",
    "issueDate",
    "published",
];

const CLOSING_ALIASES: &[&str] = &[
    "closing_at",
    "date_cloture",
    "dateLimite",
    "closingDate",
    "bidClosingDate",
    "deadline",
    "closing_date",
];

const BUDGET_ALIASES: &[&str] = &[
    "budget",
    "montant",
    "estimatedValue",
    "valeurEstimee",
    "estimated_budget",
];

const COUNTRY_ALIASES: &[&str] = &["country", "pays"];

const REGION_ALIASES: &[&str] = &["region", "province", "state"];

/// Normalizes one raw record. Returns `None` only when the record carries
/// neither a title nor a url: such a record cannot be identified and is
/// skipped (counted, not erred) by the caller.
pub fn normalize_record(record: &RawRecord) -> Option<TenderDraft> {
    let title = record.first(TITLE_ALIASES);
    let url = record.first(URL_ALIASES);
    if title.is_empty() && url.is_empty() {
        return None;
    }

    Some(TenderDraft {
        title,
        buyer: record.first(BUYER_ALIASES),
        country: record.first(COUNTRY_ALIASES),
        region: record.first(REGION_ALIASES),
        url,
        published_at: parse_date(&record.first(PUBLISHED_ALIASES)),
        closing_at: parse_date(&record.first(CLOSING_ALIASES)),
        budget: parse_budget(&record.first(BUDGET_ALIASES)),
    })
}

/// Parses the date formats observed across feeds; datetime values are
/// truncated to their date prefix. Unparsable input is `None`, never an
/// error.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let prefix: String = value.chars().take(10).collect();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&prefix, fmt) {
            return Some(date);
        }
    }
    None
}

/// Strips currency symbols, spaces and thousands separators, accepting both
/// `1,234.56` and `1 234,56` conventions.
pub fn parse_budget(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // A single trailing comma group of two digits is a decimal comma; any
    // other comma is a thousands separator.
    if let Some(pos) = cleaned.rfind(',') {
        let decimals = cleaned.len() - pos - 1;
        if decimals <= 2 && !cleaned[pos + 1..].contains(',') && !cleaned.contains('.') {
            cleaned.replace_range(pos..=pos, ".");
        }
    }
    let cleaned: String = cleaned.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
