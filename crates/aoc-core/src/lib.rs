//! Core domain model for the AO collector: canonical tender shape,
//! normalization, keyword classification, filtering and aggregation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub mod classify;
pub mod filter;
pub mod normalize;
pub mod stats;

pub use classify::{classify, Classification, KeywordRule};
pub use filter::{ClosingWindow, SearchField, TenderFilter, ValidationError};
pub use normalize::{normalize_record, RawRecord, TenderDraft};
pub use stats::{aggregate, StatsBucket, StatsDimension, StatsReport};

pub const CRATE_NAME: &str = "aoc-core";

/// Business categories, in tie-break order: when two categories collect the
/// same vote total the one declared first wins. `Autres` is the catch-all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Category {
    #[serde(rename = "ATS")]
    Ats,
    #[serde(rename = "CRM")]
    Crm,
    #[serde(rename = "ERP")]
    Erp,
    #[serde(rename = "TI")]
    Ti,
    Cloud,
    Data,
    Autres,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Ats,
        Category::Crm,
        Category::Erp,
        Category::Ti,
        Category::Cloud,
        Category::Data,
        Category::Autres,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Ats => "ATS",
            Category::Crm => "CRM",
            Category::Erp => "ERP",
            Category::Ti => "TI",
            Category::Cloud => "Cloud",
            Category::Data => "Data",
            Category::Autres => "Autres",
        }
    }

    pub fn from_label(label: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.label() == label)
    }
}

/// Explicit lifecycle status. A tender absent from a later portal fetch is
/// left untouched; status only changes through an explicit update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenderStatus {
    Open,
    Expired,
}

/// Canonical persisted tender record, unique on `natural_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tender {
    pub id: Uuid,
    pub natural_key: String,
    pub portal_code: String,
    pub title: String,
    pub buyer: String,
    pub country: String,
    pub region: String,
    pub url: String,
    pub published_at: Option<NaiveDate>,
    pub closing_at: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub category: Category,
    pub matched_keywords: Vec<String>,
    pub score: u32,
    pub status: TenderStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    OpenDataOcds,
    OpenDataCsv,
    PortalApi,
    PortalWeb,
    Aggregator,
}

/// A procurement source system (SEAO, CanadaBuys, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    pub code: String,
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub source_type: SourceType,
    pub is_active: bool,
}

/// Derived identity used for deduplication across re-syncs: portal + url
/// when a url is present, otherwise portal + a hash of title, buyer and
/// publication date.
pub fn natural_key(portal_code: &str, draft: &TenderDraft) -> String {
    if !draft.url.is_empty() {
        return format!("{}:{}", portal_code, draft.url);
    }
    let mut hasher = Sha256::new();
    hasher.update(draft.title.as_bytes());
    hasher.update(b"|");
    hasher.update(draft.buyer.as_bytes());
    hasher.update(b"|");
    if let Some(date) = draft.published_at {
        hasher.update(date.to_string().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", portal_code, &digest[..16])
}

/// Sortable canonical fields for the listing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    PublishedAt,
    ClosingAt,
    Title,
    Buyer,
    Country,
    Region,
    Portal,
    Category,
    Score,
    FirstSeenAt,
    LastSeenAt,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::PublishedAt
    }
}

/// Stable sort; missing dates always order after present ones so that the
/// default published_at-descending listing keeps undated tenders last.
pub fn sort_tenders(tenders: &mut [Tender], key: SortKey, descending: bool) {
    use std::cmp::Ordering;

    fn date_cmp(a: Option<NaiveDate>, b: Option<NaiveDate>, descending: bool) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => {
                if descending {
                    b.cmp(&a)
                } else {
                    a.cmp(&b)
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    tenders.sort_by(|a, b| {
        let ord = match key {
            SortKey::PublishedAt => return date_cmp(a.published_at, b.published_at, descending),
            SortKey::ClosingAt => return date_cmp(a.closing_at, b.closing_at, descending),
            SortKey::Title => a.title.cmp(&b.title),
            SortKey::Buyer => a.buyer.cmp(&b.buyer),
            SortKey::Country => a.country.cmp(&b.country),
            SortKey::Region => a.region.cmp(&b.region),
            SortKey::Portal => a.portal_code.cmp(&b.portal_code),
            SortKey::Category => a.category.cmp(&b.category),
            SortKey::Score => a.score.cmp(&b.score),
            SortKey::FirstSeenAt => a.first_seen_at.cmp(&b.first_seen_at),
            SortKey::LastSeenAt => a.last_seen_at.cmp(&b.last_seen_at),
        };
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
}
