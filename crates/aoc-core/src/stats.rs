//! Stats aggregator over an already-filtered tender collection.
//!
//! Category and portal buckets partition the input (one bucket per tender);
//! keyword buckets overlap, so their counts may sum past `total_tenders`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Tender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsDimension {
    Category,
    Keyword,
    Portal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsBucket {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub total_tenders: u64,
    pub distinct_buckets: u64,
    pub buckets: Vec<StatsBucket>,
    /// Set when the underlying scan hit its row ceiling and the report
    /// covers a truncated set.
    pub truncated: bool,
}

/// Groups the filtered set along `dimension`. Buckets are sorted by count
/// descending, label ascending, then truncated to `top_n` when given.
/// `distinct_buckets` counts buckets before truncation. An empty input
/// yields zero counts, never an error.
pub fn aggregate(
    tenders: &[Tender],
    dimension: StatsDimension,
    top_n: Option<usize>,
) -> StatsReport {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for tender in tenders {
        match dimension {
            StatsDimension::Category => {
                *counts.entry(tender.category.label().to_string()).or_default() += 1;
            }
            StatsDimension::Portal => {
                *counts.entry(tender.portal_code.clone()).or_default() += 1;
            }
            StatsDimension::Keyword => {
                for keyword in &tender.matched_keywords {
                    *counts.entry(keyword.clone()).or_default() += 1;
                }
            }
        }
    }

    let distinct_buckets = counts.len() as u64;
    let mut buckets: Vec<StatsBucket> = counts
        .into_iter()
        .map(|(label, count)| StatsBucket { label, count })
        .collect();
    // BTreeMap already yields label-ascending order; the stable sort keeps
    // that as the tie-break under count-descending.
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    if let Some(top_n) = top_n {
        buckets.truncate(top_n);
    }

    StatsReport {
        total_tenders: tenders.len() as u64,
        distinct_buckets,
        buckets,
        truncated: false,
    }
}
