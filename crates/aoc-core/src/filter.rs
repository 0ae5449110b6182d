//! Filter engine: one filter configuration, one predicate.
//!
//! The listing path and every stats path evaluate the same
//! [`TenderFilter::matches`] predicate, which keeps displayed rows and
//! aggregated counts set-equal for any configuration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Category, Tender};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("date_from {from} is after date_to {to}")]
    InvertedDateRange { from: NaiveDate, to: NaiveDate },
    #[error("unknown portal code: {0}")]
    UnknownPortal(String),
}

/// Bounds on closing_at relative to the evaluation date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingWindow {
    #[default]
    Any,
    Lt7d,
    Lt30d,
    Expired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Title,
    Buyer,
    #[default]
    TitleBuyer,
}

/// Filter configuration shared by the listing and aggregation entry points.
/// `None` on country/portal means "ALL".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenderFilter {
    pub country: Option<String>,
    pub portal: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub closing_window: ClosingWindow,
    pub query: Option<String>,
    pub search_field: SearchField,
    pub ats_only: bool,
}

impl TenderFilter {
    /// Rejects malformed configurations before any query executes.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(ValidationError::InvertedDateRange { from, to });
            }
        }
        Ok(())
    }

    /// The single predicate evaluated identically by every caller.
    pub fn matches(&self, tender: &Tender, today: NaiveDate) -> bool {
        if let Some(country) = &self.country {
            if tender.country != *country {
                return false;
            }
        }
        if let Some(portal) = &self.portal {
            if tender.portal_code != *portal {
                return false;
            }
        }

        // Date bounds apply to published_at; an undated tender cannot
        // satisfy a bound.
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(published) = tender.published_at else {
                return false;
            };
            if let Some(from) = self.date_from {
                if published < from {
                    return false;
                }
            }
            if let Some(to) = self.date_to {
                if published > to {
                    return false;
                }
            }
        }

        match self.closing_window {
            ClosingWindow::Any => {}
            ClosingWindow::Lt7d | ClosingWindow::Lt30d => {
                let horizon = if self.closing_window == ClosingWindow::Lt7d {
                    7
                } else {
                    30
                };
                let Some(closing) = tender.closing_at else {
                    return false;
                };
                if closing < today || closing >= today + chrono::Days::new(horizon) {
                    return false;
                }
            }
            ClosingWindow::Expired => {
                let Some(closing) = tender.closing_at else {
                    return false;
                };
                if closing >= today {
                    return false;
                }
            }
        }

        if let Some(query) = &self.query {
            let needle = query.to_lowercase();
            if !needle.is_empty() {
                let hit = match self.search_field {
                    SearchField::Title => tender.title.to_lowercase().contains(&needle),
                    SearchField::Buyer => tender.buyer.to_lowercase().contains(&needle),
                    SearchField::TitleBuyer => {
                        tender.title.to_lowercase().contains(&needle)
                            || tender.buyer.to_lowercase().contains(&needle)
                    }
                };
                if !hit {
                    return false;
                }
            }
        }

        if self.ats_only && tender.category != Category::Ats {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TenderStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn tender() -> Tender {
        Tender {
            id: Uuid::new_v4(),
            natural_key: "SEAO:https://seao.ca/avis/1".into(),
            portal_code: "SEAO".into(),
            title: "Implémentation CRM ServiceNow".into(),
            buyer: "Ville de Québec".into(),
            country: "CA".into(),
            region: "QC".into(),
            url: "https://seao.ca/avis/1".into(),
            published_at: NaiveDate::from_ymd_opt(2026, 3, 1),
            closing_at: NaiveDate::from_ymd_opt(2026, 3, 20),
            budget: None,
            category: Category::Ti,
            matched_keywords: vec!["crm".into(), "servicenow".into()],
            score: 20,
            status: TenderStatus::Open,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    #[test]
    fn default_filter_matches_everything() {
        assert!(TenderFilter::default().matches(&tender(), today()));
    }

    #[test]
    fn inverted_date_range_is_rejected_before_query() {
        let filter = TenderFilter {
            date_from: NaiveDate::from_ymd_opt(2026, 4, 1),
            date_to: NaiveDate::from_ymd_opt(2026, 3, 1),
            ..Default::default()
        };
        assert!(matches!(
            filter.validate(),
            Err(ValidationError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn country_and_portal_are_exact_matches() {
        let mut filter = TenderFilter {
            country: Some("CA".into()),
            portal: Some("SEAO".into()),
            ..Default::default()
        };
        assert!(filter.matches(&tender(), today()));
        filter.portal = Some("CANADABUYS".into());
        assert!(!filter.matches(&tender(), today()));
    }

    #[test]
    fn date_bounds_exclude_undated_tenders() {
        let filter = TenderFilter {
            date_from: NaiveDate::from_ymd_opt(2026, 1, 1),
            ..Default::default()
        };
        let mut undated = tender();
        undated.published_at = None;
        assert!(filter.matches(&tender(), today()));
        assert!(!filter.matches(&undated, today()));
    }

    #[test]
    fn closing_windows() {
        let t = tender(); // closes 2026-03-20, today 2026-03-15
        let mk = |closing_window| TenderFilter {
            closing_window,
            ..Default::default()
        };
        assert!(mk(ClosingWindow::Lt7d).matches(&t, today()));
        assert!(mk(ClosingWindow::Lt30d).matches(&t, today()));
        assert!(!mk(ClosingWindow::Expired).matches(&t, today()));

        let mut expired = tender();
        expired.closing_at = NaiveDate::from_ymd_opt(2026, 3, 10);
        assert!(mk(ClosingWindow::Expired).matches(&expired, today()));
        assert!(!mk(ClosingWindow::Lt7d).matches(&expired, today()));

        let mut far = tender();
        far.closing_at = NaiveDate::from_ymd_opt(2026, 5, 1);
        assert!(!mk(ClosingWindow::Lt7d).matches(&far, today()));
        assert!(!mk(ClosingWindow::Lt30d).matches(&far, today()));
    }

    #[test]
    fn query_respects_search_field() {
        let base = TenderFilter {
            query: Some("québec".into()),
            ..Default::default()
        };
        let title_only = TenderFilter {
            search_field: SearchField::Title,
            ..base.clone()
        };
        let buyer_only = TenderFilter {
            search_field: SearchField::Buyer,
            ..base.clone()
        };
        assert!(base.matches(&tender(), today()));
        assert!(!title_only.matches(&tender(), today()));
        assert!(buyer_only.matches(&tender(), today()));
    }

    #[test]
    fn ats_only_restricts_category() {
        let filter = TenderFilter {
            ats_only: true,
            ..Default::default()
        };
        assert!(!filter.matches(&tender(), today()));
        let mut ats = tender();
        ats.category = Category::Ats;
        assert!(filter.matches(&ats, today()));
    }
}
