//! Transport-agnostic tender service: ingestion runs and the query surface
//! shared by the web API and the CLI.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use aoc_adapters::adapter_for_portal;
use aoc_core::{
    aggregate, classify, natural_key, normalize_record, sort_tenders, KeywordRule, Portal,
    RawRecord, SortKey, StatsDimension, StatsReport, Tender, TenderFilter, TenderStatus,
    ValidationError,
};
use aoc_store::{StoreError, TenderStore, UpsertOutcome};

use crate::QueryError;

/// Outcome of one ingestion run against one portal. Conflicts are partial
/// failures: the run continues past them and names the keys it lost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub portal_code: String,
    pub inserted_count: u64,
    pub updated_count: u64,
    pub skipped_count: u64,
    pub conflicts: Vec<String>,
}

/// Listing page plus the flag saying whether the underlying scan hit its
/// row ceiling before the filter ran.
#[derive(Debug, Clone, Serialize)]
pub struct TenderListing {
    pub tenders: Vec<Tender>,
    pub truncated: bool,
}

#[derive(Clone)]
pub struct TenderService {
    store: TenderStore,
    rules: Arc<Vec<KeywordRule>>,
    max_scan_rows: usize,
}

impl TenderService {
    pub fn new(store: TenderStore, rules: Vec<KeywordRule>, max_scan_rows: usize) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
            max_scan_rows: max_scan_rows.max(1),
        }
    }

    pub fn store(&self) -> &TenderStore {
        &self.store
    }

    /// Registers (or refreshes) portal catalogue entries.
    pub async fn seed_portals(&self, portals: &[Portal]) -> Result<(), QueryError> {
        for portal in portals {
            self.store.upsert_portal(portal).await?;
        }
        info!(count = portals.len(), "portal catalogue seeded");
        Ok(())
    }

    pub async fn list_portals(
        &self,
        only_active: bool,
        country: Option<&str>,
    ) -> Result<Vec<Portal>, QueryError> {
        Ok(self.store.list_portals(only_active, country).await?)
    }

    /// Runs the full pipeline for one portal's already-parsed records:
    /// normalize, classify, derive the natural key and upsert. Unusable
    /// records are skipped and counted; an upsert that exhausts its retry
    /// budget is recorded in `conflicts` and the run moves on. Store
    /// unavailability aborts the run.
    pub async fn sync_portal(
        &self,
        portal_code: &str,
        records: &[RawRecord],
        now: DateTime<Utc>,
    ) -> Result<SyncSummary, QueryError> {
        if !self.store.portal_exists(portal_code).await? {
            return Err(ValidationError::UnknownPortal(portal_code.to_string()).into());
        }

        let today = now.date_naive();
        let mut summary = SyncSummary {
            portal_code: portal_code.to_string(),
            ..Default::default()
        };

        for record in records {
            let Some(draft) = normalize_record(record) else {
                summary.skipped_count += 1;
                continue;
            };

            let classification = classify(&draft.title, &draft.buyer, &self.rules);
            let status = match draft.closing_at {
                Some(closing) if closing < today => TenderStatus::Expired,
                _ => TenderStatus::Open,
            };
            let tender = Tender {
                id: Uuid::new_v4(),
                natural_key: natural_key(portal_code, &draft),
                portal_code: portal_code.to_string(),
                title: draft.title,
                buyer: draft.buyer,
                country: draft.country,
                region: draft.region,
                url: draft.url,
                published_at: draft.published_at,
                closing_at: draft.closing_at,
                budget: draft.budget,
                category: classification.category,
                matched_keywords: classification.matched_keywords,
                score: classification.score,
                status,
                first_seen_at: now,
                last_seen_at: now,
            };

            let outcome = self.store.upsert_tender(&tender, now).await;
            record_outcome(&mut summary, outcome)?;
        }

        info!(
            portal = portal_code,
            inserted = summary.inserted_count,
            updated = summary.updated_count,
            skipped = summary.skipped_count,
            conflicts = summary.conflicts.len(),
            "sync run finished"
        );
        Ok(summary)
    }

    /// Ingests a raw payload through the portal's registered adapter.
    pub async fn sync_raw_payload(
        &self,
        portal_code: &str,
        raw: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SyncSummary, QueryError> {
        let adapter = adapter_for_portal(portal_code)
            .ok_or_else(|| QueryError::NoAdapter(portal_code.to_string()))?;
        let records = adapter.parse_listing(raw)?;
        self.sync_portal(portal_code, &records, now).await
    }

    /// Scans the committed snapshot and keeps the rows passing the filter
    /// predicate. Both the listing and every stats path go through here, so
    /// displayed rows and aggregated counts always agree.
    async fn filtered(&self, filter: &TenderFilter) -> Result<(Vec<Tender>, bool), QueryError> {
        filter.validate()?;
        if let Some(portal) = &filter.portal {
            if !self.store.portal_exists(portal).await? {
                return Err(ValidationError::UnknownPortal(portal.clone()).into());
            }
        }
        let (rows, truncated) = self.store.scan_tenders(self.max_scan_rows).await?;
        let today = Utc::now().date_naive();
        let tenders = rows
            .into_iter()
            .filter(|t| filter.matches(t, today))
            .collect();
        Ok((tenders, truncated))
    }

    pub async fn list_tenders(
        &self,
        filter: &TenderFilter,
        sort: SortKey,
        descending: bool,
        limit: Option<usize>,
    ) -> Result<TenderListing, QueryError> {
        let (mut tenders, truncated) = self.filtered(filter).await?;
        sort_tenders(&mut tenders, sort, descending);
        if let Some(limit) = limit {
            tenders.truncate(limit);
        }
        Ok(TenderListing { tenders, truncated })
    }

    pub async fn stats(
        &self,
        filter: &TenderFilter,
        dimension: StatsDimension,
        top_n: Option<usize>,
    ) -> Result<StatsReport, QueryError> {
        let (tenders, truncated) = self.filtered(filter).await?;
        let mut report = aggregate(&tenders, dimension, top_n);
        report.truncated = truncated;
        Ok(report)
    }

    pub async fn stats_by_category(
        &self,
        filter: &TenderFilter,
        top_n: Option<usize>,
    ) -> Result<StatsReport, QueryError> {
        self.stats(filter, StatsDimension::Category, top_n).await
    }

    pub async fn stats_by_keyword(
        &self,
        filter: &TenderFilter,
        top_n: Option<usize>,
    ) -> Result<StatsReport, QueryError> {
        self.stats(filter, StatsDimension::Keyword, top_n).await
    }

    pub async fn stats_by_portal(
        &self,
        filter: &TenderFilter,
        top_n: Option<usize>,
    ) -> Result<StatsReport, QueryError> {
        self.stats(filter, StatsDimension::Portal, top_n).await
    }
}

/// Folds one upsert outcome into the run summary. A key that exhausted its
/// conflict retries becomes a named partial failure and the run continues;
/// any other store error aborts the run.
fn record_outcome(
    summary: &mut SyncSummary,
    outcome: Result<UpsertOutcome, StoreError>,
) -> Result<(), StoreError> {
    match outcome {
        Ok(UpsertOutcome::Inserted) => summary.inserted_count += 1,
        Ok(UpsertOutcome::Updated) => summary.updated_count += 1,
        Err(StoreError::Conflict { natural_key, .. }) => {
            warn!(%natural_key, "dropping record after upsert retries");
            summary.conflicts.push(natural_key);
        }
        Err(err) => return Err(err),
    }
    Ok(())
}

/// Runs one ingestion job per portal concurrently and collects the
/// summaries in job order. One portal's failure never aborts the others.
pub async fn sync_portals(
    service: &TenderService,
    jobs: Vec<(String, Vec<u8>)>,
    now: DateTime<Utc>,
) -> Vec<(String, Result<SyncSummary, QueryError>)> {
    let mut handles = Vec::with_capacity(jobs.len());
    for (portal_code, payload) in jobs {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let result = service.sync_raw_payload(&portal_code, &payload, now).await;
            (portal_code, result)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(entry) => results.push(entry),
            Err(join_err) => {
                warn!(error = %join_err, "sync task panicked");
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoc_core::{Category, ClosingWindow, SourceType};
    use chrono::TimeZone;

    fn seao_portal() -> Portal {
        Portal {
            code: "SEAO".into(),
            name: "SEAO".into(),
            country: "CA".into(),
            region: Some("QC".into()),
            base_url: None,
            source_type: SourceType::OpenDataOcds,
            is_active: true,
        }
    }

    fn record(title: &str, buyer: &str, url: &str) -> RawRecord {
        let mut record = RawRecord::new();
        record.set("title", title);
        record.set("buyer", buyer);
        record.set("url", url);
        record.set("country", "CA");
        record.set("region", "QC");
        record.set("published_at", "2026-03-01");
        record.set("closing_at", "2026-04-01");
        record
    }

    async fn service() -> TenderService {
        let store = TenderStore::in_memory().await.unwrap();
        let service = TenderService::new(store, aoc_core::classify::default_rules(), 5000);
        service.seed_portals(&[seao_portal()]).await.unwrap();
        service
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn sync_classifies_and_persists() {
        let service = service().await;
        let records = vec![
            record(
                "Implémentation CRM ServiceNow",
                "Ville de Québec",
                "https://seao.ca/avis/1",
            ),
            record("Réfection de toiture", "Municipalité", "https://seao.ca/avis/2"),
        ];
        let summary = service.sync_portal("SEAO", &records, now()).await.unwrap();
        assert_eq!(summary.inserted_count, 2);
        assert_eq!(summary.updated_count, 0);
        assert!(summary.conflicts.is_empty());

        let stored = service
            .store()
            .get_by_natural_key("SEAO:https://seao.ca/avis/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.category, Category::Ti);
        assert_eq!(stored.matched_keywords, vec!["crm", "servicenow"]);
        assert_eq!(stored.score, 20);
        assert_eq!(stored.status, TenderStatus::Open);
    }

    #[tokio::test]
    async fn second_run_updates_instead_of_duplicating() {
        let service = service().await;
        let records = vec![record("Odoo ERP", "Ville", "https://seao.ca/avis/1")];
        let first = service.sync_portal("SEAO", &records, now()).await.unwrap();
        let second = service.sync_portal("SEAO", &records, now()).await.unwrap();
        assert_eq!(first.inserted_count, 1);
        assert_eq!(second.inserted_count, 0);
        assert_eq!(second.updated_count, 1);
        assert_eq!(service.store().count_tenders().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unusable_records_are_skipped_not_fatal() {
        let service = service().await;
        let mut empty = RawRecord::new();
        empty.set("budget", "100");
        let records = vec![empty, record("Odoo", "Ville", "https://seao.ca/avis/1")];
        let summary = service.sync_portal("SEAO", &records, now()).await.unwrap();
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.inserted_count, 1);
    }

    #[test]
    fn exhausted_conflict_is_a_named_partial_failure() {
        let mut summary = SyncSummary::default();
        record_outcome(&mut summary, Ok(UpsertOutcome::Inserted)).unwrap();
        record_outcome(&mut summary, Ok(UpsertOutcome::Updated)).unwrap();
        record_outcome(
            &mut summary,
            Err(StoreError::Conflict {
                natural_key: "SEAO:https://seao.ca/avis/7".into(),
                attempts: 3,
            }),
        )
        .unwrap();

        assert_eq!(summary.inserted_count, 1);
        assert_eq!(summary.updated_count, 1);
        assert_eq!(summary.conflicts, vec!["SEAO:https://seao.ca/avis/7"]);

        // Anything other than a conflict aborts the run.
        let err = record_outcome(
            &mut summary,
            Err(StoreError::Corrupt {
                natural_key: "SEAO:https://seao.ca/avis/8".into(),
                reason: "bad first_seen_at".into(),
            }),
        );
        assert!(matches!(err, Err(StoreError::Corrupt { .. })));
        assert_eq!(summary.conflicts.len(), 1);
    }

    #[tokio::test]
    async fn unknown_portal_is_rejected() {
        let service = service().await;
        let err = service
            .sync_portal("NOPE", &[record("x", "y", "https://z")], now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Validation(ValidationError::UnknownPortal(_))
        ));
    }

    #[tokio::test]
    async fn past_closing_date_ingests_as_expired() {
        let service = service().await;
        let mut old = record("Vieil avis", "Ville", "https://seao.ca/avis/9");
        old.set("closing_at", "2026-02-01");
        service.sync_portal("SEAO", &[old], now()).await.unwrap();
        let stored = service
            .store()
            .get_by_natural_key("SEAO:https://seao.ca/avis/9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TenderStatus::Expired);
    }

    #[tokio::test]
    async fn listing_and_stats_agree_on_the_filtered_set() {
        let service = service().await;
        let records = vec![
            record("Implémentation CRM", "Ville A", "https://seao.ca/avis/1"),
            record("Migration Odoo", "Ville B", "https://seao.ca/avis/2"),
            record("Réfection de toiture", "Ville C", "https://seao.ca/avis/3"),
        ];
        service.sync_portal("SEAO", &records, now()).await.unwrap();

        let filter = TenderFilter {
            portal: Some("SEAO".into()),
            ..Default::default()
        };
        let listing = service
            .list_tenders(&filter, SortKey::PublishedAt, true, None)
            .await
            .unwrap();
        let report = service
            .stats(&filter, StatsDimension::Category, None)
            .await
            .unwrap();
        assert_eq!(report.total_tenders, listing.tenders.len() as u64);
        let sum: u64 = report.buckets.iter().map(|b| b.count).sum();
        assert_eq!(sum, report.total_tenders);
    }

    #[tokio::test]
    async fn filter_validation_happens_before_any_query() {
        let service = service().await;
        let filter = TenderFilter {
            date_from: chrono::NaiveDate::from_ymd_opt(2026, 4, 1),
            date_to: chrono::NaiveDate::from_ymd_opt(2026, 3, 1),
            ..Default::default()
        };
        let err = service
            .list_tenders(&filter, SortKey::default(), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));

        let unknown = TenderFilter {
            portal: Some("NOPE".into()),
            ..Default::default()
        };
        let err = service
            .stats(&unknown, StatsDimension::Portal, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Validation(ValidationError::UnknownPortal(_))
        ));
    }

    #[tokio::test]
    async fn listing_limit_applies_after_sort() {
        let service = service().await;
        let mut records = Vec::new();
        for i in 0..5 {
            let mut r = record("Avis", "Ville", &format!("https://seao.ca/avis/{i}"));
            r.set("published_at", format!("2026-03-0{}", i + 1));
            records.push(r);
        }
        service.sync_portal("SEAO", &records, now()).await.unwrap();

        let listing = service
            .list_tenders(&TenderFilter::default(), SortKey::PublishedAt, true, Some(2))
            .await
            .unwrap();
        assert_eq!(listing.tenders.len(), 2);
        assert_eq!(
            listing.tenders[0].published_at,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 5)
        );
    }

    #[tokio::test]
    async fn closing_window_filter_flows_through_the_service() {
        let service = service().await;
        let mut past = record("Avis clos", "Ville", "https://seao.ca/avis/1");
        past.set("closing_at", "2001-01-01");
        let mut future = record("Avis ouvert", "Ville", "https://seao.ca/avis/2");
        future.set("closing_at", "2101-01-01");
        service.sync_portal("SEAO", &[past, future], now()).await.unwrap();

        let filter = TenderFilter {
            closing_window: ClosingWindow::Expired,
            ..Default::default()
        };
        let listing = service
            .list_tenders(&filter, SortKey::default(), true, None)
            .await
            .unwrap();
        assert_eq!(listing.tenders.len(), 1);
        assert_eq!(listing.tenders[0].url, "https://seao.ca/avis/1");
    }

    #[tokio::test]
    async fn concurrent_portal_jobs_collect_per_portal_results() {
        let service = service().await;
        let seao_payload = br#"{
            "releases": [{
                "date": "2026-03-01",
                "buyer": {"name": "Ville"},
                "tender": {
                    "title": "CRM",
                    "documents": [{"url": "https://seao.ca/avis/1"}]
                }
            }]
        }"#;
        let jobs = vec![
            ("SEAO".to_string(), seao_payload.to_vec()),
            ("NOPE".to_string(), b"[]".to_vec()),
        ];
        let results = sync_portals(&service, jobs, now()).await;
        assert_eq!(results.len(), 2);
        let seao = results.iter().find(|(code, _)| code == "SEAO").unwrap();
        assert_eq!(seao.1.as_ref().unwrap().inserted_count, 1);
        let nope = results.iter().find(|(code, _)| code == "NOPE").unwrap();
        assert!(matches!(nope.1, Err(QueryError::NoAdapter(_))));
    }
}
