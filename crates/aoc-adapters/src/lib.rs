//! Per-portal source adapters.
//!
//! Adapters only reshape a portal's raw payload into [`RawRecord`]s keyed
//! by the source's own field names; all canonical field resolution stays in
//! the normalizer. SEAO ships OCDS release packages, CanadaBuys ships
//! open-data JSON, and the generic adapter accepts a flat record array for
//! manual/fixture ingestion.

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use aoc_core::RawRecord;

pub const CRATE_NAME: &str = "aoc-adapters";

pub const SEAO_PORTAL_CODE: &str = "SEAO";
pub const CANADABUYS_PORTAL_CODE: &str = "CANADABUYS";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid payload for {portal}: {reason}")]
    InvalidPayload { portal: String, reason: String },
}

impl AdapterError {
    fn invalid(portal: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            portal: portal.to_string(),
            reason: reason.into(),
        }
    }
}

pub trait SourceAdapter: Send + Sync {
    fn portal_code(&self) -> &str;

    /// Parses one fetched listing payload into raw records. A payload that
    /// is not even valid JSON is an adapter error; individual malformed
    /// records are passed through and left to the normalizer to skip.
    fn parse_listing(&self, raw: &[u8]) -> Result<Vec<RawRecord>, AdapterError>;
}

pub fn adapter_for_portal(portal_code: &str) -> Option<Box<dyn SourceAdapter>> {
    match portal_code {
        SEAO_PORTAL_CODE => Some(Box::new(SeaoAdapter)),
        CANADABUYS_PORTAL_CODE => Some(Box::new(CanadaBuysAdapter)),
        _ => None,
    }
}

fn parse_json(portal: &str, raw: &[u8]) -> Result<JsonValue, AdapterError> {
    serde_json::from_slice(raw).map_err(|e| AdapterError::invalid(portal, e.to_string()))
}

fn object_to_record(object: &Map<String, JsonValue>) -> RawRecord {
    RawRecord {
        fields: object.clone(),
    }
}

/// SEAO publishes OCDS release packages on Données Québec. Buyer comes from
/// `buyer.name`, falling back to the first party holding the "buyer" role;
/// the notice url is the first tender document url.
#[derive(Debug, Clone, Copy)]
pub struct SeaoAdapter;

impl SeaoAdapter {
    fn release_to_record(release: &JsonValue) -> RawRecord {
        let tender = release.get("tender").cloned().unwrap_or(JsonValue::Null);

        let title = tender
            .get("title")
            .or_else(|| release.get("title"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();

        let buyer = release
            .get("buyer")
            .and_then(|b| b.get("name"))
            .and_then(JsonValue::as_str)
            .or_else(|| {
                release
                    .get("parties")
                    .and_then(JsonValue::as_array)
                    .and_then(|parties| {
                        parties
                            .iter()
                            .find(|p| {
                                p.get("roles")
                                    .and_then(JsonValue::as_array)
                                    .is_some_and(|roles| {
                                        roles.iter().any(|r| {
                                            r.as_str().is_some_and(|s| s.eq_ignore_ascii_case("buyer"))
                                        })
                                    })
                            })
                            .and_then(|p| p.get("name"))
                            .and_then(JsonValue::as_str)
                    })
            })
            .unwrap_or_default();

        let period = tender.get("tenderPeriod").cloned().unwrap_or(JsonValue::Null);
        let published = release
            .get("date")
            .or_else(|| period.get("startDate"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let closing = period
            .get("endDate")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();

        let url = tender
            .get("documents")
            .and_then(JsonValue::as_array)
            .and_then(|docs| {
                docs.iter()
                    .find_map(|d| d.get("url").and_then(JsonValue::as_str))
            })
            .unwrap_or_default();

        let budget = tender
            .get("value")
            .and_then(|v| v.get("amount"))
            .cloned()
            .unwrap_or(JsonValue::Null);

        let mut record = RawRecord::new();
        record.set("title", title);
        record.set("buyer", buyer);
        record.set("url", url);
        record.set("published_at", published);
        record.set("closing_at", closing);
        record.set("country", "CA");
        record.set("region", "QC");
        if !budget.is_null() {
            record.set("budget", budget);
        }
        record
    }
}

impl SourceAdapter for SeaoAdapter {
    fn portal_code(&self) -> &str {
        SEAO_PORTAL_CODE
    }

    fn parse_listing(&self, raw: &[u8]) -> Result<Vec<RawRecord>, AdapterError> {
        let value = parse_json(SEAO_PORTAL_CODE, raw)?;
        let releases = value
            .get("releases")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| AdapterError::invalid(SEAO_PORTAL_CODE, "missing releases array"))?;
        Ok(releases.iter().map(Self::release_to_record).collect())
    }
}

/// CanadaBuys open-data exports: either a top-level record array or an
/// envelope with one of the usual list keys. Records keep their original
/// bilingual field names (noticeTitleEn, organizationName-en, ...); the
/// normalizer's alias lists resolve them.
#[derive(Debug, Clone, Copy)]
pub struct CanadaBuysAdapter;

const CANADABUYS_LIST_KEYS: &[&str] = &["results", "data", "notices", "items"];

impl SourceAdapter for CanadaBuysAdapter {
    fn portal_code(&self) -> &str {
        CANADABUYS_PORTAL_CODE
    }

    fn parse_listing(&self, raw: &[u8]) -> Result<Vec<RawRecord>, AdapterError> {
        let value = parse_json(CANADABUYS_PORTAL_CODE, raw)?;
        let items = match &value {
            JsonValue::Array(items) => items.clone(),
            JsonValue::Object(map) => CANADABUYS_LIST_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(JsonValue::as_array).cloned())
                .ok_or_else(|| {
                    AdapterError::invalid(CANADABUYS_PORTAL_CODE, "no record list found")
                })?,
            _ => {
                return Err(AdapterError::invalid(
                    CANADABUYS_PORTAL_CODE,
                    "expected array or object payload",
                ))
            }
        };

        Ok(items
            .iter()
            .filter_map(JsonValue::as_object)
            .map(|object| {
                let mut record = object_to_record(object);
                if !record.fields.contains_key("country") {
                    record.set("country", "CA");
                }
                record
            })
            .collect())
    }
}

/// Pass-through adapter for fixture files and manually captured payloads:
/// a JSON array of flat objects, field names untouched.
#[derive(Debug, Clone)]
pub struct GenericJsonAdapter {
    portal_code: String,
}

impl GenericJsonAdapter {
    pub fn new(portal_code: &str) -> Self {
        Self {
            portal_code: portal_code.to_string(),
        }
    }
}

impl SourceAdapter for GenericJsonAdapter {
    fn portal_code(&self) -> &str {
        &self.portal_code
    }

    fn parse_listing(&self, raw: &[u8]) -> Result<Vec<RawRecord>, AdapterError> {
        let value = parse_json(&self.portal_code, raw)?;
        let items = value
            .as_array()
            .ok_or_else(|| AdapterError::invalid(&self.portal_code, "expected a record array"))?;
        Ok(items
            .iter()
            .filter_map(JsonValue::as_object)
            .map(object_to_record)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoc_core::normalize_record;
    use chrono::NaiveDate;

    #[test]
    fn seao_ocds_release_package() {
        let payload = r#"{
            "releases": [
                {
                    "ocid": "ocds-1",
                    "date": "2026-03-01T10:00:00Z",
                    "buyer": {"name": "Ville de Québec"},
                    "tender": {
                        "title": "Implémentation CRM ServiceNow",
                        "tenderPeriod": {"endDate": "2026-04-01"},
                        "documents": [{"url": "https://seao.ca/avis/1"}],
                        "value": {"amount": 250000}
                    }
                },
                {
                    "ocid": "ocds-2",
                    "parties": [
                        {"name": "MTQ", "roles": ["buyer"]},
                        {"name": "Fournisseur", "roles": ["supplier"]}
                    ],
                    "tender": {"title": "Entretien hivernal"}
                }
            ]
        }"#;
        let records = SeaoAdapter.parse_listing(payload.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let first = normalize_record(&records[0]).unwrap();
        assert_eq!(first.title, "Implémentation CRM ServiceNow");
        assert_eq!(first.buyer, "Ville de Québec");
        assert_eq!(first.url, "https://seao.ca/avis/1");
        assert_eq!(first.published_at, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(first.closing_at, NaiveDate::from_ymd_opt(2026, 4, 1));
        assert_eq!(first.budget, Some(250_000.0));
        assert_eq!(first.country, "CA");
        assert_eq!(first.region, "QC");

        let second = normalize_record(&records[1]).unwrap();
        assert_eq!(second.buyer, "MTQ");
    }

    #[test]
    fn seao_payload_without_releases_is_an_error() {
        let err = SeaoAdapter.parse_listing(b"{}").unwrap_err();
        assert!(err.to_string().contains("releases"));
    }

    #[test]
    fn canadabuys_bilingual_fields_resolve_through_aliases() {
        let payload = r#"{
            "results": [
                {
                    "noticeTitleEn": "ERP Modernization",
                    "organizationName-en": "Public Services and Procurement Canada",
                    "publicationDate": "2026-02-15",
                    "tenderNoticeUrl-en": "https://canadabuys.canada.ca/notice/7"
                }
            ]
        }"#;
        let records = CanadaBuysAdapter.parse_listing(payload.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let draft = normalize_record(&records[0]).unwrap();
        assert_eq!(draft.title, "ERP Modernization");
        assert_eq!(draft.buyer, "Public Services and Procurement Canada");
        assert_eq!(draft.url, "https://canadabuys.canada.ca/notice/7");
        assert_eq!(draft.country, "CA");
    }

    #[test]
    fn canadabuys_accepts_top_level_arrays() {
        let payload = r#"[{"title": "AO", "url": "https://x/1"}]"#;
        let records = CanadaBuysAdapter.parse_listing(payload.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn generic_adapter_passes_fields_through() {
        let payload = r#"[{"titre": "AO générique", "lien": "https://portail/x"}]"#;
        let adapter = GenericJsonAdapter::new("MERX");
        let records = adapter.parse_listing(payload.as_bytes()).unwrap();
        let draft = normalize_record(&records[0]).unwrap();
        assert_eq!(draft.title, "AO générique");
        assert_eq!(draft.url, "https://portail/x");
    }

    #[test]
    fn registry_knows_builtin_portals() {
        assert!(adapter_for_portal("SEAO").is_some());
        assert!(adapter_for_portal("CANADABUYS").is_some());
        assert!(adapter_for_portal("UNKNOWN").is_none());
    }
}
