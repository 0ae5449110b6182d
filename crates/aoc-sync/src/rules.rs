//! YAML-backed keyword dictionary and portal seed catalogue.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use aoc_core::{KeywordRule, Portal, SourceType};

#[derive(Debug, Clone, Deserialize)]
struct KeywordRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<KeywordRule>,
}

/// Loads the keyword dictionary from YAML. The file order is the dictionary
/// order the classifier scans in, so it is preserved as-is.
pub fn load_keyword_rules(path: &Path) -> Result<Vec<KeywordRule>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: KeywordRulesFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(file.rules)
}

#[derive(Debug, Clone, Deserialize)]
struct PortalCatalogueFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    portals: Vec<Portal>,
}

pub fn load_portal_catalogue(path: &Path) -> Result<Vec<Portal>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file: PortalCatalogueFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(file.portals)
}

/// Built-in catalogue of the portals the collector knows about. Inactive
/// entries are kept for the registry but skipped by default listings.
pub fn default_portal_catalogue() -> Vec<Portal> {
    fn portal(
        code: &str,
        name: &str,
        country: &str,
        region: Option<&str>,
        base_url: &str,
        source_type: SourceType,
        is_active: bool,
    ) -> Portal {
        Portal {
            code: code.to_string(),
            name: name.to_string(),
            country: country.to_string(),
            region: region.map(str::to_string),
            base_url: Some(base_url.to_string()),
            source_type,
            is_active,
        }
    }

    vec![
        portal(
            "SEAO",
            "Système électronique d'appel d'offres (Québec)",
            "CA",
            Some("QC"),
            "https://www.seao.ca",
            SourceType::OpenDataOcds,
            true,
        ),
        portal(
            "CANADABUYS",
            "CanadaBuys / AchatsCanada",
            "CA",
            Some("FED"),
            "https://canadabuys.canada.ca",
            SourceType::OpenDataCsv,
            true,
        ),
        portal(
            "MERX",
            "MERX (Canada)",
            "CA",
            Some("MULTI"),
            "https://www.merx.com",
            SourceType::PortalWeb,
            false,
        ),
        portal(
            "BIDDINGO",
            "Biddingo",
            "CA",
            Some("MULTI"),
            "https://www.biddingo.com",
            SourceType::PortalWeb,
            false,
        ),
        portal(
            "BCBID",
            "BC Bid",
            "CA",
            Some("BC"),
            "https://www.bcbid.gov.bc.ca",
            SourceType::PortalWeb,
            false,
        ),
        portal(
            "SAM_USA",
            "SAM.gov Contract Opportunities",
            "US",
            Some("FED"),
            "https://sam.gov",
            SourceType::PortalApi,
            false,
        ),
        portal(
            "TED_EU",
            "Tenders Electronic Daily (EU)",
            "EU",
            Some("EU"),
            "https://ted.europa.eu",
            SourceType::PortalApi,
            false,
        ),
        portal(
            "UNGM",
            "United Nations Global Marketplace",
            "INTL",
            Some("UN"),
            "https://www.ungm.org",
            SourceType::PortalWeb,
            false,
        ),
    ]
}

/// Convenience: YAML dictionary when configured, built-in default otherwise.
pub fn keyword_rules_or_default(path: Option<&Path>) -> Result<Vec<KeywordRule>> {
    match path {
        Some(path) => load_keyword_rules(path),
        None => Ok(aoc_core::classify::default_rules()),
    }
}
