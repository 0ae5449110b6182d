//! Keyword/category classifier.
//!
//! A pure function over the normalized title + buyer text and the keyword
//! dictionary: matched keywords accumulate weighted votes per category, the
//! highest total wins, ties resolve to the category declared first in
//! [`Category::ALL`]. Re-running classification on unchanged input is a
//! no-op.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Category;

pub const DEFAULT_KEYWORD_WEIGHT: u32 = 10;

fn default_weight() -> u32 {
    DEFAULT_KEYWORD_WEIGHT
}

/// One dictionary entry: a keyword voting for one or more categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub categories: Vec<Category>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl KeywordRule {
    pub fn new(keyword: &str, categories: &[Category]) -> Self {
        Self {
            keyword: keyword.to_string(),
            categories: categories.to_vec(),
            weight: DEFAULT_KEYWORD_WEIGHT,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub matched_keywords: Vec<String>,
    pub score: u32,
}

/// Classifies a normalized tender. The dictionary is scanned in its fixed
/// order; `matched_keywords` keeps that order and holds each keyword at
/// most once (case-insensitive substring match against title + buyer).
pub fn classify(title: &str, buyer: &str, rules: &[KeywordRule]) -> Classification {
    let text = format!("{} {}", title.to_lowercase(), buyer.to_lowercase());

    let mut matched: Vec<String> = Vec::new();
    let mut votes: HashMap<Category, u32> = HashMap::new();
    let mut score: u32 = 0;

    for rule in rules {
        let needle = rule.keyword.to_lowercase();
        if needle.is_empty() || !text.contains(&needle) {
            continue;
        }
        if matched.iter().any(|k| k.to_lowercase() == needle) {
            continue;
        }
        matched.push(rule.keyword.clone());
        score += rule.weight;
        for category in &rule.categories {
            *votes.entry(*category).or_default() += rule.weight;
        }
    }

    if matched.is_empty() {
        return Classification {
            category: Category::Autres,
            matched_keywords: vec![],
            score: 0,
        };
    }

    // Earlier enum position wins ties, so a strict > never replaces an
    // earlier category holding the same total.
    let mut best = Category::Autres;
    let mut best_votes = 0u32;
    for category in Category::ALL {
        let total = votes.get(&category).copied().unwrap_or(0);
        if total > best_votes {
            best = category;
            best_votes = total;
        }
    }

    Classification {
        category: best,
        matched_keywords: matched,
        score,
    }
}

/// The default dictionary, mirroring the strategic keyword list the
/// collector was built around (ATS/CRM/ERP/TI/Cloud/Data).
pub fn default_rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule::new("ats", &[Category::Ats]),
        KeywordRule::new("applicant tracking", &[Category::Ats]),
        KeywordRule::new("talent acquisition", &[Category::Ats]),
        KeywordRule::new("recrutement", &[Category::Ats]),
        KeywordRule::new("recruitment", &[Category::Ats]),
        KeywordRule::new("gestion des candidatures", &[Category::Ats]),
        KeywordRule::new("crm", &[Category::Crm]),
        KeywordRule::new("relation client", &[Category::Crm]),
        KeywordRule::new("salesforce", &[Category::Crm]),
        KeywordRule::new("microsoft dynamics", &[Category::Crm]),
        KeywordRule::new("hubspot", &[Category::Crm]),
        KeywordRule::new("erp", &[Category::Erp]),
        KeywordRule::new("oracle", &[Category::Erp]),
        KeywordRule::new("sap", &[Category::Erp]),
        KeywordRule::new("odoo", &[Category::Erp]),
        KeywordRule::new("workday", &[Category::Erp]),
        KeywordRule::new("dynamics 365", &[Category::Erp]),
        KeywordRule::new("servicenow", &[Category::Ti]),
        KeywordRule::new("itsm", &[Category::Ti]),
        KeywordRule::new("ticketing", &[Category::Ti]),
        KeywordRule::new("portail client", &[Category::Ti]),
        KeywordRule::new("logiciel", &[Category::Ti]),
        KeywordRule::new("cloud", &[Category::Cloud]),
        KeywordRule::new("infonuagique", &[Category::Cloud]),
        KeywordRule::new("azure", &[Category::Cloud]),
        KeywordRule::new("aws", &[Category::Cloud]),
        KeywordRule::new("datawarehouse", &[Category::Data]),
        KeywordRule::new("entrepôt de données", &[Category::Data]),
    ]
}
