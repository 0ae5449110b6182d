//! SQLite-backed tender store: single source of truth, unique on
//! natural_key, with the dedup/upsert engine and bounded scans.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use aoc_core::{Category, Portal, SourceType, Tender, TenderStatus};

pub const CRATE_NAME: &str = "aoc-store";

/// Bounded attempts for a racing upsert before it becomes a named partial
/// failure.
pub const MAX_UPSERT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Persistence layer unreachable or failing; fatal for the current
    /// operation, no partial commit.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    /// Upsert race on one natural_key that outlived the retry budget.
    #[error("upsert conflict on {natural_key} after {attempts} attempts")]
    Conflict { natural_key: String, attempts: u32 },
    #[error("corrupt row {natural_key}: {reason}")]
    Corrupt { natural_key: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone)]
pub struct TenderStore {
    pool: SqlitePool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenders (
    id TEXT PRIMARY KEY,
    natural_key TEXT NOT NULL UNIQUE,
    portal_code TEXT NOT NULL,
    title TEXT NOT NULL,
    buyer TEXT NOT NULL,
    country TEXT NOT NULL,
    region TEXT NOT NULL,
    url TEXT NOT NULL,
    published_at TEXT,
    closing_at TEXT,
    budget REAL,
    category TEXT NOT NULL,
    matched_keywords TEXT NOT NULL,
    score INTEGER NOT NULL,
    status TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tenders_portal ON tenders(portal_code);
CREATE INDEX IF NOT EXISTS idx_tenders_published ON tenders(published_at);
CREATE TABLE IF NOT EXISTS portals (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    country TEXT NOT NULL,
    region TEXT,
    base_url TEXT,
    source_type TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
"#;

impl TenderStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// A private in-memory database, used by tests and fixture syncs. One
    /// connection only: each extra in-memory connection would see its own
    /// empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert-or-update keyed on natural_key.
    ///
    /// The unique index is the serialization point: the engine first tries
    /// an UPDATE of the mutable fields, then an INSERT, and retries when a
    /// concurrent writer wins the insert race. `id`, `first_seen_at`,
    /// `published_at`, `country`, `region` and `url` of an existing row are
    /// never touched; `last_seen_at` always advances.
    pub async fn upsert_tender(
        &self,
        incoming: &Tender,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let updated = sqlx::query(
                r#"
                UPDATE tenders
                   SET title = ?, buyer = ?, budget = ?, closing_at = ?,
                       category = ?, matched_keywords = ?, score = ?,
                       status = ?, last_seen_at = ?
                 WHERE natural_key = ?
                "#,
            )
            .bind(&incoming.title)
            .bind(&incoming.buyer)
            .bind(incoming.budget)
            .bind(incoming.closing_at.map(date_to_text))
            .bind(incoming.category.label())
            .bind(keywords_to_text(&incoming.matched_keywords))
            .bind(incoming.score as i64)
            .bind(status_to_text(incoming.status))
            .bind(now.to_rfc3339())
            .bind(&incoming.natural_key)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() > 0 {
                return Ok(UpsertOutcome::Updated);
            }

            let inserted = sqlx::query(
                r#"
                INSERT INTO tenders
                    (id, natural_key, portal_code, title, buyer, country,
                     region, url, published_at, closing_at, budget, category,
                     matched_keywords, score, status, first_seen_at,
                     last_seen_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&incoming.natural_key)
            .bind(&incoming.portal_code)
            .bind(&incoming.title)
            .bind(&incoming.buyer)
            .bind(&incoming.country)
            .bind(&incoming.region)
            .bind(&incoming.url)
            .bind(incoming.published_at.map(date_to_text))
            .bind(incoming.closing_at.map(date_to_text))
            .bind(incoming.budget)
            .bind(incoming.category.label())
            .bind(keywords_to_text(&incoming.matched_keywords))
            .bind(incoming.score as i64)
            .bind(status_to_text(incoming.status))
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => return Ok(UpsertOutcome::Inserted),
                Err(err) if is_unique_violation(&err) => {
                    // Lost the insert race; the row now exists, retry the
                    // update with last-writer-wins semantics.
                    warn!(
                        natural_key = %incoming.natural_key,
                        attempt,
                        "upsert conflict, retrying"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::Conflict {
            natural_key: incoming.natural_key.clone(),
            attempts: MAX_UPSERT_ATTEMPTS,
        })
    }

    pub async fn get_by_natural_key(
        &self,
        natural_key: &str,
    ) -> Result<Option<Tender>, StoreError> {
        let row = sqlx::query("SELECT * FROM tenders WHERE natural_key = ?")
            .bind(natural_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_tender(&r)).transpose()
    }

    /// Reads at most `max_rows` tenders from the committed snapshot. The
    /// second return value reports whether the ceiling cut the scan short.
    pub async fn scan_tenders(&self, max_rows: usize) -> Result<(Vec<Tender>, bool), StoreError> {
        let limit = max_rows.max(1);
        let rows = sqlx::query("SELECT * FROM tenders ORDER BY natural_key LIMIT ?")
            .bind((limit + 1) as i64)
            .fetch_all(&self.pool)
            .await?;
        let truncated = rows.len() > limit;
        let mut tenders = Vec::with_capacity(rows.len().min(limit));
        for row in rows.iter().take(limit) {
            tenders.push(row_to_tender(row)?);
        }
        if truncated {
            info!(max_rows = limit, "tender scan truncated at ceiling");
        }
        Ok((tenders, truncated))
    }

    pub async fn count_tenders(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tenders")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    pub async fn upsert_portal(&self, portal: &Portal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO portals
                (code, name, country, region, base_url, source_type, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                country = excluded.country,
                region = excluded.region,
                base_url = excluded.base_url,
                source_type = excluded.source_type,
                is_active = excluded.is_active
            "#,
        )
        .bind(&portal.code)
        .bind(&portal.name)
        .bind(&portal.country)
        .bind(&portal.region)
        .bind(&portal.base_url)
        .bind(source_type_to_text(portal.source_type))
        .bind(portal.is_active as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn portal_exists(&self, code: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM portals WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Portals ordered by (country, name), optionally restricted to the
    /// active subset and/or one country.
    pub async fn list_portals(
        &self,
        only_active: bool,
        country: Option<&str>,
    ) -> Result<Vec<Portal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT code, name, country, region, base_url, source_type, is_active
              FROM portals
             WHERE (? = 0 OR is_active = 1)
               AND (? IS NULL OR country = ?)
             ORDER BY country, name
            "#,
        )
        .bind(only_active as i64)
        .bind(country)
        .bind(country)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_portal).collect()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn date_to_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn keywords_to_text(keywords: &[String]) -> String {
    serde_json::to_string(keywords).unwrap_or_else(|_| "[]".to_string())
}

fn status_to_text(status: TenderStatus) -> &'static str {
    match status {
        TenderStatus::Open => "open",
        TenderStatus::Expired => "expired",
    }
}

fn source_type_to_text(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::OpenDataOcds => "open_data_ocds",
        SourceType::OpenDataCsv => "open_data_csv",
        SourceType::PortalApi => "portal_api",
        SourceType::PortalWeb => "portal_web",
        SourceType::Aggregator => "aggregator",
    }
}

fn corrupt(natural_key: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        natural_key: natural_key.to_string(),
        reason: reason.into(),
    }
}

fn row_to_tender(row: &SqliteRow) -> Result<Tender, StoreError> {
    let natural_key: String = row.try_get("natural_key")?;
    let id_text: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|e| corrupt(&natural_key, e.to_string()))?;

    let category_text: String = row.try_get("category")?;
    let category = Category::from_label(&category_text)
        .ok_or_else(|| corrupt(&natural_key, format!("unknown category {category_text}")))?;

    let keywords_text: String = row.try_get("matched_keywords")?;
    let matched_keywords: Vec<String> = serde_json::from_str(&keywords_text)
        .map_err(|e| corrupt(&natural_key, e.to_string()))?;

    let status_text: String = row.try_get("status")?;
    let status = match status_text.as_str() {
        "open" => TenderStatus::Open,
        "expired" => TenderStatus::Expired,
        other => return Err(corrupt(&natural_key, format!("unknown status {other}"))),
    };

    let published_at: Option<String> = row.try_get("published_at")?;
    let closing_at: Option<String> = row.try_get("closing_at")?;
    let first_seen_text: String = row.try_get("first_seen_at")?;
    let last_seen_text: String = row.try_get("last_seen_at")?;
    let score: i64 = row.try_get("score")?;

    Ok(Tender {
        id,
        portal_code: row.try_get("portal_code")?,
        title: row.try_get("title")?,
        buyer: row.try_get("buyer")?,
        country: row.try_get("country")?,
        region: row.try_get("region")?,
        url: row.try_get("url")?,
        published_at: published_at.as_deref().and_then(parse_stored_date),
        closing_at: closing_at.as_deref().and_then(parse_stored_date),
        budget: row.try_get("budget")?,
        category,
        matched_keywords,
        score: score as u32,
        status,
        first_seen_at: parse_stored_timestamp(&first_seen_text)
            .ok_or_else(|| corrupt(&natural_key, "bad first_seen_at"))?,
        last_seen_at: parse_stored_timestamp(&last_seen_text)
            .ok_or_else(|| corrupt(&natural_key, "bad last_seen_at"))?,
        natural_key,
    })
}

fn parse_stored_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_stored_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_portal(row: &SqliteRow) -> Result<Portal, StoreError> {
    let source_type_text: String = row.try_get("source_type")?;
    let source_type = match source_type_text.as_str() {
        "open_data_ocds" => SourceType::OpenDataOcds,
        "open_data_csv" => SourceType::OpenDataCsv,
        "portal_api" => SourceType::PortalApi,
        "portal_web" => SourceType::PortalWeb,
        _ => SourceType::Aggregator,
    };
    let is_active: i64 = row.try_get("is_active")?;
    Ok(Portal {
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        country: row.try_get("country")?,
        region: row.try_get("region")?,
        base_url: row.try_get("base_url")?,
        source_type,
        is_active: is_active != 0,
    })
}
