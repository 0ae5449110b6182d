use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aoc_adapters::{GenericJsonAdapter, SourceAdapter};
use aoc_core::{SortKey, StatsDimension, TenderFilter};
use aoc_store::TenderStore;
use aoc_sync::{default_portal_catalogue, rules, SyncConfig, TenderService};

#[derive(Debug, Parser)]
#[command(name = "aoc-cli")]
#[command(about = "AO collector command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register the portal catalogue (built-in, or a YAML file).
    SeedPortals {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Ingest a payload file through a portal's adapter.
    Sync {
        /// Portal code (SEAO, CANADABUYS, ...).
        portal: String,
        /// Path to the raw payload file.
        file: PathBuf,
        /// Bypass the portal's adapter and read the file as a flat JSON
        /// record array.
        #[arg(long)]
        generic: bool,
    },
    /// Print the current listing as JSON.
    List {
        #[arg(long)]
        portal: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a report along one dimension (category, keyword or portal).
    Report {
        #[arg(value_enum, default_value = "category")]
        dimension: Dimension,
        #[arg(long)]
        top: Option<usize>,
    },
    /// Run the HTTP API.
    Serve {
        #[arg(long, default_value = "8000")]
        port: u16,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Dimension {
    Category,
    Keyword,
    Portal,
}

impl From<Dimension> for StatsDimension {
    fn from(value: Dimension) -> Self {
        match value {
            Dimension::Category => StatsDimension::Category,
            Dimension::Keyword => StatsDimension::Keyword,
            Dimension::Portal => StatsDimension::Portal,
        }
    }
}

async fn build_service(config: &SyncConfig) -> Result<TenderService> {
    let store = TenderStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    let rules = rules::keyword_rules_or_default(config.keywords_path.as_deref())?;
    Ok(TenderService::new(store, rules, config.max_scan_rows))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let service = build_service(&config).await?;

    match cli.command {
        Commands::SeedPortals { file } => {
            let catalogue = match file {
                Some(path) => rules::load_portal_catalogue(&path)?,
                None => default_portal_catalogue(),
            };
            service.seed_portals(&catalogue).await?;
            println!("seeded {} portals", catalogue.len());
        }
        Commands::Sync {
            portal,
            file,
            generic,
        } => {
            let payload =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let summary = if generic {
                let adapter = GenericJsonAdapter::new(&portal);
                let records = adapter.parse_listing(&payload)?;
                service.sync_portal(&portal, &records, Utc::now()).await?
            } else {
                service.sync_raw_payload(&portal, &payload, Utc::now()).await?
            };
            println!(
                "sync {}: inserted={} updated={} skipped={} conflicts={}",
                summary.portal_code,
                summary.inserted_count,
                summary.updated_count,
                summary.skipped_count,
                summary.conflicts.len()
            );
        }
        Commands::List {
            portal,
            country,
            query,
            limit,
        } => {
            let filter = TenderFilter {
                portal,
                country,
                query,
                ..Default::default()
            };
            let listing = service
                .list_tenders(&filter, SortKey::PublishedAt, true, limit)
                .await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Commands::Report { dimension, top } => {
            let report = service
                .stats(&TenderFilter::default(), dimension.into(), top)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve { port } => {
            let token = std::env::var("AOC_API_TOKEN").ok();
            let state = aoc_web::AppState::new(service, token);
            aoc_web::serve(state, port).await?;
        }
    }

    Ok(())
}
