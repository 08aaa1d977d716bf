//! Heatmap Service - Weighted crime map payload
//!
//! Reads persisted cities (with coordinates), optionally the ranking
//! spreadsheet for crime-indicator fallbacks, and writes the JSON a map
//! renderer consumes: heat triples, weighted points and ordered markers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ranking::heatmap::{MapDocument, UnrankedPolicy};
use ranking::pg::PgStore;
use ranking::pipeline;
use ranking::sheet::read_table;
use tokio::fs;

#[derive(Parser, Debug)]
#[command(name = "heatmap", about = "Builds the weighted crime heat-map payload")]
struct Args {
    /// Database URL (overrides DB_URL)
    #[arg(long)]
    db_url: Option<String>,

    /// Ranking spreadsheet used for crime-indicator fallbacks
    #[arg(long)]
    file: Option<PathBuf>,

    /// Output JSON path
    #[arg(long, default_value = "mapa_criminalidade.json")]
    output: PathBuf,

    /// Cities with neither ranking nor indicator: exclude | neutral
    /// (overrides HEATMAP_UNRANKED_POLICY)
    #[arg(long)]
    policy: Option<UnrankedPolicy>,
}

#[derive(Debug, Clone)]
struct Config {
    db_url: Option<String>,
    policy: UnrankedPolicy,
    max_connections: u32,
}

impl Config {
    fn from_env() -> Result<Self> {
        let policy = match std::env::var("HEATMAP_UNRANKED_POLICY") {
            Ok(value) => value
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid HEATMAP_UNRANKED_POLICY")?,
            Err(_) => UnrankedPolicy::default(),
        };
        Ok(Self {
            db_url: std::env::var("DB_URL").ok(),
            policy,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();
    let args = Args::parse();
    let config = Config::from_env()?;

    let policy = args.policy.unwrap_or(config.policy);
    let db_url = args
        .db_url
        .or(config.db_url)
        .context("DB_URL env var missing")?;

    println!("=== Crime Ranking Heatmap ===");
    println!("Unranked policy: {:?}", policy);

    let table = match &args.file {
        Some(path) => {
            println!("Indicator file: {}", path.display());
            Some(read_table(path).with_context(|| format!("Failed to read {}", path.display()))?)
        }
        None => None,
    };

    println!("Connecting to database...");
    let store = PgStore::connect(&db_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;

    let layers = pipeline::build_map(&store, table.as_ref(), policy)
        .await
        .context("Failed to build map layers")?;

    if layers.points.is_empty() {
        log::warn!("No plottable cities; map not written");
        println!("\nNo cities with coordinates and ranking data.");
        println!("Run `ingest import` and `ingest import-coordinates` first.");
        return Ok(());
    }

    let document = MapDocument::from(layers);
    let json = serde_json::to_string_pretty(&document)?;
    fs::write(&args.output, json)
        .await
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("\n=== Map Summary ===");
    println!("Cities plotted: {}", document.total_cities);
    for marker in document.markers.iter().take(5) {
        println!(
            "  {} - {} | position {} | {}",
            marker.name,
            marker.uf,
            marker
                .ranking_position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            marker.colour_hex
        );
    }
    if document.markers.len() > 5 {
        println!("  ... and {} more", document.markers.len() - 5);
    }
    println!("Output: {}", args.output.display());

    Ok(())
}
