//! Ingest Service - Loads the crime ranking into the reference tables
//!
//! Responsibilities:
//! - Apply the reference schema
//! - Seed the 27 UFs
//! - Import ranking positions from the spreadsheet
//! - Explicit maintenance: orphan prune, unranked removal, duplicate cleanup
//! - Import city coordinates
//!
//! Every mutating run is recorded in `job_runs` with its report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ranking::coordinates::read_records;
use ranking::pg::PgStore;
use ranking::pipeline;
use ranking::sheet::read_table;
use ranking::RunReport;
use uuid::Uuid;

const COMPONENT: &str = "ingest";

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Loads crime ranking spreadsheets into the reference tables")]
struct Args {
    /// Database URL (overrides DB_URL)
    #[arg(long)]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and indexes
    Migrate,

    /// Create any missing UF
    SeedStates,

    /// Import ranking positions from a spreadsheet
    Import {
        /// Spreadsheet path (overrides RANKING_FILE)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Compute the report without writing
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Remove cities that are no longer in the spreadsheet
    PruneOrphans {
        /// Spreadsheet path (overrides RANKING_FILE)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Actually delete; without it only the candidates are listed
        #[arg(long, default_value = "false")]
        confirm: bool,
    },

    /// Remove cities without a ranking position
    RemoveUnranked {
        #[arg(long, default_value = "false")]
        confirm: bool,
    },

    /// Remove stored cities duplicated by (UF, name), keeping the oldest
    Dedupe {
        #[arg(long, default_value = "false")]
        confirm: bool,
    },

    /// Import city coordinates from a JSON export
    ImportCoordinates {
        /// JSON path (overrides COORDINATES_FILE)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Leave cities that already have coordinates untouched
        #[arg(long, default_value = "false")]
        skip_existing: bool,
    },
}

#[derive(Debug, Clone)]
struct Config {
    db_url: Option<String>,
    ranking_file: PathBuf,
    coordinates_file: PathBuf,
    max_connections: u32,
}

impl Config {
    fn from_env() -> Self {
        Self {
            db_url: std::env::var("DB_URL").ok(),
            ranking_file: PathBuf::from(
                std::env::var("RANKING_FILE")
                    .unwrap_or_else(|_| "ResumoCriminalidadeCidades.xlsx".to_string()),
            ),
            coordinates_file: PathBuf::from(
                std::env::var("COORDINATES_FILE")
                    .unwrap_or_else(|_| "coordenadas_cidades.json".to_string()),
            ),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
        }
    }

    async fn connect(&self, db_url: Option<String>) -> Result<PgStore> {
        let db_url = db_url
            .or_else(|| self.db_url.clone())
            .context("DB_URL env var missing")?;
        println!("Connecting to database...");
        PgStore::connect(&db_url, self.max_connections)
            .await
            .context("Failed to connect to database")
    }
}

/// Register the run in `job_runs` before touching any data.
async fn start_job(store: &PgStore, source: Option<&Path>) -> Result<Uuid> {
    let source_id = source.map(|p| p.display().to_string());
    let job_run_id = store
        .create_job_run(COMPONENT, source_id.as_deref())
        .await
        .context("Failed to create job run")?;
    println!("Job run: {}", job_run_id);
    Ok(job_run_id)
}

/// Close the job run with the report, or the error that aborted it.
async fn finish_job(
    store: &PgStore,
    job_run_id: Uuid,
    outcome: ranking::Result<RunReport>,
) -> Result<RunReport> {
    match outcome {
        Ok(report) => {
            let status = if report.applied { "ok" } else { "preview" };
            let detail = serde_json::to_value(&report)?;
            store
                .finish_job_run(job_run_id, status, None, detail)
                .await
                .context("Failed to finish job run")?;
            Ok(report)
        }
        Err(e) => {
            let message = e.to_string();
            store
                .finish_job_run(job_run_id, "failed", Some(&message), serde_json::json!({}))
                .await
                .context("Failed to record job failure")?;
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();
    let args = Args::parse();
    let config = Config::from_env();

    println!("=== Crime Ranking Ingest ===");
    log::debug!("Command: {:?}", args.command);

    let mut store = config.connect(args.db_url).await?;

    let report = match args.command {
        Command::Migrate => {
            store.migrate().await.context("Failed to apply schema")?;
            println!("Schema applied");
            return Ok(());
        }
        Command::SeedStates => {
            let job = start_job(&store, None).await?;
            let outcome = pipeline::seed_states(&mut store).await;
            finish_job(&store, job, outcome).await?
        }
        Command::Import { file, dry_run } => {
            let path = file.unwrap_or_else(|| config.ranking_file.clone());
            println!("File: {}", path.display());
            println!("Mode: {}", if dry_run { "dry-run" } else { "live" });
            let table = read_table(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            if dry_run {
                pipeline::ingest(&mut store, &table, true).await?
            } else {
                let job = start_job(&store, Some(&path)).await?;
                let outcome = pipeline::ingest(&mut store, &table, false).await;
                finish_job(&store, job, outcome).await?
            }
        }
        Command::PruneOrphans { file, confirm } => {
            let path = file.unwrap_or_else(|| config.ranking_file.clone());
            println!("File: {}", path.display());
            let table = read_table(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            let job = start_job(&store, Some(&path)).await?;
            let outcome = pipeline::prune_orphans(&mut store, &table, confirm).await;
            finish_job(&store, job, outcome).await?
        }
        Command::RemoveUnranked { confirm } => {
            let job = start_job(&store, None).await?;
            let outcome = pipeline::remove_unranked(&mut store, confirm).await;
            finish_job(&store, job, outcome).await?
        }
        Command::Dedupe { confirm } => {
            let job = start_job(&store, None).await?;
            let outcome = pipeline::remove_duplicates(&mut store, confirm).await;
            finish_job(&store, job, outcome).await?
        }
        Command::ImportCoordinates {
            file,
            skip_existing,
        } => {
            let path = file.unwrap_or_else(|| config.coordinates_file.clone());
            println!("File: {}", path.display());
            let records = read_records(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            let job = start_job(&store, Some(&path)).await?;
            let outcome = pipeline::import_coordinates(&mut store, &records, skip_existing).await;
            finish_job(&store, job, outcome).await?
        }
    };

    println!();
    print!("{}", report);

    Ok(())
}
