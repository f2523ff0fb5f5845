//! cmx-analysis - command-line front end
//!
//! Analyzes audio files into the SQLite record store, scores stored records
//! against each other and lists what has been analyzed. All output is JSON on
//! stdout; logs go to stderr (or the configured log file).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use cmx_analysis::config::CmxToml;
use cmx_analysis::models::{AudioAsset, DeclaredAttributes, RecordKey};
use cmx_analysis::store::{init_database_pool, AnalysisStore, SqliteRepository};
use cmx_analysis::{AnalysisOrchestrator, CompatibilityScorer, MODEL_VERSION};
use cmx_common::config::{init_tracing, load_toml_config, write_toml_config, ConfigPathResolver};
use cmx_common::events::{AnalysisEvent, EventBus};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cmx-analysis")]
#[command(about = "Audio feature extraction and compatibility scoring")]
#[command(version)]
struct Args {
    /// Configuration file (TOML); falls back to CMX_CONFIG, then the user config dir
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the database path from the configuration
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze audio files and store their records
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Score two stored records by content fingerprint
    Score {
        fingerprint_a: String,
        fingerprint_b: String,

        /// Declared genres for the first profile (comma separated)
        #[arg(long, value_delimiter = ',')]
        genres_a: Vec<String>,

        /// Declared genres for the second profile (comma separated)
        #[arg(long, value_delimiter = ',')]
        genres_b: Vec<String>,

        /// Declared tags for the first profile (comma separated)
        #[arg(long, value_delimiter = ',')]
        tags_a: Vec<String>,

        /// Declared tags for the second profile (comma separated)
        #[arg(long, value_delimiter = ',')]
        tags_b: Vec<String>,
    },

    /// List fingerprints stored under the current model version
    List,

    /// Write a configuration file with every option at its default
    InitConfig {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = ConfigPathResolver::new().resolve(args.config.as_deref());
    let mut config: CmxToml = load_toml_config(config_path.as_deref())?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    init_tracing(&config.logging)?;
    info!("Starting cmx-analysis {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }
    config
        .engine
        .validate()
        .context("Invalid engine configuration")?;

    let output = match args.command {
        Command::InitConfig { path } => {
            write_toml_config(&CmxToml::default(), &path)?;
            json!({ "written": path.display().to_string() })
        }
        Command::Analyze { files } => analyze(&config, files).await?,
        Command::Score {
            fingerprint_a,
            fingerprint_b,
            genres_a,
            genres_b,
            tags_a,
            tags_b,
        } => {
            let declared = if genres_a.is_empty()
                && genres_b.is_empty()
                && tags_a.is_empty()
                && tags_b.is_empty()
            {
                None
            } else {
                Some((
                    DeclaredAttributes::new(genres_a, tags_a),
                    DeclaredAttributes::new(genres_b, tags_b),
                ))
            };
            score(&config, &fingerprint_a, &fingerprint_b, declared).await?
        }
        Command::List => {
            let store = open_store(&config).await?;
            let fingerprints = store.list_fingerprints(MODEL_VERSION).await?;
            json!({ "model_version": MODEL_VERSION, "fingerprints": fingerprints })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn open_store(config: &CmxToml) -> Result<Arc<AnalysisStore>> {
    info!("Database: {}", config.database_path.display());
    let pool = init_database_pool(&config.database_path).await?;
    let repository = Arc::new(SqliteRepository::new(pool));
    Ok(Arc::new(AnalysisStore::new(repository)))
}

async fn analyze(config: &CmxToml, files: Vec<PathBuf>) -> Result<Value> {
    let store = open_store(config).await?;
    let event_bus = EventBus::new(256);
    let events = tokio::spawn(log_events(event_bus.subscribe()));
    let orchestrator = AnalysisOrchestrator::new(config.engine.clone(), store, event_bus)?;

    let mut results: Vec<Value> = Vec::with_capacity(files.len());
    let mut pending: Vec<(PathBuf, AudioAsset)> = Vec::new();

    for path in files {
        match AudioAsset::from_file(&path) {
            Ok(asset) => pending.push((path, asset)),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Cannot load file");
                results.push(json!({
                    "file": path.display().to_string(),
                    "status": "error",
                    "error_kind": e.kind(),
                    "message": e.to_string(),
                }));
            }
        }
    }

    let batch_size = config.engine.max_batch_size;
    while !pending.is_empty() {
        let chunk: Vec<(PathBuf, AudioAsset)> =
            pending.drain(..batch_size.min(pending.len())).collect();
        let (paths, assets): (Vec<PathBuf>, Vec<AudioAsset>) = chunk.into_iter().unzip();

        let report = orchestrator.submit_batch(assets).await?;
        for item in report.items {
            let file = paths[item.index].display().to_string();
            results.push(match item.result {
                Ok(record) => json!({
                    "file": file,
                    "status": "ok",
                    "record": record.as_ref(),
                }),
                Err(e) => json!({
                    "file": file,
                    "status": "error",
                    "error_kind": e.kind(),
                    "message": e.to_string(),
                    "retryable": e.is_retryable(),
                }),
            });
        }
    }

    drop(orchestrator);
    events.abort();

    let succeeded = results.iter().filter(|r| r["status"] == "ok").count();
    Ok(json!({
        "model_version": MODEL_VERSION,
        "succeeded": succeeded,
        "failed": results.len() - succeeded,
        "results": results,
    }))
}

async fn score(
    config: &CmxToml,
    fingerprint_a: &str,
    fingerprint_b: &str,
    declared: Option<(DeclaredAttributes, DeclaredAttributes)>,
) -> Result<Value> {
    let store = open_store(config).await?;
    let scorer = CompatibilityScorer::new(config.engine.scoring.clone())?;

    let fetch = |fingerprint: &str| {
        let store = Arc::clone(&store);
        let key = RecordKey::new(fingerprint, MODEL_VERSION);
        async move {
            store
                .lookup(&key)
                .await?
                .ok_or_else(|| anyhow!("No record for {}", key))
        }
    };
    let a = fetch(fingerprint_a).await?;
    let b = fetch(fingerprint_b).await?;

    let result = scorer.score(&a, &b, declared.as_ref().map(|(x, y)| (x, y)));
    Ok(serde_json::to_value(&result)?)
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<AnalysisEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => debug!(
                submission_id = %event.submission_id(),
                event = ?event,
                "Analysis event"
            ),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
