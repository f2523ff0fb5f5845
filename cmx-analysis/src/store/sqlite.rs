//! SQLite-backed record repository
//!
//! One row per (fingerprint, model_version). The record itself is stored as
//! JSON; a few columns are duplicated for ad-hoc inspection.

use super::repository::RecordRepository;
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{AnalysisRecord, RecordKey};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> cmx_common::Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

pub async fn init_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_records (
            fingerprint TEXT NOT NULL,
            model_version TEXT NOT NULL,
            analysis_depth TEXT NOT NULL,
            confidence REAL NOT NULL,
            record_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (fingerprint, model_version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database tables initialized (analysis_records)");

    Ok(())
}

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode_record(json: &str) -> AnalysisResult<AnalysisRecord> {
    serde_json::from_str(json)
        .map_err(|e| AnalysisError::PipelineTransient(format!("stored record unreadable: {}", e)))
}

#[async_trait]
impl RecordRepository for SqliteRepository {
    async fn get(&self, key: &RecordKey) -> AnalysisResult<Option<AnalysisRecord>> {
        let row = sqlx::query(
            "SELECT record_json FROM analysis_records WHERE fingerprint = ? AND model_version = ?",
        )
        .bind(&key.fingerprint)
        .bind(&key.model_version)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode_record(&r.get::<String, _>("record_json")))
            .transpose()
    }

    async fn insert_if_absent(&self, record: AnalysisRecord) -> AnalysisResult<AnalysisRecord> {
        let json = serde_json::to_string(&record)
            .map_err(|e| AnalysisError::PipelineTransient(format!("serialize record: {}", e)))?;
        let depth = match record.analysis_depth {
            crate::models::AnalysisDepth::Full => "full",
            crate::models::AnalysisDepth::Basic => "basic",
        };

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO analysis_records (
                fingerprint, model_version, analysis_depth, confidence, record_json, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.model_version)
        .bind(depth)
        .bind(record.confidence as f64)
        .bind(&json)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(key = %record.key(), "Stored analysis record");
            return Ok(record);
        }

        debug!(key = %record.key(), "Record already stored, returning existing");
        self.get(&record.key()).await?.ok_or_else(|| {
            AnalysisError::PipelineTransient(format!("record {} vanished after insert", record.key()))
        })
    }

    async fn list_fingerprints(&self, model_version: &str) -> AnalysisResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT fingerprint FROM analysis_records WHERE model_version = ? ORDER BY fingerprint",
        )
        .bind(model_version)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<String, _>("fingerprint")).collect())
    }
}
