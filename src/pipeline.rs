use chrono::Utc;
use metrics::histogram;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{EtlError, Result};
use crate::fingerprint::file_sha256;
use crate::ingest::read_csv;
use crate::storage::{OrderStore, TableRef};
use crate::transform::transform;
use crate::types::PipelineReport;

/// Reject settings that can never work before any file or database is touched
fn validate_config(config: &PipelineConfig) -> Result<TableRef> {
    if config.database_url.trim().is_empty() {
        return Err(EtlError::Configuration("database target not provided".to_string()));
    }
    TableRef::orders(config.schema.as_deref())
}

/// Run one batch: read the extract, validate it, upsert it.
///
/// Fatal conditions surface in this order: configuration, missing input,
/// missing columns, persistence. Rows that fail to parse are only counted.
#[instrument(skip(config), fields(run_id = tracing::field::Empty, input = %config.input_path.display()))]
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport> {
    let run_id = Uuid::new_v4();
    tracing::Span::current().record("run_id", tracing::field::display(run_id));
    let started_at = Utc::now();
    let t_pipeline = Instant::now();

    let table = validate_config(config)?;
    info!("Running ETL for {}", config.input_path.display());

    let raw = read_csv(&config.input_path, config.delimiter)?;
    let input_sha256 = file_sha256(&config.input_path)?;
    info!("Input fingerprint {}", input_sha256);

    let transformed = transform(&raw)?;
    info!(
        "Validated {} orders ({} dropped, {} duplicates)",
        transformed.orders.len(),
        transformed.dropped_rows,
        transformed.duplicate_rows
    );

    // nothing to persist: leave the database untouched
    let upserted_rows = if transformed.orders.is_empty() {
        info!("No rows to upsert");
        0
    } else {
        let mut store = OrderStore::open_existing(&config.database_url, table.schema())?;
        store.upsert_orders(&transformed.orders)?
    };

    histogram!("sales_etl_pipeline_duration_seconds").record(t_pipeline.elapsed().as_secs_f64());

    Ok(PipelineReport {
        run_id,
        input_path: config.input_path.clone(),
        input_sha256,
        target_table: table.to_string(),
        input_rows: transformed.input_rows,
        dropped_rows: transformed.dropped_rows,
        duplicate_rows: transformed.duplicate_rows,
        upserted_rows,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Run the pipeline for `file_path` against `db_target`, returning the number
/// of rows submitted to the upsert.
pub fn run_etl<P: AsRef<Path>>(file_path: P, db_target: &str, schema: Option<&str>) -> Result<usize> {
    let config = PipelineConfig::new(file_path.as_ref(), db_target, schema);
    run_pipeline(&config).map(|report| report.upserted_rows)
}
