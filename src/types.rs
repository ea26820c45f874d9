use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One untyped input row; `None` marks a cell the source row did not have
pub type RawRecord = Vec<Option<String>>;

/// Header plus rows exactly as read from the extract
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<RawRecord>) -> Self {
        Self { headers, rows }
    }

    /// Build a table from string literals; empty cells stay present as `Some("")`
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| Some(cell.to_string())).collect())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A fully validated order ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub order_id: i64,
    pub customer: String,
    pub amount: f64,
    pub order_date: NaiveDate,
}

/// Output of the transformer: the cleaned batch plus what was thrown away
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub orders: Vec<CanonicalOrder>,
    pub input_rows: usize,
    /// Rows excluded because order_id, amount or date failed to parse
    pub dropped_rows: usize,
    /// Valid rows superseded by a later version of the same order
    pub duplicate_rows: usize,
}

/// Summary of one pipeline invocation
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub input_path: PathBuf,
    pub input_sha256: String,
    pub target_table: String,
    pub input_rows: usize,
    pub dropped_rows: usize,
    pub duplicate_rows: usize,
    pub upserted_rows: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
