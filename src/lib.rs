//! Daily sales extract pipeline: validate a CSV of orders and merge it
//! idempotently into the `sales_orders` table.

pub mod config;
pub mod constants;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod transform;
pub mod types;

pub use config::{Config, PipelineConfig};
pub use error::{EtlError, Result};
pub use pipeline::{run_etl, run_pipeline};
pub use storage::{OrderStore, TableRef};
pub use transform::transform;
pub use types::{CanonicalOrder, PipelineReport, RawRecord, RawTable, TransformReport};
