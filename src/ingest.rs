use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::{EtlError, Result};
use crate::types::{RawRecord, RawTable};

/// Read a delimited extract with a header row into a `RawTable`.
///
/// Ragged rows are tolerated: cells past the end of a short row read as `None`.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_csv<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<RawTable> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(EtlError::InputNotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let table = read_csv_from(file, delimiter)?;
    debug!("Read {} rows with {} columns", table.len(), table.headers.len());
    Ok(table)
}

/// Same as `read_csv` but from any reader
pub fn read_csv_from<R: Read>(reader: R, delimiter: u8) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::None)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        rows.push(to_raw_record(&record?, headers.len()));
    }
    Ok(RawTable::new(headers, rows))
}

fn to_raw_record(record: &StringRecord, width: usize) -> RawRecord {
    (0..width.max(record.len()))
        .map(|i| record.get(i).map(|cell| cell.to_string()))
        .collect()
}
