//! Validation and normalization of a raw sales extract.
//!
//! Schema problems (a required column is missing) fail the whole batch.
//! Row problems (an unparsable id, amount or date) only drop that row.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use metrics::counter;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::constants::{
    AMOUNT_COLUMN, CUSTOMER_COLUMN, DATE_COLUMN, ORDER_ID_COLUMN, REQUIRED_COLUMNS,
};
use crate::error::{EtlError, Result};
use crate::types::{CanonicalOrder, RawRecord, RawTable, TransformReport};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%Y.%m.%d",
    "%Y%m%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Positions of the required columns inside a raw row
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    order_id: usize,
    customer: usize,
    amount: usize,
    date: usize,
}

/// A row after per-column coercion; `None` means the value did not parse
#[derive(Debug)]
struct CoercedRow {
    order_id: Option<i64>,
    customer: String,
    amount: Option<f64>,
    order_date: Option<NaiveDate>,
}

/// Trim and lowercase a header name
pub fn normalize_column_name(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn resolve_columns(headers: &[String]) -> Result<ColumnIndex> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (i, header) in headers.iter().enumerate() {
        // first occurrence wins when two headers normalize to the same name
        positions.entry(normalize_column_name(header)).or_insert(i);
    }

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !positions.contains_key(**col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(EtlError::Schema { missing });
    }

    Ok(ColumnIndex {
        order_id: positions[ORDER_ID_COLUMN],
        customer: positions[CUSTOMER_COLUMN],
        amount: positions[AMOUNT_COLUMN],
        date: positions[DATE_COLUMN],
    })
}

fn cell(row: &RawRecord, idx: usize) -> Option<&str> {
    row.get(idx).and_then(|c| c.as_deref())
}

/// Parse an order identifier. Integral float literals such as `"3.0"` are accepted.
pub fn parse_order_id(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(id) = trimmed.parse::<i64>() {
        return Some(id);
    }
    let float = trimmed.parse::<f64>().ok()?;
    if float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
        Some(float as i64)
    } else {
        None
    }
}

/// Parse a monetary amount; NaN and infinities count as unparsable
pub fn parse_amount(value: &str) -> Option<f64> {
    let amount = value.trim().parse::<f64>().ok()?;
    amount.is_finite().then_some(amount)
}

/// Permissive calendar date parser. Datetimes are truncated to their date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
    {
        return Some(date);
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|dt| dt.date())
}

fn coerce_row(row: &RawRecord, columns: ColumnIndex) -> CoercedRow {
    CoercedRow {
        order_id: cell(row, columns.order_id).and_then(parse_order_id),
        customer: cell(row, columns.customer).unwrap_or_default().to_string(),
        amount: cell(row, columns.amount).and_then(parse_amount),
        order_date: cell(row, columns.date).and_then(parse_date),
    }
}

/// Keep one order per id: the latest date wins, and for equal dates the row
/// appearing later in the input wins. Survivors come back sorted by date,
/// then by input position.
pub fn deduplicate_latest(orders: Vec<CanonicalOrder>) -> Vec<CanonicalOrder> {
    let mut latest: HashMap<i64, (usize, CanonicalOrder)> = HashMap::new();
    for (position, order) in orders.into_iter().enumerate() {
        let supersedes = latest
            .get(&order.order_id)
            .map_or(true, |(_, kept)| order.order_date >= kept.order_date);
        if supersedes {
            latest.insert(order.order_id, (position, order));
        }
    }

    let mut survivors: Vec<(usize, CanonicalOrder)> = latest.into_values().collect();
    survivors.sort_by(|(pa, a), (pb, b)| a.order_date.cmp(&b.order_date).then(pa.cmp(pb)));
    survivors.into_iter().map(|(_, order)| order).collect()
}

/// Validate and normalize a raw extract into canonical orders.
///
/// Fails only when a required column is absent. Rows whose `order_id`,
/// `amount` or `date` do not parse are dropped and counted.
#[instrument(skip(raw), fields(rows = raw.len()))]
pub fn transform(raw: &RawTable) -> Result<TransformReport> {
    let columns = resolve_columns(&raw.headers)?;

    let valid: Vec<CanonicalOrder> = raw
        .rows
        .iter()
        .map(|row| coerce_row(row, columns))
        .filter_map(|row| {
            Some(CanonicalOrder {
                order_id: row.order_id?,
                customer: row.customer,
                amount: row.amount?,
                order_date: row.order_date?,
            })
        })
        .collect();

    let dropped_rows = raw.len() - valid.len();
    info!("Dropped {} invalid rows", dropped_rows);
    counter!("sales_etl_rows_dropped_total").increment(dropped_rows as u64);

    let valid_rows = valid.len();
    let orders = deduplicate_latest(valid);
    let duplicate_rows = valid_rows - orders.len();
    if duplicate_rows > 0 {
        debug!("Collapsed {} duplicate order rows", duplicate_rows);
    }

    Ok(TransformReport {
        orders,
        input_rows: raw.len(),
        dropped_rows,
        duplicate_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn order(id: i64, customer: &str, day: &str) -> CanonicalOrder {
        CanonicalOrder {
            order_id: id,
            customer: customer.to_string(),
            amount: 1.0,
            order_date: date(day),
        }
    }

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("  Order_ID "), "order_id");
        assert_eq!(normalize_column_name("\u{feff}order_id"), "order_id");
        assert_eq!(normalize_column_name("AMOUNT"), "amount");
    }

    #[test]
    fn test_parse_order_id() {
        assert_eq!(parse_order_id("42"), Some(42));
        assert_eq!(parse_order_id(" 7 "), Some(7));
        assert_eq!(parse_order_id("3.0"), Some(3));
        assert_eq!(parse_order_id("3.5"), None);
        assert_eq!(parse_order_id(""), None);
        assert_eq!(parse_order_id("abc"), None);
        assert_eq!(parse_order_id("nan"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("20"), Some(20.0));
        assert_eq!(parse_amount(" 10.5 "), Some(10.5));
        assert_eq!(parse_amount("bad"), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("inf"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = date("2025-01-02");
        for input in [
            "2025-01-02",
            "2025/01/02",
            "01/02/2025",
            "20250102",
            "Jan 02, 2025",
            "January 2, 2025",
            "2 Jan 2025",
            "2025-01-02 13:45:00",
            "2025-01-02T13:45:00",
            "2025-01-02T13:45:00Z",
            "2025-01-02T13:45:00.123+00:00",
        ] {
            assert_eq!(parse_date(input), Some(expected), "input {input}");
        }
        assert_eq!(parse_date("bad_date"), None);
        assert_eq!(parse_date("2025-13-40"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_deduplicate_keeps_latest_date_not_last_row() {
        let orders = vec![order(1, "Newer", "2025-01-05"), order(1, "Older", "2025-01-01")];
        let out = deduplicate_latest(orders);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].customer, "Newer");
    }

    #[test]
    fn test_deduplicate_same_date_keeps_later_row() {
        let orders = vec![
            order(9, "First", "2025-01-03"),
            order(9, "Second", "2025-01-03"),
            order(9, "Earlier", "2025-01-01"),
        ];
        let out = deduplicate_latest(orders);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].customer, "Second");
    }

    #[test]
    fn test_deduplicate_sorts_by_date() {
        let orders = vec![order(2, "b", "2025-01-03"), order(1, "a", "2025-01-01")];
        let ids: Vec<i64> = deduplicate_latest(orders).iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_duplicate_headers_use_first_occurrence() {
        let raw = RawTable::from_rows(
            &["order_id", "customer", "amount", "date", "AMOUNT"],
            &[&["1", "A", "10", "2025-01-01", "999"]],
        );
        let report = transform(&raw).unwrap();
        assert_eq!(report.orders[0].amount, 10.0);
    }

    #[test]
    fn test_short_row_is_dropped() {
        let raw = RawTable::new(
            vec!["order_id".into(), "customer".into(), "amount".into(), "date".into()],
            vec![vec![Some("1".into()), Some("A".into())]],
        );
        let report = transform(&raw).unwrap();
        assert!(report.orders.is_empty());
        assert_eq!(report.dropped_rows, 1);
    }
}
