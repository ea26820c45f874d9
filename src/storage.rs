use chrono::NaiveDate;
use metrics::counter;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::constants::{BUILTIN_SCHEMAS, ORDERS_TABLE};
use crate::error::{EtlError, Result};
use crate::types::CanonicalOrder;

const DATE_STORAGE_FORMAT: &str = "%Y-%m-%d";

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The target table, optionally qualified by a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    schema: Option<String>,
    table: String,
}

impl TableRef {
    /// `sales_orders`, qualified by `schema` when one is given.
    /// Blank schemas are treated as absent.
    pub fn orders(schema: Option<&str>) -> Result<Self> {
        Self::new(schema, ORDERS_TABLE)
    }

    pub fn new(schema: Option<&str>, table: &str) -> Result<Self> {
        let schema = schema.map(str::trim).filter(|s| !s.is_empty());
        if let Some(s) = schema {
            if !is_identifier(s) {
                return Err(EtlError::Configuration(format!("invalid schema name '{s}'")));
            }
        }
        if !is_identifier(table) {
            return Err(EtlError::Configuration(format!("invalid table name '{table}'")));
        }
        Ok(Self {
            schema: schema.map(|s| s.to_string()),
            table: table.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted identifier safe to splice into SQL
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{}\".\"{}\"", schema, self.table),
            None => format!("\"{}\"", self.table),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => f.write_str(&self.table),
        }
    }
}

fn is_in_memory(target: &str) -> bool {
    target == ":memory:" || target.starts_with("file::memory:") || target.contains("mode=memory")
}

/// Where an attached schema lives: next to the main database file
fn attached_schema_path(target: &str, schema: &str) -> String {
    if is_in_memory(target) {
        return ":memory:".to_string();
    }
    let path = target.strip_prefix("file:").unwrap_or(target);
    let path = path.split('?').next().unwrap_or(path);
    let dir = Path::new(path).parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{schema}.db")).to_string_lossy().to_string()
}

/// Percent-escape the characters that would end the path part of a `file:` URI
fn uri_escape_path(path: &str) -> String {
    path.replace('%', "%25").replace('?', "%3f").replace('#', "%23")
}

/// Whether a missing database file may be created on open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    CreateIfMissing,
    ExistingOnly,
}

/// Open the target database, creating missing files.
///
/// An empty target is a configuration error and no file is touched. A schema
/// other than `main`/`temp` is attached from `<schema>.db` beside the target.
pub fn open_database(target: &str, schema: Option<&str>) -> Result<Connection> {
    open_database_with(target, schema, OpenMode::CreateIfMissing)
}

/// Open the target database; with `ExistingOnly` a missing target or schema
/// file is a persistence error instead of a new empty database.
#[instrument(skip(target, schema), fields(schema = schema.unwrap_or("main")))]
pub fn open_database_with(target: &str, schema: Option<&str>, mode: OpenMode) -> Result<Connection> {
    let target = target.trim();
    if target.is_empty() {
        return Err(EtlError::Configuration("database target not provided".to_string()));
    }
    let table = TableRef::orders(schema)?;

    let mut flags =
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if mode == OpenMode::CreateIfMissing {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let conn = Connection::open_with_flags(target, flags)
        .map_err(|e| EtlError::persistence(format!("Failed to open database '{target}'"), e))?;

    if let Some(schema) = table.schema() {
        if !BUILTIN_SCHEMAS.contains(&schema) {
            let path = attached_schema_path(target, schema);
            // ATTACH creates missing files unless the URI asks for mode=rw
            let location = if mode == OpenMode::ExistingOnly && path != ":memory:" {
                format!("file:{}?mode=rw", uri_escape_path(&path))
            } else {
                path
            };
            debug!("Attaching schema {} from {}", schema, location);
            conn.execute(&format!("ATTACH DATABASE ?1 AS \"{schema}\""), params![location])
                .map_err(|e| EtlError::persistence(format!("Failed to attach schema '{schema}'"), e))?;
        }
    }
    Ok(conn)
}

/// Persistent home of canonical orders
pub struct OrderStore {
    conn: Connection,
    table: TableRef,
}

impl OrderStore {
    pub fn open(target: &str, schema: Option<&str>) -> Result<Self> {
        Self::open_with(target, schema, OpenMode::CreateIfMissing)
    }

    /// Open a store whose database files must already exist
    pub fn open_existing(target: &str, schema: Option<&str>) -> Result<Self> {
        Self::open_with(target, schema, OpenMode::ExistingOnly)
    }

    fn open_with(target: &str, schema: Option<&str>, mode: OpenMode) -> Result<Self> {
        let table = TableRef::orders(schema)?;
        let conn = open_database_with(target, schema, mode)?;
        Ok(Self { conn, table })
    }

    pub fn from_connection(conn: Connection, table: TableRef) -> Self {
        Self { conn, table }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the orders table if missing. The pipeline itself never calls
    /// this; it expects the table to exist.
    pub fn ensure_table(&self) -> Result<()> {
        let index = match self.table.schema() {
            Some(schema) => format!("\"{}\".\"idx_{}_date\"", schema, self.table.table()),
            None => format!("\"idx_{}_date\"", self.table.table()),
        };
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {tbl} (
                order_id  INTEGER PRIMARY KEY,
                customer  TEXT NOT NULL,
                amount    REAL NOT NULL,
                date      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {index} ON "{bare}" (date);
            "#,
            tbl = self.table.quoted(),
            bare = self.table.table(),
        );
        self.conn
            .execute_batch(&ddl)
            .map_err(|e| EtlError::persistence(format!("Failed to create {}", self.table), e))?;
        info!("Ensured table {}", self.table);
        Ok(())
    }

    /// Insert new orders and overwrite customer, amount and date of existing
    /// ones, all in one transaction. Returns the number of rows submitted.
    #[instrument(skip(self, orders), fields(table = %self.table, rows = orders.len()))]
    pub fn upsert_orders(&mut self, orders: &[CanonicalOrder]) -> Result<usize> {
        if orders.is_empty() {
            info!("No rows to upsert");
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO {} (order_id, customer, amount, date) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(order_id) DO UPDATE SET customer=excluded.customer, amount=excluded.amount, date=excluded.date",
            self.table.quoted()
        );

        let tx = self
            .conn
            .transaction()
            .map_err(|e| EtlError::persistence("Failed to begin transaction", e))?;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| EtlError::persistence(format!("Failed to prepare upsert into {}", self.table), e))?;
            for order in orders {
                stmt.execute(params![
                    order.order_id,
                    order.customer,
                    order.amount,
                    order.order_date.format(DATE_STORAGE_FORMAT).to_string(),
                ])
                .map_err(|e| {
                    EtlError::persistence(format!("Failed to upsert order {}", order.order_id), e)
                })?;
            }
        }
        // dropping an uncommitted transaction rolls it back
        tx.commit()
            .map_err(|e| EtlError::persistence("Failed to commit upsert batch", e))?;

        info!("Upserted {} rows", orders.len());
        counter!("sales_etl_rows_upserted_total").increment(orders.len() as u64);
        Ok(orders.len())
    }

    /// Number of stored orders dated `date`; used to validate a daily load
    pub fn count_orders_for_date(&self, date: NaiveDate) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE date = ?1", self.table.quoted());
        self.conn
            .query_row(&sql, params![date.format(DATE_STORAGE_FORMAT).to_string()], |row| row.get(0))
            .map_err(|e| EtlError::persistence(format!("Failed to count orders in {}", self.table), e))
    }

    pub fn count_orders(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.quoted());
        self.conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| EtlError::persistence(format!("Failed to count orders in {}", self.table), e))
    }

    pub fn fetch_order(&self, order_id: i64) -> Result<Option<CanonicalOrder>> {
        let sql = format!(
            "SELECT order_id, customer, amount, date FROM {} WHERE order_id = ?1",
            self.table.quoted()
        );
        let row = self
            .conn
            .query_row(&sql, params![order_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()
            .map_err(|e| EtlError::persistence(format!("Failed to read order {order_id}"), e))?;

        let Some((order_id, customer, amount, date)) = row else {
            return Ok(None);
        };
        let order_date = NaiveDate::parse_from_str(&date, DATE_STORAGE_FORMAT).map_err(|e| {
            EtlError::persistence(
                format!("Stored date '{date}' for order {order_id} is malformed"),
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)),
            )
        })?;
        Ok(Some(CanonicalOrder {
            order_id,
            customer,
            amount,
            order_date,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: i64, amount: f64) -> CanonicalOrder {
        CanonicalOrder {
            order_id: id,
            customer: format!("customer-{id}"),
            amount,
            order_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    fn memory_store() -> OrderStore {
        let store = OrderStore::open(":memory:", None).unwrap();
        store.ensure_table().unwrap();
        store
    }

    #[test]
    fn test_table_ref_quoting() {
        assert_eq!(TableRef::orders(None).unwrap().quoted(), "\"sales_orders\"");
        let qualified = TableRef::orders(Some("analytics")).unwrap();
        assert_eq!(qualified.quoted(), "\"analytics\".\"sales_orders\"");
        assert_eq!(qualified.to_string(), "analytics.sales_orders");
        assert_eq!(TableRef::orders(Some("  ")).unwrap().schema(), None);
    }

    #[test]
    fn test_table_ref_rejects_bad_identifiers() {
        assert!(matches!(
            TableRef::orders(Some("x\"; DROP TABLE y; --")),
            Err(EtlError::Configuration(_))
        ));
        assert!(matches!(TableRef::new(None, "1orders"), Err(EtlError::Configuration(_))));
    }

    #[test]
    fn test_empty_target_is_configuration_error() {
        assert!(matches!(open_database("  ", None), Err(EtlError::Configuration(_))));
    }

    #[test]
    fn test_attached_schema_path() {
        assert_eq!(attached_schema_path(":memory:", "aux"), ":memory:");
        assert_eq!(
            attached_schema_path("/var/lib/sales/main.db", "aux"),
            "/var/lib/sales/aux.db"
        );
        assert_eq!(
            attached_schema_path("file:/var/lib/sales/main.db?mode=rwc", "aux"),
            "/var/lib/sales/aux.db"
        );
    }

    #[test]
    fn test_empty_batch_touches_nothing() {
        // no table exists, so any statement would fail
        let mut store = OrderStore::open(":memory:", None).unwrap();
        assert_eq!(store.upsert_orders(&[]).unwrap(), 0);
    }

    #[test]
    fn test_upsert_inserts_then_overwrites() {
        let mut store = memory_store();
        assert_eq!(store.upsert_orders(&[order(5, 100.0)]).unwrap(), 1);
        assert_eq!(store.upsert_orders(&[order(5, 200.0)]).unwrap(), 1);
        assert_eq!(store.count_orders().unwrap(), 1);
        assert_eq!(store.fetch_order(5).unwrap().unwrap().amount, 200.0);
    }

    #[test]
    fn test_missing_table_is_persistence_error() {
        let mut store = OrderStore::open(":memory:", None).unwrap();
        let err = store.upsert_orders(&[order(1, 1.0)]).unwrap_err();
        assert!(matches!(err, EtlError::Persistence { .. }));
    }

    #[test]
    fn test_fetch_missing_order() {
        let store = memory_store();
        assert_eq!(store.fetch_order(404).unwrap(), None);
    }

    #[test]
    fn test_upsert_over_supplied_connection() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = OrderStore::from_connection(conn, TableRef::orders(None).unwrap());
        store.ensure_table().unwrap();

        assert_eq!(store.upsert_orders(&[order(1, 3.5), order(2, 4.0)]).unwrap(), 2);

        let total: f64 = store
            .connection()
            .query_row("SELECT SUM(amount) FROM sales_orders", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 7.5);
    }

    #[test]
    fn test_open_existing_does_not_create_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let err = OrderStore::open_existing(&path.to_string_lossy(), None).err().unwrap();
        assert!(matches!(err, EtlError::Persistence { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_uri_escape_path() {
        assert_eq!(uri_escape_path("/data/a?b#c%d.db"), "/data/a%3fb%23c%25d.db");
    }
}
