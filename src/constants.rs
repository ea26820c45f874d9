//! Column and table names shared by the reader, transformer and loader.

// Logical columns every input file must carry (after trim + lowercase)
pub const ORDER_ID_COLUMN: &str = "order_id";
pub const CUSTOMER_COLUMN: &str = "customer";
pub const AMOUNT_COLUMN: &str = "amount";
pub const DATE_COLUMN: &str = "date";

pub const REQUIRED_COLUMNS: [&str; 4] = [
    ORDER_ID_COLUMN,
    CUSTOMER_COLUMN,
    AMOUNT_COLUMN,
    DATE_COLUMN,
];

/// Target table for the upsert
pub const ORDERS_TABLE: &str = "sales_orders";

// Environment variables read by `Config::from_env`
pub const DB_URI_ENV: &str = "DB_URI";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DB_SCHEMA_ENV: &str = "DB_SCHEMA";

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CONFIG_FILE: &str = "sales_etl.toml";

/// Schemas SQLite always has; anything else gets attached on open
pub const BUILTIN_SCHEMAS: [&str; 2] = ["main", "temp"];

/// Daily extracts are named `<YYYY-MM-DD>.csv`
pub fn daily_file_name(logical_date: chrono::NaiveDate) -> String {
    format!("{}.csv", logical_date.format("%Y-%m-%d"))
}
