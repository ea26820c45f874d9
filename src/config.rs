use chrono::NaiveDate;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{self, DATA_DIR_ENV, DB_SCHEMA_ENV, DB_URI_ENV, DEFAULT_DATA_DIR};
use crate::error::{EtlError, Result};

/// Settings file layout (`sales_etl.toml`)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_delimiter() -> String {
    ",".to_string()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            delimiter: default_delimiter(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            EtlError::Configuration(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }

    /// Build from `DB_URI`, `DATA_DIR` and `DB_SCHEMA`. A missing `DB_URI`
    /// is left empty and rejected when the pipeline opens the database.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            database: DatabaseConfig {
                url: non_empty(DB_URI_ENV).unwrap_or_default(),
                schema: non_empty(DB_SCHEMA_ENV),
            },
            input: InputConfig {
                data_dir: non_empty(DATA_DIR_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(default_data_dir),
                delimiter: default_delimiter(),
            },
        }
    }

    /// Pipeline settings for the extract of one logical date
    pub fn pipeline_for_date(&self, logical_date: NaiveDate) -> Result<PipelineConfig> {
        let input_path = self
            .input
            .data_dir
            .join(constants::daily_file_name(logical_date));
        self.pipeline_for_file(input_path)
    }

    pub fn pipeline_for_file<P: Into<PathBuf>>(&self, input_path: P) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            input_path: input_path.into(),
            database_url: self.database.url.clone(),
            schema: self.database.schema.clone(),
            delimiter: parse_delimiter(&self.input.delimiter)?,
        })
    }
}

fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ if raw == "\\t" => Ok(b'\t'),
        _ => Err(EtlError::Configuration(format!(
            "delimiter must be a single ASCII character, got '{raw}'"
        ))),
    }
}

/// Everything one pipeline run needs, passed explicitly to `run_pipeline`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub database_url: String,
    pub schema: Option<String>,
    pub delimiter: u8,
}

impl PipelineConfig {
    pub fn new<P: Into<PathBuf>>(input_path: P, database_url: &str, schema: Option<&str>) -> Self {
        Self {
            input_path: input_path.into(),
            database_url: database_url.to_string(),
            schema: schema.map(|s| s.to_string()),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [database]
            url = "/var/lib/sales/sales.db"
            schema = "analytics"

            [input]
            data_dir = "/opt/extracts"
            delimiter = ";"
            "#,
        )
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let pipeline = config.pipeline_for_date(date).unwrap();
        assert_eq!(pipeline.input_path, PathBuf::from("/opt/extracts/2025-03-09.csv"));
        assert_eq!(pipeline.database_url, "/var/lib/sales/sales.db");
        assert_eq!(pipeline.schema.as_deref(), Some("analytics"));
        assert_eq!(pipeline.delimiter, b';');
    }

    #[test]
    fn test_input_section_defaults() {
        let config: Config = toml::from_str("[database]\nurl = \"sales.db\"\n").unwrap();
        assert_eq!(config.input.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.pipeline_for_file("x.csv").unwrap().delimiter, b',');
        assert_eq!(config.database.schema, None);
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("|").unwrap(), b'|');
        assert_eq!(parse_delimiter("\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert!(matches!(parse_delimiter(";;"), Err(EtlError::Configuration(_))));
        assert!(matches!(parse_delimiter(""), Err(EtlError::Configuration(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::load("/nonexistent/sales_etl.toml").unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }
}
