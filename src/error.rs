use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EtlError {
    pub fn persistence(message: impl Into<String>, source: rusqlite::Error) -> Self {
        EtlError::Persistence {
            message: message.into(),
            source,
        }
    }

    /// Column names reported by a schema failure, empty for every other kind
    pub fn missing_columns(&self) -> &[String] {
        match self {
            EtlError::Schema { missing } => missing,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
