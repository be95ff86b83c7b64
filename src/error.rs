use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encoding error: line {line} is not valid {encoding}")]
    Encoding { line: u64, encoding: String },

    #[error("Store build failed: {0}")]
    Build(String),

    #[error("Store access failed: {0}")]
    Store(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
