//! Registry configuration
//!
//! Layered: built-in defaults, then an optional JSON file, then
//! `RUC_REGISTRY_*` environment variables (a `.env` file is honored by the
//! binaries), then command-line flags applied by the caller.

use crate::error::{RegistryError, Result};
use crate::ingestion::SourceEncoding;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Largest number of host parameters a single SQLite statement accepts
/// (the historical `SQLITE_MAX_VARIABLE_NUMBER`)
pub const SQLITE_MAX_PARAMS: usize = 999;

const ENV_PREFIX: &str = "RUC_REGISTRY_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Field delimiter of the raw extract (ASCII)
    pub delimiter: char,

    /// Fields kept per record
    pub expected_fields: usize,

    /// Encoding label of the raw extract: "latin1" (ISO-8859-1) or any
    /// WHATWG label such as "windows-1252" or "utf-8"
    pub source_encoding: String,

    /// Whether the first record of the extract is a header
    pub has_header: bool,

    /// Column names used when the extract has no header
    pub columns: Vec<String>,

    /// Column holding the taxpayer identifier (after name normalization)
    pub identifier_column: String,

    /// Table the registry is loaded into
    pub table_name: String,

    /// Records appended per transaction during a bulk load
    pub chunk_size: usize,

    /// Identifiers per lookup query
    pub query_batch_limit: usize,

    /// Inputs between two progress reports while resolving
    pub progress_every: usize,

    /// Column of the user table holding raw identifiers
    pub input_column: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            delimiter: '|',
            expected_fields: 4,
            source_encoding: "latin1".to_string(),
            has_header: true,
            columns: vec![
                "ruc".to_string(),
                "nombre".to_string(),
                "estado".to_string(),
                "condicion".to_string(),
            ],
            identifier_column: "ruc".to_string(),
            table_name: "padron".to_string(),
            chunk_size: 5000,
            query_batch_limit: 900,
            progress_every: 50,
            input_column: "Documento".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `RUC_REGISTRY_*` variables that are set
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("DELIMITER") {
            self.delimiter = parse_var("DELIMITER", &v)?;
        }
        if let Some(v) = lookup("EXPECTED_FIELDS") {
            self.expected_fields = parse_var("EXPECTED_FIELDS", &v)?;
        }
        if let Some(v) = lookup("SOURCE_ENCODING") {
            self.source_encoding = v;
        }
        if let Some(v) = lookup("HAS_HEADER") {
            self.has_header = parse_var("HAS_HEADER", &v)?;
        }
        if let Some(v) = lookup("COLUMNS") {
            self.columns = v.split(',').map(|c| c.trim().to_string()).collect();
        }
        if let Some(v) = lookup("IDENTIFIER_COLUMN") {
            self.identifier_column = v;
        }
        if let Some(v) = lookup("TABLE_NAME") {
            self.table_name = v;
        }
        if let Some(v) = lookup("CHUNK_SIZE") {
            self.chunk_size = parse_var("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("QUERY_BATCH_LIMIT") {
            self.query_batch_limit = parse_var("QUERY_BATCH_LIMIT", &v)?;
        }
        if let Some(v) = lookup("PROGRESS_EVERY") {
            self.progress_every = parse_var("PROGRESS_EVERY", &v)?;
        }
        if let Some(v) = lookup("INPUT_COLUMN") {
            self.input_column = v;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() || self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(RegistryError::Config(format!(
                "delimiter must be a single ASCII character other than a line break, got {:?}",
                self.delimiter
            )));
        }
        if self.expected_fields == 0 {
            return Err(RegistryError::Config("expected_fields must be at least 1".to_string()));
        }
        match SourceEncoding::for_label(&self.source_encoding) {
            None => {
                return Err(RegistryError::Config(format!(
                    "unknown source encoding '{}'",
                    self.source_encoding
                )));
            }
            // Lines are split on raw '\n' bytes before decoding
            Some(encoding) if !encoding.is_ascii_compatible() => {
                return Err(RegistryError::Config(format!(
                    "source encoding '{}' is not ASCII-compatible",
                    self.source_encoding
                )));
            }
            Some(_) => {}
        }
        if !self.has_header && self.columns.len() != self.expected_fields {
            return Err(RegistryError::Config(format!(
                "{} column names configured for {} fields",
                self.columns.len(),
                self.expected_fields
            )));
        }
        if self.chunk_size == 0 {
            return Err(RegistryError::Config("chunk_size must be at least 1".to_string()));
        }
        if self.query_batch_limit == 0 || self.query_batch_limit > SQLITE_MAX_PARAMS {
            return Err(RegistryError::Config(format!(
                "query_batch_limit must be between 1 and {}, got {}",
                SQLITE_MAX_PARAMS, self.query_batch_limit
            )));
        }
        if self.progress_every == 0 {
            return Err(RegistryError::Config("progress_every must be at least 1".to_string()));
        }
        if self.table_name.trim().is_empty() || self.identifier_column.trim().is_empty() {
            return Err(RegistryError::Config(
                "table_name and identifier_column must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Delimiter as a byte; only meaningful after `validate`
    pub fn delimiter_byte(&self) -> u8 {
        let mut buf = [0u8; 4];
        self.delimiter.encode_utf8(&mut buf);
        buf[0]
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        RegistryError::Config(format!("{}{} has an invalid value '{}'", ENV_PREFIX, name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RegistryConfig::default();
        config.validate().unwrap();
        assert_eq!(config.delimiter_byte(), b'|');
        assert_eq!(config.query_batch_limit, 900);
    }

    #[test]
    fn test_rejects_batch_limit_above_parameter_ceiling() {
        let config = RegistryConfig {
            query_batch_limit: 1000,
            ..RegistryConfig::default()
        };
        assert!(matches!(config.validate(), Err(RegistryError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_encoding() {
        let config = RegistryConfig {
            source_encoding: "klingon".to_string(),
            ..RegistryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("CHUNK_SIZE", "250"), ("HAS_HEADER", "false"), ("TABLE_NAME", "main_table")]
            .into_iter()
            .collect();
        let mut config = RegistryConfig::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.chunk_size, 250);
        assert!(!config.has_header);
        assert_eq!(config.table_name, "main_table");
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = RegistryConfig::default();
        let err = config
            .apply_vars(|name| (name == "CHUNK_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RUC_REGISTRY_CHUNK_SIZE"));
    }

    #[test]
    fn test_json_file_keeps_missing_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "table_name": "main_table", "query_batch_limit": 500 }"#).unwrap();

        let config = RegistryConfig::from_json_file(&path).unwrap();
        assert_eq!(config.table_name, "main_table");
        assert_eq!(config.query_batch_limit, 500);
        assert_eq!(config.chunk_size, 5000);
    }
}
