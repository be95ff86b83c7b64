//! Bulk Loader - Streams sanitized records into an indexed SQLite store
//!
//! The load runs against a staged file next to the destination:
//! 1. durability relaxed (no syncing, in-memory journal)
//! 2. records appended in chunks, one transaction per chunk
//! 3. unique index built on the identifier column
//! 4. durability restored, metadata committed
//! 5. staged file renamed over the destination
//!
//! Any failure before step 5 deletes the staged file; the previous store at
//! the destination is never touched.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::progress::{Monotonic, Phase, ProgressSink, Silent};
use crate::store::{quote_ident, sweep_stale_staging, RelaxedDurability, StagedStore, StoreMetadata, SENTINEL_IDENTIFIER};
use chrono::Utc;
use csv::{ReaderBuilder, StringRecord, Terminator};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Outcome of a bulk load
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadSummary {
    /// Table the records were appended to
    pub table: String,

    /// Normalized column names, in table order
    pub columns: Vec<String>,

    /// Rows appended, sentinel rows included
    pub rows: u64,

    /// Rows whose identifier was not numeric and was stored as the sentinel
    pub sentinel_rows: u64,

    /// Chunks appended
    pub chunks: u64,
}

/// Column name as stored: trimmed, lowercased, spaces replaced by `_`
pub fn normalize_column_name(name: &str) -> String {
    name.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .replace(' ', "_")
}

/// Normalize a header row; blank names get a positional name and repeats a
/// numeric suffix so every column stays addressable.
fn normalize_header<'h>(names: impl IntoIterator<Item = &'h str>) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for (i, raw) in names.into_iter().enumerate() {
        let mut name = normalize_column_name(raw);
        if name.is_empty() {
            name = format!("column_{}", i + 1);
        }
        if columns.contains(&name) {
            let base = name.clone();
            let mut n = 2;
            while columns.contains(&name) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
        }
        columns.push(name);
    }
    columns
}

/// Count the lines of a file without holding it in memory
pub fn count_lines(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; 1024 * 1024];
    let mut lines = 0u64;
    let mut last = None;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last = Some(buf[n - 1]);
    }
    // Final line without a terminator
    if matches!(last, Some(b) if b != b'\n') {
        lines += 1;
    }
    Ok(lines)
}

pub struct BulkLoader {
    delimiter: u8,
    expected_fields: usize,
    has_header: bool,
    columns: Vec<String>,
    identifier_column: String,
    table_name: String,
    chunk_size: usize,
    run_id: String,
}

impl BulkLoader {
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            delimiter: config.delimiter_byte(),
            expected_fields: config.expected_fields,
            has_header: config.has_header,
            columns: config.columns.clone(),
            identifier_column: normalize_column_name(&config.identifier_column),
            table_name: config.table_name.clone(),
            chunk_size: config.chunk_size,
            run_id: Uuid::new_v4().to_string(),
        })
    }

    /// Record `run_id` in the store metadata instead of a fresh one
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Load a clean file, counting its lines first for progress
    pub fn load_file(&self, clean: &Path, dest: &Path, progress: &mut dyn ProgressSink) -> Result<LoadSummary> {
        let lines = count_lines(clean)?;
        let records = if self.has_header { lines.saturating_sub(1) } else { lines };
        let source = BufReader::new(File::open(clean)?);
        self.load(source, dest, Some(records), progress)
    }

    /// Load without progress reporting
    pub fn load_quiet<R: Read>(&self, source: R, dest: &Path) -> Result<LoadSummary> {
        self.load(source, dest, None, &mut Silent)
    }

    /// Load a clean delimited stream into a new store at `dest`.
    ///
    /// `expected_records` drives the `Loading` fraction; without it the
    /// phase only reports completion.
    pub fn load<R: Read>(
        &self,
        source: R,
        dest: &Path,
        expected_records: Option<u64>,
        progress: &mut dyn ProgressSink,
    ) -> Result<LoadSummary> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        sweep_stale_staging(dir)?;

        let mut staged = StagedStore::create_in(dir)?;
        info!("Loading registry into '{}' (staged at {})", self.table_name, staged.path().display());

        let summary = match self.load_staged(staged.connection(), source, expected_records, progress) {
            Ok(summary) => summary,
            Err(e) => {
                error!("Registry load failed, discarding staged store: {}", e);
                return Err(e);
            }
        };

        staged.finalize(dest)?;
        info!(
            "Loaded {} rows into '{}' ({} chunks, {} sentinel identifiers)",
            summary.rows, summary.table, summary.chunks, summary.sentinel_rows
        );
        Ok(summary)
    }

    fn load_staged<R: Read>(
        &self,
        conn: &mut Connection,
        source: R,
        expected_records: Option<u64>,
        progress: &mut dyn ProgressSink,
    ) -> Result<LoadSummary> {
        let mut guard = RelaxedDurability::enter(conn)?;

        // Records end at '\n' only, as in the sanitizer; a stray '\r' is data
        let mut records = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .terminator(Terminator::Any(b'\n'))
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .from_reader(source)
            .into_records();

        let columns = if self.has_header {
            match records.next() {
                Some(header) => {
                    let header = header.map_err(|e| RegistryError::Build(format!("Failed to read header: {}", e)))?;
                    normalize_header(header.iter())
                }
                None => return Err(RegistryError::Build("Source is empty, expected a header".to_string())),
            }
        } else {
            normalize_header(self.columns.iter().map(String::as_str))
        };

        if columns.len() != self.expected_fields {
            return Err(RegistryError::Schema(format!(
                "Header has {} columns, expected {}",
                columns.len(),
                self.expected_fields
            )));
        }
        let id_index = columns
            .iter()
            .position(|c| *c == self.identifier_column)
            .ok_or_else(|| {
                RegistryError::Schema(format!(
                    "No identifier column '{}' among {}",
                    self.identifier_column,
                    columns.join(", ")
                ))
            })?;

        self.create_table(&guard, &columns, id_index)?;
        let insert_sql = self.insert_sql(&columns);

        let mut summary = LoadSummary {
            table: self.table_name.clone(),
            columns,
            rows: 0,
            sentinel_rows: 0,
            chunks: 0,
        };

        {
            let mut loading = Monotonic::new(progress, Phase::Loading);
            let mut chunk: Vec<StringRecord> = Vec::with_capacity(self.chunk_size);

            for record in records {
                let record = record.map_err(|e| RegistryError::Build(format!("Failed to read record: {}", e)))?;
                if record.len() != self.expected_fields {
                    return Err(RegistryError::Build(format!(
                        "Record {} has {} fields, expected {}",
                        summary.rows + chunk.len() as u64 + 1,
                        record.len(),
                        self.expected_fields
                    )));
                }
                chunk.push(record);

                if chunk.len() == self.chunk_size {
                    self.append_chunk(&mut guard, &insert_sql, &chunk, id_index, &mut summary)?;
                    chunk.clear();
                    if let Some(total) = expected_records.filter(|t| *t > 0) {
                        loading.report(summary.rows as f64 / total as f64);
                    }
                }
            }
            if !chunk.is_empty() {
                self.append_chunk(&mut guard, &insert_sql, &chunk, id_index, &mut summary)?;
            }
            loading.finish();
        }

        {
            let mut indexing = Monotonic::new(progress, Phase::Indexing);
            indexing.report(0.0);
            self.create_index(&guard, &summary.columns[id_index])?;
            indexing.finish();
        }

        guard.restore()?;

        // Committed with full durability, which also syncs the bulk writes
        let metadata = StoreMetadata {
            run_id: self.run_id.clone(),
            built_at: Utc::now(),
            table_name: self.table_name.clone(),
            identifier_column: summary.columns[id_index].clone(),
            row_count: summary.rows,
            sentinel_rows: summary.sentinel_rows,
        };
        metadata.write(conn)?;

        Ok(summary)
    }

    fn create_table(&self, conn: &Connection, columns: &[String], id_index: usize) -> Result<()> {
        let definitions: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let ty = if i == id_index { "INTEGER" } else { "TEXT" };
                format!("{} {}", quote_ident(c), ty)
            })
            .collect();
        let sql = format!("CREATE TABLE {} ({})", quote_ident(&self.table_name), definitions.join(", "));
        debug!("{}", sql);
        conn.execute_batch(&sql)
            .map_err(|e| RegistryError::Build(format!("Failed to create table '{}': {}", self.table_name, e)))
    }

    fn insert_sql(&self, columns: &[String]) -> String {
        let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table_name),
            names.join(", "),
            placeholders.join(", ")
        )
    }

    fn append_chunk(
        &self,
        conn: &mut Connection,
        insert_sql: &str,
        chunk: &[StringRecord],
        id_index: usize,
        summary: &mut LoadSummary,
    ) -> Result<()> {
        let chunk_no = summary.chunks + 1;
        let fail = |e: rusqlite::Error| RegistryError::Build(format!("Failed to append chunk {}: {}", chunk_no, e));

        let tx = conn.transaction().map_err(fail)?;
        {
            let mut stmt = tx.prepare_cached(insert_sql).map_err(fail)?;
            let mut values: Vec<Value> = Vec::with_capacity(self.expected_fields);
            for record in chunk {
                values.clear();
                for (i, field) in record.iter().enumerate() {
                    if i == id_index {
                        let identifier = match field.trim().parse::<i64>() {
                            Ok(n) => n,
                            Err(_) => {
                                summary.sentinel_rows += 1;
                                SENTINEL_IDENTIFIER
                            }
                        };
                        values.push(Value::Integer(identifier));
                    } else {
                        values.push(Value::Text(field.to_string()));
                    }
                }
                stmt.execute(params_from_iter(values.iter())).map_err(fail)?;
            }
        }
        tx.commit().map_err(fail)?;

        summary.rows += chunk.len() as u64;
        summary.chunks = chunk_no;
        debug!("Chunk {} appended ({} rows total)", chunk_no, summary.rows);
        Ok(())
    }

    fn create_index(&self, conn: &Connection, identifier_column: &str) -> Result<()> {
        let index = quote_ident(&format!("idx_{}_{}", self.table_name, identifier_column));
        let id = quote_ident(identifier_column);
        // Sentinel rows are kept but excluded, so they cannot collide
        let sql = format!(
            "CREATE UNIQUE INDEX {} ON {} ({}) WHERE {} <> {}",
            index,
            quote_ident(&self.table_name),
            id,
            id,
            SENTINEL_IDENTIFIER
        );
        info!("Building unique index on '{}'", identifier_column);
        conn.execute_batch(&sql).map_err(|e| {
            RegistryError::Build(format!("Failed to build unique index on '{}': {}", identifier_column, e))
        })
    }
}
