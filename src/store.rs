//! Registry Store - The SQLite file built from the registry extract
//!
//! Architecture:
//! - `RegistryStore`: read-only handle used by lookups; the column layout is
//!   derived once from the table definition when the store is opened
//! - `StagedStore`: temporary file a build writes into, renamed over the
//!   destination only once the build has fully succeeded
//! - `RelaxedDurability`: guard that turns off syncing for the bulk phase
//!   and restores safe settings when it goes out of scope

use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};

/// Table holding build metadata
pub const META_TABLE: &str = "registry_meta";

/// Identifier value stored when the extract's identifier is not numeric
pub const SENTINEL_IDENTIFIER: i64 = 0;

const STAGING_PREFIX: &str = ".ruc-registry-";
const STAGING_SUFFIX: &str = ".db.partial";

/// Name parts of the sanitized scratch file a build writes before loading
pub const SCRATCH_PREFIX: &str = ".ruc-sanitized-";
pub const SCRATCH_SUFFIX: &str = ".txt";

/// Quote an SQL identifier (table or column name)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// One registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRow {
    pub identifier: i64,
    pub name: String,
    pub status: String,
    pub condition: String,
}

/// Column layout of the registry table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySchema {
    pub table: String,
    pub identifier_column: String,
    /// Name, status and condition columns, in that order
    pub field_columns: [String; 3],
}

impl RegistrySchema {
    /// Read the layout from the table definition.
    ///
    /// The identifier column is matched case-insensitively; the first three
    /// other columns, in definition order, are name, status and condition.
    pub fn from_table_definition(conn: &Connection, table: &str, identifier_column: &str) -> Result<Self> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        if columns.is_empty() {
            return Err(RegistryError::Schema(format!("Table '{}' not found in store", table)));
        }

        let identifier = columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(identifier_column))
            .cloned()
            .ok_or_else(|| {
                RegistryError::Schema(format!(
                    "Table '{}' has no identifier column '{}' (columns: {})",
                    table,
                    identifier_column,
                    columns.join(", ")
                ))
            })?;

        let fields: Vec<String> = columns
            .iter()
            .filter(|c| **c != identifier)
            .take(3)
            .cloned()
            .collect();
        let field_columns: [String; 3] = fields.try_into().map_err(|fields: Vec<String>| {
            RegistryError::Schema(format!(
                "Table '{}' needs name, status and condition columns besides '{}', found {}",
                table,
                identifier,
                fields.len()
            ))
        })?;

        Ok(Self {
            table: table.to_string(),
            identifier_column: identifier,
            field_columns,
        })
    }

    fn select_batch_sql(&self, batch_len: usize) -> String {
        let id = quote_ident(&self.identifier_column);
        let placeholders = vec!["?"; batch_len].join(", ");
        format!(
            "SELECT {}, {}, {}, {} FROM {} WHERE {} <> {} AND {} IN ({})",
            id,
            quote_ident(&self.field_columns[0]),
            quote_ident(&self.field_columns[1]),
            quote_ident(&self.field_columns[2]),
            quote_ident(&self.table),
            id,
            SENTINEL_IDENTIFIER,
            id,
            placeholders
        )
    }
}

/// Facts recorded at the end of a successful build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub run_id: String,
    pub built_at: DateTime<Utc>,
    pub table_name: String,
    pub identifier_column: String,
    pub row_count: u64,
    pub sentinel_rows: u64,
}

impl StoreMetadata {
    pub(crate) fn write(&self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            META_TABLE
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                META_TABLE
            ))?;
            let entries = [
                ("run_id", self.run_id.clone()),
                ("built_at", self.built_at.to_rfc3339()),
                ("table_name", self.table_name.clone()),
                ("identifier_column", self.identifier_column.clone()),
                ("row_count", self.row_count.to_string()),
                ("sentinel_rows", self.sentinel_rows.to_string()),
            ];
            for (key, value) in entries.iter() {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn read(conn: &Connection) -> Result<Option<Self>> {
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![META_TABLE],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!("SELECT key, value FROM {}", META_TABLE))?;
        let entries = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, String>>>()?;

        let field = |key: &str| {
            entries
                .get(key)
                .cloned()
                .ok_or_else(|| RegistryError::Schema(format!("Store metadata is missing '{}'", key)))
        };
        let number = |key: &str| -> Result<u64> {
            field(key)?
                .parse()
                .map_err(|_| RegistryError::Schema(format!("Store metadata '{}' is not a number", key)))
        };

        let built_at = DateTime::parse_from_rfc3339(&field("built_at")?)
            .map_err(|e| RegistryError::Schema(format!("Store metadata 'built_at' is invalid: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(Self {
            run_id: field("run_id")?,
            built_at,
            table_name: field("table_name")?,
            identifier_column: field("identifier_column")?,
            row_count: number("row_count")?,
            sentinel_rows: number("sentinel_rows")?,
        }))
    }
}

/// Read-only handle on a built registry.
///
/// The connection is released when the handle is dropped, on every exit
/// path of the call that opened it.
pub struct RegistryStore {
    conn: Connection,
    schema: RegistrySchema,
    path: PathBuf,
}

impl RegistryStore {
    pub fn open(path: impl AsRef<Path>, table: &str, identifier_column: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(RegistryError::Store(format!(
                "No registry store at {}; build it first",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RegistryError::Store(format!("Failed to open {}: {}", path.display(), e)))?;

        let schema = RegistrySchema::from_table_definition(&conn, table, identifier_column)?;
        debug!("Opened registry {} ({:?})", path.display(), schema);

        Ok(Self { conn, schema, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &RegistrySchema {
        &self.schema
    }

    /// Fetch the rows whose identifier is one of `identifiers`.
    ///
    /// `identifiers` must not exceed the SQLite host-parameter ceiling.
    pub fn fetch_batch(&self, identifiers: &[i64]) -> Result<Vec<RegistryRow>> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let sql = self.schema.select_batch_sql(identifiers.len());
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| RegistryError::Store(format!("Failed to prepare batch query: {}", e)))?;

        let rows = stmt
            .query_map(params_from_iter(identifiers.iter()), |row| {
                Ok(RegistryRow {
                    identifier: row.get(0)?,
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    status: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    condition: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| RegistryError::Store(format!("Batch query failed: {}", e)))?;

        Ok(rows)
    }

    pub fn row_count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.schema.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Build metadata, absent for stores built by other tools
    pub fn metadata(&self) -> Result<Option<StoreMetadata>> {
        StoreMetadata::read(&self.conn)
    }

    /// Up to `count` distinct usable identifiers picked by probing random
    /// rowids. Probing gives up after a bounded number of attempts, so a
    /// sparse table may yield fewer.
    pub fn sample_identifiers<R: Rng>(&self, count: usize, rng: &mut R) -> Result<Vec<i64>> {
        let table = quote_ident(&self.schema.table);
        let id = quote_ident(&self.schema.identifier_column);

        let max_rowid: Option<i64> =
            self.conn
                .query_row(&format!("SELECT MAX(rowid) FROM {}", table), [], |row| row.get(0))?;
        let usable: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {} <> {}", table, id, SENTINEL_IDENTIFIER),
            [],
            |row| row.get(0),
        )?;

        let max_rowid = match max_rowid {
            Some(max) if max > 0 => max,
            _ => return Ok(Vec::new()),
        };
        let target = count.min(usable.max(0) as usize);
        let max_attempts = target.saturating_mul(50).saturating_add(1000);

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM {} WHERE rowid = ?1", id, table))?;
        let mut seen = HashSet::with_capacity(target);
        let mut sample = Vec::with_capacity(target);
        let mut attempts = 0usize;

        while sample.len() < target && attempts < max_attempts {
            attempts += 1;
            let rowid = rng.gen_range(1..=max_rowid);
            let found: Option<i64> = stmt.query_row(params![rowid], |row| row.get(0)).optional()?;
            if let Some(identifier) = found {
                if identifier != SENTINEL_IDENTIFIER && seen.insert(identifier) {
                    sample.push(identifier);
                }
            }
        }

        if sample.len() < target {
            warn!("Sampled {} of {} identifiers after {} probes", sample.len(), target, attempts);
        }
        Ok(sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Durability {
    Relaxed,
    Safe,
}

fn apply_durability(conn: &Connection, durability: Durability) -> Result<()> {
    let (synchronous, journal_mode) = match durability {
        Durability::Relaxed => ("OFF", "MEMORY"),
        Durability::Safe => ("FULL", "DELETE"),
    };
    conn.pragma_update(None, "synchronous", synchronous)?;
    let applied: String =
        conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))?;
    if !applied.eq_ignore_ascii_case(journal_mode) {
        return Err(RegistryError::Build(format!(
            "journal_mode stayed '{}' instead of '{}'",
            applied, journal_mode
        )));
    }
    debug!("Durability set to {:?}", durability);
    Ok(())
}

/// Relaxed write durability for the lifetime of the guard.
///
/// Safe settings come back through `restore`, or through `Drop` on any path
/// that leaves early.
pub struct RelaxedDurability<'c> {
    conn: &'c mut Connection,
    restored: bool,
}

impl<'c> RelaxedDurability<'c> {
    pub fn enter(conn: &'c mut Connection) -> Result<Self> {
        let guard = Self { conn, restored: false };
        apply_durability(&*guard.conn, Durability::Relaxed)?;
        Ok(guard)
    }

    pub fn restore(mut self) -> Result<()> {
        let result = apply_durability(&*self.conn, Durability::Safe);
        self.restored = result.is_ok();
        result
    }
}

impl Deref for RelaxedDurability<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &*self.conn
    }
}

impl DerefMut for RelaxedDurability<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut *self.conn
    }
}

impl Drop for RelaxedDurability<'_> {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = apply_durability(&*self.conn, Durability::Safe) {
                warn!("Failed to restore durability settings: {}", e);
            }
        }
    }
}

/// A store being built. Dropping it without `finalize` deletes the file.
pub struct StagedStore {
    // Declared first: the connection must close before the file is removed
    conn: Connection,
    staging: TempPath,
}

impl StagedStore {
    /// Create an empty staged store in `dir` (the destination's directory,
    /// so the final rename stays on one filesystem)
    pub fn create_in(dir: &Path) -> Result<Self> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| RegistryError::Build(format!("Failed to create staged store in {}: {}", dir.display(), e)))?
            .into_temp_path();

        let conn = Connection::open(&staging)
            .map_err(|e| RegistryError::Build(format!("Failed to open staged store: {}", e)))?;
        debug!("Staging store at {}", staging.display());

        Ok(Self { conn, staging })
    }

    pub fn path(&self) -> &Path {
        &self.staging
    }

    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Close the staged store and move it over `dest`
    pub fn finalize(self, dest: &Path) -> Result<()> {
        let StagedStore { conn, staging } = self;
        conn.close()
            .map_err(|(_, e)| RegistryError::Build(format!("Failed to close staged store: {}", e)))?;
        staging.persist(dest).map_err(|e| {
            RegistryError::Build(format!("Failed to move store into place at {}: {}", dest.display(), e.error))
        })?;
        info!("Registry store finalized at {}", dest.display());
        Ok(())
    }
}

/// Remove staged stores a crashed build left behind in `dir`
pub fn sweep_stale_staging(dir: &Path) -> Result<usize> {
    let journal_suffix = format!("{}-journal", STAGING_SUFFIX);
    sweep(dir, "staged store", |name| {
        name.starts_with(STAGING_PREFIX) && (name.ends_with(STAGING_SUFFIX) || name.ends_with(&journal_suffix))
    })
}

/// Remove sanitized scratch files a crashed build left behind in `dir`.
///
/// Must run before the current build creates its own scratch file.
pub fn sweep_stale_scratch(dir: &Path) -> Result<usize> {
    sweep(dir, "scratch file", |name| {
        name.starts_with(SCRATCH_PREFIX) && name.ends_with(SCRATCH_SUFFIX)
    })
}

fn sweep(dir: &Path, kind: &str, stale: impl Fn(&str) -> bool) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if stale(&name.to_string_lossy()) && entry.path().is_file() {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    warn!("Removed stale {} {}", kind, entry.path().display());
                    removed += 1;
                }
                Err(e) => warn!("Could not remove stale {} {}: {}", kind, entry.path().display(), e),
            }
        }
    }
    Ok(removed)
}
