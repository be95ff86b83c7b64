//! Build Orchestrator - Sanitize then load, as one operation
//!
//! The sanitized intermediate lives in a scratch file next to the
//! destination and is removed however the build ends.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::ingestion::{BulkLoader, LineSanitizer, LoadSummary, SanitizeReport};
use crate::progress::ProgressSink;
use crate::store::{sweep_stale_scratch, SCRATCH_PREFIX, SCRATCH_SUFFIX};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Outcome of a full build
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildReport {
    /// Identifier of this build, also recorded in the store metadata
    pub run_id: String,

    pub sanitize: SanitizeReport,

    pub load: LoadSummary,

    /// Wall-clock duration in seconds
    pub elapsed_secs: f64,
}

pub struct BuildOrchestrator {
    config: RegistryConfig,
}

impl BuildOrchestrator {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Turn the raw extract at `raw` into a store at `dest`.
    ///
    /// Progress runs through `Sanitizing`, `Loading` and `Indexing`. On
    /// failure `dest` keeps whatever it held before.
    pub fn build(&self, raw: &Path, dest: &Path, progress: &mut dyn ProgressSink) -> Result<BuildReport> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        info!("Starting registry build {} from {}", run_id, raw.display());

        let source = File::open(raw)
            .map_err(|e| RegistryError::Build(format!("Failed to open raw extract {}: {}", raw.display(), e)))?;
        let total_bytes = source.metadata().ok().map(|m| m.len());

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        sweep_stale_scratch(dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(SCRATCH_SUFFIX)
            .tempfile_in(dir)?;

        let sanitizer = LineSanitizer::from_config(&self.config)?;
        let sanitize = {
            let writer = BufWriter::new(scratch.as_file());
            sanitizer.sanitize_with_progress(BufReader::new(source), writer, total_bytes, progress)?
        };
        info!(
            "Sanitized {} lines ({} dropped)",
            sanitize.lines_read,
            sanitize.dropped_lines.len()
        );

        let expected = if self.config.has_header {
            sanitize.lines_written.saturating_sub(1)
        } else {
            sanitize.lines_written
        };
        let clean = BufReader::new(File::open(scratch.path())?);
        let load = BulkLoader::from_config(&self.config)?
            .with_run_id(run_id.clone())
            .load(clean, dest, Some(expected), progress)?;

        let elapsed_secs = started.elapsed().as_secs_f64();
        info!("Registry build {} finished in {:.1}s", run_id, elapsed_secs);

        Ok(BuildReport {
            run_id,
            sanitize,
            load,
            elapsed_secs,
        })
    }
}

/// Build with a one-off orchestrator
pub fn build_registry(
    raw: &Path,
    dest: &Path,
    config: &RegistryConfig,
    progress: &mut dyn ProgressSink,
) -> Result<BuildReport> {
    BuildOrchestrator::new(config.clone())?.build(raw, dest, progress)
}
