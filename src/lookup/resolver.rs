//! Lookup Engine - Resolves raw identifiers against a registry store
//!
//! Inputs are canonicalized, deduplicated and fetched in bounded `IN (...)`
//! batches. The answer always has one entry per input, in input order.

use crate::config::{RegistryConfig, SQLITE_MAX_PARAMS};
use crate::error::{RegistryError, Result};
use crate::identifier::{normalize, CanonicalIdentifier, IdentifierInput};
use crate::progress::{Monotonic, Phase, ProgressSink, Silent};
use crate::store::{RegistryRow, RegistryStore};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Placeholder for a field with no value
pub const ABSENT: &str = "-";
pub const STATUS_NOT_FOUND: &str = "NOT FOUND";
pub const STATUS_INVALID: &str = "INVALID";

/// Share of the `Resolving` phase spent on batch queries
const FETCH_SHARE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LookupOutcome {
    /// Registry entry for the identifier
    Found(RegistryRow),
    /// Well-formed identifier absent from the registry
    NotFound,
    /// Input that could not be canonicalized
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupResult {
    /// The input as text, untouched
    pub input: String,
    pub identifier: Option<CanonicalIdentifier>,
    pub outcome: LookupOutcome,
}

/// A lookup result flattened for tabular output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "Documento Input")]
    pub input: String,
    #[serde(rename = "RUC Validado")]
    pub identifier: String,
    #[serde(rename = "Razon Social")]
    pub name: String,
    #[serde(rename = "Estado")]
    pub status: String,
    #[serde(rename = "Condicion")]
    pub condition: String,
}

impl LookupResult {
    pub fn is_found(&self) -> bool {
        matches!(self.outcome, LookupOutcome::Found(_))
    }

    pub fn to_row(&self) -> ResultRow {
        let identifier = self
            .identifier
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| ABSENT.to_string());
        let (name, status, condition) = match &self.outcome {
            LookupOutcome::Found(row) => (row.name.clone(), row.status.clone(), row.condition.clone()),
            LookupOutcome::NotFound => (ABSENT.to_string(), STATUS_NOT_FOUND.to_string(), ABSENT.to_string()),
            LookupOutcome::Invalid => (ABSENT.to_string(), STATUS_INVALID.to_string(), ABSENT.to_string()),
        };
        ResultRow {
            input: self.input.clone(),
            identifier,
            name,
            status,
            condition,
        }
    }
}

/// Tally of a resolve call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    pub found: usize,
    pub not_found: usize,
    pub invalid: usize,
}

impl ResolveStats {
    pub fn from_results(results: &[LookupResult]) -> Self {
        results.iter().fold(Self::default(), |mut stats, r| {
            match r.outcome {
                LookupOutcome::Found(_) => stats.found += 1,
                LookupOutcome::NotFound => stats.not_found += 1,
                LookupOutcome::Invalid => stats.invalid += 1,
            }
            stats
        })
    }
}

pub struct LookupEngine<'s> {
    store: &'s RegistryStore,
    batch_limit: usize,
    progress_every: usize,
}

impl<'s> LookupEngine<'s> {
    /// `batch_limit` must be within `1..=999`
    pub fn new(store: &'s RegistryStore, batch_limit: usize) -> Result<Self> {
        if batch_limit == 0 || batch_limit > SQLITE_MAX_PARAMS {
            return Err(RegistryError::Config(format!(
                "query batch limit must be between 1 and {}, got {}",
                SQLITE_MAX_PARAMS, batch_limit
            )));
        }
        Ok(Self {
            store,
            batch_limit,
            progress_every: 50,
        })
    }

    pub fn from_config(store: &'s RegistryStore, config: &RegistryConfig) -> Result<Self> {
        Ok(Self::new(store, config.query_batch_limit)?.with_progress_every(config.progress_every))
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn resolve_quiet<T: IdentifierInput>(&self, inputs: &[T]) -> Result<Vec<LookupResult>> {
        self.resolve(inputs, &mut Silent)
    }

    /// Resolve every input against the store.
    ///
    /// An identifier whose check digit was repaired is looked up in its
    /// canonical form first and, failing that, as written. A `Found` result
    /// may therefore hold a row keyed by the uncorrected value while its
    /// `identifier` still carries the canonical form. Any store error
    /// aborts the call.
    ///
    /// `Resolving` progress covers the batch queries first, then the
    /// alignment of results with inputs.
    pub fn resolve<T: IdentifierInput>(
        &self,
        inputs: &[T],
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<LookupResult>> {
        let canonical: Vec<Option<CanonicalIdentifier>> = inputs.iter().map(normalize).collect();

        let wanted: Vec<i64> = canonical
            .iter()
            .flatten()
            .flat_map(|id| std::iter::once(id.value()).chain(id.repaired_from_value()))
            .unique()
            .collect();

        let mut progress = Monotonic::new(progress, Phase::Resolving);
        let batches = wanted.len().div_ceil(self.batch_limit);

        let mut found: HashMap<i64, RegistryRow> = HashMap::with_capacity(wanted.len());
        for (n, batch) in wanted.chunks(self.batch_limit).enumerate() {
            let rows = self.store.fetch_batch(batch)?;
            debug!("Batch {}: {} identifiers, {} rows", n + 1, batch.len(), rows.len());
            found.extend(rows.into_iter().map(|row| (row.identifier, row)));
            progress.report(FETCH_SHARE * (n + 1) as f64 / batches as f64);
        }

        let total = inputs.len();
        let mut results = Vec::with_capacity(total);

        for (i, (raw, identifier)) in inputs.iter().zip(canonical).enumerate() {
            let outcome = match &identifier {
                None => LookupOutcome::Invalid,
                Some(id) => std::iter::once(id.value())
                    .chain(id.repaired_from_value())
                    .find_map(|value| found.get(&value))
                    .map(|row| LookupOutcome::Found(row.clone()))
                    .unwrap_or(LookupOutcome::NotFound),
            };
            results.push(LookupResult {
                input: raw.as_text().map(|t| t.into_owned()).unwrap_or_default(),
                identifier,
                outcome,
            });

            if (i + 1) % self.progress_every == 0 {
                progress.report(FETCH_SHARE + (1.0 - FETCH_SHARE) * (i + 1) as f64 / total as f64);
            }
        }
        progress.finish();

        let stats = ResolveStats::from_results(&results);
        info!(
            "Resolved {} inputs: {} found, {} not found, {} invalid",
            total, stats.found, stats.not_found, stats.invalid
        );
        Ok(results)
    }
}

/// Resolve with a one-off engine
pub fn resolve<T: IdentifierInput>(
    inputs: &[T],
    store: &RegistryStore,
    query_batch_limit: usize,
) -> Result<Vec<LookupResult>> {
    LookupEngine::new(store, query_batch_limit)?.resolve_quiet(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::BulkLoader;
    use crate::progress::Progress;
    use serde_json::json;
    use tempfile::TempDir;

    const CLEAN: &str = "RUC|NOMBRE|ESTADO|CONDICION\n\
                         20123456789|ACME|ACTIVO|HABIDO\n\
                         10123456781|PEREZ JUAN|ACTIVO|HABIDO\n\
                         10456789019|ROJAS ANA|BAJA DE OFICIO|NO HALLADO\n\
                         XX|SIN RUC|ACTIVO|HABIDO\n";

    fn store(temp_dir: &TempDir) -> RegistryStore {
        let dest = temp_dir.path().join("registry.db");
        BulkLoader::from_config(&RegistryConfig::default())
            .unwrap()
            .load_quiet(CLEAN.as_bytes(), &dest)
            .unwrap();
        RegistryStore::open(&dest, "padron", "ruc").unwrap()
    }

    #[test]
    fn test_resolve_finds_registered_identifier() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let results = resolve(&["20123456789"], &store, 900).unwrap();

        assert_eq!(results.len(), 1);
        match &results[0].outcome {
            LookupOutcome::Found(row) => assert_eq!(row.name, "ACME"),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_identifier_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let results = resolve(&["99000000000"], &store, 900).unwrap();
        assert_eq!(results[0].outcome, LookupOutcome::NotFound);
        assert_eq!(results[0].to_row().status, STATUS_NOT_FOUND);
    }

    #[test]
    fn test_results_align_with_inputs() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let inputs = vec![
            json!("10123456781"),
            json!("abc"),
            json!(45678901),
            json!(null),
            json!("10123456781"),
            json!(" 10123456780 "),
        ];
        let results = LookupEngine::new(&store, 2).unwrap().resolve_quiet(&inputs).unwrap();

        assert_eq!(results.len(), inputs.len());
        assert!(results[0].is_found());
        assert_eq!(results[1].outcome, LookupOutcome::Invalid);
        // DNI promoted to 10456789019
        assert!(results[2].is_found());
        assert_eq!(results[3].outcome, LookupOutcome::Invalid);
        assert_eq!(results[3].input, "");
        assert_eq!(results[4], results[0]);
        // Wrong check digit repaired before lookup
        assert!(results[5].is_found());
        assert_eq!(results[5].to_row().identifier, "10123456781");
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let inputs: Vec<String> = Vec::new();
        assert!(resolve(&inputs, &store, 900).unwrap().is_empty());
    }

    #[test]
    fn test_sentinel_never_matches() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let results = resolve(&["00000000000"], &store, 900).unwrap();
        assert_eq!(results[0].outcome, LookupOutcome::NotFound);
    }

    #[test]
    fn test_batch_limit_is_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        assert!(LookupEngine::new(&store, 0).is_err());
        assert!(LookupEngine::new(&store, 1000).is_err());
        assert!(LookupEngine::new(&store, 999).is_ok());
    }

    #[test]
    fn test_invalid_row_uses_placeholders() {
        let result = LookupResult {
            input: "1234567".to_string(),
            identifier: None,
            outcome: LookupOutcome::Invalid,
        };
        let row = result.to_row();
        assert_eq!(row.identifier, ABSENT);
        assert_eq!(row.status, STATUS_INVALID);
        assert_eq!(row.name, ABSENT);
    }

    #[test]
    fn test_progress_reaches_completion() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let inputs: Vec<String> = (0..120).map(|_| "10123456781".to_string()).collect();
        let mut seen = Vec::new();
        let mut sink = |p: Progress| seen.push(p.fraction);
        LookupEngine::new(&store, 900)
            .unwrap()
            .with_progress_every(50)
            .resolve(&inputs, &mut sink)
            .unwrap();
        // one batch, two alignment steps, completion
        let aligned = |n: f64| FETCH_SHARE + (1.0 - FETCH_SHARE) * n / 120.0;
        assert_eq!(seen, vec![FETCH_SHARE, aligned(50.0), aligned(100.0), 1.0]);
    }

    #[test]
    fn test_progress_advances_per_batch() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let inputs = ["10123456781", "10456789019", "20123456786", "99000000007"];
        let mut seen = Vec::new();
        let mut sink = |p: Progress| seen.push(p.fraction);
        LookupEngine::new(&store, 1)
            .unwrap()
            .with_progress_every(1000)
            .resolve(&inputs, &mut sink)
            .unwrap();

        // four batches before any alignment report
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], FETCH_SHARE / 4.0);
        assert_eq!(seen[3], FETCH_SHARE);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_store_error_aborts_resolve() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let writer = rusqlite::Connection::open(store.path()).unwrap();
        writer.execute_batch("DROP TABLE padron").unwrap();

        let err = resolve(&["20123456786", "x"], &store, 900).unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));
    }
}
