//! Benchmark datasets drawn from a built store
//!
//! A normal dataset lists sampled identifiers as written. A stress dataset
//! corrupts a fraction of them the way real user spreadsheets tend to be
//! corrupted, then shuffles the lot.

use crate::error::{RegistryError, Result};
use crate::store::RegistryStore;
use csv::Writer;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Column header of generated datasets
pub const DATASET_COLUMN: &str = "Documento";

/// Well-formed identifier that no taxpayer holds
pub const NONEXISTENT_IDENTIFIER: &str = "99000000000";

/// Kind of corruption applied to a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chaos {
    /// Last digit replaced by `X`
    Letter,
    /// Padded with spaces on both sides
    Spaces,
    /// Cut to 5 characters
    Short,
    /// Cut to the 8-character DNI form
    DniFormat,
    /// Replaced by an identifier absent from the registry
    Nonexistent,
}

impl Chaos {
    pub const ALL: [Chaos; 5] = [Chaos::Letter, Chaos::Spaces, Chaos::Short, Chaos::DniFormat, Chaos::Nonexistent];

    pub fn apply(self, identifier: &str) -> String {
        match self {
            Chaos::Letter => {
                let mut chars: Vec<char> = identifier.chars().collect();
                chars.pop();
                chars.push('X');
                chars.into_iter().collect()
            }
            Chaos::Spaces => format!("  {}  ", identifier),
            Chaos::Short => identifier.chars().take(5).collect(),
            Chaos::DniFormat => identifier.chars().take(8).collect(),
            Chaos::Nonexistent => NONEXISTENT_IDENTIFIER.to_string(),
        }
    }
}

/// Sampled identifiers as text
pub fn normal_dataset<R: Rng>(store: &RegistryStore, count: usize, rng: &mut R) -> Result<Vec<String>> {
    let sample = store.sample_identifiers(count, rng)?;
    Ok(sample.into_iter().map(|id| id.to_string()).collect())
}

/// Corrupt `floor(len * ratio)` of `identifiers` with a random `Chaos`,
/// then shuffle
pub fn stress_dataset<R: Rng>(identifiers: Vec<String>, ratio: f64, rng: &mut R) -> Result<Vec<String>> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(RegistryError::Config(format!("error ratio must be within [0, 1], got {}", ratio)));
    }
    let corrupted = (identifiers.len() as f64 * ratio).floor() as usize;

    let mut dataset = identifiers;
    dataset.shuffle(rng);
    for identifier in dataset.iter_mut().take(corrupted) {
        let chaos = Chaos::ALL[rng.gen_range(0..Chaos::ALL.len())];
        *identifier = chaos.apply(identifier);
    }
    dataset.shuffle(rng);

    info!("Injected {} corrupted identifiers", corrupted);
    Ok(dataset)
}

/// Write a single-column `Documento` CSV
pub fn write_dataset_csv(path: &Path, identifiers: &[String]) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record([DATASET_COLUMN])?;
    for identifier in identifiers {
        writer.write_record([identifier])?;
    }
    writer.flush()?;
    info!("Dataset of {} rows saved to {}", identifiers.len(), path.display());
    Ok(())
}

pub fn normal_dataset_path(dir: &Path, count: usize) -> PathBuf {
    dir.join(format!("test_dataset_{}.csv", count))
}

pub fn stress_dataset_path(dir: &Path, count: usize) -> PathBuf {
    dir.join(format!("TEST_STRESS_{}.csv", count))
}
