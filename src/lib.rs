//! RUC taxpayer registry
//!
//! Builds an indexed SQLite store from the public taxpayer extract and
//! resolves lists of user-typed identifiers against it.

pub mod config;
pub mod dataset;
pub mod error;
pub mod identifier;
pub mod ingestion;
pub mod lookup;
pub mod progress;
pub mod store;

pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use identifier::{checksum, normalize, CanonicalIdentifier, IdentifierInput};
pub use ingestion::{build_registry, BuildOrchestrator, BuildReport, BulkLoader, LineSanitizer, LoadSummary, SanitizeReport};
pub use lookup::{resolve, LookupEngine, LookupOutcome, LookupResult, ResultRow};
pub use progress::{channel_sink, Phase, Progress, ProgressSink, Silent};
pub use store::{RegistryRow, RegistrySchema, RegistryStore, StoreMetadata};
