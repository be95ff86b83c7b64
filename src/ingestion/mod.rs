//! Ingestion - raw extract to queryable store

pub mod bulk_loader;
pub mod orchestrator;
pub mod sanitizer;

pub use bulk_loader::{count_lines, normalize_column_name, BulkLoader, LoadSummary};
pub use orchestrator::{build_registry, BuildOrchestrator, BuildReport};
pub use sanitizer::{LineSanitizer, SanitizeReport, SourceEncoding};
