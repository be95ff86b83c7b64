//! Lookup - raw identifier lists resolved against a built store

pub mod resolver;
pub mod table_io;

pub use resolver::{
    resolve, LookupEngine, LookupOutcome, LookupResult, ResolveStats, ResultRow, ABSENT, STATUS_INVALID,
    STATUS_NOT_FOUND,
};
pub use table_io::{default_output_path, read_identifier_column, write_results, RESULT_COLUMNS};
