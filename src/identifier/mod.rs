//! Taxpayer identifiers (RUC)
//!
//! - `checksum`: the modulo-11 check digit
//! - `normalizer`: raw text/number -> canonical 11-digit identifier

pub mod checksum;
pub mod normalizer;

pub use checksum::{checksum, checksum_char};
pub use normalizer::{normalize, CanonicalIdentifier, IdentifierInput, DNI_LEN, RUC_LEN};
