//! Identifier normalization
//!
//! Turns whatever the user typed into a canonical 11-digit RUC:
//! - 11 digits: kept, with the check digit repaired when it is wrong
//! - 8 digits (DNI): promoted to a natural-person RUC with the `10` prefix
//! - anything else: rejected

use super::checksum::{checksum_char, BASE_LEN};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Length of a full RUC
pub const RUC_LEN: usize = 11;

/// Length of a DNI (national identity number)
pub const DNI_LEN: usize = 8;

/// Category prefix for natural persons, prepended to a DNI
pub const NATURAL_PERSON_PREFIX: &str = "10";

/// An 11-digit identifier whose last digit matches its checksum.
///
/// Equality and hashing only look at the digits; `repaired_from` is
/// bookkeeping about how the value was obtained.
#[derive(Debug, Clone, Eq)]
pub struct CanonicalIdentifier {
    digits: String,
    repaired_from: Option<String>,
}

impl CanonicalIdentifier {
    pub fn as_str(&self) -> &str {
        &self.digits
    }

    /// Numeric value, as stored in the registry
    pub fn value(&self) -> i64 {
        // Eleven ASCII digits always fit in an i64
        self.digits
            .bytes()
            .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'))
    }

    /// The 11-digit value as written, when its check digit had to be repaired
    pub fn repaired_from(&self) -> Option<&str> {
        self.repaired_from.as_deref()
    }

    /// Numeric value of the as-written form, when it differs
    pub fn repaired_from_value(&self) -> Option<i64> {
        self.repaired_from.as_ref().and_then(|raw| raw.parse().ok())
    }
}

impl PartialEq for CanonicalIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.digits == other.digits
    }
}

impl Hash for CanonicalIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digits.hash(state);
    }
}

impl PartialEq<&str> for CanonicalIdentifier {
    fn eq(&self, other: &&str) -> bool {
        self.digits == *other
    }
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits)
    }
}

impl Serialize for CanonicalIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.digits)
    }
}

/// Anything a raw identifier can arrive as.
///
/// `None` from `as_text` means the value is absent (a null cell, a missing
/// key), which normalizes to invalid.
pub trait IdentifierInput {
    fn as_text(&self) -> Option<Cow<'_, str>>;
}

impl IdentifierInput for str {
    fn as_text(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self))
    }
}

impl IdentifierInput for String {
    fn as_text(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.as_str()))
    }
}

impl<T: IdentifierInput + ?Sized> IdentifierInput for &T {
    fn as_text(&self) -> Option<Cow<'_, str>> {
        (**self).as_text()
    }
}

impl<T: IdentifierInput> IdentifierInput for Option<T> {
    fn as_text(&self) -> Option<Cow<'_, str>> {
        self.as_ref().and_then(|inner| inner.as_text())
    }
}

macro_rules! integer_input {
    ($($ty:ty),*) => {
        $(
            impl IdentifierInput for $ty {
                fn as_text(&self) -> Option<Cow<'_, str>> {
                    Some(Cow::Owned(self.to_string()))
                }
            }
        )*
    };
}

integer_input!(u32, u64, i32, i64);

impl IdentifierInput for Value {
    fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(Cow::Owned(u.to_string()))
                } else if let Some(i) = n.as_i64() {
                    Some(Cow::Owned(i.to_string()))
                } else {
                    // Spreadsheet exports often hand integers over as floats
                    match n.as_f64() {
                        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                            Some(Cow::Owned(format!("{:.0}", f)))
                        }
                        _ => Some(Cow::Owned(n.to_string())),
                    }
                }
            }
            other => Some(Cow::Owned(other.to_string())),
        }
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// Normalize a raw identifier into canonical form.
///
/// Total over every input: malformed or absent values yield `None`, never a
/// panic or an error.
pub fn normalize<T: IdentifierInput + ?Sized>(raw: &T) -> Option<CanonicalIdentifier> {
    let text = raw.as_text()?;
    let trimmed = text.trim();

    if !all_digits(trimmed) {
        return None;
    }

    match trimmed.len() {
        RUC_LEN => {
            let (base, written) = trimmed.split_at(BASE_LEN);
            let expected = checksum_char(base);
            if written.starts_with(expected) {
                Some(CanonicalIdentifier {
                    digits: trimmed.to_string(),
                    repaired_from: None,
                })
            } else {
                let mut digits = String::with_capacity(RUC_LEN);
                digits.push_str(base);
                digits.push(expected);
                Some(CanonicalIdentifier {
                    digits,
                    repaired_from: Some(trimmed.to_string()),
                })
            }
        }
        DNI_LEN => {
            let mut digits = String::with_capacity(RUC_LEN);
            digits.push_str(NATURAL_PERSON_PREFIX);
            digits.push_str(trimmed);
            let check = checksum_char(&digits);
            digits.push(check);
            Some(CanonicalIdentifier {
                digits,
                repaired_from: None,
            })
        }
        _ => None,
    }
}
