//! Line Sanitizer - Repairs a raw delimited extract into a clean UTF-8 stream
//!
//! Every line is cut down to its first `expected_fields` fields. Lines with
//! fewer fields are dropped and their index recorded; nothing short of an
//! I/O or decoding failure stops the stream. Only one line is held in
//! memory at a time.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::progress::{Monotonic, Phase, ProgressSink, Silent};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::{BufRead, Write};
use tracing::{debug, warn};

/// Dropped lines logged individually before switching to debug level
const WARN_LIMIT: usize = 20;

/// Lines between two progress reports
const REPORT_EVERY_LINES: u64 = 100_000;

/// Labels read as ISO-8859-1 proper rather than the windows-1252 superset
/// the WHATWG label table maps them to
const LATIN1_LABELS: [&str; 5] = ["latin1", "latin-1", "iso-8859-1", "iso8859-1", "l1"];

/// Encoding of the raw extract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    /// ISO-8859-1: every byte is the code point of the same value
    Latin1,
    Other(&'static Encoding),
}

impl SourceEncoding {
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if LATIN1_LABELS.iter().any(|l| l.eq_ignore_ascii_case(label)) {
            return Some(Self::Latin1);
        }
        Encoding::for_label(label.as_bytes()).map(Self::Other)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Latin1 => "ISO-8859-1",
            Self::Other(encoding) => encoding.name(),
        }
    }

    /// Whether ASCII bytes always stand for themselves, so lines can be
    /// split on raw `\n` before decoding
    pub fn is_ascii_compatible(&self) -> bool {
        match self {
            Self::Latin1 => true,
            Self::Other(encoding) => encoding.is_ascii_compatible(),
        }
    }

    /// `None` when `raw` is malformed for this encoding
    fn decode<'b>(&self, raw: &'b [u8]) -> Option<Cow<'b, str>> {
        match self {
            Self::Latin1 => Some(encoding_rs::mem::decode_latin1(raw)),
            Self::Other(encoding) => encoding.decode_without_bom_handling_and_without_replacement(raw),
        }
    }
}

impl From<&'static Encoding> for SourceEncoding {
    fn from(encoding: &'static Encoding) -> Self {
        Self::Other(encoding)
    }
}

/// Outcome of a sanitize pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitizeReport {
    /// Lines read from the source
    pub lines_read: u64,

    /// Clean lines written
    pub lines_written: u64,

    /// Zero-based indices of the lines that were dropped
    pub dropped_lines: Vec<u64>,
}

pub struct LineSanitizer {
    delimiter: char,
    expected_fields: usize,
    encoding: SourceEncoding,
}

impl LineSanitizer {
    /// `delimiter` must be ASCII and `expected_fields` at least 1
    pub fn new(delimiter: char, expected_fields: usize, encoding: impl Into<SourceEncoding>) -> Self {
        debug_assert!(delimiter.is_ascii() && expected_fields > 0);
        Self {
            delimiter,
            expected_fields,
            encoding: encoding.into(),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;
        let encoding = SourceEncoding::for_label(&config.source_encoding).ok_or_else(|| {
            RegistryError::Config(format!("unknown source encoding '{}'", config.source_encoding))
        })?;
        Ok(Self::new(config.delimiter, config.expected_fields, encoding))
    }

    pub fn sanitize<R: BufRead, W: Write>(&self, input: R, output: W) -> Result<SanitizeReport> {
        self.sanitize_with_progress(input, output, None, &mut Silent)
    }

    /// Sanitize `input` into `output`, reporting bytes consumed against
    /// `total_bytes` when it is known.
    pub fn sanitize_with_progress<R: BufRead, W: Write>(
        &self,
        mut input: R,
        mut output: W,
        total_bytes: Option<u64>,
        progress: &mut dyn ProgressSink,
    ) -> Result<SanitizeReport> {
        let mut progress = Monotonic::new(progress, Phase::Sanitizing);
        let mut report = SanitizeReport::default();
        let mut bytes_read: u64 = 0;
        let mut buf = Vec::with_capacity(512);

        loop {
            buf.clear();
            let n = input.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;
            let index = report.lines_read;
            report.lines_read += 1;

            let raw = strip_terminator(&buf);
            let line = self
                .encoding
                .decode(raw)
                .ok_or_else(|| RegistryError::Encoding {
                    line: index,
                    encoding: self.encoding.name().to_string(),
                })?;

            match self.clean_prefix(&line) {
                Some(clean) => {
                    output.write_all(clean.as_bytes())?;
                    output.write_all(b"\n")?;
                    report.lines_written += 1;
                }
                None => {
                    if report.dropped_lines.len() < WARN_LIMIT {
                        warn!("Dropping malformed line {}: fewer than {} fields", index, self.expected_fields);
                    } else {
                        debug!("Dropping malformed line {}", index);
                    }
                    report.dropped_lines.push(index);
                }
            }

            if report.lines_read % REPORT_EVERY_LINES == 0 {
                if let Some(total) = total_bytes.filter(|t| *t > 0) {
                    progress.report(bytes_read as f64 / total as f64);
                }
            }
        }

        output.flush()?;
        progress.finish();

        if report.dropped_lines.len() > WARN_LIMIT {
            warn!("{} malformed lines dropped in total", report.dropped_lines.len());
        }
        Ok(report)
    }

    /// The first `expected_fields` fields of `line`, still joined by the
    /// delimiter, or `None` when the line has fewer fields.
    fn clean_prefix<'l>(&self, line: &'l str) -> Option<&'l str> {
        let mut delimiters = 0;
        for (pos, _) in line.match_indices(self.delimiter) {
            delimiters += 1;
            if delimiters == self.expected_fields {
                return Some(&line[..pos]);
            }
        }
        (delimiters + 1 == self.expected_fields).then_some(line)
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
