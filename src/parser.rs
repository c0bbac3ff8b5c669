// 🏗️ Parser Framework - statement formats
//
// Every bank format turns raw statement bytes into records. A record only
// needs to answer three questions: what moved, from whom, to whom. The
// reconciliation engine depends on nothing else, so adding a format never
// touches it.

pub mod dkb;

use crate::model::{HolderDescriptor, HolderIdentifier, TransactionBody};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// StatementFormat - which bank dialect a file is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StatementFormat {
    /// Deutsche Kreditbank CSV export
    Dkb,
}

impl StatementFormat {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            StatementFormat::Dkb => "Deutsche Kreditbank",
        }
    }

    /// Short code, also used on the command line and in import runs
    pub fn code(&self) -> &str {
        match self {
            StatementFormat::Dkb => "dkb",
        }
    }
}

impl fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One statement row, seen as a candidate transaction between two holders.
pub trait StatementRecord: Send + Sync {
    fn transaction(&self) -> TransactionBody;
    fn from_holder(&self) -> HolderDescriptor;
    fn to_holder(&self) -> HolderDescriptor;
}

/// Row that was dropped while parsing, kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    /// 1-based line in the source file
    pub line: usize,
    pub reason: String,
}

/// Account summary printed at the top of a statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementHeader {
    pub account: HolderIdentifier,
    pub balance_date: NaiveDate,
    pub balance_in_cents: i64,
}

/// Output of a parser: usable records plus what was skipped.
pub struct ParsedStatement {
    pub source: String,
    pub format: StatementFormat,
    pub header: Option<StatementHeader>,
    pub records: Vec<Box<dyn StatementRecord>>,
    pub skipped: Vec<SkippedRow>,
}

impl fmt::Debug for ParsedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedStatement")
            .field("source", &self.source)
            .field("format", &self.format)
            .field("header", &self.header)
            .field("records", &self.records.len())
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// StatementParser - one implementation per format
pub trait StatementParser: Send + Sync {
    /// Parse a whole statement.
    ///
    /// Malformed rows are skipped and listed in `ParsedStatement::skipped`;
    /// only a malformed file structure (e.g. a broken header) is an error.
    fn parse(&self, bytes: &[u8], source: &str) -> Result<ParsedStatement>;

    fn format(&self) -> StatementFormat;

    /// Parser version, for provenance
    fn version(&self) -> &str {
        "1.0.0"
    }
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Guess the format from a file name.
///
/// DKB names its exports after the account IBAN (`DE12...csv`) or the user
/// renames them to something containing `dkb`.
pub fn detect_format(file_path: &Path) -> Result<StatementFormat> {
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let filename_lower = filename.to_lowercase();

    if filename_lower.contains("dkb") {
        return Ok(StatementFormat::Dkb);
    }

    let stem = filename_lower.split('.').next().unwrap_or("");
    // German IBAN: "DE" plus 20 digits
    if stem.len() >= 22
        && stem.starts_with("de")
        && stem[2..].chars().take(20).all(|c| c.is_ascii_digit())
    {
        return Ok(StatementFormat::Dkb);
    }

    Err(anyhow::anyhow!(
        "Could not detect statement format from filename: {}",
        filename
    ))
}

/// Get the parser for a format
pub fn get_parser(format: StatementFormat) -> Box<dyn StatementParser> {
    match format {
        StatementFormat::Dkb => Box::new(dkb::DkbParser::new()),
    }
}

/// Read and parse a statement file. Without an explicit format the file name
/// decides.
pub fn parse_file(file_path: &Path, format: Option<StatementFormat>) -> Result<ParsedStatement> {
    let format = match format {
        Some(format) => format,
        None => detect_format(file_path)?,
    };

    let bytes = std::fs::read(file_path)
        .with_context(|| format!("Failed to read statement: {}", file_path.display()))?;

    let source = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("statement.csv")
        .to_string();

    get_parser(format)
        .parse(&bytes, &source)
        .with_context(|| format!("Failed to parse {} statement {}", format.name(), source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(StatementFormat::Dkb.name(), "Deutsche Kreditbank");
        assert_eq!(StatementFormat::Dkb.code(), "dkb");
        assert_eq!(StatementFormat::Dkb.to_string(), "dkb");
    }

    #[test]
    fn test_detect_format_by_name() {
        let detected = detect_format(Path::new("exports/dkb_2024_02.csv")).unwrap();
        assert_eq!(detected, StatementFormat::Dkb);
    }

    #[test]
    fn test_detect_format_by_iban_filename() {
        let detected = detect_format(Path::new("DE02120300000000202051.csv")).unwrap();
        assert_eq!(detected, StatementFormat::Dkb);
    }

    #[test]
    fn test_detect_format_unknown() {
        let result = detect_format(Path::new("statement.csv"));
        assert!(result.is_err());
    }

    #[test]
    fn test_detect_format_rejects_short_iban() {
        assert!(detect_format(Path::new("de123456789012345678.csv")).is_err());
        assert!(detect_format(Path::new("DE0212030000000020205.csv")).is_err());
    }

    #[test]
    fn test_get_parser() {
        let parser = get_parser(StatementFormat::Dkb);
        assert_eq!(parser.format(), StatementFormat::Dkb);
        assert_eq!(parser.version(), "1.0.0");
    }
}
