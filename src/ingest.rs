//! Catalog ingestion.
//!
//! Reads raw catalog rows from JSON Lines or a headed CSV export and turns
//! them into [`ItemRecord`]s: placeholder tokens become missing values,
//! `date_added` becomes a listing year, and `duration` is split into a
//! magnitude and a unit. Both formats go through [`normalize_row`].

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::pipeline::types::{DurationUnit, ItemRecord};
use crate::util::error::PipelineError;

/// Keys every raw row must carry. Values may be null.
pub const REQUIRED_KEYS: [&str; 7] = [
    "show_id",
    "title",
    "duration",
    "release_year",
    "date_added",
    "listed_in",
    "description",
];

const PLACEHOLDERS: [&str; 7] = [
    "no data",
    "n/a",
    "na",
    "unknown",
    "none",
    "-",
    "not specified",
];

const MAX_DELAY_YEARS: f64 = 50.0;

static FIRST_INTEGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("compile integer regex"));
static FIRST_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]+").expect("compile word regex"));

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read catalog at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read catalog line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON on catalog line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed CSV on catalog line {line}: {source}")]
    Csv {
        line: usize,
        #[source]
        source: csv::Error,
    },
    #[error("catalog line {line} is not a JSON object")]
    NotAnObject { line: usize },
    #[error("catalog line {line}: {source}")]
    Schema {
        line: usize,
        #[source]
        source: PipelineError,
    },
}

/// On-disk layout of a raw catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CatalogFormat {
    /// One JSON object per line.
    Jsonl,
    /// Comma-separated values with a header row.
    Csv,
}

impl CatalogFormat {
    /// `.csv` files are CSV; anything else is read as JSON Lines.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Jsonl,
        }
    }
}

/// Load a catalog from `path`, picking the format from its extension.
///
/// # Errors
/// Returns [`IngestError`] when the file cannot be read, a row is malformed,
/// or a required key is absent.
pub fn load_catalog(path: &Path) -> Result<Vec<ItemRecord>, IngestError> {
    load_catalog_as(path, CatalogFormat::from_path(path))
}

/// Load a catalog from `path` in an explicit `format`.
///
/// # Errors
/// See [`load_catalog`].
pub fn load_catalog_as(
    path: &Path,
    format: CatalogFormat,
) -> Result<Vec<ItemRecord>, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let items = match format {
        CatalogFormat::Jsonl => parse_catalog(BufReader::new(file))?,
        CatalogFormat::Csv => parse_csv_catalog(file)?,
    };
    info!(path = %path.display(), ?format, items = items.len(), "catalog loaded");
    Ok(items)
}

/// Parse JSON Lines from any reader. Blank lines are skipped.
///
/// # Errors
/// See [`load_catalog`].
pub fn parse_catalog<R: BufRead>(reader: R) -> Result<Vec<ItemRecord>, IngestError> {
    let mut items = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|source| IngestError::Read {
            line: line_no,
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|source| IngestError::Parse {
            line: line_no,
            source,
        })?;
        let Value::Object(row) = value else {
            return Err(IngestError::NotAnObject { line: line_no });
        };
        let item = normalize_row(&row).map_err(|source| IngestError::Schema {
            line: line_no,
            source,
        })?;
        items.push(item);
    }
    Ok(items)
}

/// Parse a CSV export whose header row names the raw columns. Empty cells
/// are missing values; extra columns are ignored.
///
/// # Errors
/// See [`load_catalog`].
pub fn parse_csv_catalog<R: Read>(reader: R) -> Result<Vec<ItemRecord>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|source| csv_error(1, source))?
        .clone();

    let mut items = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|source| csv_error(index + 2, source))?;
        let line = record
            .position()
            .map_or(index + 2, |position| position.line() as usize);
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(key, cell)| (key.trim().to_string(), csv_cell(cell)))
            .collect();
        let item = normalize_row(&row).map_err(|source| IngestError::Schema { line, source })?;
        items.push(item);
    }
    Ok(items)
}

fn csv_cell(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else {
        Value::String(cell.to_string())
    }
}

fn csv_error(fallback_line: usize, source: csv::Error) -> IngestError {
    let line = source
        .position()
        .map_or(fallback_line, |position| position.line() as usize);
    IngestError::Csv { line, source }
}

/// Convert one raw row into an [`ItemRecord`].
///
/// # Errors
/// Returns [`PipelineError::Schema`] naming the first missing required key.
pub fn normalize_row(row: &Map<String, Value>) -> Result<ItemRecord, PipelineError> {
    if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !row.contains_key(**key)) {
        return Err(PipelineError::schema(*missing, "required key is absent"));
    }

    let id = text_field(row, "show_id").unwrap_or_default();
    let title = text_field(row, "title").unwrap_or_default();
    let description = text_field(row, "description").unwrap_or_default();
    let (duration_value, duration_unit) = parse_duration(text_field(row, "duration").as_deref());
    let release_year = numeric_field(row, "release_year");
    let listing_year = text_field(row, "date_added")
        .as_deref()
        .and_then(parse_listing_year);
    let genre_count = Some(count_genres(text_field(row, "listed_in").as_deref()));
    let delay_years = delay_years(listing_year, release_year);

    if delay_years.is_none() && listing_year.is_some() && release_year.is_some() {
        debug!(id = %id, ?listing_year, ?release_year, "delay outside [0, 50] dropped");
    }

    Ok(ItemRecord {
        id,
        title,
        description,
        duration_value,
        duration_unit,
        release_year,
        genre_count,
        delay_years,
    })
}

/// Check if a raw cell is one of the placeholder tokens.
#[must_use]
pub fn is_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || PLACEHOLDERS
            .iter()
            .any(|placeholder| trimmed.eq_ignore_ascii_case(placeholder))
}

/// First integer and first alphabetic word of a raw duration (`"90 min"`,
/// `"2 Seasons"`).
#[must_use]
pub fn parse_duration(raw: Option<&str>) -> (Option<f64>, DurationUnit) {
    let Some(raw) = raw else {
        return (None, DurationUnit::Unknown);
    };
    let value = FIRST_INTEGER_RE
        .find(raw)
        .and_then(|m| m.as_str().parse::<f64>().ok());
    let unit = FIRST_WORD_RE
        .find(raw)
        .map_or(DurationUnit::Unknown, |m| DurationUnit::from_token(m.as_str()));
    (value, unit)
}

/// Year of a `date_added` value (`"September 25, 2021"` or `"2021-09-25"`).
#[must_use]
pub fn parse_listing_year(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    ["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .map(|date| f64::from(date.year()))
}

/// Number of comma-separated genres. A missing value is one unknown genre.
#[must_use]
pub fn count_genres(raw: Option<&str>) -> f64 {
    raw.map_or(1, |listed| listed.split(',').count()) as f64
}

/// Listing year minus release year, kept only inside [0, 50].
#[must_use]
pub fn delay_years(listing_year: Option<f64>, release_year: Option<f64>) -> Option<f64> {
    let delay = listing_year? - release_year?;
    (0.0..=MAX_DELAY_YEARS).contains(&delay).then_some(delay)
}

fn text_field(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !is_placeholder(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric_field(row: &Map<String, Value>, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !is_placeholder(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
