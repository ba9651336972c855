//! CSV reader for per-source tables.
//!
//! Each source lives in `<processed_dir>/<source id>.csv` with a `State`
//! column, an optional `City` column and one measure column.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::analyzers::types::{RawRow, RawSource, SourceKind};
use crate::config::SourceCatalog;
use crate::diagnostics::{Diagnostics, Issue};
use crate::entity::resolve_key;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "City", default)]
    city: Option<String>,
    #[serde(rename = "Score", default, deserialize_with = "csv::invalid_option")]
    score: Option<f64>,
    #[serde(rename = "Rank", default, deserialize_with = "csv::invalid_option")]
    rank: Option<f64>,
    #[serde(rename = "Processed", default, deserialize_with = "csv::invalid_option")]
    processed: Option<f64>,
}

impl CsvRow {
    fn value(&self, kind: SourceKind) -> Option<f64> {
        match kind {
            SourceKind::Score => self.score,
            SourceKind::Rank => self.rank,
            SourceKind::Processed => self.processed,
            SourceKind::Unrecognized => None,
        }
    }
}

/// Picks the measure column from the header row: Score, then Rank, then
/// Processed.
pub fn detect_kind<'h>(headers: impl IntoIterator<Item = &'h str>) -> SourceKind {
    let headers: Vec<&str> = headers.into_iter().map(str::trim).collect();
    if headers.contains(&"Score") {
        SourceKind::Score
    } else if headers.contains(&"Rank") {
        SourceKind::Rank
    } else if headers.contains(&"Processed") {
        SourceKind::Processed
    } else {
        SourceKind::Unrecognized
    }
}

/// Reads one source table, canonicalizing every row's entity key.
///
/// Rows with a blank `State` are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a row cannot be decoded.
pub fn load_source(path: &Path, id: &str, catalog: &SourceCatalog) -> Result<RawSource> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let kind = detect_kind(rdr.headers()?.iter());

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: CsvRow =
            result.with_context(|| format!("malformed row in {}", path.display()))?;
        if record.state.trim().is_empty() {
            debug!(source = id, "Skipping row without State");
            continue;
        }
        rows.push(RawRow {
            key: resolve_key(&record.state, record.city.as_deref(), catalog),
            value: record.value(kind),
        });
    }

    debug!(source = id, ?kind, rows = rows.len(), "Source table read");
    Ok(RawSource {
        id: id.to_string(),
        kind,
        rows,
    })
}

/// Loads every configured source, skipping the ones that are missing or
/// unreadable.
#[tracing::instrument(skip_all, fields(dir = %processed_dir.display()))]
pub fn load_sources(
    catalog: &SourceCatalog,
    processed_dir: &Path,
    diagnostics: &mut Diagnostics,
) -> Vec<RawSource> {
    let mut sources = Vec::new();

    for id in catalog.sources() {
        let path = processed_dir.join(format!("{id}.csv"));
        if !path.exists() {
            diagnostics.record(Issue::MissingSourceFile {
                source: id.to_string(),
                path: path.display().to_string(),
            });
            continue;
        }

        match load_source(&path, id, catalog) {
            Ok(source) => sources.push(source),
            Err(e) => diagnostics.record(Issue::SourceLoadFailed {
                source: id.to_string(),
                error: format!("{e:#}"),
            }),
        }
    }

    info!(
        loaded = sources.len(),
        configured = catalog.ratings.len(),
        "Source tables loaded"
    );
    sources
}
