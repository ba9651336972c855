//! Output formatting and persistence for the final ranking.
//!
//! Supports the flat CSV table, ad-hoc lookups for printing, and a JSON run
//! summary.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analyzers::types::{FinalRanking, FinalRow};
use crate::config::{RunOptions, SourceCatalog, WeightingStrategy};
use crate::diagnostics::{Diagnostics, Issue};
use crate::pipeline::{PipelineConfig, RunReport};

/// `<prefix>_<strategy>[_normalized].csv`
pub fn output_file_name(options: &RunOptions) -> String {
    let mut name = format!("{}_{}", options.filename_prefix, options.strategy.label());
    if options.normalize_all {
        name.push_str("_normalized");
    }
    name.push_str(".csv");
    name
}

pub fn output_path(dir: &Path, options: &RunOptions) -> PathBuf {
    dir.join(output_file_name(options))
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Header row: `State, City, M, n`, then `M_<group>, n_<group>` per group.
pub fn header(ranking: &FinalRanking) -> Vec<String> {
    let mut header = vec![
        "State".to_string(),
        "City".to_string(),
        "M".to_string(),
        "n".to_string(),
    ];
    for group in &ranking.groups {
        header.push(format!("M_{group}"));
        header.push(format!("n_{group}"));
    }
    header
}

fn record(ranking: &FinalRanking, row: &FinalRow) -> Vec<String> {
    let mut record = vec![
        row.key.state.clone(),
        row.key.city.clone(),
        cell(row.m),
        row.n.to_string(),
    ];
    for group in &ranking.groups {
        let score = row.groups.get(group).copied().unwrap_or_default();
        record.push(cell(score.m));
        record.push(score.n.to_string());
    }
    record
}

/// Writes the whole ranking as CSV, replacing any existing file.
///
/// Missing composites are written as empty cells.
pub fn write_rankings(ranking: &FinalRanking, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

    writer.write_record(header(ranking))?;
    for row in &ranking.rows {
        writer.write_record(record(ranking, row))?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = ranking.rows.len(), "Rankings written");
    Ok(())
}

fn find_target<'r>(
    ranking: &'r FinalRanking,
    target: &str,
    catalog: &SourceCatalog,
) -> Option<&'r FinalRow> {
    let target = target.trim();
    if let Some((city, state)) = target.rsplit_once(',') {
        let state = crate::entity::canonical_state(state, catalog);
        let city = city.trim();
        return ranking
            .rows
            .iter()
            .find(|row| row.key.state == state && row.key.city.eq_ignore_ascii_case(city));
    }

    // A bare name is a city first; "New York" is the city, not the state.
    let city = ranking
        .rows
        .iter()
        .find(|row| !row.key.is_state_level() && row.key.city.eq_ignore_ascii_case(target));
    city.or_else(|| {
        let state = crate::entity::canonical_state(target, catalog);
        ranking
            .rows
            .iter()
            .find(|row| row.key.is_state_level() && row.key.state == state)
    })
}

/// Finds the rows named by `targets`, in target order.
///
/// A target is `City, ST`, a city name (first match wins), or failing that a
/// state name or abbreviation. Targets that match nothing are recorded and
/// skipped.
pub fn lookup<'r>(
    ranking: &'r FinalRanking,
    targets: &[String],
    catalog: &SourceCatalog,
    diagnostics: &mut Diagnostics,
) -> Vec<&'r FinalRow> {
    let mut found = Vec::new();
    for target in targets {
        match find_target(ranking, target, catalog) {
            Some(row) => found.push(row),
            None => diagnostics.record(Issue::UnresolvedLookup {
                name: target.clone(),
            }),
        }
    }
    found
}

/// Transposed text table: one line per field, one column per row.
pub fn render_lookup(ranking: &FinalRanking, rows: &[&FinalRow]) -> String {
    let mut fields: Vec<(String, Vec<String>)> = vec![
        ("State".to_string(), rows.iter().map(|r| r.key.state.clone()).collect()),
        ("City".to_string(), rows.iter().map(|r| r.key.city.clone()).collect()),
        ("M".to_string(), rows.iter().map(|r| fmt_score(r.m)).collect()),
    ];
    for group in &ranking.groups {
        fields.push((
            format!("M_{group}"),
            rows.iter()
                .map(|r| fmt_score(r.groups.get(group).and_then(|g| g.m)))
                .collect(),
        ));
    }

    let label_width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    let col_width = fields
        .iter()
        .flat_map(|(_, values)| values.iter().map(String::len))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for (label, values) in fields {
        out.push_str(&format!("{label:<label_width$}"));
        for value in values {
            out.push_str(&format!("  {value:>col_width$}"));
        }
        out.push('\n');
    }
    out
}

fn fmt_score(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.3}"))
        .unwrap_or_else(|| "NaN".to_string())
}

/// Logs every entity's `M` and `n`, cities first (descending city name).
pub fn log_ranking(ranking: &FinalRanking) {
    let mut rows: Vec<&FinalRow> = ranking.rows.iter().collect();
    rows.sort_by(|a, b| b.key.city.cmp(&a.key.city).then(a.key.state.cmp(&b.key.state)));
    for row in rows {
        debug!(entity = %row.key, m = ?row.m, n = row.n, "Ranking");
    }
}

/// JSON summary of a run.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub strategy: WeightingStrategy,
    pub normalize_all: bool,
    pub loaded: Vec<&'a str>,
    /// Group name -> active members.
    pub groups: BTreeMap<&'a str, &'a [String]>,
    pub entities: usize,
    pub issues: &'a [Issue],
}

impl<'a> RunSummary<'a> {
    pub fn new(config: &PipelineConfig, report: &'a RunReport) -> Self {
        Self {
            strategy: config.options.strategy,
            normalize_all: config.options.normalize_all,
            loaded: report.loaded(),
            groups: report
                .groups
                .iter()
                .map(|g| (g.group.as_str(), g.members.as_slice()))
                .collect(),
            entities: report.entities.len(),
            issues: report.diagnostics.issues(),
        }
    }
}

/// Writes the run summary as pretty-printed JSON.
pub fn write_summary(summary: &RunSummary<'_>, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Run summary written");
    Ok(())
}
