//! Warn-and-continue issue ledger for a pipeline run.
//!
//! Nothing in the normalize/weight/aggregate path is fatal. Every recoverable
//! condition is logged once at `warn` and kept here so callers (and tests)
//! can inspect what happened during the run.

use serde::Serialize;
use std::fmt;
use tracing::warn;

/// A recoverable problem found while loading or scoring sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// The per-source CSV file does not exist; the source is excluded.
    MissingSourceFile { source: String, path: String },
    /// The file exists but could not be read as a source table.
    SourceLoadFailed { source: String, error: String },
    /// No `Score`, `Rank` or `Processed` column.
    UnrecognizedSchema { source: String },
    /// Ranked row count differs from the expected rank universe.
    RankUniverseMismatch {
        source: String,
        observed: usize,
        expected: usize,
    },
    /// Normalized scores fell outside [0, 10] and were clamped.
    ScoreOutOfRange { source: String, rows: usize },
    /// Min-max rescale over a source whose scores are all equal.
    DegenerateRange { source: String },
    /// Same (State, City) key seen twice in one source; first row kept.
    DuplicateEntity { source: String, entity: String },
    /// Source belongs to zero or several groups; `W` falls back to 1.
    AmbiguousGroup { source: String, groups: usize },
    /// A print target matched no entity.
    UnresolvedLookup { name: String },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::MissingSourceFile { source, path } => {
                write!(f, "processed data for {source} not found at {path}, skipping")
            }
            Issue::SourceLoadFailed { source, error } => {
                write!(f, "failed to load {source}: {error}")
            }
            Issue::UnrecognizedSchema { source } => {
                write!(f, "unclear interpretation of CompScore for {source}")
            }
            Issue::RankUniverseMismatch {
                source,
                observed,
                expected,
            } => write!(
                f,
                "nNorm for {source} was {observed}, expected {expected}"
            ),
            Issue::ScoreOutOfRange { source, rows } => {
                write!(f, "{rows} CompScore value(s) for {source} clamped to [0, 10]")
            }
            Issue::DegenerateRange { source } => {
                write!(f, "all CompScore values for {source} are equal, rescaled to 10")
            }
            Issue::DuplicateEntity { source, entity } => {
                write!(f, "duplicate row for {entity} in {source}, keeping the first")
            }
            Issue::AmbiguousGroup { source, groups } => write!(
                f,
                "repetition weight for {source} is undefined ({groups} groups), setting to 1"
            ),
            Issue::UnresolvedLookup { name } => write!(f, "{name} was not found in the data"),
        }
    }
}

/// Issues collected over one run, in the order they were raised.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    issues: Vec<Issue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs the issue and appends it to the ledger.
    pub fn record(&mut self, issue: Issue) {
        warn!(%issue, "Recoverable issue");
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_order() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.record(Issue::UnrecognizedSchema {
            source: "a".to_string(),
        });
        diagnostics.record(Issue::UnresolvedLookup {
            name: "Springfield".to_string(),
        });

        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(
            diagnostics.issues()[0],
            Issue::UnrecognizedSchema { .. }
        ));
        assert!(matches!(
            diagnostics.issues()[1],
            Issue::UnresolvedLookup { .. }
        ));
    }

    #[test]
    fn test_issue_serializes_with_kind_tag() {
        let issue = Issue::AmbiguousGroup {
            source: "hrc".to_string(),
            groups: 2,
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "ambiguous_group");
        assert_eq!(json["groups"], 2);
    }

    #[test]
    fn test_display_names_the_source() {
        let issue = Issue::RankUniverseMismatch {
            source: "usnews".to_string(),
            observed: 49,
            expected: 50,
        };
        assert_eq!(issue.to_string(), "nNorm for usnews was 49, expected 50");
    }
}
