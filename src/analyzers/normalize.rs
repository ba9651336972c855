//! Per-source CompScore normalization.
//!
//! Every source ends up on a common 0-10 scale regardless of whether it
//! publishes percentages, ranks or already-processed indices.

use tracing::debug;

use crate::analyzers::types::{RawRow, RawSource, SourceKind};
use crate::config::RankPolicy;
use crate::diagnostics::{Diagnostics, Issue};

pub const MAX_SCORE: f64 = 10.0;

/// Converts one raw row to its CompScore.
///
/// `n_norm` only matters for [`SourceKind::Rank`].
pub fn normalize(row: &RawRow, kind: SourceKind, n_norm: f64) -> Option<f64> {
    let value = row.value?;
    match kind {
        SourceKind::Score => Some(value / 10.0),
        SourceKind::Rank => Some((n_norm - (value - 1.0)) / (n_norm / MAX_SCORE)),
        SourceKind::Processed => Some(value),
        SourceKind::Unrecognized => None,
    }
}

/// Size of the ranked universe used for a rank source.
///
/// Normally the number of rows in the source, blank cells included; pinned
/// sources use the policy's universe no matter how many rows they carry.
pub fn rank_universe(source: &RawSource, policy: &RankPolicy, diagnostics: &mut Diagnostics) -> f64 {
    if policy.pinned.contains(&source.id) {
        return policy.universe as f64;
    }

    let observed = source.rows.len();
    if observed != policy.universe {
        diagnostics.record(Issue::RankUniverseMismatch {
            source: source.id.clone(),
            observed,
            expected: policy.universe,
        });
    }
    observed as f64
}

/// Rescales present scores so the minimum maps to 0 and the maximum to 10.
///
/// Returns `false` when every present score is equal; those are all treated
/// as the best row and set to 10.
pub fn rescale(scores: &mut [Option<f64>]) -> bool {
    let present = scores.iter().flatten().copied();
    let (min, max) = present.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() {
        return true;
    }

    let span = max - min;
    for score in scores.iter_mut().flatten() {
        *score = if span > 0.0 {
            (*score - min) / span * MAX_SCORE
        } else {
            MAX_SCORE
        };
    }
    span > 0.0
}

fn clamp(source: &str, scores: &mut [Option<f64>], diagnostics: &mut Diagnostics) {
    let mut clamped = 0;
    for score in scores.iter_mut().flatten() {
        if !(0.0..=MAX_SCORE).contains(score) {
            *score = score.clamp(0.0, MAX_SCORE);
            clamped += 1;
        }
    }
    if clamped > 0 {
        diagnostics.record(Issue::ScoreOutOfRange {
            source: source.to_string(),
            rows: clamped,
        });
    }
}

/// CompScores for every row of `source`, in row order.
///
/// With `normalize_all` each source is min-max rescaled to span [0, 10];
/// otherwise out-of-range values are clamped and reported.
pub fn comp_scores(
    source: &RawSource,
    policy: &RankPolicy,
    normalize_all: bool,
    diagnostics: &mut Diagnostics,
) -> Vec<Option<f64>> {
    if source.kind == SourceKind::Unrecognized {
        diagnostics.record(Issue::UnrecognizedSchema {
            source: source.id.clone(),
        });
        return vec![None; source.rows.len()];
    }

    let n_norm = if source.kind == SourceKind::Rank {
        rank_universe(source, policy, diagnostics)
    } else {
        0.0
    };

    let mut scores: Vec<Option<f64>> = source
        .rows
        .iter()
        .map(|row| normalize(row, source.kind, n_norm))
        .collect();

    // Rescaled values already span [0, 10].
    if normalize_all {
        if !rescale(&mut scores) {
            diagnostics.record(Issue::DegenerateRange {
                source: source.id.clone(),
            });
        }
    } else {
        clamp(&source.id, &mut scores, diagnostics);
    }

    debug!(
        source = %source.id,
        kind = ?source.kind,
        n_norm,
        rows = scores.len(),
        missing = scores.iter().filter(|s| s.is_none()).count(),
        "CompScore assigned"
    );
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKey;
    use std::collections::BTreeSet;

    fn row(state: &str, value: Option<f64>) -> RawRow {
        RawRow {
            key: EntityKey::state_level(state),
            value,
        }
    }

    fn source(id: &str, kind: SourceKind, values: &[Option<f64>]) -> RawSource {
        RawSource {
            id: id.to_string(),
            kind,
            rows: values
                .iter()
                .enumerate()
                .map(|(i, v)| row(&format!("S{i}"), *v))
                .collect(),
        }
    }

    fn policy(pinned: &[&str]) -> RankPolicy {
        RankPolicy {
            universe: 50,
            pinned: pinned.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn test_score_is_divided_by_ten() {
        assert_eq!(normalize(&row("CA", Some(80.0)), SourceKind::Score, 0.0), Some(8.0));
    }

    #[test]
    fn test_rank_formula() {
        assert_eq!(normalize(&row("CA", Some(1.0)), SourceKind::Rank, 50.0), Some(10.0));
        assert_eq!(normalize(&row("CA", Some(50.0)), SourceKind::Rank, 50.0), Some(0.2));
        assert_eq!(normalize(&row("CA", Some(26.0)), SourceKind::Rank, 50.0), Some(5.0));
    }

    #[test]
    fn test_processed_passes_through() {
        assert_eq!(normalize(&row("CA", Some(6.25)), SourceKind::Processed, 0.0), Some(6.25));
    }

    #[test]
    fn test_missing_cell_is_missing() {
        assert_eq!(normalize(&row("CA", None), SourceKind::Score, 0.0), None);
    }

    #[test]
    fn test_unrecognized_source_is_flagged_not_fatal() {
        let src = source("odd", SourceKind::Unrecognized, &[Some(1.0), Some(2.0)]);
        let mut diagnostics = Diagnostics::new();

        let scores = comp_scores(&src, &policy(&[]), true, &mut diagnostics);

        assert_eq!(scores, vec![None, None]);
        assert_eq!(
            diagnostics.issues(),
            &[Issue::UnrecognizedSchema {
                source: "odd".to_string()
            }]
        );
    }

    #[test]
    fn test_rank_universe_counts_rows_and_warns() {
        let src = source("r", SourceKind::Rank, &[Some(1.0), Some(2.0), Some(4.0), None]);
        let mut diagnostics = Diagnostics::new();

        let n = rank_universe(&src, &policy(&[]), &mut diagnostics);

        assert_eq!(n, 4.0);
        assert!(matches!(
            diagnostics.issues()[0],
            Issue::RankUniverseMismatch {
                observed: 4,
                expected: 50,
                ..
            }
        ));
    }

    #[test]
    fn test_pinned_rank_universe_stays_fifty() {
        let src = source("incomplete", SourceKind::Rank, &[Some(1.0), Some(2.0)]);
        let mut diagnostics = Diagnostics::new();

        let scores = comp_scores(&src, &policy(&["incomplete"]), false, &mut diagnostics);

        assert_eq!(scores, vec![Some(10.0), Some(9.8)]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_rescale_spans_full_range() {
        let src = source(
            "s",
            SourceKind::Score,
            &[Some(40.0), Some(70.0), None, Some(55.0)],
        );
        let mut diagnostics = Diagnostics::new();

        let scores = comp_scores(&src, &policy(&[]), true, &mut diagnostics);

        assert_eq!(scores, vec![Some(0.0), Some(10.0), None, Some(5.0)]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_rescale_degenerate_range_maps_to_ten() {
        let mut scores = vec![Some(3.0), None, Some(3.0)];
        assert!(!rescale(&mut scores));
        assert_eq!(scores, vec![Some(10.0), None, Some(10.0)]);
    }

    #[test]
    fn test_rescale_all_missing_is_noop() {
        let mut scores: Vec<Option<f64>> = vec![None, None];
        assert!(rescale(&mut scores));
        assert_eq!(scores, vec![None, None]);
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let src = source("s", SourceKind::Score, &[Some(120.0), Some(-5.0), Some(50.0)]);
        let mut diagnostics = Diagnostics::new();

        let scores = comp_scores(&src, &policy(&[]), false, &mut diagnostics);

        assert_eq!(scores, vec![Some(10.0), Some(0.0), Some(5.0)]);
        assert!(matches!(
            diagnostics.issues()[0],
            Issue::ScoreOutOfRange { rows: 2, .. }
        ));
    }

    #[test]
    fn test_rescale_keeps_gapped_ranks_apart() {
        let src = source("gaps", SourceKind::Rank, &[Some(1.0), Some(5.0), Some(6.0)]);
        let mut diagnostics = Diagnostics::new();

        let scores: Vec<f64> = comp_scores(&src, &policy(&[]), true, &mut diagnostics)
            .into_iter()
            .map(|s| s.unwrap())
            .collect();

        assert!((scores[0] - 10.0).abs() < 1e-9);
        assert!((scores[1] - 2.0).abs() < 1e-9);
        assert!(scores[2].abs() < 1e-9);
        assert!(
            !diagnostics
                .issues()
                .iter()
                .any(|i| matches!(i, Issue::ScoreOutOfRange { .. }))
        );
    }

    #[test]
    fn test_rescale_runs_on_unclamped_scores() {
        let src = source("s", SourceKind::Score, &[Some(150.0), Some(120.0), Some(50.0)]);
        let mut diagnostics = Diagnostics::new();

        let scores = comp_scores(&src, &policy(&[]), true, &mut diagnostics);

        assert_eq!(scores[0], Some(10.0));
        assert!((scores[1].unwrap() - 7.0).abs() < 1e-9);
        assert_eq!(scores[2], Some(0.0));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_scores_stay_in_range() {
        let src = source(
            "r",
            SourceKind::Rank,
            &(1..=50).map(|r| Some(r as f64)).collect::<Vec<_>>(),
        );
        let mut diagnostics = Diagnostics::new();

        let scores = comp_scores(&src, &policy(&[]), false, &mut diagnostics);

        assert!(
            scores
                .iter()
                .flatten()
                .all(|s| (0.0..=MAX_SCORE).contains(s))
        );
        assert_eq!(scores[0], Some(10.0));
        assert!(diagnostics.is_empty());
    }
}
