//! Source-credibility weighting (`PSW = P · S · W`).

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::analyzers::types::Weights;
use crate::config::{CITY_PRIMACY, RunOptions, STATE_PRIMACY, SourceCatalog, WeightingStrategy};
use crate::diagnostics::{Diagnostics, Issue};
use crate::entity::EntityKey;

/// Sensitivity of a city-level row.
pub const S_CITY: f64 = 2.0;
/// Sensitivity of a state-level row.
pub const S_STATE: f64 = 1.0;

/// Everything needed to weight a row, prepared once per run.
#[derive(Debug, Clone)]
pub struct WeightingPolicy<'a> {
    catalog: &'a SourceCatalog,
    strategy: WeightingStrategy,
    set_p_by_city: bool,
    /// Active source id -> repetition weight `W`.
    repetition: BTreeMap<String, f64>,
}

impl<'a> WeightingPolicy<'a> {
    /// `active` is the set of sources that loaded successfully this run.
    pub fn new(
        catalog: &'a SourceCatalog,
        options: &RunOptions,
        active: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let repetition = match options.strategy {
            WeightingStrategy::Legacy => BTreeMap::new(),
            WeightingStrategy::Type => {
                let membership = type_membership(catalog, active);
                repetition_weights(active, &membership, options.repetition_scaling, diagnostics)
            }
            WeightingStrategy::Subtype if options.ignore_subtypes => {
                active.iter().map(|s| (s.clone(), 1.0)).collect()
            }
            WeightingStrategy::Subtype => {
                let membership = subtype_membership(catalog, active);
                repetition_weights(active, &membership, options.repetition_scaling, diagnostics)
            }
        };

        Self {
            catalog,
            strategy: options.strategy,
            set_p_by_city: options.set_p_by_city,
            repetition,
        }
    }

    pub fn strategy(&self) -> WeightingStrategy {
        self.strategy
    }

    /// Repetition weight of `source`; neutral for unknown sources.
    pub fn repetition_weight(&self, source: &str) -> f64 {
        self.repetition.get(source).copied().unwrap_or(1.0)
    }
}

/// Derives the weight factors of one row of `source`.
pub fn weight(key: &EntityKey, source: &str, policy: &WeightingPolicy<'_>) -> Weights {
    let rating = policy.catalog.rating(source);
    let configured_p = rating.first().copied().unwrap_or(1.0);
    let city = !key.is_state_level();

    let (p, s, w) = match policy.strategy {
        WeightingStrategy::Legacy => {
            let p = match (policy.set_p_by_city, city) {
                (true, true) => CITY_PRIMACY,
                (true, false) => STATE_PRIMACY,
                (false, _) => configured_p,
            };
            let s = rating.get(1).copied().unwrap_or(1.0);
            let w = rating.iter().skip(2).product::<f64>();
            (p, s, w)
        }
        WeightingStrategy::Type | WeightingStrategy::Subtype => {
            let s = if city { S_CITY } else { S_STATE };
            (configured_p, s, policy.repetition_weight(source))
        }
    };

    Weights {
        p,
        s,
        w,
        psw: p * s * w,
    }
}

/// Weighted composite of one row, back on a 0-10 scale for `PSW = 10`.
pub fn measure(comp_score: f64, weights: &Weights) -> f64 {
    comp_score * weights.psw / 10.0
}

fn type_membership<'c>(
    catalog: &'c SourceCatalog,
    active: &BTreeSet<String>,
) -> BTreeMap<&'c str, BTreeSet<&'c str>> {
    catalog
        .types
        .iter()
        .map(|(group, members)| {
            let members: BTreeSet<&str> = members
                .iter()
                .filter(|m| active.contains(*m))
                .map(String::as_str)
                .collect();
            (group.as_str(), members)
        })
        .filter(|(_, members)| !members.is_empty())
        .collect()
}

fn subtype_membership<'c>(
    catalog: &'c SourceCatalog,
    active: &BTreeSet<String>,
) -> BTreeMap<&'c str, BTreeSet<&'c str>> {
    let mut membership: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (source, subtype) in &catalog.subtypes {
        if active.contains(source) {
            membership
                .entry(subtype.as_str())
                .or_default()
                .insert(source.as_str());
        }
    }
    membership
}

/// `W = 1 / |group|`, scaled by `active / groups` when enabled. Sources in
/// zero or several groups get `W = 1`.
fn repetition_weights(
    active: &BTreeSet<String>,
    membership: &BTreeMap<&str, BTreeSet<&str>>,
    scaling: bool,
    diagnostics: &mut Diagnostics,
) -> BTreeMap<String, f64> {
    let scale = if scaling && !membership.is_empty() {
        active.len() as f64 / membership.len() as f64
    } else {
        1.0
    };

    active
        .iter()
        .map(|source| {
            let groups: Vec<&BTreeSet<&str>> = membership
                .values()
                .filter(|members| members.contains(source.as_str()))
                .collect();

            let w = match groups.as_slice() {
                [members] => scale / members.len() as f64,
                _ => {
                    diagnostics.record(Issue::AmbiguousGroup {
                        source: source.clone(),
                        groups: groups.len(),
                    });
                    1.0
                }
            };
            debug!(source = %source, w, "Repetition weight");
            (source.clone(), w)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RankPolicy;

    fn catalog() -> SourceCatalog {
        SourceCatalog {
            ratings: BTreeMap::from([
                ("a".to_string(), vec![5.0]),
                ("b".to_string(), vec![5.0]),
                ("c".to_string(), vec![3.0]),
                ("d".to_string(), vec![2.0, 1.5, 0.5]),
            ]),
            types: BTreeMap::from([
                ("legal".to_string(), vec!["a".to_string(), "b".to_string()]),
                (
                    "economic".to_string(),
                    vec!["c".to_string(), "d".to_string(), "gone".to_string()],
                ),
            ]),
            subtypes: BTreeMap::from([
                ("a".to_string(), "poll".to_string()),
                ("b".to_string(), "poll".to_string()),
                ("c".to_string(), "index".to_string()),
            ]),
            rank_policy: RankPolicy::default(),
            ..Default::default()
        }
    }

    fn active(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn options(strategy: WeightingStrategy) -> RunOptions {
        RunOptions {
            strategy,
            ..RunOptions::default()
        }
    }

    #[test]
    fn test_sensitivity_by_granularity() {
        let catalog = catalog();
        let mut diagnostics = Diagnostics::new();
        let policy = WeightingPolicy::new(
            &catalog,
            &options(WeightingStrategy::Type),
            &active(&["a", "b"]),
            &mut diagnostics,
        );

        let state = weight(&EntityKey::state_level("CA"), "a", &policy);
        let city = weight(&EntityKey::new("CA", "Los Angeles"), "a", &policy);

        assert_eq!(state.s, 1.0);
        assert_eq!(city.s, 2.0);
        assert_eq!(state.p, 5.0);
        assert_eq!(city.psw, 2.0 * state.psw);
    }

    #[test]
    fn test_type_repetition_weight_is_scaled() {
        let catalog = catalog();
        let mut diagnostics = Diagnostics::new();
        // 4 active sources over 2 groups: scale 2, each group has 2 members.
        let policy = WeightingPolicy::new(
            &catalog,
            &options(WeightingStrategy::Type),
            &active(&["a", "b", "c", "d"]),
            &mut diagnostics,
        );

        assert_eq!(policy.repetition_weight("a"), 1.0);
        assert_eq!(policy.repetition_weight("c"), 1.0);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_type_repetition_weight_without_scaling() {
        let catalog = catalog();
        let mut diagnostics = Diagnostics::new();
        let opts = RunOptions {
            repetition_scaling: false,
            ..options(WeightingStrategy::Type)
        };
        let policy = WeightingPolicy::new(&catalog, &opts, &active(&["a", "b", "c"]), &mut diagnostics);

        assert_eq!(policy.repetition_weight("a"), 0.5);
        // "d" and "gone" did not load, so c is alone in its group.
        assert_eq!(policy.repetition_weight("c"), 1.0);
    }

    #[test]
    fn test_ambiguous_group_defaults_to_one() {
        let mut catalog = catalog();
        catalog
            .types
            .get_mut("economic")
            .unwrap()
            .push("a".to_string());
        let mut diagnostics = Diagnostics::new();
        let opts = RunOptions {
            repetition_scaling: false,
            ..options(WeightingStrategy::Type)
        };
        let policy = WeightingPolicy::new(&catalog, &opts, &active(&["a", "b"]), &mut diagnostics);

        assert_eq!(policy.repetition_weight("a"), 1.0);
        assert_eq!(
            diagnostics.issues(),
            &[Issue::AmbiguousGroup {
                source: "a".to_string(),
                groups: 2
            }]
        );
    }

    #[test]
    fn test_subtype_repetition_and_ignore_flag() {
        let catalog = catalog();
        let mut diagnostics = Diagnostics::new();
        let opts = RunOptions {
            repetition_scaling: false,
            ..options(WeightingStrategy::Subtype)
        };
        let policy = WeightingPolicy::new(&catalog, &opts, &active(&["a", "b", "c", "d"]), &mut diagnostics);

        assert_eq!(policy.repetition_weight("a"), 0.5);
        assert_eq!(policy.repetition_weight("c"), 1.0);
        // d has no subtype
        assert_eq!(policy.repetition_weight("d"), 1.0);
        assert_eq!(diagnostics.len(), 1);

        let ignore = RunOptions {
            ignore_subtypes: true,
            ..opts
        };
        let mut diagnostics = Diagnostics::new();
        let policy = WeightingPolicy::new(&catalog, &ignore, &active(&["a", "b"]), &mut diagnostics);
        assert_eq!(policy.repetition_weight("a"), 1.0);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_legacy_product_with_city_primacy() {
        let catalog = catalog();
        let mut diagnostics = Diagnostics::new();
        let policy = WeightingPolicy::new(
            &catalog,
            &options(WeightingStrategy::Legacy),
            &active(&["d"]),
            &mut diagnostics,
        );

        let state = weight(&EntityKey::state_level("CA"), "d", &policy);
        let city = weight(&EntityKey::new("CA", "Fresno"), "d", &policy);
        assert_eq!(state.p, 4.0);
        assert_eq!(state.psw, 4.0 * 1.5 * 0.5);
        assert_eq!(city.psw, 5.0 * 1.5 * 0.5);

        let plain = RunOptions {
            set_p_by_city: false,
            ..options(WeightingStrategy::Legacy)
        };
        let policy = WeightingPolicy::new(&catalog, &plain, &active(&["d"]), &mut diagnostics);
        let city = weight(&EntityKey::new("CA", "Fresno"), "d", &policy);
        assert_eq!(city.psw, 2.0 * 1.5 * 0.5);
    }

    #[test]
    fn test_measure() {
        let weights = Weights {
            p: 5.0,
            s: 2.0,
            w: 1.0,
            psw: 10.0,
        };
        assert_eq!(measure(8.0, &weights), 8.0);
    }
}
