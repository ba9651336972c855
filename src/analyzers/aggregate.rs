use crate::analyzers::types::{
    FinalRanking, FinalRow, GroupRanking, GroupScore, Measure, SourceTable,
};
use crate::analyzers::utility::mean;
use crate::entity::{EntityKey, fill_missing};
use std::collections::BTreeMap;
use tracing::debug;

/// Composite of the measures contributing to one group at one entity.
///
/// With `renormalize`, each `M_i` is divided by `avgPSW / 10` so the result is
/// a PSW-weighted mean of CompScores instead of a value whose magnitude
/// follows the raw weight scale.
pub fn group_score(measures: &[Measure], renormalize: bool) -> GroupScore {
    let psws: Vec<f64> = measures.iter().map(|m| m.psw).collect();
    let avg_psw = mean(&psws);

    let contributions: Vec<f64> = match avg_psw {
        Some(avg) if renormalize => measures.iter().map(|m| m.m / (avg / 10.0)).collect(),
        _ => measures.iter().map(|m| m.m).collect(),
    };

    GroupScore {
        m: mean(&contributions),
        n: measures.len(),
        avg_psw,
    }
}

/// Collapses the member sources of one group into one composite per entity.
///
/// Each member column is first filled over `entities`, so a city without a
/// city row in that source uses the source's state value.
pub fn aggregate_group(
    group: &str,
    members: &[&SourceTable],
    entities: &[EntityKey],
    renormalize: bool,
) -> GroupRanking {
    let columns: Vec<BTreeMap<EntityKey, Measure>> = members
        .iter()
        .map(|table| fill_missing(entities, &table.measures()))
        .collect();

    let scores: BTreeMap<EntityKey, GroupScore> = entities
        .iter()
        .map(|key| {
            let present: Vec<Measure> = columns
                .iter()
                .filter_map(|column| column.get(key).copied())
                .collect();
            (key.clone(), group_score(&present, renormalize))
        })
        .collect();

    let mut member_ids: Vec<String> = members.iter().map(|t| t.id.clone()).collect();
    member_ids.sort();

    debug!(
        group,
        members = member_ids.len(),
        scored = scores.values().filter(|s| s.m.is_some()).count(),
        "Group aggregated"
    );

    GroupRanking {
        group: group.to_string(),
        members: member_ids,
        scores,
    }
}

/// Combines group composites into the global ranking.
///
/// `M` is the unweighted mean of the available group composites, so every
/// group carries the same influence however many sources feed it. `n` sums
/// the group counts.
pub fn aggregate_final(groups: &[GroupRanking], entities: &[EntityKey]) -> FinalRanking {
    let columns: Vec<(&str, BTreeMap<EntityKey, GroupScore>)> = groups
        .iter()
        .map(|group| {
            let present: BTreeMap<EntityKey, GroupScore> = group
                .scores
                .iter()
                .filter(|(_, score)| score.m.is_some())
                .map(|(key, score)| (key.clone(), *score))
                .collect();
            (group.group.as_str(), fill_missing(entities, &present))
        })
        .collect();

    let rows = entities
        .iter()
        .map(|key| {
            let mut by_group = BTreeMap::new();
            let mut composites = Vec::new();
            let mut n = 0;

            for (name, column) in &columns {
                let score = column.get(key).copied().unwrap_or_default();
                n += score.n;
                if let Some(m) = score.m {
                    composites.push(m);
                }
                by_group.insert(name.to_string(), score);
            }

            FinalRow {
                key: key.clone(),
                m: mean(&composites),
                n,
                groups: by_group,
            }
        })
        .collect();

    FinalRanking {
        groups: groups.iter().map(|g| g.group.clone()).collect(),
        rows,
    }
}
