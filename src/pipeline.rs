//! One-pass scoring run: load, normalize, weight, resolve entities,
//! aggregate.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::analyzers::aggregate::{aggregate_final, aggregate_group};
use crate::analyzers::normalize::comp_scores;
use crate::analyzers::types::{FinalRanking, GroupRanking, RawSource, SourceRecord, SourceTable};
use crate::analyzers::weight::{WeightingPolicy, measure, weight};
use crate::config::{CatalogPaths, RunOptions, SourceCatalog};
use crate::diagnostics::{Diagnostics, Issue};
use crate::entity::{EntityKey, resolve_entities};
use crate::loader::load_sources;

/// Immutable configuration shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub catalog: SourceCatalog,
    pub options: RunOptions,
}

impl PipelineConfig {
    /// Loads the catalog from disk. Fails only if a required config file is
    /// unreadable or invalid.
    pub fn load(paths: &CatalogPaths, options: RunOptions) -> Result<Self> {
        Ok(Self {
            catalog: SourceCatalog::load(paths)?,
            options,
        })
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub entities: Vec<EntityKey>,
    pub tables: Vec<SourceTable>,
    pub groups: Vec<GroupRanking>,
    pub ranking: FinalRanking,
    pub diagnostics: Diagnostics,
}

impl RunReport {
    /// Ids of the sources that loaded, sorted.
    pub fn loaded(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn table(&self, source: &str) -> Option<&SourceTable> {
        self.tables.iter().find(|t| t.id == source)
    }
}

/// Drops repeated entity keys, keeping the first row.
pub fn dedup_rows(source: &RawSource, diagnostics: &mut Diagnostics) -> RawSource {
    let mut seen = BTreeSet::new();
    let mut rows = Vec::with_capacity(source.rows.len());
    for row in &source.rows {
        if seen.insert(row.key.clone()) {
            rows.push(row.clone());
        } else {
            diagnostics.record(Issue::DuplicateEntity {
                source: source.id.clone(),
                entity: row.key.to_string(),
            });
        }
    }
    RawSource {
        id: source.id.clone(),
        kind: source.kind,
        rows,
    }
}

/// Normalizes and weights every row of one source.
pub fn derive_source(
    raw: &RawSource,
    config: &PipelineConfig,
    policy: &WeightingPolicy<'_>,
    diagnostics: &mut Diagnostics,
) -> SourceTable {
    let source = dedup_rows(raw, diagnostics);
    let scores = comp_scores(
        &source,
        &config.catalog.rank_policy,
        config.options.normalize_all,
        diagnostics,
    );

    let records = source
        .rows
        .iter()
        .zip(scores)
        .map(|(row, comp_score)| {
            let weights = weight(&row.key, &source.id, policy);
            let record = SourceRecord {
                key: row.key.clone(),
                raw: row.value,
                comp_score,
                weights,
                m: comp_score.map(|c| measure(c, &weights)),
            };
            (row.key.clone(), record)
        })
        .collect();

    SourceTable {
        id: source.id,
        kind: source.kind,
        records,
    }
}

/// Scores already-loaded sources. Pure: no I/O besides logging.
#[tracing::instrument(skip_all, fields(strategy = ?config.options.strategy, sources = sources.len()))]
pub fn score(
    config: &PipelineConfig,
    sources: &[RawSource],
    mut diagnostics: Diagnostics,
) -> RunReport {
    let active: BTreeSet<String> = sources.iter().map(|s| s.id.clone()).collect();
    let policy = WeightingPolicy::new(&config.catalog, &config.options, &active, &mut diagnostics);

    let mut tables: Vec<SourceTable> = sources
        .iter()
        .map(|raw| derive_source(raw, config, &policy, &mut diagnostics))
        .collect();
    tables.sort_by(|a, b| a.id.cmp(&b.id));

    let entities = resolve_entities(tables.iter().flat_map(|t| t.records.keys()));
    debug!(entities = entities.len(), "Master entity list resolved");

    let by_id: BTreeMap<&str, &SourceTable> = tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let renormalize = policy.strategy().renormalizes();

    let groups: Vec<GroupRanking> = config
        .catalog
        .types
        .iter()
        .map(|(group, ids)| {
            let member_ids: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
            let members: Vec<&SourceTable> = member_ids
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();
            aggregate_group(group, &members, &entities, renormalize)
        })
        .collect();

    let ranking = aggregate_final(&groups, &entities);

    info!(
        sources = tables.len(),
        entities = entities.len(),
        groups = groups.len(),
        issues = diagnostics.len(),
        "Rankings computed"
    );

    RunReport {
        entities,
        tables,
        groups,
        ranking,
        diagnostics,
    }
}

/// Loads the catalog and every source table, then scores them.
///
/// # Errors
///
/// Only a missing or invalid catalog file is an error; source problems are
/// recorded in the report's diagnostics.
pub fn run(paths: &CatalogPaths, options: RunOptions) -> Result<(PipelineConfig, RunReport)> {
    let config = PipelineConfig::load(paths, options)?;
    let mut diagnostics = Diagnostics::new();
    let sources = load_sources(&config.catalog, &paths.processed_dir, &mut diagnostics);
    let report = score(&config, &sources, diagnostics);
    Ok((config, report))
}
