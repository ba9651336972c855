//! Data types used by the scoring pipeline.

use std::collections::BTreeMap;

use crate::entity::EntityKey;

/// Which raw column a source table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Percent-like score on a 0-100 scale.
    Score,
    /// Position in a ranking, 1 = best.
    Rank,
    /// Already on the 0-10 scale.
    Processed,
    Unrecognized,
}

/// One row of a loaded source table.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub key: EntityKey,
    /// Value of the source's measure column; `None` for blank or invalid cells.
    pub value: Option<f64>,
}

/// A source table as read from disk, keys already canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSource {
    pub id: String,
    pub kind: SourceKind,
    pub rows: Vec<RawRow>,
}

/// Credibility weight factors for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub p: f64,
    pub s: f64,
    pub w: f64,
    pub psw: f64,
}

/// Weighted measure of one source for one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measure {
    pub m: f64,
    pub psw: f64,
}

/// A fully derived row.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub key: EntityKey,
    pub raw: Option<f64>,
    pub comp_score: Option<f64>,
    pub weights: Weights,
    /// `CompScore · PSW / 10`; missing whenever `comp_score` is.
    pub m: Option<f64>,
}

impl SourceRecord {
    pub fn measure(&self) -> Option<Measure> {
        self.m.map(|m| Measure {
            m,
            psw: self.weights.psw,
        })
    }
}

/// All derived rows of one source, unique per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub id: String,
    pub kind: SourceKind,
    pub records: BTreeMap<EntityKey, SourceRecord>,
}

impl SourceTable {
    /// The contributing measures of this source, keyed by entity.
    pub fn measures(&self) -> BTreeMap<EntityKey, Measure> {
        self.records
            .iter()
            .filter_map(|(key, record)| record.measure().map(|m| (key.clone(), m)))
            .collect()
    }
}

/// Composite for one group (or the whole ranking) at one entity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GroupScore {
    /// Missing when `n == 0`.
    pub m: Option<f64>,
    pub n: usize,
    pub avg_psw: Option<f64>,
}

/// Per-entity composites of one source type.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRanking {
    pub group: String,
    /// Active member sources, sorted.
    pub members: Vec<String>,
    pub scores: BTreeMap<EntityKey, GroupScore>,
}

/// One row of the final table.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalRow {
    pub key: EntityKey,
    pub m: Option<f64>,
    pub n: usize,
    /// Group name -> that group's composite at this entity.
    pub groups: BTreeMap<String, GroupScore>,
}

/// The global ranking, one row per entity in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalRanking {
    /// Group names, in column order.
    pub groups: Vec<String>,
    pub rows: Vec<FinalRow>,
}

impl FinalRanking {
    pub fn get(&self, key: &EntityKey) -> Option<&FinalRow> {
        self.rows.iter().find(|row| &row.key == key)
    }
}
