//! Scoring core: per-source normalization, credibility weighting and the
//! two-level aggregation into group and global rankings.

pub mod aggregate;
pub mod normalize;
pub mod types;
pub mod utility;
pub mod weight;
