//! Run configuration: the static source catalog plus per-run options.
//!
//! The catalog is assembled from a handful of JSON files under the data
//! directory and is read once per run. An unreadable catalog is the only fatal
//! condition in the pipeline.

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Ranked universe for US states.
pub const DEFAULT_RANK_UNIVERSE: usize = 50;

/// Primacy used for city rows when `set_p_by_city` is on (legacy strategy).
pub const CITY_PRIMACY: f64 = 5.0;
/// Primacy used for state rows when `set_p_by_city` is on (legacy strategy).
pub const STATE_PRIMACY: f64 = 4.0;

/// Entities spot-printed after a run unless others are named.
pub const DEFAULT_PRINT_TARGETS: [&str; 3] = ["Atlanta", "Boston", "Memphis"];

/// How per-row credibility weights are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WeightingStrategy {
    /// Product of the configured rating entries, no renormalization.
    Legacy,
    /// P·S·W with `W` discounted over the source type group.
    Type,
    /// P·S·W with `W` discounted over the source subtype.
    Subtype,
}

impl WeightingStrategy {
    /// Filename fragment identifying the strategy in output names.
    pub fn label(&self) -> &'static str {
        match self {
            WeightingStrategy::Legacy => "oldWeighting",
            WeightingStrategy::Type => "newWeighting",
            WeightingStrategy::Subtype => "subtypeWeighting",
        }
    }

    /// Whether group composites divide member measures by the mean PSW.
    pub fn renormalizes(&self) -> bool {
        !matches!(self, WeightingStrategy::Legacy)
    }
}

/// Options chosen per run (CLI surface).
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Entities spot-printed after the run.
    pub print_targets: Vec<String>,
    /// Min-max rescale every source's CompScore to span [0, 10].
    pub normalize_all: bool,
    /// Legacy strategy only: force P=5 for city rows and P=4 for state rows.
    pub set_p_by_city: bool,
    pub strategy: WeightingStrategy,
    /// Subtype strategy only: skip repetition discounting (`W = 1`).
    pub ignore_subtypes: bool,
    /// Multiply `W` by active sources / groups.
    pub repetition_scaling: bool,
    pub filename_prefix: String,
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            print_targets: DEFAULT_PRINT_TARGETS.map(String::from).to_vec(),
            normalize_all: true,
            set_p_by_city: true,
            strategy: WeightingStrategy::Type,
            ignore_subtypes: false,
            repetition_scaling: true,
            filename_prefix: "equality_index".to_string(),
            verbose: false,
        }
    }
}

/// Rank normalization policy.
///
/// Stored on disk as:
/// ```json
/// { "universe": 50, "pinned": ["statusWomen_bestWorstStates"] }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RankPolicy {
    #[serde(default = "default_universe")]
    pub universe: usize,
    /// Sources known to be incomplete whose nNorm stays at `universe`.
    #[serde(default)]
    pub pinned: BTreeSet<String>,
}

fn default_universe() -> usize {
    DEFAULT_RANK_UNIVERSE
}

impl Default for RankPolicy {
    fn default() -> Self {
        Self {
            universe: DEFAULT_RANK_UNIVERSE,
            pinned: BTreeSet::from(["statusWomen_bestWorstStates".to_string()]),
        }
    }
}

/// Locations of the catalog files and the per-source tables.
#[derive(Debug, Clone)]
pub struct CatalogPaths {
    pub abbreviations: PathBuf,
    pub ratings: PathBuf,
    pub types: PathBuf,
    pub subtypes: PathBuf,
    pub rank_policy: PathBuf,
    pub processed_dir: PathBuf,
}

impl CatalogPaths {
    /// Standard layout below a data directory.
    pub fn from_data_dir(dir: &Path) -> Self {
        Self {
            abbreviations: dir.join("utils").join("statename_to_abbr.json"),
            ratings: dir.join("sources").join("source_ratings.json"),
            types: dir.join("sources").join("source_types.json"),
            subtypes: dir.join("sources").join("source_subtypes.json"),
            rank_policy: dir.join("sources").join("rank_policy.json"),
            processed_dir: dir.join("processed_data"),
        }
    }
}

/// Static metadata for every known source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCatalog {
    /// Location name -> state abbreviation.
    pub abbreviations: BTreeMap<String, String>,
    /// Source id -> `[P, ...]`.
    pub ratings: BTreeMap<String, Vec<f64>>,
    /// Group name -> member source ids.
    pub types: BTreeMap<String, Vec<String>>,
    /// Source id -> subtype id.
    pub subtypes: BTreeMap<String, String>,
    pub rank_policy: RankPolicy,
}

impl SourceCatalog {
    /// Loads and validates the catalog.
    ///
    /// The subtype table and the rank policy are optional; every other file
    /// must exist and parse.
    pub fn load(paths: &CatalogPaths) -> Result<Self> {
        let abbreviations = read_json(&paths.abbreviations)?;
        let ratings = read_json(&paths.ratings)?;
        let types = read_json(&paths.types)?;

        let subtypes = if paths.subtypes.exists() {
            read_json(&paths.subtypes)?
        } else {
            debug!(path = %paths.subtypes.display(), "No subtype table, using empty map");
            BTreeMap::new()
        };

        let rank_policy = if paths.rank_policy.exists() {
            read_json(&paths.rank_policy)?
        } else {
            RankPolicy::default()
        };

        let catalog = Self {
            abbreviations,
            ratings,
            types,
            subtypes,
            rank_policy,
        };
        catalog.validate()?;

        debug!(
            sources = catalog.ratings.len(),
            groups = catalog.types.len(),
            subtypes = catalog.subtypes.len(),
            "Source catalog loaded"
        );
        Ok(catalog)
    }

    /// Rejects ratings that would break `PSW > 0`.
    pub fn validate(&self) -> Result<()> {
        for (source, rating) in &self.ratings {
            if rating.is_empty() {
                bail!("source rating for '{source}' is empty");
            }
            if let Some(bad) = rating.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                bail!("source rating for '{source}' contains non-positive value {bad}");
            }
            if !(1.0..=5.0).contains(&rating[0]) {
                warn!(source = %source, primacy = rating[0], "Primacy outside the 1-5 scale");
            }
        }
        if self.rank_policy.universe == 0 {
            bail!("rank universe must be positive");
        }
        Ok(())
    }

    /// Configured source ids, sorted.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.ratings.keys().map(String::as_str)
    }

    pub fn rating(&self, source: &str) -> &[f64] {
        self.ratings.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Looks up a location label, exact first, then ignoring case.
    pub fn abbreviation(&self, label: &str) -> Option<&str> {
        if let Some(abbr) = self.abbreviations.get(label) {
            return Some(abbr);
        }
        self.abbreviations
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(label))
            .map(|(_, abbr)| abbr.as_str())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
