//! Entity identity: canonical (State, City) keys, the master entity list and
//! the state-anchored fallback fill.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::SourceCatalog;

/// A state (empty `city`) or a city within a state.
///
/// Ordering is (state, city), so the state-level row sorts first in its state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub state: String,
    pub city: String,
}

impl EntityKey {
    pub fn new(state: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            city: city.into(),
        }
    }

    /// The state-level pseudo-entity.
    pub fn state_level(state: impl Into<String>) -> Self {
        Self::new(state, "")
    }

    pub fn is_state_level(&self) -> bool {
        self.city.is_empty()
    }

    /// The state-level key this entity falls back to.
    pub fn anchor(&self) -> EntityKey {
        EntityKey::state_level(self.state.clone())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.city.is_empty() {
            write!(f, "{}", self.state)
        } else {
            write!(f, "{}, {}", self.city, self.state)
        }
    }
}

/// Canonicalizes a raw state label to its abbreviation.
///
/// Unknown labels are kept (trimmed); bare two-letter codes are upper-cased.
pub fn canonical_state(label: &str, catalog: &SourceCatalog) -> String {
    let label = label.trim();
    if let Some(abbr) = catalog.abbreviation(label) {
        return abbr.to_string();
    }
    if label.len() == 2 && label.chars().all(|c| c.is_ascii_alphabetic()) {
        return label.to_ascii_uppercase();
    }
    label.to_string()
}

pub fn canonical_city(label: Option<&str>) -> String {
    label.map(str::trim).unwrap_or_default().to_string()
}

/// Builds a key from raw labels.
pub fn resolve_key(state: &str, city: Option<&str>, catalog: &SourceCatalog) -> EntityKey {
    EntityKey::new(canonical_state(state, catalog), canonical_city(city))
}

/// Master entity list: the sorted union of `keys` plus the state-level anchor
/// of every state seen.
pub fn resolve_entities<'a>(keys: impl IntoIterator<Item = &'a EntityKey>) -> Vec<EntityKey> {
    let mut entities = BTreeSet::new();
    for key in keys {
        if !key.is_state_level() {
            entities.insert(key.anchor());
        }
        entities.insert(key.clone());
    }
    entities.into_iter().collect()
}

/// Spreads state-level values onto city entities that lack their own.
///
/// Entities are bucketed by state and each bucket only ever reads its own
/// anchor, so values never move between sibling cities or across states. A
/// city whose anchor is missing stays missing. Keys in `column` that are not
/// in `entities` are dropped.
pub fn fill_missing<T: Clone>(
    entities: &[EntityKey],
    column: &BTreeMap<EntityKey, T>,
) -> BTreeMap<EntityKey, T> {
    let mut by_state: BTreeMap<&str, Vec<&EntityKey>> = BTreeMap::new();
    for key in entities {
        by_state.entry(key.state.as_str()).or_default().push(key);
    }

    let mut filled = BTreeMap::new();
    for (state, members) in by_state {
        let anchor = column.get(&EntityKey::state_level(state));
        for key in members {
            let value = match column.get(key) {
                Some(own) => Some(own),
                None if !key.is_state_level() => anchor,
                None => None,
            };
            if let Some(value) = value {
                filled.insert(key.clone(), value.clone());
            }
        }
    }
    filled
}
