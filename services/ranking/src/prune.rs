//! Destructive maintenance plans
//!
//! - orphans: persisted cities absent from the current spreadsheet
//! - unranked: persisted cities without a ranking position
//! - duplicates: persisted cities colliding on (UF, upper-cased name)
//!
//! Each plan only lists candidates. Deleting them is a separate, explicitly
//! confirmed step in `pipeline`.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::{match_key, CityKey, CityRef, StateRef};

/// A city scheduled for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub city_id: i32,
    pub name: String,
    pub state_abbreviation: String,
}

impl std::fmt::Display for Removal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.name, self.state_abbreviation)
    }
}

fn abbreviations(states: &[StateRef]) -> HashMap<i32, &str> {
    states
        .iter()
        .map(|s| (s.state_id, s.abbreviation.as_str()))
        .collect()
}

fn removal(city: &CityRef, abbreviations: &HashMap<i32, &str>) -> Removal {
    Removal {
        city_id: city.city_id,
        name: city.name.clone(),
        state_abbreviation: abbreviations
            .get(&city.state_id)
            .map(|s| s.to_string())
            .unwrap_or_default(),
    }
}

/// Persisted key of a city, built with the same normalization as rows.
pub fn city_key(city: &CityRef, abbreviations: &HashMap<i32, &str>) -> CityKey {
    let state = abbreviations.get(&city.state_id).copied().unwrap_or("");
    CityKey::new(state, &city.name)
}

/// Cities whose (UF, upper-cased name) is not in `valid`.
pub fn plan_orphans(
    valid: &HashSet<CityKey>,
    states: &[StateRef],
    cities: &[CityRef],
) -> Vec<Removal> {
    let abbreviations = abbreviations(states);
    cities
        .iter()
        .filter(|city| !valid.contains(&city_key(city, &abbreviations)))
        .map(|city| removal(city, &abbreviations))
        .collect()
}

/// Cities that never received a ranking position.
pub fn plan_unranked(states: &[StateRef], cities: &[CityRef]) -> Vec<Removal> {
    let abbreviations = abbreviations(states);
    cities
        .iter()
        .filter(|city| !city.is_ranked())
        .map(|city| removal(city, &abbreviations))
        .collect()
}

/// Every city but the lowest-id one in each (state, match key) group.
pub fn plan_duplicates(states: &[StateRef], cities: &[CityRef]) -> Vec<Removal> {
    let abbreviations = abbreviations(states);

    let mut ordered: Vec<&CityRef> = cities.iter().collect();
    ordered.sort_by_key(|c| c.city_id);

    let mut kept: HashSet<(i32, String)> = HashSet::new();
    ordered
        .into_iter()
        .filter(|city| !kept.insert((city.state_id, match_key(&city.name))))
        .map(|city| removal(city, &abbreviations))
        .collect()
}
