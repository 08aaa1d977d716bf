//! Reference reconciliation and ranking updates
//!
//! Matches cleaned rows against the persisted state/city snapshot and
//! plans the writes: missing seed states, new cities, changed rankings.
//! Planning is pure; running it on its own output yields no changes.

use std::collections::HashMap;

use crate::model::{match_key, CityRef, RowDiagnostic, SpreadsheetRow, StateRef};
use crate::seed::{self, NewState};
use crate::store::{ChangeSet, NewCity, RankingUpdate};

/// Planned writes and the tallies reported to the operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub changes: ChangeSet,
    pub states_created: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_unresolved_state: usize,
    pub diagnostics: Vec<RowDiagnostic>,
}

/// Where a UF resolves to in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateSlot {
    Persisted(i32),
    /// Seed state created by this same plan; it has no cities yet.
    Seeded,
}

/// Persisted cities indexed by (state_id, match key). The lowest id wins
/// when stored names collide on the key.
pub fn index_cities(cities: &[CityRef]) -> HashMap<(i32, String), &CityRef> {
    let mut index = HashMap::with_capacity(cities.len());
    let mut ordered: Vec<&CityRef> = cities.iter().collect();
    ordered.sort_by_key(|c| c.city_id);
    for city in ordered {
        index
            .entry((city.state_id, match_key(&city.name)))
            .or_insert(city);
    }
    index
}

/// Plan seeding of the 27 UFs only, without any spreadsheet input.
pub fn plan_seed(states: &[StateRef]) -> Vec<NewState> {
    seed::missing_states(states)
}

/// Plan the ranking update for `rows` against the current snapshot.
pub fn plan_ranking(
    rows: &[SpreadsheetRow],
    states: &[StateRef],
    cities: &[CityRef],
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    let new_states = plan_seed(states);
    plan.states_created = new_states.len();

    let mut state_slots: HashMap<String, StateSlot> = states
        .iter()
        .map(|s| (match_key(&s.abbreviation), StateSlot::Persisted(s.state_id)))
        .collect();
    for state in &new_states {
        state_slots
            .entry(state.abbreviation.clone())
            .or_insert(StateSlot::Seeded);
    }
    plan.changes.new_states = new_states;

    let city_index = index_cities(cities);

    for row in rows {
        let key = row.key();

        let Some(slot) = state_slots.get(&key.state) else {
            log::warn!(
                "Line {}: state not found for UF '{}' ({})",
                row.line,
                row.state_code,
                row.city_name
            );
            plan.skipped_unresolved_state += 1;
            plan.diagnostics.push(RowDiagnostic::UnresolvedState {
                line: row.line,
                key,
            });
            continue;
        };

        let existing = match slot {
            StateSlot::Persisted(state_id) => city_index.get(&(*state_id, key.city.clone())),
            StateSlot::Seeded => None,
        };

        match existing {
            None => {
                log::debug!("Creating {} at position {}", key, row.ranking_position);
                plan.changes.new_cities.push(NewCity {
                    name: row.city_name.clone(),
                    state_abbreviation: key.state.clone(),
                    ranking_position: Some(row.ranking_position),
                });
                plan.created += 1;
            }
            Some(city) if city.ranking_position != Some(row.ranking_position) => {
                log::debug!(
                    "Updating {}: {:?} -> {}",
                    key,
                    city.ranking_position,
                    row.ranking_position
                );
                plan.changes.ranking_updates.push(RankingUpdate {
                    city_id: city.city_id,
                    ranking_position: row.ranking_position,
                });
                plan.updated += 1;
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> StateRef {
        StateRef {
            state_id: 25,
            name: "São Paulo".to_string(),
            abbreviation: "SP".to_string(),
        }
    }

    fn all_seeded() -> Vec<StateRef> {
        seed::BRAZILIAN_STATES
            .iter()
            .enumerate()
            .map(|(i, (uf, name))| StateRef {
                state_id: i as i32 + 1,
                name: name.to_string(),
                abbreviation: uf.to_string(),
            })
            .collect()
    }

    fn row(uf: &str, city: &str, position: i64) -> SpreadsheetRow {
        SpreadsheetRow {
            state_code: uf.to_string(),
            city_name: city.to_string(),
            ranking_position: position,
            raw_crime_indicator: None,
            line: 2,
        }
    }

    fn city(id: i32, state_id: i32, name: &str, position: Option<i64>) -> CityRef {
        CityRef {
            city_id: id,
            name: name.to_string(),
            state_id,
            ranking_position: position,
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn test_unknown_city_is_created() {
        let plan = plan_ranking(&[row("SP", "Campinas", 5)], &all_seeded(), &[]);
        assert_eq!(plan.created, 1);
        assert_eq!(plan.states_created, 0);
        assert_eq!(
            plan.changes.new_cities,
            vec![NewCity {
                name: "Campinas".to_string(),
                state_abbreviation: "SP".to_string(),
                ranking_position: Some(5),
            }]
        );
    }

    #[test]
    fn test_match_is_case_insensitive_and_keeps_stored_name() {
        let states = all_seeded();
        let sp_id = states.iter().find(|s| s.abbreviation == "SP").unwrap().state_id;
        let cities = vec![city(7, sp_id, "Campinas", Some(5))];

        let plan = plan_ranking(&[row("SP", "CAMPINAS", 8)], &states, &cities);
        assert_eq!(plan.created, 0);
        assert_eq!(plan.updated, 1);
        assert_eq!(
            plan.changes.ranking_updates,
            vec![RankingUpdate {
                city_id: 7,
                ranking_position: 8
            }]
        );
    }

    #[test]
    fn test_same_ranking_is_not_rewritten() {
        let states = all_seeded();
        let sp_id = states.iter().find(|s| s.abbreviation == "SP").unwrap().state_id;
        let cities = vec![city(7, sp_id, "Campinas", Some(5))];

        let plan = plan_ranking(&[row("SP", "Campinas", 5)], &states, &cities);
        assert_eq!(plan.updated, 0);
        assert_eq!(plan.unchanged, 1);
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_unranked_city_gets_ranking() {
        let states = all_seeded();
        let sp_id = states.iter().find(|s| s.abbreviation == "SP").unwrap().state_id;
        let cities = vec![city(7, sp_id, "Campinas", None)];

        let plan = plan_ranking(&[row("SP", "Campinas", 0)], &states, &cities);
        assert_eq!(plan.updated, 1);
    }

    #[test]
    fn test_unresolved_state_is_skipped_and_counted() {
        let plan = plan_ranking(
            &[row("XX", "Atlantis", 1), row("SP", "Santos", 2)],
            &all_seeded(),
            &[],
        );
        assert_eq!(plan.skipped_unresolved_state, 1);
        assert_eq!(plan.created, 1);
        assert!(matches!(
            &plan.diagnostics[0],
            RowDiagnostic::UnresolvedState { key, .. } if key.state == "XX"
        ));
    }

    #[test]
    fn test_missing_seed_states_are_bootstrapped() {
        let plan = plan_ranking(&[row("PE", "Recife", 30)], &[sp()], &[]);
        assert_eq!(plan.states_created, 26);
        assert!(plan
            .changes
            .new_states
            .iter()
            .any(|s| s.abbreviation == "PE" && s.name == "Pernambuco"));
        assert_eq!(plan.created, 1);
    }

    #[test]
    fn test_city_index_prefers_lowest_id_on_collision() {
        let cities = vec![
            city(9, 1, "CAMPINAS", Some(3)),
            city(4, 1, "Campinas", Some(5)),
        ];
        let index = index_cities(&cities);
        assert_eq!(index[&(1, "CAMPINAS".to_string())].city_id, 4);
    }
}
