//! Reference store seam
//!
//! The pipeline hands a planner to `transact`: the store reads a snapshot
//! of states/cities under its write lock, the planner turns it into one
//! `ChangeSet`, and the store applies it all-or-nothing before releasing
//! the lock.

use async_trait::async_trait;

use crate::error::{RankingError, Result};
use crate::model::{CityRef, StateRef};
use crate::seed::NewState;

/// A city to insert. The state is referenced by UF because it may be a
/// seed state created by the same change set.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCity {
    pub name: String,
    pub state_abbreviation: String,
    pub ranking_position: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingUpdate {
    pub city_id: i32,
    pub ranking_position: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateUpdate {
    pub city_id: i32,
    pub latitude: f64,
    pub longitude: f64,
}

/// Every write a run performs, applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub new_states: Vec<NewState>,
    pub new_cities: Vec<NewCity>,
    pub ranking_updates: Vec<RankingUpdate>,
    pub coordinate_updates: Vec<CoordinateUpdate>,
    pub deletions: Vec<i32>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new_states.is_empty()
            && self.new_cities.is_empty()
            && self.ranking_updates.is_empty()
            && self.coordinate_updates.is_empty()
            && self.deletions.is_empty()
    }
}

/// Plans writes from a locked snapshot. `None` means read-only (dry run or
/// unconfirmed preview).
pub type Planner<'a> = Box<dyn FnOnce(&[StateRef], &[CityRef]) -> Option<ChangeSet> + Send + 'a>;

pub fn planner<'a, F>(plan: F) -> Planner<'a>
where
    F: FnOnce(&[StateRef], &[CityRef]) -> Option<ChangeSet> + Send + 'a,
{
    Box::new(plan)
}

#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// All states, ordered by id.
    async fn states(&self) -> Result<Vec<StateRef>>;

    /// All cities, ordered by id.
    async fn cities(&self) -> Result<Vec<CityRef>>;

    /// Apply `changes` atomically: on error nothing is persisted.
    async fn apply(&mut self, changes: &ChangeSet) -> Result<()>;

    /// Snapshot, plan and apply with no other writer in between. Returns
    /// whether the planner asked for its changes to be applied.
    async fn transact(&mut self, plan: Planner<'_>) -> Result<bool>;
}

/// In-process store with the same constraints as the Postgres schema.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    states: Vec<StateRef>,
    cities: Vec<CityRef>,
    next_state_id: i32,
    next_city_id: i32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_state_id: 1,
            next_city_id: 1,
            ..Default::default()
        }
    }

    pub fn with_state(mut self, abbreviation: &str, name: &str) -> Self {
        let id = self.next_state_id;
        self.next_state_id += 1;
        self.states.push(StateRef {
            state_id: id,
            name: name.to_string(),
            abbreviation: abbreviation.to_string(),
        });
        self
    }

    /// Insert a city directly, bypassing the pipeline. Returns its id.
    pub fn insert_city(
        &mut self,
        state_abbreviation: &str,
        name: &str,
        ranking_position: Option<i64>,
        coordinates: Option<(f64, f64)>,
    ) -> Result<i32> {
        let state_id = self.state_id(state_abbreviation)?;
        let city_id = self.next_city_id;
        self.next_city_id += 1;
        self.cities.push(CityRef {
            city_id,
            name: name.to_string(),
            state_id,
            ranking_position,
            latitude: coordinates.map(|c| c.0),
            longitude: coordinates.map(|c| c.1),
        });
        Ok(city_id)
    }

    pub fn city(&self, state_abbreviation: &str, name: &str) -> Option<&CityRef> {
        let state_id = self.state_id(state_abbreviation).ok()?;
        self.cities
            .iter()
            .find(|c| c.state_id == state_id && c.name == name)
    }

    pub fn city_count(&self) -> usize {
        self.cities.len()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    fn state_id(&self, abbreviation: &str) -> Result<i32> {
        self.states
            .iter()
            .find(|s| s.abbreviation == abbreviation)
            .map(|s| s.state_id)
            .ok_or_else(|| RankingError::UnknownState(abbreviation.to_string()))
    }

    fn city_mut(&mut self, city_id: i32) -> Result<&mut CityRef> {
        self.cities
            .iter_mut()
            .find(|c| c.city_id == city_id)
            .ok_or_else(|| RankingError::Constraint(format!("city {city_id} does not exist")))
    }

    fn apply_in_place(&mut self, changes: &ChangeSet) -> Result<()> {
        for state in &changes.new_states {
            if self
                .states
                .iter()
                .any(|s| s.abbreviation == state.abbreviation || s.name == state.name)
            {
                return Err(RankingError::Constraint(format!(
                    "duplicate state {}",
                    state.abbreviation
                )));
            }
            let id = self.next_state_id;
            self.next_state_id += 1;
            self.states.push(StateRef {
                state_id: id,
                name: state.name.clone(),
                abbreviation: state.abbreviation.clone(),
            });
        }

        for city in &changes.new_cities {
            let state_id = self.state_id(&city.state_abbreviation)?;
            if self
                .cities
                .iter()
                .any(|c| c.state_id == state_id && c.name == city.name)
            {
                return Err(RankingError::Constraint(format!(
                    "duplicate city {} - {}",
                    city.name, city.state_abbreviation
                )));
            }
            self.insert_city(&city.state_abbreviation, &city.name, city.ranking_position, None)?;
        }

        for update in &changes.ranking_updates {
            self.city_mut(update.city_id)?.ranking_position = Some(update.ranking_position);
        }

        for update in &changes.coordinate_updates {
            let city = self.city_mut(update.city_id)?;
            city.latitude = Some(update.latitude);
            city.longitude = Some(update.longitude);
        }

        self.cities.retain(|c| !changes.deletions.contains(&c.city_id));

        Ok(())
    }
}

#[async_trait]
impl ReferenceStore for MemoryStore {
    async fn states(&self) -> Result<Vec<StateRef>> {
        Ok(self.states.clone())
    }

    async fn cities(&self) -> Result<Vec<CityRef>> {
        Ok(self.cities.clone())
    }

    async fn apply(&mut self, changes: &ChangeSet) -> Result<()> {
        // Work on a copy so a failure leaves the original untouched.
        let mut staged = self.clone();
        staged.apply_in_place(changes)?;
        *self = staged;
        Ok(())
    }

    async fn transact(&mut self, plan: Planner<'_>) -> Result<bool> {
        match plan(&self.states, &self.cities) {
            Some(changes) => {
                self.apply(&changes).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
