//! City coordinate import
//!
//! Reads the exported `coordenadas_cidades.json` (array of
//! `{nome, estado_sigla, latitude, longitude}`) and plans coordinate
//! updates for cities that already exist. Cities are never created here.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::cleaner::parse_decimal;
use crate::error::{RankingError, Result};
use crate::model::{match_key, CityRef, StateRef};
use crate::reconcile::index_cities;
use crate::store::CoordinateUpdate;

/// Coordinates are exported either as strings or as JSON numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Number(f64),
    Text(String),
}

impl Coordinate {
    fn value(&self) -> Option<f64> {
        match self {
            Coordinate::Number(n) => Some(*n).filter(|n| n.is_finite()),
            Coordinate::Text(s) => parse_decimal(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CoordinateRecord {
    #[serde(rename = "nome", default)]
    pub name: Option<String>,
    #[serde(rename = "estado_sigla", default)]
    pub state_abbreviation: Option<String>,
    #[serde(default)]
    pub latitude: Option<Coordinate>,
    #[serde(default)]
    pub longitude: Option<Coordinate>,
}

/// Why a record was not applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordIssue {
    MissingField { index: usize },
    InvalidCoordinates { index: usize, name: String },
    UnknownState { index: usize, state: String },
    UnknownCity { index: usize, name: String, state: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatePlan {
    pub updates: Vec<CoordinateUpdate>,
    pub total_records: usize,
    pub skipped_existing: usize,
    pub issues: Vec<RecordIssue>,
}

impl CoordinatePlan {
    pub fn errors(&self) -> usize {
        self.issues.len()
    }
}

pub fn read_records(path: &Path) -> Result<Vec<CoordinateRecord>> {
    if !path.exists() {
        return Err(RankingError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_records(&content)
}

pub fn parse_records(content: &str) -> Result<Vec<CoordinateRecord>> {
    Ok(serde_json::from_str(content)?)
}

fn valid_pair(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Plan coordinate updates. With `skip_existing`, cities that already
/// have both coordinates are left alone.
pub fn plan_coordinates(
    records: &[CoordinateRecord],
    states: &[StateRef],
    cities: &[CityRef],
    skip_existing: bool,
) -> CoordinatePlan {
    let mut plan = CoordinatePlan {
        total_records: records.len(),
        ..Default::default()
    };

    let state_ids: HashMap<String, i32> = states
        .iter()
        .map(|s| (match_key(&s.abbreviation), s.state_id))
        .collect();
    let city_index = index_cities(cities);

    for (index, record) in records.iter().enumerate() {
        let (Some(name), Some(state), Some(latitude), Some(longitude)) = (
            non_blank(&record.name),
            non_blank(&record.state_abbreviation),
            record.latitude.as_ref(),
            record.longitude.as_ref(),
        ) else {
            plan.issues.push(RecordIssue::MissingField { index });
            continue;
        };

        let coordinates = latitude
            .value()
            .zip(longitude.value())
            .filter(|(lat, lon)| valid_pair(*lat, *lon));
        let Some((latitude, longitude)) = coordinates else {
            plan.issues.push(RecordIssue::InvalidCoordinates { index, name });
            continue;
        };

        let state = match_key(&state);
        let Some(state_id) = state_ids.get(&state) else {
            log::warn!("State not found: {} (city: {})", state, name);
            plan.issues.push(RecordIssue::UnknownState { index, state });
            continue;
        };

        let Some(city) = city_index.get(&(*state_id, match_key(&name))) else {
            log::warn!("City not found: {} - {}", name, state);
            plan.issues.push(RecordIssue::UnknownCity { index, name, state });
            continue;
        };

        if skip_existing && city.coordinates().is_some() {
            plan.skipped_existing += 1;
            continue;
        }

        plan.updates.push(CoordinateUpdate {
            city_id: city.city_id,
            latitude,
            longitude,
        });
    }

    plan
}
