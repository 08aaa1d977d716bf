//! Heat-map weighting
//!
//! Turns cities into weighted map points. Weight convention: 0.0 is the
//! most dangerous ("hot") end, 1.0 the safest ("cool") end. A higher
//! ranking position means a safer city, so weight grows with position.
//!
//! Precedence per city:
//! 1. no coordinates -> not plotted
//! 2. ranking position -> (position - 1) / (max_position - 1)
//! 3. crime indicator -> 1 - (value - min) / (max - min)
//! 4. otherwise -> 0.5
//!
//! Dataset-wide aggregates are computed once, up front, and passed in
//! explicitly; the per-city calculation is pure.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;

use crate::model::{CityKey, CityRef, SpreadsheetRow, StateRef};

pub const NEUTRAL_WEIGHT: f64 = 0.5;

/// Map center (Brazil) and default zoom for renderers.
pub const MAP_CENTER: [f64; 2] = [-14.2350, -51.9253];
pub const MAP_ZOOM: u8 = 5;

/// Heat-layer gradient, weight stop -> colour.
pub const HEAT_GRADIENT: [(f64, &str); 7] = [
    (0.0, "#8B0000"),
    (0.15, "#FF4500"),
    (0.3, "#FF6347"),
    (0.45, "#FFA500"),
    (0.6, "#FFFF00"),
    (0.85, "#87CEEB"),
    (1.0, "#00008B"),
];

/// Marker colour category, a step function over ranking position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColourBucket {
    /// 1..=10
    DarkestDanger,
    /// 11..=50
    StrongDanger,
    /// 51..=150
    ModerateDanger,
    /// 151..=300
    MildDanger,
    /// 301..=600
    Caution,
    /// 601..=2000
    MildSafe,
    /// 2001+
    Safest,
    /// no ranking position
    Unknown,
}

impl ColourBucket {
    pub fn for_position(position: Option<i64>) -> Self {
        match position {
            None => ColourBucket::Unknown,
            Some(p) if p <= 10 => ColourBucket::DarkestDanger,
            Some(p) if p <= 50 => ColourBucket::StrongDanger,
            Some(p) if p <= 150 => ColourBucket::ModerateDanger,
            Some(p) if p <= 300 => ColourBucket::MildDanger,
            Some(p) if p <= 600 => ColourBucket::Caution,
            Some(p) if p <= 2000 => ColourBucket::MildSafe,
            Some(_) => ColourBucket::Safest,
        }
    }

    pub fn hex(&self) -> &'static str {
        match self {
            ColourBucket::DarkestDanger => "#8B0000",
            ColourBucket::StrongDanger => "#FF4500",
            ColourBucket::ModerateDanger => "#FF6347",
            ColourBucket::MildDanger => "#FFA500",
            ColourBucket::Caution => "#FFFF00",
            ColourBucket::MildSafe => "#87CEEB",
            ColourBucket::Safest => "#00008B",
            ColourBucket::Unknown => "#808080",
        }
    }
}

/// What to do with a plottable city that has neither a ranking position
/// nor a crime indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnrankedPolicy {
    #[default]
    Exclude,
    Neutral,
}

impl FromStr for UnrankedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exclude" => Ok(UnrankedPolicy::Exclude),
            "neutral" => Ok(UnrankedPolicy::Neutral),
            other => Err(format!(
                "unknown unranked policy '{other}' (expected 'exclude' or 'neutral')"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorRange {
    pub min: f64,
    pub max: f64,
}

impl IndicatorRange {
    /// Range over every finite value; `None` when there are none.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |range, v| match range {
                None => Some(IndicatorRange { min: v, max: v }),
                Some(r) => Some(IndicatorRange {
                    min: r.min.min(v),
                    max: r.max.max(v),
                }),
            })
    }
}

/// Aggregates every per-city weight depends on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatasetAggregates {
    /// Highest ranking position among rendered cities, at least 1.
    pub max_position: i64,
    pub indicator_range: Option<IndicatorRange>,
}

impl DatasetAggregates {
    pub fn new(
        positions: impl IntoIterator<Item = i64>,
        indicator_range: Option<IndicatorRange>,
    ) -> Self {
        Self {
            max_position: positions.into_iter().max().unwrap_or(1).max(1),
            indicator_range,
        }
    }
}

/// A city as seen by the weight calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct MapCity {
    pub name: String,
    pub state_abbreviation: String,
    pub ranking_position: Option<i64>,
    pub coordinates: Option<(f64, f64)>,
    pub crime_indicator: Option<f64>,
}

impl MapCity {
    fn has_signal(&self) -> bool {
        self.ranking_position.is_some() || self.crime_indicator.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub normalized_weight: f64,
    pub colour_bucket: ColourBucket,
    pub ranking_position: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub name: String,
    pub uf: String,
    pub latitude: f64,
    pub longitude: f64,
    pub ranking_position: Option<i64>,
    pub colour: ColourBucket,
    pub colour_hex: &'static str,
}

/// Everything a renderer needs: points, raw heat triples, ordered markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapLayers {
    pub points: Vec<WeightedPoint>,
    pub heat: Vec<[f64; 3]>,
    pub markers: Vec<Marker>,
}

fn position_weight(position: i64, max_position: i64) -> f64 {
    if max_position <= 1 {
        return NEUTRAL_WEIGHT;
    }
    (position.saturating_sub(1) as f64 / max_position.saturating_sub(1) as f64).clamp(0.0, 1.0)
}

// TODO: confirm indicator direction with the data owners; inverted here so
// that a higher indicator (worse) lands on the hot end like low positions.
fn indicator_weight(value: f64, range: &IndicatorRange) -> f64 {
    if range.max <= range.min {
        return NEUTRAL_WEIGHT;
    }
    (1.0 - (value - range.min) / (range.max - range.min)).clamp(0.0, 1.0)
}

/// Weight in [0, 1] following the position > indicator > neutral order.
pub fn normalized_weight(
    ranking_position: Option<i64>,
    crime_indicator: Option<f64>,
    aggregates: &DatasetAggregates,
) -> f64 {
    if let Some(position) = ranking_position {
        return position_weight(position, aggregates.max_position);
    }
    match (crime_indicator, aggregates.indicator_range.as_ref()) {
        (Some(value), Some(range)) => indicator_weight(value, range),
        _ => NEUTRAL_WEIGHT,
    }
}

/// Weight a single city. `None` when it cannot be plotted.
pub fn weigh(city: &MapCity, aggregates: &DatasetAggregates) -> Option<WeightedPoint> {
    let (latitude, longitude) = city.coordinates?;
    Some(WeightedPoint {
        latitude,
        longitude,
        normalized_weight: normalized_weight(
            city.ranking_position,
            city.crime_indicator,
            aggregates,
        ),
        colour_bucket: ColourBucket::for_position(city.ranking_position),
        ranking_position: city.ranking_position,
    })
}

/// Cities that end up on the map under `policy`.
pub fn renderable<'a>(cities: &'a [MapCity], policy: UnrankedPolicy) -> Vec<&'a MapCity> {
    cities
        .iter()
        .filter(|c| c.coordinates.is_some())
        .filter(|c| policy == UnrankedPolicy::Neutral || c.has_signal())
        .collect()
}

/// Build all map layers. `indicator_range` spans the whole spreadsheet,
/// not only the cities that are plotted.
pub fn build_layers(
    cities: &[MapCity],
    indicator_range: Option<IndicatorRange>,
    policy: UnrankedPolicy,
) -> MapLayers {
    let rendered = renderable(cities, policy);
    let aggregates = DatasetAggregates::new(
        rendered.iter().filter_map(|c| c.ranking_position),
        indicator_range,
    );
    log::debug!(
        "Rendering {} of {} cities (max position {})",
        rendered.len(),
        cities.len(),
        aggregates.max_position
    );

    let mut layers = MapLayers::default();
    for city in &rendered {
        let Some(point) = weigh(city, &aggregates) else {
            continue;
        };
        layers
            .heat
            .push([point.latitude, point.longitude, point.normalized_weight]);
        layers.markers.push(Marker {
            name: city.name.clone(),
            uf: city.state_abbreviation.clone(),
            latitude: point.latitude,
            longitude: point.longitude,
            ranking_position: point.ranking_position,
            colour: point.colour_bucket,
            colour_hex: point.colour_bucket.hex(),
        });
        layers.points.push(point);
    }

    // Most critical first; unranked last.
    layers
        .markers
        .sort_by_key(|m| m.ranking_position.unwrap_or(i64::MAX));

    layers
}

/// Renderer payload: map setup plus the three layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapDocument {
    pub center: [f64; 2],
    pub zoom: u8,
    pub gradient: Vec<(f64, &'static str)>,
    pub total_cities: usize,
    pub points: Vec<WeightedPoint>,
    pub heat: Vec<[f64; 3]>,
    pub markers: Vec<Marker>,
}

impl From<MapLayers> for MapDocument {
    fn from(layers: MapLayers) -> Self {
        Self {
            center: MAP_CENTER,
            zoom: MAP_ZOOM,
            gradient: HEAT_GRADIENT.to_vec(),
            total_cities: layers.markers.len(),
            points: layers.points,
            heat: layers.heat,
            markers: layers.markers,
        }
    }
}

/// Join persisted cities with spreadsheet indicators by natural key.
pub fn map_cities(
    states: &[StateRef],
    cities: &[CityRef],
    rows: &[SpreadsheetRow],
) -> Vec<MapCity> {
    let abbreviations: HashMap<i32, &str> = states
        .iter()
        .map(|s| (s.state_id, s.abbreviation.as_str()))
        .collect();
    let indicators: HashMap<CityKey, f64> = rows
        .iter()
        .filter_map(|r| r.raw_crime_indicator.map(|v| (r.key(), v)))
        .collect();

    cities
        .iter()
        .map(|city| {
            let uf = abbreviations.get(&city.state_id).copied().unwrap_or("");
            MapCity {
                name: city.name.clone(),
                state_abbreviation: uf.to_string(),
                ranking_position: city.ranking_position,
                coordinates: city.coordinates(),
                crime_indicator: indicators.get(&CityKey::new(uf, &city.name)).copied(),
            }
        })
        .collect()
}
