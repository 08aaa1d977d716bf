use serde::{Deserialize, Serialize};

/// Brazilian state (UF) as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StateRef {
    pub state_id: i32,
    pub name: String,
    pub abbreviation: String,
}

/// City as persisted. `name` keeps the casing it was first stored with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CityRef {
    pub city_id: i32,
    pub name: String,
    pub state_id: i32,
    pub ranking_position: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CityRef {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn is_ranked(&self) -> bool {
        self.ranking_position.is_some()
    }
}

/// A cleaned spreadsheet row. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadsheetRow {
    /// Trimmed, upper-cased UF.
    pub state_code: String,
    /// Trimmed, original casing.
    pub city_name: String,
    pub ranking_position: i64,
    pub raw_crime_indicator: Option<f64>,
    /// 1-based line in the source file (header is line 1).
    pub line: usize,
}

impl SpreadsheetRow {
    pub fn key(&self) -> CityKey {
        CityKey::new(&self.state_code, &self.city_name)
    }
}

/// Normalized form used on BOTH sides of every city comparison.
///
/// Storage keeps original casing; equality is decided here and never by a
/// database collation.
pub fn match_key(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Natural key correlating spreadsheet rows with persisted cities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CityKey {
    pub state: String,
    pub city: String,
}

impl CityKey {
    pub fn new(state: &str, city: &str) -> Self {
        Self {
            state: match_key(state),
            city: match_key(city),
        }
    }
}

impl std::fmt::Display for CityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.city, self.state)
    }
}

/// Per-row conditions. Recovered locally and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowDiagnostic {
    /// State code or city name blank; row discarded.
    MissingKey { line: usize },
    /// Non-numeric ranking; 0 substituted.
    MalformedRanking { line: usize, key: CityKey, value: String },
    /// Later occurrence of an already-seen (UF, city); row discarded.
    DuplicateDiscarded { line: usize, key: CityKey, first_line: usize },
    /// UF not in the reference table; row skipped.
    UnresolvedState { line: usize, key: CityKey },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_key_trims_and_uppercases() {
        assert_eq!(match_key("  Campinas "), "CAMPINAS");
        assert_eq!(match_key("São Paulo"), "SÃO PAULO");
    }

    #[test]
    fn test_city_key_ignores_case_on_both_fields() {
        assert_eq!(CityKey::new("sp", " campinas"), CityKey::new("SP", "CAMPINAS "));
        assert_ne!(CityKey::new("SP", "Campinas"), CityKey::new("RJ", "Campinas"));
    }

    #[test]
    fn test_city_coordinates_require_both_axes() {
        let mut city = CityRef {
            city_id: 1,
            name: "Recife".to_string(),
            state_id: 17,
            ranking_position: None,
            latitude: Some(-8.05),
            longitude: None,
        };
        assert_eq!(city.coordinates(), None);
        city.longitude = Some(-34.9);
        assert_eq!(city.coordinates(), Some((-8.05, -34.9)));
    }
}
