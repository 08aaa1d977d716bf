//! The 27 Brazilian federative units. The only states the pipeline will
//! ever create.

use std::collections::HashSet;

use crate::headers::normalize_header;
use crate::model::{match_key, StateRef};

/// (UF, name)
pub const BRAZILIAN_STATES: [(&str, &str); 27] = [
    ("AC", "Acre"),
    ("AL", "Alagoas"),
    ("AP", "Amapá"),
    ("AM", "Amazonas"),
    ("BA", "Bahia"),
    ("CE", "Ceará"),
    ("DF", "Distrito Federal"),
    ("ES", "Espírito Santo"),
    ("GO", "Goiás"),
    ("MA", "Maranhão"),
    ("MT", "Mato Grosso"),
    ("MS", "Mato Grosso do Sul"),
    ("MG", "Minas Gerais"),
    ("PA", "Pará"),
    ("PB", "Paraíba"),
    ("PR", "Paraná"),
    ("PE", "Pernambuco"),
    ("PI", "Piauí"),
    ("RJ", "Rio de Janeiro"),
    ("RN", "Rio Grande do Norte"),
    ("RS", "Rio Grande do Sul"),
    ("RO", "Rondônia"),
    ("RR", "Roraima"),
    ("SC", "Santa Catarina"),
    ("SP", "São Paulo"),
    ("SE", "Sergipe"),
    ("TO", "Tocantins"),
];

/// A seed state that is not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewState {
    pub abbreviation: String,
    pub name: String,
}

pub fn state_name(abbreviation: &str) -> Option<&'static str> {
    let abbreviation = match_key(abbreviation);
    BRAZILIAN_STATES
        .iter()
        .find(|(uf, _)| *uf == abbreviation)
        .map(|(_, name)| *name)
}

/// UF for a cell holding either the abbreviation or the full state name.
/// Names match ignoring case and accents.
pub fn state_abbreviation(value: &str) -> Option<&'static str> {
    let code = match_key(value);
    if let Some((uf, _)) = BRAZILIAN_STATES.iter().find(|(uf, _)| *uf == code) {
        return Some(*uf);
    }
    let folded = normalize_header(value);
    BRAZILIAN_STATES
        .iter()
        .find(|(_, name)| normalize_header(name) == folded)
        .map(|(uf, _)| *uf)
}

/// Seed entries absent from `existing`, matched on abbreviation or name.
pub fn missing_states(existing: &[StateRef]) -> Vec<NewState> {
    let abbreviations: HashSet<String> = existing
        .iter()
        .map(|s| match_key(&s.abbreviation))
        .collect();
    let names: HashSet<String> = existing.iter().map(|s| match_key(&s.name)).collect();

    BRAZILIAN_STATES
        .iter()
        .filter(|(uf, name)| {
            !abbreviations.contains(*uf) && !names.contains(&match_key(name))
        })
        .map(|(uf, name)| NewState {
            abbreviation: uf.to_string(),
            name: name.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_table_is_unique() {
        let ufs: HashSet<&str> = BRAZILIAN_STATES.iter().map(|(uf, _)| *uf).collect();
        let names: HashSet<&str> = BRAZILIAN_STATES.iter().map(|(_, n)| *n).collect();
        assert_eq!(ufs.len(), 27);
        assert_eq!(names.len(), 27);
        assert!(ufs.iter().all(|uf| uf.len() == 2));
    }

    #[test]
    fn test_state_name_lookup() {
        assert_eq!(state_name("sp"), Some("São Paulo"));
        assert_eq!(state_name("XX"), None);
    }

    #[test]
    fn test_state_abbreviation_accepts_full_names() {
        assert_eq!(state_abbreviation(" sp "), Some("SP"));
        assert_eq!(state_abbreviation("São Paulo"), Some("SP"));
        assert_eq!(state_abbreviation("SAO PAULO"), Some("SP"));
        assert_eq!(state_abbreviation("rio grande do sul"), Some("RS"));
        assert_eq!(state_abbreviation("Atlântida"), None);
    }

    #[test]
    fn test_missing_states_skips_existing() {
        let existing = vec![StateRef {
            state_id: 1,
            name: "São Paulo".to_string(),
            abbreviation: "SP".to_string(),
        }];
        let missing = missing_states(&existing);
        assert_eq!(missing.len(), 26);
        assert!(missing.iter().all(|s| s.abbreviation != "SP"));
        assert!(missing_states(&[]).len() == 27);
    }
}
