//! Header normalization
//!
//! Spreadsheets arrive from different sources with inconsistent casing,
//! accents and encodings ("Município", "MUNICIPIO", "municipio*"). Every
//! header is folded to a plain lower-case ASCII-ish form and looked up in
//! a fixed alias table.

use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::MissingColumnsError;

/// Canonical fields the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Canonical {
    Uf,
    Municipio,
    Posicao,
    IndicadorCrime,
}

impl Canonical {
    pub fn as_str(&self) -> &'static str {
        match self {
            Canonical::Uf => "UF",
            Canonical::Municipio => "Municipio",
            Canonical::Posicao => "Posicao",
            Canonical::IndicadorCrime => "IndicadorCrime",
        }
    }
}

/// Known header spellings, already in normalized form.
const HEADER_ALIASES: &[(&str, Canonical)] = &[
    ("uf", Canonical::Uf),
    ("uf*", Canonical::Uf),
    ("sigla", Canonical::Uf),
    ("sigla uf", Canonical::Uf),
    ("municipio", Canonical::Municipio),
    ("municipio*", Canonical::Municipio),
    ("cidade", Canonical::Municipio),
    ("nome do municipio", Canonical::Municipio),
    ("posicao", Canonical::Posicao),
    ("posicao*", Canonical::Posicao),
    ("ranking", Canonical::Posicao),
    ("posicao no ranking", Canonical::Posicao),
    ("indicador_crime", Canonical::IndicadorCrime),
    ("indicador_crime*", Canonical::IndicadorCrime),
    ("indicador crime", Canonical::IndicadorCrime),
    ("indicador de crime", Canonical::IndicadorCrime),
];

/// Spellings that only fill a field no exact alias claims. "Estado" often
/// holds full state names next to a proper UF column.
const FALLBACK_ALIASES: &[(&str, Canonical)] = &[("estado", Canonical::Uf)];

/// Trim, lower-case and strip diacritics (NFKD + drop combining marks).
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Map a single raw header to its canonical field, if any.
pub fn canonical_for(raw: &str) -> Option<Canonical> {
    classify(raw).map(|(canonical, _)| canonical)
}

/// Canonical field and whether the match is only a fallback.
fn classify(raw: &str) -> Option<(Canonical, bool)> {
    let normalized = normalize_header(raw);
    let lookup = |aliases: &[(&str, Canonical)]| {
        aliases
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, canonical)| *canonical)
    };

    if let Some(canonical) = lookup(HEADER_ALIASES) {
        return Some((canonical, false));
    }
    if let Some(canonical) = lookup(FALLBACK_ALIASES) {
        return Some((canonical, true));
    }

    // Free-form indicator columns ("Indicador Geral de Crime", ...)
    if normalized.contains("indicador") && normalized.contains("crime") {
        return Some((Canonical::IndicadorCrime, true));
    }

    None
}

/// A canonical field resolved to a concrete column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub index: usize,
    pub header: String,
}

/// Result of resolving a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    uf: Option<ResolvedColumn>,
    municipio: Option<ResolvedColumn>,
    posicao: Option<ResolvedColumn>,
    indicador_crime: Option<ResolvedColumn>,
}

impl HeaderMap {
    pub fn get(&self, field: Canonical) -> Option<&ResolvedColumn> {
        self.slot(field).as_ref()
    }

    pub fn index(&self, field: Canonical) -> Option<usize> {
        self.get(field).map(|c| c.index)
    }

    fn slot(&self, field: Canonical) -> &Option<ResolvedColumn> {
        match field {
            Canonical::Uf => &self.uf,
            Canonical::Municipio => &self.municipio,
            Canonical::Posicao => &self.posicao,
            Canonical::IndicadorCrime => &self.indicador_crime,
        }
    }

    fn slot_mut(&mut self, field: Canonical) -> &mut Option<ResolvedColumn> {
        match field {
            Canonical::Uf => &mut self.uf,
            Canonical::Municipio => &mut self.municipio,
            Canonical::Posicao => &mut self.posicao,
            Canonical::IndicadorCrime => &mut self.indicador_crime,
        }
    }
}

/// Resolve a header row. The first exact alias of a field wins; a
/// fallback spelling is used only when no exact alias is present.
///
/// Fails with every missing `required` field named at once.
pub fn resolve_headers(
    headers: &[String],
    required: &[Canonical],
) -> Result<HeaderMap, MissingColumnsError> {
    let mut map = HeaderMap::default();
    let mut from_fallback: Vec<Canonical> = Vec::new();

    for (index, header) in headers.iter().enumerate() {
        let Some((field, fallback)) = classify(header) else {
            continue;
        };
        let replaceable = from_fallback.contains(&field) && !fallback;
        let slot = map.slot_mut(field);
        if slot.is_none() || replaceable {
            if let Some(previous) = slot.replace(ResolvedColumn {
                index,
                header: header.clone(),
            }) {
                log::debug!(
                    "'{}' column {} preferred over {}",
                    field.as_str(),
                    header,
                    previous.header
                );
                from_fallback.retain(|f| *f != field);
            } else if fallback {
                from_fallback.push(field);
            }
        } else {
            log::debug!("Ignoring extra '{}' column: {}", field.as_str(), header);
        }
    }

    let missing: Vec<Canonical> = required
        .iter()
        .copied()
        .filter(|field| map.get(*field).is_none())
        .collect();

    if !missing.is_empty() {
        return Err(MissingColumnsError {
            missing,
            found: headers.to_vec(),
        });
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(headers: &[&str]) -> Vec<String> {
        headers.iter().map(|h| h.to_string()).collect()
    }

    // -------------------------------------------------------------------------
    // NORMALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_strips_accents_case_and_whitespace() {
        assert_eq!(normalize_header("  Município "), "municipio");
        assert_eq!(normalize_header("POSIÇÃO*"), "posicao*");
        assert_eq!(normalize_header("Indicador_Crime"), "indicador_crime");
    }

    #[test]
    fn test_municipio_variants_resolve() {
        for header in ["Município", "municipio", "MUNICIPIO", "município*", "Cidade"] {
            assert_eq!(canonical_for(header), Some(Canonical::Municipio), "{header}");
        }
    }

    #[test]
    fn test_posicao_variants_resolve() {
        for header in ["Posição", "posicao", "posição*", "POSICAO"] {
            assert_eq!(canonical_for(header), Some(Canonical::Posicao), "{header}");
        }
    }

    #[test]
    fn test_indicator_free_form_resolves() {
        assert_eq!(
            canonical_for("Indicador Geral de Crime (2023)"),
            Some(Canonical::IndicadorCrime)
        );
        assert_eq!(canonical_for("População"), None);
    }

    // -------------------------------------------------------------------------
    // RESOLUTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_resolve_keeps_original_header_and_index() {
        let headers = owned(&["Ranking Geral", "UF", "Município", "Posição"]);
        let map = resolve_headers(&headers, &[Canonical::Uf, Canonical::Municipio]).unwrap();

        let municipio = map.get(Canonical::Municipio).unwrap();
        assert_eq!(municipio.index, 2);
        assert_eq!(municipio.header, "Município");
        assert_eq!(map.index(Canonical::Posicao), Some(3));
        assert_eq!(map.index(Canonical::IndicadorCrime), None);
    }

    #[test]
    fn test_resolve_first_match_wins() {
        let headers = owned(&["UF", "Estado", "Municipio"]);
        let map = resolve_headers(&headers, &[Canonical::Uf]).unwrap();
        assert_eq!(map.index(Canonical::Uf), Some(0));
    }

    #[test]
    fn test_exact_uf_beats_estado_in_any_order() {
        let headers = owned(&["Estado", "Município", "UF", "Posição"]);
        let map = resolve_headers(&headers, &[Canonical::Uf]).unwrap();
        let uf = map.get(Canonical::Uf).unwrap();
        assert_eq!(uf.index, 2);
        assert_eq!(uf.header, "UF");

        let headers = owned(&["Estado", "Município"]);
        let map = resolve_headers(&headers, &[Canonical::Uf]).unwrap();
        assert_eq!(map.index(Canonical::Uf), Some(0));
    }

    #[test]
    fn test_exact_indicator_beats_free_form() {
        let headers = owned(&["Indicador Geral de Crime", "UF", "Indicador_Crime"]);
        let map = resolve_headers(&headers, &[]).unwrap();
        assert_eq!(map.index(Canonical::IndicadorCrime), Some(2));
    }

    #[test]
    fn test_resolve_reports_every_missing_column() {
        let headers = owned(&["Região", "Município"]);
        let err = resolve_headers(
            &headers,
            &[Canonical::Uf, Canonical::Municipio, Canonical::Posicao],
        )
        .unwrap_err();

        assert_eq!(err.missing, vec![Canonical::Uf, Canonical::Posicao]);
        assert_eq!(err.found, headers);
        let message = err.to_string();
        assert!(message.contains("UF"));
        assert!(message.contains("Posicao"));
        assert!(message.contains("Região"));
    }

    #[test]
    fn test_optional_columns_do_not_fail() {
        let headers = owned(&["UF", "Municipio", "Posicao"]);
        assert!(resolve_headers(&headers, &[Canonical::Uf, Canonical::Municipio]).is_ok());
    }
}
