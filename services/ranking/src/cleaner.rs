//! Record cleaning
//!
//! Turns raw rows into `SpreadsheetRow`s, in this order:
//! 1. discard rows with a blank UF or city
//! 2. trim + upper-case UF, full state names mapped to their UF
//! 3. trim city, keep casing
//! 4. coerce ranking to an integer (bad values become 0, row kept)
//! 5. deduplicate on (UF, upper-cased city), first occurrence wins
//!
//! Output order is file order of first occurrences, so the same file
//! always produces the same sequence.

use std::collections::HashMap;

use crate::headers::{Canonical, HeaderMap};
use crate::model::{CityKey, RowDiagnostic, SpreadsheetRow};
use crate::seed::state_abbreviation;
use crate::sheet::{Cell, RawTable};

/// Cleaned rows plus everything that was dropped or repaired on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanOutcome {
    pub rows: Vec<SpreadsheetRow>,
    pub missing_key_rows: usize,
    pub duplicates_discarded: usize,
    pub malformed_rankings: usize,
    pub diagnostics: Vec<RowDiagnostic>,
}

impl CleanOutcome {
    pub fn keys(&self) -> impl Iterator<Item = CityKey> + '_ {
        self.rows.iter().map(SpreadsheetRow::key)
    }
}

/// Ranking coercion result: the value and whether it had to be repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerced {
    Valid(i64),
    Blank,
    Malformed,
}

impl Coerced {
    pub fn value(self) -> i64 {
        match self {
            Coerced::Valid(v) => v,
            Coerced::Blank | Coerced::Malformed => 0,
        }
    }
}

pub(crate) fn parse_decimal(text: &str) -> Option<f64> {
    let text = text.trim();
    text.parse::<f64>()
        .ok()
        .or_else(|| text.replace(',', ".").parse::<f64>().ok())
        .filter(|f| f.is_finite())
}

/// Integer ranking from any cell. Decimals truncate toward zero.
pub fn coerce_ranking(cell: Option<&Cell>) -> Coerced {
    match cell {
        None | Some(Cell::Empty) => Coerced::Blank,
        Some(Cell::Int(i)) => Coerced::Valid(*i),
        Some(Cell::Float(f)) if f.is_finite() => Coerced::Valid(f.trunc() as i64),
        Some(Cell::Float(_)) => Coerced::Malformed,
        Some(Cell::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Coerced::Blank;
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Coerced::Valid(i);
            }
            match parse_decimal(trimmed) {
                Some(f) => Coerced::Valid(f.trunc() as i64),
                None => Coerced::Malformed,
            }
        }
    }
}

/// Optional crime indicator. Non-numeric values count as absent.
pub fn coerce_indicator(cell: Option<&Cell>) -> Option<f64> {
    match cell? {
        Cell::Empty => None,
        Cell::Int(i) => Some(*i as f64),
        Cell::Float(f) => Some(*f).filter(|f| f.is_finite()),
        Cell::Text(s) => parse_decimal(s),
    }
}

/// Clean every data row of `table` using the resolved `headers`.
///
/// `headers` must have UF and Municipio resolved; Posicao and
/// IndicadorCrime are read when present.
pub fn clean_rows(table: &RawTable, headers: &HeaderMap) -> CleanOutcome {
    let mut outcome = CleanOutcome::default();
    let mut first_seen: HashMap<CityKey, usize> = HashMap::new();

    let uf_col = headers.index(Canonical::Uf);
    let city_col = headers.index(Canonical::Municipio);
    let position_col = headers.index(Canonical::Posicao);
    let indicator_col = headers.index(Canonical::IndicadorCrime);

    for (row_idx, row) in table.rows.iter().enumerate() {
        let line = RawTable::line_of(row_idx);
        let cell = |col: Option<usize>| col.and_then(|c| row.get(c));

        let (Some(state_code), Some(city_name)) = (
            cell(uf_col).and_then(Cell::as_text),
            cell(city_col).and_then(Cell::as_text),
        ) else {
            outcome.missing_key_rows += 1;
            outcome.diagnostics.push(RowDiagnostic::MissingKey { line });
            continue;
        };

        let state_code = match state_abbreviation(&state_code) {
            Some(uf) => uf.to_string(),
            None => state_code.to_uppercase(),
        };
        let key = CityKey::new(&state_code, &city_name);

        if let Some(&first_line) = first_seen.get(&key) {
            log::debug!("Line {}: duplicate of line {} ({})", line, first_line, key);
            outcome.duplicates_discarded += 1;
            outcome.diagnostics.push(RowDiagnostic::DuplicateDiscarded {
                line,
                key,
                first_line,
            });
            continue;
        }
        first_seen.insert(key.clone(), line);

        let ranking_position = match coerce_ranking(cell(position_col)) {
            Coerced::Malformed => {
                let value = cell(position_col)
                    .and_then(Cell::as_text)
                    .unwrap_or_default();
                log::debug!("Line {}: malformed ranking '{}' for {}", line, value, key);
                outcome.malformed_rankings += 1;
                outcome.diagnostics.push(RowDiagnostic::MalformedRanking {
                    line,
                    key,
                    value,
                });
                0
            }
            coerced => coerced.value(),
        };

        outcome.rows.push(SpreadsheetRow {
            state_code,
            city_name,
            ranking_position,
            raw_crime_indicator: coerce_indicator(cell(indicator_col)),
            line,
        });
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::resolve_headers;
    use crate::sheet::parse_csv_bytes;

    fn clean(csv: &str) -> CleanOutcome {
        let table = parse_csv_bytes(csv.as_bytes()).unwrap();
        let headers = resolve_headers(&table.headers, &[Canonical::Uf, Canonical::Municipio]).unwrap();
        clean_rows(&table, &headers)
    }

    // -------------------------------------------------------------------------
    // NORMALIZATION OF KEYS
    // -------------------------------------------------------------------------

    #[test]
    fn test_state_upper_cased_city_case_preserved() {
        let out = clean("UF,Municipio,Posicao\n sp , Campinas ,5\n");
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].state_code, "SP");
        assert_eq!(out.rows[0].city_name, "Campinas");
        assert_eq!(out.rows[0].ranking_position, 5);
        assert_eq!(out.rows[0].line, 2);
    }

    #[test]
    fn test_full_state_names_become_uf() {
        let out = clean("Estado,Municipio\nSão Paulo,Campinas\nsao paulo,Santos\nRJ,Niterói\nAtlântida,X\n");
        let codes: Vec<&str> = out.rows.iter().map(|r| r.state_code.as_str()).collect();
        assert_eq!(codes, vec!["SP", "SP", "RJ", "ATLÂNTIDA"]);
    }

    #[test]
    fn test_rows_missing_state_or_city_are_discarded() {
        let out = clean("UF,Municipio,Posicao\n,Campinas,5\nSP,,6\nSP,Santos,7\n");
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].city_name, "Santos");
        assert_eq!(out.missing_key_rows, 2);
        assert_eq!(
            out.diagnostics[..2],
            [
                RowDiagnostic::MissingKey { line: 2 },
                RowDiagnostic::MissingKey { line: 3 }
            ]
        );
    }

    // -------------------------------------------------------------------------
    // RANKING COERCION
    // -------------------------------------------------------------------------

    #[test]
    fn test_non_numeric_ranking_becomes_zero() {
        let out = clean("UF,Municipio,Posicao\nSP,Campinas,abc\n");
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].ranking_position, 0);
        assert_eq!(out.malformed_rankings, 1);
        assert!(matches!(
            &out.diagnostics[0],
            RowDiagnostic::MalformedRanking { value, .. } if value == "abc"
        ));
    }

    #[test]
    fn test_blank_ranking_is_zero_but_not_malformed() {
        let out = clean("UF,Municipio,Posicao\nSP,Campinas,\n");
        assert_eq!(out.rows[0].ranking_position, 0);
        assert_eq!(out.malformed_rankings, 0);
    }

    #[test]
    fn test_missing_ranking_column_yields_zero() {
        let out = clean("UF,Municipio\nSP,Campinas\n");
        assert_eq!(out.rows[0].ranking_position, 0);
    }

    #[test]
    fn test_coerce_ranking_variants() {
        assert_eq!(coerce_ranking(Some(&Cell::Int(42))), Coerced::Valid(42));
        assert_eq!(coerce_ranking(Some(&Cell::Float(42.9))), Coerced::Valid(42));
        assert_eq!(coerce_ranking(Some(&Cell::Text("17".into()))), Coerced::Valid(17));
        assert_eq!(coerce_ranking(Some(&Cell::Text("17,0".into()))), Coerced::Valid(17));
        assert_eq!(coerce_ranking(Some(&Cell::Text("n/d".into()))), Coerced::Malformed);
        assert_eq!(coerce_ranking(Some(&Cell::Float(f64::NAN))), Coerced::Malformed);
        assert_eq!(coerce_ranking(Some(&Cell::Float(-1e30))), Coerced::Valid(i64::MIN));
        assert_eq!(coerce_ranking(None), Coerced::Blank);
    }

    #[test]
    fn test_coerce_indicator() {
        assert_eq!(coerce_indicator(Some(&Cell::Text("12,5".into()))), Some(12.5));
        assert_eq!(coerce_indicator(Some(&Cell::Int(3))), Some(3.0));
        assert_eq!(coerce_indicator(Some(&Cell::Text("-".into()))), None);
        assert_eq!(coerce_indicator(None), None);
    }

    #[test]
    fn test_indicator_column_is_read_when_present() {
        let out = clean("UF;Municipio;Posicao;Indicador_Crime\nSP;Campinas;5;0,75\nSP;Santos;6;x\n");
        assert_eq!(out.rows[0].raw_crime_indicator, Some(0.75));
        assert_eq!(out.rows[1].raw_crime_indicator, None);
    }

    // -------------------------------------------------------------------------
    // DEDUPLICATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let out = clean("UF,Municipio,Posicao\nSP,Campinas,5\nsp,CAMPINAS,99\nRJ,Campinas,7\n");
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].ranking_position, 5);
        assert_eq!(out.rows[0].city_name, "Campinas");
        assert_eq!(out.rows[1].state_code, "RJ");
        assert_eq!(out.duplicates_discarded, 1);
        assert!(matches!(
            &out.diagnostics[0],
            RowDiagnostic::DuplicateDiscarded { line: 3, first_line: 2, .. }
        ));
    }

    #[test]
    fn test_discarded_duplicate_is_not_counted_malformed() {
        let out = clean("UF,Municipio,Posicao\nSP,Campinas,5\nSP,CAMPINAS,abc\n");
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].ranking_position, 5);
        assert_eq!(out.duplicates_discarded, 1);
        assert_eq!(out.malformed_rankings, 0);
        assert!(!out
            .diagnostics
            .iter()
            .any(|d| matches!(d, RowDiagnostic::MalformedRanking { .. })));
    }

    #[test]
    fn test_order_is_first_occurrence_order() {
        let out = clean("UF,Municipio,Posicao\nSP,B,2\nSP,A,1\nSP,B,3\nSP,C,4\n");
        let names: Vec<&str> = out.rows.iter().map(|r| r.city_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_cleaning_is_deterministic() {
        let csv = "UF,Municipio,Posicao\nSP,Campinas,5\nRJ,Niterói,abc\nSP,campinas,1\n";
        let baseline = clean(csv);
        for _ in 0..5 {
            assert_eq!(clean(csv), baseline);
        }
    }
}
