//! Spreadsheet reading
//!
//! Produces a format-neutral `RawTable` (header row + typed cells) from
//! XLSX/XLS/XLSB/ODS (calamine, first sheet) or CSV (csv crate). CSV bytes
//! that are not valid UTF-8 are decoded as Windows-1252, the usual
//! encoding of spreadsheets exported by Brazilian public bodies.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use sha2::{Digest, Sha256};

use crate::error::{RankingError, Result};

/// A single spreadsheet cell, reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
}

impl Cell {
    /// Trimmed textual value; `None` for blank cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(format!("{}", *f as i64)),
            Cell::Float(f) => Some(f.to_string()),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_text().is_none()
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Int(*i),
            Data::Float(f) => Cell::Float(*f),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::Error(_) => Cell::Empty,
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Header row plus data rows of the first sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// `sha256:<hex>` of the file bytes, recorded with each run.
    pub content_hash: String,
}

impl RawTable {
    /// 1-based file line of a data row (header is line 1).
    pub fn line_of(row_index: usize) -> usize {
        row_index + 2
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            matches!(e.as_str(), "xlsx" | "xlsm" | "xls" | "xlsb" | "ods")
        })
        .unwrap_or(false)
}

/// Read a spreadsheet from disk, dispatching on the file extension.
pub fn read_table(path: &Path) -> Result<RawTable> {
    if !path.exists() {
        return Err(RankingError::FileNotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;

    if is_csv(path) {
        log::info!("Reading CSV file: {}", path.display());
        parse_csv_bytes(&bytes)
    } else if is_workbook(path) {
        log::info!("Opening workbook: {}", path.display());
        read_workbook(path, content_hash(&bytes))
    } else {
        Err(RankingError::UnsupportedFormat(path.display().to_string()))
    }
}

fn read_workbook(path: &Path, content_hash: String) -> Result<RawTable> {
    let mut workbook = open_workbook_auto(path)?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet_name) = sheet_names.first() else {
        return Err(RankingError::EmptySheet(format!(
            "{} has no sheets",
            path.display()
        )));
    };
    log::debug!(
        "Reading sheet '{}' (first of {} sheets)",
        sheet_name,
        sheet_names.len()
    );

    let range = workbook.worksheet_range(sheet_name)?;
    table_from_rows(range.rows(), sheet_name, content_hash)
}

/// Header text of a workbook cell: trimmed, whole numbers without ".0",
/// error cells blank.
fn header_text(data: &Data) -> String {
    Cell::from(data).as_text().unwrap_or_default()
}

/// First row is the header row; every later row becomes data.
fn table_from_rows<'a>(
    mut rows: impl Iterator<Item = &'a [Data]>,
    sheet_name: &str,
    content_hash: String,
) -> Result<RawTable> {
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| RankingError::EmptySheet(format!("sheet '{sheet_name}' has no header row")))?
        .iter()
        .map(header_text)
        .collect();

    let rows = rows
        .map(|row| row.iter().map(Cell::from).collect())
        .collect();

    Ok(RawTable {
        headers,
        rows,
        content_hash,
    })
}

/// Decode CSV bytes: strip a UTF-8 BOM, fall back to Windows-1252.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
            if had_errors {
                log::warn!("CSV contains bytes invalid in Windows-1252; replaced");
            }
            text.into_owned()
        }
    }
}

/// Semicolon wins when the header line has more `;` than `,`.
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Parse CSV content into a `RawTable`.
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<RawTable> {
    let text = decode_text(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(RankingError::EmptySheet("CSV has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|value| {
                    if value.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.to_string())
                    }
                })
                .collect(),
        );
    }

    Ok(RawTable {
        headers,
        rows,
        content_hash: content_hash(bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::CellErrorType;

    #[test]
    fn test_parse_csv_comma() {
        let table = parse_csv_bytes(b"UF,Municipio,Posicao\nSP,Campinas,5\n").unwrap();
        assert_eq!(table.headers, vec!["UF", "Municipio", "Posicao"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][1], Cell::Text("Campinas".to_string()));
    }

    #[test]
    fn test_parse_csv_semicolon_and_bom() {
        let csv = "\u{feff}UF;Município;Posição\nRJ;Niterói;12\n";
        let table = parse_csv_bytes(csv.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["UF", "Município", "Posição"]);
        assert_eq!(table.rows[0][1].as_text().as_deref(), Some("Niterói"));
    }

    #[test]
    fn test_parse_csv_windows_1252_fallback() {
        // "Município" with í encoded as 0xED
        let mut bytes = b"UF;Munic".to_vec();
        bytes.push(0xED);
        bytes.extend_from_slice(b"pio;Posicao\nPE;Jaboat");
        bytes.push(0xE3);
        bytes.extend_from_slice(b"o dos Guararapes;40\n");

        let table = parse_csv_bytes(&bytes).unwrap();
        assert_eq!(table.headers[1], "Município");
        assert_eq!(
            table.rows[0][1].as_text().as_deref(),
            Some("Jaboatão dos Guararapes")
        );
    }

    #[test]
    fn test_empty_fields_become_empty_cells() {
        let table = parse_csv_bytes(b"UF,Municipio,Posicao\nSP,,\n").unwrap();
        assert!(table.rows[0][1].is_blank());
        assert_eq!(table.rows[0][2], Cell::Empty);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = parse_csv_bytes(b"UF,Municipio\nSP,Campinas\n").unwrap();
        let b = parse_csv_bytes(b"UF,Municipio\nSP,Campinas\n").unwrap();
        let c = parse_csv_bytes(b"UF,Municipio\nSP,Santos\n").unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
        assert!(a.content_hash.starts_with("sha256:"));
    }

    #[test]
    fn test_cell_text_formats_whole_floats_as_integers() {
        assert_eq!(Cell::Float(12.0).as_text().as_deref(), Some("12"));
        assert_eq!(Cell::Float(1.5).as_text().as_deref(), Some("1.5"));
        assert_eq!(Cell::Text("  ".to_string()).as_text(), None);
    }

    // -------------------------------------------------------------------------
    // WORKBOOK CELLS
    // -------------------------------------------------------------------------

    #[test]
    fn test_workbook_cells_map_to_cells() {
        assert_eq!(Cell::from(&Data::Empty), Cell::Empty);
        assert_eq!(Cell::from(&Data::Int(7)), Cell::Int(7));
        assert_eq!(Cell::from(&Data::Float(7.5)), Cell::Float(7.5));
        assert_eq!(
            Cell::from(&Data::String(" Campinas ".to_string())),
            Cell::Text(" Campinas ".to_string())
        );
        assert_eq!(Cell::from(&Data::Bool(true)), Cell::Text("true".to_string()));
        assert_eq!(Cell::from(&Data::Error(CellErrorType::Div0)), Cell::Empty);
    }

    #[test]
    fn test_workbook_header_text() {
        assert_eq!(header_text(&Data::String("  Município ".to_string())), "Município");
        assert_eq!(header_text(&Data::Float(2023.0)), "2023");
        assert_eq!(header_text(&Data::Int(5)), "5");
        assert_eq!(header_text(&Data::Empty), "");
        assert_eq!(header_text(&Data::Error(CellErrorType::NA)), "");
    }

    #[test]
    fn test_table_from_workbook_rows() {
        let rows = vec![
            vec![
                Data::String("UF".to_string()),
                Data::String("Município".to_string()),
                Data::String("Posição".to_string()),
            ],
            vec![
                Data::String("SP".to_string()),
                Data::String("Campinas".to_string()),
                Data::Float(5.0),
            ],
            vec![
                Data::String("RJ".to_string()),
                Data::String("Niterói".to_string()),
                Data::Error(CellErrorType::Value),
            ],
        ];
        let table =
            table_from_rows(rows.iter().map(Vec::as_slice), "Plan1", "sha256:x".to_string()).unwrap();

        assert_eq!(table.headers, vec!["UF", "Município", "Posição"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][2], Cell::Float(5.0));
        assert_eq!(table.rows[1][2], Cell::Empty);
        assert_eq!(table.content_hash, "sha256:x");
    }

    #[test]
    fn test_workbook_without_header_row_is_empty_sheet() {
        let rows: Vec<Vec<Data>> = Vec::new();
        let err = table_from_rows(rows.iter().map(Vec::as_slice), "Plan1", String::new()).unwrap_err();
        assert!(matches!(err, RankingError::EmptySheet(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = read_table(Path::new("/nonexistent/ranking.xlsx")).unwrap_err();
        assert!(matches!(err, RankingError::FileNotFound(_)));
    }

    #[test]
    fn test_line_numbers_account_for_header() {
        assert_eq!(RawTable::line_of(0), 2);
    }
}
