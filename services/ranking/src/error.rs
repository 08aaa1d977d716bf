use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::headers::Canonical;

pub type Result<T, E = RankingError> = std::result::Result<T, E>;

/// Structural failures. Any of these aborts a run before a single write.
#[derive(Debug, Error)]
pub enum RankingError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable spreadsheet: {0}")]
    Sheet(#[from] calamine::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unsupported spreadsheet format: {0}")]
    UnsupportedFormat(String),

    #[error("spreadsheet has no data: {0}")]
    EmptySheet(String),

    #[error("state not found in reference table: {0}")]
    UnknownState(String),

    #[error("reference table constraint violated: {0}")]
    Constraint(String),

    #[error(transparent)]
    MissingColumns(#[from] MissingColumnsError),
}

/// Required canonical columns that no header resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct MissingColumnsError {
    pub missing: Vec<Canonical>,
    /// Headers exactly as found in the file, for diagnostics.
    pub found: Vec<String>,
}

impl fmt::Display for MissingColumnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let missing: Vec<&str> = self.missing.iter().map(|c| c.as_str()).collect();
        write!(
            f,
            "missing required columns: [{}]; available columns: {:?}",
            missing.join(", "),
            self.found
        )
    }
}
