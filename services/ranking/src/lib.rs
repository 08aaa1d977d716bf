//! Ranking - Crime ranking ingestion and heat-map weighting
//!
//! Responsibilities:
//! - Read the crime-ranking spreadsheet (XLSX/XLS/ODS/CSV)
//! - Resolve accented/varied headers to canonical columns
//! - Clean and deduplicate rows by (UF, Municipio)
//! - Reconcile rows against the state/city reference table
//! - Prune cities no longer present in the spreadsheet (explicit only)
//! - Compute normalized heat-map weights and colour buckets
//!
//! Every mutating operation is planned against a snapshot of the
//! reference table and applied as ONE `ChangeSet`, so a run either
//! lands completely or not at all.

pub mod cleaner;
pub mod coordinates;
pub mod error;
pub mod headers;
pub mod heatmap;
pub mod model;
pub mod pg;
pub mod pipeline;
pub mod prune;
pub mod reconcile;
pub mod seed;
pub mod sheet;
pub mod store;

pub use error::{MissingColumnsError, RankingError, Result};
pub use model::{match_key, CityKey, CityRef, SpreadsheetRow, StateRef};
pub use pipeline::RunReport;
pub use store::{ChangeSet, MemoryStore, ReferenceStore};
