//! Run orchestration
//!
//! Each operation plans every change with the pure planners against a
//! snapshot the store reads under its write lock, applies the resulting
//! `ChangeSet` in that same transaction and returns a `RunReport`.
//! Structural failures (missing file, unreadable sheet, missing columns)
//! surface before anything is applied.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::cleaner::{clean_rows, CleanOutcome};
use crate::coordinates::{plan_coordinates, CoordinateRecord};
use crate::error::{RankingError, Result};
use crate::headers::{resolve_headers, Canonical};
use crate::heatmap::{build_layers, map_cities, IndicatorRange, MapLayers, UnrankedPolicy};
use crate::model::{CityKey, CityRef, RowDiagnostic, StateRef};
use crate::prune::{plan_duplicates, plan_orphans, plan_unranked, Removal};
use crate::reconcile::{plan_ranking, plan_seed};
use crate::sheet::RawTable;
use crate::store::{planner, ChangeSet, ReferenceStore};

/// Removals listed by name in the summary; the rest are counted.
const LISTED_REMOVALS: usize = 20;

pub const IMPORT_COLUMNS: [Canonical; 3] = [Canonical::Uf, Canonical::Municipio, Canonical::Posicao];
pub const KEY_COLUMNS: [Canonical; 2] = [Canonical::Uf, Canonical::Municipio];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    #[default]
    Import,
    SeedStates,
    PruneOrphans,
    RemoveUnranked,
    Dedupe,
    ImportCoordinates,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Import => "import",
            Operation::SeedStates => "seed-states",
            Operation::PruneOrphans => "prune-orphans",
            Operation::RemoveUnranked => "remove-unranked",
            Operation::Dedupe => "dedupe",
            Operation::ImportCoordinates => "import-coordinates",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Operation::Import => "Import Summary",
            Operation::SeedStates => "State Seed Summary",
            Operation::PruneOrphans => "Orphan Prune Summary",
            Operation::RemoveUnranked => "Unranked Removal Summary",
            Operation::Dedupe => "Duplicate Cleanup Summary",
            Operation::ImportCoordinates => "Coordinate Import Summary",
        }
    }
}

/// Counts and diagnostics of one run. Also stored as the job run detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub operation: Operation,
    /// False for dry runs and unconfirmed destructive previews.
    pub applied: bool,
    pub content_hash: Option<String>,

    pub rows_read: usize,
    pub missing_key_rows: usize,
    pub duplicates_discarded: usize,
    pub malformed_rankings: usize,

    pub states_created: usize,
    pub cities_created: usize,
    pub cities_updated: usize,
    pub cities_unchanged: usize,
    pub skipped_unresolved_state: usize,

    pub removal_candidates: usize,
    pub cities_removed: usize,
    pub removals: Vec<Removal>,

    pub coordinate_records: usize,
    pub coordinates_updated: usize,
    pub skipped_existing: usize,
    pub record_errors: usize,

    pub diagnostics: Vec<RowDiagnostic>,
}

impl RunReport {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            ..Default::default()
        }
    }

    fn absorb_cleaning(&mut self, table: &RawTable, outcome: &CleanOutcome) {
        self.content_hash = Some(table.content_hash.clone());
        self.rows_read = table.rows.len();
        self.missing_key_rows = outcome.missing_key_rows;
        self.duplicates_discarded = outcome.duplicates_discarded;
        self.malformed_rankings = outcome.malformed_rankings;
        self.diagnostics.extend(outcome.diagnostics.iter().cloned());
    }

    fn write_removals(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.applied {
            writeln!(f, "Cities removed: {}", self.cities_removed)?;
        } else {
            writeln!(f, "Cities that would be removed: {}", self.removal_candidates)?;
        }
        for removal in self.removals.iter().take(LISTED_REMOVALS) {
            writeln!(f, "  - {}", removal)?;
        }
        if self.removals.len() > LISTED_REMOVALS {
            writeln!(f, "  ... and {} more", self.removals.len() - LISTED_REMOVALS)?;
        }
        if !self.applied && self.removal_candidates > 0 {
            writeln!(f, "Preview only - re-run with --confirm to delete")?;
        }
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.operation.title())?;
        if let Some(hash) = &self.content_hash {
            writeln!(f, "Hash: {}", hash)?;
        }

        match self.operation {
            Operation::Import => {
                writeln!(f, "Mode: {}", if self.applied { "live" } else { "dry-run" })?;
                writeln!(f, "Rows read: {}", self.rows_read)?;
                writeln!(f, "Rows missing UF/city: {}", self.missing_key_rows)?;
                writeln!(f, "Duplicate rows discarded: {}", self.duplicates_discarded)?;
                writeln!(f, "Malformed rankings (set to 0): {}", self.malformed_rankings)?;
                writeln!(f, "States created: {}", self.states_created)?;
                writeln!(f, "Cities created: {}", self.cities_created)?;
                writeln!(f, "Cities updated: {}", self.cities_updated)?;
                writeln!(f, "Cities unchanged: {}", self.cities_unchanged)?;
                writeln!(f, "Rows skipped (unknown UF): {}", self.skipped_unresolved_state)?;
            }
            Operation::SeedStates => {
                writeln!(f, "States created: {}", self.states_created)?;
            }
            Operation::PruneOrphans => {
                writeln!(f, "Rows read: {}", self.rows_read)?;
                self.write_removals(f)?;
            }
            Operation::RemoveUnranked | Operation::Dedupe => {
                self.write_removals(f)?;
            }
            Operation::ImportCoordinates => {
                writeln!(f, "Records read: {}", self.coordinate_records)?;
                writeln!(f, "Cities updated: {}", self.coordinates_updated)?;
                writeln!(f, "Skipped (already located): {}", self.skipped_existing)?;
                writeln!(f, "Errors: {}", self.record_errors)?;
            }
        }
        Ok(())
    }
}

/// Resolve `required` headers and clean every row.
pub fn clean_table(table: &RawTable, required: &[Canonical]) -> Result<CleanOutcome> {
    let headers = resolve_headers(&table.headers, required)?;
    for field in required {
        if let Some(column) = headers.get(*field) {
            log::debug!("{} -> column {} ('{}')", field.as_str(), column.index, column.header);
        }
    }
    Ok(clean_rows(table, &headers))
}

/// Plan against the store's locked snapshot. The changes are applied in
/// the same transaction when `apply` holds.
async fn plan_locked<S, T, F>(store: &mut S, apply: bool, plan: F) -> Result<(T, bool)>
where
    S: ReferenceStore + ?Sized,
    T: Send,
    F: FnOnce(&[StateRef], &[CityRef]) -> (T, ChangeSet) + Send,
{
    let mut planned = None;
    let applied = store
        .transact(planner(|states, cities| {
            let (value, changes) = plan(states, cities);
            planned = Some(value);
            apply.then_some(changes)
        }))
        .await?;
    match planned {
        Some(value) => Ok((value, applied)),
        None => Err(RankingError::Constraint(
            "store finished without running the planner".to_string(),
        )),
    }
}

/// Create whichever of the 27 UFs are missing.
pub async fn seed_states<S>(store: &mut S) -> Result<RunReport>
where
    S: ReferenceStore + ?Sized,
{
    let mut report = RunReport::new(Operation::SeedStates);
    let (created, applied) = plan_locked(store, true, |states, _| {
        let new_states = plan_seed(states);
        (
            new_states.len(),
            ChangeSet {
                new_states,
                ..Default::default()
            },
        )
    })
    .await?;

    report.states_created = created;
    report.applied = applied;
    log::info!("Seeded {} states", report.states_created);
    Ok(report)
}

/// Clean, reconcile and write rankings from `table`.
///
/// With `dry_run` every count is computed but nothing is written.
pub async fn ingest<S>(store: &mut S, table: &RawTable, dry_run: bool) -> Result<RunReport>
where
    S: ReferenceStore + ?Sized,
{
    let mut report = RunReport::new(Operation::Import);
    let outcome = clean_table(table, &IMPORT_COLUMNS)?;
    report.absorb_cleaning(table, &outcome);
    log::info!(
        "Cleaned {} of {} rows",
        outcome.rows.len(),
        report.rows_read
    );

    let rows = &outcome.rows;
    let (plan, applied) = plan_locked(store, !dry_run, |states, cities| {
        let mut plan = plan_ranking(rows, states, cities);
        let changes = std::mem::take(&mut plan.changes);
        (plan, changes)
    })
    .await?;

    report.states_created = plan.states_created;
    report.cities_created = plan.created;
    report.cities_updated = plan.updated;
    report.cities_unchanged = plan.unchanged;
    report.skipped_unresolved_state = plan.skipped_unresolved_state;
    report.diagnostics.extend(plan.diagnostics);
    report.applied = applied;

    log::info!(
        "Import {}: {} created, {} updated, {} unchanged",
        if report.applied { "applied" } else { "planned" },
        report.cities_created,
        report.cities_updated,
        report.cities_unchanged
    );
    Ok(report)
}

/// Select cities with `select` and delete them when `confirm` holds.
async fn remove_selected<S, F>(
    store: &mut S,
    operation: Operation,
    confirm: bool,
    select: F,
) -> Result<RunReport>
where
    S: ReferenceStore + ?Sized,
    F: FnOnce(&[StateRef], &[CityRef]) -> Vec<Removal> + Send,
{
    let (removals, applied) = plan_locked(store, confirm, |states, cities| {
        let removals = select(states, cities);
        let changes = ChangeSet {
            deletions: removals.iter().map(|r| r.city_id).collect(),
            ..Default::default()
        };
        (removals, changes)
    })
    .await?;

    let mut report = RunReport::new(operation);
    report.removal_candidates = removals.len();
    report.applied = applied;
    if applied {
        report.cities_removed = removals.len();
        log::info!("{}: removed {} cities", operation.as_str(), report.cities_removed);
    } else {
        log::info!(
            "{}: {} candidates, preview only",
            operation.as_str(),
            report.removal_candidates
        );
    }
    report.removals = removals;
    Ok(report)
}

/// Delete cities absent from `table`. Without `confirm`, only lists them.
pub async fn prune_orphans<S>(store: &mut S, table: &RawTable, confirm: bool) -> Result<RunReport>
where
    S: ReferenceStore + ?Sized,
{
    let outcome = clean_table(table, &KEY_COLUMNS)?;
    if outcome.rows.is_empty() {
        return Err(RankingError::EmptySheet(
            "no valid (UF, city) rows; refusing to prune every city".to_string(),
        ));
    }
    let valid: HashSet<CityKey> = outcome.keys().collect();

    let mut report = remove_selected(store, Operation::PruneOrphans, confirm, |states, cities| {
        plan_orphans(&valid, states, cities)
    })
    .await?;
    report.absorb_cleaning(table, &outcome);
    Ok(report)
}

/// Delete cities without a ranking position. Without `confirm`, only lists them.
pub async fn remove_unranked<S>(store: &mut S, confirm: bool) -> Result<RunReport>
where
    S: ReferenceStore + ?Sized,
{
    remove_selected(store, Operation::RemoveUnranked, confirm, plan_unranked).await
}

/// Delete stored duplicates, keeping the lowest id per key.
pub async fn remove_duplicates<S>(store: &mut S, confirm: bool) -> Result<RunReport>
where
    S: ReferenceStore + ?Sized,
{
    remove_selected(store, Operation::Dedupe, confirm, plan_duplicates).await
}

/// Write coordinates for cities that already exist.
pub async fn import_coordinates<S>(
    store: &mut S,
    records: &[CoordinateRecord],
    skip_existing: bool,
) -> Result<RunReport>
where
    S: ReferenceStore + ?Sized,
{
    let mut report = RunReport::new(Operation::ImportCoordinates);

    let (plan, applied) = plan_locked(store, true, |states, cities| {
        let plan = plan_coordinates(records, states, cities, skip_existing);
        let changes = ChangeSet {
            coordinate_updates: plan.updates.clone(),
            ..Default::default()
        };
        (plan, changes)
    })
    .await?;

    report.coordinate_records = plan.total_records;
    report.coordinates_updated = plan.updates.len();
    report.skipped_existing = plan.skipped_existing;
    report.record_errors = plan.errors();
    report.applied = applied;
    Ok(report)
}

/// Weighted map layers for every persisted city. `table`, when given,
/// supplies crime-indicator fallbacks for unranked cities.
pub async fn build_map<S>(
    store: &S,
    table: Option<&RawTable>,
    policy: UnrankedPolicy,
) -> Result<MapLayers>
where
    S: ReferenceStore + ?Sized,
{
    let rows = match table {
        Some(table) => clean_table(table, &KEY_COLUMNS)?.rows,
        None => Vec::new(),
    };
    let indicator_range = IndicatorRange::from_values(rows.iter().filter_map(|r| r.raw_crime_indicator));

    let states = store.states().await?;
    let cities = store.cities().await?;
    let map = map_cities(&states, &cities, &rows);
    Ok(build_layers(&map, indicator_range, policy))
}
