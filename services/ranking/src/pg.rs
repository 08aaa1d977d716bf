//! Postgres reference store
//!
//! `transact` takes a transaction-level advisory lock, reads the snapshot
//! and writes the planned changes in that one transaction, so overlapping
//! runs are serialized and a failed run leaves no partial writes.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{RankingError, Result};
use crate::model::{match_key, CityRef, StateRef};
use crate::store::{ChangeSet, Planner, ReferenceStore};

const SCHEMA: &str = include_str!("../../../migrations/0001_reference.sql");

/// Advisory lock key shared by every writer of the reference tables.
const REFERENCE_LOCK_KEY: i64 = 0x5AFE_C17E;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Register a running job for auditing.
    pub async fn create_job_run(&self, component: &str, source_id: Option<&str>) -> Result<Uuid> {
        let job_run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO job_runs (job_run_id, component, source_id, status, detail)
            VALUES ($1, $2, $3, 'running', '{}')
            "#,
        )
        .bind(job_run_id)
        .bind(component)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(job_run_id)
    }

    /// Close a job run with its final status and report.
    pub async fn finish_job_run(
        &self,
        job_run_id: Uuid,
        status: &str,
        error: Option<&str>,
        detail: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_runs
            SET finished_at = now(), status = $2, error = $3, detail = detail || $4
            WHERE job_run_id = $1
            "#,
        )
        .bind(job_run_id)
        .bind(status)
        .bind(error)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const STATES_SQL: &str = "SELECT state_id, name, abbreviation FROM states ORDER BY state_id";

const CITIES_SQL: &str = r#"
    SELECT city_id, name, state_id, ranking_position, latitude, longitude
    FROM cities
    ORDER BY city_id
"#;

/// Begin a transaction holding the reference write lock.
async fn locked(pool: &PgPool) -> Result<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(REFERENCE_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

fn vanished(city_id: i32) -> RankingError {
    RankingError::Constraint(format!("city {city_id} no longer exists"))
}

/// Write `changes` on `conn`. Every targeted city must still exist.
async fn write_changes(conn: &mut PgConnection, changes: &ChangeSet) -> Result<()> {
    for state in &changes.new_states {
        sqlx::query(
            "INSERT INTO states (name, abbreviation) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(&state.name)
        .bind(&state.abbreviation)
        .execute(&mut *conn)
        .await?;
    }

    if !changes.new_cities.is_empty() {
        let state_ids: HashMap<String, i32> =
            sqlx::query_as::<_, (i32, String)>("SELECT state_id, abbreviation FROM states")
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .map(|(id, abbreviation)| (match_key(&abbreviation), id))
                .collect();

        for city in &changes.new_cities {
            let state_id = state_ids
                .get(&match_key(&city.state_abbreviation))
                .ok_or_else(|| RankingError::UnknownState(city.state_abbreviation.clone()))?;

            sqlx::query(
                "INSERT INTO cities (name, state_id, ranking_position) VALUES ($1, $2, $3)",
            )
            .bind(&city.name)
            .bind(state_id)
            .bind(city.ranking_position)
            .execute(&mut *conn)
            .await?;
        }
    }

    for update in &changes.ranking_updates {
        let result = sqlx::query("UPDATE cities SET ranking_position = $2 WHERE city_id = $1")
            .bind(update.city_id)
            .bind(update.ranking_position)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(vanished(update.city_id));
        }
    }

    for update in &changes.coordinate_updates {
        let result =
            sqlx::query("UPDATE cities SET latitude = $2, longitude = $3 WHERE city_id = $1")
                .bind(update.city_id)
                .bind(update.latitude)
                .bind(update.longitude)
                .execute(&mut *conn)
                .await?;
        if result.rows_affected() == 0 {
            return Err(vanished(update.city_id));
        }
    }

    if !changes.deletions.is_empty() {
        let deleted: Vec<i32> =
            sqlx::query_scalar("DELETE FROM cities WHERE city_id = ANY($1) RETURNING city_id")
                .bind(&changes.deletions)
                .fetch_all(&mut *conn)
                .await?;
        if let Some(missing) = changes.deletions.iter().find(|id| !deleted.contains(id)) {
            return Err(vanished(*missing));
        }
    }

    Ok(())
}

#[async_trait]
impl ReferenceStore for PgStore {
    async fn states(&self) -> Result<Vec<StateRef>> {
        let states = sqlx::query_as::<_, StateRef>(STATES_SQL)
            .fetch_all(&self.pool)
            .await?;
        Ok(states)
    }

    async fn cities(&self) -> Result<Vec<CityRef>> {
        let cities = sqlx::query_as::<_, CityRef>(CITIES_SQL)
            .fetch_all(&self.pool)
            .await?;
        Ok(cities)
    }

    async fn apply(&mut self, changes: &ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        // Dropping `tx` on any early return rolls everything back.
        let mut tx = locked(&self.pool).await?;
        write_changes(&mut *tx, changes).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn transact(&mut self, plan: Planner<'_>) -> Result<bool> {
        let mut tx = locked(&self.pool).await?;

        // Read after the lock so the snapshot includes every earlier commit.
        let states = sqlx::query_as::<_, StateRef>(STATES_SQL)
            .fetch_all(&mut *tx)
            .await?;
        let cities = sqlx::query_as::<_, CityRef>(CITIES_SQL)
            .fetch_all(&mut *tx)
            .await?;

        let Some(changes) = plan(&states, &cities) else {
            tx.rollback().await?;
            return Ok(false);
        };
        if !changes.is_empty() {
            write_changes(&mut *tx, &changes).await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}
