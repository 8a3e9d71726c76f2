//! Repository for the `workers` lease table.

use livenb_core::lease::{LeaseFilter, LeaseUpdate};
use livenb_core::types::DbId;
use livenb_core::worker_state::{StatusId, WorkerState};
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgPool, Postgres};

use crate::models::worker::Worker;

/// Column list for `workers` queries.
const COLUMNS: &str = "id, session_id, notebook_id, machine_id, state, created_at, updated_at";

/// Conjunctive predicate over [`LeaseFilter`] fields bound as `$1..$6`.
/// A NULL parameter disables its clause.
const FILTER_CLAUSE: &str = "\
    ($1::bigint IS NULL OR notebook_id = $1) \
    AND ($2::text IS NULL OR session_id = $2) \
    AND ($3::text IS NULL OR machine_id = $3) \
    AND ($4::smallint[] IS NULL OR state = ANY($4)) \
    AND ($5::bigint IS NULL OR id < $5) \
    AND ($6::timestamptz IS NULL OR updated_at < $6)";

fn bind_filter<'q>(
    query: QueryAs<'q, Postgres, Worker, PgArguments>,
    filter: &'q LeaseFilter,
) -> QueryAs<'q, Postgres, Worker, PgArguments> {
    let states: Option<Vec<StatusId>> = filter
        .states
        .as_ref()
        .map(|s| s.iter().map(|st| st.id()).collect());
    query
        .bind(filter.notebook_id)
        .bind(filter.session_id.as_deref())
        .bind(filter.machine_id.as_deref())
        .bind(states)
        .bind(filter.id_below)
        .bind(filter.updated_before)
}

pub struct WorkerRepo;

impl WorkerRepo {
    /// Insert a `Queued`, unclaimed lease.
    pub async fn create(
        pool: &PgPool,
        session_id: &str,
        notebook_id: DbId,
    ) -> Result<Worker, sqlx::Error> {
        let query = format!(
            "INSERT INTO workers (session_id, notebook_id, machine_id, state)
             VALUES ($1, $2, '', $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(session_id)
            .bind(notebook_id)
            .bind(WorkerState::Queued.id())
            .fetch_one(pool)
            .await
    }

    /// Find a lease by id, scoped to its (notebook, session).
    pub async fn find(
        pool: &PgPool,
        id: DbId,
        session_id: &str,
        notebook_id: DbId,
    ) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workers
             WHERE id = $1 AND session_id = $2 AND notebook_id = $3"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .bind(session_id)
            .bind(notebook_id)
            .fetch_optional(pool)
            .await
    }

    /// List leases matching `filter`, oldest first.
    pub async fn filter(pool: &PgPool, filter: &LeaseFilter) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE {FILTER_CLAUSE} ORDER BY id ASC");
        bind_filter(sqlx::query_as::<_, Worker>(&query), filter)
            .fetch_all(pool)
            .await
    }

    /// Apply the non-`None` fields of `update` and touch `updated_at`.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        update: &LeaseUpdate,
    ) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!(
            "UPDATE workers SET
                state = COALESCE($2, state),
                machine_id = COALESCE($3, machine_id),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .bind(update.state.map(WorkerState::id))
            .bind(update.machine_id.as_deref())
            .fetch_optional(pool)
            .await
    }

    /// Delete a lease. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every lease matching `filter`, returning the removed rows.
    pub async fn delete_matching(
        pool: &PgPool,
        filter: &LeaseFilter,
    ) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!("DELETE FROM workers WHERE {FILTER_CLAUSE} RETURNING {COLUMNS}");
        bind_filter(sqlx::query_as::<_, Worker>(&query), filter)
            .fetch_all(pool)
            .await
    }
}
