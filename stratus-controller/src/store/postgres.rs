//! Postgres job store
//!
//! Transitions are single conditional `UPDATE ... RETURNING` statements,
//! so concurrent controllers sharing a database cannot double-assign a
//! job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use stratus_core::domain::cluster::ClusterId;
use stratus_core::domain::job::{Job, JobState};
use uuid::Uuid;

use super::{JobStore, StoreError, StoreResult};

/// Leases older than this are considered abandoned by a crashed controller
const LEASE_TTL_SECONDS: i64 = 600;

/// `state->>'kind'` values, as serialized from [`JobState`]
const PENDING: &str = "pending";
const ASSIGNED: &str = "assigned";
const COMPLETED: &str = "completed";
const FAILED: &str = "failed";

const COLUMNS: &str = "id, service, payload, state, remote_job_id, pinned, created_at, \
                       assigned_at, started_at, finished_at, attempts, attempted_clusters";

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    /// Explains why a conditional update matched no row
    async fn rejected(&self, id: Uuid, action: &'static str) -> StoreError {
        match self.fetch(id).await {
            Ok(Some(job)) => StoreError::InvalidTransition {
                id,
                action,
                state: job.state,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => e,
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        action: &'static str,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, JobRow, sqlx::postgres::PgArguments>,
    ) -> StoreResult<Job> {
        match query.fetch_optional(&self.pool).await? {
            Some(row) => Job::try_from(row),
            None => Err(self.rejected(id, action).await),
        }
    }
}

fn state_json(state: &JobState) -> StoreResult<serde_json::Value> {
    serde_json::to_value(state).map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: Job) -> StoreResult<()> {
        let clusters: Vec<String> = job
            .attempted_clusters
            .iter()
            .map(|c| c.to_string())
            .collect();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, service, payload, state, assigned_cluster, remote_job_id, pinned,
                              created_at, assigned_at, started_at, finished_at, attempts,
                              attempted_clusters)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(&job.service)
        .bind(&job.payload)
        .bind(state_json(&job.state)?)
        .bind(job.assigned_cluster().map(|c| c.to_string()))
        .bind(job.remote_job_id)
        .bind(job.pinned)
        .bind(job.created_at)
        .bind(job.assigned_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.attempts as i32)
        .bind(clusters)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Job> {
        self.fetch(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, service: Option<&str>) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE ($1::TEXT IS NULL OR service = $1) ORDER BY created_at ASC, id ASC",
            COLUMNS
        ))
        .bind(service)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn delete(&self, id: Uuid) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "DELETE FROM jobs WHERE id = $1 RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()?.ok_or(StoreError::NotFound(id))
    }

    async fn try_lease(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET leased_at = NOW()
            WHERE id = $1
              AND (leased_at IS NULL OR leased_at < NOW() - make_interval(secs => $2))
            "#,
        )
        .bind(id)
        .bind(LEASE_TTL_SECONDS as f64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.fetch(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn release(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET leased_at = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_attempt(&self, id: Uuid, cluster: &ClusterId) -> StoreResult<Job> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1,
                attempted_clusters = array_append(attempted_clusters, $2)
            WHERE id = $1
              AND state->>'kind' = '{PENDING}'
              AND NOT ($2 = ANY(attempted_clusters))
            RETURNING {COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(cluster.to_string());
        self.transition(id, "be attempted", query).await
    }

    async fn assign(
        &self,
        id: Uuid,
        cluster: &ClusterId,
        remote_job_id: Option<Uuid>,
    ) -> StoreResult<Job> {
        let state = state_json(&JobState::Assigned {
            cluster: cluster.clone(),
        })?;
        let sql = format!(
            r#"
            UPDATE jobs
            SET state = $2, assigned_cluster = $3, remote_job_id = $4,
                assigned_at = NOW(), started_at = NULL
            WHERE id = $1 AND state->>'kind' = '{PENDING}'
            RETURNING {COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(state)
            .bind(cluster.to_string())
            .bind(remote_job_id);
        self.transition(id, "be assigned", query).await
    }

    async fn mark_started(&self, id: Uuid) -> StoreResult<Job> {
        let sql = format!(
            r#"
            UPDATE jobs SET started_at = COALESCE(started_at, NOW())
            WHERE id = $1 AND state->>'kind' = '{ASSIGNED}'
            RETURNING {COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, JobRow>(&sql).bind(id);
        self.transition(id, "start", query).await
    }

    async fn finish(&self, id: Uuid, state: JobState) -> StoreResult<Job> {
        if !matches!(state, JobState::Completed | JobState::Failed { .. }) {
            return Err(self.rejected(id, "finish").await);
        }
        let sql = format!(
            r#"
            UPDATE jobs SET state = $2, assigned_cluster = NULL, finished_at = NOW()
            WHERE id = $1 AND state->>'kind' IN ('{PENDING}', '{ASSIGNED}')
            RETURNING {COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(state_json(&state)?);
        self.transition(id, "finish", query).await
    }

    async fn return_to_pending(&self, id: Uuid) -> StoreResult<Job> {
        let state = state_json(&JobState::Pending)?;
        let sql = format!(
            r#"
            UPDATE jobs
            SET state = $2, assigned_cluster = NULL, remote_job_id = NULL, started_at = NULL
            WHERE id = $1 AND state->>'kind' = '{ASSIGNED}'
            RETURNING {COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, JobRow>(&sql).bind(id).bind(state);
        self.transition(id, "return to pending", query).await
    }

    async fn in_flight_by_cluster(&self) -> StoreResult<HashMap<ClusterId, usize>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT assigned_cluster, COUNT(*) FROM jobs
            WHERE assigned_cluster IS NOT NULL
            GROUP BY assigned_cluster
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(cluster, count)| (ClusterId::new(cluster), count.max(0) as usize))
            .collect())
    }

    async fn stalled(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM jobs
            WHERE NOT pinned
              AND state->>'kind' IN ('{PENDING}', '{ASSIGNED}')
              AND started_at IS NULL
              AND COALESCE(assigned_at, created_at) < $1
              AND (leased_at IS NULL OR leased_at < NOW() - make_interval(secs => $2))
            ORDER BY COALESCE(assigned_at, created_at) ASC
            "#
        ))
        .bind(older_than)
        .bind(LEASE_TTL_SECONDS as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn assigned(&self) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM jobs
            WHERE state->>'kind' = '{ASSIGNED}'
              AND (leased_at IS NULL OR leased_at < NOW() - make_interval(secs => $1))
            ORDER BY COALESCE(assigned_at, created_at) ASC
            "#
        ))
        .bind(LEASE_TTL_SECONDS as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn finished_before(&self, before: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM jobs
            WHERE state->>'kind' IN ('{COMPLETED}', '{FAILED}')
              AND finished_at < $1
              AND (leased_at IS NULL OR leased_at < NOW() - make_interval(secs => $2))
            ORDER BY finished_at ASC
            "#
        ))
        .bind(before)
        .bind(LEASE_TTL_SECONDS as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    service: String,
    payload: String,
    state: serde_json::Value,
    remote_job_id: Option<Uuid>,
    pinned: bool,
    created_at: DateTime<Utc>,
    assigned_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    attempts: i32,
    attempted_clusters: Vec<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> StoreResult<Self> {
        let state = serde_json::from_value(row.state)
            .map_err(|e| StoreError::Corrupt(format!("job {}: {}", row.id, e)))?;

        Ok(Job {
            id: row.id,
            service: row.service,
            payload: row.payload,
            state,
            remote_job_id: row.remote_job_id,
            pinned: row.pinned,
            created_at: row.created_at,
            assigned_at: row.assigned_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            attempts: row.attempts.max(0) as u32,
            attempted_clusters: row.attempted_clusters.into_iter().map(ClusterId::new).collect(),
        })
    }
}
