use std::collections::HashMap;

use sqlx::{PgConnection, PgExecutor, Row};
use time::OffsetDateTime;

use crate::{
	Result,
	games,
	models::{EmbeddingJob, JobStatus},
};

/// Terminal failure threshold; a retryable failure at the fifth attempt
/// parks the job in `failed`.
pub const MAX_ATTEMPTS: i32 = 5;

const JOB_COLUMNS: &str =
	"id, position_id, fen, status, attempts, last_error, enqueued_at, started_at, completed_at";

/// Inserts a pending job; silently a no-op when the position already has one.
pub async fn enqueue<'e, E>(executor: E, position_id: i64, fen: &str) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO embedding_jobs (position_id, fen)
VALUES ($1, $2)
ON CONFLICT (position_id) DO NOTHING",
	)
	.bind(position_id)
	.bind(fen)
	.execute(executor)
	.await?;

	Ok(())
}

/// Atomically claims up to `limit` pending jobs, oldest first.
///
/// The locking subselect skips rows other workers hold, so concurrent
/// claimers never observe the same job. Claiming sets `in_progress`, stamps
/// `started_at`, and counts the attempt.
pub async fn claim<'e, E>(executor: E, limit: i64) -> Result<Vec<EmbeddingJob>>
where
	E: PgExecutor<'e>,
{
	Ok(sqlx::query_as::<_, EmbeddingJob>(&format!(
		"\
UPDATE embedding_jobs
SET status = 'in_progress', started_at = now(), attempts = attempts + 1
WHERE id IN (
	SELECT id
	FROM embedding_jobs
	WHERE status = 'pending'
	ORDER BY enqueued_at ASC
	LIMIT $1
	FOR UPDATE SKIP LOCKED
)
RETURNING {JOB_COLUMNS}"
	))
	.bind(limit)
	.fetch_all(executor)
	.await?)
}

/// Settles a finished job and stamps its position's vector reference in the
/// caller's transaction, so invariant "completed job ⇔ embedded position"
/// holds across crashes.
pub async fn complete(
	conn: &mut PgConnection,
	job_id: i64,
	position_id: i64,
	vector_id: &str,
) -> Result<()> {
	sqlx::query(
		"UPDATE embedding_jobs SET status = 'completed', completed_at = now() WHERE id = $1",
	)
	.bind(job_id)
	.execute(&mut *conn)
	.await?;
	games::set_vector_id(conn, position_id, vector_id).await?;

	Ok(())
}

/// Retryable failures re-enter `pending` until the attempt budget is spent;
/// everything else is terminal. Returns the status the job landed in.
pub async fn fail<'e, E>(
	executor: E,
	job_id: i64,
	error: &str,
	retryable: bool,
) -> Result<JobStatus>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query(
		"\
UPDATE embedding_jobs
SET status = CASE WHEN $3 AND attempts < $4 THEN 'pending' ELSE 'failed' END,
	last_error = $2,
	completed_at = CASE WHEN $3 AND attempts < $4 THEN NULL ELSE now() END
WHERE id = $1
RETURNING status",
	)
	.bind(job_id)
	.bind(error)
	.bind(retryable)
	.bind(MAX_ATTEMPTS)
	.fetch_one(executor)
	.await?;
	let status: String = row.try_get("status")?;

	Ok(JobStatus::parse(&status).unwrap_or(JobStatus::Failed))
}

pub async fn count_by_status<'e, E>(executor: E) -> Result<HashMap<JobStatus, i64>>
where
	E: PgExecutor<'e>,
{
	let rows =
		sqlx::query("SELECT status, COUNT(*) AS count FROM embedding_jobs GROUP BY status")
			.fetch_all(executor)
			.await?;
	let mut counts = HashMap::new();

	for row in rows {
		let status: String = row.try_get("status")?;

		if let Some(status) = JobStatus::parse(&status) {
			counts.insert(status, row.try_get("count")?);
		}
	}

	Ok(counts)
}

pub async fn pending_count<'e, E>(executor: E) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query("SELECT COUNT(*) AS count FROM embedding_jobs WHERE status = 'pending'")
		.fetch_one(executor)
		.await?;

	Ok(row.try_get("count")?)
}

/// Flips one batch of pending jobs whose position already carries a vector
/// to `completed`; returns the number of rows affected.
pub async fn prune_completed_against_positions<'e, E>(executor: E, batch: i64) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE embedding_jobs
SET status = 'completed', completed_at = now()
WHERE id IN (
	SELECT j.id
	FROM embedding_jobs j
	JOIN positions p ON p.id = j.position_id
	WHERE j.status = 'pending' AND p.vector_id IS NOT NULL
	LIMIT $1
)",
	)
	.bind(batch)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

/// Janitor pass: anything still `in_progress` past the cutoff belonged to a
/// crashed worker and goes back to `pending`. Safe under concurrent workers;
/// a live claim holds its row lock only for the claim statement, and the
/// cutoff is far beyond any batch's lifetime.
pub async fn reclaim_stalled<'e, E>(executor: E, older_than: OffsetDateTime) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE embedding_jobs
SET status = 'pending', started_at = NULL
WHERE status = 'in_progress' AND started_at < $1",
	)
	.bind(older_than)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}
