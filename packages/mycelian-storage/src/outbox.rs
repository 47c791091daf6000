//! Durable queue of index mutations.
//!
//! Writers enqueue rows in the same transaction as their business write.
//! Workers claim batches with `FOR UPDATE SKIP LOCKED`, so multiple workers
//! never hand the same job to two processors. A claim flips the row to
//! `IN_FLIGHT` and pushes `next_run_at` forward by a lease; if the worker
//! dies mid-job the row becomes claimable again once the lease expires.
//! Completed rows are deleted, dead rows are kept for operators.

use serde_json::{Map, Value};
use sqlx::{PgExecutor, Row};
use time::{Duration, OffsetDateTime};

use crate::{Result, db::Db, models::{OutboxJob, OutboxOp}};

/// Postgres channel notified on enqueue. Workers running with a zero poll
/// interval listen here instead of sleeping.
pub const NOTIFY_CHANNEL: &str = "mycelian_outbox";

/// Inserts one job and notifies listeners in a single statement, so the
/// wakeup rides the caller's transaction and fires on commit.
pub async fn enqueue<'e, E>(
	executor: E,
	op: OutboxOp,
	aggregate_id: &str,
	payload: &Map<String, Value>,
	now: OffsetDateTime,
) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query(
		"\
WITH queued AS (
	INSERT INTO indexing_outbox (op, aggregate_id, payload, status, attempts, next_run_at, created_at, updated_at)
	VALUES ($1, $2, $3, 'PENDING', 0, $4, $4, $4)
	RETURNING id
)
SELECT id, pg_notify($5, '') FROM queued",
	)
	.bind(op.as_str())
	.bind(aggregate_id)
	.bind(Value::Object(payload.clone()))
	.bind(now)
	.bind(NOTIFY_CHANNEL)
	.fetch_one(executor)
	.await?;

	Ok(row.try_get("id")?)
}

/// Atomically claims up to `batch_size` runnable jobs. Runnable means
/// `PENDING` and due, or `IN_FLIGHT` with an expired lease.
pub async fn claim(
	db: &Db,
	now: OffsetDateTime,
	batch_size: u32,
	lease: Duration,
) -> Result<Vec<OutboxJob>> {
	let mut tx = db.pool.begin().await?;
	let jobs: Vec<OutboxJob> = sqlx::query_as(
		"\
SELECT id, op, aggregate_id, payload, attempts
FROM indexing_outbox
WHERE status IN ('PENDING', 'IN_FLIGHT') AND next_run_at <= $1
ORDER BY id ASC
LIMIT $2
FOR UPDATE SKIP LOCKED",
	)
	.bind(now)
	.bind(batch_size as i64)
	.fetch_all(&mut *tx)
	.await?;

	if !jobs.is_empty() {
		let ids: Vec<i64> = jobs.iter().map(|job| job.id).collect();
		let lease_until = now + lease;

		sqlx::query(
			"\
UPDATE indexing_outbox
SET status = 'IN_FLIGHT', next_run_at = $1, updated_at = $2
WHERE id = ANY($3)",
		)
		.bind(lease_until)
		.bind(now)
		.bind(&ids)
		.execute(&mut *tx)
		.await?;
	}

	tx.commit().await?;

	Ok(jobs)
}

/// Removes a durably applied job.
pub async fn complete(db: &Db, id: i64) -> Result<()> {
	sqlx::query("DELETE FROM indexing_outbox WHERE id = $1")
		.bind(id)
		.execute(&db.pool)
		.await?;

	Ok(())
}

pub async fn retry(
	db: &Db,
	id: i64,
	attempts: i32,
	last_error: &str,
	next_run_at: OffsetDateTime,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE indexing_outbox
SET status = 'PENDING', attempts = $1, last_error = $2, next_run_at = $3, updated_at = $4
WHERE id = $5",
	)
	.bind(attempts)
	.bind(last_error)
	.bind(next_run_at)
	.bind(now)
	.bind(id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn mark_dead(
	db: &Db,
	id: i64,
	attempts: i32,
	last_error: &str,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE indexing_outbox
SET status = 'DEAD', attempts = $1, last_error = $2, updated_at = $3
WHERE id = $4",
	)
	.bind(attempts)
	.bind(last_error)
	.bind(now)
	.bind(id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// Jobs not yet applied, dead rows excluded. Exposed for backpressure
/// visibility; the worker logs it periodically.
pub async fn pending_depth(db: &Db) -> Result<i64> {
	let row =
		sqlx::query("SELECT count(*) AS depth FROM indexing_outbox WHERE status <> 'DEAD'")
			.fetch_one(&db.pool)
			.await?;

	Ok(row.try_get("depth")?)
}
