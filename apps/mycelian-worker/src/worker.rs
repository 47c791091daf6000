//! Outbox worker: drives the durable queue of index mutations to
//! quiescence.
//!
//! Each loop claims a batch, processes the jobs sequentially, and updates
//! their state. Jobs succeed, retry with exponential backoff, or go dead:
//! unknown ops and deletes without an actor can never succeed and die
//! immediately, everything else retries until `max_attempts`. Index
//! "already exists" conflicts count as success, which keeps the pipeline
//! safe under at-least-once delivery.

use std::{sync::Arc, time::Duration as StdDuration};

use color_eyre::Result;
use serde_json::{Map, Value};
use sqlx::postgres::PgListener;
use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use mycelian_index::{SearchIndex, payload};
use mycelian_service::EmbeddingProvider;
use mycelian_storage::{
	db::Db,
	models::{OutboxJob, OutboxOp},
	outbox,
};

/// A missed notification must not wedge a zero-interval worker.
const NOTIFY_FALLBACK: StdDuration = StdDuration::from_secs(30);
const DEPTH_LOG_INTERVAL_SECONDS: i64 = 30;
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
	pub batch_size: u32,
	pub interval: StdDuration,
	pub max_attempts: u32,
	pub base_backoff_ms: u64,
	pub max_backoff_ms: u64,
	pub lease: Duration,
}
impl From<&mycelian_config::Outbox> for WorkerConfig {
	fn from(cfg: &mycelian_config::Outbox) -> Self {
		Self {
			batch_size: cfg.batch_size,
			interval: StdDuration::from_millis(cfg.interval_ms),
			max_attempts: cfg.max_attempts,
			base_backoff_ms: cfg.base_backoff_ms,
			max_backoff_ms: cfg.max_backoff_ms,
			lease: Duration::seconds(cfg.lease_seconds as i64),
		}
	}
}

#[derive(Debug)]
enum HandleError {
	/// Can never succeed; the job goes dead without further retries.
	Permanent(String),
	/// Worth retrying with backoff.
	Retry(String),
}

enum UpsertKind {
	Entry,
	Context,
}

/// Per-job dispatch, separated from the polling loop so it can be exercised
/// without a database.
struct Dispatcher {
	embedder: Arc<dyn EmbeddingProvider>,
	index: Arc<dyn SearchIndex>,
}
impl Dispatcher {
	async fn handle(&self, job: &OutboxJob) -> Result<(), HandleError> {
		let Some(op) = OutboxOp::parse(&job.op) else {
			return Err(HandleError::Permanent(format!("unknown op: {:?}", job.op)));
		};
		let job_payload = job.payload.as_object().cloned().unwrap_or_default();

		match op {
			OutboxOp::UpsertEntry =>
				self.upsert(job, &job_payload, &[payload::SUMMARY, payload::RAW_ENTRY], UpsertKind::Entry)
					.await,
			OutboxOp::UpsertContext =>
				self.upsert(job, &job_payload, &[payload::CONTEXT], UpsertKind::Context).await,
			OutboxOp::DeleteEntry => {
				let actor_id = required_actor(&job_payload)?;

				finish(self.index.delete_entry(&actor_id, &job.aggregate_id).await)
			},
			OutboxOp::DeleteContext => {
				let actor_id = required_actor(&job_payload)?;

				finish(self.index.delete_context(&actor_id, &job.aggregate_id).await)
			},
			OutboxOp::DeleteMemory => {
				let actor_id = required_actor(&job_payload)?;

				finish(self.index.delete_memory(&actor_id, &job.aggregate_id).await)
			},
			OutboxOp::DeleteVault => {
				let actor_id = required_actor(&job_payload)?;

				finish(self.index.delete_vault(&actor_id, &job.aggregate_id).await)
			},
		}
	}

	async fn upsert(
		&self,
		job: &OutboxJob,
		job_payload: &Map<String, Value>,
		keys: &[&str],
		kind: UpsertKind,
	) -> Result<(), HandleError> {
		// Empty text would poison the index with meaningless vectors, and
		// retrying cannot make it non-empty. No-op success.
		let Some(text) = preferred_text(job_payload, keys) else {
			info!(outbox_id = job.id, op = %job.op, "No indexable text in payload; marking done.");

			return Ok(());
		};
		let vector = self
			.embedder
			.embed(&text)
			.await
			.map_err(|err| HandleError::Retry(err.to_string()))?;
		// The raw outbox payload goes to the index untransformed.
		let result = match kind {
			UpsertKind::Entry =>
				self.index.upsert_entry(&job.aggregate_id, &vector, job_payload).await,
			UpsertKind::Context =>
				self.index.upsert_context(&job.aggregate_id, &vector, job_payload).await,
		};

		finish(result)
	}
}

fn finish(result: mycelian_index::Result<()>) -> Result<(), HandleError> {
	match result {
		Ok(()) => Ok(()),
		// The object is already in the desired state.
		Err(err) if is_already_exists(&err.to_string()) => Ok(()),
		Err(err) => Err(HandleError::Retry(err.to_string())),
	}
}

fn required_actor(job_payload: &Map<String, Value>) -> Result<String, HandleError> {
	payload::string_field(job_payload, payload::ACTOR_ID)
		.filter(|actor_id| !actor_id.is_empty())
		.ok_or_else(|| HandleError::Permanent("delete job is missing actorId".to_string()))
}

/// First value that exists, is a string, and is non-empty after trimming.
fn preferred_text(job_payload: &Map<String, Value>, keys: &[&str]) -> Option<String> {
	keys.iter().find_map(|key| {
		job_payload
			.get(*key)
			.and_then(Value::as_str)
			.filter(|value| !value.trim().is_empty())
			.map(str::to_string)
	})
}

/// Case-sensitive on purpose: these substrings match upstream messages
/// exactly.
fn is_already_exists(message: &str) -> bool {
	message.contains("already exists") || message.contains("status code: 422")
}

fn backoff_for_attempt(cfg: &WorkerConfig, attempt: i32, job_id: i64) -> Duration {
	let attempt = attempt.max(1) as u32;
	let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
	let base = cfg.base_backoff_ms.saturating_mul(1 << exp);
	let capped = base.min(cfg.max_backoff_ms);
	// Deterministic jitter from the job id spreads a failed batch's retries
	// without a PRNG.
	let jitter = (job_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) % (cfg.base_backoff_ms / 2 + 1);

	Duration::milliseconds(capped.saturating_add(jitter).min(cfg.max_backoff_ms) as i64)
}

pub struct Worker {
	db: Db,
	dispatcher: Dispatcher,
	cfg: WorkerConfig,
}
impl Worker {
	pub fn new(
		db: Db,
		embedder: Arc<dyn EmbeddingProvider>,
		index: Arc<dyn SearchIndex>,
		cfg: WorkerConfig,
	) -> Self {
		Self { db, dispatcher: Dispatcher { embedder, index }, cfg }
	}

	pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
		let mut listener = if self.cfg.interval.is_zero() {
			let mut listener = PgListener::connect_with(&self.db.pool).await?;

			listener.listen(outbox::NOTIFY_CHANNEL).await?;

			Some(listener)
		} else {
			None
		};
		let mut last_depth_log = OffsetDateTime::now_utc();

		loop {
			if *shutdown.borrow() {
				break;
			}

			let now = OffsetDateTime::now_utc();
			let batch =
				match outbox::claim(&self.db, now, self.cfg.batch_size, self.cfg.lease).await {
					Ok(batch) => batch,
					Err(err) => {
						error!(error = %err, "Outbox claim failed.");
						tokio::time::sleep(StdDuration::from_millis(self.cfg.base_backoff_ms))
							.await;

						continue;
					},
				};
			let claimed = batch.len();

			debug!(claimed, "Outbox batch claimed.");

			for job in batch {
				// Stop is cooperative between jobs; an in-flight job is
				// reclaimed via its lease after a crash.
				if *shutdown.borrow() {
					break;
				}

				self.process(job).await;
			}

			let now = OffsetDateTime::now_utc();

			if now - last_depth_log >= Duration::seconds(DEPTH_LOG_INTERVAL_SECONDS) {
				match outbox::pending_depth(&self.db).await {
					Ok(depth) => {
						info!(depth, "Outbox queue depth.");

						last_depth_log = now;
					},
					Err(err) => warn!(error = %err, "Outbox depth query failed."),
				}
			}

			// A full batch means more work is likely waiting.
			if claimed as u32 == self.cfg.batch_size {
				continue;
			}

			wait_for_work(&mut shutdown, listener.as_mut(), self.cfg.interval).await;
		}

		info!("Outbox worker stopped.");

		Ok(())
	}

	async fn process(&self, job: OutboxJob) {
		let now = OffsetDateTime::now_utc();

		match self.dispatcher.handle(&job).await {
			Ok(()) =>
				if let Err(err) = outbox::complete(&self.db, job.id).await {
					error!(error = %err, outbox_id = job.id, "Failed to complete outbox job.");
				},
			Err(HandleError::Permanent(message)) => {
				error!(outbox_id = job.id, op = %job.op, error = %message, "Outbox job failed permanently; marking dead.");

				let attempts = job.attempts.saturating_add(1);

				if let Err(err) = outbox::mark_dead(&self.db, job.id, attempts, &message, now).await
				{
					error!(error = %err, outbox_id = job.id, "Failed to mark outbox job dead.");
				}
			},
			Err(HandleError::Retry(message)) => {
				let attempts = job.attempts.saturating_add(1);

				if attempts >= self.cfg.max_attempts as i32 {
					error!(outbox_id = job.id, attempts, error = %message, "Outbox job exhausted retries; marking dead.");

					if let Err(err) =
						outbox::mark_dead(&self.db, job.id, attempts, &message, now).await
					{
						error!(error = %err, outbox_id = job.id, "Failed to mark outbox job dead.");
					}
				} else {
					let backoff = backoff_for_attempt(&self.cfg, attempts, job.id);

					warn!(outbox_id = job.id, attempts, error = %message, "Outbox job failed; scheduling retry.");

					if let Err(err) =
						outbox::retry(&self.db, job.id, attempts, &message, now + backoff, now)
							.await
					{
						error!(error = %err, outbox_id = job.id, "Failed to reschedule outbox job.");
					}
				}
			},
		}
	}
}

async fn wait_for_work(
	shutdown: &mut watch::Receiver<bool>,
	listener: Option<&mut PgListener>,
	interval: StdDuration,
) {
	match listener {
		Some(listener) => {
			tokio::select! {
				_ = shutdown.changed() => {},
				result = tokio::time::timeout(NOTIFY_FALLBACK, listener.recv()) => {
					if let Ok(Err(err)) = result {
						warn!(error = %err, "Outbox listener failed; falling back to polling.");
						tokio::time::sleep(StdDuration::from_secs(1)).await;
					}
				},
			}
		},
		None => {
			tokio::select! {
				_ = shutdown.changed() => {},
				_ = tokio::time::sleep(interval) => {},
			}
		},
	}
}
