use serde_json::{Map, json};
use time::{Duration, OffsetDateTime};

use mycelian_storage::{db::Db, models::OutboxOp, outbox};

async fn test_db() -> Option<(mycelian_testkit::TestDatabase, Db)> {
	let base_dsn = mycelian_testkit::env_dsn()?;
	let test_db = mycelian_testkit::TestDatabase::new(&base_dsn)
		.await
		.expect("Failed to create test database.");
	let cfg = mycelian_config::Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	Some((test_db, db))
}

fn entry_payload() -> Map<String, serde_json::Value> {
	json!({
		"actorId": "actor-1",
		"vaultId": "vault-1",
		"memoryId": "memory-1",
		"summary": "a summary",
	})
	.as_object()
	.cloned()
	.expect("payload must be an object")
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MYCELIAN_PG_DSN to run."]
async fn claim_is_exclusive_within_the_lease() {
	let Some((test_db, db)) = test_db().await else {
		eprintln!("Skipping claim_is_exclusive_within_the_lease; set MYCELIAN_PG_DSN to run.");
		return;
	};
	let now = OffsetDateTime::now_utc();
	let id = outbox::enqueue(&db.pool, OutboxOp::UpsertEntry, "entry-1", &entry_payload(), now)
		.await
		.expect("Failed to enqueue.");

	let claimed =
		outbox::claim(&db, now, 10, Duration::seconds(30)).await.expect("Failed to claim.");

	assert_eq!(claimed.len(), 1);
	assert_eq!(claimed[0].id, id);
	assert_eq!(claimed[0].op, "upsert_entry");
	assert_eq!(claimed[0].aggregate_id, "entry-1");
	assert_eq!(claimed[0].attempts, 0);

	// The lease keeps the job invisible to a second claimer.
	let reclaimed =
		outbox::claim(&db, now, 10, Duration::seconds(30)).await.expect("Failed to re-claim.");

	assert!(reclaimed.is_empty());

	// An expired lease makes the job claimable again.
	let later = now + Duration::seconds(60);
	let reclaimed =
		outbox::claim(&db, later, 10, Duration::seconds(30)).await.expect("Failed to re-claim.");

	assert_eq!(reclaimed.len(), 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MYCELIAN_PG_DSN to run."]
async fn retry_defers_until_next_run_at() {
	let Some((test_db, db)) = test_db().await else {
		eprintln!("Skipping retry_defers_until_next_run_at; set MYCELIAN_PG_DSN to run.");
		return;
	};
	let now = OffsetDateTime::now_utc();
	let id = outbox::enqueue(&db.pool, OutboxOp::UpsertEntry, "entry-1", &entry_payload(), now)
		.await
		.expect("Failed to enqueue.");
	let claimed =
		outbox::claim(&db, now, 10, Duration::seconds(30)).await.expect("Failed to claim.");

	assert_eq!(claimed.len(), 1);

	let next_run_at = now + Duration::seconds(10);

	outbox::retry(&db, id, 1, "embedding timeout", next_run_at, now)
		.await
		.expect("Failed to retry.");

	let early = outbox::claim(&db, now + Duration::seconds(5), 10, Duration::seconds(30))
		.await
		.expect("Failed to claim early.");

	assert!(early.is_empty());

	let due = outbox::claim(&db, now + Duration::seconds(11), 10, Duration::seconds(30))
		.await
		.expect("Failed to claim when due.");

	assert_eq!(due.len(), 1);
	assert_eq!(due[0].attempts, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set MYCELIAN_PG_DSN to run."]
async fn complete_removes_and_dead_retains() {
	let Some((test_db, db)) = test_db().await else {
		eprintln!("Skipping complete_removes_and_dead_retains; set MYCELIAN_PG_DSN to run.");
		return;
	};
	let now = OffsetDateTime::now_utc();
	let done_id = outbox::enqueue(&db.pool, OutboxOp::UpsertEntry, "entry-1", &entry_payload(), now)
		.await
		.expect("Failed to enqueue.");
	let dead_id = outbox::enqueue(&db.pool, OutboxOp::DeleteEntry, "entry-2", &entry_payload(), now)
		.await
		.expect("Failed to enqueue.");

	assert_eq!(outbox::pending_depth(&db).await.expect("Failed to read depth."), 2);

	outbox::complete(&db, done_id).await.expect("Failed to complete.");
	outbox::mark_dead(&db, dead_id, 5, "unknown op", now).await.expect("Failed to mark dead.");

	// Dead rows stay for operators but no longer count as pending work.
	assert_eq!(outbox::pending_depth(&db).await.expect("Failed to read depth."), 0);

	let claimable = outbox::claim(&db, now + Duration::seconds(120), 10, Duration::seconds(30))
		.await
		.expect("Failed to claim.");

	assert!(claimable.is_empty());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
