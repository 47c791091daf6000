use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use serde_json::{Map, Value, json};

use mycelian_index::{
	BoxFuture as IndexFuture, ContextHit, ContextQuery, EntryQuery, LatestContext, SearchHit,
	SearchIndex, memory::MemoryIndex,
};
use mycelian_service::{
	BoxFuture, EmbeddingProvider, Error, SearchRequest, SearchService,
};

const DIM: usize = 3;

struct StubEmbedder {
	calls: AtomicUsize,
	fail: bool,
}
impl StubEmbedder {
	fn new() -> Self {
		Self { calls: AtomicUsize::new(0), fail: false }
	}

	fn failing() -> Self {
		Self { calls: AtomicUsize::new(0), fail: true }
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl EmbeddingProvider for StubEmbedder {
	fn embed<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, mycelian_providers::Result<Vec<f32>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if self.fail {
				return Err(mycelian_providers::Error::InvalidResponse {
					message: "boom".to_string(),
				});
			}

			Ok(vec![1.0, 0.0, 0.0])
		})
	}
}

/// Counts index calls while delegating to an in-memory index.
struct SpyIndex {
	inner: MemoryIndex,
	search_calls: AtomicUsize,
	context_search_calls: AtomicUsize,
	latest_calls: AtomicUsize,
}
impl SpyIndex {
	fn new(inner: MemoryIndex) -> Self {
		Self {
			inner,
			search_calls: AtomicUsize::new(0),
			context_search_calls: AtomicUsize::new(0),
			latest_calls: AtomicUsize::new(0),
		}
	}
}

impl SearchIndex for SpyIndex {
	fn upsert_entry<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		payload: &'a Map<String, Value>,
	) -> IndexFuture<'a, mycelian_index::Result<()>> {
		self.inner.upsert_entry(id, vector, payload)
	}

	fn upsert_context<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		payload: &'a Map<String, Value>,
	) -> IndexFuture<'a, mycelian_index::Result<()>> {
		self.inner.upsert_context(id, vector, payload)
	}

	fn delete_entry<'a>(
		&'a self,
		actor_id: &'a str,
		id: &'a str,
	) -> IndexFuture<'a, mycelian_index::Result<()>> {
		self.inner.delete_entry(actor_id, id)
	}

	fn delete_context<'a>(
		&'a self,
		actor_id: &'a str,
		id: &'a str,
	) -> IndexFuture<'a, mycelian_index::Result<()>> {
		self.inner.delete_context(actor_id, id)
	}

	fn delete_memory<'a>(
		&'a self,
		actor_id: &'a str,
		memory_id: &'a str,
	) -> IndexFuture<'a, mycelian_index::Result<()>> {
		self.inner.delete_memory(actor_id, memory_id)
	}

	fn delete_vault<'a>(
		&'a self,
		actor_id: &'a str,
		vault_id: &'a str,
	) -> IndexFuture<'a, mycelian_index::Result<()>> {
		self.inner.delete_vault(actor_id, vault_id)
	}

	fn search<'a>(
		&'a self,
		query: EntryQuery<'a>,
	) -> IndexFuture<'a, mycelian_index::Result<Vec<SearchHit>>> {
		self.search_calls.fetch_add(1, Ordering::SeqCst);
		self.inner.search(query)
	}

	fn search_contexts<'a>(
		&'a self,
		query: ContextQuery<'a>,
	) -> IndexFuture<'a, mycelian_index::Result<Vec<ContextHit>>> {
		self.context_search_calls.fetch_add(1, Ordering::SeqCst);
		self.inner.search_contexts(query)
	}

	fn latest_context<'a>(
		&'a self,
		actor_id: &'a str,
		memory_id: &'a str,
	) -> IndexFuture<'a, mycelian_index::Result<Option<LatestContext>>> {
		self.latest_calls.fetch_add(1, Ordering::SeqCst);
		self.inner.latest_context(actor_id, memory_id)
	}
}

fn object(value: Value) -> Map<String, Value> {
	value.as_object().cloned().expect("payload must be an object")
}

async fn seeded_index() -> MemoryIndex {
	let index = MemoryIndex::new(DIM);
	let entries = [
		("e-1", [1.0, 0.0, 0.0], "hello from the trail", "2025-01-01T00:00:00Z"),
		("e-2", [0.8, 0.2, 0.0], "hello again", "2025-01-02T00:00:00Z"),
		("e-3", [0.0, 1.0, 0.0], "unrelated grocery run", "2025-01-03T00:00:00Z"),
	];

	for (id, vector, summary, creation_time) in entries {
		index
			.upsert_entry(
				id,
				&vector,
				&object(json!({
					"entryId": id,
					"actorId": "actor-1",
					"vaultId": "vault-1",
					"memoryId": "memory-1",
					"summary": summary,
					"rawEntry": format!("raw {summary}"),
					"creationTime": creation_time,
				})),
			)
			.await
			.expect("upsert entry failed");
	}

	let contexts = [
		("c-1", "early snapshot", "2025-01-01T00:00:00Z"),
		("c-2", "latest snapshot", "2025-02-01T00:00:00Z"),
	];

	for (id, context, timestamp) in contexts {
		index
			.upsert_context(
				id,
				&[0.5, 0.5, 0.0],
				&object(json!({
					"contextId": id,
					"actorId": "actor-1",
					"vaultId": "vault-1",
					"memoryId": "memory-1",
					"context": context,
					"timestamp": timestamp,
				})),
			)
			.await
			.expect("upsert context failed");
	}

	index
}

fn request(query: &str) -> SearchRequest {
	SearchRequest {
		memory_id: "memory-1".to_string(),
		query: query.to_string(),
		top_ke: None,
		top_kc: None,
		include_raw_entries: false,
	}
}

#[tokio::test]
async fn defaults_trim_the_query_and_embed_once() {
	let embedder = Arc::new(StubEmbedder::new());
	let index = Arc::new(SpyIndex::new(seeded_index().await));
	let service =
		SearchService::new(embedder.clone(), index.clone(), 0.6).expect("service build failed");
	let response =
		service.search("actor-1", request("  hello  ")).await.expect("search failed");

	assert_eq!(embedder.calls(), 1);
	assert_eq!(index.search_calls.load(Ordering::SeqCst), 1);
	assert_eq!(index.context_search_calls.load(Ordering::SeqCst), 1);
	assert_eq!(index.latest_calls.load(Ordering::SeqCst), 1);
	assert_eq!(response.count, response.entries.len());
	assert!(response.entries.len() <= 5);
	assert_eq!(response.latest_context, "latest snapshot");
	assert!(response.latest_context_timestamp.is_some());
	assert!(response.contexts.len() <= 2);
	assert!(
		response
			.entries
			.windows(2)
			.all(|pair| pair[0].score >= pair[1].score)
	);
	assert!(
		response
			.contexts
			.windows(2)
			.all(|pair| pair[0].score >= pair[1].score)
	);
}

#[tokio::test]
async fn context_only_search_skips_the_entry_index() {
	let embedder = Arc::new(StubEmbedder::new());
	let index = Arc::new(SpyIndex::new(seeded_index().await));
	let service =
		SearchService::new(embedder.clone(), index.clone(), 0.6).expect("service build failed");
	let mut req = request("hi");

	req.top_ke = Some(0);
	req.top_kc = Some(1);

	let response = service.search("actor-1", req).await.expect("search failed");

	assert_eq!(index.search_calls.load(Ordering::SeqCst), 0);
	assert_eq!(index.context_search_calls.load(Ordering::SeqCst), 1);
	assert_eq!(response.count, 0);
	assert!(response.entries.is_empty());
	assert!(response.contexts.len() <= 1);
	assert_eq!(response.latest_context, "latest snapshot");
}

#[tokio::test]
async fn out_of_range_top_ke_fails_before_any_downstream_call() {
	let embedder = Arc::new(StubEmbedder::new());
	let index = Arc::new(SpyIndex::new(MemoryIndex::new(DIM)));
	let service =
		SearchService::new(embedder.clone(), index.clone(), 0.6).expect("service build failed");
	let mut req = request("q");

	req.top_ke = Some(26);

	let err = service.search("actor-1", req).await.expect_err("expected validation error");

	assert!(matches!(err, Error::Validation { .. }));
	assert_eq!(embedder.calls(), 0);
	assert_eq!(index.search_calls.load(Ordering::SeqCst), 0);
	assert_eq!(index.latest_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn top_kc_zero_is_rejected() {
	let embedder = Arc::new(StubEmbedder::new());
	let service = SearchService::new(embedder.clone(), Arc::new(MemoryIndex::new(DIM)), 0.6)
		.expect("service build failed");
	let mut req = request("q");

	req.top_kc = Some(0);

	let err = service.search("actor-1", req).await.expect_err("expected validation error");

	assert!(matches!(err, Error::Validation { .. }));
	assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn missing_memory_id_is_rejected() {
	let service = SearchService::new(
		Arc::new(StubEmbedder::new()),
		Arc::new(MemoryIndex::new(DIM)),
		0.6,
	)
	.expect("service build failed");
	let mut req = request("q");

	req.memory_id = String::new();

	assert!(matches!(
		service.search("actor-1", req).await,
		Err(Error::Validation { .. })
	));
}

#[tokio::test]
async fn whitespace_query_is_rejected() {
	let service = SearchService::new(
		Arc::new(StubEmbedder::new()),
		Arc::new(MemoryIndex::new(DIM)),
		0.6,
	)
	.expect("service build failed");

	assert!(matches!(
		service.search("actor-1", request("   \t\n ")).await,
		Err(Error::Validation { .. })
	));
}

#[tokio::test]
async fn empty_memory_yields_empty_latest_context_not_an_error() {
	let service = SearchService::new(
		Arc::new(StubEmbedder::new()),
		Arc::new(MemoryIndex::new(DIM)),
		0.6,
	)
	.expect("service build failed");
	let response = service.search("actor-1", request("hello")).await.expect("search failed");

	assert_eq!(response.count, 0);
	assert_eq!(response.latest_context, "");
	assert_eq!(response.latest_context_timestamp, None);
	assert!(response.contexts.is_empty());
}

#[tokio::test]
async fn embedding_failure_is_masked_as_unavailable() {
	let service = SearchService::new(
		Arc::new(StubEmbedder::failing()),
		Arc::new(MemoryIndex::new(DIM)),
		0.6,
	)
	.expect("service build failed");
	let err = service.search("actor-1", request("hello")).await.expect_err("expected failure");

	assert!(matches!(err, Error::EmbeddingUnavailable));
	assert_eq!(err.to_string(), "embedding service unavailable");
}

#[tokio::test]
async fn raw_entries_are_included_only_on_request() {
	let index = Arc::new(SpyIndex::new(seeded_index().await));
	let service = SearchService::new(Arc::new(StubEmbedder::new()), index, 0.6)
		.expect("service build failed");
	let mut req = request("hello");

	req.include_raw_entries = true;

	let with_raw = service.search("actor-1", req).await.expect("search failed");

	assert!(with_raw.entries.iter().all(|entry| entry.raw_entry.is_some()));

	let without_raw =
		service.search("actor-1", request("hello")).await.expect("search failed");

	assert!(without_raw.entries.iter().all(|entry| entry.raw_entry.is_none()));
}

#[test]
fn alpha_is_validated_at_construction() {
	let build = |alpha: f32| {
		SearchService::new(
			Arc::new(StubEmbedder::new()),
			Arc::new(MemoryIndex::new(DIM)),
			alpha,
		)
	};

	assert!(build(0.0).is_ok());
	assert!(build(1.0).is_ok());
	assert!(build(1.1).is_err());
	assert!(build(-0.1).is_err());
	assert!(build(f32::NAN).is_err());
}
