//! Qdrant adapter for the search index.
//!
//! Entries and context shards live in separate collections, each with a
//! named dense vector and a named BM25 sparse vector so one point serves
//! both halves of hybrid ranking. Point ids are UUIDv5 digests of the
//! caller's object id, which keeps upserts and deletes idempotent for
//! arbitrary id strings; the original id stays in the payload.

use std::collections::HashMap;

use qdrant_client::{
	Payload, Qdrant,
	qdrant::{
		Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
		DeletePointsBuilder, Direction, Distance, Document, FieldType, Filter, ListValue, Modifier,
		OrderByBuilder, PointStruct, Query, QueryPointsBuilder, ScoredPoint,
		ScrollPointsBuilder, SparseVectorParamsBuilder, SparseVectorsConfigBuilder,
		Struct, UpsertPointsBuilder, Value, VectorParamsBuilder, Vector, VectorsConfigBuilder,
		value::Kind,
	},
};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::{
	BoxFuture, ContextHit, ContextQuery, EntryQuery, Error, LatestContext, Result, SearchHit,
	SearchIndex, blend,
	blend::RankedObject,
	payload,
};

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

/// How many candidates each component query retrieves per requested hit.
/// The two candidate pools rarely overlap fully, so the blend needs slack.
const CANDIDATE_FACTOR: u64 = 4;
/// How many shards the latest-context scroll inspects to break timestamp
/// ties by id.
const LATEST_CONTEXT_WINDOW: u32 = 8;

enum ObjectKind {
	Entry,
	Context,
}

pub struct QdrantIndex {
	pub client: Qdrant,
	pub entries_collection: String,
	pub contexts_collection: String,
	pub vector_dim: u32,
}
impl QdrantIndex {
	pub fn new(cfg: &mycelian_config::Qdrant) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			entries_collection: cfg.entries_collection.clone(),
			contexts_collection: cfg.contexts_collection.clone(),
			vector_dim: cfg.vector_dim,
		})
	}

	pub async fn ensure_collections(&self) -> Result<()> {
		self.ensure_collection(&self.entries_collection, false).await?;
		self.ensure_collection(&self.contexts_collection, true).await?;

		Ok(())
	}

	async fn ensure_collection(&self, collection: &str, timestamp_index: bool) -> Result<()> {
		if self.client.collection_exists(collection).await? {
			return Ok(());
		}

		let mut vectors_config = VectorsConfigBuilder::default();

		vectors_config.add_named_vector_params(
			DENSE_VECTOR_NAME,
			VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
		);

		let mut sparse_vectors_config = SparseVectorsConfigBuilder::default();

		sparse_vectors_config.add_named_vector_params(
			BM25_VECTOR_NAME,
			SparseVectorParamsBuilder::default().modifier(Modifier::Idf as i32),
		);

		self.client
			.create_collection(
				CreateCollectionBuilder::new(collection)
					.vectors_config(vectors_config)
					.sparse_vectors_config(sparse_vectors_config),
			)
			.await?;

		for field in [payload::ACTOR_ID, payload::MEMORY_ID, payload::VAULT_ID] {
			self.client
				.create_field_index(CreateFieldIndexCollectionBuilder::new(
					collection,
					field,
					FieldType::Keyword,
				))
				.await?;
		}

		if timestamp_index {
			// The latest-context scroll orders on this field.
			self.client
				.create_field_index(CreateFieldIndexCollectionBuilder::new(
					collection,
					payload::TIMESTAMP,
					FieldType::Datetime,
				))
				.await?;
		}

		Ok(())
	}

	fn check_dim(&self, vector: &[f32]) -> Result<()> {
		if vector.len() != self.vector_dim as usize {
			return Err(Error::DimensionMismatch {
				expected: self.vector_dim as usize,
				actual: vector.len(),
			});
		}

		Ok(())
	}

	async fn upsert(
		&self,
		kind: ObjectKind,
		id: &str,
		vector: &[f32],
		raw_payload: &Map<String, JsonValue>,
	) -> Result<()> {
		self.check_dim(vector)?;

		let (collection, id_key, text) = match kind {
			ObjectKind::Entry =>
				(&self.entries_collection, payload::ENTRY_ID, payload::entry_text(raw_payload)),
			ObjectKind::Context =>
				(&self.contexts_collection, payload::CONTEXT_ID, payload::context_text(raw_payload)),
		};
		let mut stored = raw_payload.clone();

		stored.entry(id_key).or_insert_with(|| JsonValue::String(id.to_string()));

		let mut payload_map = HashMap::new();

		for (key, value) in stored {
			payload_map.insert(key, Value::from(value));
		}

		let mut vectors = HashMap::new();

		vectors.insert(DENSE_VECTOR_NAME.to_string(), Vector::from(vector.to_vec()));

		if let Some(text) = text {
			vectors
				.insert(BM25_VECTOR_NAME.to_string(), Vector::from(Document::new(text, BM25_MODEL)));
		}

		let point = PointStruct::new(point_id(id), vectors, Payload::from(payload_map));
		let upsert = UpsertPointsBuilder::new(collection.clone(), vec![point]).wait(true);

		self.client.upsert_points(upsert).await?;

		Ok(())
	}

	async fn delete_by_filter(&self, collection: &str, filter: Filter) -> Result<()> {
		let delete = DeletePointsBuilder::new(collection.to_string()).points(filter).wait(true);

		self.client.delete_points(delete).await?;

		Ok(())
	}

	async fn hybrid_candidates(
		&self,
		collection: &str,
		id_key: &str,
		filter: Filter,
		query_text: &str,
		query_vector: &[f32],
		top_k: u32,
		alpha: f32,
	) -> Result<Vec<RankedObject>> {
		self.check_dim(query_vector)?;

		let candidate_limit = (top_k as u64).saturating_mul(CANDIDATE_FACTOR);
		let dense_request = QueryPointsBuilder::new(collection.to_string())
			.query(Query::new_nearest(query_vector.to_vec()))
			.using(DENSE_VECTOR_NAME)
			.filter(filter.clone())
			.with_payload(true)
			.limit(candidate_limit);
		let lexical_request = QueryPointsBuilder::new(collection.to_string())
			.query(Query::new_nearest(Document::new(query_text.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.filter(filter)
			.with_payload(true)
			.limit(candidate_limit);
		let (dense_response, lexical_response) =
			tokio::try_join!(self.client.query(dense_request), self.client.query(lexical_request))?;
		let mut payloads: HashMap<String, Map<String, JsonValue>> = HashMap::new();
		let mut dense_scores = Vec::with_capacity(dense_response.result.len());
		let mut lexical_scores = Vec::with_capacity(lexical_response.result.len());

		for point in &dense_response.result {
			if let Some((id, payload)) = decode_point(point, id_key) {
				dense_scores.push((id.clone(), point.score));
				payloads.entry(id).or_insert(payload);
			}
		}
		for point in &lexical_response.result {
			if let Some((id, payload)) = decode_point(point, id_key) {
				lexical_scores.push((id.clone(), point.score));
				payloads.entry(id).or_insert(payload);
			}
		}

		let combined = blend::combine(dense_scores, lexical_scores, alpha);
		let time_key =
			if id_key == payload::ENTRY_ID { payload::CREATION_TIME } else { payload::TIMESTAMP };
		let mut ranked: Vec<RankedObject> = combined
			.into_iter()
			.filter_map(|(id, score)| {
				let stored = payloads.remove(&id)?;

				Some(RankedObject {
					ordering_time: payload::timestamp_field(&stored, time_key),
					id,
					score,
					payload: stored,
				})
			})
			.collect();

		blend::sort_ranked(&mut ranked);
		ranked.truncate(top_k as usize);

		Ok(ranked)
	}
}

impl SearchIndex for QdrantIndex {
	fn upsert_entry<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		payload: &'a Map<String, JsonValue>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.upsert(ObjectKind::Entry, id, vector, payload))
	}

	fn upsert_context<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		payload: &'a Map<String, JsonValue>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.upsert(ObjectKind::Context, id, vector, payload))
	}

	fn delete_entry<'a>(&'a self, actor_id: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let filter = Filter::all([
				Condition::matches(payload::ACTOR_ID, actor_id.to_string()),
				Condition::matches(payload::ENTRY_ID, id.to_string()),
			]);

			self.delete_by_filter(&self.entries_collection, filter).await
		})
	}

	fn delete_context<'a>(&'a self, actor_id: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let filter = Filter::all([
				Condition::matches(payload::ACTOR_ID, actor_id.to_string()),
				Condition::matches(payload::CONTEXT_ID, id.to_string()),
			]);

			self.delete_by_filter(&self.contexts_collection, filter).await
		})
	}

	fn delete_memory<'a>(
		&'a self,
		actor_id: &'a str,
		memory_id: &'a str,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let filter = scope_filter(actor_id, memory_id);

			self.delete_by_filter(&self.entries_collection, filter.clone()).await?;
			self.delete_by_filter(&self.contexts_collection, filter).await
		})
	}

	fn delete_vault<'a>(
		&'a self,
		actor_id: &'a str,
		vault_id: &'a str,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let filter = Filter::all([
				Condition::matches(payload::ACTOR_ID, actor_id.to_string()),
				Condition::matches(payload::VAULT_ID, vault_id.to_string()),
			]);

			self.delete_by_filter(&self.entries_collection, filter.clone()).await?;
			self.delete_by_filter(&self.contexts_collection, filter).await
		})
	}

	fn search<'a>(&'a self, query: EntryQuery<'a>) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			if query.top_k == 0 {
				return Ok(Vec::new());
			}

			let ranked = self
				.hybrid_candidates(
					&self.entries_collection,
					payload::ENTRY_ID,
					scope_filter(query.actor_id, query.memory_id),
					query.query,
					query.vector,
					query.top_k,
					query.alpha,
				)
				.await?;

			Ok(ranked
				.into_iter()
				.map(|item| {
					payload::entry_hit(&item.id, &item.payload, item.score, query.include_raw_entries)
				})
				.collect())
		})
	}

	fn search_contexts<'a>(
		&'a self,
		query: ContextQuery<'a>,
	) -> BoxFuture<'a, Result<Vec<ContextHit>>> {
		Box::pin(async move {
			let ranked = self
				.hybrid_candidates(
					&self.contexts_collection,
					payload::CONTEXT_ID,
					scope_filter(query.actor_id, query.memory_id),
					query.query,
					query.vector,
					query.top_k,
					query.alpha,
				)
				.await?;

			Ok(ranked
				.into_iter()
				.filter_map(|item| payload::context_hit(&item.payload, item.score))
				.collect())
		})
	}

	fn latest_context<'a>(
		&'a self,
		actor_id: &'a str,
		memory_id: &'a str,
	) -> BoxFuture<'a, Result<Option<LatestContext>>> {
		Box::pin(async move {
			let scroll = ScrollPointsBuilder::new(self.contexts_collection.clone())
				.filter(scope_filter(actor_id, memory_id))
				.order_by(
					OrderByBuilder::new(payload::TIMESTAMP).direction(Direction::Desc as i32),
				)
				.limit(LATEST_CONTEXT_WINDOW)
				.with_payload(true);
			let response = self.client.scroll(scroll).await?;
			let mut latest: Option<(time::OffsetDateTime, String, String)> = None;

			for point in response.result {
				let stored = payload_to_json(&point.payload);
				let Some(timestamp) = payload::timestamp_field(&stored, payload::TIMESTAMP) else {
					continue;
				};
				let context_id =
					payload::string_field(&stored, payload::CONTEXT_ID).unwrap_or_default();
				let context = payload::string_field(&stored, payload::CONTEXT).unwrap_or_default();
				let candidate = (timestamp, context_id, context);

				// Greatest timestamp wins; equal timestamps fall back to the
				// lexicographically greatest shard id.
				if latest
					.as_ref()
					.is_none_or(|current| (&candidate.0, &candidate.1) > (&current.0, &current.1))
				{
					latest = Some(candidate);
				}
			}

			Ok(latest.map(|(timestamp, _, context)| LatestContext { context, timestamp }))
		})
	}
}

fn scope_filter(actor_id: &str, memory_id: &str) -> Filter {
	Filter::all([
		Condition::matches(payload::ACTOR_ID, actor_id.to_string()),
		Condition::matches(payload::MEMORY_ID, memory_id.to_string()),
	])
}

/// Qdrant point ids must be UUIDs or integers; object ids are free-form
/// strings, so derive a stable UUIDv5 from the id.
fn point_id(id: &str) -> String {
	Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string()
}

fn decode_point(point: &ScoredPoint, id_key: &str) -> Option<(String, Map<String, JsonValue>)> {
	let stored = payload_to_json(&point.payload);
	let id = payload::string_field(&stored, id_key)?;

	Some((id, stored))
}

fn payload_to_json(stored: &HashMap<String, Value>) -> Map<String, JsonValue> {
	stored.iter().map(|(key, value)| (key.clone(), value_to_json(value))).collect()
}

fn value_to_json(value: &Value) -> JsonValue {
	match &value.kind {
		Some(Kind::StringValue(value)) => JsonValue::String(value.clone()),
		Some(Kind::IntegerValue(value)) => JsonValue::from(*value),
		Some(Kind::DoubleValue(value)) => JsonValue::from(*value),
		Some(Kind::BoolValue(value)) => JsonValue::Bool(*value),
		Some(Kind::StructValue(Struct { fields })) => JsonValue::Object(
			fields.iter().map(|(key, value)| (key.clone(), value_to_json(value))).collect(),
		),
		Some(Kind::ListValue(ListValue { values })) =>
			JsonValue::Array(values.iter().map(value_to_json).collect()),
		Some(Kind::NullValue(_)) | None => JsonValue::Null,
	}
}
