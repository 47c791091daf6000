//! In-memory search index.
//!
//! Used by tests and local development. Ranking follows the same contract
//! as the Qdrant adapter: min-max normalized dense and lexical components
//! combined by `alpha`, with identical tie-breaking.

use std::{
	collections::{BTreeMap, HashSet},
	sync::Mutex,
};

use serde_json::{Map, Value};

use crate::{
	BoxFuture, ContextHit, ContextQuery, EntryQuery, Error, LatestContext, Result, SearchHit,
	SearchIndex, blend,
	blend::RankedObject,
	payload,
};

#[derive(Clone, Debug)]
struct StoredObject {
	vector: Vec<f32>,
	payload: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Inner {
	entries: BTreeMap<String, StoredObject>,
	contexts: BTreeMap<String, StoredObject>,
}

#[derive(Debug)]
pub struct MemoryIndex {
	vector_dim: usize,
	inner: Mutex<Inner>,
}
impl MemoryIndex {
	pub fn new(vector_dim: usize) -> Self {
		Self { vector_dim, inner: Mutex::new(Inner::default()) }
	}

	pub fn entry_count(&self) -> usize {
		self.lock().entries.len()
	}

	pub fn context_count(&self) -> usize {
		self.lock().contexts.len()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn check_dim(&self, vector: &[f32]) -> Result<()> {
		if vector.len() != self.vector_dim {
			return Err(Error::DimensionMismatch {
				expected: self.vector_dim,
				actual: vector.len(),
			});
		}

		Ok(())
	}

	fn ranked_candidates(
		&self,
		contexts: bool,
		actor_id: &str,
		memory_id: &str,
		query_text: &str,
		query_vector: &[f32],
		top_k: u32,
		alpha: f32,
	) -> Result<Vec<RankedObject>> {
		self.check_dim(query_vector)?;

		let query_tokens = tokenize(query_text);
		let inner = self.lock();
		let objects = if contexts { &inner.contexts } else { &inner.entries };
		let mut dense_scores = Vec::new();
		let mut lexical_scores = Vec::new();
		let mut payloads = BTreeMap::new();

		for (id, object) in objects {
			if !in_scope(&object.payload, actor_id, memory_id) {
				continue;
			}

			let text = if contexts {
				payload::context_text(&object.payload)
			} else {
				payload::entry_text(&object.payload)
			};

			dense_scores.push((id.clone(), cosine_similarity(query_vector, &object.vector)));
			lexical_scores
				.push((id.clone(), lexical_overlap(&query_tokens, text.as_deref().unwrap_or(""))));
			payloads.insert(id.clone(), object.payload.clone());
		}

		drop(inner);

		let combined = blend::combine(dense_scores, lexical_scores, alpha);
		let time_key = if contexts { payload::TIMESTAMP } else { payload::CREATION_TIME };
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

impl SearchIndex for MemoryIndex {
	fn upsert_entry<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		raw_payload: &'a Map<String, Value>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.check_dim(vector)?;

			let mut stored = raw_payload.clone();

			stored
				.entry(payload::ENTRY_ID)
				.or_insert_with(|| Value::String(id.to_string()));
			self.lock()
				.entries
				.insert(id.to_string(), StoredObject { vector: vector.to_vec(), payload: stored });

			Ok(())
		})
	}

	fn upsert_context<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		raw_payload: &'a Map<String, Value>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.check_dim(vector)?;

			let mut stored = raw_payload.clone();

			stored
				.entry(payload::CONTEXT_ID)
				.or_insert_with(|| Value::String(id.to_string()));
			self.lock()
				.contexts
				.insert(id.to_string(), StoredObject { vector: vector.to_vec(), payload: stored });

			Ok(())
		})
	}

	fn delete_entry<'a>(&'a self, actor_id: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.lock();

			if inner
				.entries
				.get(id)
				.is_some_and(|object| actor_matches(&object.payload, actor_id))
			{
				inner.entries.remove(id);
			}

			Ok(())
		})
	}

	fn delete_context<'a>(&'a self, actor_id: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.lock();

			if inner
				.contexts
				.get(id)
				.is_some_and(|object| actor_matches(&object.payload, actor_id))
			{
				inner.contexts.remove(id);
			}

			Ok(())
		})
	}

	fn delete_memory<'a>(
		&'a self,
		actor_id: &'a str,
		memory_id: &'a str,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.lock();

			inner.entries.retain(|_, object| !in_scope(&object.payload, actor_id, memory_id));
			inner.contexts.retain(|_, object| !in_scope(&object.payload, actor_id, memory_id));

			Ok(())
		})
	}

	fn delete_vault<'a>(
		&'a self,
		actor_id: &'a str,
		vault_id: &'a str,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let in_vault = |object: &StoredObject| {
				actor_matches(&object.payload, actor_id)
					&& payload::string_field(&object.payload, payload::VAULT_ID).as_deref()
						== Some(vault_id)
			};
			let mut inner = self.lock();

			inner.entries.retain(|_, object| !in_vault(object));
			inner.contexts.retain(|_, object| !in_vault(object));

			Ok(())
		})
	}

	fn search<'a>(&'a self, query: EntryQuery<'a>) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			if query.top_k == 0 {
				return Ok(Vec::new());
			}

			let ranked = self.ranked_candidates(
				false,
				query.actor_id,
				query.memory_id,
				query.query,
				query.vector,
				query.top_k,
				query.alpha,
			)?;

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
			let ranked = self.ranked_candidates(
				true,
				query.actor_id,
				query.memory_id,
				query.query,
				query.vector,
				query.top_k,
				query.alpha,
			)?;

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
			let inner = self.lock();
			let mut latest: Option<(time::OffsetDateTime, String, String)> = None;

			for (id, object) in &inner.contexts {
				if !in_scope(&object.payload, actor_id, memory_id) {
					continue;
				}

				let Some(timestamp) = payload::timestamp_field(&object.payload, payload::TIMESTAMP)
				else {
					continue;
				};
				let context =
					payload::string_field(&object.payload, payload::CONTEXT).unwrap_or_default();
				let candidate = (timestamp, id.clone(), context);

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

fn actor_matches(stored: &Map<String, Value>, actor_id: &str) -> bool {
	payload::string_field(stored, payload::ACTOR_ID).as_deref() == Some(actor_id)
}

fn in_scope(stored: &Map<String, Value>, actor_id: &str, memory_id: &str) -> bool {
	actor_matches(stored, actor_id)
		&& payload::string_field(stored, payload::MEMORY_ID).as_deref() == Some(memory_id)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}

	dot / (norm_a * norm_b)
}

fn tokenize(text: &str) -> HashSet<String> {
	text.split(|c: char| !c.is_alphanumeric())
		.filter(|token| !token.is_empty())
		.map(str::to_lowercase)
		.collect()
}

/// Share of distinct query tokens present in the document.
fn lexical_overlap(query_tokens: &HashSet<String>, text: &str) -> f32 {
	if query_tokens.is_empty() {
		return 0.0;
	}

	let document_tokens = tokenize(text);
	let matched = query_tokens.iter().filter(|token| document_tokens.contains(*token)).count();

	matched as f32 / query_tokens.len() as f32
}
