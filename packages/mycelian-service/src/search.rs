use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{EmbeddingProvider, Error, Result};
use mycelian_index::{ContextQuery, EntryQuery, SearchHit, SearchIndex};

pub const DEFAULT_TOP_KE: i32 = 5;
pub const MAX_TOP_KE: i32 = 25;
pub const DEFAULT_TOP_KC: i32 = 2;
pub const MIN_TOP_KC: i32 = 1;
pub const MAX_TOP_KC: i32 = 10;

/// Body of `POST /v0/search`. Intentionally small; future versions may add
/// filters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRequest {
	#[serde(rename = "memoryId")]
	pub memory_id: String,
	pub query: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_ke: Option<i32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_kc: Option<i32>,
	#[serde(default)]
	pub include_raw_entries: bool,
}
impl SearchRequest {
	fn validate(self) -> Result<ValidRequest> {
		let query = self.query.trim().to_string();

		if self.memory_id.is_empty() {
			return Err(Error::Validation { message: "memoryId is required".to_string() });
		}
		if query.is_empty() {
			return Err(Error::Validation { message: "query cannot be empty".to_string() });
		}

		let top_ke = self.top_ke.unwrap_or(DEFAULT_TOP_KE);
		let top_kc = self.top_kc.unwrap_or(DEFAULT_TOP_KC);

		if !(0..=MAX_TOP_KE).contains(&top_ke) {
			return Err(Error::Validation {
				message: format!("top_ke must be between 0 and {MAX_TOP_KE}"),
			});
		}
		if !(MIN_TOP_KC..=MAX_TOP_KC).contains(&top_kc) {
			return Err(Error::Validation {
				message: format!("top_kc must be between {MIN_TOP_KC} and {MAX_TOP_KC}"),
			});
		}

		Ok(ValidRequest {
			memory_id: self.memory_id,
			query,
			top_ke: top_ke as u32,
			top_kc: top_kc as u32,
			include_raw_entries: self.include_raw_entries,
		})
	}
}

#[derive(Clone, Debug)]
struct ValidRequest {
	memory_id: String,
	query: String,
	top_ke: u32,
	top_kc: u32,
	include_raw_entries: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextItem {
	pub context: String,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	pub score: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
	pub entries: Vec<SearchHit>,
	pub count: usize,
	/// Empty string when the memory has no context shards yet.
	#[serde(rename = "latestContext")]
	pub latest_context: String,
	#[serde(rename = "latestContextTimestamp", with = "time::serde::rfc3339::option", default)]
	pub latest_context_timestamp: Option<OffsetDateTime>,
	pub contexts: Vec<ContextItem>,
}

/// Stateless search handler: validates and defaults the request, embeds the
/// query once, fans out to the index, and assembles one consistent
/// response. There is no partial success.
pub struct SearchService {
	embedder: Arc<dyn EmbeddingProvider>,
	index: Arc<dyn SearchIndex>,
	alpha: f32,
}
impl SearchService {
	pub fn new(
		embedder: Arc<dyn EmbeddingProvider>,
		index: Arc<dyn SearchIndex>,
		alpha: f32,
	) -> Result<Self> {
		if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
			return Err(Error::Validation {
				message: format!("alpha parameter must be in the range [0.0, 1.0], got {alpha}"),
			});
		}

		Ok(Self { embedder, index, alpha })
	}

	pub async fn search(&self, actor_id: &str, request: SearchRequest) -> Result<SearchResponse> {
		let request = request.validate()?;

		tracing::info!(
			memory_id = %request.memory_id,
			query = %request.query,
			top_ke = request.top_ke,
			top_kc = request.top_kc,
			actor_id = %actor_id,
			"Search request received."
		);

		let vector = self.embedder.embed(&request.query).await.map_err(|err| {
			tracing::error!(error = %err, query = %request.query, "Embedding failed.");

			Error::EmbeddingUnavailable
		})?;

		tracing::debug!(vector_length = vector.len(), "Embedding generated.");

		let entries = if request.top_ke > 0 {
			self.index
				.search(EntryQuery {
					actor_id,
					memory_id: &request.memory_id,
					query: &request.query,
					vector: &vector,
					top_k: request.top_ke,
					alpha: self.alpha,
					include_raw_entries: request.include_raw_entries,
				})
				.await
				.map_err(|err| {
					tracing::error!(error = %err, memory_id = %request.memory_id, "Entry search failed.");

					Error::SearchUnavailable
				})?
		} else {
			Vec::new()
		};

		tracing::info!(hit_count = entries.len(), memory_id = %request.memory_id, "Search completed.");

		// The latest shard is returned regardless of ranking, so callers can
		// always ground themselves on the newest snapshot.
		let latest = self.index.latest_context(actor_id, &request.memory_id).await.map_err(|err| {
			tracing::error!(error = %err, memory_id = %request.memory_id, "Latest context fetch failed.");

			Error::LatestContextUnavailable
		})?;
		let context_hits = self
			.index
			.search_contexts(ContextQuery {
				actor_id,
				memory_id: &request.memory_id,
				query: &request.query,
				vector: &vector,
				top_k: request.top_kc,
				alpha: self.alpha,
			})
			.await
			.map_err(|err| {
				tracing::error!(error = %err, memory_id = %request.memory_id, "Context search failed.");

				Error::ContextSearchUnavailable
			})?;
		let (latest_context, latest_context_timestamp) = match latest {
			Some(latest) => (latest.context, Some(latest.timestamp)),
			None => (String::new(), None),
		};

		Ok(SearchResponse {
			count: entries.len(),
			entries,
			latest_context,
			latest_context_timestamp,
			contexts: context_hits
				.into_iter()
				.map(|hit| ContextItem {
					context: hit.context,
					timestamp: hit.timestamp,
					score: hit.score,
				})
				.collect(),
		})
	}
}
