pub mod blend;
pub mod memory;
pub mod payload;
pub mod qdrant;

mod error;

pub use error::{Error, Result};

use std::{collections::BTreeMap, future::Future, pin::Pin};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters for a hybrid entry search, scoped to one `(actor, memory)`.
#[derive(Clone, Copy, Debug)]
pub struct EntryQuery<'a> {
	pub actor_id: &'a str,
	pub memory_id: &'a str,
	pub query: &'a str,
	pub vector: &'a [f32],
	pub top_k: u32,
	pub alpha: f32,
	pub include_raw_entries: bool,
}

/// Parameters for a hybrid context-shard search.
#[derive(Clone, Copy, Debug)]
pub struct ContextQuery<'a> {
	pub actor_id: &'a str,
	pub memory_id: &'a str,
	pub query: &'a str,
	pub vector: &'a [f32],
	pub top_k: u32,
	pub alpha: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
	#[serde(rename = "entryId")]
	pub entry_id: String,
	pub summary: String,
	#[serde(rename = "rawEntry", skip_serializing_if = "Option::is_none", default)]
	pub raw_entry: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub tags: Option<BTreeMap<String, String>>,
	#[serde(
		rename = "creationTime",
		with = "time::serde::rfc3339::option",
		skip_serializing_if = "Option::is_none",
		default
	)]
	pub creation_time: Option<OffsetDateTime>,
	#[serde(
		rename = "conversationTime",
		with = "time::serde::rfc3339::option",
		skip_serializing_if = "Option::is_none",
		default
	)]
	pub conversation_time: Option<OffsetDateTime>,
	pub score: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextHit {
	pub context: String,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LatestContext {
	pub context: String,
	pub timestamp: OffsetDateTime,
}

/// Capability set over the derived search index. Production uses the Qdrant
/// adapter; tests and local development use the in-memory implementation.
///
/// Upserts are create-or-replace keyed by id. Deletes are idempotent, so
/// removing an absent object is success. Every query is restricted to one
/// `(actor, memory)` scope.
pub trait SearchIndex: Send + Sync {
	fn upsert_entry<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		payload: &'a Map<String, Value>,
	) -> BoxFuture<'a, Result<()>>;

	fn upsert_context<'a>(
		&'a self,
		id: &'a str,
		vector: &'a [f32],
		payload: &'a Map<String, Value>,
	) -> BoxFuture<'a, Result<()>>;

	fn delete_entry<'a>(&'a self, actor_id: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>>;

	fn delete_context<'a>(&'a self, actor_id: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>>;

	fn delete_memory<'a>(
		&'a self,
		actor_id: &'a str,
		memory_id: &'a str,
	) -> BoxFuture<'a, Result<()>>;

	fn delete_vault<'a>(
		&'a self,
		actor_id: &'a str,
		vault_id: &'a str,
	) -> BoxFuture<'a, Result<()>>;

	fn search<'a>(&'a self, query: EntryQuery<'a>) -> BoxFuture<'a, Result<Vec<SearchHit>>>;

	fn search_contexts<'a>(
		&'a self,
		query: ContextQuery<'a>,
	) -> BoxFuture<'a, Result<Vec<ContextHit>>>;

	/// Returns the context shard with the greatest timestamp, or `None` when
	/// the memory has no shards. Absence is not an error.
	fn latest_context<'a>(
		&'a self,
		actor_id: &'a str,
		memory_id: &'a str,
	) -> BoxFuture<'a, Result<Option<LatestContext>>>;
}
