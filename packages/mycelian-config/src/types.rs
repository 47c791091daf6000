use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub search: Search,
	pub outbox: Outbox,
	pub auth: Auth,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub entries_collection: String,
	#[serde(default = "default_contexts_collection")]
	pub contexts_collection: String,
	pub vector_dim: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Search {
	/// Weight on the dense component of hybrid ranking. `1.0` is pure
	/// semantic, `0.0` is pure lexical.
	pub alpha: f32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Outbox {
	pub batch_size: u32,
	/// Poll cadence in milliseconds. `0` drains the queue and then waits on
	/// a Postgres notification.
	pub interval_ms: u64,
	pub max_attempts: u32,
	#[serde(default = "default_base_backoff_ms")]
	pub base_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	#[serde(default = "default_lease_seconds")]
	pub lease_seconds: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Auth {
	/// API key to actor id. Stands in for the external authorizer.
	pub api_keys: HashMap<String, String>,
}

fn default_contexts_collection() -> String {
	"memory_contexts_v1".to_string()
}

fn default_base_backoff_ms() -> u64 {
	500
}

fn default_max_backoff_ms() -> u64 {
	30_000
}

fn default_lease_seconds() -> u64 {
	30
}
