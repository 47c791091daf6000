pub mod auth;
pub mod search;

mod error;

pub use auth::{ActorInfo, Authorizer, StaticAuthorizer};
pub use error::{Error, Result};
pub use search::{ContextItem, SearchRequest, SearchResponse, SearchService};

use std::{future::Future, pin::Pin};

use mycelian_config::EmbeddingProviderConfig;
use mycelian_providers::embedding::EmbeddingClient;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Maps text to a fixed-dimension dense vector. Deterministic for the same
/// text and model; failures are transient from the caller's viewpoint.
pub trait EmbeddingProvider: Send + Sync {
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, mycelian_providers::Result<Vec<f32>>>;
}

/// Production provider backed by the OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
	client: EmbeddingClient,
}
impl HttpEmbedder {
	pub fn new(cfg: EmbeddingProviderConfig) -> mycelian_providers::Result<Self> {
		Ok(Self { client: EmbeddingClient::new(cfg)? })
	}
}

impl EmbeddingProvider for HttpEmbedder {
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, mycelian_providers::Result<Vec<f32>>> {
		Box::pin(self.client.embed_one(text))
	}
}
