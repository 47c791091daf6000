use std::sync::Arc;

use mycelian_index::qdrant::QdrantIndex;
use mycelian_service::{Authorizer, HttpEmbedder, SearchService, StaticAuthorizer};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<SearchService>,
	pub authorizer: Arc<dyn Authorizer>,
}
impl AppState {
	pub async fn new(config: mycelian_config::Config) -> color_eyre::Result<Self> {
		let index = QdrantIndex::new(&config.storage.qdrant)?;

		index.ensure_collections().await?;

		let embedder = HttpEmbedder::new(config.providers.embedding.clone())?;
		let service =
			SearchService::new(Arc::new(embedder), Arc::new(index), config.search.alpha)?;

		Ok(Self {
			service: Arc::new(service),
			authorizer: Arc::new(StaticAuthorizer::new(&config.auth)),
		})
	}

	/// Assembles state from pre-built components. Tests use this to run the
	/// full HTTP surface against the in-memory index.
	pub fn with_components(service: SearchService, authorizer: Arc<dyn Authorizer>) -> Self {
		Self { service: Arc::new(service), authorizer }
	}
}
