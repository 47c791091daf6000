mod types;

use std::{fs, path::Path};

use color_eyre::eyre;

pub use types::{
	Auth, Config, EmbeddingProviderConfig, Outbox, Postgres, Providers, Qdrant, Search, Service,
	Storage,
};

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;

	let cfg: Config = toml::from_str(&raw)?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.http_bind must be non-empty."));
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(eyre::eyre!("storage.postgres.pool_max_conns must be greater than zero."));
	}
	if cfg.storage.qdrant.vector_dim == 0 {
		return Err(eyre::eyre!("storage.qdrant.vector_dim must be greater than zero."));
	}
	if cfg.storage.qdrant.entries_collection.trim().is_empty() {
		return Err(eyre::eyre!("storage.qdrant.entries_collection must be non-empty."));
	}
	if cfg.storage.qdrant.contexts_collection.trim().is_empty() {
		return Err(eyre::eyre!("storage.qdrant.contexts_collection must be non-empty."));
	}
	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(eyre::eyre!("providers.embedding.api_key must be non-empty."));
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(eyre::eyre!("providers.embedding.dimensions must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(eyre::eyre!(
			"providers.embedding.dimensions must match storage.qdrant.vector_dim."
		));
	}
	if !cfg.search.alpha.is_finite() {
		return Err(eyre::eyre!("search.alpha must be a finite number."));
	}
	if !(0.0..=1.0).contains(&cfg.search.alpha) {
		return Err(eyre::eyre!("search.alpha must be in the range 0.0-1.0."));
	}
	if cfg.outbox.batch_size == 0 {
		return Err(eyre::eyre!("outbox.batch_size must be greater than zero."));
	}
	if cfg.outbox.max_attempts == 0 {
		return Err(eyre::eyre!("outbox.max_attempts must be greater than zero."));
	}
	if cfg.outbox.base_backoff_ms == 0 {
		return Err(eyre::eyre!("outbox.base_backoff_ms must be greater than zero."));
	}
	if cfg.outbox.max_backoff_ms < cfg.outbox.base_backoff_ms {
		return Err(eyre::eyre!("outbox.max_backoff_ms must be at least outbox.base_backoff_ms."));
	}
	if cfg.outbox.lease_seconds == 0 {
		return Err(eyre::eyre!("outbox.lease_seconds must be greater than zero."));
	}

	Ok(())
}
