pub mod worker;

// std
use std::{path::PathBuf, sync::Arc};

// crates.io
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

// self
use mycelian_index::qdrant::QdrantIndex;
use mycelian_service::HttpEmbedder;
use mycelian_storage::db::Db;
use worker::{Worker, WorkerConfig};

#[derive(Debug, Parser)]
#[command(
	version = mycelian_cli::VERSION,
	rename_all = "kebab",
	styles = mycelian_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = mycelian_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let index = QdrantIndex::new(&config.storage.qdrant)?;

	index.ensure_collections().await?;

	let embedder = HttpEmbedder::new(config.providers.embedding.clone())?;
	let worker = Worker::new(
		db,
		Arc::new(embedder),
		Arc::new(index),
		WorkerConfig::from(&config.outbox),
	);
	let (stop_tx, stop_rx) = watch::channel(false);

	tokio::spawn(async move {
		if let Err(err) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %err, "Failed to listen for shutdown signal.");
		}

		let _ = stop_tx.send(true);
	});

	worker.run(stop_rx).await
}
