use clap::Parser;

use mycelian_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	mycelian_worker::run(args).await
}
