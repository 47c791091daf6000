use clap::Parser;

use mycelian_api::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	mycelian_api::run(args).await
}
