mod logging;
mod web;

use anyhow::Result;
use clap::Parser;
use config_model::SharedConfig;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "gallery",
    version,
    about = "Serve captured photobooth sessions over HTTP."
)]
struct Cli {
    /// Path to the photobooth configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(err) = try_main().await {
        error!(error = ?err, "gallery exited with error");
        std::process::exit(1);
    }
}

async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = SharedConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), "starting gallery");
    web::serve(config).await
}
