use anyhow::Context;
use clap::Parser;
use trends_reporter::app::{open_store, App};
use trends_reporter::cli::ReporterCli;
use trends_reporter::clock::Clock;
use trends_reporter::config::{ReporterConfig, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = ReporterCli::parse();

    let mut config = match &cli.config {
        Some(path) => ReporterConfig::load(path)?,
        None => ReporterConfig::default(),
    };
    if let Some(seed) = cli.seed {
        log::debug!("Seeding from {}", seed.display());
        config.store = StoreConfig::Memory { seed: Some(seed) };
    }

    let store = open_store(&config).await.context("Opening the store")?;
    let app = App::new(store, &config, Clock::System);

    let result = app.execute(cli.command, &mut std::io::stdout().lock()).await;
    app.close().await;

    result
}
