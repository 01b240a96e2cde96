use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

use guidebookd::api::{self, AppState};
use guidebookd::booking::HttpValidator;
use guidebookd::config::Config;
use guidebookd::ha::{HaRestClient, HomeAssistant};
use guidebookd::proxy::Proxy;
use guidebookd::push::HttpPublisher;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(default_value = "guidebookd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration before logging is up; config errors go to stderr.
    let config = Config::from_file(&args.config)?;

    let mut filter = Targets::new().with_default(config.logging.level);
    for (target, level) in &config.logging.overrides {
        filter = filter.with_target(target.clone(), *level);
    }
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("guidebookd starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let mut houses: HashMap<String, Arc<dyn HomeAssistant>> = HashMap::new();
    for (code, house) in &config.houses {
        tracing::info!("[{}] Home Assistant instance at {}", code, house.url);
        let client = HaRestClient::new(&house.url, &house.token)?;
        houses.insert(code.clone(), Arc::new(client));
    }

    let validator = Arc::new(HttpValidator::new(&config.validator.url)?);
    let publisher = Arc::new(HttpPublisher::new(
        &config.push.url,
        &config.push.app_id,
        &config.push.key,
    )?);

    let proxy = Proxy::new(validator, houses);
    let state = Arc::new(AppState::new(
        proxy,
        publisher,
        config.webhook.secret.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    api::serve(config.api.listen.clone(), config.api.port, state, shutdown_rx)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!("guidebookd shutdown complete");

    Ok(())
}
