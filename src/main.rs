use std::sync::Arc;

use tracing::{error, info};

use pumpgate::config::Config;
use pumpgate::gateway::Gateway;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };

    config.init_logging();

    info!(config = %config_path, "pumpgate starting");

    let gateway = Arc::new(Gateway::new(config.gateway_config()));

    // Venue connectors are provided by adapter crates and registered here
    // before start; a gateway with none still serves relay commands.
    if let Err(err) = gateway.start().await {
        error!(error = %err, "Failed to start gateway");
        std::process::exit(1);
    }

    // The gateway installed its own signal handler; wait for it to wind
    // down.
    gateway.wait_until_stopped().await;

    info!("pumpgate stopped");
}
