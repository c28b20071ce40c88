use clap::Parser;
use std::io;

use coach_server::config::{ProviderConfig, ServerConfig};
use coach_server::logging::init_logging;
use coach_server::server::run_server;

#[derive(Parser, Debug, Clone)]
#[command(name = "coach-server")]
#[command(about = "Chat-coaching orchestrator HTTP server")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8088")]
    port: u16,

    /// Path to a TOML config file; overrides every default below when present
    #[arg(long, env = "COACH_CONFIG")]
    config: Option<String>,

    /// Multimodal race-arm base URL
    #[arg(long, env = "MULTIMODAL_BASE_URL")]
    multimodal_base_url: Option<String>,

    /// Multimodal race-arm model name
    #[arg(long, env = "MULTIMODAL_MODEL")]
    multimodal_model: Option<String>,

    /// Multimodal race-arm API key
    #[arg(long, env = "MULTIMODAL_API_KEY")]
    multimodal_api_key: Option<String>,

    /// Premium race-arm base URL
    #[arg(long, env = "PREMIUM_BASE_URL")]
    premium_base_url: Option<String>,

    /// Premium race-arm model name
    #[arg(long, env = "PREMIUM_MODEL")]
    premium_model: Option<String>,

    /// Premium race-arm API key
    #[arg(long, env = "PREMIUM_API_KEY")]
    premium_api_key: Option<String>,

    /// Path to the sqlite metrics database; in-memory sink if unset
    #[arg(long, env = "METRICS_DB_PATH")]
    metrics_db_path: Option<String>,
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load_from_path(path).unwrap_or_else(|error| {
            log::warn!("failed to load config from {path}: {error}, falling back to defaults");
            ServerConfig::default()
        }),
        None => ServerConfig::default(),
    };

    config.port = cli.port;
    apply_provider_overrides(&mut config.multimodal, cli.multimodal_base_url, cli.multimodal_model, cli.multimodal_api_key);
    apply_provider_overrides(&mut config.premium, cli.premium_base_url, cli.premium_model, cli.premium_api_key);
    if let Some(path) = cli.metrics_db_path {
        config.metrics_db_path = Some(path);
    }

    log::info!("starting coach-server on port {}", config.port);
    log::info!("multimodal provider: {} ({})", config.multimodal.model, config.multimodal.base_url);
    log::info!("premium provider: {} ({})", config.premium.model, config.premium.base_url);

    run_server(config).await
}

fn apply_provider_overrides(
    provider: &mut ProviderConfig,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
) {
    if let Some(base_url) = base_url {
        provider.base_url = base_url;
    }
    if let Some(model) = model {
        provider.model = model;
    }
    if let Some(api_key) = api_key {
        provider.api_key = api_key;
    }
}
