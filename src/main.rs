//! Quorum Gateway - trust boundary and request router for the platform.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use quorum_gateway::{
    cache::{CacheStore, MemoryCache, RedisCache},
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, OidcVerifier},
    realtime::{Backplane, ChatHub, ChatServiceStore, LocalBackplane, RedisBackplane},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config, ExitCode> {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return Err(ExitCode::FAILURE);
        }
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return Err(ExitCode::FAILURE);
    }
    Ok(config)
}

fn check_config(cli: &Cli) -> ExitCode {
    match load_config(cli) {
        Ok(config) => {
            println!(
                "Configuration OK: {} routes, listening on {}:{}",
                config.services.routes().len(),
                config.server.host,
                config.server.port
            );
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

async fn run_server(cli: Cli) -> ExitCode {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let cache: Arc<dyn CacheStore> = match &config.cache.redis_url {
        Some(url) if config.cache.enabled => match RedisCache::connect(url).await {
            Ok(redis) => {
                info!("Using Redis cache");
                Arc::new(redis)
            }
            Err(e) => {
                error!("Failed to connect to Redis cache: {e}");
                return ExitCode::FAILURE;
            }
        },
        _ => Arc::new(MemoryCache::new()),
    };

    let backplane: Arc<dyn Backplane> = match &config.realtime.redis_url {
        Some(url) => match RedisBackplane::connect(url, &config.realtime.channel).await {
            Ok(redis) => {
                info!("Using Redis realtime backplane");
                Arc::new(redis)
            }
            Err(e) => {
                error!("Failed to connect to Redis backplane: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(LocalBackplane::new()),
    };

    let identity = Arc::new(OidcVerifier::new(config.identity.clone()));
    let chat_url = config.services.chat_url.clone();

    let gateway = match Gateway::new(config, identity, cache) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to build gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(ChatServiceStore::new(
        Arc::clone(gateway.mesh().client()),
        chat_url,
    ));
    let hub = ChatHub::start(backplane, store);

    match gateway.with_realtime(hub).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Gateway failed: {e}");
            ExitCode::FAILURE
        }
    }
}
