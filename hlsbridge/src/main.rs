mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use hlsbridge_core::{
    bootstrap::load_config,
    logging,
    store::{MemorySessionStore, RedisSessionStore, SessionStore},
    Config,
};
use hlsbridge_relay::{RelayContext, RelayRegistry};

#[derive(Parser, Debug)]
#[command(name = "hlsbridge")]
#[command(about = "Relays live HLS broadcasts into resumable destination uploads", long_about = None)]
struct Args {
    /// Config file path (YAML/TOML/JSON)
    #[arg(long, short)]
    config: Option<String>,

    /// HTTP listen host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// HTTP listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.http_port = port;
    }

    // 2. Re-validate after command line overrides
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("HLS bridge starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Session store
    let store = init_store(&config).await?;

    // 5. Relay registry, resuming sessions left active by a previous process
    let ctx = RelayContext::from_config(&config, store)?;
    let registry = Arc::new(RelayRegistry::new(ctx));
    let resumed = registry.resume_active().await?;
    info!("Relay registry ready ({} session(s) resumed)", resumed);

    // 6. Serve until a shutdown signal arrives
    let router = hlsbridge_api::create_router(Arc::clone(&registry));
    server::serve(&config.http_address(), router).await?;

    registry.shutdown().await;
    info!("HLS bridge stopped");
    Ok(())
}

async fn init_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    if config.redis.url.is_empty() {
        warn!("No Redis URL configured; relay sessions are kept in memory and lost on restart");
        return Ok(Arc::new(MemorySessionStore::new()));
    }

    let store = RedisSessionStore::connect(&config.redis.url, config.redis.key_prefix.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {e}"))?;
    info!("Redis session store connected");
    Ok(Arc::new(store))
}
