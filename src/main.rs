use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use evoclaw_chat::config::Config;
use evoclaw_chat::modules::{build_modules, ModuleRegistry};
use evoclaw_chat::router::Router;
use evoclaw_chat::server::{self, AppState};
use evoclaw_chat::store::ContextStore;
use evoclaw_chat::telegram::TelegramClient;

/// EvoClaw chat bot - routes Telegram messages to capability modules
#[derive(Parser, Debug)]
#[command(name = "evoclaw-chat", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Environment tag (overrides config and APP_ENV)
    #[arg(short, long)]
    env: Option<String>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.bot.port = port;
    }
    if let Some(env) = args.env {
        config.bot.environment = env;
    }
    config.validate()?;

    info!(
        environment = %config.bot.environment,
        port = config.bot.port,
        model = %config.llm.model,
        "🧬 EvoClaw chat starting"
    );

    let mut registry = ModuleRegistry::new();
    registry.register_all(build_modules(&config)?)?;
    registry.initialize_all().await;

    let router = Arc::new(
        Router::new(registry)
            .with_max_history(config.router.max_history)
            .with_module_timeout(config.router.module_timeout()),
    );
    let store = ContextStore::new(config.router.context_capacity, config.router.context_ttl())
        .with_router(Arc::downgrade(&router));

    let sender = TelegramClient::new(
        &config.bot.api_base,
        &config.bot.telegram_token,
        Duration::from_secs(30),
    )?;

    let state = Arc::new(
        AppState::new(router.clone(), store, Arc::new(sender), config.bot.environment.clone())
            .with_webhook_secret(config.bot.webhook_secret.clone()),
    );
    let sweeper = server::spawn_sweeper(state.clone());

    server::serve(state.clone(), config.bot.port, shutdown_signal()).await?;

    if let Some(handle) = sweeper {
        handle.abort();
        let _ = handle.await;
    }
    state.drain().await;
    drop(state);

    // The server's state was the last other owner of the router
    match Arc::try_unwrap(router) {
        Ok(mut router) => router.registry_mut().cleanup_all().await,
        Err(_) => error!("router still in use at shutdown, skipping module cleanup"),
    }

    info!("EvoClaw chat stopped");
    Ok(())
}
