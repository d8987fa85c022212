use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Json, Router};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::http::{feature_rate_limit, FeatureGate};
use floodgate::ratelimit::{
    ConfigProvider, CounterStore, MemoryStore, RedisStore, RulesConfig, StaticConfigProvider,
};

#[derive(Parser, Debug)]
#[command(name = "floodgate", about = "Request rate limiting service")]
struct Args {
    /// Path to the service configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Floodgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // Load configuration
    let mut config = match args.config.as_deref() {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Initialize the counter store
    let store: Arc<dyn CounterStore> = match config.store.redis_url.as_deref() {
        Some(url) => {
            info!(url = %url, "Using Redis counter store");
            Arc::new(RedisStore::new(url, config.store.command_timeout())?)
        }
        None => {
            info!("No Redis URL configured, using in-memory counter store");
            Arc::new(MemoryStore::new())
        }
    };

    // Load feature rules
    let rules = match config.rate_limiting.rules_path.as_deref() {
        Some(path) => RulesConfig::from_file(path)?,
        None => RulesConfig::new(),
    };
    info!(features = rules.features.len(), "Rate limit rules loaded");
    let provider = Arc::new(StaticConfigProvider::from_config(rules.clone()));

    let app = build_router(&rules, provider, store);

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!("Listening on {}", config.server.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Floodgate Rate Limiting Service stopped");
    Ok(())
}

/// Build the demo router: one guarded endpoint per configured feature,
/// plus an unguarded health check.
fn build_router(
    rules: &RulesConfig,
    provider: Arc<dyn ConfigProvider>,
    store: Arc<dyn CounterStore>,
) -> Router {
    let mut app = Router::new().route("/health", get(health));

    for name in rules.features.keys() {
        let gate = Arc::new(FeatureGate::new(
            name.clone(),
            provider.clone(),
            store.clone(),
        ));
        let feature = name.clone();
        let handler = move || {
            let feature = feature.clone();
            async move { Json(serde_json::json!({ "feature": feature, "status": "ok" })) }
        };

        app = app.route(
            &format!("/{}", name),
            get(handler).layer(middleware::from_fn_with_state(gate, feature_rate_limit)),
        );
    }

    app
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
