use dojo_gateway::config::GatewayConfig;
use dojo_gateway::quota::QuotaLedger;
use dojo_gateway::store::WorkspaceStore;
use dojo_gateway::throttle::VelocityThrottle;
use dojo_gateway::{build_app, AppState};

use dojo_core::ModelClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // .env first, so every layer below sees the same environment.
    if dotenvy::dotenv().is_err() {
        eprintln!("[dojo-gateway] No .env file found; using the process environment as-is");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(GatewayConfig::from_env());

    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!(target: "dojo::server", "Cannot create data directory {}: {}", parent.display(), e);
                std::process::exit(1);
            }
        }
    }

    let store = match WorkspaceStore::new(config.db_path.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(target: "dojo::server", "Cannot open database {}: {}", config.db_path.display(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = seed_dev_session(&store) {
        tracing::error!(target: "dojo::server", "Dev session seeding failed: {}", e);
        std::process::exit(1);
    }

    let throttle = Arc::new(VelocityThrottle::new());
    throttle.spawn_sweeper();

    let quota = Arc::new(QuotaLedger::new(
        Arc::clone(&store),
        config.daily_message_limit,
    ));
    let model = Arc::new(ModelClient::new());
    tracing::info!(target: "dojo::server", mode = ?model.mode(), "Model client ready");

    let state = AppState {
        store,
        throttle,
        quota,
        model,
        config: Arc::clone(&config),
    };
    let app = build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(target: "dojo::server", "Cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!(target: "dojo::server", %addr, "Gateway listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(target: "dojo::server", "Server error: {}", e);
        std::process::exit(1);
    }
}

/// Local development shortcut: DOJO_DEV_SESSION_TOKEN mints a long-lived
/// session for a fixed dev user, standing in for the external identity
/// provider. Not read in production setups.
fn seed_dev_session(store: &WorkspaceStore) -> Result<(), rusqlite::Error> {
    let Ok(token) = std::env::var("DOJO_DEV_SESSION_TOKEN") else {
        return Ok(());
    };
    let token = token.trim();
    if token.is_empty() {
        return Ok(());
    }

    store.upsert_user("dev-user-1", "dev@localhost")?;
    let expires_at = chrono::Utc::now().timestamp_millis() + 365 * 24 * 60 * 60 * 1000;
    store.create_session(token, "dev-user-1", expires_at)?;
    tracing::info!(target: "dojo::server", "Dev session seeded for dev-user-1");
    Ok(())
}
