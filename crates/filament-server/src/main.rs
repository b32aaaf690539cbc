//! HTTP front-end for filament.
//!
//! This server:
//! - Authenticates every request with HTTP Basic credentials
//! - Exchanges them for a session bound to the first backend that accepts them
//! - Lists directories as JSON, streams files, and builds ZIP archives
//! - Closes idle sessions and their backend connections

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use filament_core::{BackendRegistry, PasswordVerifier, VerifierCost};
use filament_session::{SessionSettings, SessionStore};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod archive;
mod auth;
mod config;
mod error;
mod handlers;

use config::{register_backends, Command, Config, FileConfig};
use handlers::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    if let Some(Command::HashPassword { password }) = &config.command {
        return hash_password(password.clone());
    }

    info!("Starting filament v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!("  Idle timeout: {}s", config.idle_timeout_secs);

    let file_config = match &config.config {
        Some(path) => {
            info!("  Config: {}", path.display());
            FileConfig::load(path)?
        }
        None => FileConfig::default(),
    };

    let registry = BackendRegistry::new();
    register_backends(&registry, &file_config.backends);

    let settings = SessionSettings {
        idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        ..SessionSettings::default()
    };
    let sessions = Arc::new(SessionStore::new(
        Arc::new(registry),
        file_config.backends,
        settings,
    ));

    let state = AppState {
        sessions: Arc::clone(&sessions),
        realm: Arc::from(config.realm.as_str()),
    };
    let app = router(state);

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Print the PHC string for a local backend `users` entry.
fn hash_password(password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        anyhow::bail!("Refusing to hash an empty password");
    }

    let verifier = PasswordVerifier::hash(&password, VerifierCost::default())?;
    println!("{}", verifier.as_phc());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        info!("Received SIGTERM, initiating shutdown");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
