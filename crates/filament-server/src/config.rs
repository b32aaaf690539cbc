use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use filament_core::{BackendConfigs, BackendRegistry};
use serde::Deserialize;
use tracing::{info, warn};

/// Configuration for the filament HTTP front-end.
#[derive(Parser, Debug, Clone)]
#[command(name = "filament")]
#[command(about = "Browse and download remote storage through session-cached backend connections")]
#[command(version)]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "FILAMENT_HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "8080", env = "FILAMENT_PORT")]
    pub port: u16,

    /// JSON file with the backend configuration blocks
    #[arg(long, env = "FILAMENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Realm announced in Basic auth challenges
    #[arg(long, default_value = "Filament", env = "FILAMENT_REALM")]
    pub realm: String,

    /// Idle time after which a session is closed (seconds)
    #[arg(long, default_value = "300", env = "FILAMENT_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print an argon2 hash for the `users` table of the local backend
    HashPassword {
        /// Password to hash; read from stdin when omitted
        password: Option<String>,
    },
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backends: BackendConfigs,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

/// Register the backends that have a configuration block, in fixed order.
pub fn register_backends(registry: &BackendRegistry, configs: &BackendConfigs) {
    let available = [filament_ftp::descriptor(), filament_local::descriptor()];
    for descriptor in available {
        if configs.contains(&descriptor.id) {
            registry.register(descriptor);
        }
    }

    if registry.is_empty() {
        warn!("No backend configured, every login will be rejected");
    } else {
        info!("{} backend(s) registered", registry.len());
    }
}
