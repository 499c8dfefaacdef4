mod defaults;
mod io;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use types::*;
pub use validation::*;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Top-level convoindex configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip, default = "resolve_state_dir")]
    pub state_dir: PathBuf,
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(find_config_file);

        let mut config = match config_path {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                read_config_file(&path)?
            }
            Some(path) => {
                anyhow::bail!("Config file '{}' does not exist", path.display());
            }
            None => {
                info!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.state_dir = resolve_state_dir();

        for err in validate_config(&config) {
            warn!("config: {err}");
        }

        Ok(config)
    }

    /// Write default configuration to a file.
    pub fn write_default(path: &str) -> Result<()> {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("CONVOINDEX_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("ignoring invalid CONVOINDEX_PORT={port}"),
            }
        }

        if let Some(bind) = var("CONVOINDEX_BIND") {
            self.server.bind = bind;
        }

        if let Some(path) = var("CONVOINDEX_DB_PATH") {
            self.store.path = Some(path);
        }

        if let Some(backend) = var("CONVOINDEX_EMBEDDING_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.embedding.backend = kind,
                Err(e) => warn!("ignoring CONVOINDEX_EMBEDDING_BACKEND: {e}"),
            }
        }

        if let Some(width) = var("CONVOINDEX_TARGET_WIDTH") {
            match width.parse() {
                Ok(width) => self.embedding.target_width = width,
                Err(_) => warn!("ignoring invalid CONVOINDEX_TARGET_WIDTH={width}"),
            }
        }

        if let Some(key) = var("OPENAI_API_KEY") {
            self.embedding.remote.api_key = Some(key);
        }

        if let Some(url) = var("OPENAI_BASE_URL") {
            self.embedding.remote.base_url = url;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            state_dir: resolve_state_dir(),
        }
    }
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let candidates = [
        PathBuf::from("convoindex.json"),
        PathBuf::from("convoindex.json5"),
        PathBuf::from("convoindex.yaml"),
        PathBuf::from("convoindex.yml"),
        PathBuf::from("convoindex.toml"),
    ];

    for path in &candidates {
        if path.exists() {
            return Some(path.clone());
        }
    }

    // Check home directory
    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".convoindex").join("config.json");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Resolve the state directory for persistent data.
fn resolve_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONVOINDEX_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join(".convoindex"))
        .unwrap_or_else(|| PathBuf::from(".convoindex"))
}
