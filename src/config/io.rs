use anyhow::{bail, Context, Result};
use std::path::Path;

use super::Config;

/// Maximum size for a config file (10 MB).
pub const MAX_CONFIG_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Parse a JSON5 configuration string.
pub fn parse_config_json5(content: &str) -> Result<Config> {
    let config: Config = json5::from_str(content)?;
    Ok(config)
}

/// Read and parse a configuration file, picking the format by extension.
///
/// `.yaml`/`.yml` and `.toml` use their own parsers; everything else is read
/// as JSON5 (a superset of JSON).
pub fn read_config_file(path: &Path) -> Result<Config> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat config file '{}'", path.display()))?;

    if metadata.len() > MAX_CONFIG_FILE_BYTES {
        bail!(
            "Config file '{}' is {} bytes, exceeds limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_BYTES,
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    let config = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in '{}'", path.display()))?,
        "toml" => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in '{}'", path.display()))?,
        _ => parse_config_json5(&content)
            .with_context(|| format!("Invalid JSON in '{}'", path.display()))?,
    };

    Ok(config)
}
