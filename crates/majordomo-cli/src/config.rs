//! Configuration loading from `~/.majordomo/config.toml` with defaults.

use majordomo_types::config::MajordomoConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".majordomo")
        .join("config.toml")
}

/// Load configuration from a TOML file, falling back to defaults.
///
/// A missing file is normal; an unreadable or invalid one is logged and
/// ignored. Command-line flags are applied on top by the caller.
pub fn load_config(path: Option<&Path>) -> MajordomoConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return MajordomoConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<MajordomoConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                MajordomoConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            MajordomoConfig::default()
        }
    }
}
