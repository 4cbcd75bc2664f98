use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use tracing::{debug, warn};

use crate::schema::TorboConfig;

const CONFIG_FILENAME: &str = "torbo.toml";

/// Test/CLI override for the data directory.
static DATA_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Load config from an explicit path.
pub fn load_config(path: &Path) -> std::io::Result<TorboConfig> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./torbo.toml` (project-local)
/// 2. `<config dir>/torbo.toml` (user-global)
///
/// A missing or unparseable file yields `TorboConfig::default()`; the
/// gateway never refuses to start over bad config.
pub fn discover_and_load() -> TorboConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TorboConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    let global = config_dir()?.join(CONFIG_FILENAME);
    global.exists().then_some(global)
}

/// The user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "torbo").map(|d| d.config_dir().to_path_buf())
}

/// The platform data directory (keychain, audit log). Created on first use.
pub fn data_dir() -> PathBuf {
    if let Ok(guard) = DATA_DIR_OVERRIDE.read()
        && let Some(ref dir) = *guard
    {
        return dir.clone();
    }
    let dir = directories::ProjectDirs::from("", "", "torbo")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".torbo"));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(path = %dir.display(), error = %e, "failed to create data dir");
    }
    dir
}

/// Override the data directory (tests and the `--data-dir` flag).
pub fn set_data_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = DATA_DIR_OVERRIDE.write() {
        *guard = Some(dir.into());
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torbo.toml");
        std::fs::write(
            &path,
            "[gateway]\nport = 9000\nlan_access = true\nrate_limit_per_minute = 5\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert!(cfg.gateway.lan_access);
        assert_eq!(cfg.gateway.rate_limit_per_minute, 5);
        // Unspecified sections fall back to defaults.
        assert_eq!(cfg.gateway.device_expiry_days, 30);
    }

    #[test]
    fn load_config_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torbo.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        assert!(load_config(&path).is_err());
    }
}
