//! Deployment configuration (§9 ambient stack): TOML file parsed with serde,
//! falling back to defaults on a missing or malformed file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

/// `[coordinator]` section: tuning for the per-document actor.
#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// Seconds a subscriber may go without sending or being sent a message
    /// before the coordinator drops it (§4.G's idle-subscriber timeout).
    #[serde(default = "CoordinatorConfig::default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl CoordinatorConfig {
    const fn default_idle_timeout_secs() -> u64 {
        300
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            idle_timeout_secs: Self::default_idle_timeout_secs(),
        }
    }
}

/// `[version_log]` section: retention policy for the version history.
#[derive(Debug, Deserialize, Clone)]
pub struct VersionLogConfig {
    /// Number of recent versions a store is expected to keep resident
    /// before older ones may be considered retention-expired. `0` means
    /// unbounded. The in-memory reference store does not enforce this; it
    /// documents the contract real stores should honor.
    #[serde(default)]
    pub retention_depth: u32,
}

impl Default for VersionLogConfig {
    fn default() -> Self {
        VersionLogConfig { retention_depth: 0 }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub version_log: VersionLogConfig,
}

/// Parsed deployment configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: ConfigFile,
}

impl Config {
    pub fn coordinator(&self) -> &CoordinatorConfig {
        &self.file.coordinator
    }

    pub fn version_log(&self) -> &VersionLogConfig {
        &self.file.version_log
    }
}

/// Loads configuration from `path`. A missing file yields defaults; a
/// present-but-malformed file is an error, since a typo should not
/// silently run with the wrong retention/timeout policy.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let file = toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Config { file })
        }
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Config::default())
        }
        Err(source) => Err(ConfigError::Read { path: path.to_path_buf(), source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_from(Path::new("__scriptorium_missing__.toml")).unwrap();
        assert_eq!(cfg.coordinator().idle_timeout_secs, 300);
        assert_eq!(cfg.version_log().retention_depth, 0);
    }

    #[test]
    fn parses_coordinator_and_version_log_sections() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[coordinator]\nidle_timeout_secs = 60\n\n[version_log]\nretention_depth = 50\n").unwrap();
        let cfg = load_from(tmp.path()).unwrap();
        assert_eq!(cfg.coordinator().idle_timeout_secs, 60);
        assert_eq!(cfg.version_log().retention_depth, 50);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "not valid toml [[[").unwrap();
        assert!(matches!(load_from(tmp.path()), Err(ConfigError::Parse { .. })));
    }
}
