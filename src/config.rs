//! Binary configuration: store backend plus queue settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use hourglass_queue::QueueConfig;
use hourglass_store::{MemoryStore, SqliteStore, Store};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local; nothing survives exit.
    Memory,
    /// Shared database file, usable from several processes.
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Database file for the sqlite backend. `~` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "~/.hourglass/queue.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }

    /// Open the configured backend.
    pub async fn open(&self) -> anyhow::Result<Arc<dyn Store>> {
        match self.backend {
            Backend::Memory => {
                warn!("Using the memory store; messages live only as long as this process");
                Ok(Arc::new(MemoryStore::new()))
            }
            Backend::Sqlite => {
                let path = self.resolved_path();
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                info!("Opening SQLite store at '{}'", path.display());
                Ok(Arc::new(SqliteStore::open(&path).await?))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<AppConfig, ConfigError> {
        if !path.exists() {
            info!("No config at '{}', using defaults", path.display());
            return Ok(AppConfig::default());
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    pub fn load_str(content: &str) -> Result<AppConfig, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: AppConfig = toml::from_str(&expanded)?;
        config
            .queue
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                field: "queue".to_string(),
                message: e.to_string(),
            })?;
        Ok(config)
    }

    /// Expand `${VAR}` references. Comment lines are left as they are.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(content.len());
        for line in content.lines() {
            if line.trim_start().starts_with('#') {
                result.push_str(line);
            } else {
                let mut expanded = line.to_string();
                for cap in ENV_VAR.captures_iter(line) {
                    let var_name = &cap[1];
                    let var_value = std::env::var(var_name)
                        .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
                    expanded = expanded.replace(&cap[0], &var_value);
                }
                result.push_str(&expanded);
            }
            result.push('\n');
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.queue.default_retry_count, 3);
    }

    #[test]
    fn test_default_backend_is_shared() {
        let store = StoreConfig::default();
        assert_eq!(store.backend, Backend::Sqlite);
        assert!(store.resolved_path().ends_with(".hourglass/queue.db"));
    }

    #[test]
    fn test_memory_backend_is_opt_in() {
        let config = ConfigLoader::load_str("[store]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(config.store.backend, Backend::Memory);
    }

    #[test]
    fn test_bundled_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/hourglass.toml");
        let config = ConfigLoader::load_or_default(&path).unwrap();
        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.queue.concurrency, 4);
    }

    #[test]
    fn test_comment_lines_are_not_expanded() {
        let content = "# set ${HOURGLASS_UNSET_IN_COMMENT} to override\n[queue]\nfetch_limit = 7\n";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.queue.fetch_limit, 7);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            ConfigLoader::load_or_default(Path::new("/nonexistent/hourglass.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[store]").unwrap();
        writeln!(file, "backend = \"sqlite\"").unwrap();
        writeln!(file, "path = \"/tmp/q.db\"").unwrap();
        writeln!(file, "[queue]").unwrap();
        writeln!(file, "concurrency = 8").unwrap();
        writeln!(file, "fetch_limit = 100").unwrap();

        let config = ConfigLoader::load_or_default(file.path()).unwrap();
        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.store.resolved_path(), PathBuf::from("/tmp/q.db"));
        assert_eq!(config.queue.concurrency, 8);
        assert_eq!(config.queue.fetch_limit, 100);
        assert_eq!(config.queue.fetch_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_queue_settings_rejected() {
        let result = ConfigLoader::load_str("[queue]\nconcurrency = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = ConfigLoader::load_str("[store]\nbackend = \"redis\"\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_expand_path() {
        let store = StoreConfig::default();
        assert!(!store.resolved_path().starts_with("~"));
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-only variable name
        unsafe {
            std::env::set_var("HOURGLASS_TEST_DB", "/var/lib/hg.db");
        }
        let config =
            ConfigLoader::load_str("[store]\nbackend = \"sqlite\"\npath = \"${HOURGLASS_TEST_DB}\"\n")
                .unwrap();
        assert_eq!(config.store.path, "/var/lib/hg.db");
        unsafe {
            std::env::remove_var("HOURGLASS_TEST_DB");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let result = ConfigLoader::load_str("[store]\npath = \"${HOURGLASS_UNSET_VAR_4821}\"\n");
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(v)) if v == "HOURGLASS_UNSET_VAR_4821"));
    }

    #[tokio::test]
    async fn test_open_sqlite_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StoreConfig {
            backend: Backend::Sqlite,
            path: dir.path().join("nested/queue.db").display().to_string(),
        };
        let opened = store.open().await.unwrap();
        assert_eq!(opened.id(), "sqlite");
        assert!(dir.path().join("nested").is_dir());
    }
}
