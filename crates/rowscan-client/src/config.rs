//! Client configuration.
//!
//! A config file lists one `[[database]]` table per SQLite database:
//!
//! ```toml
//! [[database]]
//! key = "main,reporting"
//! path = "/var/lib/app.db"
//! max_open_conns = 16
//! default = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::pool::PoolConfig;

/// Path that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configured databases.
    #[serde(default)]
    pub database: Vec<DatabaseConfig>,
}

/// One database and the pool in front of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Comma-separated registry keys.
    pub key: String,

    /// Database file, or `:memory:`.
    pub path: String,

    /// Connections kept idle in the pool.
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,

    /// Connections open at once.
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: usize,

    /// Maximum connection lifetime in seconds. Unset means unlimited.
    #[serde(default)]
    pub conn_max_lifetime_secs: Option<u64>,

    /// Idle connections older than this many seconds are closed.
    #[serde(default)]
    pub conn_max_idle_secs: Option<u64>,

    /// How long `acquire` waits for a free connection.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// SQLite busy timeout.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Whether this database backs the default client.
    #[serde(default)]
    pub default: bool,
}

fn default_max_idle_conns() -> usize {
    16
}

fn default_max_open_conns() -> usize {
    16
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ClientError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ClientResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> ClientResult<()> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        let io = |source| ClientError::ConfigIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, content).map_err(io)
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> ClientResult<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::InvalidConfig(e.to_string()))
    }

    /// Adds a database.
    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database.push(database);
        self
    }

    /// Validates every database entry.
    pub fn validate(&self) -> ClientResult<()> {
        for database in &self.database {
            database.validate()?;
        }
        let defaults = self.database.iter().filter(|d| d.default).count();
        if defaults > 1 {
            return Err(ClientError::InvalidConfig(format!(
                "{defaults} databases are marked default"
            )));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Creates an entry with default pool settings.
    pub fn new(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            max_idle_conns: default_max_idle_conns(),
            max_open_conns: default_max_open_conns(),
            conn_max_lifetime_secs: None,
            conn_max_idle_secs: None,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            default: false,
        }
    }

    /// Creates an entry for a private in-memory database.
    pub fn in_memory(key: impl Into<String>) -> Self {
        Self::new(key, MEMORY_PATH)
    }

    /// Sets the idle connection limit.
    pub fn max_idle_conns(mut self, max: usize) -> Self {
        self.max_idle_conns = max;
        self
    }

    /// Sets the open connection limit.
    pub fn max_open_conns(mut self, max: usize) -> Self {
        self.max_open_conns = max;
        self
    }

    /// Sets the maximum connection lifetime.
    pub fn conn_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.conn_max_lifetime_secs = Some(lifetime.as_secs());
        self
    }

    /// Sets the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the SQLite busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Marks this entry as the default client.
    pub fn default_client(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Registry keys, trimmed, with empty segments dropped.
    pub fn keys(&self) -> Vec<&str> {
        split_keys(&self.key)
    }

    /// Returns true for `:memory:`.
    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }

    /// Busy timeout as a `Duration`.
    pub fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Pool settings for this entry.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .max_open(self.max_open_conns)
            .max_idle(self.max_idle_conns.min(self.max_open_conns))
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .max_lifetime(self.conn_max_lifetime_secs.map(Duration::from_secs))
            .idle_timeout(self.conn_max_idle_secs.map(Duration::from_secs))
    }

    /// Validates the entry.
    pub fn validate(&self) -> ClientResult<()> {
        if self.keys().is_empty() {
            return Err(ClientError::InvalidConfig(format!(
                "database '{}' has no key",
                self.path
            )));
        }
        if self.path.trim().is_empty() {
            return Err(ClientError::InvalidConfig(format!(
                "database '{}' has an empty path",
                self.key
            )));
        }
        if self.max_open_conns == 0 {
            return Err(ClientError::InvalidConfig(format!(
                "database '{}': max_open_conns must be greater than 0",
                self.key
            )));
        }
        Ok(())
    }
}

/// Splits a comma-separated key list.
pub fn split_keys(keys: &str) -> Vec<&str> {
    keys.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_minimal_entry() {
        let config = Config::from_toml_str(
            r#"
            [[database]]
            key = "main"
            path = ":memory:"
            "#,
        )
        .unwrap();

        let db = &config.database[0];
        assert_eq!(db.max_idle_conns, 16);
        assert_eq!(db.max_open_conns, 16);
        assert_eq!(db.conn_max_lifetime_secs, None);
        assert_eq!(db.acquire_timeout_ms, 30_000);
        assert!(!db.default);
        assert!(db.is_memory());
    }

    #[test]
    fn test_keys_are_split_and_trimmed() {
        let db = DatabaseConfig::new(" main, reporting ,,", "app.db");
        assert_eq!(db.keys(), vec!["main", "reporting"]);
    }

    #[test]
    fn test_invalid_entries() {
        assert!(DatabaseConfig::new(" , ", "app.db").validate().is_err());
        assert!(DatabaseConfig::new("main", "").validate().is_err());
        assert!(DatabaseConfig::new("main", "app.db")
            .max_open_conns(0)
            .validate()
            .is_err());

        let two_defaults = Config::new()
            .with_database(DatabaseConfig::in_memory("a").default_client(true))
            .with_database(DatabaseConfig::in_memory("b").default_client(true));
        assert!(matches!(
            two_defaults.validate(),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml_str("[[database]]\nkey = 1").unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[test]
    fn test_pool_config_clamps_idle() {
        let pool = DatabaseConfig::new("main", "app.db")
            .max_open_conns(4)
            .max_idle_conns(10)
            .conn_max_lifetime(Duration::from_secs(60))
            .pool_config();
        assert_eq!(pool.max_open, 4);
        assert_eq!(pool.max_idle, 4);
        assert_eq!(pool.max_lifetime, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("rowscan.toml");

        let config = Config::new().with_database(
            DatabaseConfig::new("main,reporting", "/var/lib/app.db")
                .max_open_conns(8)
                .busy_timeout(Duration::from_millis(250))
                .default_client(true),
        );
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ClientError::ConfigIo { .. }));
    }
}
