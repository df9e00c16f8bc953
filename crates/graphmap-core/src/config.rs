//! Configuration management for graphmap.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (GRAPHMAP__ prefix, `__` separator)
//! 2. Config file (graphmap.toml)
//! 3. Defaults

use serde::Deserialize;

use crate::types::TransactionType;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OgmConfig {
    #[serde(default)]
    pub neo4j: Neo4jConfig,

    #[serde(default)]
    pub session: SessionSettings,
}

/// Connection settings for the Bolt driver.
#[derive(Debug, Clone, Deserialize)]
pub struct Neo4jConfig {
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Target database; the server default when unset.
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

/// Behavior of sessions opened from this configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Type used when a transaction is opened without an explicit type.
    #[serde(default)]
    pub default_transaction_type: TransactionType,

    /// Version assigned to a versioned entity on its first save.
    #[serde(default)]
    pub version_initial_value: i64,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_max_connections() -> usize {
    16
}

fn default_fetch_size() -> usize {
    256
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: String::new(),
            database: None,
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_transaction_type: TransactionType::ReadWrite,
            version_initial_value: 0,
        }
    }
}

impl OgmConfig {
    /// Load configuration from an optional file named `file_prefix` (any
    /// extension the `config` crate understands) layered under
    /// `GRAPHMAP__`-prefixed environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("GRAPHMAP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: OgmConfig = cfg.try_deserialize()?;
        tracing::debug!(uri = %loaded.neo4j.uri, "Configuration loaded");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = OgmConfig::default();
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.neo4j.max_connections, 16);
        assert_eq!(config.neo4j.fetch_size, 256);
        assert_eq!(
            config.session.default_transaction_type,
            TransactionType::ReadWrite
        );
        assert_eq!(config.session.version_initial_value, 0);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphmap.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[neo4j]\nuri = \"bolt://db:7687\"\npassword = \"secret\"\n\n[session]\ndefault_transaction_type = \"read_only\""
        )
        .unwrap();

        let prefix = dir.path().join("graphmap");
        let config = OgmConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.neo4j.uri, "bolt://db:7687");
        assert_eq!(config.neo4j.password, "secret");
        assert_eq!(config.neo4j.fetch_size, 256);
        assert_eq!(
            config.session.default_transaction_type,
            TransactionType::ReadOnly
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = OgmConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.neo4j.user, "neo4j");
    }
}
