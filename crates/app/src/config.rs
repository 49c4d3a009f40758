//! Server configuration
//!
//! Loaded from `$ESTIMO_CONFIG`, else `<config_dir>/estimo.toml`, else
//! defaults. Every key is optional.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use estimo_net::{ServerConfig, SessionSettings};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "ESTIMO_CONFIG";

/// Database path selecting an in-memory store
pub const IN_MEMORY: &str = ":memory:";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Could not determine data directory")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub session: SessionSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: IpAddr,
    pub port: u16,
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub similar_limit: u32,
    pub similarity_tolerance: f64,
    pub max_stories_per_room: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub filter: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind: defaults.bind,
            port: defaults.port,
            max_connections: defaults.max_connections,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionSettings::default();
        Self {
            similar_limit: defaults.similar_limit,
            similarity_tolerance: defaults.similarity_tolerance,
            max_stories_per_room: defaults.max_stories_per_room,
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    InMemory,
    File(PathBuf),
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "estimo", "estimo")
}

impl AppConfig {
    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load from the environment-selected file, the user config dir, or defaults
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            return Ok((Self::load_from(&path)?, Some(path)));
        }

        if let Some(dirs) = project_dirs() {
            let path = dirs.config_dir().join("estimo.toml");
            if path.is_file() {
                return Ok((Self::load_from(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.session.similarity_tolerance;
        if !(0.0..1.0).contains(&tolerance) {
            return Err(ConfigError::Invalid {
                key: "session.similarity_tolerance",
                reason: format!("{tolerance} is outside [0, 1)"),
            });
        }
        if self.session.similar_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "session.similar_limit",
                reason: "must be at least 1".into(),
            });
        }
        if self.session.max_stories_per_room == 0 {
            return Err(ConfigError::Invalid {
                key: "session.max_stories_per_room",
                reason: "must be at least 1".into(),
            });
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "server.max_connections",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Resolve the database location, defaulting to the user data dir
    pub fn database_location(&self) -> Result<DatabaseLocation, ConfigError> {
        match &self.storage.database_path {
            Some(path) if path.as_os_str() == IN_MEMORY => Ok(DatabaseLocation::InMemory),
            Some(path) => Ok(DatabaseLocation::File(path.clone())),
            None => {
                let dirs = project_dirs().ok_or(ConfigError::NoDataDir)?;
                Ok(DatabaseLocation::File(dirs.data_dir().join("estimo.db")))
            }
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.server.bind,
            port: self.server.port,
            max_connections: self.server.max_connections,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            similar_limit: self.session.similar_limit,
            similarity_tolerance: self.session.similarity_tolerance,
            max_stories_per_room: self.session.max_stories_per_room,
        }
    }
}
