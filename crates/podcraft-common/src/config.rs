//! ---
//! pc_section: "01-core-functionality"
//! pc_subsection: "module"
//! pc_type: "source"
//! pc_scope: "code"
//! pc_description: "Project file loading and tool-level settings."
//! pc_version: "v0.0.0-prealpha"
//! pc_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogFormat;

/// File name searched for when locating a project.
pub const PROJECT_FILE_NAME: &str = "podcraft.toml";

/// Directory (relative to the project root) holding ephemeral, regenerable files.
pub const WORK_DIR_NAME: &str = ".tmp";

/// State document location relative to the project root.
pub const STATE_FILE_NAME: &str = ".tmp/state.json";

/// Upstream source of the game server image.
pub const DEFAULT_SERVER_SOURCE: &str =
    "https://github.com/minecraft-podman/docker-server/archive/master.tar.gz";

/// Upstream source of the management sidecar image.
pub const DEFAULT_MANAGER_SOURCE: &str =
    "https://github.com/minecraft-podman/manage/archive/master.tar.gz";

fn default_podman_binary() -> PathBuf {
    PathBuf::from("podman")
}

fn default_bridge_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read project file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse project file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse project configuration: {0}")]
    Inline(#[from] toml::de::Error),
}

/// A scalar value from the project file (build arguments and server properties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(value) => Some(*value),
            ConfigValue::Text(text) => match text.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<u16> {
        match self {
            ConfigValue::Integer(value) => u16::try_from(*value).ok(),
            ConfigValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(value) => write!(f, "{}", value),
            ConfigValue::Integer(value) => write!(f, "{}", value),
            ConfigValue::Float(value) => write!(f, "{}", value),
            ConfigValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<u16> for ConfigValue {
    fn from(value: u16) -> Self {
        ConfigValue::Integer(i64::from(value))
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

/// Declarative project description loaded from `podcraft.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Build arguments for the server image, passed through verbatim.
    #[serde(default)]
    pub server: IndexMap<String, ConfigValue>,
    #[serde(default)]
    pub management: ManagementConfig,
    /// User-supplied `server.properties` values.
    #[serde(default)]
    pub properties: IndexMap<String, ConfigValue>,
    /// Logical volume name (host path relative to the project root) to mount point.
    #[serde(default)]
    pub volumes: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagementConfig {
    #[serde(default)]
    pub plugins: Option<serde_json::Value>,
    /// Published port of the management API.
    #[serde(default, rename = "server-port")]
    pub server_port: Option<u16>,
    #[serde(flatten)]
    pub extra: IndexMap<String, toml::Value>,
}

impl ProjectConfig {
    /// Load the project file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(config_path = %path.display(), "loading project configuration");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl std::str::FromStr for ProjectConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(content)?)
    }
}

/// Tool-level settings controlling how the container runtime is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub podman: PathBuf,
    /// Route runtime commands through a scoped `podman system service` socket.
    pub use_bridge: bool,
    pub bridge_timeout: Duration,
    /// URL of a gzipped tarball or a local directory.
    pub server_source: String,
    pub manager_source: String,
    /// Forward image build output instead of discarding it.
    pub verbose_build: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            podman: default_podman_binary(),
            use_bridge: true,
            bridge_timeout: default_bridge_timeout(),
            server_source: DEFAULT_SERVER_SOURCE.to_owned(),
            manager_source: DEFAULT_MANAGER_SOURCE.to_owned(),
            verbose_build: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// When set, a daily rolling JSON log is written here as well.
    pub directory: Option<PathBuf>,
    pub file_prefix: Option<String>,
}
