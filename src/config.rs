//! Configuration System
//!
//! Layered broker configuration: built-in defaults, the global config file,
//! an explicit file given on the command line, then `SOLC_BROKER__*`
//! environment variables.

use crate::error::BrokerError;
use crate::logging::{self, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod defaults;
mod sources;

pub use sources::global_file::global_config_path;

/// Prefix for environment overrides, e.g. `SOLC_BROKER__ARTIFACTS__PLATFORM`
pub const ENV_PREFIX: &str = "SOLC_BROKER";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// TCP address the broker listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Version warmed up when a client connects without naming one
    #[serde(default = "default_version")]
    pub default_version: String,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where compiler builds come from and where they are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Base URL of the binaries mirror
    #[serde(default = "default_binaries_url")]
    pub binaries_url: String,

    /// Platform directory on the mirror (`linux-amd64`, `macosx-amd64`, ...)
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Local directory downloaded builds are stored in
    #[serde(default = "default_artifacts_dir")]
    pub dir: PathBuf,

    /// Check downloaded builds against the manifest sha256
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
}

/// Contract cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_listen() -> String {
    "127.0.0.1:8547".to_string()
}

fn default_version() -> String {
    crate::input::DEFAULT_VERSION.to_string()
}

fn default_binaries_url() -> String {
    "https://binaries.soliditylang.org".to_string()
}

pub(crate) fn default_platform() -> String {
    if cfg!(target_os = "macos") {
        "macosx-amd64".to_string()
    } else if cfg!(target_os = "windows") {
        "windows-amd64".to_string()
    } else {
        "linux-amd64".to_string()
    }
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "solc-broker")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".solc-broker"))
}

fn default_artifacts_dir() -> PathBuf {
    data_dir().join("artifacts")
}

fn default_cache_path() -> PathBuf {
    data_dir().join("contracts")
}

fn default_true() -> bool {
    true
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            binaries_url: default_binaries_url(),
            platform: default_platform(),
            dir: default_artifacts_dir(),
            verify_checksums: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            default_version: default_version(),
            artifacts: ArtifactsConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Listen(String),
    Artifacts(String),
    Cache(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Listen(msg) => write!(f, "listen: {}", msg),
            ValidationError::Artifacts(msg) => write!(f, "artifacts: {}", msg),
            ValidationError::Cache(msg) => write!(f, "cache: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl BrokerConfig {
    /// Validate the entire configuration, collecting every problem
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::Listen(format!(
                "'{}' is not a socket address",
                self.listen
            )));
        }

        if !self.artifacts.binaries_url.starts_with("http://")
            && !self.artifacts.binaries_url.starts_with("https://")
        {
            errors.push(ValidationError::Artifacts(format!(
                "binaries_url '{}' must be an http(s) URL",
                self.artifacts.binaries_url
            )));
        }
        if self.artifacts.platform.trim().is_empty() {
            errors.push(ValidationError::Artifacts("platform cannot be empty".to_string()));
        }
        if self.artifacts.dir.as_os_str().is_empty() {
            errors.push(ValidationError::Artifacts("dir cannot be empty".to_string()));
        }

        if self.cache.enabled && self.cache.path.as_os_str().is_empty() {
            errors.push(ValidationError::Cache("path cannot be empty".to_string()));
        }

        if let Err(e) = logging::validate_format(&self.logging.format) {
            errors.push(ValidationError::Logging(e.detail().to_string()));
        }
        if let Err(e) = logging::validate_output(&self.logging.output) {
            errors.push(ValidationError::Logging(e.detail().to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into a single `ConfigError`
    pub fn validated(self) -> Result<Self, BrokerError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            BrokerError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}

/// Builds a [`BrokerConfig`] from the layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, optional explicit file, environment
    pub fn load(explicit: Option<&Path>) -> Result<BrokerConfig, BrokerError> {
        let mut builder = defaults::builder_with_defaults()?;
        builder = sources::global_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = sources::explicit_file::add_to_builder(builder, path)?;
        }
        builder = sources::environment::add_to_builder(builder);
        let config: BrokerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load a single file on top of the defaults, ignoring global and env sources
    pub fn load_from_file(path: &Path) -> Result<BrokerConfig, BrokerError> {
        let builder = defaults::builder_with_defaults()?;
        let builder = sources::explicit_file::add_to_builder(builder, path)?;
        let config: BrokerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}
