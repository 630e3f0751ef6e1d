//! Configuration file structures for unzip-bridge.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`GuestConfig`]: Where to find the guest module
//! - [`CliConfig`]: Command-line front end settings

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::BridgeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [bridge.engine]
/// fuel_metering = true
///
/// [bridge.execution]
/// max_fuel = 5_000_000_000
/// max_memory_mb = 256
///
/// [bridge.imports]
/// "__wbg_new_abda76e883ba8a5f" = "new_array"
/// "__wbg_set_a68214f35c417fa9" = "array_set"
///
/// [guest]
/// module_path = "./wasm_unzipper_bg.wasm.b64"
///
/// [cli]
/// timeout_secs = 30
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Bridge configuration (engine, execution limits, import bindings).
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Guest module location.
    #[serde(default)]
    pub guest: GuestConfig,

    /// CLI settings.
    #[serde(default)]
    pub cli: CliConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Guest module location.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GuestConfig {
    /// Path to a file holding the base64-encoded guest module.
    ///
    /// When unset, the module embedded at build time is used.
    #[serde(default)]
    pub module_path: Option<String>,
}

/// CLI configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliConfig {
    /// Give up on an extraction after this many seconds.
    ///
    /// The bridge has no timeout of its own; the CLI runs it on a worker
    /// thread and exits when the deadline passes.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Pretty-print documents instead of one JSON value per line.
    #[serde(default = "defaults::pretty")]
    pub pretty: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            pretty: defaults::pretty(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub const fn pretty() -> bool {
        false
    }
}
