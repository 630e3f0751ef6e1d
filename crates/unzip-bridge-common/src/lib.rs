//! Common types, errors, and configuration for unzip-bridge.
//!
//! This crate provides shared functionality used across the workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for bridge settings
//! - The guest import contract ([`HostImport`], [`ImportTable`])

pub mod config;
pub mod config_file;
pub mod error;
pub mod imports;

pub use config::{BridgeConfig, EngineConfig, ExecutionConfig};
pub use config_file::{CliConfig, ConfigFile, ConfigFileError, GuestConfig};
pub use error::{BridgeError, MarshalError};
pub use imports::{HostImport, ImportTable};
