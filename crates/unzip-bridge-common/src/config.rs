//! Configuration structures for the bridge.
//!
//! This module defines configuration options for various components:
//! - [`BridgeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings
//! - [`ExecutionConfig`]: Per-call resource limits (fuel, memory)

use serde::{Deserialize, Serialize};

use crate::ImportTable;

/// Top-level bridge configuration.
///
/// This structure contains all configuration options for a bridge
/// instance. It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Bindings for build-specific guest imports.
    #[serde(default)]
    pub imports: ImportTable,
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable fuel metering.
    ///
    /// When enabled, each guest call is refuelled to
    /// [`ExecutionConfig::max_fuel`] and fails with `FuelExhausted` when it
    /// runs out. Off by default: the bridge itself imposes no time limit.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Capture wasm backtraces for traps and guest-created errors.
    #[serde(default = "defaults::wasm_backtrace")]
    pub wasm_backtrace: bool,

    /// Optimize generated code for speed.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuel_metering: defaults::fuel_metering(),
            wasm_backtrace: defaults::wasm_backtrace(),
            optimize: defaults::optimize(),
        }
    }
}

/// Per-call execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Fuel granted to each guest call when metering is enabled.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Maximum linear memory in megabytes.
    ///
    /// Guest `memory.grow` beyond this limit fails, which a wasm-bindgen
    /// guest turns into an allocation trap.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl ExecutionConfig {
    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn fuel_metering() -> bool {
        false
    }

    pub const fn wasm_backtrace() -> bool {
        true
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000_000
    }

    pub const fn max_memory_mb() -> u32 {
        1024
    }
}
