//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the bridge. It is:
//! - Synchronous: a guest call blocks the calling thread until it returns
//! - Optionally fuel-metered for callers that need a CPU bound
//! - Set up to capture wasm backtraces for traps and guest-created errors

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, OptLevel};

use unzip_bridge_common::{BridgeError, EngineConfig};

/// Shareable WebAssembly engine wrapper.
///
/// The engine holds compilation settings only and no per-guest state, so
/// one engine can back several bridges (one per thread).
///
/// # Example
///
/// ```ignore
/// use unzip_bridge_common::EngineConfig;
/// use unzip_bridge_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid.
    pub fn new(config: &EngineConfig) -> Result<Self, BridgeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.consume_fuel(config.fuel_metering);
        wasmtime_config.wasm_backtrace(config.wasm_backtrace);
        wasmtime_config.cranelift_opt_level(if config.optimize {
            OptLevel::Speed
        } else {
            OptLevel::None
        });

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            BridgeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            fuel_metering = config.fuel_metering,
            wasm_backtrace = config.wasm_backtrace,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if fuel metering is enabled.
    pub fn is_fuel_metered(&self) -> bool {
        self.config.fuel_metering
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("fuel_metering", &self.config.fuel_metering)
            .field("wasm_backtrace", &self.config.wasm_backtrace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();

        assert!(!engine.is_fuel_metered());
    }

    #[test]
    fn test_engine_creation_with_fuel() {
        let config = EngineConfig {
            fuel_metering: true,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        assert!(engine.is_fuel_metered());
    }

    #[test]
    fn test_engine_clone_shares_inner() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let clone = engine.clone();

        assert!(Engine::same(engine.inner(), clone.inner()));
    }

    #[test]
    fn test_engine_debug() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("fuel_metering"));
    }
}
