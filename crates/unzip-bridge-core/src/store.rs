//! Per-guest execution context and store management.
//!
//! This module provides:
//! - [`GuestContext`]: State reachable from host imports through [`wasmtime::Caller`]
//! - [`ExecutionMetrics`]: Measurements of the most recent guest call

use std::time::Duration;

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};

use crate::WasmEngine;
use crate::handles::HandleTable;
use crate::memory::MemoryViews;
use unzip_bridge_common::{BridgeError, ExecutionConfig};

/// Per-guest execution context.
///
/// One context lives as long as the guest instance. Unlike per-call state,
/// the handle table survives between calls so the guest may keep handles
/// across them.
pub struct GuestContext {
    /// Host values referenced from guest code.
    pub handles: HandleTable,

    /// Cached views over the guest's linear memory.
    pub views: MemoryViews,

    /// Identifier of the call in progress, for tracing.
    pub call_id: String,

    /// Metrics of the most recent call.
    pub metrics: ExecutionMetrics,

    limits: StoreLimits,
}

/// Execution metrics of one guest call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed (zero when metering is off).
    pub fuel_consumed: u64,

    /// Size of linear memory after the call.
    pub memory_bytes: usize,

    /// Dynamically allocated handles still live after the call.
    pub live_handles: usize,

    /// Wall-clock duration of the call.
    pub duration: Option<Duration>,
}

impl GuestContext {
    /// Create a context whose linear memory may grow to `max_memory_bytes`.
    pub fn new(max_memory_bytes: usize) -> Self {
        Self {
            handles: HandleTable::new(),
            views: MemoryViews::new(),
            call_id: String::new(),
            metrics: ExecutionMetrics::default(),
            limits: StoreLimitsBuilder::new()
                .memory_size(max_memory_bytes)
                .instances(1)
                .build(),
        }
    }
}

impl std::fmt::Debug for GuestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestContext")
            .field("call_id", &self.call_id)
            .field("live_handles", &self.handles.live())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store for one guest instance.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
) -> Result<Store<GuestContext>, BridgeError> {
    let context = GuestContext::new(config.max_memory_bytes());
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    if engine.is_fuel_metered() {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| BridgeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<GuestContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<GuestContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
