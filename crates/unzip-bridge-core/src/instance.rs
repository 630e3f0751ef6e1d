//! Guest instance lifecycle management.
//!
//! This module provides [`GuestInstance`], which handles the lifecycle of a
//! wasm-bindgen guest:
//!
//! 1. Instantiate the module with a fresh store and a prepared linker
//! 2. Look up the allocator, memory and entry point exports
//! 3. Run the optional start function
//! 4. Call the entry point once per input, collecting results and metrics

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{
    AsContextMut, Caller, Extern, Func, Instance, Linker, Memory, Store, Trap, TypedFunc,
};

use crate::codec::{GuestHeap, pass_bytes};
use crate::memory::MemoryViews;
use crate::store::{GuestContext, calculate_fuel_consumed, create_store, get_remaining_fuel};
use crate::value::HostValue;
use crate::{CompiledModule, WasmEngine};
use unzip_bridge_common::{BridgeError, ExecutionConfig, MarshalError};

/// Linear memory export.
pub const MEMORY_EXPORT: &str = "memory";
/// Guest allocator: `(size, align) -> ptr`.
pub const MALLOC_EXPORT: &str = "__wbindgen_malloc";
/// Guest reallocator: `(ptr, old_size, new_size, align) -> ptr`.
pub const REALLOC_EXPORT: &str = "__wbindgen_realloc";
/// Entry point: `(ptr, len) -> handle`.
pub const ENTRY_EXPORT: &str = "extract_jsons";
/// Optional start function run once after instantiation.
pub const START_EXPORT: &str = "__wbindgen_start";

type MallocFunc = TypedFunc<(u32, u32), u32>;
type ReallocFunc = TypedFunc<(u32, u32, u32, u32), u32>;

/// Exports every guest call needs to marshal data.
#[derive(Clone)]
pub struct GuestExports {
    memory: Memory,
    malloc: MallocFunc,
    realloc: ReallocFunc,
}

impl GuestExports {
    /// Look up the exports on a fresh instance.
    ///
    /// # Errors
    ///
    /// Returns `MissingExport` if an export is absent or has the wrong type.
    pub fn from_instance(
        store: &mut Store<GuestContext>,
        instance: &Instance,
    ) -> Result<Self, BridgeError> {
        let (memory, malloc, realloc) =
            lookup(|name| instance.get_export(&mut *store, name))?;
        Self::typed(&*store, memory, &malloc, &realloc)
    }

    /// Look up the exports of the instance calling into the host.
    ///
    /// # Errors
    ///
    /// Returns `MissingExport` if an export is absent or has the wrong type.
    pub fn from_caller(caller: &mut Caller<'_, GuestContext>) -> Result<Self, BridgeError> {
        let (memory, malloc, realloc) = lookup(|name| caller.get_export(name))?;
        Self::typed(&*caller, memory, &malloc, &realloc)
    }

    /// The guest's linear memory.
    pub fn memory(&self) -> Memory {
        self.memory
    }

    fn typed(
        store: impl wasmtime::AsContext,
        memory: Memory,
        malloc: &Func,
        realloc: &Func,
    ) -> Result<Self, BridgeError> {
        let malloc = malloc
            .typed(&store)
            .map_err(|_| BridgeError::missing_export(MALLOC_EXPORT))?;
        let realloc = realloc
            .typed(&store)
            .map_err(|_| BridgeError::missing_export(REALLOC_EXPORT))?;

        Ok(Self {
            memory,
            malloc,
            realloc,
        })
    }
}

fn lookup(
    mut get: impl FnMut(&str) -> Option<Extern>,
) -> Result<(Memory, Func, Func), BridgeError> {
    let memory = get(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| BridgeError::missing_export(MEMORY_EXPORT))?;
    let malloc = get(MALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or_else(|| BridgeError::missing_export(MALLOC_EXPORT))?;
    let realloc = get(REALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or_else(|| BridgeError::missing_export(REALLOC_EXPORT))?;

    Ok((memory, malloc, realloc))
}

/// [`GuestHeap`] over a live store: the guest allocator and its memory.
pub struct WasmHeap<'e, S> {
    ctx: S,
    exports: &'e GuestExports,
}

impl<'e, S> WasmHeap<'e, S>
where
    S: AsContextMut<Data = GuestContext>,
{
    pub fn new(ctx: S, exports: &'e GuestExports) -> Self {
        Self { ctx, exports }
    }
}

impl<S> GuestHeap for WasmHeap<'_, S>
where
    S: AsContextMut<Data = GuestContext>,
{
    fn malloc(&mut self, size: u32, align: u32) -> Result<u32, BridgeError> {
        self.exports
            .malloc
            .call(&mut self.ctx, (size, align))
            .map_err(guest_call_error)
    }

    fn realloc(
        &mut self,
        ptr: u32,
        old_size: u32,
        new_size: u32,
        align: u32,
    ) -> Result<u32, BridgeError> {
        self.exports
            .realloc
            .call(&mut self.ctx, (ptr, old_size, new_size, align))
            .map_err(guest_call_error)
    }

    fn memory(&mut self) -> (&mut [u8], &mut MemoryViews) {
        let (data, ctx) = self
            .exports
            .memory
            .data_and_store_mut(self.ctx.as_context_mut());
        (data, &mut ctx.views)
    }
}

/// An instantiated guest, ready to extract.
///
/// Owns the [`Store`], so the handle table and linear memory persist for as
/// long as the instance does. Calls are synchronous and take `&mut self`.
pub struct GuestInstance {
    store: Store<GuestContext>,
    exports: GuestExports,
    entry: TypedFunc<(u32, u32), u32>,
    fuel_metered: bool,
    max_fuel: u64,
}

impl GuestInstance {
    /// Instantiate `module` and run its start function, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if instantiation fails, a required export is missing,
    /// or the start function fails.
    #[instrument(skip_all, fields(content_hash = %module.content_hash()))]
    pub fn instantiate(
        engine: &WasmEngine,
        linker: &Linker<GuestContext>,
        module: &CompiledModule,
        config: &ExecutionConfig,
    ) -> Result<Self, BridgeError> {
        let mut store = create_store(engine, config)?;

        debug!("Instantiating guest module");

        let instance = linker
            .instantiate(&mut store, module.inner())
            .map_err(|e| BridgeError::instantiation_failed(format!("{e:#}")))?;

        let exports = GuestExports::from_instance(&mut store, &instance)?;
        let entry = instance
            .get_func(&mut store, ENTRY_EXPORT)
            .ok_or_else(|| BridgeError::missing_export(ENTRY_EXPORT))?
            .typed::<(u32, u32), u32>(&store)
            .map_err(|e| {
                BridgeError::instantiation_failed(format!("Entry point '{ENTRY_EXPORT}': {e}"))
            })?;

        if let Some(start) = instance.get_func(&mut store, START_EXPORT) {
            debug!("Running guest start function");
            start
                .typed::<(), ()>(&store)
                .map_err(|e| {
                    BridgeError::instantiation_failed(format!(
                        "Start function '{START_EXPORT}': {e}"
                    ))
                })?
                .call(&mut store, ())
                .map_err(guest_call_error)?;
        }
        store.data_mut().views.invalidate();

        Ok(Self {
            store,
            exports,
            entry,
            fuel_metered: engine.is_fuel_metered(),
            max_fuel: config.max_fuel,
        })
    }

    /// Pass `input` to the entry point and take ownership of the result.
    ///
    /// # Errors
    ///
    /// Returns an error if marshalling fails, the guest throws or traps,
    /// fuel runs out, or the returned handle is not live.
    #[instrument(skip(self, input), fields(input_len = input.len()))]
    pub fn call_entry(&mut self, call_id: &str, input: &[u8]) -> Result<HostValue, BridgeError> {
        let start = Instant::now();

        if self.fuel_metered {
            self.store
                .set_fuel(self.max_fuel)
                .map_err(|e| BridgeError::invalid_config(format!("Failed to set fuel: {e}")))?;
        }
        let initial_fuel = get_remaining_fuel(&self.store).unwrap_or(0);
        call_id.clone_into(&mut self.store.data_mut().call_id);

        let region = pass_bytes(&mut WasmHeap::new(&mut self.store, &self.exports), input)?;
        debug!(ptr = region.ptr, len = region.len, "Input passed to guest");

        let result = self.entry.call(&mut self.store, (region.ptr, region.len));
        self.store.data_mut().views.invalidate();

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &self.store);
        let memory_bytes = self.exports.memory.data_size(&self.store);
        let duration = start.elapsed();

        let outcome = match result {
            Ok(handle) => self
                .store
                .data_mut()
                .handles
                .take_and_remove(handle)
                .map_err(BridgeError::from),
            Err(trap) => Err(guest_call_error(trap)),
        };

        let ctx = self.store.data_mut();
        ctx.metrics.fuel_consumed = fuel_consumed;
        ctx.metrics.memory_bytes = memory_bytes;
        ctx.metrics.live_handles = ctx.handles.live();
        ctx.metrics.duration = Some(duration);

        match &outcome {
            Ok(value) => info!(
                duration_ms = duration.as_millis(),
                fuel_consumed,
                memory_bytes,
                live_handles = ctx.metrics.live_handles,
                result = value.kind(),
                "Guest call completed"
            ),
            Err(BridgeError::FuelExhausted) => warn!(
                duration_ms = duration.as_millis(),
                fuel_consumed,
                "Guest call terminated: fuel exhausted"
            ),
            Err(e) => error!(
                duration_ms = duration.as_millis(),
                fuel_consumed,
                error = %e,
                "Guest call failed"
            ),
        }

        outcome
    }

    /// The per-guest context.
    pub fn context(&self) -> &GuestContext {
        self.store.data()
    }

    /// Current size of the guest's linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.exports.memory.data_size(&self.store)
    }
}

impl std::fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("context", self.store.data())
            .field("fuel_metered", &self.fuel_metered)
            .finish_non_exhaustive()
    }
}

/// Map an error from a guest call to a [`BridgeError`].
///
/// Errors raised by host imports travel through the guest as opaque
/// `wasmtime::Error`s; they are recovered here with their original variant.
pub fn guest_call_error(error: wasmtime::Error) -> BridgeError {
    if is_out_of_fuel(&error) {
        return BridgeError::FuelExhausted;
    }

    let error = match error.downcast::<BridgeError>() {
        Ok(bridge) => return bridge,
        Err(error) => error,
    };
    let error = match error.downcast::<MarshalError>() {
        Ok(marshal) => return marshal.into(),
        Err(error) => error,
    };

    let (message, code) = extract_trap_info(&error);
    debug!(trap_code = ?code, "Guest trapped");
    BridgeError::trap(message)
}

/// Extract human-readable trap information.
fn extract_trap_info(error: &wasmtime::Error) -> (String, Option<String>) {
    let message = format!("{error:#}");

    // Try to get the trap code
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));

    (message, code)
}

/// Check if an error is due to fuel exhaustion.
fn is_out_of_fuel(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
}
