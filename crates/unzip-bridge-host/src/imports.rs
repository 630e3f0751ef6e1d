//! Host import registration for Wasmtime linkers.
//!
//! The guest is a wasm-bindgen build and imports a fixed set of callbacks
//! from its JS glue module. Every function import the guest declares is
//! resolved through an [`ImportTable`] to a [`HostImport`] capability and
//! registered under the exact module and field name the guest uses.
//! Signatures are checked by Wasmtime when the guest is instantiated.
//!
//! # Handle Ownership
//!
//! Capabilities that store a value into a container differ in ownership,
//! mirroring the JS glue:
//! - `array_set` and `object_set` take ownership of their key and value
//!   handles, which are released.
//! - `array_push` and `map_set` only borrow their arguments.
//! - `map_set` returns a fresh handle to the map.

use std::collections::BTreeSet;

use tracing::{debug, trace, warn};
use wasmtime::{AsContextMut, Caller, Extern, Linker, Memory, WasmBacktrace};

use unzip_bridge_common::{BridgeError, HostImport, ImportTable, MarshalError};
use unzip_bridge_core::codec::{pass_string, read_string};
use unzip_bridge_core::describe::describe;
use unzip_bridge_core::instance::MEMORY_EXPORT;
use unzip_bridge_core::memory::WORD_SIZE;
use unzip_bridge_core::value::{insert_entry, insert_property};
use unzip_bridge_core::{CompiledModule, GuestContext, GuestExports, HostValue, WasmEngine, WasmHeap};

/// Most `undefined` holes a single `array_set` may open past the end.
pub const MAX_ARRAY_GAP: usize = 1 << 16;

/// Build a linker that satisfies every import of `module`.
///
/// # Errors
///
/// Returns `UnresolvedImport` if the guest imports a symbol the table does
/// not bind, or any non-function import.
pub fn build_linker(
    engine: &WasmEngine,
    module: &CompiledModule,
    table: &ImportTable,
) -> Result<Linker<GuestContext>, BridgeError> {
    let mut linker = Linker::new(engine.inner());
    register_imports(&mut linker, module, table)?;
    Ok(linker)
}

/// Register a host function for each function import of `module`.
///
/// # Errors
///
/// Returns `UnresolvedImport` for the first import that cannot be bound.
pub fn register_imports(
    linker: &mut Linker<GuestContext>,
    module: &CompiledModule,
    table: &ImportTable,
) -> Result<(), BridgeError> {
    if let Some(import) = module.non_function_imports().into_iter().next() {
        return Err(BridgeError::UnresolvedImport {
            module: import.module,
            name: import.name,
        });
    }

    let mut registered = BTreeSet::new();
    for import in module.function_imports() {
        if !registered.insert((import.module.clone(), import.name.clone())) {
            continue;
        }

        let Some(capability) = table.resolve(&import.name) else {
            warn!(module = %import.module, name = %import.name, "Guest import has no host binding");
            return Err(BridgeError::UnresolvedImport {
                module: import.module,
                name: import.name,
            });
        };

        register(linker, &import.module, &import.name, capability).map_err(|e| {
            BridgeError::invalid_config(format!(
                "Failed to register {capability} as {}::{}: {e}",
                import.module, import.name
            ))
        })?;
        debug!(module = %import.module, name = %import.name, %capability, "Bound guest import");
    }

    Ok(())
}

fn register(
    linker: &mut Linker<GuestContext>,
    module: &str,
    name: &str,
    capability: HostImport,
) -> wasmtime::Result<()> {
    match capability {
        HostImport::NewArray => linker.func_wrap(module, name, new_array)?,
        HostImport::NewObject => linker.func_wrap(module, name, new_object)?,
        HostImport::NewMap => linker.func_wrap(module, name, new_map)?,
        HostImport::ArraySet => linker.func_wrap(module, name, array_set)?,
        HostImport::ArrayPush => linker.func_wrap(module, name, array_push)?,
        HostImport::ObjectSet => linker.func_wrap(module, name, object_set)?,
        HostImport::MapSet => linker.func_wrap(module, name, map_set)?,
        HostImport::BigIntFromI64 => linker.func_wrap(module, name, bigint_from_i64)?,
        HostImport::BigIntFromU64 => linker.func_wrap(module, name, bigint_from_u64)?,
        HostImport::NumberNew => linker.func_wrap(module, name, number_new)?,
        HostImport::StringNew => linker.func_wrap(module, name, string_new)?,
        HostImport::ErrorNew => linker.func_wrap(module, name, error_new)?,
        HostImport::IsString => linker.func_wrap(module, name, is_string)?,
        HostImport::ObjectDropRef => linker.func_wrap(module, name, object_drop_ref)?,
        HostImport::ObjectCloneRef => linker.func_wrap(module, name, object_clone_ref)?,
        HostImport::DebugString => linker.func_wrap(module, name, debug_string)?,
        HostImport::Throw => linker.func_wrap(module, name, throw)?,
    };
    Ok(())
}

// ============================================================================
// Constructors
// ============================================================================

fn new_array(mut caller: Caller<'_, GuestContext>) -> u32 {
    caller.data_mut().handles.allocate(HostValue::array())
}

fn new_object(mut caller: Caller<'_, GuestContext>) -> u32 {
    caller.data_mut().handles.allocate(HostValue::object())
}

fn new_map(mut caller: Caller<'_, GuestContext>) -> u32 {
    caller.data_mut().handles.allocate(HostValue::map())
}

fn bigint_from_i64(mut caller: Caller<'_, GuestContext>, value: i64) -> u32 {
    caller
        .data_mut()
        .handles
        .allocate(HostValue::BigInt(i128::from(value)))
}

fn bigint_from_u64(mut caller: Caller<'_, GuestContext>, value: i64) -> u32 {
    // The guest passes the u64 bit pattern in an i64.
    let value = u64::from_ne_bytes(value.to_ne_bytes());
    caller
        .data_mut()
        .handles
        .allocate(HostValue::BigInt(i128::from(value)))
}

fn number_new(mut caller: Caller<'_, GuestContext>, value: f64) -> u32 {
    caller.data_mut().handles.allocate(HostValue::Number(value))
}

fn string_new(mut caller: Caller<'_, GuestContext>, ptr: u32, len: u32) -> wasmtime::Result<u32> {
    let text = read_guest_string(&mut caller, ptr, len)?;
    trace!(ptr, len, "string_new");
    Ok(caller.data_mut().handles.allocate(HostValue::String(text)))
}

fn error_new(mut caller: Caller<'_, GuestContext>, ptr: u32, len: u32) -> wasmtime::Result<u32> {
    let message = read_guest_string(&mut caller, ptr, len)?;
    let backtrace = WasmBacktrace::capture(&caller);
    let stack = (!backtrace.frames().is_empty()).then(|| backtrace.to_string());

    Ok(caller
        .data_mut()
        .handles
        .allocate(HostValue::error("Error", message, stack)))
}

// ============================================================================
// Container writes
// ============================================================================

fn array_set(
    mut caller: Caller<'_, GuestContext>,
    array: u32,
    index: u32,
    value: u32,
) -> wasmtime::Result<()> {
    let handles = &mut caller.data_mut().handles;
    let target = handles.inspect(array)?.clone();
    let value = handles.take_and_remove(value)?;

    let HostValue::Array(items) = target else {
        return Err(not_a_container(array, "array"));
    };
    let mut items = items.lock();
    let len = items.len();
    let slot = index as usize;
    if slot > len + MAX_ARRAY_GAP {
        return Err(MarshalError::IndexTooFar { handle: array, index, len }.into());
    }
    if slot >= len {
        items.resize(slot + 1, HostValue::Undefined);
    }
    items[slot] = value;
    Ok(())
}

fn array_push(caller: Caller<'_, GuestContext>, array: u32, value: u32) -> wasmtime::Result<u32> {
    let handles = &caller.data().handles;
    let target = handles.inspect(array)?.clone();
    let value = handles.inspect(value)?.clone();

    let HostValue::Array(items) = target else {
        return Err(not_a_container(array, "array"));
    };
    let mut items = items.lock();
    items.push(value);
    Ok(u32::try_from(items.len())?)
}

fn object_set(
    mut caller: Caller<'_, GuestContext>,
    object: u32,
    key: u32,
    value: u32,
) -> wasmtime::Result<()> {
    let handles = &mut caller.data_mut().handles;
    let target = handles.inspect(object)?.clone();
    let key = handles.take_and_remove(key)?;
    let value = handles.take_and_remove(value)?;

    let HostValue::Object(entries) = target else {
        return Err(not_a_container(object, "object"));
    };
    insert_property(&mut entries.lock(), key.property_key(), value);
    Ok(())
}

fn map_set(
    mut caller: Caller<'_, GuestContext>,
    map: u32,
    key: u32,
    value: u32,
) -> wasmtime::Result<u32> {
    let handles = &mut caller.data_mut().handles;
    let target = handles.inspect(map)?.clone();
    let key = handles.inspect(key)?.clone();
    let value = handles.inspect(value)?.clone();

    let HostValue::Map(entries) = &target else {
        return Err(not_a_container(map, "map"));
    };
    insert_entry(&mut entries.lock(), key, value);
    Ok(handles.allocate(target))
}

// ============================================================================
// Handle management and inspection
// ============================================================================

fn is_string(caller: Caller<'_, GuestContext>, handle: u32) -> wasmtime::Result<u32> {
    let value = caller.data().handles.inspect(handle)?;
    Ok(u32::from(value.is_string()))
}

fn object_drop_ref(mut caller: Caller<'_, GuestContext>, handle: u32) {
    caller.data_mut().handles.release(handle);
}

fn object_clone_ref(mut caller: Caller<'_, GuestContext>, handle: u32) -> wasmtime::Result<u32> {
    let handles = &mut caller.data_mut().handles;
    let value = handles.inspect(handle)?.clone();
    Ok(handles.allocate(value))
}

/// Describe a handle into guest memory; `ptr` and `len` land in the two
/// words starting at `retptr`.
fn debug_string(mut caller: Caller<'_, GuestContext>, retptr: u32, handle: u32) -> wasmtime::Result<()> {
    let text = describe(caller.data().handles.inspect(handle)?);

    let exports = GuestExports::from_caller(&mut caller)?;
    let region = pass_string(&mut WasmHeap::new(&mut caller, &exports), &text)?;

    let (data, ctx) = exports.memory().data_and_store_mut(caller.as_context_mut());
    let mut words = ctx.views.words_mut(data);
    let index = retptr / WORD_SIZE;
    words.write_u32(index, region.ptr)?;
    words.write_u32(index + 1, region.len)?;

    trace!(handle, ptr = region.ptr, len = region.len, "debug_string");
    Ok(())
}

fn throw(mut caller: Caller<'_, GuestContext>, ptr: u32, len: u32) -> wasmtime::Result<()> {
    let message = read_guest_string(&mut caller, ptr, len)?;
    debug!(call_id = %caller.data().call_id, %message, "Guest threw");
    Err(BridgeError::guest_threw(message).into())
}

// ============================================================================
// Helpers
// ============================================================================

fn guest_memory(caller: &mut Caller<'_, GuestContext>) -> Result<Memory, BridgeError> {
    caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| BridgeError::missing_export(MEMORY_EXPORT))
}

fn read_guest_string(
    caller: &mut Caller<'_, GuestContext>,
    ptr: u32,
    len: u32,
) -> Result<String, BridgeError> {
    let memory = guest_memory(caller)?;
    let (data, ctx) = memory.data_and_store_mut(caller.as_context_mut());
    Ok(read_string(&mut ctx.views, data, ptr, len)?)
}

fn not_a_container(handle: u32, expected: &'static str) -> wasmtime::Error {
    MarshalError::NotAContainer { handle, expected }.into()
}
