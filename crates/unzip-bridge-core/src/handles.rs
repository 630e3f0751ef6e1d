//! Handle table: the only place host values acquire a guest-visible identity.
//!
//! The guest refers to host values by 32-bit handles. Handles below
//! [`RESERVED`] are permanently bound to sentinels that wasm-bindgen guests
//! hard-code (`JsValue::UNDEFINED`, `JsValue::NULL`, `JsValue::TRUE`,
//! `JsValue::FALSE`, and the borrowed-reference pool below them). Handles at
//! or above [`RESERVED`] are allocated on demand and recycled LIFO.

use tracing::warn;

use unzip_bridge_common::MarshalError;

use crate::value::HostValue;

/// Size of the pool below the fixed sentinels.
pub const POOL_SIZE: u32 = 128;
/// `undefined`.
pub const UNDEFINED: u32 = POOL_SIZE;
/// `null`.
pub const NULL: u32 = POOL_SIZE + 1;
/// `true`.
pub const TRUE: u32 = POOL_SIZE + 2;
/// `false`.
pub const FALSE: u32 = POOL_SIZE + 3;
/// First dynamically allocated handle.
pub const RESERVED: u32 = POOL_SIZE + 4;

/// Slot arena mapping handles to host values.
///
/// Free slots hold `None`; their indices sit on an explicit free stack so
/// the most recently released handle is the next one handed out.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Option<HostValue>>,
    free: Vec<u32>,
}

impl HandleTable {
    /// Create a table holding only the reserved sentinels.
    pub fn new() -> Self {
        let mut slots: Vec<Option<HostValue>> = (0..=UNDEFINED)
            .map(|_| Some(HostValue::Undefined))
            .collect();
        slots.push(Some(HostValue::Null));
        slots.push(Some(HostValue::Bool(true)));
        slots.push(Some(HostValue::Bool(false)));
        debug_assert_eq!(slots.len(), RESERVED as usize);

        Self {
            slots,
            free: Vec::new(),
        }
    }

    /// Store `value` and return its handle (always `>= RESERVED`).
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate(&mut self, value: HostValue) -> u32 {
        if let Some(handle) = self.free.pop() {
            self.slots[handle as usize] = Some(value);
            return handle;
        }

        let handle = self.slots.len() as u32;
        self.slots.push(Some(value));
        handle
    }

    /// Read the value behind `handle` without changing the table.
    pub fn inspect(&self, handle: u32) -> Result<&HostValue, MarshalError> {
        self.slots
            .get(handle as usize)
            .and_then(Option::as_ref)
            .ok_or(MarshalError::InvalidHandle { handle })
    }

    /// Read the value behind `handle` and release it.
    ///
    /// Reserved handles yield a copy of their sentinel and stay bound.
    pub fn take_and_remove(&mut self, handle: u32) -> Result<HostValue, MarshalError> {
        if handle < RESERVED {
            return self.inspect(handle).cloned();
        }

        let value = self
            .slots
            .get_mut(handle as usize)
            .and_then(Option::take)
            .ok_or(MarshalError::InvalidHandle { handle })?;
        self.free.push(handle);
        Ok(value)
    }

    /// Free `handle` for reuse. Reserved handles are ignored.
    pub fn release(&mut self, handle: u32) {
        if handle < RESERVED {
            return;
        }

        match self.slots.get_mut(handle as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free.push(handle);
            }
            _ => warn!(handle, "Release of a handle that is not live"),
        }
    }

    /// Number of dynamically allocated handles currently live.
    pub fn live(&self) -> usize {
        self.slots.len() - RESERVED as usize - self.free.len()
    }

    /// Total number of slots, reserved ones included.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
