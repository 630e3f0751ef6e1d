//! Core guest runtime for unzip-bridge.
//!
//! This crate provides the pieces that move values between the host and a
//! wasm-bindgen guest:
//! - [`HandleTable`]: Integer handles standing in for host values
//! - [`MemoryViews`]: Byte and word views that follow linear memory growth
//! - [`codec`]: Passing and reading bytes and UTF-8 text
//! - [`describe`]: Diagnostic text for host values
//! - [`WasmEngine`], [`CompiledModule`], [`GuestInstance`]: Guest lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Synchronous, optionally fuel-metered)                 │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (Decoded from base64, compiled once)                   │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<GuestContext> + GuestInstance          │
//! │  (One per bridge)                                       │
//! │  - HandleTable                                          │
//! │  - Linear memory + MemoryViews                          │
//! │  - Metrics of the last call                             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod describe;
pub mod engine;
pub mod handles;
pub mod instance;
pub mod memory;
pub mod module;
pub mod store;
pub mod value;

pub use codec::{GuestHeap, Marshalled};
pub use engine::WasmEngine;
pub use handles::HandleTable;
pub use instance::{GuestExports, GuestInstance, WasmHeap, guest_call_error};
pub use memory::MemoryViews;
pub use module::{CompiledModule, FunctionImport};
pub use store::{ExecutionMetrics, GuestContext};
pub use value::{HostValue, JsonMode};
