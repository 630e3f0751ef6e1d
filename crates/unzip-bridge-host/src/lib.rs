//! Host side of the unzip-bridge.
//!
//! This crate provides the callbacks a wasm-bindgen guest imports and the
//! facade host code calls.
//!
//! # Components
//!
//! - [`imports`]: Host imports, resolved per guest build through an import table
//! - [`bridge`]: [`Bridge`], which loads the guest and extracts documents
//!
//! # Failure Model
//!
//! The guest is untrusted with respect to the boundary contract:
//!
//! 1. **Handles**: A dead or out-of-range handle fails the call with
//!    `InvalidHandle` instead of reading stale state.
//! 2. **Memory**: Every read and write is bounds-checked against the current
//!    linear memory.
//! 3. **Resources**: Linear memory is capped, and fuel metering can bound CPU.

pub mod bridge;
pub mod imports;

pub use bridge::{Bridge, EMBEDDED_MODULE, decode_documents};
pub use imports::{build_linker, register_imports};
