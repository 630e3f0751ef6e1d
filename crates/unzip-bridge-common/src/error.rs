//! Error types for unzip-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`BridgeError`]: Top-level errors for loading and driving the guest
//! - [`MarshalError`]: Errors from moving values across the host/guest boundary

use std::str::Utf8Error;

use thiserror::Error;

/// Top-level bridge errors.
///
/// These errors represent failures that can occur during the lifecycle of
/// the guest module, from decoding its embedded bytes to decoding the
/// documents it returns.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// An extraction was requested before the guest module was loaded.
    #[error("Module not loaded: call initialize() first")]
    NotInitialized,

    /// The base64 text carrying the guest module could not be decoded.
    #[error("Invalid encoded module: {reason}")]
    InvalidEncodedModule {
        /// Description of the decoding failure.
        reason: String,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The guest module could not be instantiated.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The guest imports a symbol that has no host binding.
    #[error("Unresolved import: {module}::{name}")]
    UnresolvedImport {
        /// Import module name as declared by the guest.
        module: String,
        /// Import field name as declared by the guest.
        name: String,
    },

    /// The guest does not export something the bridge needs.
    #[error("Missing export: {name}")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    /// Guest code raised an error through the throw import.
    #[error("Guest threw: {message}")]
    GuestThrew {
        /// Message decoded from guest memory.
        message: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// The guest returned a value of the wrong shape.
    #[error("Unexpected guest result: expected {expected}, got {actual}")]
    UnexpectedResult {
        /// What the bridge expected.
        expected: &'static str,
        /// What the guest produced.
        actual: String,
    },

    /// A document returned as JSON text failed to parse.
    #[error("Invalid document at index {index}: {source}")]
    InvalidDocument {
        /// Position of the document in the guest result.
        index: usize,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A host value has no JSON representation.
    #[error("Conversion failed: {reason}")]
    Conversion {
        /// Description of the conversion failure.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// A boundary crossing failed.
    #[error("Marshalling error: {0}")]
    Marshal(#[from] MarshalError),
}

/// Errors from moving data across the host/guest boundary.
///
/// Most of these are contract violations by the guest. They fail the
/// current call instead of corrupting host state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// A region lies outside the guest's linear memory.
    #[error("Memory access out of bounds: {len} bytes at {ptr} (memory size {size})")]
    OutOfBounds {
        /// Start of the region.
        ptr: u32,
        /// Length of the region in bytes.
        len: u32,
        /// Current size of linear memory in bytes.
        size: usize,
    },

    /// Guest bytes were not valid UTF-8.
    #[error("Invalid UTF-8 in {len} bytes at {ptr}: {source}")]
    InvalidUtf8 {
        /// Start of the region.
        ptr: u32,
        /// Length of the region in bytes.
        len: u32,
        /// Underlying decode error.
        #[source]
        source: Utf8Error,
    },

    /// A handle that is free or was never allocated.
    #[error("Invalid handle: {handle}")]
    InvalidHandle {
        /// The offending handle.
        handle: u32,
    },

    /// A container operation targeted a value of the wrong kind.
    #[error("Handle {handle} is not a {expected}")]
    NotAContainer {
        /// The offending handle.
        handle: u32,
        /// Container kind the import expected.
        expected: &'static str,
    },

    /// An indexed write would leave too large a hole in an array.
    #[error("Index {index} is too far past the end of array {handle} (length {len})")]
    IndexTooFar {
        /// The array handle.
        handle: u32,
        /// The requested index.
        index: u32,
        /// Length of the array before the write.
        len: usize,
    },
}

impl BridgeError {
    /// Create a new `InvalidEncodedModule` error.
    pub fn invalid_encoded_module(reason: impl Into<String>) -> Self {
        Self::InvalidEncodedModule {
            reason: reason.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `GuestThrew` error.
    pub fn guest_threw(message: impl Into<String>) -> Self {
        Self::GuestThrew {
            message: message.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `Conversion` error.
    pub fn conversion(reason: impl Into<String>) -> Self {
        Self::Conversion {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the guest module has not been loaded yet.
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized)
    }

    /// Returns `true` if the error was raised by guest code, either
    /// explicitly or by trapping.
    pub fn is_guest_failure(&self) -> bool {
        matches!(
            self,
            Self::GuestThrew { .. } | Self::Trap { .. } | Self::FuelExhausted
        )
    }
}
