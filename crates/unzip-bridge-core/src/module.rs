//! Guest module decoding and compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's
//! [`Module`] that handles the guest's embedded form: base64 text decoded to
//! raw WebAssembly bytes, then compiled.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, instrument};
use wasmtime::{Engine, ExternType, Module};

use unzip_bridge_common::BridgeError;

/// A function the guest imports from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionImport {
    /// Import module name (for wasm-bindgen guests, the JS glue file).
    pub module: String,
    /// Import field name.
    pub name: String,
}

/// A compiled guest module.
///
/// `CompiledModule` is cheap to clone and can be instantiated several times.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Decode base64 text and compile the module it carries.
    ///
    /// Whitespace (line breaks from wrapped encodings) is ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEncodedModule` if the text is not valid base64, or a
    /// compilation error if the decoded bytes are not a valid module.
    #[instrument(skip(engine, encoded), fields(encoded_len = encoded.len()))]
    pub fn from_base64(engine: &Engine, encoded: &str) -> Result<Self, BridgeError> {
        let bytes = decode_module(encoded)?;
        Self::from_bytes(engine, &bytes)
    }

    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, BridgeError> {
        let start = Instant::now();

        // Validate Wasm magic number
        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            BridgeError::compilation_failed(format!("Core module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "Guest module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a core module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, BridgeError> {
        let module = Module::new(engine, wat).map_err(|e| {
            BridgeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        Ok(Self {
            inner: module,
            content_hash: compute_hash(wat.as_bytes()),
            compiled_at: Instant::now(),
        })
    }

    /// Functions the guest imports, in declaration order.
    ///
    /// Non-function imports (memories, tables, globals) are not part of the
    /// bridge contract and are returned as errors by [`Self::non_function_imports`].
    pub fn function_imports(&self) -> Vec<FunctionImport> {
        self.inner
            .imports()
            .filter(|import| matches!(import.ty(), ExternType::Func(_)))
            .map(|import| FunctionImport {
                module: import.module().to_string(),
                name: import.name().to_string(),
            })
            .collect()
    }

    /// Imports the bridge cannot satisfy because they are not functions.
    pub fn non_function_imports(&self) -> Vec<FunctionImport> {
        self.inner
            .imports()
            .filter(|import| !matches!(import.ty(), ExternType::Func(_)))
            .map(|import| FunctionImport {
                module: import.module().to_string(),
                name: import.name().to_string(),
            })
            .collect()
    }

    /// Check whether the module exports `name`.
    pub fn has_export(&self, name: &str) -> bool {
        self.inner.get_export(name).is_some()
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), BridgeError> {
        if bytes.len() < 8 {
            return Err(BridgeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(BridgeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Decode base64 module text into raw bytes.
///
/// # Errors
///
/// Returns `InvalidEncodedModule` on malformed input.
pub fn decode_module(encoded: &str) -> Result<Vec<u8>, BridgeError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(BridgeError::invalid_encoded_module("encoded module is empty"));
    }

    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| BridgeError::invalid_encoded_module(e.to_string()))
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
