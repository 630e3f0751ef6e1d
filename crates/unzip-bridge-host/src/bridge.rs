//! The bridge facade: load the guest once, then extract documents.
//!
//! ```text
//! caller ── extract_documents(zip) ──▶ pass_bytes ──▶ extract_jsons(ptr, len)
//!                                                          │
//!                                      host imports ◀──────┘ (zero or more)
//!                                                          │
//! documents ◀── decode ◀── take_and_remove(handle) ◀───────┘
//! ```

use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use unzip_bridge_common::{BridgeConfig, BridgeError};
use unzip_bridge_core::{
    CompiledModule, ExecutionMetrics, GuestInstance, HostValue, JsonMode, WasmEngine,
};

use crate::imports::build_linker;

/// Guest module embedded at build time, as base64 text.
///
/// Set `UNZIP_BRIDGE_MODULE_B64` when building to embed one.
pub const EMBEDDED_MODULE: Option<&str> = option_env!("UNZIP_BRIDGE_MODULE_B64");

/// Host side of the bridge to one guest instance.
///
/// A `Bridge` is single-threaded: every call borrows it mutably and blocks
/// until the guest returns. Use one bridge per thread.
///
/// # Example
///
/// ```ignore
/// let mut bridge = Bridge::new(BridgeConfig::default())?;
/// bridge.initialize(encoded_module)?;
/// let documents = bridge.extract_documents(&zip_bytes)?;
/// ```
pub struct Bridge {
    engine: WasmEngine,
    config: BridgeConfig,
    guest: Option<GuestInstance>,
}

impl Bridge {
    /// Create a bridge with no guest loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine configuration is invalid.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = WasmEngine::new(&config.engine)?;
        Ok(Self {
            engine,
            config,
            guest: None,
        })
    }

    /// Decode, compile and instantiate the guest module.
    ///
    /// Idempotent: once a guest is loaded, later calls return `Ok(())`
    /// without decoding `encoded`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEncodedModule` for malformed base64, and compilation,
    /// import resolution or instantiation errors otherwise. A failed call
    /// leaves the bridge uninitialized.
    #[instrument(skip_all, fields(encoded_len = encoded.len()))]
    pub fn initialize(&mut self, encoded: &str) -> Result<(), BridgeError> {
        if self.guest.is_some() {
            debug!("Guest already initialized");
            return Ok(());
        }

        let module = CompiledModule::from_base64(self.engine.inner(), encoded)?;
        self.load(&module)
    }

    /// Instantiate an already compiled guest module.
    ///
    /// Idempotent like [`Self::initialize`].
    ///
    /// # Errors
    ///
    /// Returns import resolution or instantiation errors.
    #[instrument(skip_all, fields(content_hash = %module.content_hash()))]
    pub fn load(&mut self, module: &CompiledModule) -> Result<(), BridgeError> {
        if self.guest.is_some() {
            debug!("Guest already initialized");
            return Ok(());
        }

        let linker = build_linker(&self.engine, module, &self.config.imports)?;
        let guest =
            GuestInstance::instantiate(&self.engine, &linker, module, &self.config.execution)?;

        info!(
            imports = module.function_imports().len(),
            memory_bytes = guest.memory_size(),
            "Guest initialized"
        );
        self.guest = Some(guest);
        Ok(())
    }

    /// Returns `true` once a guest is loaded.
    pub fn is_initialized(&self) -> bool {
        self.guest.is_some()
    }

    /// Extract every JSON document from a zip archive.
    ///
    /// The order of the returned documents is whatever order the guest
    /// produced them in.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before a successful [`Self::initialize`],
    /// `GuestThrew` if the guest rejects the archive, or a decoding error
    /// if the result is not a list of documents.
    #[instrument(skip_all, fields(zip_len = zip.len()))]
    pub fn extract_documents(&mut self, zip: &[u8]) -> Result<Vec<Value>, BridgeError> {
        let result = self.extract_raw(zip)?;
        let documents = decode_documents(&result)?;

        info!(
            documents = documents.len(),
            live_handles = self.live_handles(),
            "Extraction finished"
        );
        Ok(documents)
    }

    /// Run the guest on `zip` and return its result undecoded.
    ///
    /// # Errors
    ///
    /// Same as [`Self::extract_documents`], minus decoding.
    pub fn extract_raw(&mut self, zip: &[u8]) -> Result<HostValue, BridgeError> {
        let guest = self.guest.as_mut().ok_or(BridgeError::NotInitialized)?;
        let call_id = Uuid::new_v4().to_string();
        guest.call_entry(&call_id, zip)
    }

    /// Dynamically allocated handles the guest still holds.
    pub fn live_handles(&self) -> usize {
        self.guest
            .as_ref()
            .map_or(0, |guest| guest.context().handles.live())
    }

    /// Metrics of the most recent extraction.
    pub fn metrics(&self) -> Option<&ExecutionMetrics> {
        self.guest.as_ref().map(|guest| &guest.context().metrics)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("engine", &self.engine)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// Decode the guest's result into documents.
///
/// The result must be an array. Strings are parsed as JSON text; any other
/// element is converted directly.
///
/// # Errors
///
/// Returns `UnexpectedResult` for a non-array result or an element with no
/// JSON form, and `InvalidDocument` for unparseable text.
pub fn decode_documents(result: &HostValue) -> Result<Vec<Value>, BridgeError> {
    let HostValue::Array(items) = result else {
        return Err(BridgeError::UnexpectedResult {
            expected: "array",
            actual: result.kind().to_string(),
        });
    };

    let items = items.lock().clone();
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            HostValue::String(text) => serde_json::from_str(text)
                .map_err(|source| BridgeError::InvalidDocument { index, source }),
            other => other
                .to_json(JsonMode::Document)?
                .ok_or_else(|| BridgeError::UnexpectedResult {
                    expected: "document",
                    actual: other.kind().to_string(),
                }),
        })
        .collect()
}
