//! The guest's import contract.
//!
//! A wasm-bindgen guest imports two kinds of symbols:
//! - intrinsics named `__wbindgen_*`, whose names are stable across builds
//! - shims named `__wbg_<name>_<hash>`, whose hash depends on the build
//!
//! [`HostImport`] names every capability the host can provide. [`ImportTable`]
//! maps exact guest symbol names to capabilities; intrinsics resolve without
//! configuration while shims must be pinned for each guest build.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A host capability the guest can import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostImport {
    /// `() -> handle`: an empty sequence.
    NewArray,
    /// `() -> handle`: an empty record.
    NewObject,
    /// `() -> handle`: an empty map.
    NewMap,
    /// `(array, index, value)`: indexed assignment, consumes `value`.
    ArraySet,
    /// `(array, value) -> length`: append, borrows `value`.
    ArrayPush,
    /// `(object, key, value)`: keyed assignment, consumes `key` and `value`.
    ObjectSet,
    /// `(map, key, value) -> handle`: map insertion, borrows `key` and `value`.
    MapSet,
    /// `(i64) -> handle`
    #[serde(rename = "bigint_from_i64")]
    BigIntFromI64,
    /// `(u64) -> handle`
    #[serde(rename = "bigint_from_u64")]
    BigIntFromU64,
    /// `(f64) -> handle`
    NumberNew,
    /// `(ptr, len) -> handle`
    StringNew,
    /// `(ptr, len) -> handle`
    ErrorNew,
    /// `(handle) -> bool`
    IsString,
    /// `(handle)`
    ObjectDropRef,
    /// `(handle) -> handle`
    ObjectCloneRef,
    /// `(retptr, handle)`
    DebugString,
    /// `(ptr, len)`, never returns.
    Throw,
}

impl HostImport {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 17] = [
        Self::NewArray,
        Self::NewObject,
        Self::NewMap,
        Self::ArraySet,
        Self::ArrayPush,
        Self::ObjectSet,
        Self::MapSet,
        Self::BigIntFromI64,
        Self::BigIntFromU64,
        Self::NumberNew,
        Self::StringNew,
        Self::ErrorNew,
        Self::IsString,
        Self::ObjectDropRef,
        Self::ObjectCloneRef,
        Self::DebugString,
        Self::Throw,
    ];

    /// The stable wasm-bindgen name for this capability, if it has one.
    pub const fn intrinsic_name(self) -> Option<&'static str> {
        match self {
            Self::BigIntFromI64 => Some("__wbindgen_bigint_from_i64"),
            Self::BigIntFromU64 => Some("__wbindgen_bigint_from_u64"),
            Self::NumberNew => Some("__wbindgen_number_new"),
            Self::StringNew => Some("__wbindgen_string_new"),
            Self::ErrorNew => Some("__wbindgen_error_new"),
            Self::IsString => Some("__wbindgen_is_string"),
            Self::ObjectDropRef => Some("__wbindgen_object_drop_ref"),
            Self::ObjectCloneRef => Some("__wbindgen_object_clone_ref"),
            Self::DebugString => Some("__wbindgen_debug_string"),
            Self::Throw => Some("__wbindgen_throw"),
            Self::NewArray
            | Self::NewObject
            | Self::NewMap
            | Self::ArraySet
            | Self::ArrayPush
            | Self::ObjectSet
            | Self::MapSet => None,
        }
    }

    /// Resolve a stable wasm-bindgen intrinsic by exact name.
    pub fn intrinsic(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|import| import.intrinsic_name() == Some(name))
    }

    /// The snake_case identifier used in configuration files.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewArray => "new_array",
            Self::NewObject => "new_object",
            Self::NewMap => "new_map",
            Self::ArraySet => "array_set",
            Self::ArrayPush => "array_push",
            Self::ObjectSet => "object_set",
            Self::MapSet => "map_set",
            Self::BigIntFromI64 => "bigint_from_i64",
            Self::BigIntFromU64 => "bigint_from_u64",
            Self::NumberNew => "number_new",
            Self::StringNew => "string_new",
            Self::ErrorNew => "error_new",
            Self::IsString => "is_string",
            Self::ObjectDropRef => "object_drop_ref",
            Self::ObjectCloneRef => "object_clone_ref",
            Self::DebugString => "debug_string",
            Self::Throw => "throw",
        }
    }
}

impl fmt::Display for HostImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact guest symbol name to host capability.
///
/// Pinned bindings take precedence over intrinsics, so a guest built with a
/// renamed intrinsic can still be served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ImportTable {
    bindings: BTreeMap<String, HostImport>,
}

impl ImportTable {
    /// An empty table; only intrinsics resolve.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `name` to `import`.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, import: HostImport) -> Self {
        self.bindings.insert(name.into(), import);
        self
    }

    /// Resolve a guest import name.
    pub fn resolve(&self, name: &str) -> Option<HostImport> {
        self.bindings
            .get(name)
            .copied()
            .or_else(|| HostImport::intrinsic(name))
    }

    /// Number of pinned bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterate pinned bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, HostImport)> {
        self.bindings.iter().map(|(name, import)| (name.as_str(), *import))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsics_resolve_without_pins() {
        let table = ImportTable::new();

        assert_eq!(table.resolve("__wbindgen_throw"), Some(HostImport::Throw));
        assert_eq!(
            table.resolve("__wbindgen_object_drop_ref"),
            Some(HostImport::ObjectDropRef)
        );
        assert_eq!(table.resolve("__wbg_new_abda76e883ba8a5f"), None);
    }

    #[test]
    fn test_pinned_binding_wins() {
        let table = ImportTable::new()
            .bind("__wbg_new_abda76e883ba8a5f", HostImport::NewArray)
            .bind("__wbindgen_throw", HostImport::ErrorNew);

        assert_eq!(
            table.resolve("__wbg_new_abda76e883ba8a5f"),
            Some(HostImport::NewArray)
        );
        assert_eq!(table.resolve("__wbindgen_throw"), Some(HostImport::ErrorNew));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_intrinsic_names_are_unique() {
        let mut names: Vec<_> = HostImport::ALL
            .into_iter()
            .filter_map(HostImport::intrinsic_name)
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();

        assert_eq!(names.len(), total);
        assert_eq!(total, 10);
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for import in HostImport::ALL {
            let json = serde_json::to_string(&import).unwrap();
            assert_eq!(json, format!("\"{import}\""));
        }
    }

    #[test]
    fn test_table_deserializes_from_map() {
        let json = r#"{"__wbg_set_1": "map_set", "__wbg_push_2": "array_push"}"#;
        let table: ImportTable = serde_json::from_str(json).unwrap();

        assert_eq!(table.resolve("__wbg_set_1"), Some(HostImport::MapSet));
        assert_eq!(table.resolve("__wbg_push_2"), Some(HostImport::ArrayPush));
        assert_eq!(
            table.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            ["__wbg_push_2", "__wbg_set_1"]
        );
    }
}
