//! Host-side values referenced by guest handles.
//!
//! Values crossing the boundary are dynamically typed on the guest side, so
//! the host represents them as one closed variant. Containers are shared and
//! interior-mutable: the guest may hold several handles to the same array or
//! map and expects mutation through one to be visible through the others.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map as JsonMap, Number, Value};

use unzip_bridge_common::BridgeError;

/// A shared, lockable container body.
pub type Shared<T> = Arc<Mutex<T>>;

/// A value owned by the host and visible to the guest through a handle.
#[derive(Debug, Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Symbol(Option<String>),
    Function(Option<String>),
    Array(Shared<Vec<HostValue>>),
    /// Plain record; entries keep insertion order.
    Object(Shared<Vec<(String, HostValue)>>),
    /// Keyed collection with SameValueZero key equality.
    Map(Shared<Vec<(HostValue, HostValue)>>),
    Error(Arc<ErrorValue>),
}

/// Payload of [`HostValue::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

/// How containers without a JSON form are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    /// Mirror `JSON.stringify`: maps and errors become `{}`.
    Stringify,
    /// Decode guest documents: maps become objects, errors are rejected.
    Document,
}

impl HostValue {
    /// A new empty array.
    pub fn array() -> Self {
        Self::Array(Arc::new(Mutex::new(Vec::new())))
    }

    /// A new array holding `items`.
    pub fn array_from(items: impl IntoIterator<Item = HostValue>) -> Self {
        Self::Array(Arc::new(Mutex::new(items.into_iter().collect())))
    }

    /// A new empty object.
    pub fn object() -> Self {
        Self::Object(Arc::new(Mutex::new(Vec::new())))
    }

    /// A new empty map.
    pub fn map() -> Self {
        Self::Map(Arc::new(Mutex::new(Vec::new())))
    }

    /// A new string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// A new error value.
    pub fn error(name: impl Into<String>, message: impl Into<String>, stack: Option<String>) -> Self {
        Self::Error(Arc::new(ErrorValue {
            name: name.into(),
            message: message.into(),
            stack,
        }))
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Function(_) => "function",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Map(_) => "map",
            Self::Error(_) => "error",
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Identity of a container, `None` for primitives.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Array(items) => Some(Arc::as_ptr(items) as *const () as usize),
            Self::Object(entries) => Some(Arc::as_ptr(entries) as *const () as usize),
            Self::Map(entries) => Some(Arc::as_ptr(entries) as *const () as usize),
            Self::Error(error) => Some(Arc::as_ptr(error) as *const () as usize),
            _ => None,
        }
    }

    /// SameValueZero: primitives compare by value (`NaN` equals `NaN`,
    /// `0` equals `-0`), everything else by identity.
    pub fn same_value_zero(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// The property key this value becomes when used as a record key.
    pub fn property_key(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::BigInt(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Symbol(description) => {
                format!("Symbol({})", description.as_deref().unwrap_or_default())
            }
            Self::Function(_) => "function".into(),
            Self::Array(items) => {
                let items = items.lock().clone();
                items
                    .iter()
                    .map(|item| match item {
                        Self::Undefined | Self::Null => String::new(),
                        Self::Array(_) => "[array]".into(),
                        other => other.property_key(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Self::Object(_) | Self::Map(_) => "[object Object]".into(),
            Self::Error(error) => format!("{}: {}", error.name, error.message),
        }
    }

    /// Convert to JSON.
    ///
    /// Returns `Ok(None)` where `JSON.stringify` would omit the value
    /// (undefined, functions, symbols). Cycles and big integers that do not
    /// fit in 64 bits fail.
    pub fn to_json(&self, mode: JsonMode) -> Result<Option<Value>, BridgeError> {
        let mut path = Vec::new();
        self.to_json_inner(mode, &mut path)
    }

    fn to_json_inner(
        &self,
        mode: JsonMode,
        path: &mut Vec<usize>,
    ) -> Result<Option<Value>, BridgeError> {
        if let Some(id) = self.identity() {
            if path.contains(&id) {
                return Err(BridgeError::conversion(format!(
                    "cyclic {} cannot be converted to JSON",
                    self.kind()
                )));
            }
            path.push(id);
        }

        let value = match self {
            Self::Undefined | Self::Function(_) | Self::Symbol(_) => None,
            Self::Null => Some(Value::Null),
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Number(n) => Some(number_to_json(*n)),
            Self::BigInt(n) => Some(bigint_to_json(*n, mode)?),
            Self::String(s) => Some(Value::String(s.clone())),
            Self::Array(items) => {
                let items = items.lock().clone();
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    out.push(item.to_json_inner(mode, path)?.unwrap_or(Value::Null));
                }
                Some(Value::Array(out))
            }
            Self::Object(entries) => {
                let entries = entries.lock().clone();
                let mut out = JsonMap::new();
                for (key, item) in &entries {
                    if let Some(json) = item.to_json_inner(mode, path)? {
                        out.insert(key.clone(), json);
                    }
                }
                Some(Value::Object(out))
            }
            Self::Map(entries) => match mode {
                JsonMode::Stringify => Some(Value::Object(JsonMap::new())),
                JsonMode::Document => {
                    let entries = entries.lock().clone();
                    let mut out = JsonMap::new();
                    for (key, item) in &entries {
                        if let Some(json) = item.to_json_inner(mode, path)? {
                            out.insert(key.property_key(), json);
                        }
                    }
                    Some(Value::Object(out))
                }
            },
            Self::Error(error) => match mode {
                JsonMode::Stringify => Some(Value::Object(JsonMap::new())),
                JsonMode::Document => {
                    return Err(BridgeError::conversion(format!(
                        "error value '{}: {}' is not a document",
                        error.name, error.message
                    )));
                }
            },
        };

        if self.identity().is_some() {
            path.pop();
        }
        Ok(value)
    }
}

/// Store `value` under `key`, replacing an existing entry in place.
pub fn insert_property(entries: &mut Vec<(String, HostValue)>, key: String, value: HostValue) {
    match entries.iter_mut().find(|(existing, _)| *existing == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Store `value` under `key` using SameValueZero key equality.
pub fn insert_entry(entries: &mut Vec<(HostValue, HostValue)>, key: HostValue, value: HostValue) {
    match entries
        .iter_mut()
        .find(|(existing, _)| existing.same_value_zero(&key))
    {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Render a number the way JavaScript's `Number.prototype.toString` does
/// for the values a guest can produce.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }

    let magnitude = n.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return n.to_string();
    }

    let scientific = format!("{n:e}");
    match scientific.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{exponent}")
        }
        _ => scientific,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn number_to_json(n: f64) -> Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn bigint_to_json(n: i128, mode: JsonMode) -> Result<Value, BridgeError> {
    if mode == JsonMode::Document {
        if let Ok(small) = i64::try_from(n) {
            return Ok(Value::from(small));
        }
        if let Ok(large) = u64::try_from(n) {
            return Ok(Value::from(large));
        }
    }
    Err(BridgeError::conversion(format!(
        "big integer {n} cannot be converted to JSON"
    )))
}
