//! Diagnostic text for host values.
//!
//! Used when the guest asks for a description of a handle, typically while
//! formatting a panic or an error message.

use crate::value::{HostValue, JsonMode, format_number};

/// Describe `value` for diagnostics.
pub fn describe(value: &HostValue) -> String {
    let mut path = Vec::new();
    describe_inner(value, &mut path)
}

fn describe_inner(value: &HostValue, path: &mut Vec<usize>) -> String {
    match value {
        HostValue::Undefined => "undefined".into(),
        HostValue::Null => "null".into(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Number(n) => format_number(*n),
        HostValue::String(s) => format!("\"{s}\""),
        HostValue::Symbol(None) => "Symbol".into(),
        HostValue::Symbol(Some(description)) => format!("Symbol({description})"),
        HostValue::Function(Some(name)) if !name.is_empty() => format!("Function({name})"),
        HostValue::Function(_) => "Function".into(),
        HostValue::Array(items) => {
            let Some(id) = value.identity() else {
                return "Array".into();
            };
            if path.contains(&id) {
                return "Array".into();
            }

            let items = items.lock().clone();
            path.push(id);
            let rendered: Vec<String> = items
                .iter()
                .map(|item| describe_inner(item, path))
                .collect();
            path.pop();
            format!("[{}]", rendered.join(", "))
        }
        HostValue::Object(_) => match value.to_json(JsonMode::Stringify) {
            Ok(Some(json)) => format!("Object({json})"),
            _ => "Object".into(),
        },
        HostValue::Map(_) => "Map".into(),
        HostValue::BigInt(_) => "BigInt".into(),
        HostValue::Error(error) => {
            let mut text = format!("{}: {}", error.name, error.message);
            if let Some(stack) = &error.stack {
                text.push('\n');
                text.push_str(stack);
            }
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::insert_property;

    #[test]
    fn test_primitives() {
        assert_eq!(describe(&HostValue::Undefined), "undefined");
        assert_eq!(describe(&HostValue::Null), "null");
        assert_eq!(describe(&HostValue::Bool(true)), "true");
        assert_eq!(describe(&HostValue::Number(42.0)), "42");
        assert_eq!(describe(&HostValue::Number(0.5)), "0.5");
        assert_eq!(describe(&HostValue::Number(f64::NAN)), "NaN");
        assert_eq!(describe(&HostValue::string("hi")), "\"hi\"");
        assert_eq!(describe(&HostValue::BigInt(1)), "BigInt");
    }

    #[test]
    fn test_symbols_and_functions() {
        assert_eq!(describe(&HostValue::Symbol(None)), "Symbol");
        assert_eq!(describe(&HostValue::Symbol(Some("id".into()))), "Symbol(id)");
        assert_eq!(describe(&HostValue::Function(None)), "Function");
        assert_eq!(describe(&HostValue::Function(Some(String::new()))), "Function");
        assert_eq!(
            describe(&HostValue::Function(Some("extract".into()))),
            "Function(extract)"
        );
    }

    #[test]
    fn test_arrays_recurse() {
        let inner = HostValue::array_from([HostValue::Null]);
        let value = HostValue::array_from([
            HostValue::Number(1.0),
            HostValue::string("a"),
            inner,
            HostValue::map(),
        ]);

        assert_eq!(describe(&value), "[1, \"a\", [null], Map]");
        assert_eq!(describe(&HostValue::array()), "[]");
    }

    #[test]
    fn test_objects_render_json() {
        let value = HostValue::object();
        if let HostValue::Object(entries) = &value {
            let mut entries = entries.lock();
            insert_property(&mut entries, "run".into(), HostValue::Number(3.0));
            insert_property(&mut entries, "name".into(), HostValue::string("ci"));
        }

        assert_eq!(describe(&value), r#"Object({"name":"ci","run":3})"#);
    }

    #[test]
    fn test_object_json_failure_falls_back() {
        let value = HostValue::object();
        if let HostValue::Object(entries) = &value {
            entries.lock().push(("self".into(), value.clone()));
        }
        assert_eq!(describe(&value), "Object");

        let big = HostValue::object();
        if let HostValue::Object(entries) = &big {
            entries.lock().push(("n".into(), HostValue::BigInt(5)));
        }
        assert_eq!(describe(&big), "Object");
    }

    #[test]
    fn test_cyclic_array_terminates() {
        let value = HostValue::array();
        if let HostValue::Array(items) = &value {
            items.lock().push(value.clone());
        }

        assert_eq!(describe(&value), "[Array]");
    }

    #[test]
    fn test_errors() {
        let plain = HostValue::error("Error", "bad zip", None);
        assert_eq!(describe(&plain), "Error: bad zip");

        let traced = HostValue::error("TypeError", "x is null", Some("at extract_jsons".into()));
        assert_eq!(describe(&traced), "TypeError: x is null\nat extract_jsons");
    }
}
