//! Runtime value types

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value as JsonValue};

use super::errors::{self, ErrorInfo};
use super::stdlib::StdlibFunc;

/* ===================== Host Objects ===================== */

/// An object provided by the embedding application
///
/// Host objects are how context (session, logger, streams, ...) becomes
/// visible to a script. `obj.name(args)` calls [`HostObject::call`] and a plain
/// `obj.name` reads [`HostObject::get`].
pub trait HostObject: Send + Sync + fmt::Debug {
    /// Name used in error messages and by `str()`
    fn type_name(&self) -> &'static str;

    /// Read a property
    fn get(&self, _property: &str) -> Option<Val> {
        None
    }

    /// Invoke a method
    fn call(&self, method: &str, _args: Vec<Val>) -> Result<Val, ErrorInfo> {
        Err(ErrorInfo::new(
            errors::PROPERTY_NOT_FOUND,
            format!("{} has no method '{}'", self.type_name(), method),
        ))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to a host object
pub type HostRef = Arc<dyn HostObject>;

/* ===================== Val ===================== */

/// Runtime value type
#[derive(Debug, Clone)]
pub enum Val {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Val>),
    Obj(HashMap<String, Val>),
    NativeFunc(StdlibFunc),
    Host(HostRef),
    /// Error value with code and message
    Error(ErrorInfo),
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Null => false,
            Val::Num(n) => *n != 0.0,
            _ => true,
        }
    }

    pub fn host(object: impl HostObject + 'static) -> Self {
        Val::Host(Arc::new(object))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::Bytes(_) => "bytes",
            Val::List(_) => "list",
            Val::Obj(_) => "object",
            Val::NativeFunc(_) => "function",
            Val::Host(h) => h.type_name(),
            Val::Error(_) => "error",
        }
    }

    /// Downcast a host value to a concrete host type
    pub fn as_host<T: 'static>(&self) -> Option<&T> {
        match self {
            Val::Host(h) => h.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Text rendering used by `str()`, string concatenation and log messages
    pub fn to_display_string(&self) -> String {
        match self {
            Val::Null => "null".to_string(),
            Val::Bool(b) => b.to_string(),
            Val::Num(n) => format_number(*n),
            Val::Str(s) => s.clone(),
            Val::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Val::NativeFunc(f) => format!("<function {:?}>", f),
            Val::Host(h) => format!("<{}>", h.type_name()),
            Val::Error(e) => e.to_string(),
            Val::List(_) | Val::Obj(_) => val_to_json(self)
                .map(|json| json.to_string())
                .unwrap_or_else(|_| format!("<{}>", self.type_name())),
        }
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Bytes(a), Val::Bytes(b)) => a == b,
            (Val::List(a), Val::List(b)) => a == b,
            (Val::Obj(a), Val::Obj(b)) => a == b,
            (Val::NativeFunc(a), Val::NativeFunc(b)) => a == b,
            (Val::Host(a), Val::Host(b)) => Arc::ptr_eq(a, b),
            (Val::Error(a), Val::Error(b)) => a == b,
            _ => false,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/* ===================== JSON Conversion ===================== */

/// Convert a value to JSON
///
/// Whole numbers become JSON integers. Functions and host objects have no
/// JSON form.
pub fn val_to_json(val: &Val) -> Result<JsonValue, ErrorInfo> {
    let json = match val {
        Val::Null => JsonValue::Null,
        Val::Bool(b) => JsonValue::Bool(*b),
        Val::Num(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.0e15 {
                JsonValue::Number(Number::from(*n as i64))
            } else {
                Number::from_f64(*n).map(JsonValue::Number).ok_or_else(|| {
                    ErrorInfo::new(errors::TYPE_ERROR, format!("{} has no JSON form", n))
                })?
            }
        }
        Val::Str(s) => JsonValue::String(s.clone()),
        Val::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
        Val::List(items) => JsonValue::Array(
            items
                .iter()
                .map(val_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Val::Obj(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                obj.insert(k.clone(), val_to_json(v)?);
            }
            JsonValue::Object(obj)
        }
        Val::Error(e) => serde_json::json!({ "code": e.code, "message": e.message }),
        Val::NativeFunc(_) | Val::Host(_) => {
            return Err(ErrorInfo::new(
                errors::TYPE_ERROR,
                format!("{} has no JSON form", val.type_name()),
            ))
        }
    };
    Ok(json)
}

/// Convert JSON to a value
pub fn json_to_val(json: &JsonValue) -> Val {
    match json {
        JsonValue::Null => Val::Null,
        JsonValue::Bool(b) => Val::Bool(*b),
        JsonValue::Number(n) => Val::Num(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => Val::Str(s.clone()),
        JsonValue::Array(items) => Val::List(items.iter().map(json_to_val).collect()),
        JsonValue::Object(map) => Val::Obj(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_val(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness() {
        assert!(!Val::Null.is_truthy());
        assert!(!Val::Bool(false).is_truthy());
        assert!(!Val::Num(0.0).is_truthy());
        assert!(Val::Str(String::new()).is_truthy());
        assert!(Val::List(vec![]).is_truthy());
    }

    #[test]
    fn whole_numbers_render_without_fraction() {
        assert_eq!(Val::Num(2.0).to_display_string(), "2");
        assert_eq!(Val::Num(2.5).to_display_string(), "2.5");
        assert_eq!(val_to_json(&Val::Num(3.0)).unwrap(), json!(3));
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        let source = json!({"name": "foo", "tags": [1, true, null]});
        assert_eq!(val_to_json(&json_to_val(&source)).unwrap(), source);
    }
}
