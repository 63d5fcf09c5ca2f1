//! Standard library function implementations
//!
//! Native functions are plain values (`Val::NativeFunc`) so they can live in
//! the global namespace or inside namespace objects such as `Math`.

use std::collections::HashMap;

use super::errors::{self, ErrorInfo};
use super::values::{json_to_val, val_to_json, Val};

/* ===================== Standard Library Function Types ===================== */

/// Standard library function identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdlibFunc {
    Len,
    Str,
    Num,
    Type,
    Push,
    Set,
    Keys,
    MathFloor,
    MathCeil,
    MathAbs,
    MathRound,
    MathMin,
    MathMax,
    StringSplit,
    StringJoin,
    StringTrim,
    StringUpper,
    StringLower,
    StringContains,
    StringReplace,
    JsonStringify,
    JsonParse,
    BytesFromString,
    BytesToString,
}

impl StdlibFunc {
    fn name(self) -> &'static str {
        match self {
            StdlibFunc::Len => "len",
            StdlibFunc::Str => "str",
            StdlibFunc::Num => "num",
            StdlibFunc::Type => "type",
            StdlibFunc::Push => "push",
            StdlibFunc::Set => "set",
            StdlibFunc::Keys => "keys",
            StdlibFunc::MathFloor => "Math.floor",
            StdlibFunc::MathCeil => "Math.ceil",
            StdlibFunc::MathAbs => "Math.abs",
            StdlibFunc::MathRound => "Math.round",
            StdlibFunc::MathMin => "Math.min",
            StdlibFunc::MathMax => "Math.max",
            StdlibFunc::StringSplit => "String.split",
            StdlibFunc::StringJoin => "String.join",
            StdlibFunc::StringTrim => "String.trim",
            StdlibFunc::StringUpper => "String.upper",
            StdlibFunc::StringLower => "String.lower",
            StdlibFunc::StringContains => "String.contains",
            StdlibFunc::StringReplace => "String.replace",
            StdlibFunc::JsonStringify => "Json.stringify",
            StdlibFunc::JsonParse => "Json.parse",
            StdlibFunc::BytesFromString => "Bytes.fromString",
            StdlibFunc::BytesToString => "Bytes.toString",
        }
    }
}

/* ===================== Stdlib Dispatcher ===================== */

/// Call a standard library function with arguments
pub fn call_stdlib_func(func: StdlibFunc, args: Vec<Val>) -> Result<Val, ErrorInfo> {
    let name = func.name();
    match func {
        StdlibFunc::Len => {
            let [v] = arity::<1>(name, args)?;
            let n = match &v {
                Val::Str(s) => s.chars().count(),
                Val::Bytes(b) => b.len(),
                Val::List(l) => l.len(),
                Val::Obj(o) => o.len(),
                other => {
                    return Err(ErrorInfo::new(
                        errors::TYPE_ERROR,
                        format!("len() is not defined for {}", other.type_name()),
                    ))
                }
            };
            Ok(Val::Num(n as f64))
        }
        StdlibFunc::Str => {
            let [v] = arity::<1>(name, args)?;
            Ok(Val::Str(v.to_display_string()))
        }
        StdlibFunc::Num => {
            let [v] = arity::<1>(name, args)?;
            match v {
                Val::Num(n) => Ok(Val::Num(n)),
                Val::Bool(b) => Ok(Val::Num(if b { 1.0 } else { 0.0 })),
                Val::Str(s) => s.trim().parse::<f64>().map(Val::Num).map_err(|_| {
                    ErrorInfo::new(errors::TYPE_ERROR, format!("'{}' is not a number", s))
                }),
                other => Err(ErrorInfo::new(
                    errors::TYPE_ERROR,
                    format!("num() is not defined for {}", other.type_name()),
                )),
            }
        }
        StdlibFunc::Type => {
            let [v] = arity::<1>(name, args)?;
            Ok(Val::Str(v.type_name().to_string()))
        }
        StdlibFunc::Push => {
            let [list, item] = arity::<2>(name, args)?;
            let Val::List(mut items) = list else {
                return Err(ErrorInfo::wrong_arg_type(name, "a list as first argument"));
            };
            items.push(item);
            Ok(Val::List(items))
        }
        StdlibFunc::Set => {
            let [obj, key, value] = arity::<3>(name, args)?;
            let (Val::Obj(mut map), Val::Str(key)) = (obj, key) else {
                return Err(ErrorInfo::wrong_arg_type(name, "(object, string, value)"));
            };
            map.insert(key, value);
            Ok(Val::Obj(map))
        }
        StdlibFunc::Keys => {
            let [obj] = arity::<1>(name, args)?;
            let Val::Obj(map) = obj else {
                return Err(ErrorInfo::wrong_arg_type(name, "an object"));
            };
            let mut keys: Vec<String> = map.into_keys().collect();
            keys.sort();
            Ok(Val::List(keys.into_iter().map(Val::Str).collect()))
        }
        StdlibFunc::MathFloor => unary_math(name, args, f64::floor),
        StdlibFunc::MathCeil => unary_math(name, args, f64::ceil),
        StdlibFunc::MathAbs => unary_math(name, args, f64::abs),
        StdlibFunc::MathRound => unary_math(name, args, f64::round),
        StdlibFunc::MathMin => binary_math(name, args, f64::min),
        StdlibFunc::MathMax => binary_math(name, args, f64::max),
        StdlibFunc::StringSplit => {
            let [s, sep] = arity::<2>(name, args)?;
            let (s, sep) = (expect_str(name, s)?, expect_str(name, sep)?);
            if sep.is_empty() {
                return Err(ErrorInfo::wrong_arg_type(name, "a non-empty separator"));
            }
            Ok(Val::List(
                s.split(sep.as_str()).map(|p| Val::Str(p.to_string())).collect(),
            ))
        }
        StdlibFunc::StringJoin => {
            let [list, sep] = arity::<2>(name, args)?;
            let Val::List(items) = list else {
                return Err(ErrorInfo::wrong_arg_type(name, "a list as first argument"));
            };
            let sep = expect_str(name, sep)?;
            let parts: Vec<String> = items.iter().map(Val::to_display_string).collect();
            Ok(Val::Str(parts.join(&sep)))
        }
        StdlibFunc::StringTrim => string_map(name, args, |s| s.trim().to_string()),
        StdlibFunc::StringUpper => string_map(name, args, |s| s.to_uppercase()),
        StdlibFunc::StringLower => string_map(name, args, |s| s.to_lowercase()),
        StdlibFunc::StringContains => {
            let [s, needle] = arity::<2>(name, args)?;
            let (s, needle) = (expect_str(name, s)?, expect_str(name, needle)?);
            Ok(Val::Bool(s.contains(needle.as_str())))
        }
        StdlibFunc::StringReplace => {
            let [s, from, to] = arity::<3>(name, args)?;
            let s = expect_str(name, s)?;
            let (from, to) = (expect_str(name, from)?, expect_str(name, to)?);
            Ok(Val::Str(s.replace(from.as_str(), &to)))
        }
        StdlibFunc::JsonStringify => {
            let [v] = arity::<1>(name, args)?;
            Ok(Val::Str(val_to_json(&v)?.to_string()))
        }
        StdlibFunc::JsonParse => {
            let [s] = arity::<1>(name, args)?;
            let s = expect_str(name, s)?;
            let json: serde_json::Value = serde_json::from_str(&s).map_err(|e| {
                ErrorInfo::new(errors::TYPE_ERROR, format!("invalid JSON: {}", e))
            })?;
            Ok(json_to_val(&json))
        }
        StdlibFunc::BytesFromString => {
            let [s] = arity::<1>(name, args)?;
            Ok(Val::Bytes(expect_str(name, s)?.into_bytes()))
        }
        StdlibFunc::BytesToString => {
            let [b] = arity::<1>(name, args)?;
            let Val::Bytes(bytes) = b else {
                return Err(ErrorInfo::wrong_arg_type(name, "bytes"));
            };
            String::from_utf8(bytes)
                .map(Val::Str)
                .map_err(|_| ErrorInfo::new(errors::TYPE_ERROR, "bytes are not valid UTF-8"))
        }
    }
}

/* ===================== Argument Helpers ===================== */

fn arity<const N: usize>(name: &str, args: Vec<Val>) -> Result<[Val; N], ErrorInfo> {
    let got = args.len();
    args.try_into()
        .map_err(|_| ErrorInfo::wrong_arg_count(name, N, got))
}

fn expect_str(name: &str, v: Val) -> Result<String, ErrorInfo> {
    match v {
        Val::Str(s) => Ok(s),
        _ => Err(ErrorInfo::wrong_arg_type(name, "a string")),
    }
}

fn unary_math(name: &str, args: Vec<Val>, f: fn(f64) -> f64) -> Result<Val, ErrorInfo> {
    match arity::<1>(name, args)? {
        [Val::Num(n)] => Ok(Val::Num(f(n))),
        _ => Err(ErrorInfo::wrong_arg_type(name, "a number")),
    }
}

fn binary_math(name: &str, args: Vec<Val>, f: fn(f64, f64) -> f64) -> Result<Val, ErrorInfo> {
    match arity::<2>(name, args)? {
        [Val::Num(a), Val::Num(b)] => Ok(Val::Num(f(a, b))),
        _ => Err(ErrorInfo::wrong_arg_type(name, "two numbers")),
    }
}

fn string_map(name: &str, args: Vec<Val>, f: impl Fn(&str) -> String) -> Result<Val, ErrorInfo> {
    let [s] = arity::<1>(name, args)?;
    Ok(Val::Str(f(&expect_str(name, s)?)))
}

/* ===================== Environment Injection ===================== */

fn namespace(funcs: &[(&str, StdlibFunc)]) -> Val {
    Val::Obj(
        funcs
            .iter()
            .map(|(name, func)| (name.to_string(), Val::NativeFunc(*func)))
            .collect(),
    )
}

/// Inject standard library objects into a namespace
///
/// Called once when an engine is created, never per evaluation.
pub fn inject_stdlib(env: &mut HashMap<String, Val>) {
    for (name, func) in [
        ("len", StdlibFunc::Len),
        ("str", StdlibFunc::Str),
        ("num", StdlibFunc::Num),
        ("type", StdlibFunc::Type),
        ("push", StdlibFunc::Push),
        ("set", StdlibFunc::Set),
        ("keys", StdlibFunc::Keys),
    ] {
        env.insert(name.to_string(), Val::NativeFunc(func));
    }

    env.insert(
        "Math".to_string(),
        namespace(&[
            ("floor", StdlibFunc::MathFloor),
            ("ceil", StdlibFunc::MathCeil),
            ("abs", StdlibFunc::MathAbs),
            ("round", StdlibFunc::MathRound),
            ("min", StdlibFunc::MathMin),
            ("max", StdlibFunc::MathMax),
        ]),
    );
    env.insert(
        "String".to_string(),
        namespace(&[
            ("split", StdlibFunc::StringSplit),
            ("join", StdlibFunc::StringJoin),
            ("trim", StdlibFunc::StringTrim),
            ("upper", StdlibFunc::StringUpper),
            ("lower", StdlibFunc::StringLower),
            ("contains", StdlibFunc::StringContains),
            ("replace", StdlibFunc::StringReplace),
        ]),
    );
    env.insert(
        "Json".to_string(),
        namespace(&[
            ("stringify", StdlibFunc::JsonStringify),
            ("parse", StdlibFunc::JsonParse),
        ]),
    );
    env.insert(
        "Bytes".to_string(),
        namespace(&[
            ("fromString", StdlibFunc::BytesFromString),
            ("toString", StdlibFunc::BytesToString),
        ]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Val {
        Val::Str(v.to_string())
    }

    #[test]
    fn split_and_join() {
        let parts = call_stdlib_func(StdlibFunc::StringSplit, vec![s("a;b;c"), s(";")]).unwrap();
        assert_eq!(parts, Val::List(vec![s("a"), s("b"), s("c")]));

        let joined = call_stdlib_func(StdlibFunc::StringJoin, vec![parts, s("-")]).unwrap();
        assert_eq!(joined, s("a-b-c"));
    }

    #[test]
    fn wrong_arg_count_reports_code() {
        let err = call_stdlib_func(StdlibFunc::Len, vec![]).unwrap_err();
        assert_eq!(err.code, errors::WRONG_ARG_COUNT);
    }

    #[test]
    fn json_stringify_is_compact() {
        let obj = call_stdlib_func(
            StdlibFunc::Set,
            vec![Val::Obj(HashMap::new()), s("name"), s("foo")],
        )
        .unwrap();
        let json = call_stdlib_func(StdlibFunc::JsonStringify, vec![Val::List(vec![obj])]).unwrap();
        assert_eq!(json, s(r#"[{"name":"foo"}]"#));
    }

    #[test]
    fn bytes_to_string_rejects_invalid_utf8() {
        let err = call_stdlib_func(StdlibFunc::BytesToString, vec![Val::Bytes(vec![0xff])])
            .unwrap_err();
        assert_eq!(err.code, errors::TYPE_ERROR);
    }

    #[test]
    fn inject_installs_namespaces() {
        let mut env = HashMap::new();
        inject_stdlib(&mut env);
        assert!(matches!(env.get("len"), Some(Val::NativeFunc(StdlibFunc::Len))));
        let Some(Val::Obj(math)) = env.get("Math") else {
            panic!("Math namespace missing");
        };
        assert!(math.contains_key("floor"));
    }
}
