//! Evaluator tests - run parsed programs against a global namespace

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

use maplit::hashmap;

use super::evaluate;
use crate::interpreter::errors::{self, ErrorInfo, ScriptError};
use crate::interpreter::parser::parse_program;
use crate::interpreter::stdlib::inject_stdlib;
use crate::interpreter::values::{HostObject, Val};

/* ===================== Test Helpers ===================== */

fn globals() -> HashMap<String, Val> {
    let mut env = HashMap::new();
    inject_stdlib(&mut env);
    env
}

fn run_with(source: &str, env: &mut HashMap<String, Val>) -> Result<Val, ScriptError> {
    let program = parse_program(source).expect("Parse failed");
    evaluate(&program, env, None)
}

fn run(source: &str) -> Val {
    run_with(source, &mut globals()).expect("Evaluation failed")
}

fn raised(source: &str) -> ErrorInfo {
    match run_with(source, &mut globals()) {
        Err(ScriptError::Raised(info)) => info,
        other => panic!("Expected raised error, got {:?}", other),
    }
}

/// Records every method call it receives
#[derive(Debug, Default)]
struct Recorder {
    calls: Mutex<Vec<(String, Vec<Val>)>>,
}

impl HostObject for Recorder {
    fn type_name(&self) -> &'static str {
        "Recorder"
    }

    fn get(&self, property: &str) -> Option<Val> {
        (property == "name").then(|| Val::Str("recorder".to_string()))
    }

    fn call(&self, method: &str, args: Vec<Val>) -> Result<Val, ErrorInfo> {
        if method == "fail" {
            return Err(ErrorInfo::host("recorder failed"));
        }
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), args));
        Ok(Val::Null)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/* ===================== Values and Operators ===================== */

#[test]
fn test_completion_value_is_last_expression() {
    assert_eq!(run("1 + 1"), Val::Num(2.0));
    assert_eq!(run("x = 5; x * 2"), Val::Num(10.0));
    assert_eq!(run("x = 5"), Val::Null);
}

#[test]
fn test_string_concatenation() {
    assert_eq!(run(r#""a" + 1 + true"#), Val::Str("a1true".to_string()));
    assert_eq!(run(r#"2 + "b""#), Val::Str("2b".to_string()));
}

#[test]
fn test_list_concatenation_and_index() {
    assert_eq!(run("([1] + [2, 3])[2]"), Val::Num(3.0));
    assert_eq!(run(r#""hello"[1]"#), Val::Str("e".to_string()));
}

#[test]
fn test_short_circuit_yields_operand() {
    assert_eq!(run(r#"null || "default""#), Val::Str("default".to_string()));
    assert_eq!(run("0 && undefinedName"), Val::Num(0.0));
}

#[test]
fn test_comparison_and_equality() {
    assert_eq!(run("1 < 2 && 2 <= 2 && 3 > 2"), Val::Bool(true));
    assert_eq!(run(r#""a" < "b""#), Val::Bool(true));
    assert_eq!(run("[1, 2] == [1, 2]"), Val::Bool(true));
    assert_eq!(run("null != 0"), Val::Bool(true));
}

#[test]
fn test_object_member_access() {
    assert_eq!(run("o = {a: {b: 7}}; o.a.b"), Val::Num(7.0));
    assert_eq!(run(r#"o = {a: 1}; o["missing"]"#), Val::Null);
}

/* ===================== Scoping ===================== */

#[test]
fn test_let_is_block_scoped() {
    let mut env = globals();
    run_with("x = 1; { let x = 2; y = x }", &mut env).expect("Evaluation failed");
    assert_eq!(env.get("x"), Some(&Val::Num(1.0)));
    assert_eq!(env.get("y"), Some(&Val::Num(2.0)));
}

#[test]
fn test_assignment_in_block_creates_global() {
    let mut env = globals();
    run_with("if (true) { created = 42 }", &mut env).expect("Evaluation failed");
    assert_eq!(env.get("created"), Some(&Val::Num(42.0)));
}

#[test]
fn test_globals_survive_between_runs() {
    let mut env = globals();
    run_with("counter = 0", &mut env).expect("Evaluation failed");
    run_with("counter = counter + 1", &mut env).expect("Evaluation failed");
    let value = run_with("counter", &mut env).expect("Evaluation failed");
    assert_eq!(value, Val::Num(1.0));
}

#[test]
fn test_preset_globals_are_visible() {
    let mut env = globals();
    env.extend(hashmap! {
        "greeting".to_string() => Val::Str("hi".to_string()),
    });
    assert_eq!(
        run_with("greeting + '!'", &mut env).expect("Evaluation failed"),
        Val::Str("hi!".to_string())
    );
}

/* ===================== Control Flow ===================== */

#[test]
fn test_while_with_break_and_continue() {
    let source = r#"
        i = 0
        total = 0
        while (true) {
            i = i + 1
            if (i > 5) { break }
            if (i % 2 == 0) { continue }
            total = total + i
        }
        total
    "#;
    assert_eq!(run(source), Val::Num(9.0));
}

#[test]
fn test_for_over_list_and_object() {
    assert_eq!(
        run("sum = 0; for (n in [1, 2, 3]) { sum = sum + n }; sum"),
        Val::Num(6.0)
    );
    assert_eq!(
        run(r#"out = ""; for (k in {b: 1, a: 2}) { out = out + k }; out"#),
        Val::Str("ab".to_string())
    );
}

#[test]
fn test_top_level_return() {
    assert_eq!(run("return 3; 4"), Val::Num(3.0));
}

#[test]
fn test_break_outside_loop_is_error() {
    assert_eq!(raised("break").code, errors::TYPE_ERROR);
}

/* ===================== Errors ===================== */

#[test]
fn test_try_catch_binds_error_value() {
    let source = r#"
        try { missing + 1 } catch (e) { caught = e.code }
        caught
    "#;
    assert_eq!(run(source), Val::Str(errors::UNDEFINED_VARIABLE.to_string()));
}

#[test]
fn test_uncaught_throw_raises() {
    let info = raised(r#"throw "bad record""#);
    assert_eq!(info.code, errors::THROWN);
    assert_eq!(info.message, "bad record");
}

#[test]
fn test_division_by_zero() {
    assert_eq!(raised("1 / 0").code, errors::DIVISION_BY_ZERO);
}

#[test]
fn test_index_out_of_bounds() {
    assert_eq!(raised("[1][1]").code, errors::INDEX_OUT_OF_BOUNDS);
}

#[test]
fn test_calling_non_function() {
    assert_eq!(raised("x = 1; x()").code, errors::NOT_A_FUNCTION);
}

#[test]
fn test_operation_limit() {
    let program = parse_program("while (true) { }").expect("Parse failed");
    let err = evaluate(&program, &mut globals(), Some(1_000)).unwrap_err();
    assert!(matches!(err, ScriptError::OperationLimit(1_000)));
}

/* ===================== Host Objects ===================== */

#[test]
fn test_host_method_call_and_property() {
    let recorder = std::sync::Arc::new(Recorder::default());
    let mut env = globals();
    env.insert("rec".to_string(), Val::Host(recorder.clone()));

    let value = run_with("rec.note(1, 'two'); rec.name", &mut env).expect("Evaluation failed");

    assert_eq!(value, Val::Str("recorder".to_string()));
    let calls = recorder.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![(
            "note".to_string(),
            vec![Val::Num(1.0), Val::Str("two".to_string())]
        )]
    );
}

#[test]
fn test_host_error_is_catchable() {
    let mut env = globals();
    env.insert("rec".to_string(), Val::host(Recorder::default()));

    let value = run_with(
        "try { rec.fail() } catch (e) { e.message }",
        &mut env,
    );
    // `try` is a statement, so the completion value is the catch body's
    assert_eq!(
        value.expect("Evaluation failed"),
        Val::Str("recorder failed".to_string())
    );
}

#[test]
fn test_unknown_host_property() {
    let mut env = globals();
    env.insert("rec".to_string(), Val::host(Recorder::default()));
    match run_with("rec.nope", &mut env) {
        Err(ScriptError::Raised(info)) => assert_eq!(info.code, errors::PROPERTY_NOT_FOUND),
        other => panic!("Expected PropertyNotFound, got {:?}", other),
    }
}

/* ===================== Stdlib Integration ===================== */

#[test]
fn test_split_into_json() {
    let source = r#"
        out = []
        for (pair in String.split("name=foo;value=bar", ";")) {
            kv = String.split(pair, "=")
            out = push(out, set({}, kv[0], kv[1]))
        }
        Json.stringify(out)
    "#;
    assert_eq!(
        run(source),
        Val::Str(r#"[{"name":"foo"},{"value":"bar"}]"#.to_string())
    );
}
