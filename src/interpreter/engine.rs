//! Interpreter instances and the factory that builds them
//!
//! A [`ScriptEngine`] is one interpreter with its own global namespace. It is
//! not safe to use from two threads at once; the pool guarantees exclusive
//! access. An [`EngineFactory`] builds engines, installing the standard library
//! bridge once per engine at construction time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::ast::Program;
use super::errors::ScriptError;
use super::eval::evaluate;
use super::parser::parse_program;
use super::stdlib::inject_stdlib;
use super::values::Val;
use crate::error::EngineError;

/* ===================== Traits ===================== */

/// One interpreter instance
pub trait ScriptEngine: Send + 'static {
    /// Stable identity of this instance, used in logs
    fn id(&self) -> Uuid;

    /// Bind a name in the global namespace
    fn assign(&mut self, name: &str, value: Val) -> Result<(), ScriptError>;

    /// Remove a binding, returning its value
    fn unassign(&mut self, name: &str) -> Option<Val>;

    /// Evaluate script text and return its completion value
    fn eval(&mut self, source: &str) -> Result<Val, ScriptError>;
}

/// Builds interpreter instances
pub trait EngineFactory: Send + Sync {
    type Engine: ScriptEngine;

    fn create(&self, env: &EngineEnvironment) -> Result<Self::Engine, EngineError>;
}

/// Settings every engine of a pool is built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEnvironment {
    /// Interpreter installation directory; site scripts live in `<home>/site`
    pub interpreter_home: Option<PathBuf>,
    /// Skip site scripts when true
    pub vanilla: bool,
    /// Evaluation budget per `eval` call
    pub max_operations: Option<u64>,
}

impl Default for EngineEnvironment {
    fn default() -> Self {
        Self {
            interpreter_home: None,
            vanilla: true,
            max_operations: None,
        }
    }
}

/* ===================== FlowEngine ===================== */

/// Flow interpreter instance
#[derive(Debug)]
pub struct FlowEngine {
    id: Uuid,
    globals: HashMap<String, Val>,
    max_operations: Option<u64>,
    // The stage evaluates the same text over and over
    cached: Option<(String, Arc<Program>)>,
}

impl FlowEngine {
    /// A bare engine with the standard library installed
    pub fn new(max_operations: Option<u64>) -> Self {
        let mut globals = HashMap::new();
        inject_stdlib(&mut globals);
        Self {
            id: Uuid::new_v4(),
            globals,
            max_operations,
            cached: None,
        }
    }

    /// Whether a name is currently bound
    pub fn is_bound(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    fn program_for(&mut self, source: &str) -> Result<Arc<Program>, ScriptError> {
        if let Some((text, program)) = &self.cached {
            if text == source {
                return Ok(program.clone());
            }
        }
        let program =
            Arc::new(parse_program(source).map_err(|e| ScriptError::Syntax(e.to_string()))?);
        self.cached = Some((source.to_string(), program.clone()));
        Ok(program)
    }
}

impl ScriptEngine for FlowEngine {
    fn id(&self) -> Uuid {
        self.id
    }

    fn assign(&mut self, name: &str, value: Val) -> Result<(), ScriptError> {
        if !is_identifier(name) {
            return Err(ScriptError::InvalidBinding(name.to_string()));
        }
        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    fn unassign(&mut self, name: &str) -> Option<Val> {
        self.globals.remove(name)
    }

    fn eval(&mut self, source: &str) -> Result<Val, ScriptError> {
        let program = self.program_for(source)?;
        evaluate(&program, &mut self.globals, self.max_operations)
    }
}

const KEYWORDS: &[&str] = &[
    "let", "if", "else", "while", "for", "in", "return", "throw", "try", "catch", "true",
    "false", "null", "break", "continue",
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&name)
}

/* ===================== FlowEngineFactory ===================== */

/// Builds [`FlowEngine`]s, optionally preloading site scripts
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowEngineFactory;

impl EngineFactory for FlowEngineFactory {
    type Engine = FlowEngine;

    fn create(&self, env: &EngineEnvironment) -> Result<FlowEngine, EngineError> {
        let mut engine = FlowEngine::new(env.max_operations);

        if let Some(home) = &env.interpreter_home {
            if !home.is_dir() {
                return Err(EngineError::RuntimeNotFound(home.clone()));
            }
            if !env.vanilla {
                load_site_scripts(&mut engine, &home.join("site"))?;
            }
        }

        debug!(engine_id = %engine.id, "created flow engine");
        Ok(engine)
    }
}

/// Evaluate every `*.flow` file in `dir` in file-name order
fn load_site_scripts(engine: &mut FlowEngine, dir: &Path) -> Result<(), EngineError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(dir).map_err(|source| EngineError::LibraryLoad {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::LibraryLoad {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "flow") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let source = fs::read_to_string(&path).map_err(|source| EngineError::LibraryLoad {
            path: path.clone(),
            source,
        })?;
        engine
            .eval(&source)
            .map_err(|source| EngineError::Initialization {
                path: path.clone(),
                source,
            })?;
        debug!(engine_id = %engine.id, path = %path.display(), "loaded site script");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn assign_rejects_invalid_names() {
        let mut engine = FlowEngine::new(None);
        assert!(engine.assign("session", Val::Null).is_ok());
        assert!(matches!(
            engine.assign("1abc", Val::Null),
            Err(ScriptError::InvalidBinding(_))
        ));
        assert!(engine.assign("while", Val::Null).is_err());
    }

    #[test]
    fn unassign_removes_binding() {
        let mut engine = FlowEngine::new(None);
        engine.assign("x", Val::Num(1.0)).unwrap();
        assert_eq!(engine.unassign("x"), Some(Val::Num(1.0)));
        assert!(engine.eval("x").is_err());
    }

    #[test]
    fn syntax_error_is_reported() {
        let mut engine = FlowEngine::new(None);
        assert!(matches!(engine.eval("if ("), Err(ScriptError::Syntax(_))));
    }

    #[test]
    fn repeated_eval_reuses_parse() {
        let mut engine = FlowEngine::new(None);
        engine.eval("n = 0").unwrap();
        for _ in 0..3 {
            engine.eval("n = n + 1").unwrap();
        }
        assert_eq!(engine.eval("n").unwrap(), Val::Num(3.0));
    }

    #[test]
    fn factory_missing_home() {
        let env = EngineEnvironment {
            interpreter_home: Some(PathBuf::from("/definitely/not/here")),
            ..Default::default()
        };
        assert!(matches!(
            FlowEngineFactory.create(&env),
            Err(EngineError::RuntimeNotFound(_))
        ));
    }

    #[test]
    fn factory_loads_site_scripts_in_order() {
        let home = tempfile::tempdir().unwrap();
        let site = home.path().join("site");
        fs::create_dir(&site).unwrap();
        fs::write(site.join("01-base.flow"), "greeting = 'hello'").unwrap();
        fs::write(site.join("02-more.flow"), "greeting = greeting + ' world'").unwrap();
        fs::write(site.join("notes.txt"), "not a script").unwrap();

        let env = EngineEnvironment {
            interpreter_home: Some(home.path().to_path_buf()),
            vanilla: false,
            max_operations: None,
        };
        let mut engine = FlowEngineFactory.create(&env).unwrap();
        assert_eq!(
            engine.eval("greeting").unwrap(),
            Val::Str("hello world".to_string())
        );

        let vanilla = FlowEngineFactory
            .create(&EngineEnvironment {
                vanilla: true,
                ..env
            })
            .unwrap();
        assert!(!vanilla.is_bound("greeting"));
    }

    #[test]
    fn factory_reports_broken_site_script() {
        let home = tempfile::tempdir().unwrap();
        let site = home.path().join("site");
        fs::create_dir(&site).unwrap();
        fs::write(site.join("broken.flow"), "throw 'nope'").unwrap();

        let env = EngineEnvironment {
            interpreter_home: Some(home.path().to_path_buf()),
            vanilla: false,
            max_operations: None,
        };
        assert!(matches!(
            FlowEngineFactory.create(&env),
            Err(EngineError::Initialization { .. })
        ));
    }
}
