//! Flow: the embedded scripting language
//!
//! Source text is parsed with pest into an AST and run by a tree-walking
//! evaluator against a per-engine global namespace.

pub mod ast;
pub mod engine;
pub mod errors;
pub mod eval;
pub mod parser;
pub mod stdlib;
pub mod values;

pub use engine::{EngineEnvironment, EngineFactory, FlowEngine, FlowEngineFactory, ScriptEngine};
pub use errors::{ErrorInfo, ScriptError};
pub use parser::parse_program;
pub use values::{HostObject, HostRef, Val};
