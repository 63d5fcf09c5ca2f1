//! flowscript: a pipeline stage that runs Flow scripts against records
//!
//! A fixed number of interpreters is built at start and lent to one task at a
//! time. Each unit of work borrows an interpreter, binds the session and
//! context objects, runs the script, commits or rolls back, and gives the
//! interpreter back.
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowscript::config::Config;
//! use flowscript::interpreter::FlowEngineFactory;
//! use flowscript::processor::ScriptProcessor;
//! use flowscript::session::MemoryRepository;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::builder().script_body("session.get()").build()?;
//! let processor = ScriptProcessor::start(&config, &FlowEngineFactory)?;
//! let repository = MemoryRepository::new();
//! processor.execute(Arc::new(repository.session())).await?;
//! processor.stop();
//! # Ok(())
//! # }
//! ```

pub mod bindings;
pub mod cli;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod pool;
pub mod processor;
pub mod runner;
pub mod script;
pub mod session;

pub use error::{ConfigError, EngineError, PoolError, ProcessError, SessionError, StartError};
pub use processor::{Outcome, ScriptProcessor};
