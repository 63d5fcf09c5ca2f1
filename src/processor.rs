//! The script stage
//!
//! `start` resolves the script and builds the interpreter pool, `execute` and
//! `transform` run one unit of work each, `stop` drains the pool.
//!
//! Every call follows the same discipline:
//! 1. borrow an engine (waiting if all are busy)
//! 2. bind the task objects
//! 3. evaluate the script on the blocking pool
//! 4. unbind and close the task objects, return the engine
//!
//! Step 4 runs from drop guards, so it also happens when the script errors or
//! the evaluation thread panics.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::bindings::{Bindings, ContextObject, LogObject, StreamBindings};
use crate::config::Config;
use crate::error::{ProcessError, SessionError, StartError};
use crate::interpreter::{EngineFactory, ScriptEngine, Val};
use crate::pool::{EnginePool, PooledEngine};
use crate::script::Script;
use crate::session::ProcessSession;

pub use crate::bindings::{ComponentLog, LogLevel, TaskBindings, TracingLog};

/// Tracing target for faults of the interpreter itself
pub const DIAGNOSTICS_TARGET: &str = "flowscript::diagnostics";

const COMPONENT: &str = "ScriptProcessor";

/// How one unit of work ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// A running script stage
pub struct ScriptProcessor<E> {
    pool: EnginePool<E>,
    script: Arc<Script>,
    properties: Arc<BTreeMap<String, serde_json::Value>>,
    max_concurrent_tasks: usize,
    log: Arc<dyn ComponentLog>,
}

impl<E> std::fmt::Debug for ScriptProcessor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptProcessor")
            .field("script", &self.script.origin())
            .field("pool", &self.pool)
            .finish()
    }
}

impl<E: ScriptEngine> ScriptProcessor<E> {
    /// Validate settings, read the script and build the pool
    ///
    /// Does not evaluate the script.
    pub fn start<F>(config: &Config, factory: &F) -> Result<Self, StartError>
    where
        F: EngineFactory<Engine = E> + ?Sized,
    {
        config.validate()?;
        let script = Script::resolve(&config.script)?;

        let requested = config.pool.max_concurrent_tasks;
        let pool = EnginePool::build(
            requested,
            factory,
            &config.script.engine_environment(),
            config.pool.on_engine_failure,
        )?
        .with_acquire_timeout(config.pool.acquire_timeout());

        if pool.capacity() == 0 {
            error!(requested, "no interpreter could be created");
            return Err(StartError::NoEngines { requested });
        }

        info!(
            script = %script.origin(),
            fingerprint = script.short_fingerprint(),
            engines = pool.capacity(),
            requested,
            "script stage started"
        );

        Ok(Self {
            pool,
            script: Arc::new(script),
            properties: Arc::new(config.properties.clone()),
            max_concurrent_tasks: requested,
            log: Arc::new(TracingLog::new(COMPONENT)),
        })
    }

    /// Send script log output somewhere other than `tracing`
    pub fn with_log(mut self, log: Arc<dyn ComponentLog>) -> Self {
        self.log = log;
        self
    }

    /// Drain the pool; later calls fail with `PoolError::Drained`
    pub fn stop(&self) {
        let discarded = self.pool.drain();
        info!(discarded, "script stage stopped");
    }

    pub fn pool(&self) -> &EnginePool<E> {
        &self.pool
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Run the script for one session
    ///
    /// Commits on success. On any failure the session is rolled back with
    /// penalization and the error is returned.
    pub async fn execute(&self, session: Arc<dyn ProcessSession>) -> Result<Outcome, ProcessError> {
        let engine = self.pool.acquire().await.inspect_err(|e| {
            warn!(error = %e, "no interpreter available");
        })?;

        let bindings = TaskBindings::new(
            Arc::clone(&session),
            ContextObject::new(Arc::clone(&self.properties), self.max_concurrent_tasks),
            LogObject::new(Arc::clone(&self.log)),
        );

        // Rolls back if this future is dropped before the session is settled
        let mut unit = SessionGuard::new(session);

        let committed = match self.run_bound(engine, bindings).await {
            Ok(_) => unit.commit().map_err(ProcessError::Commit),
            Err(e) => Err(e),
        };

        match committed {
            Ok(()) => Ok(Outcome::Success),
            Err(e) => {
                self.log.log(
                    LogLevel::Error,
                    &format!("failed to process due to {}; rolling back session", e),
                );
                unit.rollback();
                Err(e)
            }
        }
    }

    /// Run the script over a byte stream
    ///
    /// The script sees `inputStream`, `outputStream` and `log`. The writer is
    /// flushed and returned.
    pub async fn transform<R, W>(&self, input: R, output: W) -> io::Result<W>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let engine = self.pool.acquire().await.map_err(ProcessError::from)?;

        let bindings = StreamBindings::new(input, output, LogObject::new(Arc::clone(&self.log)));

        let writer = match self.run_bound(engine, bindings).await {
            Ok((_, writer)) => writer,
            Err(e) => {
                self.log
                    .log(LogLevel::Error, &format!("failed to transform stream due to {}", e));
                return Err(e.into());
            }
        };

        let mut writer =
            writer.ok_or_else(|| io::Error::other("output stream was already taken"))?;
        writer.flush()?;
        Ok(writer)
    }

    async fn run_bound<B>(
        &self,
        mut engine: PooledEngine<E>,
        bindings: B,
    ) -> Result<(Val, B::Output), ProcessError>
    where
        B: Bindings + Send + 'static,
        B::Output: Send + 'static,
    {
        let engine_id = engine.id();
        let script = Arc::clone(&self.script);

        // The guard moves into the closure so a panic still returns the engine
        let result = tokio::task::spawn_blocking(move || -> Result<(Val, B::Output), ProcessError> {
            let value = run_with_bindings(&mut *engine, &bindings, script.text())?;
            Ok((value, bindings.finish()))
        })
        .await
        .map_err(|e| ProcessError::Aborted(abort_reason(e)))
        .and_then(|r| r);

        if let Err(e) = &result {
            match e.script_error() {
                Some(script_err) if script_err.is_interpreter_fault() => {
                    error!(target: DIAGNOSTICS_TARGET, %engine_id, error = %script_err, "interpreter fault");
                }
                _ if matches!(e, ProcessError::Aborted(_)) => {
                    error!(target: DIAGNOSTICS_TARGET, %engine_id, error = %e, "script evaluation aborted");
                }
                _ => {}
            }
        }
        result
    }
}

/* ===================== Session Guard ===================== */

/// Owns the session for one `execute`; rolls back unless settled
struct SessionGuard {
    session: Arc<dyn ProcessSession>,
    settled: bool,
}

impl SessionGuard {
    fn new(session: Arc<dyn ProcessSession>) -> Self {
        Self {
            session,
            settled: false,
        }
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        self.session.commit()?;
        self.settled = true;
        Ok(())
    }

    fn rollback(&mut self) {
        self.settled = true;
        self.session.rollback(true);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.settled {
            warn!("execution abandoned before the session was settled; rolling back");
            self.session.rollback(true);
        }
    }
}

/* ===================== Binding Scope ===================== */

/// Unbinds task names and closes the task objects when dropped
struct BoundScope<'a, E: ScriptEngine, B: Bindings> {
    engine: &'a mut E,
    bindings: &'a B,
    bound: Vec<&'static str>,
}

impl<E: ScriptEngine, B: Bindings> Drop for BoundScope<'_, E, B> {
    fn drop(&mut self) {
        for name in self.bound.drain(..) {
            self.engine.unassign(name);
        }
        self.bindings.close();
    }
}

fn run_with_bindings<E: ScriptEngine, B: Bindings>(
    engine: &mut E,
    bindings: &B,
    source: &str,
) -> Result<Val, ProcessError> {
    let mut scope = BoundScope {
        engine,
        bindings,
        bound: Vec::new(),
    };
    for (name, value) in bindings.entries() {
        scope.engine.assign(name, value).map_err(ProcessError::Binding)?;
        scope.bound.push(name);
    }
    scope.engine.eval(source).map_err(ProcessError::Script)
}

fn abort_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
