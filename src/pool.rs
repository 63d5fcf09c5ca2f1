//! Bounded pool of interpreter instances
//!
//! Engines are built once, up front, and lent to one task at a time. A tokio
//! semaphore counts idle engines so waiting tasks queue in FIFO order without
//! polling; the engines themselves sit in a mutex-guarded stack.
//!
//! Borrowing hands out a [`PooledEngine`] guard. Dropping the guard is the only
//! way to give an engine back, so it is returned exactly once on every exit
//! path, including unwinding out of a panicking script call.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, PoolError};
use crate::interpreter::{EngineEnvironment, EngineFactory, ScriptEngine};

/// What to do when one engine of the pool fails to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFailurePolicy {
    /// Log it and run with fewer engines
    #[default]
    Degrade,
    /// Abort the whole build
    FailFast,
}

/* ===================== Pool ===================== */

struct Shared<E> {
    idle: Mutex<Vec<E>>,
    permits: Semaphore,
    capacity: usize,
    in_use: AtomicUsize,
    drained: AtomicBool,
}

impl<E> Shared<E> {
    fn idle(&self) -> MutexGuard<'_, Vec<E>> {
        // Engines are only pushed and popped under the lock, so a poisoned
        // lock still holds a consistent stack
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size set of engines shared between tasks
pub struct EnginePool<E> {
    shared: Arc<Shared<E>>,
    acquire_timeout: Option<Duration>,
}

impl<E> Clone for EnginePool<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            acquire_timeout: self.acquire_timeout,
        }
    }
}

impl<E> std::fmt::Debug for EnginePool<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("capacity", &self.capacity())
            .field("idle", &self.idle())
            .field("in_use", &self.in_use())
            .field("drained", &self.is_drained())
            .finish()
    }
}

impl<E: ScriptEngine> EnginePool<E> {
    /// Build `requested` engines with `factory`
    ///
    /// Under [`EngineFailurePolicy::Degrade`] the pool may come back smaller
    /// than requested, possibly empty; callers decide whether that is usable.
    pub fn build<F>(
        requested: usize,
        factory: &F,
        env: &EngineEnvironment,
        policy: EngineFailurePolicy,
    ) -> Result<Self, EngineError>
    where
        F: EngineFactory<Engine = E> + ?Sized,
    {
        let mut engines = Vec::with_capacity(requested);
        for index in 0..requested {
            match factory.create(env) {
                Ok(engine) => engines.push(engine),
                Err(e) => match policy {
                    EngineFailurePolicy::Degrade => {
                        warn!(index, error = %e, "failed to create interpreter; continuing with reduced capacity");
                    }
                    EngineFailurePolicy::FailFast => {
                        error!(index, error = %e, "failed to create interpreter");
                        return Err(e);
                    }
                },
            }
        }

        info!(requested, created = engines.len(), "interpreter pool ready");
        Ok(Self::from_engines(engines))
    }

    /// Wrap already-built engines
    pub fn from_engines(engines: Vec<E>) -> Self {
        let capacity = engines.len();
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(engines),
                permits: Semaphore::new(capacity),
                capacity,
                in_use: AtomicUsize::new(0),
                drained: AtomicBool::new(false),
            }),
            acquire_timeout: None,
        }
    }

    /// Fail acquires that wait longer than `timeout`
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Borrow an engine, waiting until one is free
    pub async fn acquire(&self) -> Result<PooledEngine<E>, PoolError> {
        let permit = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.shared.permits.acquire())
                .await
                .map_err(|_| PoolError::Timeout(timeout))?,
            None => self.shared.permits.acquire().await,
        }
        .map_err(|_| PoolError::Drained)?;

        let engine = {
            let mut idle = self.shared.idle();
            if self.shared.drained.load(Ordering::Acquire) {
                return Err(PoolError::Drained);
            }
            idle.pop()
        };
        // The guard now owns the permit; it is re-added when the engine comes back
        permit.forget();

        let Some(engine) = engine else {
            // A permit without an idle engine means the pool was drained
            // between the two steps
            return Err(PoolError::Drained);
        };

        self.shared.in_use.fetch_add(1, Ordering::AcqRel);
        debug!(engine_id = %engine.id(), "interpreter acquired");
        Ok(PooledEngine {
            engine: Some(engine),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Discard idle engines and refuse further acquires
    ///
    /// Engines still on loan are discarded when their guards drop. Returns
    /// the number of idle engines dropped.
    pub fn drain(&self) -> usize {
        let discarded = {
            let mut idle = self.shared.idle();
            self.shared.drained.store(true, Ordering::Release);
            self.shared.permits.close();
            std::mem::take(&mut *idle)
        };
        let count = discarded.len();
        drop(discarded);

        info!(
            discarded = count,
            outstanding = self.in_use(),
            "interpreter pool drained"
        );
        count
    }
}

impl<E> EnginePool<E> {
    /// Number of engines the pool was built with
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn idle(&self) -> usize {
        self.shared.idle().len()
    }

    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Acquire)
    }

    pub fn is_drained(&self) -> bool {
        self.shared.drained.load(Ordering::Acquire)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }
}

/* ===================== Guard ===================== */

/// An engine on loan from an [`EnginePool`]
pub struct PooledEngine<E> {
    engine: Option<E>,
    shared: Arc<Shared<E>>,
}

impl<E: ScriptEngine> std::fmt::Debug for PooledEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledEngine")
            .field("id", &self.engine.as_ref().map(|e| e.id()))
            .finish()
    }
}

impl<E> Deref for PooledEngine<E> {
    type Target = E;

    fn deref(&self) -> &E {
        // Only taken in drop
        self.engine.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<E> DerefMut for PooledEngine<E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<E> Drop for PooledEngine<E> {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        self.shared.in_use.fetch_sub(1, Ordering::AcqRel);

        let mut idle = self.shared.idle();
        if self.shared.drained.load(Ordering::Acquire) {
            drop(idle);
            drop(engine);
            return;
        }
        idle.push(engine);
        drop(idle);
        self.shared.permits.add_permits(1);
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
