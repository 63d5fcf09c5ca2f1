//! Pool tests - bound, release on every path, timeout, drain and build policy

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::{EngineFailurePolicy, EnginePool};
use crate::error::{EngineError, PoolError};
use crate::interpreter::{EngineEnvironment, EngineFactory, ScriptEngine, ScriptError, Val};

/* ===================== Test Helpers ===================== */

#[derive(Debug)]
struct FakeEngine {
    id: Uuid,
}

impl ScriptEngine for FakeEngine {
    fn id(&self) -> Uuid {
        self.id
    }

    fn assign(&mut self, _name: &str, _value: Val) -> Result<(), ScriptError> {
        Ok(())
    }

    fn unassign(&mut self, _name: &str) -> Option<Val> {
        None
    }

    fn eval(&mut self, _source: &str) -> Result<Val, ScriptError> {
        Ok(Val::Null)
    }
}

/// Fails on the given creation attempts (0-based)
#[derive(Default)]
struct FakeFactory {
    attempts: AtomicUsize,
    failing: Vec<usize>,
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn create(&self, _env: &EngineEnvironment) -> Result<FakeEngine, EngineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&attempt) {
            return Err(EngineError::RuntimeNotFound(format!("/fake/{}", attempt).into()));
        }
        Ok(FakeEngine { id: Uuid::new_v4() })
    }
}

fn pool(capacity: usize) -> EnginePool<FakeEngine> {
    EnginePool::build(
        capacity,
        &FakeFactory::default(),
        &EngineEnvironment::default(),
        EngineFailurePolicy::Degrade,
    )
    .expect("Pool build failed")
}

/* ===================== Bound ===================== */

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_use_never_exceeds_capacity() {
    let pool = pool(2);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        let active = active.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            let _engine = pool.acquire().await.expect("Acquire failed");
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for task in tasks {
        task.await.expect("Task panicked");
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(pool.idle(), 2);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_borrowed_engines_are_distinct() {
    let pool = pool(2);
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(pool.in_use(), 2);
    assert_eq!(pool.idle(), 0);
}

/* ===================== Release ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_engine_returned_on_drop() {
    let pool = pool(1);
    let id = {
        let engine = pool.acquire().await.unwrap();
        engine.id()
    };
    assert_eq!(pool.idle(), 1);

    // Same engine comes back
    let again = pool.acquire().await.unwrap();
    assert_eq!(again.id(), id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_engine_returned_after_panic() {
    let pool = pool(1);
    let engine = pool.acquire().await.unwrap();

    let result = tokio::task::spawn_blocking(move || {
        let _engine = engine;
        panic!("script blew up");
    })
    .await;

    assert!(result.is_err());
    assert_eq!(pool.idle(), 1);
    assert_eq!(pool.in_use(), 0);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pooled_engine_debug_shows_id() {
    let pool = pool(1);
    let engine = pool.acquire().await.unwrap();

    let rendered = format!("{:?}", engine);
    assert!(rendered.starts_with("PooledEngine"));
    assert!(rendered.contains(&engine.id().to_string()));
}

/* ===================== Timeout and Drain ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_acquire_timeout() {
    let pool = pool(1).with_acquire_timeout(Some(Duration::from_millis(20)));
    let _held = pool.acquire().await.unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err, PoolError::Timeout(Duration::from_millis(20)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_waiter_wakes_when_engine_returned() {
    let pool = pool(1);
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|engine| engine.id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    let id = held.id();
    drop(held);
    assert_eq!(waiter.await.unwrap().unwrap(), id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_drain_refuses_acquire_and_discards_outstanding() {
    let pool = pool(2);
    let outstanding = pool.acquire().await.unwrap();

    assert_eq!(pool.drain(), 1);
    assert!(pool.is_drained());
    assert_eq!(pool.acquire().await.unwrap_err(), PoolError::Drained);

    drop(outstanding);
    assert_eq!(pool.idle(), 0);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_drain_wakes_waiters() {
    let pool = pool(1);
    let _held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.drain();

    assert_eq!(waiter.await.unwrap(), Err(PoolError::Drained));
}

/* ===================== Build Policy ===================== */

#[test]
fn test_degrade_skips_failed_engines() {
    let factory = FakeFactory {
        failing: vec![1],
        ..Default::default()
    };
    let pool = EnginePool::build(
        3,
        &factory,
        &EngineEnvironment::default(),
        EngineFailurePolicy::Degrade,
    )
    .unwrap();
    assert_eq!(pool.capacity(), 2);
    assert_eq!(pool.idle(), 2);
}

#[test]
fn test_fail_fast_aborts_build() {
    let factory = FakeFactory {
        failing: vec![1],
        ..Default::default()
    };
    let result = EnginePool::build(
        3,
        &factory,
        &EngineEnvironment::default(),
        EngineFailurePolicy::FailFast,
    );
    assert!(matches!(result, Err(EngineError::RuntimeNotFound(_))));
    assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_degrade_can_produce_empty_pool() {
    let factory = FakeFactory {
        failing: vec![0, 1],
        ..Default::default()
    };
    let pool = EnginePool::build(
        2,
        &factory,
        &EngineEnvironment::default(),
        EngineFailurePolicy::Degrade,
    )
    .unwrap();
    assert_eq!(pool.capacity(), 0);
}
