//! Drives a processor over an in-memory repository
//!
//! Each trigger opens a fresh session and runs the script once, the way a
//! pipeline runtime schedules a stage. Triggers run as concurrent tokio tasks;
//! the interpreter pool decides how many evaluate at once.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::interpreter::ScriptEngine;
use crate::processor::{Outcome, ScriptProcessor};
use crate::session::{MemoryRepository, ProcessSession};

/// Result of a batch of triggers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Error messages of failed triggers
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn triggers(&self) -> usize {
        self.succeeded + self.failed
    }

    fn record(&mut self, outcome: Outcome, error: Option<String>) {
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failure => self.failed += 1,
        }
        self.errors.extend(error);
    }
}

pub struct StageRunner<E> {
    processor: Arc<ScriptProcessor<E>>,
    repository: MemoryRepository,
}

impl<E: ScriptEngine> StageRunner<E> {
    pub fn new(processor: Arc<ScriptProcessor<E>>, repository: MemoryRepository) -> Self {
        Self {
            processor,
            repository,
        }
    }

    pub fn repository(&self) -> &MemoryRepository {
        &self.repository
    }

    pub fn processor(&self) -> &Arc<ScriptProcessor<E>> {
        &self.processor
    }

    /// Trigger the stage `triggers` times concurrently
    pub async fn run(&self, triggers: usize) -> RunReport {
        let mut tasks = JoinSet::new();
        for _ in 0..triggers {
            let processor = Arc::clone(&self.processor);
            let session: Arc<dyn ProcessSession> = Arc::new(self.repository.session());
            tasks.spawn(async move { processor.execute(session).await });
        }

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => report.record(outcome, None),
                Ok(Err(e)) => report.record(Outcome::Failure, Some(e.to_string())),
                Err(e) => {
                    warn!(error = %e, "trigger task did not complete");
                    report.record(Outcome::Failure, Some(e.to_string()));
                }
            }
        }

        info!(
            triggers,
            succeeded = report.succeeded,
            failed = report.failed,
            "stage run complete"
        );
        report
    }

    /// Trigger once per record currently queued
    pub async fn run_queue(&self) -> RunReport {
        let queued = self.repository.queued();
        self.run(queued).await
    }
}
