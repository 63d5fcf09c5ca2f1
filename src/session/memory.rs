//! In-memory record repository and sessions
//!
//! Used by the CLI and by tests to drive the stage without a pipeline
//! runtime. Sessions stage every change and only touch the repository on
//! commit or rollback.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use super::{ProcessSession, Record, Relationship};
use crate::error::SessionError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/* ===================== Repository ===================== */

#[derive(Debug, Default)]
struct RepoState {
    queue: VecDeque<Record>,
    routed: BTreeMap<Relationship, Vec<Record>>,
    removed: usize,
    commits: usize,
    rollbacks: usize,
}

/// Input queue plus the records routed to each relationship
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<RepoState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a record with the given content
    pub fn enqueue(&self, content: impl Into<Vec<u8>>) -> Record {
        self.enqueue_record(Record::new(content))
    }

    pub fn enqueue_record(&self, record: Record) -> Record {
        lock(&self.state).queue.push_back(record.clone());
        record
    }

    /// Open a session against this repository
    pub fn session(&self) -> MemorySession {
        MemorySession {
            id: Uuid::new_v4(),
            repo: self.clone(),
            staged: Mutex::new(Staged::default()),
        }
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Records waiting in the input queue, front first
    pub fn queue(&self) -> Vec<Record> {
        lock(&self.state).queue.iter().cloned().collect()
    }

    /// Committed records routed to `relationship`, in commit order
    pub fn transferred(&self, relationship: Relationship) -> Vec<Record> {
        lock(&self.state)
            .routed
            .get(&relationship)
            .cloned()
            .unwrap_or_default()
    }

    pub fn removed(&self) -> usize {
        lock(&self.state).removed
    }

    pub fn commits(&self) -> usize {
        lock(&self.state).commits
    }

    pub fn rollbacks(&self) -> usize {
        lock(&self.state).rollbacks
    }
}

/* ===================== Session ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Transfer(Relationship),
    Remove,
}

#[derive(Debug, Default)]
struct Staged {
    /// Records as they were when taken from the queue, in take order
    taken: Vec<Record>,
    /// Current state of every record the session owns
    working: HashMap<String, Record>,
    /// Creation and take order of `working`
    order: Vec<String>,
    routes: HashMap<String, Route>,
}

impl Staged {
    fn record_mut(&mut self, id: &str) -> Result<&mut Record, SessionError> {
        self.working
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownRecord(id.to_string()))
    }

    fn record(&self, id: &str) -> Result<&Record, SessionError> {
        self.working
            .get(id)
            .ok_or_else(|| SessionError::UnknownRecord(id.to_string()))
    }

    fn adopt(&mut self, record: Record) {
        self.order.push(record.id.clone());
        self.working.insert(record.id.clone(), record);
    }
}

/// Session over a [`MemoryRepository`]
#[derive(Debug)]
pub struct MemorySession {
    id: Uuid,
    repo: MemoryRepository,
    staged: Mutex<Staged>,
}

impl MemorySession {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl ProcessSession for MemorySession {
    fn get(&self) -> Result<Option<Record>, SessionError> {
        let mut staged = lock(&self.staged);
        let Some(record) = lock(&self.repo.state).queue.pop_front() else {
            return Ok(None);
        };
        staged.taken.push(record.clone());
        staged.adopt(record.clone());
        Ok(Some(record))
    }

    fn create(&self) -> Result<Record, SessionError> {
        let record = Record::new(Vec::new());
        lock(&self.staged).adopt(record.clone());
        Ok(record)
    }

    fn read(&self, id: &str) -> Result<Vec<u8>, SessionError> {
        Ok(lock(&self.staged).record(id)?.content.clone())
    }

    fn write(&self, id: &str, content: Vec<u8>) -> Result<(), SessionError> {
        lock(&self.staged).record_mut(id)?.content = content;
        Ok(())
    }

    fn attribute(&self, id: &str, name: &str) -> Result<Option<String>, SessionError> {
        Ok(lock(&self.staged).record(id)?.attributes.get(name).cloned())
    }

    fn put_attribute(&self, id: &str, name: &str, value: String) -> Result<(), SessionError> {
        lock(&self.staged)
            .record_mut(id)?
            .attributes
            .insert(name.to_string(), value);
        Ok(())
    }

    fn transfer(&self, id: &str, relationship: Relationship) -> Result<(), SessionError> {
        let mut staged = lock(&self.staged);
        staged.record(id)?;
        staged
            .routes
            .insert(id.to_string(), Route::Transfer(relationship));
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), SessionError> {
        let mut staged = lock(&self.staged);
        staged.record(id)?;
        staged.routes.insert(id.to_string(), Route::Remove);
        Ok(())
    }

    fn commit(&self) -> Result<(), SessionError> {
        let mut staged = lock(&self.staged);

        let unaccounted: Vec<String> = staged
            .order
            .iter()
            .filter(|id| !staged.routes.contains_key(*id))
            .cloned()
            .collect();
        if !unaccounted.is_empty() {
            return Err(SessionError::Unaccounted(unaccounted));
        }

        let Staged {
            order,
            mut working,
            routes,
            ..
        } = std::mem::take(&mut *staged);

        let mut repo = lock(&self.repo.state);
        for id in order {
            let (Some(record), Some(route)) = (working.remove(&id), routes.get(&id)) else {
                continue;
            };
            match route {
                Route::Transfer(relationship) => {
                    repo.routed.entry(*relationship).or_default().push(record)
                }
                Route::Remove => repo.removed += 1,
            }
        }
        repo.commits += 1;

        debug!(session_id = %self.id, "session committed");
        Ok(())
    }

    fn rollback(&self, penalize: bool) {
        let staged = std::mem::take(&mut *lock(&self.staged));

        let mut repo = lock(&self.repo.state);
        for mut record in staged.taken.into_iter().rev() {
            record.penalized |= penalize;
            repo.queue.push_front(record);
        }
        repo.rollbacks += 1;

        debug!(session_id = %self.id, penalize, "session rolled back");
    }
}
