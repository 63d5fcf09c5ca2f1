//! Records, relationships and the session transaction
//!
//! A [`ProcessSession`] is the unit-of-work transaction the stage runs in:
//! records taken from the input queue, changes made to them, and the routing
//! decision for each. Nothing is visible outside the session until
//! [`ProcessSession::commit`]; [`ProcessSession::rollback`] puts the original
//! records back.

mod memory;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

pub use memory::{MemoryRepository, MemorySession};

pub type RecordId = String;

/// Attribute carrying the record's unique id
pub const UUID_ATTRIBUTE: &str = "uuid";

/// Routing outcome for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    Success,
    Failure,
}

impl Relationship {
    pub fn name(self) -> &'static str {
        match self {
            Relationship::Success => "success",
            Relationship::Failure => "failure",
        }
    }

    pub fn all() -> [Relationship; 2] {
        [Relationship::Success, Relationship::Failure]
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// A unit of work flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub content: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub entered_at: DateTime<Utc>,
    /// Set when the record came back to the queue after a failed attempt
    pub penalized: bool,
}

impl Record {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        let id = Uuid::new_v4().to_string();
        let mut attributes = BTreeMap::new();
        attributes.insert(UUID_ATTRIBUTE.to_string(), id.clone());
        Self {
            id,
            content: content.into(),
            attributes,
            entered_at: Utc::now(),
            penalized: false,
        }
    }

    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = (String, String)>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// The transaction a script works within
///
/// Methods take `&self` because the session is shared between the stage and
/// the script's host objects for the length of one call.
pub trait ProcessSession: Send + Sync {
    /// Take the next record from the input queue
    fn get(&self) -> Result<Option<Record>, SessionError>;

    /// Create a new, empty record owned by this session
    fn create(&self) -> Result<Record, SessionError>;

    fn read(&self, id: &str) -> Result<Vec<u8>, SessionError>;

    /// Replace a record's content
    fn write(&self, id: &str, content: Vec<u8>) -> Result<(), SessionError>;

    fn attribute(&self, id: &str, name: &str) -> Result<Option<String>, SessionError>;

    fn put_attribute(&self, id: &str, name: &str, value: String) -> Result<(), SessionError>;

    /// Route a record; the last routing decision before commit wins
    fn transfer(&self, id: &str, relationship: Relationship) -> Result<(), SessionError>;

    /// Drop a record from the flow
    fn remove(&self, id: &str) -> Result<(), SessionError>;

    /// Publish all changes; fails if any record has no routing decision
    fn commit(&self) -> Result<(), SessionError>;

    /// Discard all changes and return taken records to the queue
    fn rollback(&self, penalize: bool);
}
