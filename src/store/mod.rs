//! Storage contracts: state, config, and the append-only event log
//!
//! The framework only speaks to storage through these traits. The
//! in-memory implementations in [`memory`] are the reference used by
//! tests; production backends plug in behind the same contracts.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;

use crate::domain_types::{AgentId, EventId, EventTypeTag, EventVersion};

pub use memory::{InMemoryConfigStore, InMemoryEventStore, InMemoryStateStore};

/// State and config store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("record codec failure: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },
}

/// Event store failures
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(
        "concurrency conflict for agent {agent_id}: expected version {expected}, actual {actual}"
    )]
    ConcurrencyConflict {
        agent_id: AgentId,
        expected: EventVersion,
        actual: EventVersion,
    },

    #[error("event codec failure: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },

    #[error("storage backend failure: {reason}")]
    Backend { reason: String },
}

/// One entry of an agent's append-only state log.
///
/// Versions are assigned by the store on append: strictly contiguous,
/// starting at `1`, dense per agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLogEvent {
    /// Unique id of the log entry
    pub event_id: EventId,
    /// Agent whose state this event evolves
    pub agent_id: AgentId,
    /// Store-assigned dense version; `0` until appended
    pub version: EventVersion,
    /// Schema tag of the payload
    pub event_type_tag: EventTypeTag,
    /// Encoded event
    pub payload: Bytes,
    /// Creation time
    pub timestamp: SystemTime,
    /// Free-form string metadata
    pub metadata: HashMap<String, String>,
}

impl StateLogEvent {
    /// Creates an unversioned log entry ready for append
    #[must_use]
    pub fn new(agent_id: AgentId, event_type_tag: EventTypeTag, payload: Bytes) -> Self {
        Self {
            event_id: EventId::generate(),
            agent_id,
            version: EventVersion::default(),
            event_type_tag,
            payload,
            timestamp: SystemTime::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attaches a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A point-in-time capture of an agent's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Agent the snapshot belongs to
    pub agent_id: AgentId,
    /// Log version the snapshot reflects
    pub version: EventVersion,
    /// Encoded state record
    pub state: Bytes,
    /// Capture time
    pub timestamp: SystemTime,
}

/// Range selector for [`EventStore::get_events`]; bounds are clamped to
/// the available range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// First version to return (inclusive); defaults to `1`
    pub from_version: Option<EventVersion>,
    /// Last version to return (inclusive); defaults to the tail
    pub to_version: Option<EventVersion>,
    /// Maximum number of events to return
    pub max_count: Option<usize>,
}

impl EventQuery {
    /// Everything from the given version (inclusive) onward
    #[must_use]
    pub fn from(version: EventVersion) -> Self {
        Self {
            from_version: Some(version),
            ..Self::default()
        }
    }

    /// The full log
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }
}

/// Append-only, versioned, per-agent event log plus snapshots.
///
/// Events of distinct agents are fully isolated: a failed append for one
/// agent never affects another.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically appends a batch sharing one commit.
    ///
    /// Succeeds only when `expected_version` equals the current tail;
    /// otherwise fails with [`EventStoreError::ConcurrencyConflict`].
    /// Assigned versions are strictly contiguous starting at
    /// `expected_version + 1`. Returns the new tail version.
    async fn append_events(
        &self,
        agent_id: AgentId,
        events: Vec<StateLogEvent>,
        expected_version: EventVersion,
    ) -> Result<EventVersion, EventStoreError>;

    /// Returns a contiguous slice ordered by version ascending. Bounds are
    /// clamped; an absent agent yields an empty slice, not an error.
    async fn get_events(
        &self,
        agent_id: AgentId,
        query: EventQuery,
    ) -> Result<Vec<StateLogEvent>, EventStoreError>;

    /// The current tail version; `0` for an absent agent
    async fn latest_version(&self, agent_id: AgentId) -> Result<EventVersion, EventStoreError>;

    /// Replaces the agent's current snapshot. Never truncates events.
    async fn save_snapshot(&self, snapshot: StateSnapshot) -> Result<(), EventStoreError>;

    /// The current snapshot; `None` for an absent agent
    async fn latest_snapshot(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<StateSnapshot>, EventStoreError>;
}

/// Per-state-type persistence of agent state records
#[async_trait]
pub trait StateStore<S>: Send + Sync {
    /// Loads the record, `None` when absent
    async fn load(&self, agent_id: AgentId) -> Result<Option<S>, StoreError>;

    /// Writes the record
    async fn save(&self, agent_id: AgentId, state: S) -> Result<(), StoreError>;

    /// Whether a record exists
    async fn exists(&self, agent_id: AgentId) -> Result<bool, StoreError>;

    /// Deletes the record; absent records are a no-op
    async fn delete(&self, agent_id: AgentId) -> Result<(), StoreError>;
}

/// Config persistence keyed by `(agent_type, agent_id)` so two agent types
/// sharing an id keep isolated configs
#[async_trait]
pub trait ConfigStore<C>: Send + Sync {
    /// Loads the config record, `None` when absent
    async fn load(&self, agent_type: &str, agent_id: AgentId) -> Result<Option<C>, StoreError>;

    /// Writes the config record
    async fn save(&self, agent_type: &str, agent_id: AgentId, config: C) -> Result<(), StoreError>;
}
