//! In-memory reference stores
//!
//! The event store keeps one lock per agent so concurrent appends for
//! different agents never contend, while appends for the same agent
//! serialize and detect stale expected versions.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain_types::{AgentId, EventVersion};
use crate::store::{
    ConfigStore, EventQuery, EventStore, EventStoreError, StateLogEvent, StateSnapshot,
    StateStore, StoreError,
};

#[derive(Debug, Default)]
struct AgentLog {
    events: Vec<StateLogEvent>,
    snapshot: Option<StateSnapshot>,
}

/// In-memory [`EventStore`] with per-agent fine-grained locking
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    logs: DashMap<AgentId, Arc<Mutex<AgentLog>>>,
}

impl InMemoryEventStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, agent_id: AgentId) -> Arc<Mutex<AgentLog>> {
        Arc::clone(self.logs.entry(agent_id).or_default().value())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_events(
        &self,
        agent_id: AgentId,
        events: Vec<StateLogEvent>,
        expected_version: EventVersion,
    ) -> Result<EventVersion, EventStoreError> {
        let log = self.log_for(agent_id);
        let mut log = log.lock().await;

        let actual = EventVersion::new(log.events.len() as u64);
        if actual != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                agent_id,
                expected: expected_version,
                actual,
            });
        }

        let mut version = actual;
        for mut event in events {
            version = version.next();
            event.agent_id = agent_id;
            event.version = version;
            log.events.push(event);
        }
        Ok(version)
    }

    async fn get_events(
        &self,
        agent_id: AgentId,
        query: EventQuery,
    ) -> Result<Vec<StateLogEvent>, EventStoreError> {
        let Some(log) = self.logs.get(&agent_id).map(|l| Arc::clone(l.value())) else {
            return Ok(Vec::new());
        };
        let log = log.lock().await;

        let tail = log.events.len() as u64;
        let from = query.from_version.map_or(1, |v| v.as_u64()).max(1);
        let to = query.to_version.map_or(tail, |v| v.as_u64()).min(tail);
        if tail == 0 || from > to {
            return Ok(Vec::new());
        }

        let mut slice: Vec<StateLogEvent> =
            log.events[(from - 1) as usize..to as usize].to_vec();
        if let Some(max) = query.max_count {
            slice.truncate(max);
        }
        Ok(slice)
    }

    async fn latest_version(&self, agent_id: AgentId) -> Result<EventVersion, EventStoreError> {
        let Some(log) = self.logs.get(&agent_id).map(|l| Arc::clone(l.value())) else {
            return Ok(EventVersion::default());
        };
        let log = log.lock().await;
        Ok(EventVersion::new(log.events.len() as u64))
    }

    async fn save_snapshot(&self, snapshot: StateSnapshot) -> Result<(), EventStoreError> {
        let log = self.log_for(snapshot.agent_id);
        let mut log = log.lock().await;
        log.snapshot = Some(snapshot);
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<StateSnapshot>, EventStoreError> {
        let Some(log) = self.logs.get(&agent_id).map(|l| Arc::clone(l.value())) else {
            return Ok(None);
        };
        let log = log.lock().await;
        Ok(log.snapshot.clone())
    }
}

/// In-memory [`StateStore`] returning clones of the stored records
#[derive(Debug)]
pub struct InMemoryStateStore<S> {
    records: DashMap<AgentId, S>,
}

impl<S> Default for InMemoryStateStore<S> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl<S> InMemoryStateStore<S> {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<S> StateStore<S> for InMemoryStateStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn load(&self, agent_id: AgentId) -> Result<Option<S>, StoreError> {
        Ok(self.records.get(&agent_id).map(|r| r.value().clone()))
    }

    async fn save(&self, agent_id: AgentId, state: S) -> Result<(), StoreError> {
        self.records.insert(agent_id, state);
        Ok(())
    }

    async fn exists(&self, agent_id: AgentId) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(&agent_id))
    }

    async fn delete(&self, agent_id: AgentId) -> Result<(), StoreError> {
        self.records.remove(&agent_id);
        Ok(())
    }
}

/// In-memory [`ConfigStore`] with composite `(agent_type, agent_id)` keys
#[derive(Debug)]
pub struct InMemoryConfigStore<C> {
    records: DashMap<(String, AgentId), C>,
}

impl<C> Default for InMemoryConfigStore<C> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl<C> InMemoryConfigStore<C> {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<C> ConfigStore<C> for InMemoryConfigStore<C>
where
    C: Clone + Send + Sync + 'static,
{
    async fn load(&self, agent_type: &str, agent_id: AgentId) -> Result<Option<C>, StoreError> {
        Ok(self
            .records
            .get(&(agent_type.to_string(), agent_id))
            .map(|r| r.value().clone()))
    }

    async fn save(&self, agent_type: &str, agent_id: AgentId, config: C) -> Result<(), StoreError> {
        self.records.insert((agent_type.to_string(), agent_id), config);
        Ok(())
    }
}
