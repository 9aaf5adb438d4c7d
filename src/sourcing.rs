//! Event-sourced state evolution
//!
//! An event-sourced agent never assigns state directly: handlers stage
//! events with `raise`, then `confirm` appends the batch atomically and
//! applies each event through the agent's pure
//! [`transition_state`](crate::agent::Agent::transition_state). Replay on
//! activation rebuilds the same state from the latest snapshot plus the
//! log; a count-based policy captures fresh snapshots as the log grows.

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::agent::Agent;
use crate::agent::state::Guarded;
use crate::domain_types::{AgentId, EventVersion, SnapshotEvery};
use crate::observability::record_events_committed;
use crate::serialization::validated_tag;
use crate::store::{EventQuery, EventStore, EventStoreError, StateLogEvent, StateSnapshot};

/// Event-sourcing failures
#[derive(Debug, Error)]
pub enum SourcingError {
    #[error("agent is not event-sourced; no event store is attached")]
    NotEventSourced,

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl SourcingError {
    /// Whether this failure is a lost optimistic-concurrency race
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(EventStoreError::ConcurrencyConflict { .. })
        )
    }
}

/// Staging buffer and version cursor of one event-sourced agent
pub struct SourcedLog<A: Agent> {
    store: Arc<dyn EventStore>,
    staged: Vec<A::StateEvent>,
    current_version: EventVersion,
    snapshot_every: SnapshotEvery,
    confirmed_since_snapshot: u64,
}

impl<A: Agent> std::fmt::Debug for SourcedLog<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcedLog")
            .field("staged", &self.staged.len())
            .field("current_version", &self.current_version)
            .field("snapshot_every", &self.snapshot_every)
            .finish()
    }
}

impl<A: Agent> SourcedLog<A> {
    /// Creates a log over the given store with a count-based snapshot policy
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, snapshot_every: SnapshotEvery) -> Self {
        Self {
            store,
            staged: Vec::new(),
            current_version: EventVersion::default(),
            snapshot_every,
            confirmed_since_snapshot: 0,
        }
    }

    /// Stages one state-change event in memory without applying it
    pub fn raise(&mut self, event: A::StateEvent) {
        self.staged.push(event);
    }

    /// Number of staged, unconfirmed events
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Latest confirmed version
    #[must_use]
    pub fn version(&self) -> EventVersion {
        self.current_version
    }

    /// Appends all staged events at `expected_version = current`, applies
    /// them to `state`, and advances the version.
    ///
    /// On a concurrency conflict the staging buffer is cleared and the
    /// error surfaces; the in-memory state is left untouched.
    #[instrument(skip(self, state), fields(agent_id = %agent_id, operation = "confirm_events"))]
    pub async fn confirm(
        &mut self,
        agent_id: AgentId,
        state: &mut Guarded<A::State>,
    ) -> Result<EventVersion, SourcingError> {
        if self.staged.is_empty() {
            return Ok(self.current_version);
        }

        let records = self
            .staged
            .iter()
            .map(|event| encode_event::<A>(agent_id, event))
            .collect::<Result<Vec<_>, EventStoreError>>()?;
        let count = records.len();

        match self
            .store
            .append_events(agent_id, records, self.current_version)
            .await
        {
            Ok(new_version) => {
                for event in self.staged.drain(..) {
                    let next = A::transition_state(state.get().clone(), &event);
                    state.apply(next);
                }
                self.current_version = new_version;
                self.confirmed_since_snapshot += count as u64;
                record_events_committed(count);
                debug!(version = %new_version, committed = count, "events confirmed");

                if self.confirmed_since_snapshot >= self.snapshot_every.as_u64() {
                    self.snapshot(agent_id, state).await?;
                }
                Ok(new_version)
            }
            Err(err) => {
                // A lost race leaves the staging buffer unusable: the events
                // were decided against a version that no longer exists.
                self.staged.clear();
                warn!(error = %err, "confirm failed; staging buffer cleared");
                Err(err.into())
            }
        }
    }

    /// Rebuilds state from the latest snapshot and subsequent events.
    ///
    /// Sets the version cursor to the last applied event. Determinism of
    /// the agent's transition function makes replay idempotent.
    #[instrument(skip(self, state), fields(agent_id = %agent_id, operation = "replay"))]
    pub async fn replay(
        &mut self,
        agent_id: AgentId,
        state: &mut Guarded<A::State>,
    ) -> Result<EventVersion, SourcingError> {
        if let Some(snapshot) = self.store.latest_snapshot(agent_id).await? {
            let decoded: A::State = serde_json::from_slice(&snapshot.state)
                .map_err(EventStoreError::from)?;
            state.apply(decoded);
            self.current_version = snapshot.version;
        }

        let events = self
            .store
            .get_events(agent_id, EventQuery::from(self.current_version.next()))
            .await?;
        for record in events {
            let event: A::StateEvent =
                serde_json::from_slice(&record.payload).map_err(EventStoreError::from)?;
            let next = A::transition_state(state.get().clone(), &event);
            state.apply(next);
            self.current_version = record.version;
        }

        debug!(version = %self.current_version, "replay complete");
        Ok(self.current_version)
    }

    /// Captures the current state and version as the agent's snapshot
    pub async fn snapshot(
        &mut self,
        agent_id: AgentId,
        state: &Guarded<A::State>,
    ) -> Result<(), SourcingError> {
        let encoded = serde_json::to_vec(state.get()).map_err(EventStoreError::from)?;
        self.store
            .save_snapshot(StateSnapshot {
                agent_id,
                version: self.current_version,
                state: Bytes::from(encoded),
                timestamp: std::time::SystemTime::now(),
            })
            .await?;
        self.confirmed_since_snapshot = 0;
        Ok(())
    }
}

fn encode_event<A: Agent>(
    agent_id: AgentId,
    event: &A::StateEvent,
) -> Result<StateLogEvent, EventStoreError> {
    let tag = validated_tag(<A::StateEvent as crate::serialization::DomainEvent>::event_type())
        .map_err(|e| EventStoreError::Backend {
            reason: e.to_string(),
        })?;
    let payload = Bytes::from(serde_json::to_vec(event)?);
    Ok(StateLogEvent::new(agent_id, tag, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::HandlerSet;
    use crate::serialization::DomainEvent;
    use crate::store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Tally {
        total: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TallyEvent {
        Added(i64),
        Removed(i64),
    }

    impl DomainEvent for TallyEvent {
        fn event_type() -> &'static str {
            "test.tally_event"
        }
    }

    #[derive(Debug, Default)]
    struct TallyAgent;

    impl Agent for TallyAgent {
        type State = Tally;
        type Config = ();
        type StateEvent = TallyEvent;

        fn configure(_handlers: &mut HandlerSet<Self>) {}

        fn transition_state(state: Tally, event: &TallyEvent) -> Tally {
            match event {
                TallyEvent::Added(n) => Tally {
                    total: state.total + n,
                },
                TallyEvent::Removed(n) => Tally {
                    total: state.total - n,
                },
            }
        }
    }

    fn log(store: &Arc<InMemoryEventStore>) -> SourcedLog<TallyAgent> {
        SourcedLog::new(
            Arc::clone(store) as Arc<dyn EventStore>,
            SnapshotEvery::try_new(100).unwrap(),
        )
    }

    #[tokio::test]
    async fn confirm_applies_staged_events_in_order() {
        let store = Arc::new(InMemoryEventStore::new());
        let agent_id = AgentId::generate();
        let mut sourced = log(&store);
        let mut state: Guarded<Tally> = Guarded::new(true);

        sourced.raise(TallyEvent::Added(10));
        sourced.raise(TallyEvent::Removed(3));
        let version = sourced.confirm(agent_id, &mut state).await.unwrap();

        assert_eq!(version.as_u64(), 2);
        assert_eq!(state.get().total, 7);
        assert_eq!(sourced.staged_len(), 0);
    }

    #[tokio::test]
    async fn conflict_clears_staging_and_keeps_state() {
        let store = Arc::new(InMemoryEventStore::new());
        let agent_id = AgentId::generate();

        let mut winner = log(&store);
        let mut winner_state: Guarded<Tally> = Guarded::new(true);
        winner.raise(TallyEvent::Added(5));
        winner.confirm(agent_id, &mut winner_state).await.unwrap();

        let mut loser = log(&store);
        let mut loser_state: Guarded<Tally> = Guarded::new(true);
        loser.raise(TallyEvent::Added(1));
        let err = loser.confirm(agent_id, &mut loser_state).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(loser.staged_len(), 0);
        assert_eq!(loser_state.get().total, 0);
    }

    #[tokio::test]
    async fn replay_rebuilds_the_same_state() {
        let store = Arc::new(InMemoryEventStore::new());
        let agent_id = AgentId::generate();

        let mut live = log(&store);
        let mut live_state: Guarded<Tally> = Guarded::new(true);
        for event in [TallyEvent::Added(4), TallyEvent::Added(8), TallyEvent::Removed(2)] {
            live.raise(event);
        }
        live.confirm(agent_id, &mut live_state).await.unwrap();

        let mut fresh = log(&store);
        let mut fresh_state: Guarded<Tally> = Guarded::new(true);
        let version = fresh.replay(agent_id, &mut fresh_state).await.unwrap();

        assert_eq!(version.as_u64(), 3);
        assert_eq!(fresh_state.get(), live_state.get());
    }

    #[tokio::test]
    async fn replay_starts_from_the_snapshot() {
        let store = Arc::new(InMemoryEventStore::new());
        let agent_id = AgentId::generate();

        let mut live = log(&store);
        let mut state: Guarded<Tally> = Guarded::new(true);
        live.raise(TallyEvent::Added(100));
        live.confirm(agent_id, &mut state).await.unwrap();
        live.snapshot(agent_id, &state).await.unwrap();
        live.raise(TallyEvent::Removed(30));
        live.confirm(agent_id, &mut state).await.unwrap();

        let mut fresh = log(&store);
        let mut fresh_state: Guarded<Tally> = Guarded::new(true);
        fresh.replay(agent_id, &mut fresh_state).await.unwrap();
        assert_eq!(fresh_state.get().total, 70);
        assert_eq!(fresh.version().as_u64(), 2);
    }

    #[tokio::test]
    async fn snapshot_policy_fires_on_the_configured_cadence() {
        let store = Arc::new(InMemoryEventStore::new());
        let agent_id = AgentId::generate();
        let mut sourced: SourcedLog<TallyAgent> = SourcedLog::new(
            Arc::clone(&store) as Arc<dyn EventStore>,
            SnapshotEvery::try_new(2).unwrap(),
        );
        let mut state: Guarded<Tally> = Guarded::new(true);

        sourced.raise(TallyEvent::Added(1));
        sourced.confirm(agent_id, &mut state).await.unwrap();
        assert!(store.latest_snapshot(agent_id).await.unwrap().is_none());

        sourced.raise(TallyEvent::Added(1));
        sourced.confirm(agent_id, &mut state).await.unwrap();
        let snapshot = store.latest_snapshot(agent_id).await.unwrap().unwrap();
        assert_eq!(snapshot.version.as_u64(), 2);
    }
}
