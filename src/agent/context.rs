//! Per-agent execution context handed to lifecycle hooks and handlers
//!
//! The context is the agent's window onto the framework: guarded state
//! and config cells, publishing and forwarding, and (when an event store
//! is attached) the raise/confirm event-sourcing surface.

use std::sync::Arc;
use thiserror::Error;

use crate::agent::Agent;
use crate::agent::state::{Guarded, StateAccessError};
use crate::domain_types::{AgentId, EventId, EventVersion};
use crate::envelope::{EventDirection, EventEnvelope, EventEnvelopeBuilder};
use crate::routing::router::{EventRouter, RouteReport};
use crate::serialization::{CodecError, DomainEvent, EventPayload};
use crate::sourcing::{SourcedLog, SourcingError};
use crate::streams::stream::StreamError;

/// Why a publish failed.
///
/// Routing and hop rules never fail a publish; only payload encoding or a
/// backend refusing the push (backpressure) do.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("payload encoding failed: {source}")]
    Encode {
        #[from]
        source: CodecError,
    },

    #[error("stream refused the publish: {source}")]
    Stream {
        #[from]
        source: StreamError,
    },

    #[error("no envelope is being handled; forwarding requires an active delivery")]
    NoCurrentEvent,
}

/// Execution context owned by one agent instance
pub struct AgentContext<A: Agent> {
    agent_id: AgentId,
    state: Guarded<A::State>,
    config: Guarded<A::Config>,
    router: Arc<EventRouter>,
    sourced: Option<SourcedLog<A>>,
    current_envelope: Option<EventEnvelope>,
}

impl<A: Agent> std::fmt::Debug for AgentContext<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.agent_id)
            .field("event_sourced", &self.sourced.is_some())
            .finish()
    }
}

impl<A: Agent> AgentContext<A> {
    pub(crate) fn new(
        agent_id: AgentId,
        router: Arc<EventRouter>,
        sourced: Option<SourcedLog<A>>,
    ) -> Self {
        let event_sourced = sourced.is_some();
        Self {
            agent_id,
            state: Guarded::new(event_sourced),
            config: Guarded::new(false),
            router,
            sourced,
            current_envelope: None,
        }
    }

    /// This agent's identifier
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Reads the state record
    #[must_use]
    pub fn state(&self) -> &A::State {
        self.state.get()
    }

    /// In-place mutable access to the state record; prefer [`Self::set_state`]
    /// (or raised events when event-sourced) so the mutation is policed
    pub fn state_mut(&mut self) -> &mut A::State {
        self.state.get_mut()
    }

    /// Reassigns the state record, subject to the scope and sourcing guards
    pub fn set_state(&mut self, state: A::State) -> Result<(), StateAccessError> {
        self.state.set(state)
    }

    /// Reads the config record
    #[must_use]
    pub fn config(&self) -> &A::Config {
        self.config.get()
    }

    /// Reassigns the config record, subject to the scope guard
    pub fn set_config(&mut self, config: A::Config) -> Result<(), StateAccessError> {
        self.config.set(config)
    }

    /// Whether this agent evolves state through an event log
    #[must_use]
    pub fn is_event_sourced(&self) -> bool {
        self.sourced.is_some()
    }

    /// Current confirmed event-log version; `0` when not event-sourced
    #[must_use]
    pub fn current_version(&self) -> EventVersion {
        self.sourced
            .as_ref()
            .map(SourcedLog::version)
            .unwrap_or_default()
    }

    /// The envelope currently being dispatched, if any
    #[must_use]
    pub fn current_envelope(&self) -> Option<&EventEnvelope> {
        self.current_envelope.as_ref()
    }

    /// Publishes a typed event in the given direction.
    ///
    /// When called during dispatch, the published envelope inherits the
    /// handled envelope's correlation id.
    pub async fn publish<E: DomainEvent>(
        &self,
        event: &E,
        direction: EventDirection,
    ) -> Result<EventId, PublishError> {
        let payload = EventPayload::encode(event)?;
        let envelope = self.envelope_builder(payload).direction(direction).build();
        let id = envelope.id();
        self.router.route_from(self.agent_id, envelope).await?;
        Ok(id)
    }

    /// Starts an envelope for an advanced publish (hop limits, stop flag,
    /// version stamps). Finish with [`Self::publish_envelope`].
    #[must_use]
    pub fn envelope_builder(&self, payload: EventPayload) -> EventEnvelopeBuilder {
        let builder = EventEnvelope::builder(self.agent_id, payload);
        match &self.current_envelope {
            Some(current) => builder.correlation_id(current.correlation_id()),
            None => builder,
        }
    }

    /// Routes a pre-built envelope from this agent
    pub async fn publish_envelope(
        &self,
        envelope: EventEnvelope,
    ) -> Result<RouteReport, PublishError> {
        Ok(self.router.route_from(self.agent_id, envelope).await?)
    }

    /// Re-routes the envelope currently being handled in a new direction,
    /// preserving its id, hop counters, and publisher chain
    pub async fn forward(&self, direction: EventDirection) -> Result<RouteReport, PublishError> {
        let Some(current) = &self.current_envelope else {
            return Err(PublishError::NoCurrentEvent);
        };
        let mut envelope = current.clone();
        envelope.set_direction(direction);
        Ok(self.router.route_from(self.agent_id, envelope).await?)
    }

    /// Stages a state-change event without applying it.
    ///
    /// Only valid on event-sourced agents.
    pub fn raise_event(&mut self, event: A::StateEvent) -> Result<(), SourcingError> {
        match self.sourced.as_mut() {
            Some(log) => {
                log.raise(event);
                Ok(())
            }
            None => Err(SourcingError::NotEventSourced),
        }
    }

    /// Number of staged, unconfirmed events
    #[must_use]
    pub fn staged_events(&self) -> usize {
        self.sourced.as_ref().map_or(0, SourcedLog::staged_len)
    }

    /// Atomically appends all staged events, applies them through
    /// [`Agent::transition_state`], and advances the version.
    ///
    /// On a concurrency conflict the staging buffer is cleared and the
    /// conflict surfaces to the caller.
    pub async fn confirm_events(&mut self) -> Result<EventVersion, SourcingError> {
        match self.sourced.as_mut() {
            Some(log) => log.confirm(self.agent_id, &mut self.state).await,
            None => Err(SourcingError::NotEventSourced),
        }
    }

    /// Captures a snapshot of the current state and version
    pub async fn create_snapshot(&mut self) -> Result<(), SourcingError> {
        match self.sourced.as_mut() {
            Some(log) => log.snapshot(self.agent_id, &self.state).await,
            None => Err(SourcingError::NotEventSourced),
        }
    }

    pub(crate) fn begin_delivery(&mut self, envelope: EventEnvelope) {
        self.current_envelope = Some(envelope);
    }

    pub(crate) fn end_delivery(&mut self) {
        self.current_envelope = None;
    }

    /// Framework path: installs state loaded from a store or snapshot.
    pub(crate) fn load_state(&mut self, state: A::State) {
        self.state.apply(state);
    }

    /// Framework path: installs config loaded from a store.
    pub(crate) fn load_config(&mut self, config: A::Config) {
        self.config.apply(config);
    }

    /// Rebuilds event-sourced state from the latest snapshot and the log.
    /// A no-op returning version `0` for agents without an event store.
    pub(crate) async fn replay(&mut self) -> Result<EventVersion, SourcingError> {
        match self.sourced.as_mut() {
            Some(log) => log.replay(self.agent_id, &mut self.state).await,
            None => Ok(EventVersion::default()),
        }
    }

    /// A serialized copy of the current state, for store writes.
    pub(crate) fn state_snapshot(&self) -> A::State {
        self.state.get().clone()
    }
}
