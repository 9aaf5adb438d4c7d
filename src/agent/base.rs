//! The agent core: lifecycle and handler dispatch
//!
//! [`AgentCore`] pairs a user agent with its context and drives its
//! lifecycle: activation (store loads, replay, the `on_activate` hook
//! inside the initialization scope), deactivation, and `handle_event`:
//! decode, handler lookup, self-publish filtering, priority-ordered
//! invocation inside the event-handler scope, and recovery of handler
//! failures into published [`HandlerExceptionEvent`]s. Errors never
//! escape `handle_event`.

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::actor::dedup::DedupCache;
use crate::agent::context::AgentContext;
use crate::agent::exception::HandlerExceptionEvent;
use crate::agent::handler::{HandlerError, handler_table};
use crate::agent::scope::{self, StateScope};
use crate::agent::{Agent, HandlerSet};
use crate::config::RuntimeConfig;
use crate::domain_types::AgentId;
use crate::envelope::{EventDirection, EventEnvelope};
use crate::observability::{
    DropReason, record_event_dropped, record_event_handled, record_handler_exception,
};
use crate::routing::router::EventRouter;
use crate::sourcing::{SourcedLog, SourcingError};
use crate::store::{ConfigStore, StateStore, StoreError};

/// Lifecycle failures raised by activation and deactivation
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("state load failed: {source}")]
    StateLoad { source: StoreError },

    #[error("config load failed: {source}")]
    ConfigLoad { source: StoreError },

    #[error("state save failed: {source}")]
    StateSave { source: StoreError },

    #[error("event replay failed: {source}")]
    Replay {
        #[from]
        source: SourcingError,
    },

    #[error("lifecycle hook failed: {source}")]
    Hook { source: HandlerError },
}

/// Drives one agent instance: lifecycle, dispatch, and state protection
pub struct AgentCore<A: Agent> {
    agent: A,
    ctx: AgentContext<A>,
    state_store: Arc<dyn StateStore<A::State>>,
    config_store: Arc<dyn ConfigStore<A::Config>>,
    dedup: DedupCache,
    activated: bool,
}

impl<A: Agent> std::fmt::Debug for AgentCore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCore")
            .field("agent_id", &self.ctx.agent_id())
            .field("agent_type", &A::agent_type())
            .field("activated", &self.activated)
            .finish()
    }
}

impl<A: Agent> AgentCore<A> {
    /// Assembles a core for `agent` with its stores and (optionally) an
    /// event-sourcing log
    pub fn new(
        agent: A,
        agent_id: AgentId,
        router: Arc<EventRouter>,
        state_store: Arc<dyn StateStore<A::State>>,
        config_store: Arc<dyn ConfigStore<A::Config>>,
        sourced: Option<SourcedLog<A>>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            agent,
            ctx: AgentContext::new(agent_id, router, sourced),
            state_store,
            config_store,
            dedup: DedupCache::from_config(config),
            activated: false,
        }
    }

    /// The agent's identifier
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.ctx.agent_id()
    }

    /// Whether activation has completed
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Read access to the execution context
    #[must_use]
    pub fn context(&self) -> &AgentContext<A> {
        &self.ctx
    }

    /// Read access to the user agent value
    #[must_use]
    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// One-time initialization: loads state and config from the attached
    /// stores, replays the event log when event-sourced, then runs
    /// `on_activate` inside the initialization scope. Idempotent.
    pub async fn activate(&mut self) -> Result<(), ActivationError> {
        if self.activated {
            return Ok(());
        }
        let agent_id = self.ctx.agent_id();

        if let Some(state) = self
            .state_store
            .load(agent_id)
            .await
            .map_err(|source| ActivationError::StateLoad { source })?
        {
            self.ctx.load_state(state);
        }
        if let Some(config) = self
            .config_store
            .load(A::agent_type(), agent_id)
            .await
            .map_err(|source| ActivationError::ConfigLoad { source })?
        {
            self.ctx.load_config(config);
        }

        let replayed = self.ctx.replay().await?;
        if self.ctx.is_event_sourced() {
            debug!(
                agent_id = %agent_id,
                operation = "activate",
                version = %replayed,
                "event log replayed"
            );
        }

        scope::enter(
            StateScope::Initialization,
            self.agent.on_activate(&mut self.ctx),
        )
        .await
        .map_err(|source| ActivationError::Hook { source })?;

        self.activated = true;
        Ok(())
    }

    /// Teardown: runs `on_deactivate`, then persists non-event-sourced
    /// state. A failing hook does not prevent the save.
    pub async fn deactivate(&mut self) -> Result<(), ActivationError> {
        if !self.activated {
            return Ok(());
        }
        self.activated = false;

        let hook_result = self.agent.on_deactivate(&mut self.ctx).await;

        if !self.ctx.is_event_sourced() {
            self.state_store
                .save(self.ctx.agent_id(), self.ctx.state_snapshot())
                .await
                .map_err(|source| ActivationError::StateSave { source })?;
        }

        hook_result.map_err(|source| ActivationError::Hook { source })
    }

    /// Entry point for one delivered envelope.
    ///
    /// Duplicate envelope ids are suppressed. Matching handlers run in
    /// priority order inside the event-handler scope; a failing handler is
    /// recorded, the remaining handlers still run, and each failure is
    /// published upward as a [`HandlerExceptionEvent`]. Nothing escapes.
    #[instrument(
        skip(self, envelope),
        fields(
            agent_id = %self.ctx.agent_id(),
            event_id = %envelope.id(),
            event_type = %envelope.payload().type_tag(),
            correlation_id = %envelope.correlation_id(),
            operation = "handle"
        )
    )]
    pub async fn handle_event(&mut self, envelope: EventEnvelope) {
        let agent_id = self.ctx.agent_id();
        if !self.dedup.observe(envelope.id()) {
            record_event_dropped(DropReason::Duplicate);
            return;
        }

        let started = Instant::now();
        let table = handler_table::<A>();
        let self_published = envelope.publisher_id() == agent_id;
        let mut failures: Vec<(String, HandlerError)> = Vec::new();

        self.ctx.begin_delivery(envelope.clone());
        for entry in table.entries() {
            if !entry.matches(&envelope) {
                continue;
            }
            if self_published && !entry.allows_self_handling() {
                continue;
            }
            let invocation = entry.invoke(&mut self.agent, &mut self.ctx, &envelope);
            match scope::enter(StateScope::EventHandler, invocation).await {
                Ok(()) => {}
                Err(error) => {
                    warn!(
                        agent_id = %agent_id,
                        event_id = %envelope.id(),
                        event_type = %envelope.payload().type_tag(),
                        correlation_id = %envelope.correlation_id(),
                        operation = "handle_event",
                        handler = %entry.name(),
                        error = %error,
                        "handler failed; continuing with remaining handlers"
                    );
                    failures.push((entry.name().as_str().to_string(), error));
                }
            }
        }

        for (handler_name, error) in &failures {
            record_handler_exception();
            let event = HandlerExceptionEvent::from_failure(agent_id, handler_name, error);
            if let Err(publish_error) = self.ctx.publish(&event, EventDirection::Up).await {
                warn!(
                    agent_id = %agent_id,
                    event_id = %envelope.id(),
                    operation = "handle_event",
                    error = %publish_error,
                    "failed to publish handler exception event"
                );
            }
        }
        self.ctx.end_delivery();
        record_event_handled(started.elapsed());
    }

    /// Free-form description of the agent
    #[must_use]
    pub fn describe(&self) -> String {
        self.agent.description()
    }

    /// Async description hook; errors from the hook surface to the caller
    pub async fn describe_async(&self) -> Result<String, HandlerError> {
        self.agent.description_async().await
    }

    /// The handlers declared by this agent type, in dispatch order
    #[must_use]
    pub fn handlers() -> Arc<crate::agent::HandlerTable<A>> {
        handler_table::<A>()
    }

    /// Builds a handler set without caching, for inspection in tools/tests
    #[must_use]
    pub fn declared_handlers() -> HandlerSet<A> {
        let mut set = HandlerSet::new();
        A::configure(&mut set);
        set
    }
}
