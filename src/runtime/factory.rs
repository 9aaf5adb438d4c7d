//! Runtime factory and manager
//!
//! [`AgentRuntime`] assembles the framework (backend, router, hierarchy,
//! stores) and manages actors: spawn attaches the registered stores,
//! wraps the agent in an actor, activates it, and registers it for
//! lookup. When an event store is registered, spawn attaches it too and
//! the agent transparently runs event-sourced. Lookups of unknown ids
//! return `None`, never an error.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::{Any, TypeId};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::actor::cell::{ActorCell, ActorError};
use crate::agent::base::{ActivationError, AgentCore};
use crate::agent::context::PublishError;
use crate::agent::exception::HandlerExceptionEvent;
use crate::agent::handler::HandlerError;
use crate::agent::state::StateModel;
use crate::agent::Agent;
use crate::config::RuntimeConfig;
use crate::domain_types::{AgentId, EventId};
use crate::envelope::{EventDirection, EventEnvelope};
use crate::routing::hierarchy::HierarchyStore;
use crate::routing::router::EventRouter;
use crate::runtime::backend::{InProcessBackend, RuntimeBackend};
use crate::serialization::{CodecError, DomainEvent, EventPayload, EventTypeRegistry};
use crate::sourcing::SourcedLog;
use crate::store::{ConfigStore, EventStore, InMemoryConfigStore, InMemoryStateStore, StateStore};
use crate::streams::stream::SinkError;

/// Spawn failures
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("agent {agent_id} is already registered")]
    AlreadyRegistered { agent_id: AgentId },

    #[error("actor setup failed: {source}")]
    Actor {
        #[from]
        source: ActorError,
    },

    #[error("event type registration failed: {source}")]
    Codec {
        #[from]
        source: CodecError,
    },
}

/// Hierarchy wiring failures
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("agent not registered: {agent_id}")]
    NotRegistered { agent_id: AgentId },

    #[error(transparent)]
    Actor(#[from] ActorError),
}

#[async_trait]
trait ErasedActor: Send + Sync {
    fn agent_id(&self) -> AgentId;
    fn is_active(&self) -> bool;
    async fn deliver(&self, envelope: EventEnvelope) -> Result<(), SinkError>;
    async fn publish_payload(
        &self,
        payload: EventPayload,
        direction: EventDirection,
    ) -> Result<EventId, PublishError>;
    async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<EventId, PublishError>;
    async fn set_parent(&self, parent: AgentId) -> Result<(), ActorError>;
    fn clear_parent(&self);
    fn add_child(&self, child: AgentId) -> Result<bool, ActorError>;
    fn remove_child(&self, child: AgentId) -> bool;
    fn parent(&self) -> Option<AgentId>;
    fn children(&self) -> Vec<AgentId>;
    async fn deactivate(&self) -> Result<(), ActivationError>;
    async fn describe(&self) -> String;
    async fn describe_async(&self) -> Result<String, HandlerError>;
}

#[async_trait]
impl<A: Agent> ErasedActor for ActorCell<A> {
    fn agent_id(&self) -> AgentId {
        ActorCell::agent_id(self)
    }

    fn is_active(&self) -> bool {
        ActorCell::is_active(self)
    }

    async fn deliver(&self, envelope: EventEnvelope) -> Result<(), SinkError> {
        ActorCell::deliver(self, envelope).await
    }

    async fn publish_payload(
        &self,
        payload: EventPayload,
        direction: EventDirection,
    ) -> Result<EventId, PublishError> {
        ActorCell::publish_payload(self, payload, direction).await
    }

    async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<EventId, PublishError> {
        ActorCell::publish_envelope(self, envelope).await
    }

    async fn set_parent(&self, parent: AgentId) -> Result<(), ActorError> {
        ActorCell::set_parent(self, parent).await
    }

    fn clear_parent(&self) {
        ActorCell::clear_parent(self);
    }

    fn add_child(&self, child: AgentId) -> Result<bool, ActorError> {
        ActorCell::add_child(self, child)
    }

    fn remove_child(&self, child: AgentId) -> bool {
        ActorCell::remove_child(self, child)
    }

    fn parent(&self) -> Option<AgentId> {
        ActorCell::parent(self)
    }

    fn children(&self) -> Vec<AgentId> {
        ActorCell::children(self)
    }

    async fn deactivate(&self) -> Result<(), ActivationError> {
        ActorCell::deactivate(self).await
    }

    async fn describe(&self) -> String {
        ActorCell::describe(self).await
    }

    async fn describe_async(&self) -> Result<String, HandlerError> {
        ActorCell::describe_async(self).await
    }
}

/// Type-erased handle onto a spawned actor
#[derive(Clone)]
pub struct AgentRef {
    inner: Arc<dyn ErasedActor>,
}

impl std::fmt::Debug for AgentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRef")
            .field("agent_id", &self.inner.agent_id())
            .finish()
    }
}

impl AgentRef {
    /// The actor's agent id
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.inner.agent_id()
    }

    /// Whether the actor is activated
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Publishes a typed event from this actor
    pub async fn publish<E: DomainEvent>(
        &self,
        event: &E,
        direction: EventDirection,
    ) -> Result<EventId, PublishError> {
        let payload = EventPayload::encode(event)?;
        self.inner.publish_payload(payload, direction).await
    }

    /// Publishes a pre-encoded payload from this actor
    pub async fn publish_payload(
        &self,
        payload: EventPayload,
        direction: EventDirection,
    ) -> Result<EventId, PublishError> {
        self.inner.publish_payload(payload, direction).await
    }

    /// Routes a caller-built envelope from this actor. Build it with
    /// [`EventEnvelope::builder`] using this actor's id as the publisher.
    pub async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<EventId, PublishError> {
        self.inner.publish_envelope(envelope).await
    }

    /// Lands an envelope on this actor's mailbox directly
    pub async fn deliver(&self, envelope: EventEnvelope) -> Result<(), SinkError> {
        self.inner.deliver(envelope).await
    }

    /// Records the parent and subscribes to its stream
    pub async fn set_parent(&self, parent: AgentId) -> Result<(), ActorError> {
        self.inner.set_parent(parent).await
    }

    /// Unsubscribes from the parent's stream and forgets it
    pub fn clear_parent(&self) {
        self.inner.clear_parent();
    }

    /// Adds a child; duplicates are a no-op (`false`)
    pub fn add_child(&self, child: AgentId) -> Result<bool, ActorError> {
        self.inner.add_child(child)
    }

    /// Removes a child; absent children are a no-op (`false`)
    pub fn remove_child(&self, child: AgentId) -> bool {
        self.inner.remove_child(child)
    }

    /// The current parent, if any
    #[must_use]
    pub fn parent(&self) -> Option<AgentId> {
        self.inner.parent()
    }

    /// The current children, in insertion order
    #[must_use]
    pub fn children(&self) -> Vec<AgentId> {
        self.inner.children()
    }

    /// The agent's description
    pub async fn describe(&self) -> String {
        self.inner.describe().await
    }

    /// The agent's async description; hook errors surface to the caller
    pub async fn describe_async(&self) -> Result<String, HandlerError> {
        self.inner.describe_async().await
    }
}

/// Typed store registrations, defaulting to in-memory implementations
#[derive(Default)]
pub struct StoreRegistry {
    state_stores: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    config_stores: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("state_stores", &self.state_stores.len())
            .field("config_stores", &self.config_stores.len())
            .finish()
    }
}

impl StoreRegistry {
    fn register_state_store<S: StateModel>(&self, store: Arc<dyn StateStore<S>>) {
        self.state_stores.insert(TypeId::of::<S>(), Box::new(store));
    }

    fn register_config_store<C: StateModel>(&self, store: Arc<dyn ConfigStore<C>>) {
        self.config_stores.insert(TypeId::of::<C>(), Box::new(store));
    }

    fn state_store<S: StateModel>(&self) -> Arc<dyn StateStore<S>> {
        self.state_stores
            .entry(TypeId::of::<S>())
            .or_insert_with(|| {
                Box::new(Arc::new(InMemoryStateStore::<S>::new()) as Arc<dyn StateStore<S>>)
            })
            .downcast_ref::<Arc<dyn StateStore<S>>>()
            .expect("state store registered under the wrong type id")
            .clone()
    }

    fn config_store<C: StateModel>(&self) -> Arc<dyn ConfigStore<C>> {
        self.config_stores
            .entry(TypeId::of::<C>())
            .or_insert_with(|| {
                Box::new(Arc::new(InMemoryConfigStore::<C>::new()) as Arc<dyn ConfigStore<C>>)
            })
            .downcast_ref::<Arc<dyn ConfigStore<C>>>()
            .expect("config store registered under the wrong type id")
            .clone()
    }
}

struct RuntimeShared {
    config: RuntimeConfig,
    backend: Arc<dyn RuntimeBackend>,
    hierarchy: Arc<HierarchyStore>,
    router: Arc<EventRouter>,
    actors: DashMap<AgentId, Arc<dyn ErasedActor>>,
    stores: StoreRegistry,
    event_store: Option<Arc<dyn EventStore>>,
    event_types: Arc<EventTypeRegistry>,
}

/// Builder for [`AgentRuntime`]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    stores: StoreRegistry,
    event_store: Option<Arc<dyn EventStore>>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Starts from the development configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::development(),
            stores: StoreRegistry::default(),
            event_store: None,
        }
    }

    /// Replaces the runtime configuration
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the global event store. Every subsequently spawned agent
    /// runs event-sourced against it.
    #[must_use]
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Registers a state store for state type `S`
    #[must_use]
    pub fn with_state_store<S: StateModel>(self, store: Arc<dyn StateStore<S>>) -> Self {
        self.stores.register_state_store(store);
        self
    }

    /// Registers a config store for config type `C`
    #[must_use]
    pub fn with_config_store<C: StateModel>(self, store: Arc<dyn ConfigStore<C>>) -> Self {
        self.stores.register_config_store(store);
        self
    }

    /// Assembles the runtime over the in-process backend
    #[must_use]
    pub fn build(self) -> AgentRuntime {
        let backend: Arc<dyn RuntimeBackend> = Arc::new(InProcessBackend::new(&self.config));
        let hierarchy = Arc::new(HierarchyStore::new());
        let router = Arc::new(EventRouter::new(backend.streams(), Arc::clone(&hierarchy)));
        let event_types = Arc::new(EventTypeRegistry::new());
        let _ = event_types.register::<HandlerExceptionEvent>();

        AgentRuntime {
            inner: Arc::new(RuntimeShared {
                config: self.config,
                backend,
                hierarchy,
                router,
                actors: DashMap::new(),
                stores: self.stores,
                event_store: self.event_store,
                event_types,
            }),
        }
    }
}

/// Factory and manager for actors sharing one runtime
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeShared>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("actors", &self.inner.actors.len())
            .field("event_sourced", &self.inner.event_store.is_some())
            .finish()
    }
}

impl AgentRuntime {
    /// Creates a runtime with the given configuration and defaults
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Starts a runtime builder
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Spawns an agent constructed with [`Default`]
    pub async fn spawn_agent<A: Agent + Default>(
        &self,
        agent_id: AgentId,
    ) -> Result<AgentRef, SpawnError> {
        self.spawn_agent_with(agent_id, A::default()).await
    }

    /// Spawns the given agent instance: attaches stores, wraps it into an
    /// actor, activates it, and registers it for lookup
    pub async fn spawn_agent_with<A: Agent>(
        &self,
        agent_id: AgentId,
        agent: A,
    ) -> Result<AgentRef, SpawnError> {
        if self.inner.actors.contains_key(&agent_id) {
            return Err(SpawnError::AlreadyRegistered { agent_id });
        }

        self.inner.event_types.register::<A::StateEvent>()?;
        let sourced = self.inner.event_store.as_ref().map(|store| {
            SourcedLog::<A>::new(Arc::clone(store), self.inner.config.snapshot_every)
        });

        let core = AgentCore::new(
            agent,
            agent_id,
            Arc::clone(&self.inner.router),
            self.inner.stores.state_store::<A::State>(),
            self.inner.stores.config_store::<A::Config>(),
            sourced,
            &self.inner.config,
        );
        let cell = ActorCell::new(
            core,
            Arc::clone(&self.inner.router),
            Arc::clone(&self.inner.hierarchy),
            self.inner.backend.streams(),
            self.inner.backend.subscriptions(),
            &self.inner.config,
        );
        cell.activate().await?;
        let erased: Arc<dyn ErasedActor> = Arc::new(cell);

        let mut lost_race: Option<Arc<dyn ErasedActor>> = None;
        let result = match self.inner.actors.entry(agent_id) {
            Entry::Occupied(_) => {
                lost_race = Some(Arc::clone(&erased));
                Err(SpawnError::AlreadyRegistered { agent_id })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&erased));
                Ok(AgentRef { inner: erased })
            }
        };
        if let Some(actor) = lost_race {
            let _ = actor.deactivate().await;
        }
        if result.is_ok() {
            debug!(agent_id = %agent_id, agent_type = A::agent_type(), operation = "spawn", "agent spawned");
        }
        result
    }

    /// Spawns an agent and links it under `parent` in one call
    pub async fn spawn_child<A: Agent + Default>(
        &self,
        agent_id: AgentId,
        parent: AgentId,
    ) -> Result<AgentRef, SpawnError> {
        let child = self.spawn_agent::<A>(agent_id).await?;
        if let Some(parent_ref) = self.actor(parent) {
            parent_ref.add_child(agent_id)?;
        }
        child.set_parent(parent).await?;
        Ok(child)
    }

    /// Looks up a spawned actor; unknown ids are `None`, never an error
    #[must_use]
    pub fn actor(&self, agent_id: AgentId) -> Option<AgentRef> {
        self.inner.actors.get(&agent_id).map(|entry| AgentRef {
            inner: Arc::clone(entry.value()),
        })
    }

    /// Wires `child` under `parent`: adds the child link and subscribes the
    /// child to the parent's stream
    pub async fn link(&self, parent: AgentId, child: AgentId) -> Result<(), LinkError> {
        let parent_ref = self
            .actor(parent)
            .ok_or(LinkError::NotRegistered { agent_id: parent })?;
        let child_ref = self
            .actor(child)
            .ok_or(LinkError::NotRegistered { agent_id: child })?;
        parent_ref.add_child(child)?;
        child_ref.set_parent(parent).await?;
        Ok(())
    }

    /// Deactivates and deregisters an actor, detaching it from the
    /// hierarchy. Returns whether the actor existed.
    pub async fn despawn_agent(&self, agent_id: AgentId) -> Result<bool, ActivationError> {
        let Some((_, actor)) = self.inner.actors.remove(&agent_id) else {
            return Ok(false);
        };
        let result = actor.deactivate().await;
        self.inner.hierarchy.detach(agent_id);
        debug!(agent_id = %agent_id, operation = "despawn", "agent despawned");
        result.map(|()| true)
    }

    /// Deactivates and deregisters every actor
    pub async fn shutdown(&self) {
        let ids: Vec<AgentId> = self.inner.actors.iter().map(|e| *e.key()).collect();
        for agent_id in ids {
            let _ = self.despawn_agent(agent_id).await;
        }
    }

    /// Number of registered actors
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.inner.actors.len()
    }

    /// The runtime's event type registry
    #[must_use]
    pub fn event_types(&self) -> &EventTypeRegistry {
        &self.inner.event_types
    }

    /// The runtime configuration
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether agents spawn in event-sourced mode
    #[must_use]
    pub fn is_event_sourced(&self) -> bool {
        self.inner.event_store.is_some()
    }
}
