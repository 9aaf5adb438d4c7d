//! # Arbor - Hierarchical Event-Driven Agent Framework
//!
//! Arbor is a framework for building systems out of **agents**: autonomous,
//! stateful units that communicate exclusively by publishing and handling
//! typed events. Agents form a directed hierarchy, and events propagate
//! along its edges under explicit direction semantics (down to children, up
//! to the parent and siblings, or both), guarded against loops and bounded
//! by hop counts.
//!
//! The crate splits into an Agent layer (business logic: handlers, state
//! protection, event-sourced state) and an Actor layer (execution:
//! mailboxes, streams, subscriptions, hierarchy wiring), so the same agent
//! code runs unchanged on any backend implementing the runtime seam.
//!
//! ```rust,no_run
//! use arbor::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Greeting { text: String }
//!
//! impl DomainEvent for Greeting {
//!     fn event_type() -> &'static str { "demo.greeting" }
//! }
//!
//! #[derive(Debug, Default)]
//! struct Greeter;
//!
//! fn on_greeting<'a>(
//!     _agent: &'a mut Greeter,
//!     event: Greeting,
//!     _ctx: &'a mut AgentContext<Greeter>,
//! ) -> HandlerFuture<'a> {
//!     Box::pin(async move {
//!         println!("received: {}", event.text);
//!         Ok(())
//!     })
//! }
//!
//! impl Agent for Greeter {
//!     type State = ();
//!     type Config = ();
//!     type StateEvent = NullStateEvent;
//!
//!     fn configure(handlers: &mut HandlerSet<Self>) {
//!         handlers.handles::<Greeting>("on_greeting", on_greeting);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = AgentRuntime::new(RuntimeConfig::development());
//!     let parent = runtime.spawn_agent::<Greeter>(AgentId::generate()).await?;
//!     let child = runtime.spawn_child::<Greeter>(AgentId::generate(), parent.agent_id()).await?;
//!
//!     parent
//!         .publish(&Greeting { text: "hello".into() }, EventDirection::Down)
//!         .await?;
//!     # let _ = child;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod actor;
pub mod agent;
pub mod config;
pub mod domain_types;
pub mod envelope;
pub mod error;
pub mod observability;
pub mod routing;
pub mod runtime;
pub mod serialization;
pub mod sourcing;
pub mod store;
pub mod streams;

// Re-export the public surface
pub use crate::actor::{ActorCell, ActorError, DedupCache};
pub use crate::agent::{
    ActivationError, Agent, AgentContext, AgentCore, Guarded, HandlerError, HandlerExceptionEvent,
    HandlerFuture, HandlerKind, HandlerResult, HandlerSet, HandlerTable, NullStateEvent,
    PublishError, StateAccessError, StateModel, StateScope, handler_table,
};
pub use crate::config::{ConfigError, OverflowPolicy, RuntimeConfig, RuntimeConfigBuilder};
pub use crate::domain_types::{
    AgentId, ChannelCapacity, CorrelationId, DedupCapacity, DedupTtlMs, EventId, EventTypeTag,
    EventVersion, HandlerName, HandlerPriority, HopCount, IdleWindowMs, MaxSubscribeAttempts,
    ProduceTimeoutMs, RetryBackoffFactor, RetryBaseDelayMs, SnapshotEvery, StreamId,
    SubscriptionId,
};
pub use crate::envelope::{EventDirection, EventEnvelope, EventEnvelopeBuilder};
pub use crate::error::ArborError;
pub use crate::routing::{EventRouter, HierarchyError, HierarchyStore, RouteReport};
pub use crate::runtime::{
    AgentRef, AgentRuntime, InProcessBackend, LinkError, RuntimeBackend, RuntimeBuilder,
    SpawnError,
};
pub use crate::serialization::{CodecError, DomainEvent, EventPayload, EventTypeRegistry};
pub use crate::sourcing::{SourcedLog, SourcingError};
pub use crate::store::{
    ConfigStore, EventQuery, EventStore, EventStoreError, InMemoryConfigStore, InMemoryEventStore,
    InMemoryStateStore, StateLogEvent, StateSnapshot, StateStore, StoreError,
};
pub use crate::streams::{
    EventSink, EventStream, FnSink, SinkError, StreamError, StreamRegistry, StreamSubscription,
    SubscriptionError, SubscriptionHandle, SubscriptionManager, SubscriptionPolicy,
    SubscriptionState,
};
