//! Agent base machinery
//!
//! An [`Agent`] is the user-facing unit of business logic: a state record,
//! a config record, a set of event handlers, and lifecycle hooks. The
//! framework drives it through [`AgentCore`], which owns dispatch,
//! deduplication, state protection, and exception recovery.

pub mod base;
pub mod context;
pub mod exception;
pub mod handler;
pub mod scope;
pub mod state;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use base::{ActivationError, AgentCore};
pub use context::{AgentContext, PublishError};
pub use exception::HandlerExceptionEvent;
pub use handler::{
    HandlerError, HandlerFuture, HandlerKind, HandlerResult, HandlerSet, HandlerTable,
    handler_table,
};
pub use scope::StateScope;
pub use state::{Guarded, StateAccessError, StateModel};

use crate::serialization::DomainEvent;

/// Placeholder state event for agents that are not event-sourced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullStateEvent;

impl DomainEvent for NullStateEvent {
    fn event_type() -> &'static str {
        "arbor.null_state_event"
    }
}

/// A user-defined agent: state, config, handlers, and lifecycle hooks.
///
/// Handlers are declared in [`Agent::configure`]; the framework builds and
/// caches the dispatch table once per concrete type. Agents that are
/// event-sourced implement [`Agent::transition_state`] as a pure function;
/// it is the only way their state changes.
#[async_trait]
pub trait Agent: Sized + Send + Sync + 'static {
    /// The agent's state record
    type State: StateModel;
    /// The agent's configuration record
    type Config: StateModel;
    /// The event type this agent's state log stores; [`NullStateEvent`]
    /// when the agent is not event-sourced
    type StateEvent: DomainEvent;

    /// Stable name of this agent type, used to key config records
    #[must_use]
    fn agent_type() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Declares the agent's event handlers
    fn configure(_handlers: &mut HandlerSet<Self>) {}

    /// Free-form description; defaults to the concrete type name
    #[must_use]
    fn description(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Async description hook. May legitimately fail; the caller receives
    /// the raised error.
    async fn description_async(&self) -> Result<String, HandlerError> {
        Ok(self.description())
    }

    /// One-time initialization hook, run inside the initialization scope
    async fn on_activate(&mut self, _ctx: &mut AgentContext<Self>) -> HandlerResult {
        Ok(())
    }

    /// Teardown hook, run before resources are released
    async fn on_deactivate(&mut self, _ctx: &mut AgentContext<Self>) -> HandlerResult {
        Ok(())
    }

    /// Pure state transition for event-sourced agents.
    ///
    /// Must be deterministic and side-effect-free; replay correctness
    /// depends on it.
    #[must_use]
    fn transition_state(state: Self::State, _event: &Self::StateEvent) -> Self::State {
        state
    }
}
