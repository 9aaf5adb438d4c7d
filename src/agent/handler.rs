//! Handler declaration, discovery, and the per-type dispatch table
//!
//! Agents declare handlers in [`crate::agent::Agent::configure`], the Rust
//! analogue of attribute-based discovery. The built table is sorted by
//! priority (ties keep declaration order) and cached process-wide per
//! concrete agent type; repeated lookups return the identical `Arc`.
//!
//! Three declaration forms exist:
//!
//! - [`HandlerSet::handles`]: a *specific* handler for one payload type,
//!   default priority `0`, no self-handling;
//! - [`HandlerSet::handles_envelope`]: an *all-event* handler receiving
//!   the whole envelope, default priority `i32::MAX`;
//! - a bare `handles` call with no option tweaks is the convention form.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::agent::Agent;
use crate::agent::context::{AgentContext, PublishError};
use crate::agent::state::StateAccessError;
use crate::domain_types::{EventTypeTag, HandlerName, HandlerPriority};
use crate::envelope::EventEnvelope;
use crate::serialization::{CodecError, DomainEvent, validated_tag};
use crate::sourcing::SourcingError;

/// Result of one handler invocation
pub type HandlerResult = Result<(), HandlerError>;

/// Boxed future returned by handler functions
pub type HandlerFuture<'a> = BoxFuture<'a, HandlerResult>;

/// Signature of a specific handler: the agent, the decoded event, and the
/// agent's context, borrowed for the duration of the invocation
pub type SpecificHandlerFn<A, E> =
    for<'a> fn(&'a mut A, E, &'a mut AgentContext<A>) -> HandlerFuture<'a>;

/// Signature of an all-event handler, which receives the envelope itself
pub type EnvelopeHandlerFn<A> =
    for<'a> fn(&'a mut A, EventEnvelope, &'a mut AgentContext<A>) -> HandlerFuture<'a>;

/// A failure inside (or on the way into) a user handler.
///
/// Handler failures are recovered by the dispatch loop and re-published as
/// [`crate::agent::HandlerExceptionEvent`]s; they never propagate to the
/// publisher.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{message}")]
    Failed { message: String },

    #[error("payload decode failed: {source}")]
    Decode {
        #[from]
        source: CodecError,
    },

    #[error("state access violation: {source}")]
    State {
        #[from]
        source: StateAccessError,
    },

    #[error("publish failed: {source}")]
    Publish {
        #[from]
        source: PublishError,
    },

    #[error("event sourcing failed: {source}")]
    Sourcing {
        #[from]
        source: SourcingError,
    },
}

impl HandlerError {
    /// Creates a failure from any displayable message
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Stable label of the failure kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Decode { .. } => "decode",
            Self::State { .. } => "state_access",
            Self::Publish { .. } => "publish",
            Self::Sourcing { .. } => "sourcing",
        }
    }
}

/// What a handler listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// Exactly one payload type, matched by tag
    Specific {
        /// The payload tag this handler accepts
        type_tag: EventTypeTag,
    },
    /// Every envelope, regardless of payload type
    AllEvents,
}

trait ErasedInvoker<A: Agent>: Send + Sync {
    fn invoke<'a>(
        &self,
        agent: &'a mut A,
        ctx: &'a mut AgentContext<A>,
        envelope: &'a EventEnvelope,
    ) -> HandlerFuture<'a>;
}

struct SpecificInvoker<A: Agent, E: DomainEvent> {
    f: SpecificHandlerFn<A, E>,
    _marker: PhantomData<fn(E)>,
}

impl<A: Agent, E: DomainEvent> ErasedInvoker<A> for SpecificInvoker<A, E> {
    fn invoke<'a>(
        &self,
        agent: &'a mut A,
        ctx: &'a mut AgentContext<A>,
        envelope: &'a EventEnvelope,
    ) -> HandlerFuture<'a> {
        match envelope.payload().decode::<E>() {
            Ok(event) => (self.f)(agent, event, ctx),
            Err(err) => Box::pin(async move { Err(HandlerError::from(err)) }),
        }
    }
}

struct EnvelopeInvoker<A: Agent> {
    f: EnvelopeHandlerFn<A>,
}

impl<A: Agent> ErasedInvoker<A> for EnvelopeInvoker<A> {
    fn invoke<'a>(
        &self,
        agent: &'a mut A,
        ctx: &'a mut AgentContext<A>,
        envelope: &'a EventEnvelope,
    ) -> HandlerFuture<'a> {
        (self.f)(agent, envelope.clone(), ctx)
    }
}

/// One declared handler with its dispatch options
pub struct HandlerEntry<A: Agent> {
    name: HandlerName,
    kind: HandlerKind,
    priority: HandlerPriority,
    allow_self_handling: bool,
    declaration_index: usize,
    invoker: Arc<dyn ErasedInvoker<A>>,
}

impl<A: Agent> std::fmt::Debug for HandlerEntry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("allow_self_handling", &self.allow_self_handling)
            .finish()
    }
}

impl<A: Agent> HandlerEntry<A> {
    /// Sets the dispatch priority; lower runs first
    pub fn priority(&mut self, priority: i32) -> &mut Self {
        self.priority = HandlerPriority::new(priority);
        self
    }

    /// Opts this handler into receiving the agent's own publishes
    pub fn allow_self_handling(&mut self, allow: bool) -> &mut Self {
        self.allow_self_handling = allow;
        self
    }

    /// The handler's name
    #[must_use]
    pub fn name(&self) -> &HandlerName {
        &self.name
    }

    /// What this handler listens to
    #[must_use]
    pub fn kind(&self) -> &HandlerKind {
        &self.kind
    }

    /// The handler's priority
    #[must_use]
    pub fn handler_priority(&self) -> HandlerPriority {
        self.priority
    }

    /// Whether the handler receives self-published envelopes
    #[must_use]
    pub fn allows_self_handling(&self) -> bool {
        self.allow_self_handling
    }

    /// Whether this handler accepts the given envelope's payload
    #[must_use]
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        match &self.kind {
            HandlerKind::Specific { type_tag } => type_tag == envelope.payload().type_tag(),
            HandlerKind::AllEvents => true,
        }
    }

    pub(crate) fn invoke<'a>(
        &self,
        agent: &'a mut A,
        ctx: &'a mut AgentContext<A>,
        envelope: &'a EventEnvelope,
    ) -> HandlerFuture<'a> {
        self.invoker.invoke(agent, ctx, envelope)
    }
}

/// Mutable collection of handler declarations for one agent type
pub struct HandlerSet<A: Agent> {
    entries: Vec<HandlerEntry<A>>,
}

impl<A: Agent> Default for HandlerSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Agent> HandlerSet<A> {
    /// Creates an empty set
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Declares a specific handler for payload type `E`.
    ///
    /// Defaults: priority `0`, self-handling off. Chain
    /// [`HandlerEntry::priority`] / [`HandlerEntry::allow_self_handling`]
    /// to override.
    ///
    /// # Panics
    /// Panics when `name` is empty or longer than 256 characters, or when
    /// `E`'s event type tag is invalid; both are programming errors in the
    /// agent declaration.
    pub fn handles<E: DomainEvent>(
        &mut self,
        name: &str,
        f: SpecificHandlerFn<A, E>,
    ) -> &mut HandlerEntry<A> {
        let type_tag =
            validated_tag(E::event_type()).expect("event type tag must be 1..=512 chars");
        self.push(HandlerEntry {
            name: Self::handler_name(name),
            kind: HandlerKind::Specific { type_tag },
            priority: HandlerPriority::default(),
            allow_self_handling: false,
            declaration_index: self.entries.len(),
            invoker: Arc::new(SpecificInvoker {
                f,
                _marker: PhantomData,
            }),
        })
    }

    /// Declares an all-event handler receiving the envelope itself.
    ///
    /// Defaults: priority `i32::MAX` (runs last), self-handling off.
    ///
    /// # Panics
    /// Panics when `name` is empty or longer than 256 characters.
    pub fn handles_envelope(&mut self, name: &str, f: EnvelopeHandlerFn<A>) -> &mut HandlerEntry<A> {
        self.push(HandlerEntry {
            name: Self::handler_name(name),
            kind: HandlerKind::AllEvents,
            priority: HandlerPriority::lowest(),
            allow_self_handling: false,
            declaration_index: self.entries.len(),
            invoker: Arc::new(EnvelopeInvoker { f }),
        })
    }

    /// Number of declared handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handlers are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn build(mut self) -> HandlerTable<A> {
        // Stable sort: equal priorities keep declaration order.
        self.entries
            .sort_by_key(|entry| (entry.priority, entry.declaration_index));
        HandlerTable {
            entries: self.entries,
        }
    }

    fn push(&mut self, entry: HandlerEntry<A>) -> &mut HandlerEntry<A> {
        self.entries.push(entry);
        self.entries.last_mut().expect("entry was just pushed")
    }

    fn handler_name(name: &str) -> HandlerName {
        HandlerName::try_new(name.to_string()).expect("handler name must be 1..=256 chars")
    }
}

/// Immutable, priority-ordered dispatch table for one agent type
pub struct HandlerTable<A: Agent> {
    entries: Vec<HandlerEntry<A>>,
}

impl<A: Agent> std::fmt::Debug for HandlerTable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("entries", &self.entries)
            .finish()
    }
}

impl<A: Agent> HandlerTable<A> {
    /// Handlers in dispatch order
    #[must_use]
    pub fn entries(&self) -> &[HandlerEntry<A>] {
        &self.entries
    }

    /// Number of handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static HANDLER_TABLES: OnceLock<DashMap<TypeId, Arc<dyn Any + Send + Sync>>> = OnceLock::new();

/// The cached dispatch table for agent type `A`, built on first use.
///
/// Repeated calls return the identical `Arc`, so dispatch never rebuilds or
/// re-sorts the table.
#[must_use]
pub fn handler_table<A: Agent>() -> Arc<HandlerTable<A>> {
    let tables = HANDLER_TABLES.get_or_init(DashMap::new);
    let entry = tables.entry(TypeId::of::<A>()).or_insert_with(|| {
        let mut set = HandlerSet::new();
        A::configure(&mut set);
        let table: Arc<HandlerTable<A>> = Arc::new(set.build());
        table as Arc<dyn Any + Send + Sync>
    });
    Arc::clone(entry.value())
        .downcast::<HandlerTable<A>>()
        .expect("handler table registered under the wrong type id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::NullStateEvent;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tick;

    impl DomainEvent for Tick {
        fn event_type() -> &'static str {
            "test.tick"
        }
    }

    #[derive(Debug, Default)]
    struct Probe;

    fn noop<'a>(
        _agent: &'a mut Probe,
        _event: Tick,
        _ctx: &'a mut AgentContext<Probe>,
    ) -> HandlerFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn noop_envelope<'a>(
        _agent: &'a mut Probe,
        _envelope: EventEnvelope,
        _ctx: &'a mut AgentContext<Probe>,
    ) -> HandlerFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    impl Agent for Probe {
        type State = ();
        type Config = ();
        type StateEvent = NullStateEvent;

        fn configure(handlers: &mut HandlerSet<Self>) {
            handlers.handles::<Tick>("late", noop).priority(10);
            handlers.handles::<Tick>("early", noop).priority(-5);
            handlers.handles::<Tick>("tie_a", noop).priority(3);
            handlers.handles::<Tick>("tie_b", noop).priority(3);
            handlers.handles_envelope("catch_all", noop_envelope);
        }
    }

    #[test]
    fn table_is_sorted_by_priority_with_declaration_ties() {
        let table = handler_table::<Probe>();
        let names: Vec<&str> = table.entries().iter().map(|e| e.name().as_str()).collect();
        assert_eq!(names, vec!["early", "tie_a", "tie_b", "late", "catch_all"]);
    }

    #[test]
    fn all_event_handlers_default_to_lowest_priority() {
        let table = handler_table::<Probe>();
        let catch_all = table
            .entries()
            .iter()
            .find(|e| e.kind() == &HandlerKind::AllEvents)
            .unwrap();
        assert_eq!(catch_all.handler_priority(), HandlerPriority::lowest());
        assert!(!catch_all.allows_self_handling());
    }

    #[test]
    fn repeated_lookups_return_the_same_table() {
        let a = handler_table::<Probe>();
        let b = handler_table::<Probe>();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn specific_entries_match_on_payload_tag() {
        use crate::domain_types::AgentId;
        use crate::serialization::EventPayload;

        let table = handler_table::<Probe>();
        let tick = EventEnvelope::builder(
            AgentId::generate(),
            EventPayload::encode(&Tick).unwrap(),
        )
        .build();
        let specific = &table.entries()[0];
        let catch_all = table.entries().last().unwrap();
        assert!(specific.matches(&tick));
        assert!(catch_all.matches(&tick));
    }
}
