//! Actor shell around an agent core
//!
//! The cell owns what the agent itself must not know about: the mailbox
//! (one worker drains it, so each actor is single-flight and per-actor
//! FIFO while distinct actors run in parallel), the receive-side
//! deduplication cache, the hierarchy links, and the stream subscriptions
//! tied to the actor's lifecycle.

use async_trait::async_trait;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::actor::dedup::DedupCache;
use crate::agent::base::{ActivationError, AgentCore};
use crate::agent::context::PublishError;
use crate::agent::handler::HandlerError;
use crate::agent::Agent;
use crate::config::RuntimeConfig;
use crate::domain_types::{AgentId, EventId, StreamId};
use crate::envelope::{EventDirection, EventEnvelope};
use crate::observability::{
    DropReason, record_actor_activated, record_actor_deactivated, record_event_dropped,
};
use crate::routing::hierarchy::{HierarchyError, HierarchyStore};
use crate::routing::router::EventRouter;
use crate::serialization::{DomainEvent, EventPayload};
use crate::streams::registry::StreamRegistry;
use crate::streams::stream::{EventSink, SinkError};
use crate::streams::subscription::{SubscriptionError, SubscriptionHandle, SubscriptionManager};

/// Failures of actor-level operations
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("hierarchy violation: {source}")]
    Hierarchy {
        #[from]
        source: HierarchyError,
    },

    #[error("subscription failed: {source}")]
    Subscription {
        #[from]
        source: SubscriptionError,
    },

    #[error("agent activation failed: {source}")]
    Activation {
        #[from]
        source: ActivationError,
    },
}

/// Sink that lands envelopes on an actor's mailbox
pub struct MailboxSink {
    tx: mpsc::Sender<EventEnvelope>,
}

#[async_trait]
impl EventSink for MailboxSink {
    async fn deliver(&self, envelope: EventEnvelope) -> Result<(), SinkError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| SinkError::new("actor mailbox is closed"))
    }
}

struct ActorInner<A: Agent> {
    id: AgentId,
    core: Mutex<AgentCore<A>>,
    router: Arc<EventRouter>,
    mailbox_tx: mpsc::Sender<EventEnvelope>,
    mailbox_rx: StdMutex<Option<mpsc::Receiver<EventEnvelope>>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    dedup: DedupCache,
    hierarchy: Arc<HierarchyStore>,
    streams: Arc<StreamRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    own_subscription: StdMutex<Option<SubscriptionHandle>>,
    parent_subscription: StdMutex<Option<SubscriptionHandle>>,
    active: AtomicBool,
}

/// Runtime wrapper owning one agent, its hierarchy links, and its streams
pub struct ActorCell<A: Agent> {
    inner: Arc<ActorInner<A>>,
}

impl<A: Agent> Clone for ActorCell<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Agent> std::fmt::Debug for ActorCell<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorCell")
            .field("id", &self.inner.id)
            .field("agent_type", &A::agent_type())
            .field("active", &self.is_active())
            .finish()
    }
}

impl<A: Agent> ActorCell<A> {
    /// Wraps an agent core into an actor
    #[must_use]
    pub fn new(
        core: AgentCore<A>,
        router: Arc<EventRouter>,
        hierarchy: Arc<HierarchyStore>,
        streams: Arc<StreamRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        config: &RuntimeConfig,
    ) -> Self {
        let id = core.agent_id();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.as_usize());
        Self {
            inner: Arc::new(ActorInner {
                id,
                core: Mutex::new(core),
                router,
                mailbox_tx,
                mailbox_rx: StdMutex::new(Some(mailbox_rx)),
                worker: StdMutex::new(None),
                dedup: DedupCache::from_config(config),
                hierarchy,
                streams,
                subscriptions,
                own_subscription: StdMutex::new(None),
                parent_subscription: StdMutex::new(None),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// The owned agent's identifier
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.inner.id
    }

    /// Whether the actor is activated
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Activates the actor: wires the own-stream subscription, starts the
    /// mailbox worker, and runs the agent's activation. Idempotent.
    pub async fn activate(&self) -> Result<(), ActorError> {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let own_stream = StreamId::for_agent(self.inner.id);
        let _ = self.inner.streams.get_or_create(own_stream);
        let subscription = match self
            .inner
            .subscriptions
            .create(own_stream, self.mailbox_sink(), None)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.inner.active.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        *self
            .inner
            .own_subscription
            .lock()
            .expect("subscription lock poisoned") = Some(subscription);

        // Subscriptions are released on every exit path from here on.
        if let Err(err) = self.inner.core.lock().await.activate().await {
            self.release_subscriptions();
            self.inner.active.store(false, Ordering::SeqCst);
            return Err(err.into());
        }

        if let Some(rx) = self
            .inner
            .mailbox_rx
            .lock()
            .expect("mailbox lock poisoned")
            .take()
        {
            let worker = tokio::spawn(run_mailbox(Arc::clone(&self.inner), rx));
            *self.inner.worker.lock().expect("worker lock poisoned") = Some(worker);
        }

        record_actor_activated();
        debug!(agent_id = %self.inner.id, operation = "activate", "actor activated");
        Ok(())
    }

    /// Deactivates the actor: runs the agent teardown, then releases every
    /// owned subscription and stops the mailbox worker on all exit paths.
    pub async fn deactivate(&self) -> Result<(), ActivationError> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.inner.core.lock().await.deactivate().await;

        self.release_subscriptions();
        if let Some(worker) = self
            .inner
            .worker
            .lock()
            .expect("worker lock poisoned")
            .take()
        {
            worker.abort();
        }

        record_actor_deactivated();
        debug!(agent_id = %self.inner.id, operation = "deactivate", "actor deactivated");
        result
    }

    /// Records the parent and subscribes to its stream; a prior parent's
    /// subscription is released first. The parent cannot be the actor
    /// itself.
    pub async fn set_parent(&self, parent: AgentId) -> Result<(), ActorError> {
        self.inner.hierarchy.set_parent(self.inner.id, parent)?;

        let previous = self
            .inner
            .parent_subscription
            .lock()
            .expect("subscription lock poisoned")
            .take();
        self.inner.subscriptions.unsubscribe(previous.as_ref());

        let parent_stream = StreamId::for_agent(parent);
        let _ = self.inner.streams.get_or_create(parent_stream);
        let handle = self
            .inner
            .subscriptions
            .create(parent_stream, self.mailbox_sink(), None)
            .await?;
        *self
            .inner
            .parent_subscription
            .lock()
            .expect("subscription lock poisoned") = Some(handle);
        Ok(())
    }

    /// Unsubscribes from the parent's stream and forgets the parent
    pub fn clear_parent(&self) {
        let previous = self
            .inner
            .parent_subscription
            .lock()
            .expect("subscription lock poisoned")
            .take();
        self.inner.subscriptions.unsubscribe(previous.as_ref());
        let _ = self.inner.hierarchy.clear_parent(self.inner.id);
    }

    /// Adds a child; an already-present child is a no-op (`false`)
    pub fn add_child(&self, child: AgentId) -> Result<bool, ActorError> {
        Ok(self.inner.hierarchy.add_child(self.inner.id, child)?)
    }

    /// Removes a child; an absent child is a no-op (`false`)
    pub fn remove_child(&self, child: AgentId) -> bool {
        self.inner.hierarchy.remove_child(self.inner.id, child)
    }

    /// The current parent, if any
    #[must_use]
    pub fn parent(&self) -> Option<AgentId> {
        self.inner.hierarchy.parent_of(self.inner.id)
    }

    /// The current children, in insertion order
    #[must_use]
    pub fn children(&self) -> Vec<AgentId> {
        self.inner.hierarchy.children_of(self.inner.id)
    }

    /// Publishes a typed event from this actor
    pub async fn publish<E: DomainEvent>(
        &self,
        event: &E,
        direction: EventDirection,
    ) -> Result<EventId, PublishError> {
        let payload = EventPayload::encode(event)?;
        self.publish_payload(payload, direction).await
    }

    /// Publishes a pre-encoded payload from this actor
    pub async fn publish_payload(
        &self,
        payload: EventPayload,
        direction: EventDirection,
    ) -> Result<EventId, PublishError> {
        let envelope = EventEnvelope::builder(self.inner.id, payload)
            .direction(direction)
            .build();
        let id = envelope.id();
        self.inner
            .router
            .route_from(self.inner.id, envelope)
            .await?;
        Ok(id)
    }

    /// Routes a caller-built envelope (hop limits, stop flag, version
    /// stamps) from this actor
    pub async fn publish_envelope(
        &self,
        envelope: EventEnvelope,
    ) -> Result<EventId, PublishError> {
        let id = envelope.id();
        self.inner
            .router
            .route_from(self.inner.id, envelope)
            .await?;
        Ok(id)
    }

    /// Lands an envelope on this actor's mailbox directly, bypassing
    /// streams. This is the backend glue for addressed delivery.
    pub async fn deliver(&self, envelope: EventEnvelope) -> Result<(), SinkError> {
        self.mailbox_sink().deliver(envelope).await
    }

    /// The agent's description
    pub async fn describe(&self) -> String {
        self.inner.core.lock().await.describe()
    }

    /// The agent's async description; hook errors surface to the caller
    pub async fn describe_async(&self) -> Result<String, HandlerError> {
        self.inner.core.lock().await.describe_async().await
    }

    fn mailbox_sink(&self) -> Arc<MailboxSink> {
        Arc::new(MailboxSink {
            tx: self.inner.mailbox_tx.clone(),
        })
    }

    fn release_subscriptions(&self) {
        let own = self
            .inner
            .own_subscription
            .lock()
            .expect("subscription lock poisoned")
            .take();
        self.inner.subscriptions.unsubscribe(own.as_ref());
        let parent = self
            .inner
            .parent_subscription
            .lock()
            .expect("subscription lock poisoned")
            .take();
        self.inner.subscriptions.unsubscribe(parent.as_ref());
    }
}

async fn run_mailbox<A: Agent>(
    inner: Arc<ActorInner<A>>,
    mut rx: mpsc::Receiver<EventEnvelope>,
) {
    while let Some(envelope) = rx.recv().await {
        if !inner.dedup.observe(envelope.id()) {
            record_event_dropped(DropReason::Duplicate);
            continue;
        }
        // Single-flight: one envelope at a time per actor.
        inner.core.lock().await.handle_event(envelope).await;
    }
    warn!(agent_id = %inner.id, "actor mailbox closed");
}
