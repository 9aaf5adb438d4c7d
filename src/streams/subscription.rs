//! Subscription lifecycle management
//!
//! The manager unifies how receivers attach to streams: creation with
//! exponential-backoff retry, periodic health checks against an idle
//! window, pause/resume, and reconnection that preserves the original sink
//! and filter. Each handle carries a small explicit state machine:
//!
//! ```text
//! Creating -> Active <-> Paused
//! Active -> Unhealthy -> Active (reconnect) | Terminated
//! *      -> Terminated (unsubscribe)
//! ```

use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::domain_types::{
    EventTypeTag, IdleWindowMs, MaxSubscribeAttempts, RetryBackoffFactor, RetryBaseDelayMs,
    StreamId, SubscriptionId,
};
use crate::observability::record_subscription_retry;
use crate::streams::registry::StreamRegistry;
use crate::streams::stream::{EventSink, StreamSubscription};

/// Subscription lifecycle errors
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("failed to create subscription on stream {stream_id} after {attempts} attempts")]
    CreateFailed { stream_id: StreamId, attempts: u32 },

    #[error("stream not found: {stream_id}")]
    StreamNotFound { stream_id: StreamId },
}

/// Lifecycle state of a managed subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Creation (or a retry of it) is in flight
    Creating,
    /// Attached and delivering
    Active,
    /// Attached but delivery is gated
    Paused,
    /// Attached but failed its last health check
    Unhealthy,
    /// Detached; terminal
    Terminated,
}

/// Retry and health-check policy, usually derived from [`RuntimeConfig`]
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionPolicy {
    /// Maximum create/reconnect attempts before giving up
    pub max_attempts: MaxSubscribeAttempts,
    /// Delay before the second attempt
    pub base_delay: RetryBaseDelayMs,
    /// Multiplier applied per subsequent attempt
    pub backoff_factor: RetryBackoffFactor,
    /// Idle window for health checks
    pub idle_window: IdleWindowMs,
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MaxSubscribeAttempts::default(),
            base_delay: RetryBaseDelayMs::default(),
            backoff_factor: RetryBackoffFactor::default(),
            idle_window: IdleWindowMs::default(),
        }
    }
}

impl SubscriptionPolicy {
    /// Extracts the subscription knobs from a runtime configuration
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            max_attempts: config.max_subscribe_attempts,
            base_delay: config.retry_base_delay_ms,
            backoff_factor: config.retry_backoff_factor,
            idle_window: config.subscription_idle_window_ms,
        }
    }

    /// Backoff for the given 1-based attempt, with ±25 % jitter
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_u64() as f64;
        let factor = self.backoff_factor.as_f64().powi(attempt.saturating_sub(1) as i32);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((base * factor * jitter).round() as u64)
    }
}

struct ManagedSubscription {
    id: SubscriptionId,
    stream_id: StreamId,
    sink: Arc<dyn EventSink>,
    type_filter: Option<EventTypeTag>,
    state: Mutex<SubscriptionState>,
    retry_count: AtomicU32,
    live: Mutex<Option<StreamSubscription>>,
}

/// Cloneable handle onto a managed subscription
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<ManagedSubscription>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.inner.id)
            .field("stream_id", &self.inner.stream_id)
            .field("state", &self.state())
            .finish()
    }
}

impl SubscriptionHandle {
    /// Stable identifier of this subscription, preserved across reconnects
    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// The stream this subscription targets
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.inner.stream_id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.inner.state.lock().expect("state lock poisoned")
    }

    /// Whether the subscription has not been marked unhealthy or terminated
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(
            self.state(),
            SubscriptionState::Active | SubscriptionState::Paused
        )
    }

    /// Whether delivery is currently gated
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == SubscriptionState::Paused
    }

    /// Number of retries performed over the handle's lifetime
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::Relaxed)
    }

    /// Instant of the most recent delivery, `None` once detached
    #[must_use]
    pub fn last_activity(&self) -> Option<Instant> {
        self.inner
            .live
            .lock()
            .expect("live lock poisoned")
            .as_ref()
            .map(StreamSubscription::last_activity)
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.inner.state.lock().expect("state lock poisoned") = state;
    }

    fn take_live(&self) -> Option<StreamSubscription> {
        self.inner.live.lock().expect("live lock poisoned").take()
    }

    fn put_live(&self, live: StreamSubscription) {
        *self.inner.live.lock().expect("live lock poisoned") = Some(live);
    }
}

/// Unifies subscription lifecycle across runtime backends
pub struct SubscriptionManager {
    streams: Arc<StreamRegistry>,
    policy: SubscriptionPolicy,
    subscriptions: DashMap<SubscriptionId, SubscriptionHandle>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("policy", &self.policy)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl SubscriptionManager {
    /// Creates a manager over the given stream registry
    #[must_use]
    pub fn new(streams: Arc<StreamRegistry>, policy: SubscriptionPolicy) -> Self {
        Self {
            streams,
            policy,
            subscriptions: DashMap::new(),
        }
    }

    /// Attaches a sink to a stream, retrying with exponential backoff.
    ///
    /// Fails with [`SubscriptionError::CreateFailed`] once the configured
    /// attempts are exhausted.
    pub async fn create(
        &self,
        stream_id: StreamId,
        sink: Arc<dyn EventSink>,
        type_filter: Option<EventTypeTag>,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let handle = SubscriptionHandle {
            inner: Arc::new(ManagedSubscription {
                id: SubscriptionId::generate(),
                stream_id,
                sink,
                type_filter,
                state: Mutex::new(SubscriptionState::Creating),
                retry_count: AtomicU32::new(0),
                live: Mutex::new(None),
            }),
        };

        self.attach_with_retry(&handle).await?;
        self.subscriptions
            .insert(handle.subscription_id(), handle.clone());
        Ok(handle)
    }

    /// Detaches a subscription. Idempotent: `None` and already-terminated
    /// handles are no-ops.
    pub fn unsubscribe(&self, handle: Option<&SubscriptionHandle>) {
        let Some(handle) = handle else { return };
        if handle.state() == SubscriptionState::Terminated {
            return;
        }
        handle.set_state(SubscriptionState::Terminated);
        if let Some(live) = handle.take_live()
            && let Some(stream) = self.streams.get(handle.stream_id())
        {
            stream.unsubscribe(live.subscription_id());
        }
        self.subscriptions.remove(&handle.subscription_id());
    }

    /// Checks liveness and recent activity.
    ///
    /// Returns `false` (and marks the handle unhealthy) when the handle is
    /// detached, terminated, or idle past the configured window.
    pub fn health_check(&self, handle: &SubscriptionHandle) -> bool {
        match handle.state() {
            SubscriptionState::Terminated | SubscriptionState::Unhealthy => return false,
            SubscriptionState::Creating => return false,
            SubscriptionState::Active | SubscriptionState::Paused => {}
        }
        let healthy = handle
            .last_activity()
            .is_some_and(|at| at.elapsed() <= self.policy.idle_window.as_duration());
        if !healthy {
            warn!(
                subscription_id = %handle.subscription_id(),
                stream_id = %handle.stream_id(),
                operation = "health_check",
                "subscription idle past window; marking unhealthy"
            );
            handle.set_state(SubscriptionState::Unhealthy);
        }
        healthy
    }

    /// Re-subscribes with the original sink and type filter.
    ///
    /// Failure after the configured retries is reported as `false`, not
    /// raised; the handle then stays unhealthy.
    pub async fn reconnect(&self, handle: &SubscriptionHandle) -> bool {
        if handle.state() == SubscriptionState::Terminated {
            return false;
        }
        if let Some(old) = handle.take_live()
            && let Some(stream) = self.streams.get(handle.stream_id())
        {
            stream.unsubscribe(old.subscription_id());
        }
        handle.set_state(SubscriptionState::Creating);
        match self.attach_with_retry(handle).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    subscription_id = %handle.subscription_id(),
                    stream_id = %handle.stream_id(),
                    operation = "reconnect",
                    error = %err,
                    "reconnect failed; leaving subscription unhealthy"
                );
                handle.set_state(SubscriptionState::Unhealthy);
                false
            }
        }
    }

    /// Gates delivery while keeping the handle and queued envelopes
    pub fn pause(&self, handle: &SubscriptionHandle) {
        if handle.state() != SubscriptionState::Active {
            return;
        }
        if let Some(live) = handle.inner.live.lock().expect("live lock poisoned").as_ref() {
            live.pause();
        }
        handle.set_state(SubscriptionState::Paused);
    }

    /// Resumes delivery of queued and future envelopes
    pub fn resume(&self, handle: &SubscriptionHandle) {
        if handle.state() != SubscriptionState::Paused {
            return;
        }
        if let Some(live) = handle.inner.live.lock().expect("live lock poisoned").as_ref() {
            live.resume();
        }
        handle.set_state(SubscriptionState::Active);
    }

    /// Handles that are healthy and not paused
    #[must_use]
    pub fn active(&self) -> Vec<SubscriptionHandle> {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().state() == SubscriptionState::Active)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Total number of tracked (non-terminated) subscriptions
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no subscriptions are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    async fn attach_with_retry(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<(), SubscriptionError> {
        let max = u32::from(self.policy.max_attempts.as_u8());
        for attempt in 1..=max {
            match self.try_attach(handle) {
                Ok(()) => {
                    handle.set_state(SubscriptionState::Active);
                    return Ok(());
                }
                Err(err) => {
                    debug!(
                        stream_id = %handle.stream_id(),
                        operation = "subscribe",
                        attempt,
                        error = %err,
                        "subscription attempt failed"
                    );
                    handle.inner.retry_count.fetch_add(1, Ordering::Relaxed);
                    record_subscription_retry();
                    if attempt < max {
                        tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(SubscriptionError::CreateFailed {
            stream_id: handle.stream_id(),
            attempts: max,
        })
    }

    fn try_attach(&self, handle: &SubscriptionHandle) -> Result<(), SubscriptionError> {
        let stream = self
            .streams
            .get(handle.stream_id())
            .ok_or(SubscriptionError::StreamNotFound {
                stream_id: handle.stream_id(),
            })?;
        let live = stream.subscribe(
            Arc::clone(&handle.inner.sink),
            handle.inner.type_filter.clone(),
        );
        handle.put_live(live);
        Ok(())
    }
}
