//! Per-agent multicast event stream
//!
//! A stream fans every produced envelope out to its subscribers. Each
//! subscriber owns a bounded queue drained by a dedicated worker task, which
//! gives per-subscriber FIFO ordering and isolates one slow or failing sink
//! from the rest.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::config::OverflowPolicy;
use crate::domain_types::{ChannelCapacity, EventTypeTag, StreamId, SubscriptionId};
use crate::envelope::EventEnvelope;
use crate::observability::{DropReason, record_event_dropped};

/// Stream-level errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(
        "backpressure timeout on stream {stream_id}: producer blocked for more than {waited_ms} ms"
    )]
    BackpressureTimeout { stream_id: StreamId, waited_ms: u64 },
}

/// A sink rejected an envelope. Sink failures are isolated per subscriber
/// and never affect other subscribers or the producer.
#[derive(Debug, Error)]
#[error("sink rejected envelope: {reason}")]
pub struct SinkError {
    /// Human-readable rejection reason
    pub reason: String,
}

impl SinkError {
    /// Creates a sink error from any displayable reason
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Receiver side of a stream subscription
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one envelope to the receiver
    async fn deliver(&self, envelope: EventEnvelope) -> Result<(), SinkError>;
}

struct SubscriberSlot {
    tx: mpsc::Sender<EventEnvelope>,
    type_filter: Option<EventTypeTag>,
    worker: JoinHandle<()>,
}

/// Raw handle onto one subscriber slot of a stream.
///
/// Dropping the handle does not unsubscribe; removal is explicit via
/// [`EventStream::unsubscribe`].
#[derive(Debug, Clone)]
pub struct StreamSubscription {
    subscription_id: SubscriptionId,
    stream_id: StreamId,
    pause: watch::Sender<bool>,
    last_activity: Arc<Mutex<Instant>>,
}

impl StreamSubscription {
    /// Identifier of this subscription within its stream
    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// The stream this subscription is attached to
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Stops delivery while retaining queued envelopes
    pub fn pause(&self) {
        let _ = self.pause.send(true);
    }

    /// Resumes delivery of queued and future envelopes
    pub fn resume(&self) {
        let _ = self.pause.send(false);
    }

    /// Whether delivery is currently gated
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Instant of the most recent delivery (or of attachment)
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().expect("activity lock poisoned")
    }
}

/// A per-agent asynchronous multicast channel with bounded backpressure
pub struct EventStream {
    id: StreamId,
    capacity: ChannelCapacity,
    policy: OverflowPolicy,
    produce_timeout: std::time::Duration,
    subscribers: DashMap<SubscriptionId, SubscriberSlot>,
    dropped_events: AtomicU64,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl EventStream {
    /// Creates a stream with the given queue bound and overflow policy
    #[must_use]
    pub fn new(
        id: StreamId,
        capacity: ChannelCapacity,
        policy: OverflowPolicy,
        produce_timeout: std::time::Duration,
    ) -> Self {
        Self {
            id,
            capacity,
            policy,
            produce_timeout,
            subscribers: DashMap::new(),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// The stream identifier
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Enqueues an envelope for every matching subscriber.
    ///
    /// Under [`OverflowPolicy::Wait`] the producer blocks on a full
    /// subscriber queue and fails with
    /// [`StreamError::BackpressureTimeout`] only once the queue has stayed
    /// full past the configured bound; deliveries already made to earlier
    /// subscribers stand. Under [`OverflowPolicy::DropNewest`] the envelope
    /// is dropped for that subscriber and counted.
    pub async fn produce(&self, envelope: EventEnvelope) -> Result<(), StreamError> {
        let targets: Vec<mpsc::Sender<EventEnvelope>> = self
            .subscribers
            .iter()
            .filter(|slot| match &slot.type_filter {
                Some(tag) => tag == envelope.payload().type_tag(),
                None => true,
            })
            .map(|slot| slot.tx.clone())
            .collect();

        for tx in targets {
            match self.policy {
                OverflowPolicy::Wait => {
                    match tx.send_timeout(envelope.clone(), self.produce_timeout).await {
                        Ok(()) => {}
                        Err(SendTimeoutError::Timeout(_)) => {
                            return Err(StreamError::BackpressureTimeout {
                                stream_id: self.id,
                                waited_ms: self.produce_timeout.as_millis() as u64,
                            });
                        }
                        // Subscriber worker is gone; slot removal is pending.
                        Err(SendTimeoutError::Closed(_)) => {}
                    }
                }
                OverflowPolicy::DropNewest => match tx.try_send(envelope.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped_events.fetch_add(1, Ordering::Relaxed);
                        record_event_dropped(DropReason::Backpressure);
                    }
                    Err(TrySendError::Closed(_)) => {}
                },
            }
        }
        Ok(())
    }

    /// Registers a sink, optionally restricted to one event type.
    ///
    /// Envelopes not matching the filter are skipped silently for this
    /// subscriber only.
    #[must_use]
    pub fn subscribe(
        &self,
        sink: Arc<dyn EventSink>,
        type_filter: Option<EventTypeTag>,
    ) -> StreamSubscription {
        let subscription_id = SubscriptionId::generate();
        let (tx, rx) = mpsc::channel(self.capacity.as_usize());
        let (pause_tx, pause_rx) = watch::channel(false);
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let worker = tokio::spawn(drain_subscriber(
            self.id,
            subscription_id,
            rx,
            sink,
            pause_rx,
            Arc::clone(&last_activity),
        ));

        self.subscribers.insert(
            subscription_id,
            SubscriberSlot {
                tx,
                type_filter,
                worker,
            },
        );

        StreamSubscription {
            subscription_id,
            stream_id: self.id,
            pause: pause_tx,
            last_activity,
        }
    }

    /// Removes a subscriber. The worker finishes delivering already-queued
    /// envelopes and then exits. Returns whether the subscription existed.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        self.subscribers.remove(&subscription_id).is_some()
    }

    /// Current number of subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Envelopes dropped under the drop policy since creation
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Aborts all subscriber workers. Used on registry teardown.
    pub fn close(&self) {
        self.subscribers.retain(|_, slot| {
            slot.worker.abort();
            false
        });
    }
}

async fn drain_subscriber(
    stream_id: StreamId,
    subscription_id: SubscriptionId,
    mut rx: mpsc::Receiver<EventEnvelope>,
    sink: Arc<dyn EventSink>,
    mut pause_rx: watch::Receiver<bool>,
    last_activity: Arc<Mutex<Instant>>,
) {
    while let Some(envelope) = rx.recv().await {
        // Delivery gate: hold queued envelopes while paused.
        while *pause_rx.borrow() {
            if pause_rx.changed().await.is_err() {
                return;
            }
        }
        let event_id = envelope.id();
        if let Err(err) = sink.deliver(envelope).await {
            warn!(
                stream_id = %stream_id,
                subscription_id = %subscription_id,
                event_id = %event_id,
                operation = "deliver",
                error = %err,
                "subscriber sink rejected envelope"
            );
        } else {
            trace!(
                stream_id = %stream_id,
                subscription_id = %subscription_id,
                event_id = %event_id,
                operation = "deliver",
                "envelope delivered"
            );
        }
        *last_activity.lock().expect("activity lock poisoned") = Instant::now();
    }
}

/// Adapter exposing a plain async closure as an [`EventSink`]
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F> {
    /// Wraps the closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> EventSink for FnSink<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), SinkError>> + Send,
{
    async fn deliver(&self, envelope: EventEnvelope) -> Result<(), SinkError> {
        (self.f)(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentId;
    use crate::serialization::{DomainEvent, EventPayload};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl DomainEvent for Note {
        fn event_type() -> &'static str {
            "test.note"
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Unrelated;

    impl DomainEvent for Unrelated {
        fn event_type() -> &'static str {
            "test.unrelated"
        }
    }

    fn stream() -> EventStream {
        EventStream::new(
            StreamId::for_agent(AgentId::generate()),
            ChannelCapacity::try_new(4).unwrap(),
            OverflowPolicy::Wait,
            Duration::from_millis(100),
        )
    }

    fn note_envelope(text: &str) -> EventEnvelope {
        let payload = EventPayload::encode(&Note {
            text: text.to_string(),
        })
        .unwrap();
        EventEnvelope::builder(AgentId::generate(), payload).build()
    }

    fn collecting_sink() -> (Arc<dyn EventSink>, Arc<AsyncMutex<Vec<String>>>) {
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let probe = Arc::clone(&seen);
        let sink = Arc::new(FnSink::new(move |envelope: EventEnvelope| {
            let probe = Arc::clone(&probe);
            async move {
                let note: Note = envelope
                    .payload()
                    .decode()
                    .map_err(|e| SinkError::new(e.to_string()))?;
                probe.lock().await.push(note.text);
                Ok(())
            }
        }));
        (sink, seen)
    }

    #[tokio::test]
    async fn delivers_in_fifo_order_per_subscriber() {
        let stream = stream();
        let (sink, seen) = collecting_sink();
        let _sub = stream.subscribe(sink, None);

        for i in 0..3 {
            stream.produce(note_envelope(&format!("n{i}"))).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().await, vec!["n0", "n1", "n2"]);
    }

    #[tokio::test]
    async fn type_filter_skips_unmatched_payloads() {
        let stream = stream();
        let (sink, seen) = collecting_sink();
        let _sub = stream.subscribe(
            sink,
            Some(EventTypeTag::try_new("test.note".to_string()).unwrap()),
        );

        let unrelated = EventEnvelope::builder(
            AgentId::generate(),
            EventPayload::encode(&Unrelated).unwrap(),
        )
        .build();
        stream.produce(unrelated).await.unwrap();
        stream.produce(note_envelope("kept")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().await, vec!["kept"]);
    }

    #[tokio::test]
    async fn failing_sink_does_not_affect_other_subscribers() {
        let stream = stream();
        let failing = Arc::new(FnSink::new(|_envelope: EventEnvelope| async {
            Err::<(), SinkError>(SinkError::new("always fails"))
        }));
        let (sink, seen) = collecting_sink();
        let _bad = stream.subscribe(failing, None);
        let _good = stream.subscribe(sink, None);

        stream.produce(note_envelope("still here")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().await, vec!["still here"]);
    }

    #[tokio::test]
    async fn wait_policy_times_out_when_queue_stays_full() {
        let stream = EventStream::new(
            StreamId::for_agent(AgentId::generate()),
            ChannelCapacity::try_new(1).unwrap(),
            OverflowPolicy::Wait,
            Duration::from_millis(50),
        );
        let stuck = Arc::new(FnSink::new(|_envelope: EventEnvelope| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), SinkError>(())
        }));
        let _sub = stream.subscribe(stuck, None);

        // First envelope is picked up by the (stuck) worker, second fills the
        // queue, third must time out.
        stream.produce(note_envelope("a")).await.unwrap();
        stream.produce(note_envelope("b")).await.unwrap();
        let err = stream.produce(note_envelope("c")).await.unwrap_err();
        assert!(matches!(err, StreamError::BackpressureTimeout { .. }));
    }

    #[tokio::test]
    async fn drop_policy_counts_dropped_envelopes() {
        let stream = EventStream::new(
            StreamId::for_agent(AgentId::generate()),
            ChannelCapacity::try_new(1).unwrap(),
            OverflowPolicy::DropNewest,
            Duration::from_millis(50),
        );
        let stuck = Arc::new(FnSink::new(|_envelope: EventEnvelope| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), SinkError>(())
        }));
        let _sub = stream.subscribe(stuck, None);

        stream.produce(note_envelope("a")).await.unwrap();
        stream.produce(note_envelope("b")).await.unwrap();
        stream.produce(note_envelope("c")).await.unwrap();
        assert!(stream.dropped_events() >= 1);
    }

    #[tokio::test]
    async fn unsubscribed_receiver_leaves_others_running() {
        let stream = stream();
        let (sink_a, seen_a) = collecting_sink();
        let (sink_b, seen_b) = collecting_sink();
        let sub_a = stream.subscribe(sink_a, None);
        let _sub_b = stream.subscribe(sink_b, None);

        stream.produce(note_envelope("first")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stream.unsubscribe(sub_a.subscription_id()));

        stream.produce(note_envelope("second")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen_a.lock().await, vec!["first"]);
        assert_eq!(*seen_b.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn paused_subscription_retains_and_resumes() {
        let stream = stream();
        let (sink, seen) = collecting_sink();
        let sub = stream.subscribe(sink, None);

        sub.pause();
        stream.produce(note_envelope("held")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().await.is_empty());

        sub.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().await, vec!["held"]);
    }
}
