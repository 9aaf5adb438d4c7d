//! Event envelope: the routing carrier for published events
//!
//! An envelope wraps a typed payload with everything the router and the
//! receiving actors need: the originator, the ordered chain of agents that
//! have forwarded it, hop counters, and the propagation direction.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::domain_types::{AgentId, CorrelationId, EventId, HopCount};
use crate::serialization::EventPayload;

/// Routing intent of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventDirection {
    /// No direction given; routed as [`EventDirection::Down`]
    #[default]
    Unspecified,
    /// Toward the publisher's children, via the publisher's own stream
    Down,
    /// Toward the publisher's parent (and thereby its siblings), via the parent's stream
    Up,
    /// [`EventDirection::Down`] followed by [`EventDirection::Up`]
    Both,
}

/// Serializable carrier of a typed event plus its routing metadata.
///
/// Equality is structural on `id`, `publisher_id`, and `version`, which is
/// what receiver-side deduplication keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    id: EventId,
    publisher_id: AgentId,
    publishers: Vec<AgentId>,
    correlation_id: CorrelationId,
    timestamp: SystemTime,
    version: u64,
    payload: EventPayload,
    direction: EventDirection,
    should_stop_propagation: bool,
    /// `0` means unlimited
    max_hop_count: HopCount,
    current_hop_count: HopCount,
    min_hop_count: HopCount,
    message: String,
}

impl PartialEq for EventEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.publisher_id == other.publisher_id
            && self.version == other.version
    }
}

impl Eq for EventEnvelope {}

impl EventEnvelope {
    /// Starts building an envelope published by `publisher_id`.
    ///
    /// A fresh `id`, a fresh correlation ID, and the current UTC time are
    /// stamped on; the publisher chain initially contains the publisher
    /// alone.
    #[must_use]
    pub fn builder(publisher_id: AgentId, payload: EventPayload) -> EventEnvelopeBuilder {
        EventEnvelopeBuilder {
            envelope: Self {
                id: EventId::generate(),
                publisher_id,
                publishers: vec![publisher_id],
                correlation_id: CorrelationId::generate(),
                timestamp: SystemTime::now(),
                version: 0,
                payload,
                direction: EventDirection::default(),
                should_stop_propagation: false,
                max_hop_count: HopCount::default(),
                current_hop_count: HopCount::default(),
                min_hop_count: HopCount::default(),
                message: String::new(),
            },
        }
    }

    /// Unique identifier of this envelope
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Agent that originated the envelope
    #[must_use]
    pub fn publisher_id(&self) -> AgentId {
        self.publisher_id
    }

    /// Ordered, duplicate-free chain of agents that have forwarded this envelope
    #[must_use]
    pub fn publishers(&self) -> &[AgentId] {
        &self.publishers
    }

    /// Correlation identifier shared with related envelopes
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// UTC creation time
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Publisher-assigned version stamp
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The carried typed payload
    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Routing intent
    #[must_use]
    pub fn direction(&self) -> EventDirection {
        self.direction
    }

    /// Overrides the routing intent, used when forwarding a received envelope
    pub fn set_direction(&mut self, direction: EventDirection) {
        self.direction = direction;
    }

    /// Whether further propagation has been suppressed
    #[must_use]
    pub fn should_stop_propagation(&self) -> bool {
        self.should_stop_propagation
    }

    /// Suppresses any further propagation of this envelope
    pub fn stop_propagation(&mut self) {
        self.should_stop_propagation = true;
    }

    /// Maximum number of hops this envelope may take; `0` means unlimited
    #[must_use]
    pub fn max_hop_count(&self) -> HopCount {
        self.max_hop_count
    }

    /// Hops taken so far
    #[must_use]
    pub fn current_hop_count(&self) -> HopCount {
        self.current_hop_count
    }

    /// Carried hop floor; metadata for receivers that window deliveries
    #[must_use]
    pub fn min_hop_count(&self) -> HopCount {
        self.min_hop_count
    }

    /// Free-text annotation
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the hop limit has been reached
    #[must_use]
    pub fn hop_limit_reached(&self) -> bool {
        !self.max_hop_count.is_unlimited() && self.current_hop_count >= self.max_hop_count
    }

    /// Whether the given agent already appears in the publisher chain
    #[must_use]
    pub fn has_published(&self, agent_id: AgentId) -> bool {
        self.publishers.contains(&agent_id)
    }

    /// Appends an agent to the publisher chain, keeping the chain duplicate-free
    pub fn record_publisher(&mut self, agent_id: AgentId) {
        if !self.publishers.contains(&agent_id) {
            self.publishers.push(agent_id);
        }
    }

    pub(crate) fn with_incremented_hop(&self) -> Self {
        let mut copy = self.clone();
        copy.current_hop_count = copy.current_hop_count.incremented();
        copy
    }
}

/// Builder for [`EventEnvelope`]
#[derive(Debug)]
pub struct EventEnvelopeBuilder {
    envelope: EventEnvelope,
}

impl EventEnvelopeBuilder {
    /// Sets the routing intent
    #[must_use]
    pub fn direction(mut self, direction: EventDirection) -> Self {
        self.envelope.direction = direction;
        self
    }

    /// Reuses an existing correlation ID instead of the generated one
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.envelope.correlation_id = correlation_id;
        self
    }

    /// Sets the publisher-assigned version stamp
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.envelope.version = version;
        self
    }

    /// Sets the hop limit; `0` means unlimited
    #[must_use]
    pub fn max_hop_count(mut self, max: HopCount) -> Self {
        self.envelope.max_hop_count = max;
        self
    }

    /// Sets the carried hop floor
    #[must_use]
    pub fn min_hop_count(mut self, min: HopCount) -> Self {
        self.envelope.min_hop_count = min;
        self
    }

    /// Sets the free-text annotation
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.envelope.message = message.into();
        self
    }

    /// Suppresses propagation from the start
    #[must_use]
    pub fn stop_propagation(mut self) -> Self {
        self.envelope.should_stop_propagation = true;
        self
    }

    /// Finishes the envelope
    #[must_use]
    pub fn build(self) -> EventEnvelope {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::DomainEvent;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        content: String,
    }

    impl DomainEvent for Ping {
        fn event_type() -> &'static str {
            "test.ping"
        }
    }

    fn sample() -> EventEnvelope {
        let payload = EventPayload::encode(&Ping {
            content: "hi".to_string(),
        })
        .unwrap();
        EventEnvelope::builder(AgentId::generate(), payload)
            .direction(EventDirection::Up)
            .build()
    }

    #[test]
    fn builder_stamps_publisher_chain() {
        let envelope = sample();
        assert_eq!(envelope.publishers(), &[envelope.publisher_id()]);
    }

    #[test]
    fn record_publisher_keeps_chain_unique() {
        let mut envelope = sample();
        let forwarder = AgentId::generate();
        envelope.record_publisher(forwarder);
        envelope.record_publisher(forwarder);
        envelope.record_publisher(envelope.publisher_id());
        assert_eq!(envelope.publishers().len(), 2);
        assert_eq!(envelope.publishers()[0], envelope.publisher_id());
    }

    #[test]
    fn equality_is_on_id_publisher_and_version() {
        let envelope = sample();
        let mut copy = envelope.clone();
        copy.record_publisher(AgentId::generate());
        copy.set_direction(EventDirection::Down);
        assert_eq!(envelope, copy);
        assert_ne!(envelope, sample());
    }

    #[test]
    fn hop_limit_reached_honours_unlimited() {
        let mut envelope = sample();
        assert!(!envelope.hop_limit_reached());
        envelope.max_hop_count = HopCount::new(2);
        envelope.current_hop_count = HopCount::new(2);
        assert!(envelope.hop_limit_reached());
    }

    #[test]
    fn incremented_copy_leaves_original_untouched() {
        let envelope = sample();
        let copy = envelope.with_incremented_hop();
        assert_eq!(copy.current_hop_count().as_u32(), 1);
        assert_eq!(envelope.current_hop_count().as_u32(), 0);
    }

    #[test]
    fn serde_round_trip_is_lossless() {
        let envelope = sample();
        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.publishers(), envelope.publishers());
        assert_eq!(back.payload(), envelope.payload());
        assert_eq!(back.direction(), envelope.direction());
    }
}
