//! Stream registry: one multicast stream per agent
//!
//! Streams are created lazily and shared; the router, the subscription
//! manager, and the runtime all resolve the same instance by [`StreamId`].

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{OverflowPolicy, RuntimeConfig};
use crate::domain_types::{ChannelCapacity, StreamId};
use crate::streams::stream::EventStream;

/// Owning registry of per-agent event streams
pub struct StreamRegistry {
    streams: DashMap<StreamId, Arc<EventStream>>,
    capacity: ChannelCapacity,
    policy: OverflowPolicy,
    produce_timeout: Duration,
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.streams.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish()
    }
}

impl StreamRegistry {
    /// Creates a registry whose streams share the given bounds
    #[must_use]
    pub fn new(capacity: ChannelCapacity, policy: OverflowPolicy, produce_timeout: Duration) -> Self {
        Self {
            streams: DashMap::new(),
            capacity,
            policy,
            produce_timeout,
        }
    }

    /// Creates a registry from the runtime configuration
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.stream_capacity,
            config.overflow_policy,
            config.produce_timeout_ms.as_duration(),
        )
    }

    /// Returns the stream, creating it on first use
    #[must_use]
    pub fn get_or_create(&self, stream_id: StreamId) -> Arc<EventStream> {
        Arc::clone(
            self.streams
                .entry(stream_id)
                .or_insert_with(|| {
                    Arc::new(EventStream::new(
                        stream_id,
                        self.capacity,
                        self.policy,
                        self.produce_timeout,
                    ))
                })
                .value(),
        )
    }

    /// Returns the stream if it exists
    #[must_use]
    pub fn get(&self, stream_id: StreamId) -> Option<Arc<EventStream>> {
        self.streams.get(&stream_id).map(|s| Arc::clone(s.value()))
    }

    /// Drops a stream, aborting its subscriber workers
    pub fn remove(&self, stream_id: StreamId) {
        if let Some((_, stream)) = self.streams.remove(&stream_id) {
            stream.close();
        }
    }

    /// Number of live streams
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no streams exist
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
