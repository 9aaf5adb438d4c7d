//! Direction-based event router
//!
//! The router turns a publish into stream emissions. Directions resolve
//! against the hierarchy at routing time:
//!
//! - `Down` (and `Unspecified`): emit to the publisher's own stream, which
//!   its children subscribe to. The publisher only handles its own event if
//!   a handler opts into self-handling.
//! - `Up`: emit to the parent's stream; the parent and all of its children
//!   (the publisher's siblings) subscribe to it.
//! - `Both`: `Down` followed by `Up`, reusing the envelope id; receiver
//!   deduplication absorbs the echo.
//!
//! Loop, hop, and stop guards drop silently and count; they never error.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, trace};

use crate::domain_types::{AgentId, StreamId};
use crate::envelope::{EventDirection, EventEnvelope};
use crate::observability::{DropReason, record_event_dropped, record_event_published};
use crate::routing::hierarchy::HierarchyStore;
use crate::streams::registry::StreamRegistry;
use crate::streams::stream::StreamError;

/// What the router did with one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Stream emissions performed
    pub emitted: usize,
    /// Targets skipped by the loop guard
    pub dropped_loops: usize,
    /// Targets skipped by the hop limit
    pub dropped_hops: usize,
    /// Whether the stop flag suppressed all emission
    pub stopped: bool,
}

/// Computes destination streams for an envelope and emits to them
pub struct EventRouter {
    streams: Arc<StreamRegistry>,
    hierarchy: Arc<HierarchyStore>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter").finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Creates a router over the given streams and hierarchy
    #[must_use]
    pub fn new(streams: Arc<StreamRegistry>, hierarchy: Arc<HierarchyStore>) -> Self {
        Self { streams, hierarchy }
    }

    /// The hierarchy this router resolves against
    #[must_use]
    pub fn hierarchy(&self) -> &Arc<HierarchyStore> {
        &self.hierarchy
    }

    /// Routes an envelope published (or forwarded) by `origin`.
    ///
    /// `origin` is appended to the publisher chain before target guards
    /// run. Routing rules never fail; the only error is a backend refusing
    /// the push (backpressure).
    #[instrument(
        skip(self, envelope),
        fields(
            agent_id = %origin,
            event_id = %envelope.id(),
            event_type = %envelope.payload().type_tag(),
            correlation_id = %envelope.correlation_id(),
            operation = "publish"
        )
    )]
    pub async fn route_from(
        &self,
        origin: AgentId,
        mut envelope: EventEnvelope,
    ) -> Result<RouteReport, StreamError> {
        let started = Instant::now();
        let mut report = RouteReport::default();

        envelope.record_publisher(origin);

        if envelope.should_stop_propagation() {
            record_event_dropped(DropReason::StopPropagation);
            report.stopped = true;
            trace!(
                agent_id = %origin,
                event_id = %envelope.id(),
                event_type = %envelope.payload().type_tag(),
                operation = "route",
                "propagation stopped by flag"
            );
            return Ok(report);
        }

        for target in self.resolve_targets(origin, envelope.direction()) {
            // The chain always contains the origin itself; only a *other*
            // agent already in the chain marks a loop.
            if target != origin && envelope.has_published(target) {
                record_event_dropped(DropReason::LoopDetected);
                report.dropped_loops += 1;
                continue;
            }
            if envelope.hop_limit_reached() {
                record_event_dropped(DropReason::HopExceeded);
                report.dropped_hops += 1;
                continue;
            }
            let copy = envelope.with_incremented_hop();
            self.streams
                .get_or_create(StreamId::for_agent(target))
                .produce(copy)
                .await?;
            report.emitted += 1;
        }

        debug!(
            agent_id = %origin,
            event_id = %envelope.id(),
            event_type = %envelope.payload().type_tag(),
            correlation_id = %envelope.correlation_id(),
            operation = "route",
            direction = ?envelope.direction(),
            emitted = report.emitted,
            "routed envelope"
        );
        record_event_published(started.elapsed());
        Ok(report)
    }

    /// Owners of the streams an envelope published by `origin` goes to.
    ///
    /// A missing parent, or an empty child list for a downward publish,
    /// yields no target; that is silence, not an error.
    fn resolve_targets(&self, origin: AgentId, direction: EventDirection) -> Vec<AgentId> {
        let down = || -> Option<AgentId> {
            if self.hierarchy.children_of(origin).is_empty() {
                None
            } else {
                Some(origin)
            }
        };
        let up = || self.hierarchy.parent_of(origin);

        match direction {
            EventDirection::Down | EventDirection::Unspecified => down().into_iter().collect(),
            EventDirection::Up => up().into_iter().collect(),
            EventDirection::Both => down().into_iter().chain(up()).collect(),
        }
    }
}
