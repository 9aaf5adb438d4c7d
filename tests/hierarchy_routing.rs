//! Hierarchy routing scenarios: direction semantics, loop guards, and hop
//! limits across a live runtime.

mod common;

use arbor::*;
use common::{ChatMessage, Forwarder, Probe, Witness, settle, wait_until};

fn testing_runtime() -> AgentRuntime {
    AgentRuntime::new(RuntimeConfig::testing())
}

/// Three siblings under one parent; an upward publish reaches the parent,
/// both siblings, and (via self-handling) the publisher itself, each
/// exactly once, routed through the parent's stream.
#[tokio::test]
async fn up_broadcast_reaches_parent_and_all_siblings_once() {
    let runtime = testing_runtime();
    let probes: Vec<Probe> = (0..4).map(|_| Probe::default()).collect();

    let parent_id = AgentId::generate();
    runtime
        .spawn_agent_with(parent_id, Witness { seen: probes[0].clone() })
        .await
        .unwrap();
    let mut child_refs = Vec::new();
    for probe in &probes[1..] {
        let child_id = AgentId::generate();
        let child = runtime
            .spawn_agent_with(child_id, Witness { seen: probe.clone() })
            .await
            .unwrap();
        runtime.link(parent_id, child_id).await.unwrap();
        child_refs.push(child);
    }

    let publisher = &child_refs[0];
    publisher
        .publish(
            &ChatMessage { content: "hi".to_string() },
            EventDirection::Up,
        )
        .await
        .unwrap();

    wait_until(
        || probes.iter().all(|p| p.count() >= 1),
        "all four agents to observe the broadcast",
    )
    .await;
    settle().await;

    for probe in &probes {
        assert_eq!(probe.count(), 1, "each agent observes exactly once");
        let envelope = &probe.envelopes()[0];
        assert_eq!(envelope.publishers()[0], publisher.agent_id());
        assert_eq!(envelope.publisher_id(), publisher.agent_id());
    }
}

/// A downward publish reaches both children once; a child with no children
/// forwarding downward delivers nothing further, and the publisher never
/// re-enters its own event.
#[tokio::test]
async fn down_to_two_children_with_leaf_forwarding() {
    let runtime = testing_runtime();
    let parent_probe = Probe::default();
    let child_probes = [Probe::default(), Probe::default()];

    let parent_id = AgentId::generate();
    let parent = runtime
        .spawn_agent_with(parent_id, Forwarder { seen: parent_probe.clone() })
        .await
        .unwrap();
    for probe in &child_probes {
        let child_id = AgentId::generate();
        runtime
            .spawn_agent_with(child_id, Forwarder { seen: probe.clone() })
            .await
            .unwrap();
        runtime.link(parent_id, child_id).await.unwrap();
    }

    parent
        .publish(
            &ChatMessage { content: "ping".to_string() },
            EventDirection::Down,
        )
        .await
        .unwrap();

    wait_until(
        || child_probes.iter().all(|p| p.count() >= 1),
        "both children to receive the ping",
    )
    .await;
    settle().await;

    assert_eq!(child_probes[0].count(), 1);
    assert_eq!(child_probes[1].count(), 1);
    assert_eq!(parent_probe.count(), 0, "publisher does not re-enter");
}

/// Five actors chained by parent/child edges; a downward publish with
/// `max_hop_count = 3` reaches the origin plus three hops and never the
/// fifth actor.
#[tokio::test]
async fn hop_limited_chain_stops_after_three_hops() {
    let runtime = testing_runtime();
    let probes: Vec<Probe> = (0..5).map(|_| Probe::default()).collect();

    let ids: Vec<AgentId> = (0..5).map(|_| AgentId::generate()).collect();
    let mut refs = Vec::new();
    for (id, probe) in ids.iter().zip(&probes) {
        refs.push(
            runtime
                .spawn_agent_with(*id, Forwarder { seen: probe.clone() })
                .await
                .unwrap(),
        );
    }
    for pair in ids.windows(2) {
        runtime.link(pair[0], pair[1]).await.unwrap();
    }

    let payload = EventPayload::encode(&ChatMessage { content: "chain".to_string() }).unwrap();
    let envelope = EventEnvelope::builder(ids[0], payload)
        .direction(EventDirection::Down)
        .max_hop_count(HopCount::new(3))
        .build();
    refs[0].publish_envelope(envelope).await.unwrap();

    wait_until(
        || probes[1..4].iter().all(|p| p.count() >= 1),
        "the three in-range actors to receive the chain event",
    )
    .await;
    settle().await;

    assert_eq!(probes[1].count(), 1);
    assert_eq!(probes[2].count(), 1);
    assert_eq!(probes[3].count(), 1);
    assert_eq!(probes[4].count(), 0, "beyond the hop limit");
}

/// BOTH reuses the envelope id for the down and up emissions; receiver
/// deduplication leaves every observer with exactly one delivery.
#[tokio::test]
async fn both_direction_echoes_are_deduplicated() {
    let runtime = testing_runtime();
    let probes: Vec<Probe> = (0..4).map(|_| Probe::default()).collect();

    let grandparent_id = AgentId::generate();
    let parent_id = AgentId::generate();
    let child_ids = [AgentId::generate(), AgentId::generate()];

    runtime
        .spawn_agent_with(grandparent_id, Witness { seen: probes[0].clone() })
        .await
        .unwrap();
    let parent = runtime
        .spawn_agent_with(parent_id, Witness { seen: probes[1].clone() })
        .await
        .unwrap();
    runtime.link(grandparent_id, parent_id).await.unwrap();
    for (child_id, probe) in child_ids.iter().zip(&probes[2..]) {
        runtime
            .spawn_agent_with(*child_id, Witness { seen: probe.clone() })
            .await
            .unwrap();
        runtime.link(parent_id, *child_id).await.unwrap();
    }

    parent
        .publish(
            &ChatMessage { content: "everyone".to_string() },
            EventDirection::Both,
        )
        .await
        .unwrap();

    wait_until(
        || probes.iter().all(|p| p.count() >= 1),
        "grandparent, publisher, and children to observe",
    )
    .await;
    settle().await;

    let ids: Vec<EventId> = probes
        .iter()
        .map(|p| {
            let envelopes = p.envelopes();
            assert_eq!(envelopes.len(), 1, "dedup leaves exactly one delivery");
            envelopes[0].id()
        })
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]), "one id across both emissions");
}

/// An agent whose id is already in the publisher chain is never delivered
/// to again, even across forwarding cycles.
#[tokio::test]
async fn forwarding_cycles_are_loop_free() {
    let runtime = testing_runtime();
    let parent_probe = Probe::default();
    let child_probe = Probe::default();

    let parent_id = AgentId::generate();
    let child_id = AgentId::generate();
    runtime
        .spawn_agent_with(parent_id, Forwarder { seen: parent_probe.clone() })
        .await
        .unwrap();
    let child = runtime
        .spawn_agent_with(child_id, Forwarder { seen: child_probe.clone() })
        .await
        .unwrap();
    runtime.link(parent_id, child_id).await.unwrap();

    // The child publishes upward; the parent's forwarder pushes it back
    // down; the child's own forward then finds the parent in the chain.
    child
        .publish(
            &ChatMessage { content: "round trip".to_string() },
            EventDirection::Up,
        )
        .await
        .unwrap();

    wait_until(|| parent_probe.count() >= 1, "parent to receive the upward publish").await;
    settle().await;

    assert_eq!(parent_probe.count(), 1);
    assert!(child_probe.count() <= 1, "child sees its own event at most once");
}

/// Hierarchy boundary behaviors surface through the actor API.
#[tokio::test]
async fn hierarchy_boundaries() {
    let runtime = testing_runtime();
    let a = runtime.spawn_agent::<Witness>(AgentId::generate()).await.unwrap();
    let b = runtime.spawn_agent::<Witness>(AgentId::generate()).await.unwrap();

    // Self-parenting is rejected.
    assert!(a.set_parent(a.agent_id()).await.is_err());

    // Duplicate child additions and absent removals are no-ops.
    assert!(a.add_child(b.agent_id()).unwrap());
    assert!(!a.add_child(b.agent_id()).unwrap());
    assert_eq!(a.children(), vec![b.agent_id()]);
    assert!(a.remove_child(b.agent_id()));
    assert!(!a.remove_child(b.agent_id()));

    // Unknown lookups are None, not errors.
    assert!(runtime.actor(AgentId::generate()).is_none());
}
