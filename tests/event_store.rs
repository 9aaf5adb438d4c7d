//! Event store contract tests: optimistic concurrency under racing
//! writers, isolation across agents, and boundary reads.

use arbor::*;
use bytes::Bytes;
use std::sync::Arc;

fn entry(agent_id: AgentId, marker: &str) -> StateLogEvent {
    StateLogEvent::new(
        agent_id,
        EventTypeTag::try_new("test.marker".to_string()).unwrap(),
        Bytes::from(serde_json::to_vec(marker).unwrap()),
    )
    .with_metadata("marker", marker)
}

/// Two concurrent callers append at `expected_version = 5`;
/// exactly one wins, the winner's events take versions 6.., and the loser
/// fails with a concurrency conflict.
#[tokio::test]
async fn concurrent_appends_at_the_same_version_race_cleanly() {
    let store = Arc::new(InMemoryEventStore::new());
    let agent = AgentId::generate();

    let seed: Vec<StateLogEvent> = (0..5).map(|n| entry(agent, &format!("seed{n}"))).collect();
    store
        .append_events(agent, seed, EventVersion::default())
        .await
        .unwrap();

    let left_store = Arc::clone(&store);
    let right_store = Arc::clone(&store);
    let left = tokio::spawn(async move {
        left_store
            .append_events(
                agent,
                vec![entry(agent, "left_a"), entry(agent, "left_b")],
                EventVersion::new(5),
            )
            .await
    });
    let right = tokio::spawn(async move {
        right_store
            .append_events(
                agent,
                vec![entry(agent, "right_a"), entry(agent, "right_b")],
                EventVersion::new(5),
            )
            .await
    });
    let (left, right) = (left.await.unwrap(), right.await.unwrap());

    let (winner, loser) = match (left, right) {
        (Ok(v), Err(e)) | (Err(e), Ok(v)) => (v, e),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert_eq!(winner.as_u64(), 7);
    assert!(matches!(loser, EventStoreError::ConcurrencyConflict { .. }));

    let events = store.get_events(agent, EventQuery::all()).await.unwrap();
    let versions: Vec<u64> = events.iter().map(|e| e.version.as_u64()).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5, 6, 7]);

    // The winner's batch is present in one commit, in order.
    let markers: Vec<&str> = events[5..]
        .iter()
        .map(|e| e.metadata.get("marker").unwrap().as_str())
        .collect();
    assert!(markers == ["left_a", "left_b"] || markers == ["right_a", "right_b"]);
}

/// A conflict on one agent leaves appends for another agent untouched.
#[tokio::test]
async fn agents_are_isolated() {
    let store = InMemoryEventStore::new();
    let (a, b) = (AgentId::generate(), AgentId::generate());

    store
        .append_events(a, vec![entry(a, "a1")], EventVersion::default())
        .await
        .unwrap();
    let conflict = store
        .append_events(a, vec![entry(a, "stale")], EventVersion::default())
        .await;
    assert!(conflict.is_err());

    store
        .append_events(b, vec![entry(b, "b1")], EventVersion::default())
        .await
        .unwrap();
    assert_eq!(store.latest_version(a).await.unwrap().as_u64(), 1);
    assert_eq!(store.latest_version(b).await.unwrap().as_u64(), 1);
}

/// Boundary reads: absent agents yield empty results, never errors.
#[tokio::test]
async fn absent_agent_boundaries() {
    let store = InMemoryEventStore::new();
    let ghost = AgentId::generate();

    assert!(store.get_events(ghost, EventQuery::all()).await.unwrap().is_empty());
    assert_eq!(store.latest_version(ghost).await.unwrap(), EventVersion::default());
    assert!(store.latest_snapshot(ghost).await.unwrap().is_none());
}

/// Reading past the tail or before the head clamps instead of failing.
#[tokio::test]
async fn reads_clamp_to_the_available_range() {
    let store = InMemoryEventStore::new();
    let agent = AgentId::generate();
    let batch: Vec<StateLogEvent> = (0..3).map(|n| entry(agent, &format!("e{n}"))).collect();
    store
        .append_events(agent, batch, EventVersion::default())
        .await
        .unwrap();

    let all = store
        .get_events(
            agent,
            EventQuery {
                from_version: Some(EventVersion::default()),
                to_version: Some(EventVersion::new(10)),
                max_count: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    let beyond = store
        .get_events(agent, EventQuery::from(EventVersion::new(4)))
        .await
        .unwrap();
    assert!(beyond.is_empty());
}
