//! Dispatch semantics: priority ordering, exception recovery, duplicate
//! suppression, and the description hooks.

mod common;

use arbor::*;
use common::{ChatMessage, settle, wait_until};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Boom {
    reason: String,
}

impl DomainEvent for Boom {
    fn event_type() -> &'static str {
        "test.boom"
    }
}

/// Two handlers for the same event: the first fails, the second records.
#[derive(Debug, Default)]
struct Flaky {
    handled: Arc<Mutex<Vec<String>>>,
}

fn h1<'a>(
    _agent: &'a mut Flaky,
    event: Boom,
    _ctx: &'a mut AgentContext<Flaky>,
) -> HandlerFuture<'a> {
    Box::pin(async move { Err(HandlerError::failed(event.reason)) })
}

fn h2<'a>(
    agent: &'a mut Flaky,
    _event: Boom,
    _ctx: &'a mut AgentContext<Flaky>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        agent.handled.lock().unwrap().push("h2".to_string());
        Ok(())
    })
}

impl Agent for Flaky {
    type State = ();
    type Config = ();
    type StateEvent = NullStateEvent;

    fn configure(handlers: &mut HandlerSet<Self>) {
        handlers.handles::<Boom>("h1", h1).priority(1);
        handlers.handles::<Boom>("h2", h2).priority(2);
    }
}

/// Collects handler exception events published by its children.
#[derive(Debug, Default)]
struct Supervisor {
    exceptions: Arc<Mutex<Vec<HandlerExceptionEvent>>>,
}

fn on_exception<'a>(
    agent: &'a mut Supervisor,
    event: HandlerExceptionEvent,
    _ctx: &'a mut AgentContext<Supervisor>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        agent.exceptions.lock().unwrap().push(event);
        Ok(())
    })
}

impl Agent for Supervisor {
    type State = ();
    type Config = ();
    type StateEvent = NullStateEvent;

    fn configure(handlers: &mut HandlerSet<Self>) {
        handlers.handles::<HandlerExceptionEvent>("on_exception", on_exception);
    }
}

/// Appends its handler names to a shared order log, with priorities chosen
/// out of declaration order.
#[derive(Debug, Default)]
struct Ordered {
    order: Arc<Mutex<Vec<&'static str>>>,
}

fn ord_last<'a>(
    agent: &'a mut Ordered,
    _event: ChatMessage,
    _ctx: &'a mut AgentContext<Ordered>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        agent.order.lock().unwrap().push("last");
        Ok(())
    })
}

fn ord_first<'a>(
    agent: &'a mut Ordered,
    _event: ChatMessage,
    _ctx: &'a mut AgentContext<Ordered>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        agent.order.lock().unwrap().push("first");
        Ok(())
    })
}

fn ord_tie_a<'a>(
    agent: &'a mut Ordered,
    _event: ChatMessage,
    _ctx: &'a mut AgentContext<Ordered>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        agent.order.lock().unwrap().push("tie_a");
        Ok(())
    })
}

fn ord_tie_b<'a>(
    agent: &'a mut Ordered,
    _event: ChatMessage,
    _ctx: &'a mut AgentContext<Ordered>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        agent.order.lock().unwrap().push("tie_b");
        Ok(())
    })
}

fn ord_envelope<'a>(
    agent: &'a mut Ordered,
    _envelope: EventEnvelope,
    _ctx: &'a mut AgentContext<Ordered>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        agent.order.lock().unwrap().push("catch_all");
        Ok(())
    })
}

impl Agent for Ordered {
    type State = ();
    type Config = ();
    type StateEvent = NullStateEvent;

    fn configure(handlers: &mut HandlerSet<Self>) {
        handlers.handles::<ChatMessage>("ord_last", ord_last).priority(50);
        handlers.handles::<ChatMessage>("ord_first", ord_first).priority(-10);
        handlers.handles::<ChatMessage>("ord_tie_a", ord_tie_a).priority(7);
        handlers.handles::<ChatMessage>("ord_tie_b", ord_tie_b).priority(7);
        handlers.handles_envelope("ord_envelope", ord_envelope);
    }

    fn description(&self) -> String {
        "ordered probe agent".to_string()
    }
}

fn foreign_chat_envelope(content: &str) -> EventEnvelope {
    let payload = EventPayload::encode(&ChatMessage {
        content: content.to_string(),
    })
    .unwrap();
    EventEnvelope::builder(AgentId::generate(), payload).build()
}

/// H1 throws, H2 still runs, and a `HandlerExceptionEvent`
/// carrying H1's name and message is published upward; the original
/// publish returns normally.
#[tokio::test]
async fn handler_exception_is_recovered_and_published() {
    let runtime = AgentRuntime::new(RuntimeConfig::testing());
    let exceptions = Arc::new(Mutex::new(Vec::new()));
    let handled = Arc::new(Mutex::new(Vec::new()));

    let parent_id = AgentId::generate();
    let child_id = AgentId::generate();
    let parent = runtime
        .spawn_agent_with(parent_id, Supervisor { exceptions: Arc::clone(&exceptions) })
        .await
        .unwrap();
    runtime
        .spawn_agent_with(child_id, Flaky { handled: Arc::clone(&handled) })
        .await
        .unwrap();
    runtime.link(parent_id, child_id).await.unwrap();

    parent
        .publish(
            &Boom { reason: "ledger underflow".to_string() },
            EventDirection::Down,
        )
        .await
        .expect("publish returns normally despite the failing handler");

    wait_until(
        || !exceptions.lock().unwrap().is_empty(),
        "the exception event to reach the supervisor",
    )
    .await;

    assert_eq!(*handled.lock().unwrap(), vec!["h2".to_string()]);
    let exceptions = exceptions.lock().unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].handler_name, "h1");
    assert_eq!(exceptions[0].agent_id, child_id);
    assert!(exceptions[0].message.contains("ledger underflow"));
}

/// Execution order equals ascending priority with declaration-order ties;
/// the all-event handler runs last.
#[tokio::test]
async fn handlers_run_in_priority_order() {
    let runtime = AgentRuntime::new(RuntimeConfig::testing());
    let order = Arc::new(Mutex::new(Vec::new()));
    let agent = runtime
        .spawn_agent_with(AgentId::generate(), Ordered { order: Arc::clone(&order) })
        .await
        .unwrap();

    agent.deliver(foreign_chat_envelope("sequence")).await.unwrap();

    wait_until(
        || order.lock().unwrap().len() >= 5,
        "all five handlers to run",
    )
    .await;
    assert_eq!(
        *order.lock().unwrap(),
        vec!["first", "tie_a", "tie_b", "last", "catch_all"]
    );
}

/// Delivering the same envelope twice invokes handlers exactly once.
#[tokio::test]
async fn duplicate_envelopes_are_suppressed() {
    let runtime = AgentRuntime::new(RuntimeConfig::testing());
    let order = Arc::new(Mutex::new(Vec::new()));
    let agent = runtime
        .spawn_agent_with(AgentId::generate(), Ordered { order: Arc::clone(&order) })
        .await
        .unwrap();

    let envelope = foreign_chat_envelope("once");
    agent.deliver(envelope.clone()).await.unwrap();
    agent.deliver(envelope).await.unwrap();
    settle().await;

    assert_eq!(order.lock().unwrap().len(), 5, "one full dispatch, not two");
}

/// Descriptions default to the type name; overrides and the async hook
/// surface through the actor.
#[tokio::test]
async fn description_hooks() {
    let runtime = AgentRuntime::new(RuntimeConfig::testing());
    let ordered = runtime.spawn_agent::<Ordered>(AgentId::generate()).await.unwrap();
    let flaky = runtime.spawn_agent::<Flaky>(AgentId::generate()).await.unwrap();

    assert_eq!(ordered.describe().await, "ordered probe agent");
    assert!(flaky.describe().await.contains("Flaky"));
    assert_eq!(ordered.describe_async().await.unwrap(), "ordered probe agent");
}
