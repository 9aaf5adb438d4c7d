//! Shared fixtures for the integration suite
#![allow(dead_code)]

use arbor::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The event most scenarios route around
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
}

impl DomainEvent for ChatMessage {
    fn event_type() -> &'static str {
        "test.chat_message"
    }
}

/// Thread-safe recorder of delivered envelopes
#[derive(Debug, Clone, Default)]
pub struct Probe {
    envelopes: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl Probe {
    pub fn record(&self, envelope: EventEnvelope) {
        self.envelopes.lock().unwrap().push(envelope);
    }

    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.envelopes.lock().unwrap().len()
    }
}

/// Records every chat message it sees, including its own publishes
#[derive(Debug, Default)]
pub struct Witness {
    pub seen: Probe,
}

fn witness_on_chat<'a>(
    agent: &'a mut Witness,
    _event: ChatMessage,
    ctx: &'a mut AgentContext<Witness>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        if let Some(envelope) = ctx.current_envelope() {
            agent.seen.record(envelope.clone());
        }
        Ok(())
    })
}

impl Agent for Witness {
    type State = ();
    type Config = ();
    type StateEvent = NullStateEvent;

    fn configure(handlers: &mut HandlerSet<Self>) {
        handlers
            .handles::<ChatMessage>("witness_on_chat", witness_on_chat)
            .allow_self_handling(true);
    }
}

/// Records chat messages from other agents and forwards them down the
/// hierarchy, preserving the envelope
#[derive(Debug, Default)]
pub struct Forwarder {
    pub seen: Probe,
}

fn forwarder_on_chat<'a>(
    agent: &'a mut Forwarder,
    _event: ChatMessage,
    ctx: &'a mut AgentContext<Forwarder>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        if let Some(envelope) = ctx.current_envelope() {
            agent.seen.record(envelope.clone());
        }
        ctx.forward(EventDirection::Down).await?;
        Ok(())
    })
}

impl Agent for Forwarder {
    type State = ();
    type Config = ();
    type StateEvent = NullStateEvent;

    fn configure(handlers: &mut HandlerSet<Self>) {
        handlers.handles::<ChatMessage>("forwarder_on_chat", forwarder_on_chat);
    }
}

/// Polls until `cond` holds, failing the test after ~2 seconds
pub async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Grace period for in-flight deliveries to land (or provably not land)
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}
