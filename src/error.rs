//! Umbrella error type for Arbor operations
//!
//! Every subsystem defines its own error enum; this type folds them for
//! callers that want a single `Result` type at the application boundary.

use thiserror::Error;

use crate::actor::cell::ActorError;
use crate::agent::base::ActivationError;
use crate::agent::context::PublishError;
use crate::agent::handler::HandlerError;
use crate::agent::state::StateAccessError;
use crate::config::ConfigError;
use crate::routing::hierarchy::HierarchyError;
use crate::runtime::factory::{LinkError, SpawnError};
use crate::serialization::CodecError;
use crate::sourcing::SourcingError;
use crate::store::{EventStoreError, StoreError};
use crate::streams::stream::StreamError;
use crate::streams::subscription::SubscriptionError;

/// Any failure the framework can raise
#[derive(Debug, Error)]
pub enum ArborError {
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("routing hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("state access error: {0}")]
    StateAccess(#[from] StateAccessError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("event sourcing error: {0}")]
    Sourcing(#[from] SourcingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("spawn error: {0}")]
    Spawn(#[from] SpawnError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
