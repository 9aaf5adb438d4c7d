//! Runtime backend seam
//!
//! A backend supplies the execution substrate an actor needs: the stream
//! registry, a subscription manager honoring the retry/health semantics,
//! and (through the runtime's actor registry) the glue that lands an
//! addressed envelope on a mailbox. The in-process backend here is the
//! reference; a lightweight local-actor runtime or a clustered
//! virtual-actor runtime implement the same seam with their own transport.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::streams::registry::StreamRegistry;
use crate::streams::subscription::{SubscriptionManager, SubscriptionPolicy};

/// Execution substrate required by actors
pub trait RuntimeBackend: Send + Sync + 'static {
    /// The per-agent stream registry
    fn streams(&self) -> Arc<StreamRegistry>;

    /// The subscription manager over those streams
    fn subscriptions(&self) -> Arc<SubscriptionManager>;
}

/// Reference backend: everything lives in this process
pub struct InProcessBackend {
    streams: Arc<StreamRegistry>,
    subscriptions: Arc<SubscriptionManager>,
}

impl std::fmt::Debug for InProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessBackend").finish_non_exhaustive()
    }
}

impl InProcessBackend {
    /// Creates the backend from the runtime configuration
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        let streams = Arc::new(StreamRegistry::from_config(config));
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&streams),
            SubscriptionPolicy::from_config(config),
        ));
        Self {
            streams,
            subscriptions,
        }
    }
}

impl RuntimeBackend for InProcessBackend {
    fn streams(&self) -> Arc<StreamRegistry> {
        Arc::clone(&self.streams)
    }

    fn subscriptions(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.subscriptions)
    }
}
