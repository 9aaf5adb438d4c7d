//! Message streams and subscriptions
//!
//! Every agent owns one multicast [`EventStream`]; actors subscribe to
//! their own stream and to their parent's. The [`SubscriptionManager`]
//! wraps raw stream attachment with retry, health checking, pause/resume,
//! and reconnection so the same lifecycle works across runtime backends.

pub mod registry;
pub mod stream;
pub mod subscription;

pub use registry::StreamRegistry;
pub use stream::{EventSink, EventStream, FnSink, SinkError, StreamError, StreamSubscription};
pub use subscription::{
    SubscriptionError, SubscriptionHandle, SubscriptionManager, SubscriptionPolicy,
    SubscriptionState,
};
