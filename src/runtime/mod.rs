//! Runtime assembly: backend seam, factory, and actor manager

pub mod backend;
pub mod factory;

pub use backend::{InProcessBackend, RuntimeBackend};
pub use factory::{AgentRef, AgentRuntime, LinkError, RuntimeBuilder, SpawnError};
