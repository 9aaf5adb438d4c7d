//! Synthetic event published when a user handler fails
//!
//! Dispatch recovers handler failures locally; the failure is then made
//! observable to the rest of the hierarchy by publishing this event upward
//! on the agent's outbound channel.

use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};

use crate::agent::handler::HandlerError;
use crate::domain_types::AgentId;
use crate::serialization::DomainEvent;

/// Payload describing a recovered handler failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerExceptionEvent {
    /// Agent whose handler failed
    pub agent_id: AgentId,
    /// Name of the failing handler
    pub handler_name: String,
    /// Stable label of the failure kind
    pub error_kind: String,
    /// Human-readable failure message
    pub message: String,
    /// Captured backtrace, best-effort (requires `RUST_BACKTRACE`)
    pub backtrace: Option<String>,
}

impl DomainEvent for HandlerExceptionEvent {
    fn event_type() -> &'static str {
        "arbor.handler_exception"
    }
}

impl HandlerExceptionEvent {
    /// Builds the event from a recovered failure, capturing a backtrace
    /// when the environment enables one
    #[must_use]
    pub fn from_failure(agent_id: AgentId, handler_name: &str, error: &HandlerError) -> Self {
        let backtrace = Backtrace::capture();
        let backtrace = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self {
            agent_id,
            handler_name: handler_name.to_string(),
            error_kind: error.kind().to_string(),
            message: error.to_string(),
            backtrace,
        }
    }
}
