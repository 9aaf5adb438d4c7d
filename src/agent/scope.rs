//! Ambient mutation scopes
//!
//! State and config reassignment is only legal inside the initialization
//! scope (activation) or an event-handler scope. The current scope rides on
//! a tokio task-local, so it follows the agent's work across await points
//! without any parameter threading.

use std::future::Future;

/// Which mutation scope, if any, the current task is inside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateScope {
    /// Outside any scope; state writes are rejected
    #[default]
    None,
    /// Inside `on_activate`; state writes allowed
    Initialization,
    /// Inside an event handler; state writes allowed
    EventHandler,
}

tokio::task_local! {
    static CURRENT_SCOPE: StateScope;
}

/// The scope the calling task is currently inside
#[must_use]
pub fn current_scope() -> StateScope {
    CURRENT_SCOPE.try_with(|scope| *scope).unwrap_or_default()
}

/// Whether state reassignment is currently permitted
#[must_use]
pub fn in_mutation_scope() -> bool {
    current_scope() != StateScope::None
}

/// Runs a future inside the given scope
pub async fn enter<F: Future>(scope: StateScope, fut: F) -> F::Output {
    CURRENT_SCOPE.scope(scope, fut).await
}
