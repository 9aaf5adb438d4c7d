//! Hierarchical event routing
//!
//! Parent/child relations live in an id-only [`HierarchyStore`]; the
//! [`EventRouter`] resolves a publish direction against it and emits onto
//! per-agent streams, applying loop, hop, and stop guards.

pub mod hierarchy;
pub mod router;

pub use hierarchy::{HierarchyError, HierarchyNode, HierarchyStore};
pub use router::{EventRouter, RouteReport};
