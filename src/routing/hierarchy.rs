//! Agent hierarchy as an id-only relation store
//!
//! Relations are stored as ids and resolved at routing time; actors never
//! hold direct references to each other, which keeps the graph free of
//! shared mutable pointers.

use dashmap::DashMap;
use thiserror::Error;

use crate::domain_types::AgentId;

/// Hierarchy constraint violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("agent {agent_id} cannot be its own parent or child")]
    SelfReference { agent_id: AgentId },
}

/// Per-agent hierarchy record: optional parent plus ordered-unique children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyNode {
    /// Parent agent, if any
    pub parent: Option<AgentId>,
    /// Children in insertion order, duplicate-free
    pub children: Vec<AgentId>,
}

/// Concurrent store of hierarchy nodes.
///
/// Self-references are rejected; duplicate child additions and removals of
/// absent children are no-ops. Deeper cycle prevention is the caller's
/// responsibility, as the store never walks the graph.
#[derive(Debug, Default)]
pub struct HierarchyStore {
    nodes: DashMap<AgentId, HierarchyNode>,
}

impl HierarchyStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `parent` as the parent of `child`, returning the prior parent
    pub fn set_parent(
        &self,
        child: AgentId,
        parent: AgentId,
    ) -> Result<Option<AgentId>, HierarchyError> {
        if child == parent {
            return Err(HierarchyError::SelfReference { agent_id: child });
        }
        let mut node = self.nodes.entry(child).or_default();
        Ok(node.parent.replace(parent))
    }

    /// Forgets the parent of `child`, returning it if one was set
    pub fn clear_parent(&self, child: AgentId) -> Option<AgentId> {
        self.nodes.get_mut(&child).and_then(|mut node| node.parent.take())
    }

    /// Appends `child` to `parent`'s child list.
    ///
    /// Returns `false` (a no-op) when the child is already present.
    pub fn add_child(&self, parent: AgentId, child: AgentId) -> Result<bool, HierarchyError> {
        if child == parent {
            return Err(HierarchyError::SelfReference { agent_id: parent });
        }
        let mut node = self.nodes.entry(parent).or_default();
        if node.children.contains(&child) {
            return Ok(false);
        }
        node.children.push(child);
        Ok(true)
    }

    /// Removes `child` from `parent`'s child list.
    ///
    /// Returns `false` (a no-op) when the child was absent.
    pub fn remove_child(&self, parent: AgentId, child: AgentId) -> bool {
        let Some(mut node) = self.nodes.get_mut(&parent) else {
            return false;
        };
        let before = node.children.len();
        node.children.retain(|c| *c != child);
        node.children.len() != before
    }

    /// The parent of `agent_id`, if any
    #[must_use]
    pub fn parent_of(&self, agent_id: AgentId) -> Option<AgentId> {
        self.nodes.get(&agent_id).and_then(|node| node.parent)
    }

    /// The children of `agent_id`, in insertion order
    #[must_use]
    pub fn children_of(&self, agent_id: AgentId) -> Vec<AgentId> {
        self.nodes
            .get(&agent_id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// A copy of the full node for `agent_id`
    #[must_use]
    pub fn node(&self, agent_id: AgentId) -> HierarchyNode {
        self.nodes
            .get(&agent_id)
            .map(|node| node.clone())
            .unwrap_or_default()
    }

    /// Detaches `agent_id` entirely: clears its node and removes it from
    /// its parent's child list. Used on despawn.
    pub fn detach(&self, agent_id: AgentId) {
        let parent = self.parent_of(agent_id);
        self.nodes.remove(&agent_id);
        if let Some(parent) = parent {
            self.remove_child(parent, agent_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_parent_rejects_self() {
        let store = HierarchyStore::new();
        let a = AgentId::generate();
        assert_eq!(
            store.set_parent(a, a),
            Err(HierarchyError::SelfReference { agent_id: a })
        );
    }

    #[test]
    fn set_parent_returns_prior_parent() {
        let store = HierarchyStore::new();
        let (child, p1, p2) = (AgentId::generate(), AgentId::generate(), AgentId::generate());
        assert_eq!(store.set_parent(child, p1).unwrap(), None);
        assert_eq!(store.set_parent(child, p2).unwrap(), Some(p1));
        assert_eq!(store.parent_of(child), Some(p2));
    }

    #[test]
    fn duplicate_add_child_is_a_noop() {
        let store = HierarchyStore::new();
        let (parent, child) = (AgentId::generate(), AgentId::generate());
        assert!(store.add_child(parent, child).unwrap());
        assert!(!store.add_child(parent, child).unwrap());
        assert_eq!(store.children_of(parent), vec![child]);
    }

    #[test]
    fn removing_absent_child_is_a_noop() {
        let store = HierarchyStore::new();
        let (parent, child) = (AgentId::generate(), AgentId::generate());
        assert!(!store.remove_child(parent, child));
        store.add_child(parent, child).unwrap();
        assert!(store.remove_child(parent, child));
        assert!(store.children_of(parent).is_empty());
    }

    #[test]
    fn children_keep_insertion_order() {
        let store = HierarchyStore::new();
        let parent = AgentId::generate();
        let kids: Vec<AgentId> = (0..4).map(|_| AgentId::generate()).collect();
        for kid in &kids {
            store.add_child(parent, *kid).unwrap();
        }
        assert_eq!(store.children_of(parent), kids);
    }

    #[test]
    fn detach_clears_node_and_parent_link() {
        let store = HierarchyStore::new();
        let (parent, child) = (AgentId::generate(), AgentId::generate());
        store.add_child(parent, child).unwrap();
        store.set_parent(child, parent).unwrap();

        store.detach(child);
        assert_eq!(store.parent_of(child), None);
        assert!(store.children_of(parent).is_empty());
    }
}
