//! Parent/child bookkeeping for iterations
//!
//! A forest stored as `parent -> [children]`. Children keep insertion
//! order. Depth limits are enforced by the repository before it adds a
//! child, not here.

use std::collections::BTreeMap;

use super::error::{EngineError, EngineResult};
use super::ids::IterationId;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationGraph {
    connections: BTreeMap<u64, Vec<u64>>,
}

impl IterationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> &BTreeMap<u64, Vec<u64>> {
        &self.connections
    }

    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn add_root(&mut self, id: u64) -> EngineResult<()> {
        if self.contains(id) {
            return Err(EngineError::DuplicateIteration(IterationId::Real(id)));
        }
        self.connections.insert(id, Vec::new());
        Ok(())
    }

    pub fn add_child(&mut self, parent: u64, child: u64) -> EngineResult<()> {
        if self.contains(child) {
            return Err(EngineError::DuplicateIteration(IterationId::Real(child)));
        }
        let children = self
            .connections
            .get_mut(&parent)
            .ok_or(EngineError::UnknownIteration(IterationId::Real(parent)))?;
        children.push(child);
        self.connections.insert(child, Vec::new());
        Ok(())
    }

    /// Remove `id` and its whole subtree; returns the removed ids, pre-order.
    pub fn remove(&mut self, id: u64) -> EngineResult<Vec<u64>> {
        if !self.contains(id) {
            return Err(EngineError::UnknownIteration(IterationId::Real(id)));
        }
        let mut removed = vec![id];
        removed.extend(self.get_descendants(id));
        if let Some(parent) = self.get_parent(id) {
            if let Some(children) = self.connections.get_mut(&parent) {
                children.retain(|&c| c != id);
            }
        }
        for node in &removed {
            self.connections.remove(node);
        }
        Ok(removed)
    }

    pub fn get_parent(&self, id: u64) -> Option<u64> {
        self.connections
            .iter()
            .find(|(_, children)| children.contains(&id))
            .map(|(&parent, _)| parent)
    }

    pub fn get_children(&self, id: u64) -> &[u64] {
        self.connections.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Roots have depth 1
    pub fn iteration_depth(&self, id: u64) -> usize {
        match self.get_parent(id) {
            Some(parent) => 1 + self.iteration_depth(parent),
            None => 1,
        }
    }

    /// Ancestors from the root down to the direct parent
    pub fn get_ancestors(&self, id: u64) -> Vec<u64> {
        match self.get_parent(id) {
            Some(parent) => {
                let mut ancestors = self.get_ancestors(parent);
                ancestors.push(parent);
                ancestors
            }
            None => Vec::new(),
        }
    }

    /// Every node below `id`, pre-order
    pub fn get_descendants(&self, id: u64) -> Vec<u64> {
        let mut descendants = Vec::new();
        for &child in self.get_children(id) {
            descendants.push(child);
            descendants.extend(self.get_descendants(child));
        }
        descendants
    }

    pub fn is_root(&self, id: u64) -> bool {
        self.contains(id) && self.get_parent(id).is_none()
    }

    pub fn is_leaf(&self, id: u64) -> bool {
        self.contains(id) && self.get_children(id).is_empty()
    }

    pub fn get_root_iter_id(&self, id: u64) -> u64 {
        self.get_ancestors(id).first().copied().unwrap_or(id)
    }

    pub fn roots(&self) -> Vec<u64> {
        self.connections
            .keys()
            .copied()
            .filter(|&id| self.get_parent(id).is_none())
            .collect()
    }
}
