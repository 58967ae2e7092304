//! Undirected relationship graph between records.

use colony_core::RecordId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct RelationGraph {
    edges: HashMap<RecordId, HashSet<RecordId>>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an undirected edge. Self-loops are ignored.
    pub fn link(&mut self, a: &RecordId, b: &RecordId) {
        if a == b {
            return;
        }
        self.edges.entry(a.clone()).or_default().insert(b.clone());
        self.edges.entry(b.clone()).or_default().insert(a.clone());
    }

    /// Drop a node and every edge touching it. Returns its former neighbours.
    pub fn remove(&mut self, id: &RecordId) -> Vec<RecordId> {
        let neighbours: Vec<RecordId> = self
            .edges
            .remove(id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for n in &neighbours {
            if let Some(set) = self.edges.get_mut(n) {
                set.remove(id);
                if set.is_empty() {
                    self.edges.remove(n);
                }
            }
        }
        neighbours
    }

    /// Neighbours of `id`, sorted for stable output.
    pub fn neighbours(&self, id: &RecordId) -> Vec<RecordId> {
        let mut out: Vec<RecordId> = self
            .edges
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.edges.contains_key(id)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum::<usize>() / 2
    }
}
