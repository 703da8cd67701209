//! Ephemeron edge table and weak map bookkeeping.
//!
//! An ephemeron edge `source -> (color, target)` records that `target` becomes
//! reachable at `min(color, color of source)` once `source` is marked. Weak map
//! traversal adds `key -> (map color, value)` and `delegate -> (map color, key)`
//! edges. During weak marking every newly marked cell is looked up here.

use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use crate::{
    cell::{CellId, MarkColor},
    error::{AllocError, AllocResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EphemeronEdge {
    pub color: MarkColor,
    pub target: CellId,
}

pub struct EphemeronEdgeTable {
    edges: HashMap<CellId, Vec<EphemeronEdge>>,
    /// Total number of edges across all sources
    edge_count: usize,
    /// Simulated capacity. Adding an edge beyond it is an allocation failure.
    max_edges: Option<usize>,
}

impl EphemeronEdgeTable {
    pub fn new(max_edges: Option<usize>) -> EphemeronEdgeTable {
        EphemeronEdgeTable {
            edges: HashMap::new(),
            edge_count: 0,
            max_edges,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    #[inline]
    pub fn contains(&self, source: CellId) -> bool {
        self.edges.contains_key(&source)
    }

    pub fn get(&self, source: CellId) -> Option<&[EphemeronEdge]> {
        self.edges.get(&source).map(Vec::as_slice)
    }

    /// Append an edge to the source's list, preserving insertion order.
    pub fn add_edge(&mut self, source: CellId, edge: EphemeronEdge) -> AllocResult<()> {
        self.reserve(1)?;
        self.edges.try_reserve(1).map_err(|_| AllocError)?;

        let list = self.edges.entry(source).or_default();
        list.try_reserve(1).map_err(|_| AllocError)?;
        list.push(edge);
        self.edge_count += 1;

        Ok(())
    }

    /// Remove and return the edges of a source.
    pub fn take(&mut self, source: CellId) -> Option<Vec<EphemeronEdge>> {
        let edges = self.edges.remove(&source)?;
        self.edge_count -= edges.len();
        Some(edges)
    }

    /// Put back edges previously returned by `take`. Edges added to the same
    /// source in the meantime are kept after them.
    pub fn restore(&mut self, source: CellId, mut edges: Vec<EphemeronEdge>) -> AllocResult<()> {
        if edges.is_empty() {
            return Ok(());
        }

        self.reserve(edges.len())?;
        self.edges.try_reserve(1).map_err(|_| AllocError)?;

        let count = edges.len();
        match self.edges.get_mut(&source) {
            Some(added) => {
                edges.try_reserve(added.len()).map_err(|_| AllocError)?;
                edges.append(added);
                *added = edges;
            }
            None => {
                self.edges.insert(source, edges);
            }
        }
        self.edge_count += count;

        Ok(())
    }

    /// Remove every edge from `source` to `target`, returning how many were removed.
    pub fn remove_targeting(&mut self, source: CellId, target: CellId) -> usize {
        let Some(list) = self.edges.get_mut(&source) else {
            return 0;
        };

        let before = list.len();
        list.retain(|edge| edge.target != target);
        let removed = before - list.len();
        if list.is_empty() {
            self.edges.remove(&source);
        }

        self.edge_count -= removed;
        removed
    }

    /// All sources with at least one edge, in ascending id order.
    pub fn sources(&self) -> Vec<CellId> {
        let mut sources: Vec<CellId> = self.edges.keys().copied().collect();
        sources.sort_unstable();
        sources
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.edge_count = 0;
    }

    pub fn set_max_edges(&mut self, max_edges: Option<usize>) {
        self.max_edges = max_edges;
    }

    #[inline]
    fn reserve(&self, additional: usize) -> AllocResult<()> {
        match self.max_edges {
            Some(max) if self.edge_count + additional > max => Err(AllocError),
            _ => Ok(()),
        }
    }
}

/// Weak maps seen during this collection, in first-seen order.
#[derive(Default)]
pub struct WeakMapList {
    maps: Vec<CellId>,
    seen: HashSet<CellId>,
}

impl WeakMapList {
    pub fn new() -> WeakMapList {
        WeakMapList::default()
    }

    /// Record a weak map. Returns false if it was already recorded.
    pub fn insert(&mut self, map: CellId) -> bool {
        if !self.seen.insert(map) {
            return false;
        }
        self.maps.push(map);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<CellId> {
        self.maps.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = CellId> + '_ {
        self.maps.iter().copied()
    }

    pub fn clear(&mut self) {
        self.maps.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(color: MarkColor, target: usize) -> EphemeronEdge {
        EphemeronEdge {
            color,
            target: CellId::new(target),
        }
    }

    #[test]
    fn test_edges_keep_insertion_order() {
        let mut table = EphemeronEdgeTable::new(None);
        let key = CellId::new(1);

        table.add_edge(key, edge(MarkColor::Black, 10)).unwrap();
        table.add_edge(key, edge(MarkColor::Gray, 11)).unwrap();
        table.add_edge(CellId::new(2), edge(MarkColor::Black, 12)).unwrap();

        assert_eq!(table.edge_count(), 3);
        assert_eq!(
            table.get(key),
            Some(&[edge(MarkColor::Black, 10), edge(MarkColor::Gray, 11)][..])
        );
        assert_eq!(table.sources(), [CellId::new(1), CellId::new(2)]);
    }

    #[test]
    fn test_take_and_restore_merges_new_edges() {
        let mut table = EphemeronEdgeTable::new(None);
        let key = CellId::new(1);
        table.add_edge(key, edge(MarkColor::Black, 10)).unwrap();

        let taken = table.take(key).unwrap();
        assert!(!table.contains(key));
        assert_eq!(table.edge_count(), 0);

        table.add_edge(key, edge(MarkColor::Black, 20)).unwrap();
        table.restore(key, taken).unwrap();

        assert_eq!(
            table.get(key),
            Some(&[edge(MarkColor::Black, 10), edge(MarkColor::Black, 20)][..])
        );
        assert_eq!(table.edge_count(), 2);
    }

    #[test]
    fn test_remove_targeting() {
        let mut table = EphemeronEdgeTable::new(None);
        let delegate = CellId::new(5);
        table.add_edge(delegate, edge(MarkColor::Black, 1)).unwrap();
        table.add_edge(delegate, edge(MarkColor::Gray, 2)).unwrap();
        table.add_edge(delegate, edge(MarkColor::Black, 1)).unwrap();

        assert_eq!(table.remove_targeting(delegate, CellId::new(1)), 2);
        assert_eq!(table.get(delegate), Some(&[edge(MarkColor::Gray, 2)][..]));
        assert_eq!(table.remove_targeting(delegate, CellId::new(2)), 1);
        assert!(table.is_empty());
        assert_eq!(table.edge_count(), 0);
    }

    #[test]
    fn test_max_edges_is_an_allocation_failure() {
        let mut table = EphemeronEdgeTable::new(Some(1));
        table.add_edge(CellId::new(1), edge(MarkColor::Black, 2)).unwrap();
        assert_eq!(
            table.add_edge(CellId::new(1), edge(MarkColor::Black, 3)),
            Err(AllocError)
        );
        assert_eq!(table.edge_count(), 1);
    }

    #[test]
    fn test_weak_map_list_dedupes() {
        let mut list = WeakMapList::new();
        assert!(list.insert(CellId::new(4)));
        assert!(list.insert(CellId::new(2)));
        assert!(!list.insert(CellId::new(4)));
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().collect::<Vec<_>>(), [CellId::new(4), CellId::new(2)]);
    }
}
