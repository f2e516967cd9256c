use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::RoutingContext;
use crate::tile::TileKey;
use crate::{AbortReason, Coordinate, Direction, RoadClass, RoadId, SearchError};

/// How a search state has been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entry {
    /// By travelling along the road (or by starting on it).
    Along,
    /// By turning onto the road from another road meeting at the same point.
    Turn,
}

/// Identifies a search state: a vehicle standing on a road vertex, oriented along the road.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub road: RoadId,
    pub point: usize,
    pub direction: Direction,
    pub entry: Entry,
}

/// Index of a node in the arena of a search frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchNode {
    pub key: StateKey,
    /// Tile containing the node vertex (and therefore the node road).
    pub tile: TileKey,
    pub coordinate: Coordinate,
    pub class: RoadClass,
    /// Cost in seconds from the frontier origin.
    pub cost: f64,
    pub parent: Option<NodeHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapElement {
    /// Cost so far plus the estimated remaining cost.
    estimate: OrderedFloat<f64>,
    /// The node is on a road of a different class than its parent.
    class_change: bool,
    handle: NodeHandle,
}

// The priority queue depends on the implementation of the Ord trait.
// By default std::BinaryHeap is a max heap.
// Explicitly implement the trait so the queue becomes a min heap.
impl Ord for HeapElement {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .cmp(&self.estimate)
            .then_with(|| other.class_change.cmp(&self.class_change))
            // breaking ties in a deterministic way
            .then_with(|| other.handle.cmp(&self.handle))
    }
}

impl PartialOrd for HeapElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One side of the bidirectional search: an arena of nodes, the best node of each state, the
/// settled states and the queue of the nodes waiting to be expanded.
#[derive(Debug)]
pub struct Frontier {
    /// Point the heuristic estimates the remaining cost to.
    target: Coordinate,
    nodes: Vec<SearchNode>,
    best: FxHashMap<StateKey, NodeHandle>,
    settled: FxHashSet<StateKey>,
    queue: BinaryHeap<HeapElement>,
}

impl Frontier {
    pub fn new(target: Coordinate) -> Self {
        Self {
            target,
            nodes: vec![],
            best: FxHashMap::default(),
            settled: FxHashSet::default(),
            queue: BinaryHeap::new(),
        }
    }

    pub fn node(&self, handle: NodeHandle) -> &SearchNode {
        &self.nodes[handle.index()]
    }

    /// Gets the best node found so far for the state.
    pub fn best(&self, key: &StateKey) -> Option<&SearchNode> {
        self.best.get(key).map(|&handle| self.node(handle))
    }

    pub fn best_handle(&self, key: &StateKey) -> Option<NodeHandle> {
        self.best.get(key).copied()
    }

    pub fn is_settled(&self, key: &StateKey) -> bool {
        self.settled.contains(key)
    }

    /// Returns true if reaching the state with the cost improves the frontier.
    pub fn improves(&self, key: &StateKey, cost: f64) -> bool {
        !self.is_settled(key) && self.best(key).is_none_or(|node| cost < node.cost)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn settled_len(&self) -> usize {
        self.settled.len()
    }

    /// Adds the node to the arena and to the queue.
    pub fn push(
        &mut self,
        ctx: &mut RoutingContext,
        node: SearchNode,
        class_change: bool,
    ) -> Result<NodeHandle, SearchError> {
        let handle = u32::try_from(self.nodes.len())
            .map(NodeHandle)
            .map_err(|_| SearchError::SearchAborted(AbortReason::Limit))?;

        let estimate = node.cost + ctx.heuristic(&node.coordinate, &self.target);
        ctx.open_node(node.tile);

        self.best.insert(node.key, handle);
        self.queue.push(HeapElement {
            estimate: OrderedFloat(estimate),
            class_change,
            handle,
        });
        self.nodes.push(node);

        Ok(handle)
    }

    /// Gets the estimate of the best node waiting in the queue, discarding the outdated ones.
    pub fn min_estimate(&mut self, ctx: &mut RoutingContext) -> Option<f64> {
        while let Some(element) = self.queue.peek().copied() {
            if self.is_current(element.handle) {
                return Some(element.estimate.into_inner());
            }
            self.queue.pop();
            ctx.close_node(self.node(element.handle).tile);
        }
        None
    }

    /// Pops the best node and settles its state. The caller closes the node on the context
    /// once the node has been expanded.
    pub fn pop(&mut self, ctx: &mut RoutingContext) -> Option<NodeHandle> {
        while let Some(element) = self.queue.pop() {
            if self.is_current(element.handle) {
                self.settled.insert(self.node(element.handle).key);
                return Some(element.handle);
            }
            ctx.close_node(self.node(element.handle).tile);
        }
        None
    }

    fn is_current(&self, handle: NodeHandle) -> bool {
        let key = &self.node(handle).key;
        !self.settled.contains(key) && self.best.get(key) == Some(&handle)
    }

    /// Gets the nodes from the frontier origin to the node.
    pub fn path_to(&self, handle: NodeHandle) -> Vec<&SearchNode> {
        let mut path = vec![];
        let mut next = Some(handle);
        while let Some(handle) = next {
            let node = self.node(handle);
            path.push(node);
            next = node.parent;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use test_log::test;

    use super::*;
    use crate::context::CalculationMode;
    use crate::{RoutingConfiguration, VehicleProfile};

    fn context() -> RoutingContext {
        let config = RoutingConfiguration::build(
            VehicleProfile::Car,
            usize::MAX,
            std::iter::empty::<(&str, &str)>(),
        )
        .unwrap();
        RoutingContext::build(Arc::new(config), vec![], CalculationMode::Normal).unwrap()
    }

    fn node(road: u64, cost: f64, parent: Option<NodeHandle>) -> SearchNode {
        let coordinate = Coordinate::new(13.4, 52.5);
        SearchNode {
            key: StateKey {
                road: RoadId(road),
                point: 0,
                direction: Direction::Forward,
                entry: Entry::Along,
            },
            tile: TileKey::from_coordinate(&coordinate, 16),
            coordinate,
            class: RoadClass::Primary,
            cost,
            parent,
        }
    }

    #[test]
    fn frontier_queue_001() {
        let mut ctx = context();
        let mut frontier = Frontier::new(Coordinate::new(13.4, 52.5));

        let a = frontier.push(&mut ctx, node(1, 10.0, None), false).unwrap();
        let b = frontier.push(&mut ctx, node(2, 5.0, Some(a)), true).unwrap();
        let c = frontier.push(&mut ctx, node(3, 5.0, Some(a)), false).unwrap();
        assert!(frontier.improves(&node(1, 0.0, None).key, 9.0));
        assert!(!frontier.improves(&node(1, 0.0, None).key, 10.0));

        // same estimate: the node keeping the road class comes first
        assert_eq!(frontier.min_estimate(&mut ctx), Some(5.0));
        assert_eq!(frontier.pop(&mut ctx), Some(c));
        assert_eq!(frontier.pop(&mut ctx), Some(b));

        // outdated nodes are skipped
        let d = frontier.push(&mut ctx, node(1, 7.0, None), false).unwrap();
        assert_eq!(frontier.pop(&mut ctx), Some(d));
        assert_eq!(frontier.pop(&mut ctx), None);
        assert_eq!(frontier.settled_len(), 3);
        assert!(!frontier.improves(&node(1, 0.0, None).key, 1.0));

        let path: Vec<_> = frontier.path_to(b).iter().map(|n| n.key.road).collect();
        assert_eq!(path, vec![RoadId(1), RoadId(2)]);
    }

    #[test]
    fn heap_element_order_001() {
        let element = |estimate: f64, class_change, handle| HeapElement {
            estimate: OrderedFloat(estimate),
            class_change,
            handle: NodeHandle(handle),
        };

        let mut heap = BinaryHeap::from([
            element(2.0, false, 0),
            element(1.0, true, 1),
            element(1.0, false, 3),
            element(1.0, false, 2),
        ]);
        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|e| e.handle.0).collect();
        assert_eq!(order, vec![2, 3, 1, 0]);
    }
}
