//! Bidirectional A* over the tiled road graph.
//!
//! A search state is a vehicle standing on a road vertex and oriented along the road. States
//! are connected by two kinds of transitions:
//! - along: moving to the next vertex of the same road, paying the travel time of the edge;
//! - turn: moving onto another road meeting at the same (quantized) point, paying the turn
//!   cost given by the bearing change.
//!
//! Turns are only taken from states reached along a road, therefore turn restrictions, which
//! are keyed on the incoming and outgoing roads, cannot be bypassed by chaining turns.

pub mod node;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::RoutingContext;
use crate::search::node::{Entry, Frontier, NodeHandle, SearchNode, StateKey};
use crate::tile::TileKey;
use crate::{AbortReason, Coordinate, Direction, RoadSegment, SearchError, TurnType};

/// One polyline edge (or a run of edges of the same road) travelled by the route.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEdgeTraversal {
    pub road: Arc<RoadSegment>,
    /// Tile containing the start vertex.
    pub tile: TileKey,
    pub start: usize,
    pub end: usize,
    /// Travel time in seconds.
    pub time: f64,
    /// Turn penalty in seconds paid before entering the edge.
    pub turn_cost: f64,
}

impl RawEdgeTraversal {
    pub fn direction(&self) -> Direction {
        if self.end >= self.start {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// Chain of edge traversals from the start to the end of the route, with its total cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRoute {
    pub traversals: Vec<RawEdgeTraversal>,
    /// Cost in seconds: the sum of the traversal times and turn costs.
    pub cost: f64,
}

/// A route end point snapped on the road network.
#[derive(Debug, Clone)]
struct SnappedPoint {
    coordinate: Coordinate,
    /// Road ends meeting at the snapped vertex.
    ends: Vec<(Arc<RoadSegment>, usize)>,
}

/// Searches the cheapest route from the start to the end, through the transit point if any.
/// With a transit point the two legs are searched independently.
pub fn search_route(
    ctx: &mut RoutingContext,
    start: Coordinate,
    end: Coordinate,
    transit: Option<Coordinate>,
) -> Result<RawRoute, SearchError> {
    let waypoints: Vec<Coordinate> =
        [Some(start), transit, Some(end)].into_iter().flatten().collect();

    ctx.progress.total_iterations = waypoints.len() - 1;
    ctx.progress.iteration = 0;

    let mut route = RawRoute::default();
    for (leg, points) in waypoints.windows(2).enumerate() {
        if leg > 0 {
            ctx.progress.next_iteration();
        }

        let raw = search_leg(ctx, &points[0], &points[1])?;
        route.cost += raw.cost;
        route.traversals.extend(raw.traversals);
    }

    Ok(route)
}

fn search_leg(
    ctx: &mut RoutingContext,
    start: &Coordinate,
    end: &Coordinate,
) -> Result<RawRoute, SearchError> {
    ctx.reserve_working_set(start, end);

    let start = snap(ctx, start)?;
    let end = snap(ctx, end)?;
    debug!("Searching route {:?} -> {:?}", start.coordinate, end.coordinate);

    ctx.progress.total_estimated_distance = start.coordinate.distance_to(&end.coordinate);

    if start.coordinate.point_key() == end.coordinate.point_key() {
        return Ok(RawRoute::default());
    }

    let result = BidirectionalSearch::new(ctx, &start, &end).and_then(BidirectionalSearch::run);
    ctx.clear_open_nodes();
    ctx.notify_progress(true);
    result
}

/// Snaps the coordinate on the closest road the vehicle can use, at the nearer end of the road
/// edge passing closest to it.
fn snap(ctx: &mut RoutingContext, coordinate: &Coordinate) -> Result<SnappedPoint, SearchError> {
    let max_distance = ctx.config().max_snap_distance;

    let nearest = ctx
        .store()
        .segments_near(coordinate, max_distance)
        .into_iter()
        .find(|(road, _)| ctx.config().is_traversable(road));
    let Some((road, distance)) = nearest else {
        return Err(SearchError::NoRoadNearby(*coordinate));
    };
    let Some((edge, _)) = road.closest_edge(coordinate) else {
        return Err(SearchError::NoRoadNearby(*coordinate));
    };

    let (first, second) = (road.points[edge], road.points[edge + 1]);
    let (index, vertex) = if coordinate.distance_to(&first) <= coordinate.distance_to(&second) {
        (edge, first)
    } else {
        (edge + 1, second)
    };
    debug!(
        "Snapped {coordinate:?} on road {:?} point {index} ({:.1}m off the road)",
        road.id,
        distance.meters()
    );

    let mut ends: Vec<_> = ctx
        .connections(&vertex)
        .into_iter()
        .filter(|(road, _)| ctx.config().is_traversable(road))
        .collect();
    if ends.is_empty() {
        ends.push((road, index));
    }

    Ok(SnappedPoint {
        coordinate: vertex,
        ends,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Meeting {
    cost: f64,
    forward: NodeHandle,
    backward: NodeHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Forward,
    Backward,
}

struct BidirectionalSearch<'a> {
    ctx: &'a mut RoutingContext,
    forward: Frontier,
    backward: Frontier,
    meeting: Option<Meeting>,
    start: Coordinate,
    end: Coordinate,
}

impl<'a> BidirectionalSearch<'a> {
    fn new(
        ctx: &'a mut RoutingContext,
        start: &SnappedPoint,
        end: &SnappedPoint,
    ) -> Result<Self, SearchError> {
        let mut search = Self {
            ctx,
            forward: Frontier::new(end.coordinate),
            backward: Frontier::new(start.coordinate),
            meeting: None,
            start: start.coordinate,
            end: end.coordinate,
        };

        // the vehicle starts on any road end at the start vertex, heading where it can go
        for (road, point) in &start.ends {
            for direction in Direction::BOTH {
                if road.allows(direction) && direction.step(*point, road.len()).is_some() {
                    let key = StateKey {
                        road: road.id,
                        point: *point,
                        direction,
                        entry: Entry::Along,
                    };
                    search.relax(Side::Forward, key, road, start.coordinate, 0.0, None, false)?;
                }
            }
        }

        // and it can stop on any road end at the end vertex, however it got there
        for (road, point) in &end.ends {
            for direction in Direction::BOTH.into_iter().filter(|d| road.allows(*d)) {
                for entry in [Entry::Along, Entry::Turn] {
                    let key = StateKey {
                        road: road.id,
                        point: *point,
                        direction,
                        entry,
                    };
                    search.relax(Side::Backward, key, road, end.coordinate, 0.0, None, false)?;
                }
            }
        }

        Ok(search)
    }

    fn frontier(&self, side: Side) -> &Frontier {
        match side {
            Side::Forward => &self.forward,
            Side::Backward => &self.backward,
        }
    }

    fn run(mut self) -> Result<RawRoute, SearchError> {
        let max_visited = self.ctx.config().max_visited_segments;
        let max_cost = self.ctx.config().max_cost;
        let mut visited = 0;

        loop {
            if self.ctx.is_cancelled() {
                debug!("Search cancelled after {visited} visited segments");
                return Err(SearchError::SearchAborted(AbortReason::Cancelled));
            }

            let forward_min = self.forward.min_estimate(self.ctx);
            let backward_min = self.backward.min_estimate(self.ctx);
            let (Some(forward_min), Some(backward_min)) = (forward_min, backward_min) else {
                // one side has been exhausted: no other route can be found
                break;
            };
            if let Some(meeting) = self.meeting
                && (forward_min >= meeting.cost || backward_min >= meeting.cost)
            {
                break;
            }

            let side = if self.forward.queue_len() <= self.backward.queue_len() {
                Side::Forward
            } else {
                Side::Backward
            };

            let frontier = match side {
                Side::Forward => &mut self.forward,
                Side::Backward => &mut self.backward,
            };
            let Some(handle) = frontier.pop(self.ctx) else {
                continue;
            };
            let node = frontier.node(handle).clone();

            visited += 1;
            if visited > max_visited || node.cost > max_cost {
                debug!("Search limit reached after {visited} visited segments");
                return Err(SearchError::SearchAborted(AbortReason::Limit));
            }

            self.update_progress(side, &node);

            let expanded = match side {
                Side::Forward => self.expand_forward(handle, &node),
                Side::Backward => self.expand_backward(handle, &node),
            };
            self.ctx.close_node(node.tile);
            expanded?;
        }

        let Some(meeting) = self.meeting else {
            debug!("No route found after {visited} visited segments");
            return Err(SearchError::NoRouteFound);
        };

        debug!(
            "Route found with cost {:.1}s after {visited} visited segments ({} + {} settled)",
            meeting.cost,
            self.forward.settled_len(),
            self.backward.settled_len()
        );
        self.reconstruct(meeting)
    }

    fn update_progress(&mut self, side: Side, node: &SearchNode) {
        let progress = &mut self.ctx.progress;
        progress.visited_segments += 1;
        progress.direct_queue_size = self.forward.queue_len();
        progress.reverse_queue_size = self.backward.queue_len();

        match side {
            Side::Forward => {
                let distance = self.start.distance_to(&node.coordinate);
                if distance > progress.distance_from_begin {
                    progress.distance_from_begin = distance;
                }
            }
            Side::Backward => {
                let distance = self.end.distance_to(&node.coordinate);
                if distance > progress.distance_from_end {
                    progress.distance_from_end = distance;
                }
            }
        }

        self.ctx.notify_progress(false);
    }

    /// Records the state as reached with the cost, if it improves the frontier, and checks
    /// whether the two frontiers meet on it.
    #[allow(clippy::too_many_arguments)]
    fn relax(
        &mut self,
        side: Side,
        key: StateKey,
        road: &RoadSegment,
        coordinate: Coordinate,
        cost: f64,
        parent: Option<NodeHandle>,
        class_change: bool,
    ) -> Result<(), SearchError> {
        if !self.frontier(side).improves(&key, cost) {
            return Ok(());
        }

        let node = SearchNode {
            key,
            tile: TileKey::from_coordinate(&coordinate, self.ctx.zoom()),
            coordinate,
            class: road.class,
            cost,
            parent,
        };

        let handle = match side {
            Side::Forward => self.forward.push(self.ctx, node, class_change)?,
            Side::Backward => self.backward.push(self.ctx, node, class_change)?,
        };

        let (other, (forward, backward)) = match side {
            Side::Forward => (&self.backward, (Some(handle), self.backward.best_handle(&key))),
            Side::Backward => (&self.forward, (self.forward.best_handle(&key), Some(handle))),
        };

        if let (Some(forward), Some(backward)) = (forward, backward)
            && let Some(reached) = other.best(&key)
        {
            let total = cost + reached.cost;
            if self.meeting.is_none_or(|meeting| total < meeting.cost) {
                self.meeting = Some(Meeting {
                    cost: total,
                    forward,
                    backward,
                });
            }
        }

        Ok(())
    }

    fn load_road(&mut self, node: &SearchNode) -> Option<Arc<RoadSegment>> {
        let road = self.ctx.road(node.tile, node.key.road);
        if road.is_none() {
            warn!("Road {:?} not found in tile {:?}", node.key.road, node.tile);
        }
        road
    }

    fn expand_forward(&mut self, handle: NodeHandle, node: &SearchNode) -> Result<(), SearchError> {
        let Some(road) = self.load_road(node) else {
            return Ok(());
        };
        let StateKey {
            point,
            direction,
            entry,
            ..
        } = node.key;

        if road.allows(direction)
            && let Some(next) = direction.step(point, road.len())
            && let Some(time) = self
                .ctx
                .config()
                .travel_time(&road, road.length_between(point, next))
        {
            let key = StateKey {
                road: road.id,
                point: next,
                direction,
                entry: Entry::Along,
            };
            let cost = node.cost + time;
            self.relax(Side::Forward, key, &road, road.points[next], cost, Some(handle), false)?;
        }

        if entry != Entry::Along {
            return Ok(());
        }

        for (other, other_point) in self.ctx.connections(&node.coordinate) {
            if other.id == road.id
                || !self.ctx.config().is_traversable(&other)
                || road.forbids_turn_into(other.id)
            {
                continue;
            }

            for other_direction in Direction::BOTH {
                if !other.allows(other_direction)
                    || other_direction.step(other_point, other.len()).is_none()
                {
                    continue;
                }

                let cost = turn_cost(
                    self.ctx,
                    &road,
                    point,
                    direction,
                    &other,
                    other_point,
                    other_direction,
                );
                let key = StateKey {
                    road: other.id,
                    point: other_point,
                    direction: other_direction,
                    entry: Entry::Turn,
                };
                let class_change = other.class != road.class;
                self.relax(
                    Side::Forward,
                    key,
                    &other,
                    node.coordinate,
                    node.cost + cost,
                    Some(handle),
                    class_change,
                )?;
            }
        }

        Ok(())
    }

    /// Expands the predecessors of the node: the states from which a forward transition
    /// reaches it.
    fn expand_backward(
        &mut self,
        handle: NodeHandle,
        node: &SearchNode,
    ) -> Result<(), SearchError> {
        let Some(road) = self.load_road(node) else {
            return Ok(());
        };
        let StateKey {
            point,
            direction,
            entry,
            ..
        } = node.key;

        match entry {
            Entry::Along => {
                if road.allows(direction)
                    && let Some(previous) = direction.reverse().step(point, road.len())
                    && let Some(time) = self
                        .ctx
                        .config()
                        .travel_time(&road, road.length_between(previous, point))
                {
                    for entry in [Entry::Along, Entry::Turn] {
                        let key = StateKey {
                            road: road.id,
                            point: previous,
                            direction,
                            entry,
                        };
                        let cost = node.cost + time;
                        self.relax(
                            Side::Backward,
                            key,
                            &road,
                            road.points[previous],
                            cost,
                            Some(handle),
                            false,
                        )?;
                    }
                }
            }
            Entry::Turn => {
                if !road.allows(direction)
                    || direction.step(point, road.len()).is_none()
                    || !self.ctx.config().is_traversable(&road)
                {
                    return Ok(());
                }

                for (other, other_point) in self.ctx.connections(&node.coordinate) {
                    if other.id == road.id
                        || !self.ctx.config().is_traversable(&other)
                        || other.forbids_turn_into(road.id)
                    {
                        continue;
                    }

                    let directions = Direction::BOTH.into_iter().filter(|d| other.allows(*d));
                    for other_direction in directions {
                        let cost = turn_cost(
                            self.ctx,
                            &other,
                            other_point,
                            other_direction,
                            &road,
                            point,
                            direction,
                        );
                        let key = StateKey {
                            road: other.id,
                            point: other_point,
                            direction: other_direction,
                            entry: Entry::Along,
                        };
                        let class_change = other.class != road.class;
                        self.relax(
                            Side::Backward,
                            key,
                            &other,
                            node.coordinate,
                            node.cost + cost,
                            Some(handle),
                            class_change,
                        )?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Joins the forward path to the meeting state with the backward path from it, then
    /// recomputes the cost of every transition.
    fn reconstruct(self, meeting: Meeting) -> Result<RawRoute, SearchError> {
        let mut states: Vec<SearchNode> = self
            .forward
            .path_to(meeting.forward)
            .into_iter()
            .cloned()
            .collect();
        let mut backward = self.backward.path_to(meeting.backward);
        // the backward path goes from the end to the meeting state
        backward.reverse();
        states.extend(backward.into_iter().skip(1).cloned());

        let ctx = self.ctx;
        let mut route = RawRoute::default();
        let mut pending_turn_cost = 0.0;

        for pair in states.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            let Some(road) = ctx.road(from.tile, from.key.road) else {
                return Err(SearchError::NoRouteFound);
            };

            let is_along = from.key.road == to.key.road
                && to.key.entry == Entry::Along
                && from.key.direction.step(from.key.point, road.len()) == Some(to.key.point);

            if is_along {
                let time = ctx
                    .config()
                    .travel_time(&road, road.length_between(from.key.point, to.key.point))
                    .unwrap_or_default();
                route.cost += time + pending_turn_cost;
                route.traversals.push(RawEdgeTraversal {
                    road,
                    tile: from.tile,
                    start: from.key.point,
                    end: to.key.point,
                    time,
                    turn_cost: pending_turn_cost,
                });
                pending_turn_cost = 0.0;
            } else {
                let Some(other) = ctx.road(to.tile, to.key.road) else {
                    return Err(SearchError::NoRouteFound);
                };
                pending_turn_cost += turn_cost(
                    ctx,
                    &road,
                    from.key.point,
                    from.key.direction,
                    &other,
                    to.key.point,
                    to.key.direction,
                );
            }
        }

        debug!(
            "Reconstructed {} edges, cost {:.1}s (search cost {:.1}s)",
            route.traversals.len(),
            route.cost,
            meeting.cost
        );
        Ok(route)
    }
}

/// Cost of turning from the road arriving at `from_point` in `from_direction` into the other
/// road leaving `to_point` in `to_direction`. Degenerate geometries cost nothing.
fn turn_cost(
    ctx: &RoutingContext,
    from: &RoadSegment,
    from_point: usize,
    from_direction: Direction,
    to: &RoadSegment,
    to_point: usize,
    to_direction: Direction,
) -> f64 {
    let incoming = from.bearing_into(from_point, from_direction);
    let outgoing = to.bearing_from(to_point, to_direction);

    match (incoming, outgoing) {
        (Some(incoming), Some(outgoing)) => {
            let turn = TurnType::from_bearings(incoming, outgoing, ctx.left_side_navigation);
            ctx.config().turn_cost(turn, ctx.left_side_navigation)
        }
        _ => 0.0,
    }
}
