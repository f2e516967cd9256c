use std::sync::Arc;

use tracing::info;

use crate::context::RoutingContext;
use crate::search::{RawEdgeTraversal, RawRoute};
use crate::{Coordinate, Direction, Length, RoadId, RoadSegment, TurnType};

/// Number of low bits of a segment id that do not belong to the road id.
pub const SHIFT_ID: u32 = 6;

/// A maximal run of the route along a single road, in a single direction.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSegmentResult {
    pub road: Arc<RoadSegment>,
    pub start_point: usize,
    /// Smaller than the start point when the road is travelled backward.
    pub end_point: usize,
    pub distance: Length,
    /// Travel time in seconds, including the turn penalty paid at the start of the segment.
    pub time: f64,
    /// None when the segment just continues the previous one.
    pub turn_type: Option<TurnType>,
    pub description: String,
}

impl RouteSegmentResult {
    pub fn road_id(&self) -> RoadId {
        self.road.id
    }

    pub const fn is_forward(&self) -> bool {
        self.end_point >= self.start_point
    }

    pub const fn direction(&self) -> Direction {
        if self.is_forward() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// Composite identifier of the travelled road, start point and direction.
    pub fn segment_id(&self) -> u64 {
        (self.road.id.0 << SHIFT_ID)
            | ((self.start_point as u64 & 0x1f) << 1)
            | u64::from(self.is_forward())
    }

    pub fn start_coordinate(&self) -> Coordinate {
        self.road.points[self.start_point]
    }

    pub fn end_coordinate(&self) -> Coordinate {
        self.road.points[self.end_point]
    }
}

pub const fn road_id_from_segment_id(segment_id: u64) -> RoadId {
    RoadId(segment_id >> SHIFT_ID)
}

/// Converts the raw edge chain into segment results: merges the consecutive edges travelled on
/// the same road in the same direction, then annotates every segment with its maneuver.
pub fn prepare_result(raw: &RawRoute, ctx: &mut RoutingContext) -> Vec<RouteSegmentResult> {
    let mut results: Vec<RouteSegmentResult> = vec![];

    for traversal in &raw.traversals {
        if let Some(last) = results.last_mut()
            && can_merge(last, traversal)
        {
            last.end_point = traversal.end;
            last.time += traversal.time + traversal.turn_cost;
            continue;
        }

        results.push(RouteSegmentResult {
            road: traversal.road.clone(),
            start_point: traversal.start,
            end_point: traversal.end,
            distance: Length::ZERO,
            time: traversal.time + traversal.turn_cost,
            turn_type: None,
            description: String::new(),
        });
    }

    for result in &mut results {
        result.distance = result.road.length_between(result.start_point, result.end_point);
    }

    for index in 0..results.len() {
        let turn_type = turn_type(&results, index, ctx);
        let result = &mut results[index];
        result.turn_type = turn_type;
        result.description = describe(index, result);
    }

    if ctx.config().print_route_information {
        print_route_information(&results);
    }

    results
}

fn can_merge(last: &RouteSegmentResult, traversal: &RawEdgeTraversal) -> bool {
    last.road.id == traversal.road.id
        && last.end_point == traversal.start
        && last.direction() == traversal.direction()
        && traversal.turn_cost == 0.0
}

fn turn_type(
    results: &[RouteSegmentResult],
    index: usize,
    ctx: &mut RoutingContext,
) -> Option<TurnType> {
    let current = &results[index];
    let Some(previous) = index.checked_sub(1).map(|i| &results[i]) else {
        return Some(TurnType::Straight);
    };

    match (previous.road.roundabout, current.road.roundabout) {
        (false, true) => {
            let exit = roundabout_exit(&results[index..], ctx);
            return Some(TurnType::EnterRoundabout { exit });
        }
        (true, true) => return None,
        (true, false) => return Some(TurnType::ExitRoundabout),
        (false, false) => (),
    }

    let incoming = previous.road.bearing_into(previous.end_point, previous.direction());
    let outgoing = current.road.bearing_from(current.start_point, current.direction());
    let turn = match (incoming, outgoing) {
        (Some(incoming), Some(outgoing)) => {
            TurnType::from_bearings(incoming, outgoing, ctx.left_side_navigation)
        }
        // degenerate geometry
        _ => TurnType::Straight,
    };

    if turn == TurnType::Straight && ctx.degree(&current.start_coordinate()) <= 2 {
        None
    } else {
        Some(turn)
    }
}

/// Counts the exits met along the ring, up to (and including) the one the route takes.
fn roundabout_exit(results: &[RouteSegmentResult], ctx: &mut RoutingContext) -> usize {
    let mut exit = 0;

    for result in results.iter().take_while(|result| result.road.roundabout) {
        let points = if result.is_forward() {
            (result.start_point + 1..=result.end_point).collect::<Vec<_>>()
        } else {
            (result.end_point..result.start_point).rev().collect()
        };

        for point in points {
            let coordinate = result.road.points[point];
            // an arm only counts if the vehicle can drive away from the ring on it
            let has_exit = ctx.connections(&coordinate).iter().any(|(road, point)| {
                !road.roundabout
                    && ctx.config().is_traversable(road)
                    && Direction::BOTH
                        .into_iter()
                        .any(|d| road.allows(d) && d.step(*point, road.len()).is_some())
            });
            if has_exit {
                exit += 1;
            }
        }
    }

    exit.max(1)
}

fn describe(index: usize, result: &RouteSegmentResult) -> String {
    let name = result.road.display_name();

    match (index, result.turn_type) {
        (0, _) => match name {
            Some(name) => format!("Head along {name}"),
            None => "Head along the road".to_string(),
        },
        (_, Some(turn)) => turn.describe(name),
        (_, None) => match name {
            Some(name) => format!("Continue along {name}"),
            None => "Continue".to_string(),
        },
    }
}

fn print_route_information(results: &[RouteSegmentResult]) {
    let distance: Length = results.iter().map(|r| r.distance).sum();
    let time: f64 = results.iter().map(|r| r.time).sum();
    info!(
        "Route: {} segments, {:.0}m, {:.1}s",
        results.len(),
        distance.meters(),
        time
    );

    for result in results {
        info!(
            "  {:?} [{} -> {}] {:.0}m {:.1}s {:?}: {}",
            result.road.id,
            result.start_point,
            result.end_point,
            result.distance.meters(),
            result.time,
            result.turn_type,
            result.description
        );
    }
}
