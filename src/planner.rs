//! The planner computes a route between two points over a tiled road graph.
//!
//! 1. Bind the configuration and the tile sources into a routing context.
//! 2. Raise the working set budget to cover the tiles between the endpoints of each leg.
//! 3. Snap the start, end and transit points on the closest traversable roads, at the nearer
//!    vertex of the closest edge.
//! 4. Run a bidirectional A* search for each leg, loading tiles on demand.
//! 5. Reconstruct the cheapest chain of edge traversals from both search frontiers.
//! 6. Merge the traversals into road segments and annotate them with turn instructions.

use std::sync::Arc;

use tracing::debug;

use crate::context::{CalculationMode, RoutingContext};
use crate::result::{RouteSegmentResult, prepare_result};
use crate::search::search_route as search_raw_route;
use crate::tile::source::TileSource;
use crate::{Coordinate, Length, RoutingConfiguration, SearchError};

/// A prepared route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub segments: Vec<RouteSegmentResult>,
    /// Search cost in seconds, turn penalties included.
    pub cost: f64,
    pub distance: Length,
}

impl Route {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of the segment travel times in seconds.
    pub fn time(&self) -> f64 {
        self.segments.iter().map(|segment| segment.time).sum()
    }
}

/// Computes the route from the start to the end (through the transit point if any) over the
/// roads read from the sources.
pub fn search_route(
    config: RoutingConfiguration,
    sources: Vec<Arc<dyn TileSource>>,
    start: Coordinate,
    end: Coordinate,
    transit: Option<Coordinate>,
) -> Result<Vec<RouteSegmentResult>, SearchError> {
    let mut ctx = RoutingContext::build(Arc::new(config), sources, CalculationMode::Normal)?;
    let route = plan_route(&mut ctx, start, end, transit)?;
    Ok(route.segments)
}

/// Computes the route with an existing context. The context can be reused for several
/// searches sharing the same tiles.
pub fn plan_route(
    ctx: &mut RoutingContext,
    start: Coordinate,
    end: Coordinate,
    transit: Option<Coordinate>,
) -> Result<Route, SearchError> {
    debug!("Planning route {start:?} -> {end:?} (transit: {transit:?})");

    let raw = search_raw_route(ctx, start, end, transit)?;
    let segments = prepare_result(&raw, ctx);
    let distance: Length = segments.iter().map(|segment| segment.distance).sum();

    ctx.unload_unused_tiles();
    debug!(
        "Route found: {} segments, {:.0}m, cost {:.1}s, {} tiles pinned",
        segments.len(),
        distance.meters(),
        raw.cost,
        ctx.pinned_tiles()
    );

    Ok(Route {
        segments,
        cost: raw.cost,
        distance,
    })
}
