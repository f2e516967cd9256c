#![doc = include_str!("../README.md")]

mod context;
mod error;
mod model;
mod planner;
mod profile;
mod result;
mod search;
mod tile;
mod turn;

pub use context::{CalculationMode, CalculationProgress, ProgressListener, RoutingContext};
pub use error::{AbortReason, ConfigError, SearchError, StoreError};
pub use model::{
    Bearing, BoundingBox, COORDINATE_PRECISION, Coordinate, Direction, Length, Oneway, PointKey,
    RestrictionKind, RoadClass, RoadId, RoadSegment, TurnRestriction,
};
pub use planner::{Route, plan_route, search_route};
pub use profile::{
    DEFAULT_TILE_SIZE_ESTIMATE, MIN_WORKING_SET_TILES, RoutingConfiguration, TurnCosts,
    VehicleProfile,
};
pub use result::{RouteSegmentResult, SHIFT_ID, prepare_result, road_id_from_segment_id};
pub use search::{RawEdgeTraversal, RawRoute, search_route as search_raw_route};
pub use tile::codec::{deserialize_tile, serialize_tile};
pub use tile::source::{DirectoryTileSource, MemoryTileSource, TileSource};
pub use tile::store::{DEFAULT_TILE_ZOOM, RoadGraphStore, StoreStats};
pub use tile::{MAX_ZOOM, RoadGraphTile, RoadPoint, TileKey};
pub use turn::TurnType;
