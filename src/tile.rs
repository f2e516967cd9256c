//! Road graph tiles: spatially bounded, independently loadable chunks of the road network.

use std::f64::consts::PI;
use std::mem::size_of;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::{BoundingBox, Coordinate, PointKey, RoadId, RoadSegment, TurnRestriction};

pub mod codec;
pub mod source;
pub mod store;

const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Deepest zoom level supported by the tiling.
pub const MAX_ZOOM: u8 = 24;

/// Identifies a tile of the slippy map tiling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub const fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Gets the key of the tile that contains the coordinate at the given zoom.
    pub fn from_coordinate(coordinate: &Coordinate, zoom: u8) -> Self {
        let n = f64::from(1u32 << zoom);
        let max = (1u32 << zoom) - 1;

        let lat = coordinate.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = ((coordinate.lon + 180.0) / 360.0 * n).floor();
        let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n).floor();

        Self {
            zoom,
            x: (x.max(0.0) as u32).min(max),
            y: (y.max(0.0) as u32).min(max),
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        let n = f64::from(1u32 << self.zoom);
        let lon = |x: f64| x / n * 360.0 - 180.0;
        let lat = |y: f64| (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();

        BoundingBox::new(
            Coordinate::new(lon(f64::from(self.x)), lat(f64::from(self.y + 1))),
            Coordinate::new(lon(f64::from(self.x + 1)), lat(f64::from(self.y))),
        )
    }

    /// Gets all the keys of the tiles that intersect the bounding box.
    pub fn covering(bbox: &BoundingBox, zoom: u8) -> impl Iterator<Item = Self> {
        let top_left = Self::from_coordinate(&Coordinate::new(bbox.min.lon, bbox.max.lat), zoom);
        let bottom_right =
            Self::from_coordinate(&Coordinate::new(bbox.max.lon, bbox.min.lat), zoom);

        (top_left.y..=bottom_right.y)
            .flat_map(move |y| (top_left.x..=bottom_right.x).map(move |x| Self::new(zoom, x, y)))
    }

    /// Whether the zoom is supported and the column and row exist at that zoom.
    pub const fn is_valid(&self) -> bool {
        self.zoom <= MAX_ZOOM && self.x >> self.zoom == 0 && self.y >> self.zoom == 0
    }
}

/// A road end at a shared point: the road and the index of the point in its polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoadPoint {
    pub road: RoadId,
    pub point: usize,
}

/// All the roads having at least one vertex inside the tile, plus the index of the points
/// (inside the tile) shared by two or more road ends.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadGraphTile {
    key: TileKey,
    roads: Vec<Arc<RoadSegment>>,
    by_id: FxHashMap<RoadId, usize>,
    intersections: FxHashMap<PointKey, Vec<RoadPoint>>,
    memory_size: usize,
}

impl RoadGraphTile {
    pub fn new(key: TileKey, roads: impl IntoIterator<Item = Arc<RoadSegment>>) -> Self {
        let mut tile = Self {
            key,
            roads: vec![],
            by_id: FxHashMap::default(),
            intersections: FxHashMap::default(),
            memory_size: size_of::<Self>(),
        };

        for road in roads {
            tile.insert(road);
        }

        tile.intersections.retain(|_, ends| ends.len() > 1);
        for ends in tile.intersections.values_mut() {
            // deterministic expansion order
            ends.sort();
        }

        let entry_size = size_of::<PointKey>() + size_of::<Vec<RoadPoint>>();
        let ends: usize = tile.intersections.values().map(Vec::len).sum();
        tile.memory_size +=
            tile.intersections.len() * entry_size + ends * size_of::<RoadPoint>();
        tile
    }

    pub fn empty(key: TileKey) -> Self {
        Self::new(key, [])
    }

    /// Inserts the road unless a road with the same id is already part of the tile.
    fn insert(&mut self, road: Arc<RoadSegment>) {
        if self.by_id.contains_key(&road.id) {
            return;
        }

        for (point, coordinate) in road.points.iter().enumerate() {
            if TileKey::from_coordinate(coordinate, self.key.zoom) == self.key {
                self.intersections
                    .entry(coordinate.point_key())
                    .or_default()
                    .push(RoadPoint {
                        road: road.id,
                        point,
                    });
            }
        }

        self.memory_size += road_memory_size(&road);
        self.by_id.insert(road.id, self.roads.len());
        self.roads.push(road);
    }

    /// Combines the roads of several partial tiles of the same key.
    pub fn merge(key: TileKey, tiles: impl IntoIterator<Item = Self>) -> Self {
        Self::new(key, tiles.into_iter().flat_map(|tile| tile.roads))
    }

    pub const fn key(&self) -> TileKey {
        self.key
    }

    pub fn roads(&self) -> &[Arc<RoadSegment>] {
        &self.roads
    }

    pub fn road(&self, id: RoadId) -> Option<&Arc<RoadSegment>> {
        self.by_id.get(&id).map(|&index| &self.roads[index])
    }

    /// Gets the road ends that meet at the coordinate, empty if the point is not an
    /// intersection of this tile.
    pub fn connections(&self, coordinate: &Coordinate) -> &[RoadPoint] {
        self.intersections
            .get(&coordinate.point_key())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn intersections_count(&self) -> usize {
        self.intersections.len()
    }

    /// Estimated number of bytes the tile holds in memory.
    pub const fn memory_size(&self) -> usize {
        self.memory_size
    }

    pub fn is_empty(&self) -> bool {
        self.roads.is_empty()
    }
}

fn road_memory_size(road: &RoadSegment) -> usize {
    size_of::<RoadSegment>()
        + size_of::<Arc<RoadSegment>>()
        + road.points.len() * size_of::<Coordinate>()
        + road.restrictions.len() * size_of::<TurnRestriction>()
        + road.name.as_ref().map_or(0, String::len)
        + size_of::<(RoadId, usize)>()
}
