use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lru::LruCache;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::tile::source::TileSource;
use crate::tile::store::RoadGraphStore;
use crate::tile::{RoadGraphTile, TileKey};
use crate::{
    BoundingBox, Coordinate, Length, RoadId, RoadSegment, RoutingConfiguration, SearchError,
    StoreError,
};

/// Number of visited segments between two progress notifications.
const PROGRESS_INTERVAL: usize = 1000;

/// Trade-off between the route optimality and the search speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CalculationMode {
    /// Exact A*: the route has the minimal cost.
    #[default]
    Normal,
    /// The heuristic is inflated by the configured coefficient: the search visits fewer
    /// segments and the route cost is at most the coefficient times the optimal one.
    Fast,
}

/// Snapshot of the state of a route calculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalculationProgress {
    /// Distance from the start of the farthest segment settled by the forward search.
    pub distance_from_begin: Length,
    /// Distance from the end of the farthest segment settled by the backward search.
    pub distance_from_end: Length,
    /// Distance between the start and the end of the current leg.
    pub total_estimated_distance: Length,
    pub direct_queue_size: usize,
    pub reverse_queue_size: usize,
    pub visited_segments: usize,
    pub loaded_tiles: usize,
    pub unloaded_tiles: usize,
    /// Index of the leg being computed.
    pub iteration: usize,
    pub total_iterations: usize,
}

impl CalculationProgress {
    /// Estimated completion of the whole calculation, in percent.
    pub fn linear_progress(&self) -> f64 {
        let total_iterations = self.total_iterations.max(1) as f64;
        let leg = if self.total_estimated_distance.is_zero() {
            0.0
        } else {
            ((self.distance_from_begin + self.distance_from_end).meters()
                / self.total_estimated_distance.meters())
            .clamp(0.0, 1.0)
        };

        (100.0 * (self.iteration as f64 + leg) / total_iterations).min(100.0)
    }

    /// Moves the progress to the next leg of the calculation.
    pub fn next_iteration(&mut self) {
        self.iteration += 1;
        self.distance_from_begin = Length::ZERO;
        self.distance_from_end = Length::ZERO;
        self.direct_queue_size = 0;
        self.reverse_queue_size = 0;
    }
}

pub type ProgressListener = Box<dyn FnMut(&CalculationProgress) + Send>;

/// Tiles pinned by the search, least recently used first.
struct WorkingSet {
    pinned: LruCache<TileKey, Arc<RoadGraphTile>>,
    pinned_bytes: usize,
    open_nodes: FxHashMap<TileKey, usize>,
    failed: FxHashSet<TileKey>,
    budget: usize,
}

/// State of a search session: the configuration, the shared tile store, the tiles pinned by
/// the search and the caller hooks (cancellation and progress).
pub struct RoutingContext {
    config: Arc<RoutingConfiguration>,
    store: Arc<RoadGraphStore>,
    pub mode: CalculationMode,
    /// Traffic keeps to the left side of the road.
    pub left_side_navigation: bool,
    cancelled: Arc<AtomicBool>,
    pub progress: CalculationProgress,
    listener: Option<ProgressListener>,
    working_set: WorkingSet,
}

impl fmt::Debug for RoutingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingContext")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("left_side_navigation", &self.left_side_navigation)
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress)
            .field("pinned_tiles", &self.working_set.pinned.len())
            .finish_non_exhaustive()
    }
}

impl RoutingContext {
    pub fn new(
        config: Arc<RoutingConfiguration>,
        store: Arc<RoadGraphStore>,
        mode: CalculationMode,
    ) -> Self {
        let budget = config.memory_limit;

        Self {
            config,
            store,
            mode,
            left_side_navigation: false,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: CalculationProgress::default(),
            listener: None,
            working_set: WorkingSet {
                pinned: LruCache::unbounded(),
                pinned_bytes: 0,
                open_nodes: FxHashMap::default(),
                failed: FxHashSet::default(),
                budget,
            },
        }
    }

    /// Creates a context with its own store over the sources.
    pub fn build(
        config: Arc<RoutingConfiguration>,
        sources: Vec<Arc<dyn TileSource>>,
        mode: CalculationMode,
    ) -> Result<Self, SearchError> {
        if let Some(source) = sources.iter().find(|s| s.zoom() != config.tile_zoom) {
            return Err(StoreError::ZoomMismatch {
                expected: config.tile_zoom,
                found: source.zoom(),
            }
            .into());
        }

        let store = RoadGraphStore::new(sources, config.memory_limit)?;
        Ok(Self::new(config, Arc::new(store), mode))
    }

    pub fn config(&self) -> &RoutingConfiguration {
        &self.config
    }

    pub fn store(&self) -> &Arc<RoadGraphStore> {
        &self.store
    }

    pub fn with_left_side_navigation(mut self, left_side_navigation: bool) -> Self {
        self.left_side_navigation = left_side_navigation;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Gets a flag that cancels the search when set, usable from any thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn set_progress_listener(
        &mut self,
        listener: impl FnMut(&CalculationProgress) + Send + 'static,
    ) {
        self.listener = Some(Box::new(listener));
    }

    pub(crate) fn notify_progress(&mut self, force: bool) {
        if (force || self.progress.visited_segments % PROGRESS_INTERVAL == 0)
            && let Some(listener) = self.listener.as_mut()
        {
            listener(&self.progress);
        }
    }

    pub fn zoom(&self) -> u8 {
        self.store.zoom()
    }

    /// Bytes of road graph tiles the search is allowed to keep pinned.
    pub const fn memory_budget(&self) -> usize {
        self.working_set.budget
    }

    pub fn pinned_tiles(&self) -> usize {
        self.working_set.pinned.len()
    }

    pub const fn pinned_bytes(&self) -> usize {
        self.working_set.pinned_bytes
    }

    /// Raises the memory budget so that all the tiles between the points (plus a ring of
    /// neighbours) fit in it. The configured limit is a floor, never a cap on a feasible search.
    pub fn reserve_working_set(&mut self, start: &Coordinate, end: &Coordinate) {
        let zoom = self.zoom();
        let bbox = BoundingBox::new(*start, *start).including(end);
        let top_left =
            TileKey::from_coordinate(&Coordinate::new(bbox.min.lon, bbox.max.lat), zoom);
        let bottom_right =
            TileKey::from_coordinate(&Coordinate::new(bbox.max.lon, bbox.min.lat), zoom);

        let columns = (bottom_right.x - top_left.x) as usize + 3;
        let rows = (bottom_right.y - top_left.y) as usize + 3;
        let required = columns
            .saturating_mul(rows)
            .saturating_mul(self.config.tile_size_estimate);

        if required > self.working_set.budget {
            debug!(
                "Raising working set budget from {} to {required} bytes",
                self.working_set.budget
            );
            self.working_set.budget = required;
        }
    }

    /// Gets the tile, pinning it in the store. A tile that cannot be loaded is considered
    /// roadless for the rest of the session.
    pub fn tile(&mut self, key: TileKey) -> Arc<RoadGraphTile> {
        if let Some(tile) = self.working_set.pinned.get(&key) {
            return tile.clone();
        }
        if self.working_set.failed.contains(&key) {
            return Arc::new(RoadGraphTile::empty(key));
        }

        match self.store.acquire(key) {
            Ok(tile) => {
                self.working_set.pinned_bytes += tile.memory_size();
                self.working_set.pinned.put(key, tile.clone());
                self.progress.loaded_tiles += 1;
                self.unload_unused_tiles();
                tile
            }
            Err(error) => {
                warn!("Tile {key:?} cannot be loaded, considering it empty: {error}");
                self.working_set.failed.insert(key);
                Arc::new(RoadGraphTile::empty(key))
            }
        }
    }

    /// Gets the tile containing the coordinate.
    pub fn tile_of(&mut self, coordinate: &Coordinate) -> Arc<RoadGraphTile> {
        let key = TileKey::from_coordinate(coordinate, self.zoom());
        self.tile(key)
    }

    /// Gets the road from the tile, reloading the tile if it has been unpinned.
    pub fn road(&mut self, key: TileKey, id: RoadId) -> Option<Arc<RoadSegment>> {
        self.tile(key).road(id).cloned()
    }

    /// Gets the road ends meeting at the coordinate.
    pub fn connections(&mut self, coordinate: &Coordinate) -> Vec<(Arc<RoadSegment>, usize)> {
        let tile = self.tile_of(coordinate);
        tile.connections(coordinate)
            .iter()
            .filter_map(|end| tile.road(end.road).map(|road| (road.clone(), end.point)))
            .collect()
    }

    /// Number of branches leaving the coordinate: a road passing through the point counts
    /// twice, a road ending on it once. Points that are not intersections count as 2.
    pub fn degree(&mut self, coordinate: &Coordinate) -> usize {
        let tile = self.tile_of(coordinate);
        let ends = tile.connections(coordinate);
        if ends.is_empty() {
            return 2;
        }

        ends.iter()
            .filter_map(|end| {
                let road = tile.road(end.road)?;
                Some(usize::from(end.point > 0) + usize::from(end.point + 1 < road.len()))
            })
            .sum()
    }

    /// Records a search node waiting in a queue on the tile: the tile stays pinned.
    pub(crate) fn open_node(&mut self, key: TileKey) {
        *self.working_set.open_nodes.entry(key).or_default() += 1;
    }

    pub(crate) fn close_node(&mut self, key: TileKey) {
        if let Some(count) = self.working_set.open_nodes.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.working_set.open_nodes.remove(&key);
            }
        }
    }

    /// Forgets the open nodes of a finished search.
    pub(crate) fn clear_open_nodes(&mut self) {
        self.working_set.open_nodes.clear();
    }

    /// Unpins, least recently used first, the tiles without open nodes until the pinned
    /// tiles fit in the budget. The most recently used tile is always kept.
    pub fn unload_unused_tiles(&mut self) -> usize {
        let mut unloaded = 0;

        while self.working_set.pinned_bytes > self.working_set.budget {
            let Some(key) = self
                .working_set
                .pinned
                .iter()
                .rev()
                .take(self.working_set.pinned.len().saturating_sub(1))
                .find(|(key, _)| !self.working_set.open_nodes.contains_key(key))
                .map(|(key, _)| *key)
            else {
                break;
            };

            if let Some(tile) = self.working_set.pinned.pop(&key) {
                self.working_set.pinned_bytes -= tile.memory_size();
                self.store.release(key);
                self.progress.unloaded_tiles += 1;
                unloaded += 1;
            }
        }

        if unloaded > 0 {
            debug!(
                "Unloaded {unloaded} tiles, {} pinned bytes left",
                self.working_set.pinned_bytes
            );
        }

        unloaded
    }

    /// Heuristic estimate of the time needed to travel between the coordinates.
    pub fn heuristic(&self, from: &Coordinate, to: &Coordinate) -> f64 {
        let estimate = self.config.min_travel_time(from.distance_to(to));
        match self.mode {
            CalculationMode::Normal => estimate,
            CalculationMode::Fast => estimate * self.config.heuristic_coefficient,
        }
    }

    /// Unpins all the tiles of the session.
    pub fn release_all(&mut self) {
        while let Some((key, _)) = self.working_set.pinned.pop_lru() {
            self.store.release(key);
        }
        self.working_set.pinned_bytes = 0;
        self.working_set.open_nodes.clear();
    }
}

impl Drop for RoutingContext {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;
    use crate::tile::source::MemoryTileSource;
    use crate::tile::tests::{NETWORK_ZOOM, collinear_network, grid_network, memory_source};
    use crate::{ConfigError, VehicleProfile};

    fn config(memory_limit: usize) -> Arc<RoutingConfiguration> {
        Arc::new(
            RoutingConfiguration::build(
                VehicleProfile::Car,
                memory_limit,
                [("tile_size_estimate", "1000")],
            )
            .unwrap(),
        )
    }

    #[test]
    fn routing_context_tiles_001() {
        let source = memory_source(collinear_network());
        let store = Arc::new(RoadGraphStore::new(vec![source], 0).unwrap());
        let mut ctx =
            RoutingContext::new(config(usize::MAX), store.clone(), CalculationMode::Normal);

        let tile = ctx.tile_of(&Coordinate::new(13.4, 52.5));
        assert_eq!(tile.roads().len(), 4);
        assert_eq!(ctx.pinned_tiles(), 1);
        assert_eq!(store.total_pins(), 1);

        // cached in the working set
        ctx.tile_of(&Coordinate::new(13.401, 52.5));
        assert_eq!(store.total_pins(), 1);
        assert_eq!(ctx.progress.loaded_tiles, 1);

        let ends = ctx.connections(&Coordinate::new(13.402, 52.5));
        let ids: Vec<_> = ends.iter().map(|(road, point)| (road.id, *point)).collect();
        assert_eq!(ids, vec![(RoadId(2), 1), (RoadId(3), 0), (RoadId(10), 0)]);
        assert_eq!(ctx.degree(&Coordinate::new(13.4005, 52.5)), 2);
        assert_eq!(ctx.degree(&Coordinate::new(13.401, 52.5)), 2);
        assert_eq!(ctx.degree(&Coordinate::new(13.402, 52.5)), 3);

        drop(ctx);
        assert_eq!(store.total_pins(), 0);
        assert!(store.is_empty());
        assert_eq!(store.stats().ref_underflows, 0);
    }

    #[test]
    fn routing_context_unload_unused_tiles_001() {
        let source = memory_source(grid_network(3, 0.01));
        let store = Arc::new(RoadGraphStore::new(vec![source], 0).unwrap());
        let mut ctx = RoutingContext::new(config(4000), store.clone(), CalculationMode::Normal);

        let keys: Vec<_> = (0..3)
            .map(|column| Coordinate::new(13.4 + 0.01 * column as f64, 52.5))
            .map(|coordinate| TileKey::from_coordinate(&coordinate, NETWORK_ZOOM))
            .collect();

        let tile_size = ctx.tile(keys[0]).memory_size();
        ctx.working_set.budget = tile_size * 2;
        ctx.open_node(keys[0]);
        ctx.tile(keys[1]);
        ctx.tile(keys[2]);

        // keys[1] has no open node and is the least recently used candidate
        assert_eq!(ctx.pinned_tiles(), 2);
        assert_eq!(store.pins(keys[0]), 1);
        assert_eq!(store.pins(keys[1]), 0);
        assert_eq!(ctx.progress.unloaded_tiles, 1);

        // reloaded on demand
        assert_eq!(ctx.tile(keys[1]).roads().len(), 2);
        ctx.close_node(keys[0]);
        ctx.release_all();
        assert_eq!(store.total_pins(), 0);
    }

    #[test]
    fn routing_context_failed_tile_001() {
        let key = TileKey::from_coordinate(&Coordinate::new(13.4, 52.5), NETWORK_ZOOM);
        let mut source = MemoryTileSource::new(NETWORK_ZOOM);
        source.insert_raw(key, vec![0; 16]);

        let sources: Vec<Arc<dyn TileSource>> = vec![Arc::new(source)];
        let mut ctx =
            RoutingContext::build(config(usize::MAX), sources, CalculationMode::Normal).unwrap();
        assert!(ctx.tile(key).is_empty());
        assert!(ctx.tile(key).is_empty());
        assert_eq!(ctx.store().stats().failures, 1);
    }

    #[test]
    fn routing_context_build_001() {
        let result = RoutingContext::build(
            config(usize::MAX),
            vec![Arc::new(MemoryTileSource::new(12))],
            CalculationMode::Fast,
        );
        assert_eq!(
            result.err(),
            Some(SearchError::Store(StoreError::ZoomMismatch {
                expected: 16,
                found: 12
            }))
        );

        assert_eq!(
            RoutingConfiguration::build(VehicleProfile::Car, 10, [("tile_size_estimate", "1000")]),
            Err(ConfigError::InsufficientMemoryBudget {
                limit: 10,
                required: 4000
            })
        );
    }

    #[test]
    fn routing_context_reserve_working_set_001() {
        let mut ctx = RoutingContext::build(config(4000), vec![], CalculationMode::Normal).unwrap();
        assert_eq!(ctx.memory_budget(), 4000);

        let start = Coordinate::new(13.4, 52.5);
        ctx.reserve_working_set(&start, &start);
        assert_eq!(ctx.memory_budget(), 9000);

        ctx.reserve_working_set(&start, &Coordinate::new(13.42, 52.5));
        assert!(ctx.memory_budget() > 9000);
        // only the budget is raised, nothing gets loaded or pinned
        assert_eq!(ctx.pinned_tiles(), 0);
        assert_eq!(ctx.progress.loaded_tiles, 0);
    }

    #[test]
    fn routing_context_cancel_and_progress_001() {
        let mut ctx =
            RoutingContext::build(config(usize::MAX), vec![], CalculationMode::Fast).unwrap();
        let handle = ctx.cancel_handle();
        assert!(!ctx.is_cancelled());
        handle.store(true, Ordering::Relaxed);
        assert!(ctx.is_cancelled());

        let notified = Arc::new(Mutex::new(vec![]));
        let sink = notified.clone();
        ctx.set_progress_listener(move |progress| {
            sink.lock().unwrap().push(progress.linear_progress());
        });

        ctx.progress.total_iterations = 2;
        ctx.progress.total_estimated_distance = Length::from_meters(100.0);
        ctx.progress.distance_from_begin = Length::from_meters(30.0);
        ctx.progress.distance_from_end = Length::from_meters(20.0);
        ctx.notify_progress(true);
        ctx.progress.next_iteration();
        ctx.notify_progress(true);

        let notified = notified.lock().unwrap();
        assert_eq!(notified.len(), 2);
        assert_relative_eq!(notified[0], 25.0);
        assert_relative_eq!(notified[1], 50.0);

        let start = Coordinate::new(13.4, 52.5);
        let end = Coordinate::new(13.401, 52.5);
        assert_relative_eq!(
            ctx.heuristic(&start, &end),
            1.5 * start.distance_to(&end).meters() / (110.0 / 3.6)
        );
    }
}
