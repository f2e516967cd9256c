use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::tile::codec::deserialize_tile;
use crate::tile::source::TileSource;
use crate::tile::{RoadGraphTile, TileKey};
use crate::{BoundingBox, Coordinate, Length, RoadSegment, StoreError};

/// Zoom level used when the store has no source to take it from.
pub const DEFAULT_TILE_ZOOM: u8 = 16;

/// Counters describing the store activity since its creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Tiles read and parsed from the sources.
    pub loads: usize,
    /// Requests served from the cache.
    pub hits: usize,
    pub evictions: usize,
    /// Tiles that could not be read or parsed.
    pub failures: usize,
    /// Releases of tiles that were not pinned.
    pub ref_underflows: usize,
}

#[derive(Debug)]
struct CachedTile {
    tile: Arc<RoadGraphTile>,
    refs: usize,
}

#[derive(Debug)]
struct StoreCache {
    tiles: LruCache<TileKey, CachedTile>,
    resident: usize,
    stats: StoreStats,
}

/// Memory bounded cache of road graph tiles, shared by all the searches running on the same
/// map. Tiles pinned by a search are never evicted; unpinned tiles are dropped least recently
/// used first whenever the resident tiles exceed the capacity (in bytes).
#[derive(Debug)]
pub struct RoadGraphStore {
    sources: Vec<Arc<dyn TileSource>>,
    zoom: u8,
    capacity: usize,
    cache: Mutex<StoreCache>,
}

impl RoadGraphStore {
    /// Creates a store over the sources, which must all share the same zoom level.
    pub fn new(sources: Vec<Arc<dyn TileSource>>, capacity: usize) -> Result<Self, StoreError> {
        let zoom = sources.first().map_or(DEFAULT_TILE_ZOOM, |source| source.zoom());
        if let Some(source) = sources.iter().find(|source| source.zoom() != zoom) {
            return Err(StoreError::ZoomMismatch {
                expected: zoom,
                found: source.zoom(),
            });
        }

        Ok(Self {
            sources,
            zoom,
            capacity,
            cache: Mutex::new(StoreCache {
                tiles: LruCache::unbounded(),
                resident: 0,
                stats: StoreStats::default(),
            }),
        })
    }

    pub const fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Maximum number of bytes of unpinned tiles the store keeps resident.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Gets the tile, reading it from the sources if it is not cached.
    pub fn load_tile(&self, key: TileKey) -> Result<Arc<RoadGraphTile>, StoreError> {
        let mut cache = self.lock();
        let tile = self.load_locked(&mut cache, key)?;
        self.evict_locked(&mut cache);
        Ok(tile)
    }

    /// Gets the tile and pins it: the tile stays resident until it is released.
    pub fn acquire(&self, key: TileKey) -> Result<Arc<RoadGraphTile>, StoreError> {
        let mut cache = self.lock();
        let tile = self.load_locked(&mut cache, key)?;
        if let Some(cached) = cache.tiles.peek_mut(&key) {
            cached.refs += 1;
        }
        self.evict_locked(&mut cache);
        Ok(tile)
    }

    /// Unpins a tile previously acquired. Returns false (and records an underflow) if the
    /// tile was not pinned.
    pub fn release(&self, key: TileKey) -> bool {
        let mut cache = self.lock();

        match cache.tiles.peek_mut(&key) {
            Some(cached) if cached.refs > 0 => {
                cached.refs -= 1;
                self.evict_locked(&mut cache);
                true
            }
            _ => {
                cache.stats.ref_underflows += 1;
                warn!("Released tile {key:?} that was not pinned");
                false
            }
        }
    }

    /// Evicts unpinned tiles while the resident size exceeds the capacity.
    /// Returns the number of evicted tiles.
    pub fn evict_if_over_budget(&self) -> usize {
        let mut cache = self.lock();
        self.evict_locked(&mut cache)
    }

    /// Gets the roads passing within the radius from the point, closest first.
    /// Tiles that cannot be loaded are considered roadless.
    pub fn segments_near(
        &self,
        point: &Coordinate,
        radius: Length,
    ) -> Vec<(Arc<RoadSegment>, Length)> {
        let bbox = BoundingBox::new(*point, *point).expand(radius);

        let mut visited = FxHashSet::default();
        let mut segments = vec![];

        for key in TileKey::covering(&bbox, self.zoom) {
            let tile = match self.load_tile(key) {
                Ok(tile) => tile,
                Err(error) => {
                    warn!("Ignoring tile {key:?} while looking for roads: {error}");
                    continue;
                }
            };

            for road in tile.roads() {
                if visited.insert(road.id)
                    && let Some((_, distance)) = road.closest_edge(point)
                    && distance <= radius
                {
                    segments.push((road.clone(), distance));
                }
            }
        }

        segments.sort_by(|(a, da), (b, db)| {
            da.meters().total_cmp(&db.meters()).then_with(|| a.id.cmp(&b.id))
        });
        segments
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    /// Number of tiles currently resident.
    pub fn len(&self) -> usize {
        self.lock().tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated number of bytes of the resident tiles.
    pub fn resident_bytes(&self) -> usize {
        self.lock().resident
    }

    /// Gets how many times the tile is currently pinned.
    pub fn pins(&self, key: TileKey) -> usize {
        self.lock().tiles.peek(&key).map_or(0, |cached| cached.refs)
    }

    /// Total number of pins held on all the resident tiles.
    pub fn total_pins(&self) -> usize {
        self.lock().tiles.iter().map(|(_, cached)| cached.refs).sum()
    }

    fn lock(&self) -> MutexGuard<'_, StoreCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_locked(
        &self,
        cache: &mut StoreCache,
        key: TileKey,
    ) -> Result<Arc<RoadGraphTile>, StoreError> {
        if let Some(cached) = cache.tiles.get(&key) {
            let tile = cached.tile.clone();
            cache.stats.hits += 1;
            return Ok(tile);
        }

        let tile = match self.read_tile(key) {
            Ok(tile) => Arc::new(tile),
            Err(error) => {
                cache.stats.failures += 1;
                return Err(error);
            }
        };

        debug!(
            "Loaded tile {key:?}: {} roads, {} intersections, {} bytes",
            tile.roads().len(),
            tile.intersections_count(),
            tile.memory_size()
        );

        cache.stats.loads += 1;
        cache.resident += tile.memory_size();
        cache.tiles.put(
            key,
            CachedTile {
                tile: tile.clone(),
                refs: 0,
            },
        );

        Ok(tile)
    }

    /// Reads and merges the tile from all the sources covering it.
    fn read_tile(&self, key: TileKey) -> Result<RoadGraphTile, StoreError> {
        if key.zoom != self.zoom {
            return Err(StoreError::ZoomMismatch {
                expected: self.zoom,
                found: key.zoom,
            });
        }

        let region = key.bounds();
        let mut parts = vec![];

        for source in self.sources.iter().filter(|s| s.bounds().intersects(&region)) {
            if let Some(data) = source.read_tile(key)? {
                parts.push(deserialize_tile(&data, key, &region)?);
            }
        }

        Ok(match parts.len() {
            0 => RoadGraphTile::empty(key),
            1 => parts.remove(0),
            _ => RoadGraphTile::merge(key, parts),
        })
    }

    fn evict_locked(&self, cache: &mut StoreCache) -> usize {
        let mut evicted = 0;

        while cache.resident > self.capacity {
            // least recently used first
            let Some(key) = cache
                .tiles
                .iter()
                .rev()
                .find(|(_, cached)| cached.refs == 0)
                .map(|(key, _)| *key)
            else {
                break;
            };

            if let Some(cached) = cache.tiles.pop(&key) {
                cache.resident -= cached.tile.memory_size();
                cache.stats.evictions += 1;
                evicted += 1;
                debug!("Evicted tile {key:?}");
            }
        }

        evicted
    }
}
