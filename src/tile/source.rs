//! Providers of binary tiles.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::tile::{MAX_ZOOM, TileKey};
use crate::tile::codec::serialize_tile;
use crate::{BoundingBox, RoadSegment, StoreError};

const TILE_EXTENSION: &str = "rgt";

/// A map data source split in binary tiles of a single zoom level.
/// Should be implemented by whatever holds the map the planner runs on.
pub trait TileSource: Debug + Send + Sync {
    /// Gets the area covered by the source.
    fn bounds(&self) -> BoundingBox;

    /// Gets the zoom level of the tiles provided by the source.
    fn zoom(&self) -> u8;

    /// Gets the keys of the tiles the source holds that intersect the bounding box.
    fn tile_keys(&self, bbox: &BoundingBox) -> Vec<TileKey>;

    /// Reads the binary tile, returns None if the source has no data for it.
    fn read_tile(&self, key: TileKey) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Tiles held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTileSource {
    zoom: u8,
    bounds: BoundingBox,
    tiles: BTreeMap<TileKey, Vec<u8>>,
}

impl MemoryTileSource {
    pub fn new(zoom: u8) -> Self {
        Self {
            zoom,
            ..Default::default()
        }
    }

    /// Tiles the roads: every road is written in each tile that contains one of its vertices.
    pub fn from_roads(
        zoom: u8,
        roads: impl IntoIterator<Item = RoadSegment>,
    ) -> Result<Self, StoreError> {
        if zoom > MAX_ZOOM {
            return Err(StoreError::InvalidTileKey(TileKey::new(zoom, 0, 0)));
        }

        let mut tiled: BTreeMap<TileKey, Vec<Arc<RoadSegment>>> = BTreeMap::new();

        for road in roads {
            let road = Arc::new(road);
            let mut keys: Vec<_> = road
                .points
                .iter()
                .map(|point| TileKey::from_coordinate(&point.quantized(), zoom))
                .collect();
            keys.sort_unstable();
            keys.dedup();

            for key in keys {
                tiled.entry(key).or_default().push(road.clone());
            }
        }

        let mut source = Self::new(zoom);
        for (key, roads) in tiled {
            let data = serialize_tile(key, roads.iter().map(Arc::as_ref))?;
            source.insert_raw(key, data);
        }

        Ok(source)
    }

    /// Stores the binary tile as is, replacing any previous data of the same tile.
    pub fn insert_raw(&mut self, key: TileKey, data: Vec<u8>) {
        self.bounds = if self.tiles.is_empty() {
            key.bounds()
        } else {
            self.bounds.union(&key.bounds())
        };
        self.tiles.insert(key, data);
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TileSource for MemoryTileSource {
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    fn zoom(&self) -> u8 {
        self.zoom
    }

    fn tile_keys(&self, bbox: &BoundingBox) -> Vec<TileKey> {
        self.tiles
            .keys()
            .filter(|key| key.bounds().intersects(bbox))
            .copied()
            .collect()
    }

    fn read_tile(&self, key: TileKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tiles.get(&key).cloned())
    }
}

/// Tiles stored as `<root>/<zoom>/<x>/<y>.rgt` files.
#[derive(Debug, Clone)]
pub struct DirectoryTileSource {
    root: PathBuf,
    zoom: u8,
    bounds: BoundingBox,
    keys: Vec<TileKey>,
}

impl DirectoryTileSource {
    /// Indexes the tiles found in the directory for the given zoom level.
    pub fn open(root: impl Into<PathBuf>, zoom: u8) -> Result<Self, StoreError> {
        let root = root.into();
        let mut keys = vec![];

        if zoom > MAX_ZOOM {
            return Err(StoreError::InvalidTileKey(TileKey::new(zoom, 0, 0)));
        }

        let zoom_dir = root.join(zoom.to_string());
        for x_entry in fs::read_dir(&zoom_dir)? {
            let x_entry = x_entry?;
            let Some(x) = parse_stem(&x_entry.path(), None) else {
                continue;
            };

            for y_entry in fs::read_dir(x_entry.path())? {
                let y_entry = y_entry?;
                if let Some(y) = parse_stem(&y_entry.path(), Some(TILE_EXTENSION))
                    && TileKey::new(zoom, x, y).is_valid()
                {
                    keys.push(TileKey::new(zoom, x, y));
                }
            }
        }

        keys.sort_unstable();
        let bounds = keys
            .iter()
            .map(TileKey::bounds)
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default();

        debug!("Opened {} tiles of zoom {zoom} in {}", keys.len(), root.display());

        Ok(Self {
            root,
            zoom,
            bounds,
            keys,
        })
    }

    /// Writes every tile of the source in the directory and opens the result.
    pub fn export(root: impl Into<PathBuf>, source: &dyn TileSource) -> Result<Self, StoreError> {
        let root = root.into();

        for key in source.tile_keys(&source.bounds()) {
            let Some(data) = source.read_tile(key)? else {
                continue;
            };
            let path = tile_path(&root, key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, data)?;
        }

        Self::open(root, source.zoom())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TileSource for DirectoryTileSource {
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    fn zoom(&self) -> u8 {
        self.zoom
    }

    fn tile_keys(&self, bbox: &BoundingBox) -> Vec<TileKey> {
        self.keys
            .iter()
            .filter(|key| key.bounds().intersects(bbox))
            .copied()
            .collect()
    }

    fn read_tile(&self, key: TileKey) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(tile_path(&self.root, key)) {
            Ok(data) => Ok(Some(data)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

fn tile_path(root: &Path, key: TileKey) -> PathBuf {
    root.join(key.zoom.to_string())
        .join(key.x.to_string())
        .join(format!("{}.{TILE_EXTENSION}", key.y))
}

fn parse_stem(path: &Path, extension: Option<&str>) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != extension {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
