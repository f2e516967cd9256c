use std::io::ErrorKind;

use thiserror::Error;

use crate::{Coordinate, RoadId, TileKey};

/// Failure to read, parse or write a road graph tile.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum StoreError {
    #[error("Tile I/O error: {0:?}")]
    IO(ErrorKind),
    #[error("Tile magic number is not valid")]
    InvalidMagic,
    #[error("Tile version {0} not supported")]
    VersionNotSupported(u8),
    #[error("Tile road class is not valid: {0}")]
    InvalidRoadClass(u8),
    #[error("Tile oneway flag is not valid: {0}")]
    InvalidOneway(u8),
    #[error("Tile road name is not valid UTF-8")]
    InvalidName,
    #[error("Road {0:?} geometry cannot be encoded")]
    InvalidGeometry(RoadId),
    #[error("Road {0:?} identifier does not fit the segment id shift")]
    InvalidRoadId(RoadId),
    #[error("Tile key {0:?} is outside the tiling scheme")]
    InvalidTileKey(TileKey),
    #[error("Tile {found:?} does not match the requested tile {expected:?}")]
    TileKeyMismatch { expected: TileKey, found: TileKey },
    #[error("Tile sources disagree on zoom level: {expected} and {found}")]
    ZoomMismatch { expected: u8, found: u8 },
}

#[derive(Error, Debug, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Memory limit {limit} bytes is below the minimum working set of {required} bytes")]
    InsufficientMemoryBudget { limit: usize, required: usize },
    #[error("Unknown vehicle profile {0}")]
    UnknownProfile(String),
}

/// Why a search was stopped before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    /// The expansion count or cost ceiling was exceeded.
    Limit,
    /// The caller requested cancellation.
    Cancelled,
}

#[derive(Error, Debug, PartialEq, Clone)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Cannot find a road near {0:?}")]
    NoRoadNearby(Coordinate),
    #[error("Cannot find route")]
    NoRouteFound,
    #[error("Search aborted: {0}")]
    SearchAborted(AbortReason),
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::IO(error.kind())
    }
}
