//! Tiling-collaborator boundary
//!
//! The tiling stage partitions raw point-cloud frames into spatial tiles and
//! writes a boundary-metadata artifact keyed by project. This module only
//! consumes that artifact; the tiling math itself lives elsewhere.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the boundary-metadata artifact under the tiles root
pub const TILE_MANIFEST_FILE: &str = "tile_boundaries.json";

/// Error type for tile manifest loading
#[derive(Debug, Error)]
pub enum TileError {
    /// IO error reading the manifest
    #[error("Failed to read tile manifest: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest JSON did not parse
    #[error("Failed to parse tile manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// Manifest parsed but contained no tiles
    #[error("Tile manifest lists no tiles")]
    Empty,
}

/// Axis-aligned spatial bounds of one tile in voxel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

/// One spatial partition of the point-cloud frame grid, encoded independently
///
/// Produced by the tiling stage; consumed read-only by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Tile identifier, unique within the project
    pub id: u32,
    /// First frame number of the tile's frame range
    pub start_frame: u32,
    /// Number of frames in the tile's frame range
    pub frame_count: u32,
    /// Spatial bounds assigned by the tiling grid
    pub bounds: SpatialBounds,
}

impl Tile {
    /// Directory name holding this tile's input frames under the tiles root
    pub fn dir_name(&self) -> String {
        format!("tile_{}", self.id)
    }

    /// Path to this tile's input frame directory
    pub fn input_dir(&self, tiles_root: &Path) -> PathBuf {
        tiles_root.join(self.dir_name())
    }
}

/// Boundary-metadata artifact written by the tiling stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileManifest {
    /// Project the tiles belong to
    pub project: String,
    /// Tile records in ascending id order
    pub tiles: Vec<Tile>,
}

/// Load the tile manifest produced by the tiling stage
///
/// The manifest is the `tile_boundaries.json` artifact under the project's
/// tiles root.
pub fn load_tile_manifest(path: &Path) -> Result<TileManifest, TileError> {
    let content = fs::read_to_string(path)?;
    let manifest: TileManifest = serde_json::from_str(&content)?;
    if manifest.tiles.is_empty() {
        return Err(TileError::Empty);
    }
    Ok(manifest)
}
