//! Grid primitives shared across the phalanx workspace: chunk and cell
//! coordinate math, per-cell static walkability data, chunk blobs, the
//! terrain cost table, and the tiered pathfinding algorithms built on them.
//!
//! The world is an unbounded 2.5-D plane divided into square chunks of
//! `N x N` cells. Cells within a chunk are stored row-major, z-major
//! (`index = z * N + x`), which is also the persisted layout of
//! [`ChunkStaticBlob`].

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod astar;
pub mod flow;
pub mod proximity;

pub use astar::{GridPath, LoadedGrid, MacroGraph};
pub use flow::FlowFieldData;
pub use proximity::ProximityIndex;

/// Straight step cost in integer tenths of a cell.
pub const STEP_STRAIGHT: i32 = 10;
/// Diagonal step cost in integer tenths of a cell.
pub const STEP_DIAGONAL: i32 = 14;
/// Baseline terrain cost; surcharges are measured against this.
pub const TERRAIN_BASELINE: i32 = 10;
/// Radius (in cells) searched when snapping a blocked endpoint to the
/// nearest walkable cell.
pub const SNAP_RADIUS: i32 = 4;
/// Slope flag bit marking a cell too steep for ground movement.
pub const SLOPE_TOO_STEEP: u8 = 0b0000_0001;
/// Walkable layer reserved for flying agents (steep but traversable cells).
pub const LAYER_FLYING: u8 = 0b0000_0010;

/// Errors surfaced by pathfinding queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    /// The open set was exhausted without reaching the goal.
    #[error("no route between the requested endpoints")]
    NoRoute,
    /// Neither endpoint could be snapped to a walkable cell, or both
    /// endpoints collapsed onto the same cell after snapping.
    #[error("no walkable cell near an endpoint")]
    EndpointBlocked,
    /// A chunk required by the query has no baked static data.
    #[error("required chunk data is not available")]
    ChunkUnavailable,
}

/// Integer chunk coordinate on the streaming plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The neighbouring chunk one step in `dir`.
    #[must_use]
    pub const fn step(self, dir: GridDir) -> Self {
        let (dx, dz) = dir.offset();
        Self::new(self.x + dx, self.z + dz)
    }

    /// Chebyshev distance to `other`, the metric used for streaming rings.
    #[must_use]
    pub fn ring_distance(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

/// Global (world-spanning) cell coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    #[must_use]
    pub const fn step(self, dir: GridDir) -> Self {
        let (dx, dz) = dir.offset();
        Self::new(self.x + dx, self.z + dz)
    }

    /// Packs the cell into the 64-bit key used for flow-field destinations.
    #[must_use]
    pub fn packed(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.z as u32 as u64)
    }
}

/// The eight grid directions in the persisted macro-connectivity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridDir {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl GridDir {
    /// All directions, indexed consistently with
    /// [`ChunkStaticBlob::macro_connectivity`].
    pub const ALL: [GridDir; 8] = [
        GridDir::North,
        GridDir::NorthEast,
        GridDir::East,
        GridDir::SouthEast,
        GridDir::South,
        GridDir::SouthWest,
        GridDir::West,
        GridDir::NorthWest,
    ];

    /// `(dx, dz)` cell offset of one step in this direction.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self {
            GridDir::North => (0, 1),
            GridDir::NorthEast => (1, 1),
            GridDir::East => (1, 0),
            GridDir::SouthEast => (1, -1),
            GridDir::South => (0, -1),
            GridDir::SouthWest => (-1, -1),
            GridDir::West => (-1, 0),
            GridDir::NorthWest => (-1, 1),
        }
    }

    #[must_use]
    pub const fn is_diagonal(self) -> bool {
        matches!(
            self,
            GridDir::NorthEast | GridDir::SouthEast | GridDir::SouthWest | GridDir::NorthWest
        )
    }

    /// Movement cost of one step in this direction.
    #[must_use]
    pub const fn step_cost(self) -> i32 {
        if self.is_diagonal() {
            STEP_DIAGONAL
        } else {
            STEP_STRAIGHT
        }
    }

    /// Index into the macro-connectivity array.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The two orthogonal directions flanking a diagonal, used to reject
    /// corner-cutting moves. Returns `None` for orthogonal directions.
    #[must_use]
    pub const fn flanking(self) -> Option<(GridDir, GridDir)> {
        match self {
            GridDir::NorthEast => Some((GridDir::North, GridDir::East)),
            GridDir::SouthEast => Some((GridDir::South, GridDir::East)),
            GridDir::SouthWest => Some((GridDir::South, GridDir::West)),
            GridDir::NorthWest => Some((GridDir::North, GridDir::West)),
            _ => None,
        }
    }
}

/// Octile distance in integer tenths of a cell:
/// `10 * max(|dx|, |dz|) + 4 * min(|dx|, |dz|)`.
#[must_use]
pub fn octile(dx: i32, dz: i32) -> i32 {
    let a = dx.abs();
    let b = dz.abs();
    10 * a.max(b) + 4 * a.min(b)
}

/// Static per-cell bake output. Exactly four bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatic {
    /// Bitmask of layers that may occupy the cell; zero means blocked.
    pub walkable_layers: u8,
    /// Index into the terrain cost table.
    pub terrain_cost: u8,
    /// Slope flags; bit 0 marks the cell too steep for ground agents.
    pub slope_flags: u8,
    pub reserved: u8,
}

impl NodeStatic {
    /// A fully blocked cell.
    pub const BLOCKED: NodeStatic = NodeStatic {
        walkable_layers: 0,
        terrain_cost: 0,
        slope_flags: 0,
        reserved: 0,
    };

    /// A flat, fully open cell.
    pub const OPEN: NodeStatic = NodeStatic {
        walkable_layers: 0xFF,
        terrain_cost: 0,
        slope_flags: 0,
        reserved: 0,
    };

    /// Whether the cell blocks every agent.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        self.walkable_layers == 0
    }
}

/// Per-agent movement permissions evaluated against [`NodeStatic`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerPermissions {
    pub walkable_layers: u8,
    pub cost_layer_weights: u8,
    pub is_flying: bool,
}

impl Default for LayerPermissions {
    fn default() -> Self {
        Self {
            walkable_layers: 0xFF,
            cost_layer_weights: 0,
            is_flying: false,
        }
    }
}

impl LayerPermissions {
    /// Whether an agent with these permissions may stand on `node`.
    #[must_use]
    pub fn can_traverse(&self, node: NodeStatic) -> bool {
        if node.walkable_layers == 0 {
            return false;
        }
        if node.walkable_layers & self.walkable_layers == 0 {
            return false;
        }
        if node.slope_flags & SLOPE_TOO_STEEP != 0 && !self.is_flying {
            return false;
        }
        true
    }
}

/// 256-entry terrain cost lookup. Baseline terrain costs
/// [`TERRAIN_BASELINE`]; named tiers cover roads, grass and mud.
#[derive(Debug, Clone)]
pub struct TerrainCostTable([i32; 256]);

impl Default for TerrainCostTable {
    fn default() -> Self {
        let mut table = [TERRAIN_BASELINE; 256];
        table[1] = 15; // grass
        table[2] = 25; // mud
        table[3] = 5; // road
        Self(table)
    }
}

impl TerrainCostTable {
    #[must_use]
    pub fn cost(&self, mask: u8) -> i32 {
        self.0[mask as usize]
    }

    /// Extra movement cost over the baseline for terrain `mask`.
    #[must_use]
    pub fn surcharge(&self, mask: u8) -> i32 {
        self.0[mask as usize] - TERRAIN_BASELINE
    }

    pub fn set(&mut self, mask: u8, cost: i32) {
        self.0[mask as usize] = cost;
    }
}

/// Geometry of the chunked grid: world units per cell and cells per chunk
/// side. All coordinate conversions route through this.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub cell_size: f32,
    pub chunk_cells: i32,
}

impl GridSpec {
    #[must_use]
    pub const fn new(cell_size: f32, chunk_cells: i32) -> Self {
        Self {
            cell_size,
            chunk_cells,
        }
    }

    /// Number of cells in one chunk.
    #[must_use]
    pub const fn cells_per_chunk(&self) -> usize {
        (self.chunk_cells * self.chunk_cells) as usize
    }

    /// World-space edge length of one chunk.
    #[must_use]
    pub fn chunk_span(&self) -> f32 {
        self.cell_size * self.chunk_cells as f32
    }

    /// Global cell containing the world point (y is ignored).
    #[must_use]
    pub fn world_to_cell(&self, point: Vec3) -> CellCoord {
        CellCoord::new(
            (point.x / self.cell_size).floor() as i32,
            (point.z / self.cell_size).floor() as i32,
        )
    }

    /// Chunk containing the world point.
    #[must_use]
    pub fn world_to_chunk(&self, point: Vec3) -> ChunkCoord {
        self.cell_to_chunk(self.world_to_cell(point))
    }

    /// Chunk containing a global cell.
    #[must_use]
    pub fn cell_to_chunk(&self, cell: CellCoord) -> ChunkCoord {
        ChunkCoord::new(
            cell.x.div_euclid(self.chunk_cells),
            cell.z.div_euclid(self.chunk_cells),
        )
    }

    /// Local `(x, z)` of a global cell within its chunk, each in
    /// `0..chunk_cells`.
    #[must_use]
    pub fn cell_local(&self, cell: CellCoord) -> (i32, i32) {
        (
            cell.x.rem_euclid(self.chunk_cells),
            cell.z.rem_euclid(self.chunk_cells),
        )
    }

    /// Flat index of a local cell, z-major.
    #[must_use]
    pub const fn local_index(&self, lx: i32, lz: i32) -> usize {
        (lz * self.chunk_cells + lx) as usize
    }

    /// Global cell at the chunk's minimum corner.
    #[must_use]
    pub const fn chunk_origin_cell(&self, chunk: ChunkCoord) -> CellCoord {
        CellCoord::new(chunk.x * self.chunk_cells, chunk.z * self.chunk_cells)
    }

    /// Global cell from a chunk and local coordinates.
    #[must_use]
    pub const fn compose_cell(&self, chunk: ChunkCoord, lx: i32, lz: i32) -> CellCoord {
        CellCoord::new(
            chunk.x * self.chunk_cells + lx,
            chunk.z * self.chunk_cells + lz,
        )
    }

    /// World-space centre of a cell at ground height zero.
    #[must_use]
    pub fn cell_center(&self, cell: CellCoord) -> Vec3 {
        Vec3::new(
            (cell.x as f32 + 0.5) * self.cell_size,
            0.0,
            (cell.z as f32 + 0.5) * self.cell_size,
        )
    }

    /// World-space centre of a chunk at ground height zero.
    #[must_use]
    pub fn chunk_center(&self, chunk: ChunkCoord) -> Vec3 {
        let span = self.chunk_span();
        Vec3::new(
            (chunk.x as f32 + 0.5) * span,
            0.0,
            (chunk.z as f32 + 0.5) * span,
        )
    }

    /// Clamps a global cell into the bounds of `chunk`, used when seeding
    /// flow fields for chunks neighbouring the destination.
    #[must_use]
    pub fn clamp_cell_to_chunk(&self, cell: CellCoord, chunk: ChunkCoord) -> (i32, i32) {
        let origin = self.chunk_origin_cell(chunk);
        let lx = (cell.x - origin.x).clamp(0, self.chunk_cells - 1);
        let lz = (cell.z - origin.z).clamp(0, self.chunk_cells - 1);
        (lx, lz)
    }
}

/// Immutable static bake output for one chunk. Published once per bake and
/// shared read-only; this is the only artifact with a persisted layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStaticBlob {
    pub coord: ChunkCoord,
    /// Cells per chunk side.
    pub cell_count: i32,
    /// Row-major, z-major node array (`index = z * N + x`).
    pub nodes: Vec<NodeStatic>,
    /// Outward edge connectivity in [`GridDir::ALL`] order; zero means the
    /// chunk boundary is impassable in that direction.
    pub macro_connectivity: [u8; 8],
}

impl ChunkStaticBlob {
    /// An all-open blob, useful for tests and synthetic worlds.
    #[must_use]
    pub fn open(coord: ChunkCoord, cell_count: i32) -> Self {
        Self {
            coord,
            cell_count,
            nodes: vec![NodeStatic::OPEN; (cell_count * cell_count) as usize],
            macro_connectivity: [10; 8],
        }
    }

    #[must_use]
    pub fn node(&self, lx: i32, lz: i32) -> NodeStatic {
        self.nodes[(lz * self.cell_count + lx) as usize]
    }

    pub fn set_node(&mut self, lx: i32, lz: i32, node: NodeStatic) {
        self.nodes[(lz * self.cell_count + lx) as usize] = node;
    }

    /// Deserialize a blob from a `ron` string.
    #[cfg(feature = "ron")]
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    /// Serialize the blob to a `ron` string.
    #[cfg(feature = "ron")]
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::to_string(self)
    }
}
