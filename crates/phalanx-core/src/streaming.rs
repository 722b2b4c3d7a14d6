//! Chunk streaming: anchors draw rings of chunks into `Ghost` (baked
//! walkability only) and `Active` (baked plus dynamic per-cell data)
//! states; chunks outside every ring are destroyed.
//!
//! The static bake runs once per chunk on the `Unloaded -> Ghost`
//! transition and is a pure function of the physics geometry and the
//! configuration, so re-baking unchanged ground produces an identical
//! blob.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use phalanx_grid::{
    ChunkCoord, ChunkStaticBlob, GridDir, GridSpec, NodeStatic, LAYER_FLYING, SLOPE_TOO_STEEP,
};
use slotmap::SlotMap;
use tracing::debug;

use crate::config::NavConfig;
use crate::physics::PhysicsProbe;
use crate::{AgentId, ChunkId, FrameEvents, World};

/// Lifecycle states of a streamed chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChunkState {
    #[default]
    Unloaded,
    Ghost,
    Active,
}

/// Mutable per-cell data, allocated only while a chunk is `Active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DynamicNode {
    pub occupancy_count: u8,
    pub dynamic_block_flags: u8,
}

/// Dynamic node array for one active chunk.
#[derive(Debug, Clone)]
pub struct ChunkDynamicData {
    pub nodes: Vec<DynamicNode>,
}

impl ChunkDynamicData {
    #[must_use]
    pub fn new(cell_total: usize) -> Self {
        Self {
            nodes: vec![DynamicNode::default(); cell_total],
        }
    }
}

/// One streamed chunk.
#[derive(Debug)]
pub struct ChunkRecord {
    pub coord: ChunkCoord,
    pub state: ChunkState,
    pub blob: Option<Arc<ChunkStaticBlob>>,
    pub dynamic: Option<ChunkDynamicData>,
}

impl ChunkRecord {
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            state: ChunkState::Unloaded,
            blob: None,
            dynamic: None,
        }
    }

    /// Whether static walkability has been baked.
    #[must_use]
    pub fn static_ready(&self) -> bool {
        self.blob.is_some()
    }
}

/// Chunk records keyed both by handle and by coordinate.
#[derive(Debug, Default)]
pub struct ChunkStore {
    records: SlotMap<ChunkId, ChunkRecord>,
    by_coord: HashMap<ChunkCoord, ChunkId>,
}

impl ChunkStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.by_coord.contains_key(&coord)
    }

    #[must_use]
    pub fn get(&self, coord: ChunkCoord) -> Option<&ChunkRecord> {
        self.by_coord.get(&coord).map(|id| &self.records[*id])
    }

    #[must_use]
    pub fn get_mut(&mut self, coord: ChunkCoord) -> Option<&mut ChunkRecord> {
        let id = *self.by_coord.get(&coord)?;
        self.records.get_mut(id)
    }

    pub fn insert(&mut self, record: ChunkRecord) -> ChunkId {
        let coord = record.coord;
        let id = self.records.insert(record);
        self.by_coord.insert(coord, id);
        id
    }

    pub fn remove(&mut self, coord: ChunkCoord) -> Option<ChunkRecord> {
        let id = self.by_coord.remove(&coord)?;
        self.records.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChunkRecord> {
        self.records.values_mut()
    }

    /// State of a chunk, `Unloaded` when no record exists.
    #[must_use]
    pub fn state_of(&self, coord: ChunkCoord) -> ChunkState {
        self.get(coord).map_or(ChunkState::Unloaded, |r| r.state)
    }

    /// Whether a chunk has baked static data (`Ghost` or `Active`).
    #[must_use]
    pub fn is_static_ready(&self, coord: ChunkCoord) -> bool {
        self.get(coord).is_some_and(ChunkRecord::static_ready)
    }

    /// Blobs of every loaded chunk, for per-frame grid snapshots.
    pub fn loaded_blobs(&self) -> impl Iterator<Item = &Arc<ChunkStaticBlob>> {
        self.records.values().filter_map(|r| r.blob.as_ref())
    }
}

/// An entity whose position keeps chunks streamed in around it. Anchors
/// either stand free or follow an agent.
#[derive(Debug, Clone, Copy)]
pub struct StreamingAnchor {
    pub position: Vec3,
    pub current_chunk: ChunkCoord,
    pub priority: i32,
    pub follow: Option<AgentId>,
}

impl StreamingAnchor {
    #[must_use]
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            current_chunk: ChunkCoord::new(0, 0),
            priority: 1,
            follow: None,
        }
    }

    #[must_use]
    pub fn following(agent: AgentId) -> Self {
        Self {
            follow: Some(agent),
            ..Self::at(Vec3::ZERO)
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority.max(1);
        self
    }
}

impl World {
    /// Refresh anchor positions (for anchors that follow agents) and their
    /// current chunk coordinates.
    pub(crate) fn stage_anchor_tracking(&mut self) {
        let spec = self.spec;
        for anchor in self.anchors.values_mut() {
            if let Some(agent) = anchor.follow {
                if let Some(index) = self.agents.index_of(agent) {
                    anchor.position = self.agents.columns().transforms()[index].position;
                }
            }
            anchor.current_chunk = spec.world_to_chunk(anchor.position);
        }
    }

    /// Compute the desired chunk states as the max over all anchor rings,
    /// then walk every chunk toward its desired state.
    pub(crate) fn stage_chunk_streaming(&mut self, events: &mut FrameEvents) {
        let mut desired: HashMap<ChunkCoord, ChunkState> = HashMap::new();
        for anchor in self.anchors.values() {
            let active_r = self.config.active_ring_radius * anchor.priority.max(1);
            let ghost_r = self.config.ghost_ring_radius.max(active_r);
            for dz in -ghost_r..=ghost_r {
                for dx in -ghost_r..=ghost_r {
                    let coord =
                        ChunkCoord::new(anchor.current_chunk.x + dx, anchor.current_chunk.z + dz);
                    let ring = dx.abs().max(dz.abs());
                    let want = if ring <= active_r {
                        ChunkState::Active
                    } else {
                        ChunkState::Ghost
                    };
                    desired
                        .entry(coord)
                        .and_modify(|s| *s = (*s).max(want))
                        .or_insert(want);
                }
            }
        }

        // Walk the desired set in coordinate order so record creation,
        // baking and events are independent of hash-map iteration order.
        let mut wanted: Vec<(ChunkCoord, ChunkState)> =
            desired.iter().map(|(c, s)| (*c, *s)).collect();
        wanted.sort_by_key(|(c, _)| *c);

        // Create records and bake static data where missing.
        let mut to_bake = Vec::new();
        for &(coord, _) in &wanted {
            if !self.chunks.contains(coord) {
                self.chunks.insert(ChunkRecord::new(coord));
            }
            if !self.chunks.is_static_ready(coord) {
                to_bake.push(coord);
            }
        }
        for coord in to_bake {
            let blob = bake_chunk(&self.config, self.spec, self.physics.as_ref(), coord);
            self.macro_graph.insert(coord, blob.macro_connectivity);
            let record = self.chunks.get_mut(coord).expect("record just created");
            record.blob = Some(Arc::new(blob));
            record.state = record.state.max(ChunkState::Ghost);
            events.chunks_loaded += 1;
            debug!(?coord, "baked chunk");
        }

        // Promote, demote, and destroy.
        let cell_total = self.spec.cells_per_chunk();
        let stale: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .map(|r| r.coord)
            .filter(|c| !desired.contains_key(c))
            .collect();
        for &(coord, want) in &wanted {
            let record = self.chunks.get_mut(coord).expect("desired record");
            match (record.state, want) {
                (ChunkState::Ghost, ChunkState::Active) => {
                    record.dynamic = Some(ChunkDynamicData::new(cell_total));
                    record.state = ChunkState::Active;
                }
                (ChunkState::Active, ChunkState::Ghost) => {
                    record.dynamic = None;
                    record.state = ChunkState::Ghost;
                }
                _ => {}
            }
        }
        for coord in stale {
            self.chunks.remove(coord);
            self.macro_graph.remove(coord);
            events.chunks_unloaded += 1;
            debug!(?coord, "unloaded chunk");
        }
    }
}

/// Bake one chunk's static walkability from physics queries.
pub(crate) fn bake_chunk(
    config: &NavConfig,
    spec: GridSpec,
    physics: &dyn PhysicsProbe,
    coord: ChunkCoord,
) -> ChunkStaticBlob {
    let n = spec.chunk_cells;
    let ray_len = config.bake_raycast_height + 2.0;
    let mut nodes = Vec::with_capacity((n * n) as usize);
    for lz in 0..n {
        for lx in 0..n {
            let center = spec.cell_center(spec.compose_cell(coord, lx, lz));
            let origin = center + Vec3::Y * config.bake_raycast_height;
            let Some(hit) = physics.raycast_down(origin, ray_len, config.ground_layer) else {
                nodes.push(NodeStatic::BLOCKED);
                continue;
            };
            let slope_deg = hit
                .normal
                .normalize_or_zero()
                .dot(Vec3::Y)
                .clamp(-1.0, 1.0)
                .acos()
                .to_degrees();
            let mut node = if slope_deg > config.max_slope_angle_deg {
                NodeStatic {
                    walkable_layers: LAYER_FLYING,
                    terrain_cost: 0,
                    slope_flags: SLOPE_TOO_STEEP,
                    reserved: 0,
                }
            } else {
                NodeStatic::OPEN
            };
            let clearance_center = hit.point + Vec3::Y * config.agent_radius;
            if physics.sphere_blocked(
                clearance_center,
                config.agent_radius * 0.9,
                config.unwalkable_layer,
            ) {
                node.walkable_layers = 0;
            }
            nodes.push(node);
        }
    }

    let center = spec.chunk_center(coord);
    let edge_reach = spec.chunk_span() * 0.5 - spec.cell_size * 0.5;
    let mut macro_connectivity = [0u8; 8];
    for dir in GridDir::ALL {
        let (dx, dz) = dir.offset();
        let probe = center + Vec3::new(dx as f32 * edge_reach, 0.0, dz as f32 * edge_reach);
        let origin = probe + Vec3::Y * config.bake_raycast_height;
        if physics
            .raycast_down(origin, ray_len, config.ground_layer)
            .is_some()
        {
            macro_connectivity[dir.index()] = 10;
        }
    }

    ChunkStaticBlob {
        coord,
        cell_count: n,
        nodes,
        macro_connectivity,
    }
}
