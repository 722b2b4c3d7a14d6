//! Deterministic navigation and combat-AI simulation core over a
//! streamed, chunked 2.5-D world.
//!
//! The world advances on a fixed timestep through a totally ordered stage
//! pipeline: anchors stream chunks in and out, a static bake publishes
//! per-cell walkability, a tiered pathfinder (per-chunk A*, multi-chunk
//! A*, chunk-level macro A*, shared flow fields) routes agents, movers
//! advance them, and a combat layer handles target acquisition, ring-slot
//! booking, attacks and damage. Stages are barriers: within a stage, work
//! is data-parallel over independent agents; cross-agent effects are
//! queued and flushed at the next stage boundary.

use std::collections::{HashSet, VecDeque};

use glam::Vec3;
use phalanx_grid::astar::MacroGraph;
use phalanx_grid::{ChunkCoord, GridSpec, ProximityIndex, TerrainCostTable};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

pub mod arena;
pub mod components;
pub mod config;
pub mod flowfield;
pub mod physics;
pub mod streaming;

mod combat;
mod commands;
mod dispatch;
mod movement;
mod pathfinding;

#[cfg(test)]
pub(crate) mod test_support;

pub use arena::{AgentArena, AgentSeed};
pub use components::{
    AgentFlags, AgentNavigation, AiState, AttackHit, CombatRuntime, DamageEvent,
    MeleeSlotAssignment, MoveCommand, NavMode, PathBuffers, PathRequest, StuckDetection,
    Transform, UnitMovement, Weapon, WeaponKind,
};
pub use config::{NavConfig, WorldError};
pub use flowfield::{FlowFieldRecord, FlowFieldRegistry};
pub use physics::{FlatWorld, GroundHit, ObstacleBox, PhysicsProbe};
pub use streaming::{
    ChunkDynamicData, ChunkRecord, ChunkState, ChunkStore, DynamicNode, StreamingAnchor,
};

new_key_type! {
    /// Stable generational handle for agents.
    pub struct AgentId;
    /// Stable generational handle for chunk records.
    pub struct ChunkId;
    /// Stable generational handle for streaming anchors.
    pub struct AnchorId;
}

/// Simulation clock in frames since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Everything observable that happened during one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameEvents {
    pub tick: Tick,
    pub started_moving: Vec<AgentId>,
    pub stopped_moving: Vec<AgentId>,
    pub attacks: Vec<AttackHit>,
    pub deaths: Vec<AgentId>,
    pub paths_succeeded: u32,
    pub paths_failed: u32,
    pub chunks_loaded: u32,
    pub chunks_unloaded: u32,
    pub fields_built: u32,
}

impl FrameEvents {
    fn new(tick: Tick) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}

/// Aggregate facts retained per frame in the history ring.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub tick: Tick,
    pub agent_count: usize,
    pub live_combatants: usize,
    pub average_health: f32,
    pub pending_path_requests: usize,
    pub loaded_chunks: usize,
    pub active_chunks: usize,
    pub flow_fields: usize,
}

/// The simulation world: one entity table per kind, the streamed chunk
/// store, and the frame pipeline.
pub struct World {
    pub(crate) config: NavConfig,
    pub(crate) spec: GridSpec,
    pub(crate) cost_table: TerrainCostTable,
    pub(crate) tick: Tick,
    pub(crate) time: f64,
    pub(crate) rng: SmallRng,
    pub(crate) agents: AgentArena,
    pub(crate) combat: SecondaryMap<AgentId, CombatRuntime>,
    pub(crate) move_commands: SecondaryMap<AgentId, MoveCommand>,
    pub(crate) stop_commands: SecondaryMap<AgentId, ()>,
    pub(crate) path_requests: SecondaryMap<AgentId, PathRequest>,
    pub(crate) anchors: SlotMap<AnchorId, StreamingAnchor>,
    pub(crate) chunks: ChunkStore,
    pub(crate) macro_graph: MacroGraph,
    pub(crate) flow_fields: FlowFieldRegistry,
    pub(crate) physics: Box<dyn PhysicsProbe>,
    pub(crate) proximity: ProximityIndex,
    pub(crate) pending_attacks: Vec<AttackHit>,
    pub(crate) pending_damage: Vec<DamageEvent>,
    pub(crate) pending_slot_releases: Vec<(AgentId, WeaponKind)>,
    pub(crate) pending_pings: Vec<combat::threat::AllyPing>,
    pub(crate) selection: HashSet<AgentId>,
    pub(crate) history: VecDeque<FrameSummary>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("chunk_count", &self.chunks.len())
            .field("flow_fields", &self.flow_fields.len())
            .finish()
    }
}

impl World {
    /// Instantiate a world over the given physics collaborator.
    pub fn new(config: NavConfig, physics: Box<dyn PhysicsProbe>) -> Result<Self, WorldError> {
        config.validate()?;
        let spec = config.grid_spec();
        let cost_table = config.cost_table();
        let rng = match config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        };
        // Proximity buckets scale with detection ranges, not path cells.
        let proximity = ProximityIndex::new((spec.cell_size * 8.0).max(4.0))
            .map_err(|_| WorldError::InvalidConfig("proximity bucket size"))?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            spec,
            cost_table,
            config,
            tick: Tick::zero(),
            time: 0.0,
            rng,
            agents: AgentArena::new(),
            combat: SecondaryMap::new(),
            move_commands: SecondaryMap::new(),
            stop_commands: SecondaryMap::new(),
            path_requests: SecondaryMap::new(),
            anchors: SlotMap::with_key(),
            chunks: ChunkStore::default(),
            macro_graph: MacroGraph::new(),
            flow_fields: FlowFieldRegistry::default(),
            physics,
            proximity,
            pending_attacks: Vec::new(),
            pending_damage: Vec::new(),
            pending_slot_releases: Vec::new(),
            pending_pings: Vec::new(),
            selection: HashSet::new(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Execute one frame of the pipeline and return its events.
    pub fn step(&mut self) -> FrameEvents {
        self.time += f64::from(self.config.frame_dt);
        self.tick = self.tick.next();
        let mut events = FrameEvents::new(self.tick);

        self.stage_anchor_tracking();
        self.stage_chunk_streaming(&mut events);
        self.stage_command_intake();
        self.stage_threat_scan();
        self.stage_ally_ping();
        self.stage_melee_slots();
        self.stage_ai_decision();
        self.stage_dispatch();
        self.stage_pathfinding(&mut events);
        self.stage_path_success();
        self.stage_flow_build(&mut events);
        self.stage_flow_sample();
        self.stage_movement();
        self.stage_occupancy();
        self.stage_movement_events(&mut events);
        self.stage_damage(&mut events);
        self.stage_regen();
        self.stage_hit_recovery();
        self.stage_late_cleanup();

        self.record_summary();
        events
    }

    fn record_summary(&mut self) {
        let mut live = 0usize;
        let mut health_total = 0.0f32;
        for runtime in self.combat.values() {
            if !runtime.dead {
                live += 1;
                health_total += runtime.health;
            }
        }
        let summary = FrameSummary {
            tick: self.tick,
            agent_count: self.agents.len(),
            live_combatants: live,
            average_health: if live > 0 { health_total / live as f32 } else { 0.0 },
            pending_path_requests: self.path_requests.len(),
            loaded_chunks: self.chunks.len(),
            active_chunks: self
                .chunks
                .iter()
                .filter(|r| r.state == ChunkState::Active)
                .count(),
            flow_fields: self.flow_fields.len(),
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    // ------------------------------------------------------------------
    // Spawning and lifetime

    /// Spawn an agent from explicit seed data.
    pub fn spawn_agent(&mut self, seed: AgentSeed) -> AgentId {
        let mut seed = seed;
        seed.stuck.last_checked_position = seed.transform.position;
        seed.stuck.check_interval = self.config.stuck_check_interval;
        seed.stuck.stuck_distance_threshold = self.config.stuck_distance_threshold;
        seed.stuck.max_stuck_count = self.config.max_stuck_count;
        self.agents.insert(seed)
    }

    /// Spawn a plain walker at a position.
    pub fn spawn_walker(&mut self, position: Vec3) -> AgentId {
        self.spawn_agent(AgentSeed {
            transform: Transform::from_position(position),
            ..AgentSeed::default()
        })
    }

    /// Spawn a walker with deterministic positional jitter from the world
    /// RNG, for scenario seeding.
    pub fn spawn_walker_jittered(&mut self, position: Vec3, jitter: f32) -> AgentId {
        let dx = if jitter > 0.0 {
            self.rng.random_range(-jitter..jitter)
        } else {
            0.0
        };
        let dz = if jitter > 0.0 {
            self.rng.random_range(-jitter..jitter)
        } else {
            0.0
        };
        self.spawn_walker(position + Vec3::new(dx, 0.0, dz))
    }

    /// Attach (or replace) combat state on an agent.
    pub fn set_combat(&mut self, id: AgentId, runtime: CombatRuntime) {
        if self.agents.contains(id) {
            self.combat.insert(id, runtime);
        }
    }

    /// Remove an agent entirely, releasing any ring slot it held.
    pub fn remove_agent(&mut self, id: AgentId) -> bool {
        if let Some(runtime) = self.combat.remove(id) {
            if let Some(assignment) = runtime.slot {
                self.pending_slot_releases
                    .push((assignment.target, runtime.weapon.kind));
            }
        }
        self.move_commands.remove(id);
        self.stop_commands.remove(id);
        self.path_requests.remove(id);
        self.selection.remove(&id);
        self.agents.remove(id)
    }

    // ------------------------------------------------------------------
    // Commands

    /// Queue a move order; processed by the next frame's intake stage.
    pub fn command_move(&mut self, id: AgentId, destination: Vec3, priority: i32) {
        if self.agents.contains(id) {
            self.move_commands.insert(
                id,
                MoveCommand {
                    destination,
                    priority,
                },
            );
        }
    }

    /// Queue a stop order; processed by the next frame's intake stage.
    pub fn command_stop(&mut self, id: AgentId) {
        if self.agents.contains(id) {
            self.stop_commands.insert(id, ());
        }
    }

    // ------------------------------------------------------------------
    // Selection
    //
    // The core does not interpret selection beyond routing group move and
    // stop orders; toggling is entirely external.

    pub fn select(&mut self, id: AgentId) {
        if self.agents.contains(id) {
            self.selection.insert(id);
        }
    }

    pub fn deselect(&mut self, id: AgentId) {
        self.selection.remove(&id);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.agents
            .iter_handles()
            .filter(|id| self.selection.contains(id))
    }

    /// Move every selected agent toward `destination` in a loose block
    /// formation. Offsets may land inside obstacles; the pathfinder's
    /// endpoint snapping absorbs that.
    pub fn command_move_selected(&mut self, destination: Vec3, priority: i32) {
        let selected: Vec<AgentId> = self.selection().collect();
        if selected.is_empty() {
            return;
        }
        let columns = (selected.len() as f32).sqrt().ceil().max(1.0) as usize;
        let rows = selected.len().div_ceil(columns);
        let spacing = (self.config.agent_radius * 2.0).max(self.config.cell_size) * 1.25;
        for (slot, id) in selected.into_iter().enumerate() {
            let col = slot % columns;
            let row = slot / columns;
            let ox = (col as f32 - (columns as f32 - 1.0) * 0.5) * spacing;
            let oz = (row as f32 - (rows as f32 - 1.0) * 0.5) * spacing;
            self.command_move(id, destination + Vec3::new(ox, 0.0, oz), priority);
        }
    }

    /// Halt every selected agent.
    pub fn command_stop_selected(&mut self) {
        let selected: Vec<AgentId> = self.selection().collect();
        for id in selected {
            self.command_stop(id);
        }
    }

    // ------------------------------------------------------------------
    // Anchors

    pub fn add_anchor(&mut self, anchor: StreamingAnchor) -> AnchorId {
        self.anchors.insert(anchor)
    }

    pub fn remove_anchor(&mut self, id: AnchorId) -> Option<StreamingAnchor> {
        self.anchors.remove(id)
    }

    // ------------------------------------------------------------------
    // Accessors

    #[must_use]
    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    #[must_use]
    pub fn agents(&self) -> &AgentArena {
        &self.agents
    }

    #[must_use]
    pub fn agents_mut(&mut self) -> &mut AgentArena {
        &mut self.agents
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn combat(&self, id: AgentId) -> Option<&CombatRuntime> {
        self.combat.get(id)
    }

    #[must_use]
    pub fn combat_mut(&mut self, id: AgentId) -> Option<&mut CombatRuntime> {
        self.combat.get_mut(id)
    }

    #[must_use]
    pub fn agent_transform(&self, id: AgentId) -> Option<&Transform> {
        let index = self.agents.index_of(id)?;
        Some(&self.agents.columns().transforms()[index])
    }

    #[must_use]
    pub fn agent_navigation(&self, id: AgentId) -> Option<&AgentNavigation> {
        let index = self.agents.index_of(id)?;
        Some(&self.agents.columns().navigation()[index])
    }

    #[must_use]
    pub fn agent_movement(&self, id: AgentId) -> Option<&UnitMovement> {
        let index = self.agents.index_of(id)?;
        Some(&self.agents.columns().movement()[index])
    }

    #[must_use]
    pub fn agent_flags(&self, id: AgentId) -> Option<AgentFlags> {
        let index = self.agents.index_of(id)?;
        Some(self.agents.columns().flags()[index])
    }

    /// Current cell-level waypoints; empty when none.
    #[must_use]
    pub fn agent_waypoints(&self, id: AgentId) -> &[Vec3] {
        self.agents.index_of(id).map_or(&[], |index| {
            self.agents.columns().paths()[index].waypoints.as_slice()
        })
    }

    /// Current macro (chunk-centre) waypoints; empty when none.
    #[must_use]
    pub fn agent_macro_waypoints(&self, id: AgentId) -> &[Vec3] {
        self.agents.index_of(id).map_or(&[], |index| {
            self.agents.columns().paths()[index].macro_waypoints.as_slice()
        })
    }

    #[must_use]
    pub fn has_pending_path_request(&self, id: AgentId) -> bool {
        self.path_requests.contains_key(id)
    }

    #[must_use]
    pub fn chunk_state(&self, coord: ChunkCoord) -> ChunkState {
        self.chunks.state_of(coord)
    }

    #[must_use]
    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    #[must_use]
    pub fn flow_fields(&self) -> &FlowFieldRegistry {
        &self.flow_fields
    }

    pub fn history(&self) -> impl Iterator<Item = &FrameSummary> {
        self.history.iter()
    }

    /// Occupancy of the active-chunk cell containing `position`, if that
    /// chunk is active.
    #[must_use]
    pub fn cell_occupancy(&self, position: Vec3) -> Option<u8> {
        let chunk = self.spec.world_to_chunk(position);
        let record = self.chunks.get(chunk)?;
        let dynamic = record.dynamic.as_ref()?;
        let (lx, lz) = self.spec.cell_local(self.spec.world_to_cell(position));
        Some(dynamic.nodes[self.spec.local_index(lx, lz)].occupancy_count)
    }

    /// External hook: set dynamic block flags on an active-chunk cell.
    pub fn set_dynamic_block(&mut self, position: Vec3, flags: u8) -> bool {
        let chunk = self.spec.world_to_chunk(position);
        let (lx, lz) = self.spec.cell_local(self.spec.world_to_cell(position));
        let index = self.spec.local_index(lx, lz);
        let dynamic = self
            .chunks
            .get_mut(chunk)
            .and_then(|record| record.dynamic.as_mut());
        if let Some(dynamic) = dynamic {
            dynamic.nodes[index].dynamic_block_flags = flags;
            true
        } else {
            false
        }
    }
}
