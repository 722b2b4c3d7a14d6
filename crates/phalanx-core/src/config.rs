//! World configuration. Immutable after construction; every tunable the
//! frame pipeline consults lives here so scenarios and tests can shape the
//! world without touching code.

use phalanx_grid::{GridSpec, TerrainCostTable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a navigation world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavConfig {
    /// World units per pathfinding cell.
    pub cell_size: f32,
    /// Cells per chunk side.
    pub chunk_cell_count: i32,
    /// Radius (in chunks, Chebyshev) of fully simulated chunks around each
    /// anchor, scaled by anchor priority.
    pub active_ring_radius: i32,
    /// Radius of statically baked chunks around each anchor; never less
    /// than the active radius.
    pub ghost_ring_radius: i32,
    /// Agent body radius used for bake clearance checks.
    pub agent_radius: f32,
    /// Physics layer mask treated as ground during the bake.
    pub ground_layer: u8,
    /// Physics layer mask of obstacles that block cells during the bake.
    pub unwalkable_layer: u8,
    /// Maximum ground slope in degrees before a cell is flying-only.
    pub max_slope_angle_deg: f32,
    /// Height above the cell centre the bake ray starts from.
    pub bake_raycast_height: f32,
    /// Fixed simulation timestep in seconds.
    pub frame_dt: f32,
    /// Optional RNG seed for reproducible scenario spawning.
    pub rng_seed: Option<u64>,
    /// Path requests processed per frame; the rest carry over.
    pub max_path_requests_per_frame: usize,
    /// Agents sharing a destination cell before the dispatcher switches
    /// the crowd to a shared flow field.
    pub crowd_threshold: usize,
    /// Seconds between repath attempts for one agent.
    pub repath_cooldown: f32,
    /// Seconds an unused flow field survives after its last build.
    pub field_expiry: f32,
    /// Score improvement a new target needs before a unit switches.
    pub target_switch_margin: f32,
    /// Logical ring positions offered to ranged attackers.
    pub ranged_ring_slots: u32,
    /// Distance at which a macro (chunk-centre) waypoint counts as
    /// reached.
    pub macro_reach_distance: f32,
    /// Lower bound applied to every agent's arrival threshold.
    pub arrival_floor: f32,
    /// Seconds between stuck-detection samples.
    pub stuck_check_interval: f32,
    /// Minimum movement between samples before a unit counts as stuck.
    pub stuck_distance_threshold: f32,
    /// Consecutive stuck samples before the path is abandoned.
    pub max_stuck_count: u32,
    /// Seconds a unit stays in hit recoil before resuming.
    pub hit_recovery_duration: f32,
    /// Seconds after the last hit before regeneration starts.
    pub out_of_combat_delay: f32,
    /// Health regained per second when out of combat.
    pub regen_rate: f32,
    /// Maximum number of retained frame summaries.
    pub history_capacity: usize,
    /// Terrain tier overrides applied to the cost table
    /// (`(tier mask, cost)` pairs over a baseline of 10).
    pub terrain_tier_costs: Vec<(u8, i32)>,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            cell_size: 1.0,
            chunk_cell_count: 16,
            active_ring_radius: 1,
            ghost_ring_radius: 2,
            agent_radius: 0.5,
            ground_layer: 0b0000_0001,
            unwalkable_layer: 0b0000_0010,
            max_slope_angle_deg: 45.0,
            bake_raycast_height: 10.0,
            frame_dt: 1.0 / 60.0,
            rng_seed: None,
            max_path_requests_per_frame: 16,
            crowd_threshold: 12,
            repath_cooldown: 0.5,
            field_expiry: 5.0,
            target_switch_margin: 15.0,
            ranged_ring_slots: 8,
            macro_reach_distance: 10.0,
            arrival_floor: 1.5,
            stuck_check_interval: 0.5,
            stuck_distance_threshold: 0.3,
            max_stuck_count: 3,
            hit_recovery_duration: 0.4,
            out_of_combat_delay: 5.0,
            regen_rate: 2.0,
            history_capacity: 256,
            terrain_tier_costs: vec![(0, 10), (1, 15), (2, 25), (3, 5)],
        }
    }
}

impl NavConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.cell_size <= 0.0 {
            return Err(WorldError::InvalidConfig("cell_size must be positive"));
        }
        if self.chunk_cell_count <= 0 {
            return Err(WorldError::InvalidConfig(
                "chunk_cell_count must be positive",
            ));
        }
        if self.active_ring_radius < 0 || self.ghost_ring_radius < self.active_ring_radius {
            return Err(WorldError::InvalidConfig(
                "ghost_ring_radius must be at least active_ring_radius",
            ));
        }
        if self.agent_radius <= 0.0 {
            return Err(WorldError::InvalidConfig("agent_radius must be positive"));
        }
        if !(0.0..90.0).contains(&self.max_slope_angle_deg) {
            return Err(WorldError::InvalidConfig(
                "max_slope_angle_deg must be in [0, 90)",
            ));
        }
        if self.bake_raycast_height <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "bake_raycast_height must be positive",
            ));
        }
        if self.frame_dt <= 0.0 {
            return Err(WorldError::InvalidConfig("frame_dt must be positive"));
        }
        if self.max_path_requests_per_frame == 0 {
            return Err(WorldError::InvalidConfig(
                "max_path_requests_per_frame must be non-zero",
            ));
        }
        if self.crowd_threshold == 0 {
            return Err(WorldError::InvalidConfig("crowd_threshold must be non-zero"));
        }
        if self.ranged_ring_slots == 0 {
            return Err(WorldError::InvalidConfig(
                "ranged_ring_slots must be non-zero",
            ));
        }
        if self.repath_cooldown < 0.0
            || self.field_expiry <= 0.0
            || self.target_switch_margin < 0.0
            || self.macro_reach_distance <= 0.0
            || self.arrival_floor < 0.0
            || self.stuck_check_interval <= 0.0
            || self.stuck_distance_threshold < 0.0
            || self.hit_recovery_duration < 0.0
            || self.out_of_combat_delay < 0.0
            || self.regen_rate < 0.0
        {
            return Err(WorldError::InvalidConfig(
                "timing and distance tunables must be non-negative, intervals positive",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig("history_capacity must be non-zero"));
        }
        Ok(())
    }

    /// Grid geometry derived from the configuration.
    #[must_use]
    pub fn grid_spec(&self) -> GridSpec {
        GridSpec::new(self.cell_size, self.chunk_cell_count)
    }

    /// Terrain cost table with the configured tier overrides applied.
    #[must_use]
    pub fn cost_table(&self) -> TerrainCostTable {
        let mut table = TerrainCostTable::default();
        for &(tier, cost) in &self.terrain_tier_costs {
            table.set(tier, cost);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        NavConfig::default().validate().expect("valid");
    }

    #[test]
    fn ghost_ring_must_cover_active_ring() {
        let config = NavConfig {
            active_ring_radius: 3,
            ghost_ring_radius: 1,
            ..NavConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tier_overrides_reach_the_table() {
        let config = NavConfig {
            terrain_tier_costs: vec![(7, 40)],
            ..NavConfig::default()
        };
        let table = config.cost_table();
        assert_eq!(table.cost(7), 40);
        assert_eq!(table.cost(0), 10);
    }
}
