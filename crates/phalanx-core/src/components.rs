//! Plain-data components owned by agents. Everything here is written by
//! exactly one pipeline stage per frame; cross-agent effects go through the
//! world's pending-event queues instead of direct writes.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::AgentId;

/// Spatial state of an agent. Mutated exclusively by the movers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// The agent's facing direction.
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }
}

/// Movement tuning and follow state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitMovement {
    pub speed: f32,
    pub turn_speed: f32,
    /// Distance at which the current waypoint counts as reached.
    pub turn_distance: f32,
    pub current_waypoint: usize,
    pub is_following_path: bool,
    pub prev_following_path: bool,
}

impl Default for UnitMovement {
    fn default() -> Self {
        Self {
            speed: 5.0,
            turn_speed: 8.0,
            turn_distance: 0.5,
            current_waypoint: 0,
            is_following_path: false,
            prev_following_path: false,
        }
    }
}

/// How an agent is currently being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NavMode {
    #[default]
    Idle,
    AStar,
    FlowField,
    MacroOnly,
}

/// Navigation intent and routing state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentNavigation {
    pub destination: Vec3,
    pub last_known_position: Vec3,
    pub mode: NavMode,
    /// Absolute time before which the dispatcher will not re-request.
    pub repath_after: f64,
    pub arrival_threshold: f32,
    pub has_destination: bool,
    pub macro_path_done: bool,
}

impl Default for AgentNavigation {
    fn default() -> Self {
        Self {
            destination: Vec3::ZERO,
            last_known_position: Vec3::ZERO,
            mode: NavMode::Idle,
            repath_after: 0.0,
            arrival_threshold: 1.0,
            has_destination: false,
            macro_path_done: false,
        }
    }
}

/// Physical non-progress detector; a poor man's cycle detector for paths
/// that stopped working.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StuckDetection {
    pub last_checked_position: Vec3,
    pub next_check_time: f64,
    pub check_interval: f32,
    pub stuck_distance_threshold: f32,
    pub stuck_count: u32,
    pub max_stuck_count: u32,
}

impl Default for StuckDetection {
    fn default() -> Self {
        Self {
            last_checked_position: Vec3::ZERO,
            next_check_time: 0.0,
            check_interval: 0.5,
            stuck_distance_threshold: 0.3,
            stuck_count: 0,
            max_stuck_count: 3,
        }
    }
}

/// Waypoint storage for the cell-level and chunk-level followers. Cleared
/// whenever a new path overwrites the old one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathBuffers {
    pub waypoints: Vec<Vec3>,
    pub macro_waypoints: Vec<Vec3>,
}

impl PathBuffers {
    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.macro_waypoints.clear();
    }
}

/// One-shot and persistent tag bits, consumed at well-defined stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFlags(u16);

impl AgentFlags {
    pub const PATH_SUCCESS: u16 = 1 << 0;
    pub const PATH_FAILED: u16 = 1 << 1;
    pub const NEEDS_REPATH: u16 = 1 << 2;
    pub const FLOW_FOLLOWER: u16 = 1 << 3;
    pub const STARTED_MOVING: u16 = 1 << 4;
    pub const STOPPED_MOVING: u16 = 1 << 5;

    #[must_use]
    pub const fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u16) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u16) {
        self.0 &= !bit;
    }
}

/// A queued pathfinding request. At most one per agent; re-issuing
/// overwrites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathRequest {
    pub start: Vec3,
    pub end: Vec3,
    pub priority: i32,
    pub requested_at: f64,
}

/// A queued move order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCommand {
    pub destination: Vec3,
    pub priority: i32,
}

/// Weapon classes recognised by the slot manager and AI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeaponKind {
    Melee,
    Ranged,
    RangedAoe,
}

impl WeaponKind {
    /// Whether the slot manager books this weapon on the ranged ring.
    #[must_use]
    pub const fn uses_ranged_ring(self) -> bool {
        matches!(self, WeaponKind::Ranged | WeaponKind::RangedAoe)
    }
}

/// Weapon statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weapon {
    pub kind: WeaponKind,
    pub range: f32,
    pub damage_mult: f32,
    pub speed_mult: f32,
    pub detection_range: f32,
}

impl Weapon {
    #[must_use]
    pub fn melee() -> Self {
        Self {
            kind: WeaponKind::Melee,
            range: 1.0,
            damage_mult: 1.0,
            speed_mult: 1.0,
            detection_range: 20.0,
        }
    }

    #[must_use]
    pub fn ranged() -> Self {
        Self {
            kind: WeaponKind::Ranged,
            range: 8.0,
            damage_mult: 0.8,
            speed_mult: 0.9,
            detection_range: 30.0,
        }
    }
}

/// Behavioural states of the combat AI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AiState {
    #[default]
    Idle,
    Moving,
    Attacking,
    Hit,
    Dead,
}

/// A reserved angular position around a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeleeSlotAssignment {
    pub target: AgentId,
    pub slot_index: u32,
    pub total_slots: u32,
}

impl MeleeSlotAssignment {
    /// Orbit angle of this slot in radians.
    #[must_use]
    pub fn angle(&self) -> f32 {
        (self.slot_index as f32 / self.total_slots.max(1) as f32) * std::f32::consts::TAU
    }
}

/// Everything a combat-capable unit carries beyond the universal columns.
/// Units without this component are pure walkers and never fight.
#[derive(Debug, Clone)]
pub struct CombatRuntime {
    pub name: String,
    pub radius: f32,
    pub faction: u8,
    pub health: f32,
    pub max_health: f32,
    pub weapon: Weapon,
    pub base_damage: f32,
    pub base_attack_speed: f32,
    pub last_attack_time: f64,
    pub state: AiState,
    pub state_timer: f32,
    pub detection_radius: f32,
    pub chase_range: f32,
    pub ping_radius: f32,
    pub obstacle_layers: u8,
    pub scan_interval: f32,
    pub next_scan_time: f64,
    pub target: Option<AgentId>,
    pub target_last_known: Vec3,
    pub current_melee: u32,
    pub current_ranged: u32,
    pub max_melee_slots: u32,
    pub slot: Option<MeleeSlotAssignment>,
    pub time_since_damage: f32,
    pub dead: bool,
}

impl CombatRuntime {
    /// A combatant ready to fight on spawn: the attack timer starts one
    /// full cooldown in the past.
    #[must_use]
    pub fn new(name: impl Into<String>, faction: u8, weapon: Weapon) -> Self {
        let mut runtime = Self {
            name: name.into(),
            radius: 0.5,
            faction,
            health: 100.0,
            max_health: 100.0,
            weapon,
            base_damage: 10.0,
            base_attack_speed: 1.0,
            last_attack_time: 0.0,
            state: AiState::Idle,
            state_timer: 0.0,
            detection_radius: weapon.detection_range,
            chase_range: weapon.detection_range * 1.5,
            ping_radius: 12.0,
            obstacle_layers: 0b0000_0010,
            scan_interval: 0.25,
            next_scan_time: 0.0,
            target: None,
            target_last_known: Vec3::ZERO,
            current_melee: 0,
            current_ranged: 0,
            max_melee_slots: 4,
            slot: None,
            time_since_damage: f32::MAX,
            dead: false,
        };
        runtime.last_attack_time = -f64::from(runtime.attack_cooldown());
        runtime
    }

    /// Seconds between attacks.
    #[must_use]
    pub fn attack_cooldown(&self) -> f32 {
        1.0 / (self.base_attack_speed * self.weapon.speed_mult).max(0.01)
    }

    /// Fraction of health remaining.
    #[must_use]
    pub fn health_frac(&self) -> f32 {
        if self.max_health > 0.0 {
            self.health / self.max_health
        } else {
            0.0
        }
    }

    pub fn transition(&mut self, state: AiState) {
        if self.state != state {
            self.state = state;
            self.state_timer = 0.0;
        }
    }
}

/// An attack that landed this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackHit {
    pub attacker: AgentId,
    pub target: AgentId,
    pub damage: u32,
}

/// Damage queued for the damage stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageEvent {
    pub target: AgentId,
    pub attacker: AgentId,
    pub damage: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_toggle_independently() {
        let mut flags = AgentFlags::default();
        flags.set(AgentFlags::PATH_SUCCESS);
        flags.set(AgentFlags::FLOW_FOLLOWER);
        assert!(flags.contains(AgentFlags::PATH_SUCCESS));
        assert!(flags.contains(AgentFlags::FLOW_FOLLOWER));
        flags.clear(AgentFlags::PATH_SUCCESS);
        assert!(!flags.contains(AgentFlags::PATH_SUCCESS));
        assert!(flags.contains(AgentFlags::FLOW_FOLLOWER));
    }

    #[test]
    fn cooldown_never_divides_by_zero() {
        let mut runtime = CombatRuntime::new("grunt", 0, Weapon::melee());
        runtime.base_attack_speed = 0.0;
        assert!(runtime.attack_cooldown().is_finite());
        assert!(runtime.attack_cooldown() > 0.0);
    }

    #[test]
    fn spawned_units_can_attack_immediately() {
        let runtime = CombatRuntime::new("grunt", 0, Weapon::melee());
        assert!(0.0 >= runtime.last_attack_time + f64::from(runtime.attack_cooldown()));
    }

    #[test]
    fn slot_angles_divide_the_ring() {
        let slot = MeleeSlotAssignment {
            target: AgentId::default(),
            slot_index: 1,
            total_slots: 4,
        };
        let quarter = std::f32::consts::FRAC_PI_2;
        assert!((slot.angle() - quarter).abs() < 1e-6);
    }
}
