//! Movers: advance agents along cell waypoints, macro chunk centres, or
//! sampled flow vectors. All three share the same kinematics: slerp the
//! facing toward the desired heading, then advance scaled by how well the
//! body is aligned with it. Ground units keep their height; flyers may
//! pitch toward targets above or below.
//!
//! After the movers run, follow-state transitions become one-frame
//! `StartedMoving` / `StoppedMoving` tags, and active chunks get their
//! per-cell occupancy refreshed.

use glam::{Quat, Vec3};
use rayon::prelude::*;

use crate::components::{AgentFlags, NavMode, Transform, UnitMovement};
use crate::{FrameEvents, World};

/// Minimum alignment factor for waypoint followers.
const ALIGN_FLOOR_PATH: f32 = 0.25;
/// Minimum alignment factor for flow-field followers.
const ALIGN_FLOOR_FLOW: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
struct MoveOutcome {
    transform: Transform,
    current_waypoint: usize,
    is_following: bool,
    macro_exhausted: bool,
}

/// Rotate toward `direction` and advance, returning the updated transform.
fn advance(
    transform: &Transform,
    direction: Vec3,
    movement: &UnitMovement,
    dt: f32,
    speed_scale: f32,
    align_floor: f32,
) -> Transform {
    let mut out = *transform;
    let desired = direction.normalize_or_zero();
    if desired == Vec3::ZERO {
        return out;
    }
    let target_rotation = Quat::from_rotation_y(desired.x.atan2(desired.z));
    let t = (movement.turn_speed * dt).min(1.0);
    out.rotation = out.rotation.slerp(target_rotation, t).normalize();
    let forward = out.rotation * Vec3::Z;
    let alignment = forward.dot(desired).clamp(align_floor, 1.0);
    out.position += forward * movement.speed * speed_scale * alignment * dt;
    out
}

/// Flatten a heading for ground units so they never pitch into the floor.
fn flatten(direction: Vec3, is_flying: bool) -> Vec3 {
    if is_flying {
        direction
    } else {
        Vec3::new(direction.x, 0.0, direction.z)
    }
}

impl World {
    pub(crate) fn stage_movement(&mut self) {
        let dt = self.config.frame_dt;
        let macro_reach = self.config.macro_reach_distance;

        let outcomes: Vec<Option<MoveOutcome>> = {
            let columns = self.agents.columns();
            let transforms = columns.transforms();
            let movement = columns.movement();
            let navigation = columns.navigation();
            let paths = columns.paths();
            let permissions = columns.permissions();
            let sampled = columns.sampled_flow();
            (0..columns.len())
                .into_par_iter()
                .map(|index| {
                    let nav = navigation[index];
                    let mv = movement[index];
                    let tf = transforms[index];
                    let flying = permissions[index].is_flying;
                    match nav.mode {
                        NavMode::Idle => None,
                        NavMode::AStar => {
                            if !mv.is_following_path {
                                return None;
                            }
                            follow_waypoints(
                                &tf,
                                &mv,
                                &paths[index].waypoints,
                                mv.turn_distance,
                                flying,
                                dt,
                                FollowKind::Cells,
                            )
                        }
                        NavMode::MacroOnly => {
                            if !mv.is_following_path {
                                return None;
                            }
                            follow_waypoints(
                                &tf,
                                &mv,
                                &paths[index].macro_waypoints,
                                macro_reach,
                                flying,
                                dt,
                                FollowKind::Macro,
                            )
                        }
                        NavMode::FlowField => {
                            if !nav.has_destination {
                                return None;
                            }
                            let direction = match sampled[index] {
                                Some(v) => Vec3::new(v.x, 0.0, v.y),
                                None => flatten(nav.destination - tf.position, flying),
                            };
                            let transform =
                                advance(&tf, direction, &mv, dt, 1.0, ALIGN_FLOOR_FLOW);
                            Some(MoveOutcome {
                                transform,
                                current_waypoint: mv.current_waypoint,
                                is_following: nav.has_destination,
                                macro_exhausted: false,
                            })
                        }
                    }
                })
                .collect()
        };

        for (index, outcome) in outcomes.into_iter().enumerate() {
            let Some(outcome) = outcome else { continue };
            {
                let (_, movement, navigation, paths, _) =
                    self.agents.columns_mut().split_nav_mut();
                movement[index].current_waypoint = outcome.current_waypoint;
                movement[index].is_following_path = outcome.is_following;
                if outcome.macro_exhausted {
                    navigation[index].macro_path_done = true;
                    navigation[index].mode = NavMode::AStar;
                    paths[index].macro_waypoints.clear();
                } else if !outcome.is_following && navigation[index].mode == NavMode::AStar {
                    // Exhausted buffers may not outlive the follow state.
                    paths[index].waypoints.clear();
                    movement[index].current_waypoint = 0;
                }
            }
            self.agents.columns_mut().transforms_mut()[index] = outcome.transform;
        }
    }

    /// Turn follow-state transitions into one-frame movement tags.
    pub(crate) fn stage_movement_events(&mut self, events: &mut FrameEvents) {
        let handles = self.agents.handles().to_vec();
        let (_, movement, _, _, flags) = self.agents.columns_mut().split_nav_mut();
        for (index, id) in handles.into_iter().enumerate() {
            let following = movement[index].is_following_path;
            let previous = movement[index].prev_following_path;
            if following && !previous {
                flags[index].set(AgentFlags::STARTED_MOVING);
                events.started_moving.push(id);
            } else if !following && previous {
                flags[index].set(AgentFlags::STOPPED_MOVING);
                events.stopped_moving.push(id);
            }
            movement[index].prev_following_path = following;
        }
    }

    /// Refresh per-cell occupancy counters of every active chunk from the
    /// post-move agent positions.
    pub(crate) fn stage_occupancy(&mut self) {
        let spec = self.spec;
        let positions: Vec<Vec3> = self
            .agents
            .columns()
            .transforms()
            .iter()
            .map(|t| t.position)
            .collect();
        for record in self.chunks.iter_mut() {
            if let Some(dynamic) = record.dynamic.as_mut() {
                for node in &mut dynamic.nodes {
                    node.occupancy_count = 0;
                }
            }
        }
        for position in positions {
            let chunk = spec.world_to_chunk(position);
            let Some(record) = self.chunks.get_mut(chunk) else {
                continue;
            };
            let Some(dynamic) = record.dynamic.as_mut() else {
                continue;
            };
            let (lx, lz) = spec.cell_local(spec.world_to_cell(position));
            let node = &mut dynamic.nodes[spec.local_index(lx, lz)];
            node.occupancy_count = node.occupancy_count.saturating_add(1);
        }
    }

    /// Late cleanup: movement tags stay visible for exactly one frame.
    /// Path failure tags persist until the next request clears them.
    pub(crate) fn stage_late_cleanup(&mut self) {
        for flags in self.agents.columns_mut().flags_mut() {
            flags.clear(AgentFlags::STARTED_MOVING);
            flags.clear(AgentFlags::STOPPED_MOVING);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowKind {
    /// Cell waypoints: eases into the final waypoint for smooth arrival.
    Cells,
    /// Chunk centres: exhausting the list hands the agent back to A*.
    Macro,
}

/// Shared waypoint-following logic for the cell-level and macro movers.
fn follow_waypoints(
    transform: &Transform,
    movement: &UnitMovement,
    waypoints: &[Vec3],
    reach_distance: f32,
    flying: bool,
    dt: f32,
    kind: FollowKind,
) -> Option<MoveOutcome> {
    let mut current = movement.current_waypoint;
    loop {
        if current >= waypoints.len() {
            return Some(MoveOutcome {
                transform: *transform,
                current_waypoint: current,
                is_following: false,
                macro_exhausted: kind == FollowKind::Macro,
            });
        }
        let target = waypoints[current];
        let to_target = flatten(target - transform.position, flying);
        let distance = to_target.length();
        if distance <= reach_distance {
            current += 1;
            continue;
        }
        let last = current + 1 == waypoints.len();
        let speed_scale = if kind == FollowKind::Cells && last {
            (distance / (3.0 * reach_distance.max(1e-3))).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let transform = advance(
            transform,
            to_target,
            movement,
            dt,
            speed_scale,
            ALIGN_FLOOR_PATH,
        );
        return Some(MoveOutcome {
            transform,
            current_waypoint: current,
            is_following: true,
            macro_exhausted: false,
        });
    }
}
