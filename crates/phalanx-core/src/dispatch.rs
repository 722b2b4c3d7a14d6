//! Navigation dispatcher: per agent, decides between cell-level A*, shared
//! flow fields and macro (chunk-level) routing, handles arrival and the
//! macro-to-A* handoff, and converts physical non-progress into elevated
//! priority repaths.

use std::collections::HashMap;

use glam::Vec3;
use rayon::prelude::*;

use crate::components::{AgentFlags, NavMode, PathRequest};
use crate::World;

/// Priority used when a stuck agent re-requests its path.
const REPATH_PRIORITY: i32 = 2;

#[derive(Debug, Clone, Copy)]
enum DispatchAction {
    Arrive,
    MacroHandoff,
    Switch(NavMode),
}

#[derive(Debug, Clone, Copy)]
struct StuckUpdate {
    last_checked_position: Vec3,
    next_check_time: f64,
    stuck_count: u32,
    trigger_repath: bool,
}

impl World {
    pub(crate) fn stage_dispatch(&mut self) {
        let now = self.time;
        let spec = self.spec;
        let cooldown = f64::from(self.config.repath_cooldown);
        let arrival_floor = self.config.arrival_floor;
        let crowd_threshold = self.config.crowd_threshold;

        // Quantized destination census for crowd detection.
        let mut crowd: HashMap<u64, usize> = HashMap::new();
        for nav in self.agents.columns().navigation() {
            if nav.has_destination {
                let key = spec.world_to_cell(nav.destination).packed();
                *crowd.entry(key).or_insert(0) += 1;
            }
        }

        let mut actions: Vec<(usize, DispatchAction)> = Vec::new();
        {
            let columns = self.agents.columns();
            let transforms = columns.transforms();
            let movement = columns.movement();
            let navigation = columns.navigation();
            for index in 0..columns.len() {
                let nav = navigation[index];
                if !nav.has_destination {
                    continue;
                }
                let position = transforms[index].position;
                let arrival = nav.arrival_threshold.max(arrival_floor);
                if position.distance(nav.destination) <= arrival {
                    actions.push((index, DispatchAction::Arrive));
                    continue;
                }
                if nav.macro_path_done {
                    actions.push((index, DispatchAction::MacroHandoff));
                    continue;
                }
                if movement[index].is_following_path && nav.mode != NavMode::Idle {
                    continue;
                }
                let destination_chunk = spec.world_to_chunk(nav.destination);
                let desired = if !self.chunks.is_static_ready(destination_chunk) {
                    NavMode::MacroOnly
                } else {
                    let key = spec.world_to_cell(nav.destination).packed();
                    if crowd.get(&key).copied().unwrap_or(0) >= crowd_threshold {
                        NavMode::FlowField
                    } else {
                        NavMode::AStar
                    }
                };
                if desired != nav.mode || now >= nav.repath_after {
                    actions.push((index, DispatchAction::Switch(desired)));
                }
            }
        }

        let handles = self.agents.handles().to_vec();
        for (index, action) in actions {
            let id = handles[index];
            let position = self.agents.columns().transforms()[index].position;
            let (_, movement, navigation, paths, flags) =
                self.agents.columns_mut().split_nav_mut();
            let nav = &mut navigation[index];
            match action {
                DispatchAction::Arrive => {
                    nav.mode = NavMode::Idle;
                    nav.has_destination = false;
                    nav.macro_path_done = false;
                    movement[index].is_following_path = false;
                    movement[index].current_waypoint = 0;
                    paths[index].clear();
                    flags[index].clear(AgentFlags::FLOW_FOLLOWER);
                    self.path_requests.remove(id);
                }
                DispatchAction::MacroHandoff => {
                    nav.macro_path_done = false;
                    nav.mode = NavMode::AStar;
                    nav.repath_after = now + cooldown;
                    paths[index].macro_waypoints.clear();
                    self.path_requests.insert(
                        id,
                        PathRequest {
                            start: position,
                            end: nav.destination,
                            priority: 1,
                            requested_at: now,
                        },
                    );
                }
                DispatchAction::Switch(NavMode::FlowField) => {
                    nav.mode = NavMode::FlowField;
                    nav.repath_after = now + cooldown;
                    movement[index].is_following_path = false;
                    movement[index].current_waypoint = 0;
                    paths[index].clear();
                    flags[index].set(AgentFlags::FLOW_FOLLOWER);
                    self.path_requests.remove(id);
                }
                DispatchAction::Switch(mode) => {
                    nav.mode = mode;
                    nav.repath_after = now + cooldown;
                    flags[index].clear(AgentFlags::FLOW_FOLLOWER);
                    self.path_requests.insert(
                        id,
                        PathRequest {
                            start: position,
                            end: nav.destination,
                            priority: 1,
                            requested_at: now,
                        },
                    );
                }
            }
        }

        self.run_stuck_detection(now);
        self.convert_repath_requests(now);
    }

    /// Samples agent movement on a fixed interval; enough consecutive
    /// samples without progress abandon the path and request a fresh one.
    fn run_stuck_detection(&mut self, now: f64) {
        let updates: Vec<Option<StuckUpdate>> = {
            let columns = self.agents.columns();
            let transforms = columns.transforms();
            let movement = columns.movement();
            let stuck = columns.stuck();
            (0..columns.len())
                .into_par_iter()
                .map(|index| {
                    let state = stuck[index];
                    if now < state.next_check_time {
                        return None;
                    }
                    let position = transforms[index].position;
                    let moved = position.distance(state.last_checked_position);
                    let mut count = state.stuck_count;
                    let mut trigger = false;
                    if movement[index].is_following_path {
                        if moved < state.stuck_distance_threshold {
                            count += 1;
                            if count >= state.max_stuck_count {
                                trigger = true;
                                count = 0;
                            }
                        } else {
                            count = 0;
                        }
                    } else {
                        count = 0;
                    }
                    Some(StuckUpdate {
                        last_checked_position: position,
                        next_check_time: now + f64::from(state.check_interval),
                        stuck_count: count,
                        trigger_repath: trigger,
                    })
                })
                .collect()
        };

        for (index, update) in updates.into_iter().enumerate() {
            let Some(update) = update else { continue };
            let (_, movement, _, paths, flags) = self.agents.columns_mut().split_nav_mut();
            if update.trigger_repath {
                movement[index].is_following_path = false;
                movement[index].current_waypoint = 0;
                paths[index].clear();
                flags[index].set(AgentFlags::NEEDS_REPATH);
            }
            let stuck = &mut self.agents.columns_mut().stuck_mut()[index];
            stuck.last_checked_position = update.last_checked_position;
            stuck.next_check_time = update.next_check_time;
            stuck.stuck_count = update.stuck_count;
        }
    }

    /// Converts repath tags into fresh requests at elevated priority.
    fn convert_repath_requests(&mut self, now: f64) {
        let cooldown = f64::from(self.config.repath_cooldown);
        let handles = self.agents.handles().to_vec();
        for (index, id) in handles.into_iter().enumerate() {
            let needs = self.agents.columns().flags()[index].contains(AgentFlags::NEEDS_REPATH);
            if !needs {
                continue;
            }
            let position = self.agents.columns().transforms()[index].position;
            let (_, _, navigation, _, flags) = self.agents.columns_mut().split_nav_mut();
            flags[index].clear(AgentFlags::NEEDS_REPATH);
            let nav = &mut navigation[index];
            if !nav.has_destination {
                continue;
            }
            nav.repath_after = now + cooldown;
            self.path_requests.insert(
                id,
                PathRequest {
                    start: position,
                    end: nav.destination,
                    priority: REPATH_PRIORITY,
                    requested_at: now,
                },
            );
        }
    }
}
