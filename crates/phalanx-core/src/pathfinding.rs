//! Per-frame pathfinding batch: queued requests are drained in priority
//! order up to a configurable cap, classified by which end-chunks are
//! loaded, and solved against an immutable snapshot of the loaded grid.
//! Results land as waypoint buffers plus one-shot success/failure tags.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use phalanx_grid::astar::{find_path, find_path_single, path_waypoints, LoadedGrid};
use phalanx_grid::ChunkStaticBlob;
use rayon::prelude::*;
use tracing::trace;

use crate::components::{AgentFlags, NavMode, PathRequest};
use crate::{AgentId, FrameEvents, World};

#[derive(Debug)]
enum PathOutcome {
    Cells(Vec<Vec3>),
    Macro(Vec<Vec3>),
    Failed,
}

impl World {
    pub(crate) fn stage_pathfinding(&mut self, events: &mut FrameEvents) {
        if self.path_requests.is_empty() {
            return;
        }

        // Gather and prioritise pending requests; agents still carrying an
        // unconsumed success tag wait for the handler first.
        let mut batch: Vec<(AgentId, usize, PathRequest)> = self
            .path_requests
            .iter()
            .filter_map(|(id, request)| {
                let index = self.agents.index_of(id)?;
                let flags = self.agents.columns().flags()[index];
                if flags.contains(AgentFlags::PATH_SUCCESS) {
                    return None;
                }
                Some((id, index, *request))
            })
            .collect();
        batch.sort_by(|a, b| {
            b.2.priority.cmp(&a.2.priority).then(
                a.2.requested_at
                    .partial_cmp(&b.2.requested_at)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        batch.truncate(self.config.max_path_requests_per_frame);
        if batch.is_empty() {
            return;
        }

        let spec = self.spec;
        let mut blobs: Vec<Arc<ChunkStaticBlob>> = self.chunks.loaded_blobs().cloned().collect();
        // Stable snapshot order keeps A* tie-breaking deterministic.
        blobs.sort_by_key(|b| b.coord);
        let grid = LoadedGrid::new(spec, blobs.iter().map(Arc::as_ref));
        let blob_by_coord: HashMap<_, &ChunkStaticBlob> =
            blobs.iter().map(|b| (b.coord, b.as_ref())).collect();
        let macro_graph = &self.macro_graph;
        let table = &self.cost_table;
        let permissions = self.agents.columns().permissions();

        let outcomes: Vec<(AgentId, PathOutcome)> = batch
            .par_iter()
            .map(|&(id, index, request)| {
                let perms = &permissions[index];
                let start_chunk = spec.world_to_chunk(request.start);
                let end_chunk = spec.world_to_chunk(request.end);
                let start_loaded = grid.contains_chunk(start_chunk);
                let end_loaded = grid.contains_chunk(end_chunk);

                let outcome = if start_loaded && end_loaded && start_chunk == end_chunk {
                    let blob = blob_by_coord[&start_chunk];
                    match find_path_single(blob, spec, request.start, request.end, perms, table) {
                        Ok(path) => {
                            PathOutcome::Cells(path_waypoints(spec, &path, request.end))
                        }
                        Err(_) => PathOutcome::Failed,
                    }
                } else if start_loaded && end_loaded {
                    match find_path(&grid, request.start, request.end, perms, table) {
                        Ok(path) => {
                            PathOutcome::Cells(path_waypoints(spec, &path, request.end))
                        }
                        Err(_) => PathOutcome::Failed,
                    }
                } else {
                    match macro_graph.find_route(start_chunk, end_chunk) {
                        Some(route) => PathOutcome::Macro(
                            route[1..].iter().map(|c| spec.chunk_center(*c)).collect(),
                        ),
                        None => PathOutcome::Failed,
                    }
                };
                (id, outcome)
            })
            .collect();

        trace!(processed = outcomes.len(), "pathfinding batch complete");

        for (id, outcome) in outcomes {
            let Some(index) = self.agents.index_of(id) else {
                continue;
            };
            let (_, movement, navigation, paths, flags) =
                self.agents.columns_mut().split_nav_mut();
            // An agent re-routed onto a flow field (or stopped) since the
            // request was queued has no use for this result.
            if matches!(navigation[index].mode, NavMode::FlowField | NavMode::Idle) {
                self.path_requests.remove(id);
                continue;
            }
            match outcome {
                PathOutcome::Cells(waypoints) => {
                    paths[index].waypoints = waypoints;
                    paths[index].macro_waypoints.clear();
                    navigation[index].mode = NavMode::AStar;
                    flags[index].clear(AgentFlags::PATH_FAILED);
                    flags[index].set(AgentFlags::PATH_SUCCESS);
                    events.paths_succeeded += 1;
                }
                PathOutcome::Macro(waypoints) => {
                    paths[index].macro_waypoints = waypoints;
                    paths[index].waypoints.clear();
                    navigation[index].mode = NavMode::MacroOnly;
                    flags[index].clear(AgentFlags::PATH_FAILED);
                    flags[index].set(AgentFlags::PATH_SUCCESS);
                    events.paths_succeeded += 1;
                }
                PathOutcome::Failed => {
                    paths[index].clear();
                    movement[index].is_following_path = false;
                    movement[index].current_waypoint = 0;
                    flags[index].clear(AgentFlags::PATH_SUCCESS);
                    flags[index].set(AgentFlags::PATH_FAILED);
                    events.paths_failed += 1;
                }
            }
            self.path_requests.remove(id);
        }
    }

    /// Consumes success tags: points the follower at the first waypoint of
    /// the fresh buffer. A success with an empty buffer (start and goal in
    /// one cell) leaves the agent for the arrival check instead.
    pub(crate) fn stage_path_success(&mut self) {
        let (_, movement, navigation, paths, flags) = self.agents.columns_mut().split_nav_mut();
        for index in 0..movement.len() {
            if !flags[index].contains(AgentFlags::PATH_SUCCESS) {
                continue;
            }
            match navigation[index].mode {
                NavMode::AStar => {
                    movement[index].is_following_path = !paths[index].waypoints.is_empty();
                    movement[index].current_waypoint = 0;
                }
                NavMode::MacroOnly => {
                    let has_route = !paths[index].macro_waypoints.is_empty();
                    movement[index].is_following_path = has_route;
                    movement[index].current_waypoint = 0;
                    if !has_route {
                        navigation[index].macro_path_done = true;
                    }
                }
                NavMode::FlowField | NavMode::Idle => {}
            }
            flags[index].clear(AgentFlags::PATH_SUCCESS);
        }
    }
}
