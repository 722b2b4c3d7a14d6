//! Flow-field lifecycle: one field per `(destination hash, chunk)` pair,
//! built for a crowd destination's chunk and its eight neighbours, expired
//! on a coarse TTL, and sampled on the main thread into a per-agent
//! steering column the flow mover consumes.

use std::collections::HashMap;

use glam::{Vec2, Vec3};
use phalanx_grid::flow::{build_flow_field, FlowFieldData};
use phalanx_grid::ChunkCoord;
use tracing::trace;

use crate::components::AgentFlags;
use crate::{FrameEvents, World};

/// One built field record.
#[derive(Debug)]
pub struct FlowFieldRecord {
    pub destination_hash: u64,
    pub chunk: ChunkCoord,
    pub destination: Vec3,
    pub data: FlowFieldData,
    pub is_ready: bool,
    pub built_at: f64,
}

/// Registry of live flow fields.
#[derive(Debug, Default)]
pub struct FlowFieldRegistry {
    fields: HashMap<(u64, ChunkCoord), FlowFieldRecord>,
}

impl FlowFieldRegistry {
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn get(&self, hash: u64, chunk: ChunkCoord) -> Option<&FlowFieldRecord> {
        self.fields.get(&(hash, chunk))
    }

    /// Distinct destination hashes currently held.
    #[must_use]
    pub fn destination_count(&self) -> usize {
        let mut hashes: Vec<u64> = self.fields.keys().map(|(h, _)| *h).collect();
        hashes.sort_unstable();
        hashes.dedup();
        hashes.len()
    }
}

impl World {
    /// Build missing or expired fields for every destination that still has
    /// flow followers, and drop records nobody wants once their TTL runs
    /// out.
    pub(crate) fn stage_flow_build(&mut self, events: &mut FrameEvents) {
        let now = self.time;
        let expiry = f64::from(self.config.field_expiry);
        let spec = self.spec;

        let mut wanted: HashMap<(u64, ChunkCoord), Vec3> = HashMap::new();
        {
            let columns = self.agents.columns();
            let navigation = columns.navigation();
            let flags = columns.flags();
            for index in 0..columns.len() {
                if !flags[index].contains(AgentFlags::FLOW_FOLLOWER)
                    || !navigation[index].has_destination
                {
                    continue;
                }
                let destination = navigation[index].destination;
                let cell = spec.world_to_cell(destination);
                let hash = cell.packed();
                let home = spec.cell_to_chunk(cell);
                for dz in -1..=1 {
                    for dx in -1..=1 {
                        let chunk = ChunkCoord::new(home.x + dx, home.z + dz);
                        wanted.entry((hash, chunk)).or_insert(destination);
                    }
                }
            }
        }

        self.flow_fields
            .fields
            .retain(|key, record| wanted.contains_key(key) || now - record.built_at <= expiry);

        for ((hash, chunk), destination) in wanted {
            let needs_build = match self.flow_fields.fields.get(&(hash, chunk)) {
                None => true,
                Some(record) => now - record.built_at > expiry,
            };
            if !needs_build {
                continue;
            }
            let Some(blob) = self.chunks.get(chunk).and_then(|r| r.blob.as_deref()) else {
                continue;
            };
            let goal_cell = spec.world_to_cell(destination);
            let (goal_lx, goal_lz) = spec.clamp_cell_to_chunk(goal_cell, chunk);
            let data = build_flow_field(blob, goal_lx, goal_lz, &self.cost_table);
            self.flow_fields.fields.insert(
                (hash, chunk),
                FlowFieldRecord {
                    destination_hash: hash,
                    chunk,
                    destination,
                    data,
                    is_ready: true,
                    built_at: now,
                },
            );
            events.fields_built += 1;
            trace!(hash, ?chunk, "built flow field");
        }
    }

    /// Main-thread sampling pass: every flow follower gets this frame's
    /// steering vector, or `None` so the mover falls back to direct
    /// steering.
    pub(crate) fn stage_flow_sample(&mut self) {
        let spec = self.spec;
        let samples: Vec<Option<Vec2>> = {
            let columns = self.agents.columns();
            let transforms = columns.transforms();
            let navigation = columns.navigation();
            let flags = columns.flags();
            (0..columns.len())
                .map(|index| {
                    if !flags[index].contains(AgentFlags::FLOW_FOLLOWER)
                        || !navigation[index].has_destination
                    {
                        return None;
                    }
                    let position = transforms[index].position;
                    let hash = spec.world_to_cell(navigation[index].destination).packed();
                    let chunk = spec.world_to_chunk(position);
                    let record = self.flow_fields.get(hash, chunk)?;
                    if !record.is_ready {
                        return None;
                    }
                    let (lx, lz) = spec.cell_local(spec.world_to_cell(position));
                    let v = record.data.vector(lx, lz);
                    let vector = Vec2::new(v[0], v[1]);
                    (vector.length_squared() > 1e-6).then_some(vector)
                })
                .collect()
        };
        self.agents
            .columns_mut()
            .sampled_flow_mut()
            .copy_from_slice(&samples);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::components::NavMode;
    use crate::test_support::crowd_world;

    #[test]
    fn crowded_destination_collapses_to_one_field() {
        let (mut world, agents) = crowd_world(12);
        let destination = Vec3::new(5.5, 0.0, 5.5);
        for &agent in &agents {
            world.command_move(agent, destination, 1);
        }
        world.step();
        world.step();
        for &agent in &agents {
            let nav = world.agent_navigation(agent).expect("navigation");
            assert_eq!(nav.mode, NavMode::FlowField, "agent should ride the field");
        }
        assert_eq!(world.flow_fields().destination_count(), 1);
        assert!(world.flow_fields().len() >= 1);
    }

    #[test]
    fn small_groups_keep_individual_paths() {
        let (mut world, agents) = crowd_world(3);
        let destination = Vec3::new(5.5, 0.0, 5.5);
        for &agent in &agents {
            world.command_move(agent, destination, 1);
        }
        world.step();
        world.step();
        for &agent in &agents {
            let nav = world.agent_navigation(agent).expect("navigation");
            assert_eq!(nav.mode, NavMode::AStar);
        }
        assert!(world.flow_fields().is_empty());
    }

    #[test]
    fn flow_riders_follow_and_report_movement_once() {
        let (mut world, agents) = crowd_world(12);
        let destination = Vec3::new(5.5, 0.0, 5.5);
        for &agent in &agents {
            world.command_move(agent, destination, 1);
        }
        let first = world.step();
        for &agent in &agents {
            let nav = world.agent_navigation(agent).expect("navigation");
            assert_eq!(nav.mode, NavMode::FlowField);
            let movement = world.agent_movement(agent).expect("movement");
            assert!(
                movement.is_following_path,
                "a steering flow rider is following its destination"
            );
            assert!(first.started_moving.contains(&agent));
        }
        let second = world.step();
        assert!(
            second.started_moving.is_empty(),
            "the start transition fires exactly once"
        );
        for &agent in &agents {
            let movement = world.agent_movement(agent).expect("movement");
            assert!(movement.is_following_path);
        }
    }

    #[test]
    fn abandoned_fields_expire() {
        let (mut world, agents) = crowd_world(12);
        let destination = Vec3::new(5.5, 0.0, 5.5);
        for &agent in &agents {
            world.command_move(agent, destination, 1);
        }
        world.step();
        world.step();
        assert!(!world.flow_fields().is_empty());
        for &agent in &agents {
            world.command_stop(agent);
        }
        // TTL in the test config is short; a handful of frames clears it.
        for _ in 0..40 {
            world.step();
        }
        assert!(world.flow_fields().is_empty());
    }
}
