//! Shared scenario builders for unit tests: small worlds over flat
//! deterministic physics with an anchor parked at the origin.

use glam::Vec3;

use crate::config::NavConfig;
use crate::physics::FlatWorld;
use crate::streaming::StreamingAnchor;
use crate::{AgentId, World};

pub(crate) fn base_config() -> NavConfig {
    NavConfig {
        chunk_cell_count: 8,
        rng_seed: Some(0xA11CE),
        ..NavConfig::default()
    }
}

fn world_with(config: NavConfig, physics: FlatWorld) -> World {
    let mut world = World::new(config, Box::new(physics)).expect("world");
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
    world
}

/// Flat open world with one walker at `(0.5, 0, 0.5)`.
pub(crate) fn walker_world() -> (World, AgentId) {
    let config = base_config();
    let physics = FlatWorld::new(0.0, config.ground_layer);
    let mut world = world_with(config, physics);
    let agent = world.spawn_walker(Vec3::new(0.5, 0.0, 0.5));
    (world, agent)
}

/// Like [`walker_world`] but with a wall across column `x = 4` of chunk
/// `(0, 0)` leaving gaps at the edge rows, and the path batch capped at
/// two requests per frame.
pub(crate) fn walker_world_with_wall() -> (World, AgentId) {
    let config = NavConfig {
        max_path_requests_per_frame: 2,
        ..base_config()
    };
    let physics = FlatWorld::new(0.0, config.ground_layer).with_obstacle(
        Vec3::new(4.0, 0.0, 1.0),
        Vec3::new(5.0, 2.0, 7.0),
        config.unwalkable_layer,
    );
    let mut world = world_with(config, physics);
    let agent = world.spawn_walker(Vec3::new(0.5, 0.0, 0.5));
    (world, agent)
}

/// Flat world with `count` walkers clustered near `(1.5, 1.5)` and a
/// short flow-field TTL.
pub(crate) fn crowd_world(count: usize) -> (World, Vec<AgentId>) {
    let config = NavConfig {
        field_expiry: 0.3,
        max_path_requests_per_frame: 64,
        ..base_config()
    };
    let physics = FlatWorld::new(0.0, config.ground_layer);
    let mut world = world_with(config, physics);
    let agents = (0..count)
        .map(|i| {
            let dx = (i % 4) as f32 * 0.3;
            let dz = (i / 4) as f32 * 0.3;
            world.spawn_walker(Vec3::new(1.2 + dx, 0.0, 1.2 + dz))
        })
        .collect();
    (world, agents)
}

/// Flat open world tuned for combat tests: fast regen comeback and no
/// walls.
pub(crate) fn combat_world() -> World {
    let config = NavConfig {
        out_of_combat_delay: 1.0,
        ..base_config()
    };
    let physics = FlatWorld::new(0.0, config.ground_layer);
    world_with(config, physics)
}

/// Combat world with a tall wall between `x = 6` and `x = 7` blocking
/// line of sight across it.
pub(crate) fn combat_world_with_los_wall() -> World {
    let config = NavConfig {
        out_of_combat_delay: 1.0,
        ..base_config()
    };
    let physics = FlatWorld::new(0.0, config.ground_layer).with_obstacle(
        Vec3::new(6.0, 0.0, 0.0),
        Vec3::new(7.0, 4.0, 8.0),
        config.unwalkable_layer,
    );
    world_with(config, physics)
}
