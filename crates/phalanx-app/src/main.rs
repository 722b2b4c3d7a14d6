//! Headless scenario shell for the phalanx simulation core: builds a flat
//! deterministic world, seeds one of a few canned scenarios, steps the
//! frame pipeline and logs periodic summaries.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use glam::Vec3;
use phalanx_core::{
    CombatRuntime, FlatWorld, NavConfig, StreamingAnchor, Weapon, World,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "phalanx", version, about = "Navigation and combat-AI simulation shell")]
struct AppCli {
    /// Scenario to seed the world with.
    #[arg(long, value_enum, default_value_t = Scenario::Skirmish)]
    scenario: Scenario,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 1800)]
    frames: u32,

    /// Frames between logged summaries.
    #[arg(long, default_value_t = 120)]
    report_interval: u32,

    /// RNG seed override for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// JSON configuration layers applied over the defaults, in order.
    #[arg(long = "config")]
    config_layers: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Two melee warbands clash in an open field.
    Skirmish,
    /// A crowd shares one destination and collapses onto a flow field.
    Crowd,
    /// A lone walker marches far beyond the streamed rings.
    March,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = AppCli::parse();
    let config = compose_config(&cli)?;
    let mut world = build_world(&cli, config)?;

    info!(scenario = ?cli.scenario, frames = cli.frames, "starting simulation");
    let mut total_attacks = 0usize;
    let mut total_deaths = 0usize;
    for frame in 0..cli.frames {
        let events = world.step();
        total_attacks += events.attacks.len();
        total_deaths += events.deaths.len();
        if cli.report_interval > 0 && (frame + 1) % cli.report_interval == 0 {
            if let Some(summary) = world.history().last() {
                info!(
                    tick = summary.tick.0,
                    agents = summary.agent_count,
                    live = summary.live_combatants,
                    avg_health = summary.average_health,
                    chunks = summary.loaded_chunks,
                    active = summary.active_chunks,
                    fields = summary.flow_fields,
                    pending_paths = summary.pending_path_requests,
                    "frame summary"
                );
            }
        }
    }

    let summary = world
        .history()
        .last()
        .context("no frame summaries recorded")?;
    info!(
        ticks = summary.tick.0,
        agents = summary.agent_count,
        live = summary.live_combatants,
        attacks = total_attacks,
        deaths = total_deaths,
        "simulation finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Defaults, then JSON layers, then CLI overrides.
fn compose_config(cli: &AppCli) -> Result<NavConfig> {
    let mut config = NavConfig {
        rng_seed: Some(0xCAFE),
        ..NavConfig::default()
    };
    for path in &cli.config_layers {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config layer {}", path.display()))?;
        let layer: serde_json::Value =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let mut base = serde_json::to_value(&config)?;
        merge_json(&mut base, layer);
        config = serde_json::from_value(base)
            .with_context(|| format!("applying config layer {}", path.display()))?;
    }
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }
    Ok(config)
}

fn merge_json(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn build_world(cli: &AppCli, config: NavConfig) -> Result<World> {
    let physics = FlatWorld::new(0.0, config.ground_layer)
        .with_obstacle(
            Vec3::new(14.0, 0.0, -6.0),
            Vec3::new(16.0, 2.0, 6.0),
            config.unwalkable_layer,
        )
        .with_obstacle(
            Vec3::new(-16.0, 0.0, -6.0),
            Vec3::new(-14.0, 2.0, 6.0),
            config.unwalkable_layer,
        );
    let mut world = World::new(config, Box::new(physics))?;
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO).with_priority(1));

    match cli.scenario {
        Scenario::Skirmish => seed_skirmish(&mut world),
        Scenario::Crowd => seed_crowd(&mut world),
        Scenario::March => seed_march(&mut world),
    }
    Ok(world)
}

fn seed_skirmish(world: &mut World) {
    for i in 0..8 {
        let west = world.spawn_walker_jittered(Vec3::new(-10.0, 0.0, i as f32 * 2.0 - 7.0), 0.5);
        let weapon = if i % 3 == 0 {
            Weapon::ranged()
        } else {
            Weapon::melee()
        };
        world.set_combat(west, CombatRuntime::new(format!("west-{i}"), 0, weapon));

        let east = world.spawn_walker_jittered(Vec3::new(10.0, 0.0, i as f32 * 2.0 - 7.0), 0.5);
        let weapon = if i % 4 == 0 {
            Weapon::ranged()
        } else {
            Weapon::melee()
        };
        world.set_combat(east, CombatRuntime::new(format!("east-{i}"), 1, weapon));
    }
    info!("seeded skirmish: 8 vs 8 across the field");
}

fn seed_crowd(world: &mut World) {
    let destination = Vec3::new(20.0, 0.0, 20.0);
    let mut marchers = Vec::new();
    for i in 0..16 {
        let dx = (i % 4) as f32 * 1.2;
        let dz = (i / 4) as f32 * 1.2;
        let agent = world.spawn_walker_jittered(Vec3::new(-6.0 + dx, 0.0, -6.0 + dz), 0.3);
        marchers.push(agent);
    }
    for agent in marchers {
        world.command_move(agent, destination, 1);
    }
    info!("seeded crowd: 16 marchers, one destination");
}

fn seed_march(world: &mut World) {
    let walker = world.spawn_walker(Vec3::new(0.5, 0.0, 0.5));
    world.add_anchor(StreamingAnchor::following(walker));
    world.command_move(walker, Vec3::new(120.0, 0.0, 40.0), 1);
    info!("seeded march: one walker, distant goal");
}
