use glam::Vec3;
use phalanx_core::{
    AgentFlags, AiState, CombatRuntime, FlatWorld, NavConfig, NavMode, StreamingAnchor, Tick,
    Weapon, World,
};
use phalanx_grid::ChunkCoord;

fn flat_world(config: NavConfig) -> World {
    let physics = Box::new(FlatWorld::new(0.0, config.ground_layer));
    World::new(config, physics).expect("world")
}

fn small_config() -> NavConfig {
    NavConfig {
        chunk_cell_count: 8,
        rng_seed: Some(0xBEEF),
        ..NavConfig::default()
    }
}

#[test]
fn seeded_worlds_advance_identically() {
    let build = || {
        let mut world = flat_world(small_config());
        world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
        let agent = world.spawn_walker_jittered(Vec3::new(1.0, 0.0, 1.0), 0.5);
        world.command_move(agent, Vec3::new(6.5, 0.0, 6.5), 1);
        (world, agent)
    };
    let (mut world_a, agent_a) = build();
    let (mut world_b, agent_b) = build();
    for _ in 0..120 {
        world_a.step();
        world_b.step();
    }
    assert_eq!(world_a.tick(), Tick(120));
    let pos_a = world_a.agent_transform(agent_a).expect("transform").position;
    let pos_b = world_b.agent_transform(agent_b).expect("transform").position;
    assert_eq!(pos_a, pos_b, "seeded worlds must not diverge");
}

#[test]
fn long_march_escalates_to_macro_then_finishes_with_astar() {
    let mut world = flat_world(small_config());
    let agent = world.spawn_walker(Vec3::new(2.0, 0.0, 2.0));
    world.add_anchor(StreamingAnchor::following(agent));
    let destination = Vec3::new(60.0, 0.0, 2.0);
    world.command_move(agent, destination, 1);

    world.step();
    let nav = world.agent_navigation(agent).expect("navigation");
    assert_eq!(nav.mode, NavMode::MacroOnly, "distant goal starts macro");
    let macro_points = world.agent_macro_waypoints(agent);
    assert!(!macro_points.is_empty());
    assert!(
        macro_points
            .windows(2)
            .all(|w| w[1].x > w[0].x - f32::EPSILON),
        "macro chain should march east: {macro_points:?}"
    );

    let mut saw_astar_handoff = false;
    for _ in 0..4000 {
        world.step();
        let nav = world.agent_navigation(agent).expect("navigation");
        if nav.mode == NavMode::AStar {
            saw_astar_handoff = true;
        }
        if !nav.has_destination {
            break;
        }
    }
    assert!(saw_astar_handoff, "macro route must hand off to A*");
    let position = world.agent_transform(agent).expect("transform").position;
    assert!(
        position.distance(destination) <= 1.6,
        "agent should finish the march, ended at {position}"
    );
}

#[test]
fn walls_in_intermediate_chunks_shape_long_paths() {
    let config = small_config();
    // A wall across chunk (1, 0) whose only gap inside the loaded area is
    // at the north edge.
    let physics = Box::new(
        FlatWorld::new(0.0, config.ground_layer).with_obstacle(
            Vec3::new(11.0, 0.0, -20.0),
            Vec3::new(12.0, 2.0, 7.0),
            config.unwalkable_layer,
        ),
    );
    let mut world = World::new(config, physics).expect("world");
    world.add_anchor(StreamingAnchor::at(Vec3::new(8.0, 0.0, 4.0)));
    let agent = world.spawn_walker(Vec3::new(2.5, 0.0, 2.5));
    world.command_move(agent, Vec3::new(21.5, 0.0, 2.5), 1);
    world.step();

    let waypoints = world.agent_waypoints(agent);
    assert!(!waypoints.is_empty(), "path should be found");
    assert!(
        waypoints.iter().any(|w| w.z > 7.0),
        "path must use the gap above the wall, got {waypoints:?}"
    );
}

#[test]
fn unreachable_goals_report_failure_and_clear_buffers() {
    let config = small_config();
    // Seal a room around the start position with four overlapping walls.
    let layer = config.unwalkable_layer;
    let physics = Box::new(
        FlatWorld::new(0.0, config.ground_layer)
            .with_obstacle(Vec3::new(-6.0, 0.0, 4.0), Vec3::new(6.0, 2.0, 5.0), layer)
            .with_obstacle(Vec3::new(-6.0, 0.0, -6.0), Vec3::new(6.0, 2.0, -5.0), layer)
            .with_obstacle(Vec3::new(5.0, 0.0, -6.0), Vec3::new(6.0, 2.0, 5.0), layer)
            .with_obstacle(Vec3::new(-6.0, 0.0, -6.0), Vec3::new(-5.0, 2.0, 5.0), layer),
    );
    let mut world = World::new(config, physics).expect("world");
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
    let agent = world.spawn_walker(Vec3::new(1.5, 0.0, 1.5));
    world.command_move(agent, Vec3::new(6.5, 0.0, 6.5), 1);
    world.step();

    let flags = world.agent_flags(agent).expect("flags");
    assert!(flags.contains(AgentFlags::PATH_FAILED));
    assert!(world.agent_waypoints(agent).is_empty());
    let movement = world.agent_movement(agent).expect("movement");
    assert!(!movement.is_following_path);
}

#[test]
fn combat_ends_with_a_corpse_and_an_idle_victor() {
    let mut world = flat_world(small_config());
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));

    let victor = world.spawn_walker(Vec3::new(2.0, 0.0, 2.0));
    let mut runtime = CombatRuntime::new("victor", 0, Weapon::melee());
    runtime.max_health = 30.0;
    runtime.health = 30.0;
    world.set_combat(victor, runtime);

    let fallen = world.spawn_walker(Vec3::new(3.2, 0.0, 2.0));
    let mut runtime = CombatRuntime::new("fallen", 1, Weapon::melee());
    runtime.max_health = 30.0;
    runtime.health = 30.0;
    runtime.detection_radius = 0.1;
    world.set_combat(fallen, runtime);

    let mut died = false;
    for _ in 0..300 {
        let events = world.step();
        if events.deaths.contains(&fallen) {
            died = true;
            break;
        }
    }
    assert!(died, "the passive unit should fall");
    assert!(world.combat(fallen).expect("combat").dead);
    assert_eq!(world.combat(fallen).expect("combat").health, 0.0);

    world.step();
    world.step();
    let victor_runtime = world.combat(victor).expect("combat");
    assert_eq!(victor_runtime.target, None);
    assert_eq!(victor_runtime.state, AiState::Idle);
    // The corpse's stop order also cleared its navigation intent.
    let nav = world.agent_navigation(fallen).expect("navigation");
    assert!(!nav.has_destination);
    assert_eq!(nav.mode, NavMode::Idle);
}

#[test]
fn death_releases_ring_slots_for_waiters() {
    let mut world = flat_world(small_config());
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));

    let prey = world.spawn_walker(Vec3::new(5.0, 0.0, 5.0));
    let mut runtime = CombatRuntime::new("prey", 1, Weapon::melee());
    runtime.detection_radius = 0.1;
    world.set_combat(prey, runtime);

    let mut wolves = Vec::new();
    for i in 0..5 {
        let wolf = world.spawn_walker(Vec3::new(3.0 + i as f32 * 0.9, 0.0, 3.5));
        let mut runtime = CombatRuntime::new("wolf", 0, Weapon::melee());
        // Wolves do not bite in this scenario; only booking matters.
        runtime.base_damage = 0.0;
        world.set_combat(wolf, runtime);
        wolves.push(wolf);
    }

    world.step();
    let holders: Vec<_> = wolves
        .iter()
        .copied()
        .filter(|w| world.combat(*w).expect("combat").slot.is_some())
        .collect();
    assert_eq!(holders.len(), 4);
    let waiter = wolves
        .iter()
        .copied()
        .find(|w| world.combat(*w).expect("combat").slot.is_none())
        .expect("waiter");

    // Wound one holder so the prey's scoring singles it out, then let the
    // prey bite back once; the death must free a slot for the waiter.
    let casualty = holders[0];
    world.combat_mut(casualty).expect("combat").health = 1.0;
    world.combat_mut(prey).expect("combat").detection_radius = 20.0;
    world.combat_mut(prey).expect("combat").base_damage = 50.0;
    let mut waiter_promoted = false;
    for _ in 0..120 {
        world.step();
        if world.combat(casualty).expect("combat").dead
            && world.combat(waiter).expect("combat").slot.is_some()
        {
            waiter_promoted = true;
            break;
        }
    }
    assert!(waiter_promoted, "freed slot should promote the waiter");
    let prey_runtime = world.combat(prey).expect("combat");
    assert!(prey_runtime.current_melee <= prey_runtime.max_melee_slots);
}

#[test]
fn stopped_agents_hold_position() {
    let mut world = flat_world(small_config());
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
    let agent = world.spawn_walker(Vec3::new(0.5, 0.0, 0.5));
    world.command_move(agent, Vec3::new(7.0, 0.0, 7.0), 1);
    for _ in 0..30 {
        world.step();
    }
    world.command_stop(agent);
    world.step();
    let held = world.agent_transform(agent).expect("transform").position;
    for _ in 0..30 {
        world.step();
    }
    let after = world.agent_transform(agent).expect("transform").position;
    assert_eq!(held, after, "stopped agents must not drift");
    let nav = world.agent_navigation(agent).expect("navigation");
    assert_eq!(nav.mode, NavMode::Idle);
    assert!(!nav.has_destination);
}

#[test]
fn summaries_track_population() {
    let mut world = flat_world(small_config());
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
    for i in 0..4 {
        let agent = world.spawn_walker(Vec3::new(1.0 + i as f32, 0.0, 1.0));
        if i % 2 == 0 {
            world.set_combat(agent, CombatRuntime::new("unit", 0, Weapon::melee()));
        }
    }
    world.step();
    let summary = world.history().last().expect("summary");
    assert_eq!(summary.agent_count, 4);
    assert_eq!(summary.live_combatants, 2);
    assert!(summary.loaded_chunks > 0);
    assert!(summary.active_chunks > 0);
    assert_eq!(summary.tick, Tick(1));
}

#[test]
fn group_orders_fan_out_into_formation() {
    let mut world = flat_world(small_config());
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
    let squad: Vec<_> = (0..4)
        .map(|i| world.spawn_walker(Vec3::new(0.5 + i as f32, 0.0, 0.5)))
        .collect();
    for &member in &squad {
        world.select(member);
    }
    let rally = Vec3::new(6.0, 0.0, 6.0);
    world.command_move_selected(rally, 1);
    world.step();

    let destinations: Vec<Vec3> = squad
        .iter()
        .map(|m| world.agent_navigation(*m).expect("navigation").destination)
        .collect();
    for pair in destinations.windows(2) {
        assert_ne!(pair[0], pair[1], "formation offsets must differ");
    }
    for destination in &destinations {
        assert!(destination.distance(rally) < 4.0);
    }

    for _ in 0..600 {
        world.step();
    }
    for &member in &squad {
        let position = world.agent_transform(member).expect("transform").position;
        assert!(
            position.distance(rally) < 5.0,
            "squad member should rally, ended at {position}"
        );
        let nav = world.agent_navigation(member).expect("navigation");
        assert!(!nav.has_destination);
    }

    world.command_move_selected(Vec3::new(1.0, 0.0, 1.0), 1);
    world.command_stop_selected();
    world.step();
    for &member in &squad {
        assert_eq!(
            world.agent_navigation(member).expect("navigation").mode,
            NavMode::Idle
        );
    }
}

#[test]
fn formation_offsets_inside_walls_still_route() {
    let config = small_config();
    let physics = Box::new(FlatWorld::new(0.0, config.ground_layer).with_obstacle(
        Vec3::new(5.0, 0.0, 5.0),
        Vec3::new(7.0, 2.0, 7.0),
        config.unwalkable_layer,
    ));
    let mut world = World::new(config, physics).expect("world");
    world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
    let agent = world.spawn_walker(Vec3::new(1.5, 0.0, 1.5));
    // The order lands inside the obstacle; the endpoint snaps outward.
    world.command_move(agent, Vec3::new(6.0, 0.0, 6.0), 1);
    world.step();
    let waypoints = world.agent_waypoints(agent);
    assert!(!waypoints.is_empty(), "snapped endpoint should still route");
    let last = *waypoints.last().expect("last");
    assert_ne!(last, Vec3::new(6.0, 0.0, 6.0), "literal goal is unreachable");
}

#[test]
fn chunks_unload_when_anchors_depart() {
    let mut world = flat_world(small_config());
    let anchor = world.add_anchor(StreamingAnchor::at(Vec3::ZERO));
    world.step();
    assert!(world.chunks().len() > 0);
    world.remove_anchor(anchor);
    world.step();
    assert_eq!(world.chunks().len(), 0);
    assert_eq!(
        world.chunk_state(ChunkCoord::new(0, 0)),
        phalanx_core::ChunkState::Unloaded
    );
}
