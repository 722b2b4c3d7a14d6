//! Damage resolution, death, out-of-combat regeneration and hit recovery.
//! All damage queued during the frame lands here, so an attack issued this
//! frame always resolves this frame.

use crate::components::AiState;
use crate::{FrameEvents, World};

impl World {
    pub(crate) fn stage_damage(&mut self, events: &mut FrameEvents) {
        let damage_events = std::mem::take(&mut self.pending_damage);
        for event in damage_events {
            let Some(runtime) = self.combat.get_mut(event.target) else {
                continue;
            };
            if runtime.dead {
                continue;
            }
            runtime.health = (runtime.health - event.damage).max(0.0);
            runtime.time_since_damage = 0.0;
            if runtime.health > 0.0 {
                // Repeated hits keep the unit in recoil.
                runtime.state = AiState::Hit;
                runtime.state_timer = 0.0;
            } else {
                runtime.dead = true;
                runtime.transition(AiState::Dead);
                self.stop_commands.insert(event.target, ());
                if let Some(assignment) = runtime.slot.take() {
                    self.pending_slot_releases
                        .push((assignment.target, runtime.weapon.kind));
                }
                events.deaths.push(event.target);
            }
        }
        events.attacks = std::mem::take(&mut self.pending_attacks);
    }

    pub(crate) fn stage_regen(&mut self) {
        let dt = self.config.frame_dt;
        let delay = self.config.out_of_combat_delay;
        let rate = self.config.regen_rate;
        for runtime in self.combat.values_mut() {
            if runtime.dead {
                continue;
            }
            if runtime.time_since_damage < f32::MAX {
                runtime.time_since_damage += dt;
            }
            if runtime.time_since_damage >= delay && runtime.health < runtime.max_health {
                runtime.health = (runtime.health + rate * dt).min(runtime.max_health);
            }
        }
    }

    pub(crate) fn stage_hit_recovery(&mut self) {
        let duration = self.config.hit_recovery_duration;
        for runtime in self.combat.values_mut() {
            if runtime.state == AiState::Hit && runtime.state_timer >= duration {
                if runtime.target.is_some() {
                    runtime.transition(AiState::Attacking);
                } else {
                    runtime.transition(AiState::Idle);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::components::{AiState, CombatRuntime, Weapon};
    use crate::test_support::combat_world;

    fn duelists(world: &mut crate::World) -> (crate::AgentId, crate::AgentId) {
        let striker = world.spawn_walker(Vec3::new(2.0, 0.0, 2.0));
        let mut runtime = CombatRuntime::new("striker", 0, Weapon::melee());
        runtime.max_health = 30.0;
        runtime.health = 30.0;
        world.set_combat(striker, runtime);

        let victim = world.spawn_walker(Vec3::new(3.2, 0.0, 2.0));
        let mut passive = CombatRuntime::new("victim", 1, Weapon::melee());
        passive.max_health = 30.0;
        passive.health = 30.0;
        passive.detection_radius = 0.1;
        world.set_combat(victim, passive);
        (striker, victim)
    }

    #[test]
    fn damage_lands_in_the_issuing_frame() {
        let mut world = combat_world();
        let (_, victim) = duelists(&mut world);
        world.step();
        let runtime = world.combat(victim).expect("combat");
        assert_eq!(runtime.health, 20.0);
        assert_eq!(runtime.state, AiState::Hit);
    }

    #[test]
    fn lethal_damage_kills_and_stops() {
        let mut world = combat_world();
        let (striker, victim) = duelists(&mut world);
        // Three one-second swings at 10 damage finish 30 health.
        let mut death_frame = None;
        for frame in 0..240 {
            let events = world.step();
            if events.deaths.contains(&victim) {
                death_frame = Some(frame);
                break;
            }
        }
        let death_frame = death_frame.expect("victim should die");
        assert!(
            (120..=135).contains(&death_frame),
            "third swing lands just after two seconds, died at frame {death_frame}"
        );
        let runtime = world.combat(victim).expect("combat");
        assert!(runtime.dead);
        assert_eq!(runtime.health, 0.0);
        assert_eq!(runtime.state, AiState::Dead);

        // The attacker notices the invalid target within two frames.
        world.step();
        world.step();
        let attacker = world.combat(striker).expect("combat");
        assert_eq!(attacker.target, None);
        assert_eq!(attacker.state, AiState::Idle);
    }

    #[test]
    fn survivors_regenerate_out_of_combat() {
        let mut world = combat_world();
        let lone = world.spawn_walker(Vec3::new(2.0, 0.0, 2.0));
        let mut runtime = CombatRuntime::new("lone", 0, Weapon::melee());
        runtime.health = 50.0;
        runtime.time_since_damage = 0.0;
        world.set_combat(lone, runtime);

        // Inside the out-of-combat delay nothing regenerates.
        for _ in 0..30 {
            world.step();
        }
        let health_early = world.combat(lone).expect("combat").health;
        assert_eq!(health_early, 50.0);

        // The test config uses a one-second delay.
        for _ in 0..120 {
            world.step();
        }
        let health_late = world.combat(lone).expect("combat").health;
        assert!(health_late > 50.0);
        assert!(health_late <= 100.0);
    }

    #[test]
    fn hit_recoil_recovers_to_attacking() {
        let mut world = combat_world();
        let (_, victim) = duelists(&mut world);
        // Give the victim eyes so it fights back after recovering.
        world.combat_mut(victim).expect("combat").detection_radius = 20.0;
        world.step();
        assert_eq!(world.combat(victim).expect("combat").state, AiState::Hit);
        // Recovery takes 0.4 s.
        for _ in 0..30 {
            world.step();
        }
        let state = world.combat(victim).expect("combat").state;
        assert!(
            matches!(state, AiState::Attacking | AiState::Hit),
            "recovered into combat, found {state:?}"
        );
    }
}
