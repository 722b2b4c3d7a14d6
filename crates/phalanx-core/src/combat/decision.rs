//! Per-unit combat decisions: pick a desired position (ring orbit for
//! melee, stand-off for ranged), issue move and stop orders through the
//! command queue, and fire attacks on cooldown. Cross-agent damage goes
//! through the world's pending queues and lands in the damage stage of the
//! same frame.

use glam::Vec3;

use crate::components::{AiState, AttackHit, DamageEvent, MoveCommand, WeaponKind};
use crate::{AgentId, World};

/// How far the desired position may drift before a fresh move order is
/// issued for a unit already on the move.
const MOVE_REFRESH_DISTANCE: f32 = 0.5;
/// Ranged units stop slightly inside their maximum reach.
const RANGED_STANDOFF_MARGIN: f32 = 0.2;
/// Slack added to the melee in-range check so orbiting units do not
/// flicker between moving and attacking.
const MELEE_RANGE_SLACK: f32 = 0.5;
/// Stand-off gap for melee attackers waiting on a full ring.
const WAITING_GAP: f32 = 1.0;

fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

impl World {
    pub(crate) fn stage_ai_decision(&mut self) {
        let now = self.time;
        let dt = self.config.frame_dt;
        let ids: Vec<AgentId> = self.combat.keys().collect();

        for id in ids {
            let Some(index) = self.agents.index_of(id) else {
                continue;
            };
            let position = self.agents.columns().transforms()[index].position;
            let nav = self.agents.columns().navigation()[index];

            // Read the target's facts before mutably borrowing our own.
            let target_info = self.combat.get(id).and_then(|runtime| {
                let target = runtime.target?;
                let target_runtime = self.combat.get(target)?;
                let target_index = self.agents.index_of(target)?;
                Some((
                    target,
                    self.agents.columns().transforms()[target_index].position,
                    target_runtime.radius,
                    target_runtime.dead,
                ))
            });

            let Some(runtime) = self.combat.get_mut(id) else {
                continue;
            };
            runtime.state_timer += dt;
            if runtime.dead || runtime.state == AiState::Dead {
                continue;
            }

            if runtime.target.is_none() {
                if runtime.state != AiState::Idle {
                    runtime.transition(AiState::Idle);
                    self.stop_commands.insert(id, ());
                }
                continue;
            }

            let Some((target, target_position, target_radius, target_dead)) = target_info else {
                runtime.target = None;
                runtime.transition(AiState::Idle);
                self.stop_commands.insert(id, ());
                continue;
            };
            if target_dead {
                runtime.target = None;
                runtime.transition(AiState::Idle);
                self.stop_commands.insert(id, ());
                continue;
            }

            runtime.target_last_known = target_position;
            if runtime.state == AiState::Hit {
                // Recoiling; the recovery stage decides what comes next.
                continue;
            }

            let effective_range = runtime.weapon.range + runtime.radius + target_radius;
            let away = {
                let delta = flat(position - target_position);
                if delta.length_squared() > 1e-6 {
                    delta.normalize()
                } else {
                    Vec3::Z
                }
            };
            let desired_position = if runtime.weapon.kind == WeaponKind::Melee {
                match runtime.slot {
                    Some(assignment) if assignment.target == target => {
                        let angle = assignment.angle();
                        let orbit_radius = runtime.radius
                            + target_radius
                            + runtime.weapon.range * 0.5;
                        target_position
                            + Vec3::new(angle.cos(), 0.0, angle.sin()) * orbit_radius
                    }
                    _ => target_position + away * (effective_range + WAITING_GAP),
                }
            } else {
                target_position + away * (effective_range - RANGED_STANDOFF_MARGIN)
            };

            let distance = flat(position - target_position).length();
            let in_range = if runtime.weapon.kind == WeaponKind::Melee {
                distance <= effective_range + MELEE_RANGE_SLACK
            } else {
                distance <= effective_range
            };

            if in_range {
                if runtime.state != AiState::Attacking {
                    runtime.transition(AiState::Attacking);
                    self.stop_commands.insert(id, ());
                }
                let cooldown = f64::from(runtime.attack_cooldown());
                if now >= runtime.last_attack_time + cooldown {
                    runtime.last_attack_time = now;
                    let damage = (runtime.base_damage * runtime.weapon.damage_mult).round();
                    self.pending_attacks.push(AttackHit {
                        attacker: id,
                        target,
                        damage: damage.max(0.0) as u32,
                    });
                    self.pending_damage.push(DamageEvent {
                        target,
                        attacker: id,
                        damage,
                    });
                }
            } else {
                let refresh = !nav.has_destination
                    || nav.destination.distance(desired_position) > MOVE_REFRESH_DISTANCE;
                if runtime.state != AiState::Moving {
                    runtime.transition(AiState::Moving);
                    self.move_commands.insert(
                        id,
                        MoveCommand {
                            destination: desired_position,
                            priority: 1,
                        },
                    );
                } else if refresh {
                    self.move_commands.insert(
                        id,
                        MoveCommand {
                            destination: desired_position,
                            priority: 1,
                        },
                    );
                }
            }
        }
    }
}
