//! Threat scanning: snapshot all live units, resolve line of sight for
//! ranged scanners on the main thread, then score candidates in a
//! data-parallel pass with switching hysteresis. Freshly acquired targets
//! are shouted to nearby allies.

use std::collections::{HashMap, HashSet};

use glam::Vec3;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::components::WeaponKind;
use crate::{AgentId, World};

/// Weight of melee-slot congestion in the target score.
const SCORE_SLOT_WEIGHT: f32 = 30.0;
/// Weight of missing health in the target score.
const SCORE_WOUND_WEIGHT: f32 = 20.0;

/// Flat per-unit facts sampled once per frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitSnapshot {
    pub id: AgentId,
    pub position: Vec3,
    pub faction: u8,
    pub health_frac: f32,
    pub melee_slots: u32,
    pub max_melee_slots: u32,
}

/// A shout propagating a fresh target to nearby allies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AllyPing {
    pub origin: Vec3,
    pub radius: f32,
    pub faction: u8,
    pub target: AgentId,
    pub target_position: Vec3,
}

#[derive(Debug, Clone, Copy)]
struct ScannerJob {
    snap_index: usize,
    id: AgentId,
    ranged: bool,
    detection_radius: f32,
    chase_range: f32,
    scan_interval: f32,
    current_target: Option<AgentId>,
}

#[derive(Debug, Clone, Copy)]
struct TargetOutcome {
    id: AgentId,
    target: Option<AgentId>,
    last_known: Option<Vec3>,
    next_scan_time: f64,
}

/// Lower is better: near, uncontested, wounded targets win.
fn score_of(from: Vec3, candidate: &UnitSnapshot) -> f32 {
    let dist = from.distance(candidate.position);
    let slot_frac = if candidate.max_melee_slots > 0 {
        candidate.melee_slots as f32 / candidate.max_melee_slots as f32
    } else {
        0.0
    };
    dist - SCORE_SLOT_WEIGHT * slot_frac - SCORE_WOUND_WEIGHT * (1.0 - candidate.health_frac)
}

impl World {
    pub(crate) fn stage_threat_scan(&mut self) {
        let now = self.time;
        let margin = self.config.target_switch_margin;

        let mut snapshot: Vec<UnitSnapshot> = Vec::new();
        for (id, runtime) in self.combat.iter() {
            if runtime.dead {
                continue;
            }
            let Some(index) = self.agents.index_of(id) else {
                continue;
            };
            snapshot.push(UnitSnapshot {
                id,
                position: self.agents.columns().transforms()[index].position,
                faction: runtime.faction,
                health_frac: runtime.health_frac(),
                melee_slots: runtime.current_melee,
                max_melee_slots: runtime.max_melee_slots,
            });
        }
        if snapshot.is_empty() {
            return;
        }

        let positions: Vec<(f32, f32)> = snapshot
            .iter()
            .map(|s| (s.position.x, s.position.z))
            .collect();
        self.proximity.rebuild(&positions);
        let by_id: HashMap<AgentId, usize> = snapshot
            .iter()
            .enumerate()
            .map(|(index, s)| (s.id, index))
            .collect();

        let scanners: Vec<ScannerJob> = snapshot
            .iter()
            .enumerate()
            .filter_map(|(snap_index, s)| {
                let runtime = self.combat.get(s.id)?;
                if now < runtime.next_scan_time {
                    return None;
                }
                Some(ScannerJob {
                    snap_index,
                    id: s.id,
                    ranged: runtime.weapon.kind != WeaponKind::Melee,
                    detection_radius: runtime.detection_radius,
                    chase_range: runtime.chase_range,
                    scan_interval: runtime.scan_interval,
                    current_target: runtime.target,
                })
            })
            .collect();

        // Line-of-sight rays stay on the main thread; only ranged scanners
        // pay for them.
        let mut los: HashSet<(AgentId, AgentId)> = HashSet::new();
        for scanner in scanners.iter().filter(|s| s.ranged) {
            let me = snapshot[scanner.snap_index];
            let eye = me.position + Vec3::Y;
            let radius_sq = scanner.detection_radius * scanner.detection_radius;
            let mut candidates: Vec<usize> = Vec::new();
            self.proximity
                .neighbors_within(scanner.snap_index, radius_sq, &mut |other, _| {
                    candidates.push(other);
                });
            let obstacle_layers = self
                .combat
                .get(scanner.id)
                .map_or(0, |r| r.obstacle_layers);
            for other in candidates {
                let candidate = snapshot[other];
                if candidate.faction == me.faction {
                    continue;
                }
                if self
                    .physics
                    .segment_clear(eye, candidate.position + Vec3::Y, obstacle_layers)
                {
                    los.insert((scanner.id, candidate.id));
                }
            }
        }

        let proximity = &self.proximity;
        let snapshot_ref = &snapshot;
        let los_ref = &los;
        let by_id_ref = &by_id;
        let outcomes: Vec<TargetOutcome> = scanners
            .par_iter()
            .map(|scanner| {
                let me = snapshot_ref[scanner.snap_index];
                let radius_sq = scanner.detection_radius * scanner.detection_radius;
                let mut best: Option<(usize, OrderedFloat<f32>)> = None;
                proximity.neighbors_within(scanner.snap_index, radius_sq, &mut |other, _| {
                    let candidate = &snapshot_ref[other];
                    if candidate.faction == me.faction {
                        return;
                    }
                    if scanner.ranged && !los_ref.contains(&(scanner.id, candidate.id)) {
                        return;
                    }
                    let score = OrderedFloat(score_of(me.position, candidate));
                    if best.map_or(true, |(_, s)| score < s) {
                        best = Some((other, score));
                    }
                });

                // Validate the current target and apply switch hysteresis.
                let mut next = scanner.current_target;
                let mut current_score = f32::INFINITY;
                if let Some(current) = scanner.current_target {
                    match by_id_ref.get(&current) {
                        Some(&other) => {
                            let candidate = &snapshot_ref[other];
                            if me.position.distance(candidate.position) > scanner.chase_range {
                                next = None;
                            } else {
                                current_score = score_of(me.position, candidate);
                            }
                        }
                        None => next = None,
                    }
                }
                if let Some((other, score)) = best {
                    if next.is_none() || score.into_inner() <= current_score - margin {
                        next = Some(snapshot_ref[other].id);
                    }
                }
                let last_known = next
                    .and_then(|t| by_id_ref.get(&t))
                    .map(|&other| snapshot_ref[other].position);
                TargetOutcome {
                    id: scanner.id,
                    target: next,
                    last_known,
                    next_scan_time: now + f64::from(scanner.scan_interval),
                }
            })
            .collect();

        for outcome in outcomes {
            let Some(runtime) = self.combat.get_mut(outcome.id) else {
                continue;
            };
            let had_target = runtime.target.is_some();
            runtime.target = outcome.target;
            if let Some(position) = outcome.last_known {
                runtime.target_last_known = position;
            }
            runtime.next_scan_time = outcome.next_scan_time;
            if !had_target {
                if let Some(target) = runtime.target {
                    let Some(&snap_index) = by_id.get(&outcome.id) else {
                        continue;
                    };
                    self.pending_pings.push(AllyPing {
                        origin: snapshot[snap_index].position,
                        radius: runtime.ping_radius,
                        faction: runtime.faction,
                        target,
                        target_position: runtime.target_last_known,
                    });
                }
            }
        }
    }

    /// Targetless allies adopt targets shouted by same-faction units that
    /// acquired one this frame.
    pub(crate) fn stage_ally_ping(&mut self) {
        if self.pending_pings.is_empty() {
            return;
        }
        let pings = std::mem::take(&mut self.pending_pings);

        let mut listeners: Vec<(AgentId, Vec3, u8)> = Vec::new();
        for (id, runtime) in self.combat.iter() {
            if runtime.dead || runtime.target.is_some() {
                continue;
            }
            let Some(index) = self.agents.index_of(id) else {
                continue;
            };
            listeners.push((
                id,
                self.agents.columns().transforms()[index].position,
                runtime.faction,
            ));
        }

        let adoptions: Vec<(AgentId, AgentId, Vec3)> = listeners
            .par_iter()
            .filter_map(|&(id, position, faction)| {
                pings
                    .iter()
                    .find(|ping| {
                        ping.faction == faction
                            && ping.target != id
                            && position.distance(ping.origin) <= ping.radius
                    })
                    .map(|ping| (id, ping.target, ping.target_position))
            })
            .collect();

        for (id, target, target_position) in adoptions {
            if let Some(runtime) = self.combat.get_mut(id) {
                runtime.target = Some(target);
                runtime.target_last_known = target_position;
            }
        }
    }
}
