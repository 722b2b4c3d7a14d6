//! Melee slot management: attackers book angular ring positions around
//! their targets so crowds spread out instead of stacking. Releases run
//! before acquisitions so a freed slot is re-awarded within the same
//! stage.

use crate::components::{MeleeSlotAssignment, WeaponKind};
use crate::{AgentId, World};

fn free_slot(world: &mut World, target: AgentId, kind: WeaponKind) {
    if let Some(runtime) = world.combat.get_mut(target) {
        if kind.uses_ranged_ring() {
            runtime.current_ranged = runtime.current_ranged.saturating_sub(1);
        } else {
            runtime.current_melee = runtime.current_melee.saturating_sub(1);
        }
    }
}

impl World {
    pub(crate) fn stage_melee_slots(&mut self) {
        // Slots surrendered outside this stage (deaths, removals).
        let releases = std::mem::take(&mut self.pending_slot_releases);
        for (target, kind) in releases {
            free_slot(self, target, kind);
        }

        let ids: Vec<AgentId> = self.combat.keys().collect();

        // Release pass: drop assignments whose target changed or vanished.
        for &id in &ids {
            let Some(runtime) = self.combat.get(id) else {
                continue;
            };
            let Some(assignment) = runtime.slot else {
                continue;
            };
            let kind = runtime.weapon.kind;
            let target_lost = self
                .combat
                .get(assignment.target)
                .map_or(true, |t| t.dead);
            let target_changed = runtime.target != Some(assignment.target);
            if runtime.dead || target_lost || target_changed {
                free_slot(self, assignment.target, kind);
                if let Some(runtime) = self.combat.get_mut(id) {
                    runtime.slot = None;
                }
            }
        }

        // Acquire pass: ranged attackers always join the outer ring; melee
        // attackers wait for a free inner slot.
        let ranged_total = self.config.ranged_ring_slots;
        for &id in &ids {
            let Some(runtime) = self.combat.get(id) else {
                continue;
            };
            if runtime.dead || runtime.slot.is_some() {
                continue;
            }
            let Some(target) = runtime.target else {
                continue;
            };
            let kind = runtime.weapon.kind;
            let assignment = {
                let Some(target_runtime) = self.combat.get_mut(target) else {
                    continue;
                };
                if target_runtime.dead {
                    continue;
                }
                if kind.uses_ranged_ring() {
                    target_runtime.current_ranged += 1;
                    Some(MeleeSlotAssignment {
                        target,
                        slot_index: target_runtime.current_ranged - 1,
                        total_slots: ranged_total,
                    })
                } else if target_runtime.current_melee < target_runtime.max_melee_slots {
                    target_runtime.current_melee += 1;
                    Some(MeleeSlotAssignment {
                        target,
                        slot_index: target_runtime.current_melee - 1,
                        total_slots: target_runtime.max_melee_slots,
                    })
                } else {
                    None
                }
            };
            if let Some(assignment) = assignment {
                if let Some(runtime) = self.combat.get_mut(id) {
                    runtime.slot = Some(assignment);
                }
            }
        }
    }
}
