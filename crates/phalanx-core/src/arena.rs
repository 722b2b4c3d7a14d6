//! Dense SoA storage with generational handles for agent access. Hot
//! per-frame stages iterate the columns directly; stable [`AgentId`]
//! handles survive removals via the slot map indirection.

use glam::Vec2;
use phalanx_grid::LayerPermissions;
use slotmap::SlotMap;

use crate::components::{
    AgentFlags, AgentNavigation, PathBuffers, StuckDetection, Transform, UnitMovement,
};
use crate::AgentId;

/// Scalar fields used when inserting an agent.
#[derive(Debug, Clone, Default)]
pub struct AgentSeed {
    pub transform: Transform,
    pub movement: UnitMovement,
    pub permissions: LayerPermissions,
    pub navigation: AgentNavigation,
    pub stuck: StuckDetection,
}

/// Collection of per-agent columns for hot-path iteration. All columns are
/// kept the same length; rows are removed with `swap_remove`.
#[derive(Debug, Default)]
pub struct AgentColumns {
    transforms: Vec<Transform>,
    movement: Vec<UnitMovement>,
    permissions: Vec<LayerPermissions>,
    navigation: Vec<AgentNavigation>,
    stuck: Vec<StuckDetection>,
    paths: Vec<PathBuffers>,
    flags: Vec<AgentFlags>,
    sampled_flow: Vec<Option<Vec2>>,
}

macro_rules! column_accessors {
    ($field:ident, $mut_name:ident, $ty:ty) => {
        #[must_use]
        pub fn $field(&self) -> &[$ty] {
            &self.$field
        }

        #[must_use]
        pub fn $mut_name(&mut self) -> &mut [$ty] {
            &mut self.$field
        }
    };
}

impl AgentColumns {
    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    column_accessors!(transforms, transforms_mut, Transform);
    column_accessors!(movement, movement_mut, UnitMovement);
    column_accessors!(permissions, permissions_mut, LayerPermissions);
    column_accessors!(navigation, navigation_mut, AgentNavigation);
    column_accessors!(stuck, stuck_mut, StuckDetection);
    column_accessors!(paths, paths_mut, PathBuffers);
    column_accessors!(flags, flags_mut, AgentFlags);
    column_accessors!(sampled_flow, sampled_flow_mut, Option<Vec2>);

    /// Split borrow used by stages that read several columns while writing
    /// another.
    pub fn split_nav_mut(
        &mut self,
    ) -> (
        &[Transform],
        &mut [UnitMovement],
        &mut [AgentNavigation],
        &mut [PathBuffers],
        &mut [AgentFlags],
    ) {
        (
            &self.transforms,
            &mut self.movement,
            &mut self.navigation,
            &mut self.paths,
            &mut self.flags,
        )
    }

    fn push(&mut self, seed: AgentSeed) {
        self.transforms.push(seed.transform);
        self.movement.push(seed.movement);
        self.permissions.push(seed.permissions);
        self.navigation.push(seed.navigation);
        self.stuck.push(seed.stuck);
        self.paths.push(PathBuffers::default());
        self.flags.push(AgentFlags::default());
        self.sampled_flow.push(None);
        self.debug_assert_coherent();
    }

    fn swap_remove(&mut self, index: usize) {
        self.transforms.swap_remove(index);
        self.movement.swap_remove(index);
        self.permissions.swap_remove(index);
        self.navigation.swap_remove(index);
        self.stuck.swap_remove(index);
        self.paths.swap_remove(index);
        self.flags.swap_remove(index);
        self.sampled_flow.swap_remove(index);
        self.debug_assert_coherent();
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.transforms.len(), self.movement.len());
        debug_assert_eq!(self.transforms.len(), self.permissions.len());
        debug_assert_eq!(self.transforms.len(), self.navigation.len());
        debug_assert_eq!(self.transforms.len(), self.stuck.len());
        debug_assert_eq!(self.transforms.len(), self.paths.len());
        debug_assert_eq!(self.transforms.len(), self.flags.len());
        debug_assert_eq!(self.transforms.len(), self.sampled_flow.len());
    }
}

/// Dense agent store keyed by generational handles.
#[derive(Debug, Default)]
pub struct AgentArena {
    slots: SlotMap<AgentId, usize>,
    handles: Vec<AgentId>,
    columns: AgentColumns,
}

impl AgentArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate over live handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.handles.iter().copied()
    }

    /// Handle slice aligned with the dense columns.
    #[must_use]
    pub fn handles(&self) -> &[AgentId] {
        &self.handles
    }

    #[must_use]
    pub fn columns(&self) -> &AgentColumns {
        &self.columns
    }

    #[must_use]
    pub fn columns_mut(&mut self) -> &mut AgentColumns {
        &mut self.columns
    }

    /// Dense index of `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    /// Insert a new agent and return its handle.
    pub fn insert(&mut self, seed: AgentSeed) -> AgentId {
        let index = self.columns.len();
        self.columns.push(seed);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove `id`, keeping the dense storage coherent.
    pub fn remove(&mut self, id: AgentId) -> bool {
        let Some(index) = self.slots.remove(id) else {
            return false;
        };
        self.columns.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        true
    }
}
