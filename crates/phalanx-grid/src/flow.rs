//! Flow-field construction for crowd navigation: a label-correcting
//! Dijkstra wavefront spreads integration costs outward from the goal cell,
//! then a gradient pass records the direction of the cheapest walkable
//! neighbour per cell.

use std::collections::VecDeque;

use crate::{ChunkStaticBlob, GridDir, TerrainCostTable};

/// One built field for a single chunk: per-cell normalised `(dx, dz)`
/// steering vectors and the integration costs they were derived from.
#[derive(Debug, Clone)]
pub struct FlowFieldData {
    pub cell_count: i32,
    pub vectors: Vec<[f32; 2]>,
    pub integration: Vec<i32>,
}

impl FlowFieldData {
    #[must_use]
    fn index(&self, lx: i32, lz: i32) -> usize {
        (lz * self.cell_count + lx) as usize
    }

    /// Steering vector for a local cell; `[0, 0]` means no usable flow
    /// (goal cell, unwalkable cell, or unreachable region).
    #[must_use]
    pub fn vector(&self, lx: i32, lz: i32) -> [f32; 2] {
        self.vectors[self.index(lx, lz)]
    }

    #[must_use]
    pub fn integration(&self, lx: i32, lz: i32) -> i32 {
        self.integration[self.index(lx, lz)]
    }
}

fn in_bounds(n: i32, lx: i32, lz: i32) -> bool {
    lx >= 0 && lx < n && lz >= 0 && lz < n
}

fn passable(blob: &ChunkStaticBlob, lx: i32, lz: i32) -> bool {
    in_bounds(blob.cell_count, lx, lz) && !blob.node(lx, lz).is_blocked()
}

/// A diagonal move is unusable when both flanking orthogonal cells are
/// blocked; the wave and the gradient both honour this so vectors cannot
/// thread wall corners.
fn diagonal_open(blob: &ChunkStaticBlob, lx: i32, lz: i32, dir: GridDir) -> bool {
    match dir.flanking() {
        Some((a, b)) => {
            let (ax, az) = a.offset();
            let (bx, bz) = b.offset();
            passable(blob, lx + ax, lz + az) || passable(blob, lx + bx, lz + bz)
        }
        None => true,
    }
}

/// Builds the field for one chunk toward a goal cell (local coordinates,
/// already clamped into the chunk). The goal cell always has integration
/// zero even when it is itself blocked, so the wave can escape a goal that
/// sits inside a wall.
#[must_use]
pub fn build_flow_field(
    blob: &ChunkStaticBlob,
    goal_lx: i32,
    goal_lz: i32,
    table: &TerrainCostTable,
) -> FlowFieldData {
    let n = blob.cell_count;
    let total = (n * n) as usize;
    let mut integration = vec![i32::MAX; total];
    let index = |lx: i32, lz: i32| (lz * n + lx) as usize;

    integration[index(goal_lx, goal_lz)] = 0;
    let mut queue: VecDeque<(i32, i32)> = VecDeque::new();
    queue.push_back((goal_lx, goal_lz));

    while let Some((lx, lz)) = queue.pop_front() {
        let here = integration[index(lx, lz)];
        for dir in GridDir::ALL {
            let (dx, dz) = dir.offset();
            let (nx, nz) = (lx + dx, lz + dz);
            if !passable(blob, nx, nz) {
                continue;
            }
            if !diagonal_open(blob, lx, lz, dir) {
                continue;
            }
            let node = blob.node(nx, nz);
            let step = dir.step_cost() + table.surcharge(node.terrain_cost);
            let cost = here.saturating_add(step);
            if cost < integration[index(nx, nz)] {
                integration[index(nx, nz)] = cost;
                queue.push_back((nx, nz));
            }
        }
    }

    let mut vectors = vec![[0.0_f32; 2]; total];
    for lz in 0..n {
        for lx in 0..n {
            let idx = index(lx, lz);
            let here = integration[idx];
            if here == i32::MAX || here == 0 {
                continue;
            }
            if blob.node(lx, lz).is_blocked() {
                continue;
            }
            let mut best_cost = i32::MAX;
            let mut best_offset: Option<(i32, i32)> = None;
            for dir in GridDir::ALL {
                let (dx, dz) = dir.offset();
                let (nx, nz) = (lx + dx, lz + dz);
                // Unwalkable neighbours are never candidates.
                if !passable(blob, nx, nz) {
                    continue;
                }
                if !diagonal_open(blob, lx, lz, dir) {
                    continue;
                }
                let cost = integration[index(nx, nz)];
                if cost < best_cost {
                    best_cost = cost;
                    best_offset = Some((dx, dz));
                }
            }
            if let Some((dx, dz)) = best_offset {
                if best_cost < here {
                    let len = ((dx * dx + dz * dz) as f32).sqrt();
                    vectors[idx] = [dx as f32 / len, dz as f32 / len];
                }
            }
        }
    }

    FlowFieldData {
        cell_count: n,
        vectors,
        integration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{octile, ChunkCoord, NodeStatic};

    #[test]
    fn open_field_integration_is_octile() {
        let blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 4);
        let field = build_flow_field(&blob, 0, 0, &TerrainCostTable::default());
        for lz in 0..4 {
            for lx in 0..4 {
                assert_eq!(
                    field.integration(lx, lz),
                    octile(lx, lz),
                    "cell ({lx}, {lz})"
                );
            }
        }
    }

    #[test]
    fn vectors_descend_toward_goal() {
        let blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        let field = build_flow_field(&blob, 2, 2, &TerrainCostTable::default());
        assert_eq!(field.vector(2, 2), [0.0, 0.0]);
        let east = field.vector(5, 2);
        assert!(east[0] < 0.0, "cell east of goal should flow west: {east:?}");
        let north = field.vector(2, 6);
        assert!(north[1] < 0.0, "cell north of goal should flow south: {north:?}");
    }

    #[test]
    fn vectors_never_point_into_walls() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        for z in 1..7 {
            blob.set_node(4, z, NodeStatic::BLOCKED);
        }
        let field = build_flow_field(&blob, 1, 3, &TerrainCostTable::default());
        for lz in 0..8 {
            for lx in 0..8 {
                let v = field.vector(lx, lz);
                if v == [0.0, 0.0] {
                    continue;
                }
                let nx = lx + v[0].signum() as i32 * i32::from(v[0].abs() > 1e-3);
                let nz = lz + v[1].signum() as i32 * i32::from(v[1].abs() > 1e-3);
                let node = blob.node(nx, nz);
                assert!(
                    !node.is_blocked(),
                    "cell ({lx}, {lz}) flows into blocked ({nx}, {nz})"
                );
            }
        }
    }

    #[test]
    fn unreachable_pockets_have_no_vectors() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        // Seal off the north-east corner cell (7, 7).
        blob.set_node(6, 7, NodeStatic::BLOCKED);
        blob.set_node(6, 6, NodeStatic::BLOCKED);
        blob.set_node(7, 6, NodeStatic::BLOCKED);
        let field = build_flow_field(&blob, 0, 0, &TerrainCostTable::default());
        assert_eq!(field.integration(7, 7), i32::MAX);
        assert_eq!(field.vector(7, 7), [0.0, 0.0]);
    }

    #[test]
    fn mud_bends_the_wave() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        let mut mud = NodeStatic::OPEN;
        mud.terrain_cost = 2;
        blob.set_node(1, 0, mud);
        let field = build_flow_field(&blob, 0, 0, &TerrainCostTable::default());
        // Entering (1, 0) costs 10 + 15; the diagonal route via (1, 1)
        // stays cheaper for (2, 0).
        assert_eq!(field.integration(1, 0), 25);
        assert_eq!(field.integration(2, 0), 28);
    }
}
