//! A* search over the chunked cell grid, in three tiers: a single chunk's
//! cell array, a global cell space spanning every loaded chunk, and the
//! chunk-level macro graph built from baked edge connectivity.
//!
//! Costs are integer tenths of a cell (straight 10, diagonal 14) plus the
//! terrain surcharge of the cell being entered. The heuristic is octile
//! distance, which never overestimates under this cost model.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use glam::Vec3;

use crate::{
    octile, CellCoord, ChunkCoord, ChunkStaticBlob, GridDir, GridSpec, LayerPermissions,
    NodeStatic, PathError, TerrainCostTable, SNAP_RADIUS,
};

/// How far beyond the endpoint bounding box the macro search may roam,
/// in chunks.
const MACRO_SEARCH_MARGIN: i32 = 2;

/// A per-frame snapshot of loaded chunk blobs indexed as one contiguous
/// cell space: `global index = chunk slot * cells_per_chunk + local index`.
/// The slot assignment is only meaningful within the snapshot, which is
/// rebuilt whenever the loaded set changes.
pub struct LoadedGrid<'a> {
    spec: GridSpec,
    chunks: Vec<&'a ChunkStaticBlob>,
    slots: HashMap<ChunkCoord, usize>,
}

impl<'a> LoadedGrid<'a> {
    pub fn new(spec: GridSpec, blobs: impl IntoIterator<Item = &'a ChunkStaticBlob>) -> Self {
        let chunks: Vec<&ChunkStaticBlob> = blobs.into_iter().collect();
        let slots = chunks
            .iter()
            .enumerate()
            .map(|(slot, blob)| (blob.coord, slot))
            .collect();
        Self {
            spec,
            chunks,
            slots,
        }
    }

    #[must_use]
    pub fn spec(&self) -> GridSpec {
        self.spec
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn contains_chunk(&self, coord: ChunkCoord) -> bool {
        self.slots.contains_key(&coord)
    }

    /// Static node at a global cell, or `None` when the owning chunk is not
    /// part of the snapshot.
    #[must_use]
    pub fn node_at(&self, cell: CellCoord) -> Option<NodeStatic> {
        let chunk = self.spec.cell_to_chunk(cell);
        let slot = *self.slots.get(&chunk)?;
        let (lx, lz) = self.spec.cell_local(cell);
        Some(self.chunks[slot].node(lx, lz))
    }

    /// Whether `perms` may stand on the cell; cells in unloaded chunks are
    /// never walkable.
    #[must_use]
    pub fn walkable(&self, cell: CellCoord, perms: &LayerPermissions) -> bool {
        self.node_at(cell).is_some_and(|node| perms.can_traverse(node))
    }

    fn global_index(&self, cell: CellCoord) -> Option<usize> {
        let chunk = self.spec.cell_to_chunk(cell);
        let slot = *self.slots.get(&chunk)?;
        let (lx, lz) = self.spec.cell_local(cell);
        Some(slot * self.spec.cells_per_chunk() + self.spec.local_index(lx, lz))
    }

    fn cell_of_index(&self, index: usize) -> CellCoord {
        let per_chunk = self.spec.cells_per_chunk();
        let slot = index / per_chunk;
        let local = (index % per_chunk) as i32;
        let lx = local % self.spec.chunk_cells;
        let lz = local / self.spec.chunk_cells;
        self.spec.compose_cell(self.chunks[slot].coord, lx, lz)
    }
}

/// Result of a cell-level search. `cells` excludes the start cell and ends
/// at the (possibly snapped) goal cell; it is empty when start and goal
/// share a cell.
#[derive(Debug, Clone, Default)]
pub struct GridPath {
    pub cells: Vec<CellCoord>,
    /// True when the requested destination cell was unwalkable and the path
    /// ends at the nearest walkable cell instead.
    pub end_snapped: bool,
}

/// Searches a single chunk's cell array. Both endpoints must fall inside
/// `blob`; routes that would leave the chunk are not considered.
pub fn find_path_single(
    blob: &ChunkStaticBlob,
    spec: GridSpec,
    start: Vec3,
    end: Vec3,
    perms: &LayerPermissions,
    table: &TerrainCostTable,
) -> Result<GridPath, PathError> {
    let grid = LoadedGrid::new(spec, std::iter::once(blob));
    find_path(&grid, start, end, perms, table)
}

/// Searches the global cell space of every chunk in `grid`. Neighbours in
/// chunks outside the snapshot are skipped, so walls in intermediate chunks
/// are honoured.
pub fn find_path(
    grid: &LoadedGrid<'_>,
    start: Vec3,
    end: Vec3,
    perms: &LayerPermissions,
    table: &TerrainCostTable,
) -> Result<GridPath, PathError> {
    let spec = grid.spec();
    let start_cell = spec.world_to_cell(start);
    let end_cell = spec.world_to_cell(end);
    if grid.node_at(start_cell).is_none() || grid.node_at(end_cell).is_none() {
        return Err(PathError::ChunkUnavailable);
    }

    let end_walkable = grid.walkable(end_cell, perms);
    if start_cell == end_cell && grid.walkable(start_cell, perms) {
        return Ok(GridPath::default());
    }

    let snapped_start =
        snap_to_walkable(grid, start_cell, perms).ok_or(PathError::EndpointBlocked)?;
    let snapped_end = snap_to_walkable(grid, end_cell, perms).ok_or(PathError::EndpointBlocked)?;
    let moved = snapped_start != start_cell || snapped_end != end_cell;
    if snapped_start == snapped_end {
        if moved {
            return Err(PathError::EndpointBlocked);
        }
        return Ok(GridPath::default());
    }

    let cells = search_cells(grid, snapped_start, snapped_end, perms, table)?;
    Ok(GridPath {
        cells,
        end_snapped: !end_walkable,
    })
}

/// Converts a [`GridPath`] into world-space waypoints. The literal
/// `requested_end` replaces the final cell centre only when the destination
/// cell itself was walkable, so agents aiming into a wall stop at the edge.
#[must_use]
pub fn path_waypoints(spec: GridSpec, path: &GridPath, requested_end: Vec3) -> Vec<Vec3> {
    let mut points: Vec<Vec3> = path.cells.iter().map(|c| spec.cell_center(*c)).collect();
    if !path.end_snapped {
        if let Some(last) = points.last_mut() {
            *last = requested_end;
        }
    }
    points
}

fn search_cells(
    grid: &LoadedGrid<'_>,
    start: CellCoord,
    end: CellCoord,
    perms: &LayerPermissions,
    table: &TerrainCostTable,
) -> Result<Vec<CellCoord>, PathError> {
    let cell_total = grid.chunk_count() * grid.spec().cells_per_chunk();
    let mut g_cost = vec![i32::MAX; cell_total];
    let mut parent = vec![usize::MAX; cell_total];
    let mut closed = vec![false; cell_total];

    let start_idx = grid
        .global_index(start)
        .ok_or(PathError::ChunkUnavailable)?;
    let end_idx = grid.global_index(end).ok_or(PathError::ChunkUnavailable)?;

    let mut open: BinaryHeap<Reverse<(i32, usize)>> = BinaryHeap::new();
    g_cost[start_idx] = 0;
    open.push(Reverse((octile(end.x - start.x, end.z - start.z), start_idx)));

    while let Some(Reverse((_, idx))) = open.pop() {
        if closed[idx] {
            continue;
        }
        closed[idx] = true;
        if idx == end_idx {
            return Ok(reconstruct(grid, &parent, start_idx, end_idx));
        }
        let cell = grid.cell_of_index(idx);
        for dir in GridDir::ALL {
            let next = cell.step(dir);
            let Some(next_idx) = grid.global_index(next) else {
                continue;
            };
            if closed[next_idx] {
                continue;
            }
            let Some(node) = grid.node_at(next) else {
                continue;
            };
            if !perms.can_traverse(node) {
                continue;
            }
            if diagonal_blocked(grid, cell, dir, perms) {
                continue;
            }
            let step = dir.step_cost() + table.surcharge(node.terrain_cost);
            let tentative = g_cost[idx].saturating_add(step);
            if tentative < g_cost[next_idx] {
                g_cost[next_idx] = tentative;
                parent[next_idx] = idx;
                let h = octile(end.x - next.x, end.z - next.z);
                open.push(Reverse((tentative + h, next_idx)));
            }
        }
    }
    Err(PathError::NoRoute)
}

/// A diagonal step is rejected when both flanking orthogonal cells are
/// impassable, which would otherwise let the path slip through a wall
/// corner.
fn diagonal_blocked(
    grid: &LoadedGrid<'_>,
    from: CellCoord,
    dir: GridDir,
    perms: &LayerPermissions,
) -> bool {
    let Some((a, b)) = dir.flanking() else {
        return false;
    };
    !grid.walkable(from.step(a), perms) && !grid.walkable(from.step(b), perms)
}

fn reconstruct(
    grid: &LoadedGrid<'_>,
    parent: &[usize],
    start_idx: usize,
    end_idx: usize,
) -> Vec<CellCoord> {
    let mut cells = Vec::new();
    let mut idx = end_idx;
    while idx != start_idx {
        cells.push(grid.cell_of_index(idx));
        idx = parent[idx];
        debug_assert!(idx != usize::MAX, "reconstruction walked off the path");
    }
    cells.reverse();
    cells
}

/// Breadth-first ring search for the nearest walkable cell within
/// [`SNAP_RADIUS`] of `cell`. Returns the cell unchanged when it is already
/// walkable.
#[must_use]
pub fn snap_to_walkable(
    grid: &LoadedGrid<'_>,
    cell: CellCoord,
    perms: &LayerPermissions,
) -> Option<CellCoord> {
    if grid.walkable(cell, perms) {
        return Some(cell);
    }
    let mut visited: HashSet<CellCoord> = HashSet::new();
    let mut queue: VecDeque<(CellCoord, i32)> = VecDeque::new();
    visited.insert(cell);
    queue.push_back((cell, 0));
    while let Some((current, depth)) = queue.pop_front() {
        if depth >= SNAP_RADIUS {
            continue;
        }
        for dir in GridDir::ALL {
            let next = current.step(dir);
            if !visited.insert(next) {
                continue;
            }
            if grid.walkable(next, perms) {
                return Some(next);
            }
            if grid.node_at(next).is_some() {
                queue.push_back((next, depth + 1));
            }
        }
    }
    None
}

/// Chunk-level connectivity graph assembled from baked
/// [`ChunkStaticBlob::macro_connectivity`] entries. Chunks without an entry
/// (not yet baked) are assumed open, so routes may be planned through
/// territory that has not streamed in.
#[derive(Debug, Clone, Default)]
pub struct MacroGraph {
    connectivity: HashMap<ChunkCoord, [u8; 8]>,
}

impl MacroGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coord: ChunkCoord, connectivity: [u8; 8]) {
        self.connectivity.insert(coord, connectivity);
    }

    pub fn remove(&mut self, coord: ChunkCoord) {
        self.connectivity.remove(&coord);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connectivity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectivity.is_empty()
    }

    fn edge_open(&self, from: ChunkCoord, dir: GridDir) -> bool {
        match self.connectivity.get(&from) {
            Some(conn) => conn[dir.index()] != 0,
            None => true,
        }
    }

    /// A* over the chunk graph. Returns the chunk sequence from `start` to
    /// `end` inclusive, or `None` when every route is blocked. The search
    /// is bounded to the endpoint bounding box inflated by
    /// [`MACRO_SEARCH_MARGIN`] chunks.
    #[must_use]
    pub fn find_route(&self, start: ChunkCoord, end: ChunkCoord) -> Option<Vec<ChunkCoord>> {
        if start == end {
            return Some(vec![start]);
        }
        let min_x = start.x.min(end.x) - MACRO_SEARCH_MARGIN;
        let max_x = start.x.max(end.x) + MACRO_SEARCH_MARGIN;
        let min_z = start.z.min(end.z) - MACRO_SEARCH_MARGIN;
        let max_z = start.z.max(end.z) + MACRO_SEARCH_MARGIN;
        let in_bounds = |c: ChunkCoord| {
            c.x >= min_x && c.x <= max_x && c.z >= min_z && c.z <= max_z
        };

        let mut g_cost: HashMap<ChunkCoord, i32> = HashMap::new();
        let mut parent: HashMap<ChunkCoord, ChunkCoord> = HashMap::new();
        let mut closed: HashSet<ChunkCoord> = HashSet::new();
        let mut open: BinaryHeap<Reverse<(i32, ChunkCoord)>> = BinaryHeap::new();

        g_cost.insert(start, 0);
        open.push(Reverse((octile(end.x - start.x, end.z - start.z), start)));

        while let Some(Reverse((_, chunk))) = open.pop() {
            if !closed.insert(chunk) {
                continue;
            }
            if chunk == end {
                let mut route = vec![end];
                let mut cursor = end;
                while let Some(prev) = parent.get(&cursor) {
                    route.push(*prev);
                    cursor = *prev;
                }
                route.reverse();
                return Some(route);
            }
            let here = g_cost[&chunk];
            for dir in GridDir::ALL {
                let next = chunk.step(dir);
                if !in_bounds(next) || closed.contains(&next) {
                    continue;
                }
                if !self.edge_open(chunk, dir) {
                    continue;
                }
                let tentative = here + dir.step_cost();
                if tentative < *g_cost.get(&next).unwrap_or(&i32::MAX) {
                    g_cost.insert(next, tentative);
                    parent.insert(next, chunk);
                    let h = octile(end.x - next.x, end.z - next.z);
                    open.push(Reverse((tentative + h, next)));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeStatic;

    fn spec() -> GridSpec {
        GridSpec::new(1.0, 8)
    }

    fn walled_blob() -> ChunkStaticBlob {
        // Column x = 4 blocked except at the two edge rows.
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        for z in 1..=6 {
            blob.set_node(4, z, NodeStatic::BLOCKED);
        }
        blob
    }

    #[test]
    fn single_chunk_detours_around_wall() {
        let blob = walled_blob();
        let perms = LayerPermissions::default();
        let table = TerrainCostTable::default();
        let path = find_path_single(
            &blob,
            spec(),
            Vec3::new(1.5, 0.0, 1.5),
            Vec3::new(6.5, 0.0, 1.5),
            &perms,
            &table,
        )
        .expect("path");
        assert!(!path.end_snapped);
        assert!(
            path.cells.iter().any(|c| c.z == 0 || c.z == 7),
            "expected an edge-row detour, got {:?}",
            path.cells
        );
        let waypoints = path_waypoints(spec(), &path, Vec3::new(6.5, 0.0, 1.5));
        assert_eq!(*waypoints.last().expect("waypoints"), Vec3::new(6.5, 0.0, 1.5));
    }

    #[test]
    fn fully_walled_chunk_has_no_route() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        for z in 0..8 {
            blob.set_node(4, z, NodeStatic::BLOCKED);
        }
        let result = find_path_single(
            &blob,
            spec(),
            Vec3::new(1.5, 0.0, 1.5),
            Vec3::new(6.5, 0.0, 1.5),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        );
        assert_eq!(result.unwrap_err(), PathError::NoRoute);
    }

    #[test]
    fn blocked_destination_snaps_to_wall_edge() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        blob.set_node(6, 1, NodeStatic::BLOCKED);
        let path = find_path_single(
            &blob,
            spec(),
            Vec3::new(0.5, 0.0, 1.5),
            Vec3::new(6.5, 0.0, 1.5),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        )
        .expect("path");
        assert!(path.end_snapped);
        let last = *path.cells.last().expect("cells");
        assert_ne!(last, CellCoord::new(6, 1));
        let waypoints = path_waypoints(spec(), &path, Vec3::new(6.5, 0.0, 1.5));
        assert_ne!(*waypoints.last().expect("waypoints"), Vec3::new(6.5, 0.0, 1.5));
    }

    #[test]
    fn blocked_start_snaps_outward() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        blob.set_node(1, 1, NodeStatic::BLOCKED);
        let path = find_path_single(
            &blob,
            spec(),
            Vec3::new(1.5, 0.0, 1.5),
            Vec3::new(6.5, 0.0, 6.5),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        )
        .expect("path");
        assert_eq!(*path.cells.last().expect("cells"), CellCoord::new(6, 6));
    }

    #[test]
    fn same_cell_is_a_zero_length_path() {
        let blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        let path = find_path_single(
            &blob,
            spec(),
            Vec3::new(3.2, 0.0, 3.2),
            Vec3::new(3.8, 0.0, 3.8),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        )
        .expect("path");
        assert!(path.cells.is_empty());
        assert!(path_waypoints(spec(), &path, Vec3::new(3.8, 0.0, 3.8)).is_empty());
    }

    #[test]
    fn terrain_surcharge_steers_off_mud() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        for x in 1..7 {
            let mut node = blob.node(x, 0);
            node.terrain_cost = 2; // mud
            blob.set_node(x, 0, node);
        }
        let path = find_path_single(
            &blob,
            spec(),
            Vec3::new(0.5, 0.0, 0.5),
            Vec3::new(7.5, 0.0, 0.5),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        )
        .expect("path");
        assert!(
            path.cells.iter().any(|c| c.z != 0),
            "expected the route to leave the mud row, got {:?}",
            path.cells
        );
    }

    #[test]
    fn corner_diagonal_between_two_walls_is_rejected() {
        let mut blob = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        // Walls enclose the start except for the diagonal squeeze between
        // (4, 3) and (3, 4); rejecting that squeeze seals the region.
        for z in 0..4 {
            blob.set_node(4, z, NodeStatic::BLOCKED);
        }
        for x in 0..4 {
            blob.set_node(x, 4, NodeStatic::BLOCKED);
        }
        let result = find_path_single(
            &blob,
            spec(),
            Vec3::new(1.5, 0.0, 1.5),
            Vec3::new(6.5, 0.0, 6.5),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        );
        assert_eq!(result.unwrap_err(), PathError::NoRoute);
    }

    #[test]
    fn multi_chunk_route_respects_intermediate_walls() {
        let s = spec();
        let left = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        let mut middle = ChunkStaticBlob::open(ChunkCoord::new(1, 0), 8);
        // Wall across the middle chunk with a gap at the north edge.
        for z in 0..7 {
            middle.set_node(3, z, NodeStatic::BLOCKED);
        }
        let right = ChunkStaticBlob::open(ChunkCoord::new(2, 0), 8);
        let grid = LoadedGrid::new(s, [&left, &middle, &right]);
        let path = find_path(
            &grid,
            Vec3::new(2.5, 0.0, 2.5),
            Vec3::new(21.5, 0.0, 2.5),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        )
        .expect("path");
        assert!(
            path.cells.iter().any(|c| c.x >= 8 && c.x < 16 && c.z == 7),
            "expected the route to pass the middle chunk's gap, got {:?}",
            path.cells
        );
        for pair in path.cells.windows(2) {
            assert!((pair[1].x - pair[0].x).abs() <= 1);
            assert!((pair[1].z - pair[0].z).abs() <= 1);
        }
    }

    #[test]
    fn multi_chunk_skips_unloaded_neighbours() {
        let s = spec();
        let left = ChunkStaticBlob::open(ChunkCoord::new(0, 0), 8);
        let right = ChunkStaticBlob::open(ChunkCoord::new(2, 0), 8);
        // Chunk (1, 0) is absent, so no cell route can exist.
        let grid = LoadedGrid::new(s, [&left, &right]);
        let result = find_path(
            &grid,
            Vec3::new(2.5, 0.0, 2.5),
            Vec3::new(21.5, 0.0, 2.5),
            &LayerPermissions::default(),
            &TerrainCostTable::default(),
        );
        assert_eq!(result.unwrap_err(), PathError::NoRoute);
    }

    #[test]
    fn macro_route_crosses_unbaked_chunks() {
        let mut graph = MacroGraph::new();
        graph.insert(ChunkCoord::new(0, 0), [10; 8]);
        graph.insert(ChunkCoord::new(2, 0), [10; 8]);
        let route = graph
            .find_route(ChunkCoord::new(0, 0), ChunkCoord::new(2, 0))
            .expect("route");
        assert_eq!(route.first(), Some(&ChunkCoord::new(0, 0)));
        assert_eq!(route.last(), Some(&ChunkCoord::new(2, 0)));
        assert_eq!(route.len(), 3);
    }

    #[test]
    fn macro_route_detours_blocked_edges() {
        let mut graph = MacroGraph::new();
        // (0,0) cannot step east at all; the route must go around.
        let mut sealed_east = [10u8; 8];
        sealed_east[GridDir::East.index()] = 0;
        sealed_east[GridDir::NorthEast.index()] = 0;
        sealed_east[GridDir::SouthEast.index()] = 0;
        graph.insert(ChunkCoord::new(0, 0), sealed_east);
        let route = graph
            .find_route(ChunkCoord::new(0, 0), ChunkCoord::new(2, 0))
            .expect("route");
        assert!(route.len() > 3, "route should not cut straight east");
        assert!(route.windows(2).all(|w| w[0].ring_distance(w[1]) == 1));
    }

    #[test]
    fn macro_route_same_chunk_is_trivial() {
        let graph = MacroGraph::new();
        let route = graph
            .find_route(ChunkCoord::new(3, -2), ChunkCoord::new(3, -2))
            .expect("route");
        assert_eq!(route, vec![ChunkCoord::new(3, -2)]);
    }
}
