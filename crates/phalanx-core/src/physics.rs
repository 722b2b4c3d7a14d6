//! The narrow physics interface the core depends on, plus a deterministic
//! flat-ground implementation for tests, benches and headless scenarios.
//!
//! The pipeline needs exactly three queries: a downward ray during the
//! static bake, a sphere overlap for bake clearance, and a segment test for
//! line of sight during threat scans.

use glam::Vec3;

/// Result of a downward ground ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundHit {
    pub point: Vec3,
    pub normal: Vec3,
}

/// Physics collaborator injected into the world.
pub trait PhysicsProbe: Send + Sync {
    /// Cast a ray straight down from `origin`, returning the first ground
    /// hit within `max_distance` on any of `layers`.
    fn raycast_down(&self, origin: Vec3, max_distance: f32, layers: u8) -> Option<GroundHit>;

    /// Whether a sphere at `center` overlaps any collider on `layers`.
    fn sphere_blocked(&self, center: Vec3, radius: f32, layers: u8) -> bool;

    /// Whether the open segment from `from` to `to` is free of colliders
    /// on `layers`.
    fn segment_clear(&self, from: Vec3, to: Vec3, layers: u8) -> bool;
}

/// Axis-aligned collider box on a set of physics layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleBox {
    pub min: Vec3,
    pub max: Vec3,
    pub layers: u8,
}

impl ObstacleBox {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3, layers: u8) -> Self {
        Self { min, max, layers }
    }

    fn distance_sq_to(&self, point: Vec3) -> f32 {
        let clamped = point.clamp(self.min, self.max);
        (point - clamped).length_squared()
    }

    /// Slab test against the segment `from..to`.
    fn intersects_segment(&self, from: Vec3, to: Vec3) -> bool {
        let dir = to - from;
        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;
        for axis in 0..3 {
            let d = dir[axis];
            let start = from[axis];
            if d.abs() < 1e-6 {
                if start < self.min[axis] || start > self.max[axis] {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (self.min[axis] - start) * inv;
            let mut t1 = (self.max[axis] - start) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }
}

/// Infinite ground plane with rectangular holes, box obstacles and tilted
/// regions. Every query is a pure function of the construction parameters,
/// so re-baking identical geometry is byte-identical.
#[derive(Debug, Clone)]
pub struct FlatWorld {
    ground_height: f32,
    ground_layer: u8,
    obstacles: Vec<ObstacleBox>,
    /// `(min_x, min_z, max_x, max_z)` rectangles with no ground at all.
    voids: Vec<(f32, f32, f32, f32)>,
    /// `(min_x, min_z, max_x, max_z, normal)` rectangles reporting a
    /// tilted ground normal.
    slopes: Vec<(f32, f32, f32, f32, Vec3)>,
}

impl FlatWorld {
    #[must_use]
    pub fn new(ground_height: f32, ground_layer: u8) -> Self {
        Self {
            ground_height,
            ground_layer,
            obstacles: Vec::new(),
            voids: Vec::new(),
            slopes: Vec::new(),
        }
    }

    /// Adds a box collider.
    #[must_use]
    pub fn with_obstacle(mut self, min: Vec3, max: Vec3, layers: u8) -> Self {
        self.obstacles.push(ObstacleBox::new(min, max, layers));
        self
    }

    /// Punches a rectangular hole in the ground plane.
    #[must_use]
    pub fn with_void(mut self, min_x: f32, min_z: f32, max_x: f32, max_z: f32) -> Self {
        self.voids.push((min_x, min_z, max_x, max_z));
        self
    }

    /// Marks a rectangle whose ground reports a slope of `angle_deg` from
    /// vertical (tilted around the x axis).
    #[must_use]
    pub fn with_slope(
        mut self,
        min_x: f32,
        min_z: f32,
        max_x: f32,
        max_z: f32,
        angle_deg: f32,
    ) -> Self {
        let rad = angle_deg.to_radians();
        let normal = Vec3::new(0.0, rad.cos(), rad.sin()).normalize();
        self.slopes.push((min_x, min_z, max_x, max_z, normal));
        self
    }

    fn over_void(&self, x: f32, z: f32) -> bool {
        self.voids
            .iter()
            .any(|&(x0, z0, x1, z1)| x >= x0 && x <= x1 && z >= z0 && z <= z1)
    }

    fn normal_at(&self, x: f32, z: f32) -> Vec3 {
        self.slopes
            .iter()
            .find(|&&(x0, z0, x1, z1, _)| x >= x0 && x <= x1 && z >= z0 && z <= z1)
            .map_or(Vec3::Y, |&(_, _, _, _, normal)| normal)
    }
}

impl PhysicsProbe for FlatWorld {
    fn raycast_down(&self, origin: Vec3, max_distance: f32, layers: u8) -> Option<GroundHit> {
        if layers & self.ground_layer == 0 {
            return None;
        }
        if self.over_void(origin.x, origin.z) {
            return None;
        }
        let drop = origin.y - self.ground_height;
        if drop < 0.0 || drop > max_distance {
            return None;
        }
        Some(GroundHit {
            point: Vec3::new(origin.x, self.ground_height, origin.z),
            normal: self.normal_at(origin.x, origin.z),
        })
    }

    fn sphere_blocked(&self, center: Vec3, radius: f32, layers: u8) -> bool {
        self.obstacles
            .iter()
            .filter(|o| o.layers & layers != 0)
            .any(|o| o.distance_sq_to(center) <= radius * radius)
    }

    fn segment_clear(&self, from: Vec3, to: Vec3, layers: u8) -> bool {
        !self
            .obstacles
            .iter()
            .filter(|o| o.layers & layers != 0)
            .any(|o| o.intersects_segment(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_ray_hits_the_plane() {
        let world = FlatWorld::new(0.0, 1);
        let hit = world
            .raycast_down(Vec3::new(3.0, 5.0, -2.0), 10.0, 1)
            .expect("hit");
        assert_eq!(hit.point, Vec3::new(3.0, 0.0, -2.0));
        assert_eq!(hit.normal, Vec3::Y);
        assert!(world.raycast_down(Vec3::new(0.0, 5.0, 0.0), 2.0, 1).is_none());
        assert!(world.raycast_down(Vec3::new(0.0, 5.0, 0.0), 10.0, 2).is_none());
    }

    #[test]
    fn voids_swallow_rays() {
        let world = FlatWorld::new(0.0, 1).with_void(-1.0, -1.0, 1.0, 1.0);
        assert!(world.raycast_down(Vec3::new(0.0, 5.0, 0.0), 10.0, 1).is_none());
        assert!(world.raycast_down(Vec3::new(2.0, 5.0, 0.0), 10.0, 1).is_some());
    }

    #[test]
    fn sphere_overlap_respects_layers() {
        let world =
            FlatWorld::new(0.0, 1).with_obstacle(Vec3::new(0.0, 0.0, 0.0), Vec3::splat(2.0), 2);
        assert!(world.sphere_blocked(Vec3::new(2.5, 1.0, 1.0), 0.6, 2));
        assert!(!world.sphere_blocked(Vec3::new(2.5, 1.0, 1.0), 0.6, 4));
        assert!(!world.sphere_blocked(Vec3::new(5.0, 1.0, 1.0), 0.6, 2));
    }

    #[test]
    fn slope_regions_tilt_the_normal() {
        let world = FlatWorld::new(0.0, 1).with_slope(0.0, 0.0, 4.0, 4.0, 60.0);
        let tilted = world
            .raycast_down(Vec3::new(2.0, 5.0, 2.0), 10.0, 1)
            .expect("hit");
        let angle = tilted.normal.dot(Vec3::Y).acos().to_degrees();
        assert!((angle - 60.0).abs() < 1e-3);
        let level = world
            .raycast_down(Vec3::new(6.0, 5.0, 2.0), 10.0, 1)
            .expect("hit");
        assert_eq!(level.normal, Vec3::Y);
    }

    #[test]
    fn segments_are_blocked_by_boxes() {
        let world =
            FlatWorld::new(0.0, 1).with_obstacle(Vec3::new(4.0, 0.0, -1.0), Vec3::new(5.0, 3.0, 1.0), 2);
        assert!(!world.segment_clear(Vec3::new(0.0, 1.0, 0.0), Vec3::new(10.0, 1.0, 0.0), 2));
        assert!(world.segment_clear(Vec3::new(0.0, 1.0, 5.0), Vec3::new(10.0, 1.0, 5.0), 2));
        assert!(world.segment_clear(Vec3::new(0.0, 4.0, 0.0), Vec3::new(10.0, 4.0, 0.0), 2));
    }
}
