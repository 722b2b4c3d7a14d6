//! Sparse uniform-bucket index for neighbourhood queries over agent
//! positions. Rebuilt once per frame from a position snapshot; queries
//! visit only the buckets intersecting the search radius.
//!
//! The streamed world is unbounded, so buckets live in a hash map keyed by
//! bucket coordinates rather than a dense wrapped array.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use thiserror::Error;

/// Errors emitted by the proximity index.
#[derive(Debug, Error)]
pub enum ProximityError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Uniform-bucket spatial index over `(x, z)` positions.
#[derive(Debug, Clone)]
pub struct ProximityIndex {
    bucket_size: f32,
    inv_bucket_size: f32,
    buckets: HashMap<(i32, i32), Vec<usize>>,
    entry_buckets: Vec<(i32, i32)>,
    positions: Vec<(f32, f32)>,
}

impl ProximityIndex {
    pub fn new(bucket_size: f32) -> Result<Self, ProximityError> {
        if bucket_size <= 0.0 {
            return Err(ProximityError::InvalidConfig("bucket_size must be positive"));
        }
        Ok(Self {
            bucket_size,
            inv_bucket_size: 1.0 / bucket_size,
            buckets: HashMap::new(),
            entry_buckets: Vec::new(),
            positions: Vec::new(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    fn bucket_of(&self, x: f32, z: f32) -> (i32, i32) {
        (
            (x * self.inv_bucket_size).floor() as i32,
            (z * self.inv_bucket_size).floor() as i32,
        )
    }

    /// Rebuild from a fresh position snapshot, retaining allocations where
    /// possible.
    pub fn rebuild(&mut self, positions: &[(f32, f32)]) {
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        self.entry_buckets.resize(positions.len(), (0, 0));
        for (idx, &(x, z)) in positions.iter().enumerate() {
            let key = self.bucket_of(x, z);
            self.entry_buckets[idx] = key;
            self.buckets.entry(key).or_default().push(idx);
        }
    }

    /// Visit every entry within `radius_sq` of entry `idx`, excluding the
    /// entry itself. The visitor receives the neighbour index and its
    /// squared distance.
    pub fn neighbors_within(
        &self,
        idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        if idx >= self.positions.len() || radius_sq < 0.0 {
            return;
        }
        let (ax, az) = self.positions[idx];
        self.visit(ax, az, radius_sq, Some(idx), visitor);
    }

    /// Visit every entry within `radius_sq` of an arbitrary world point.
    pub fn neighbors_of_point(
        &self,
        x: f32,
        z: f32,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        if radius_sq < 0.0 {
            return;
        }
        self.visit(x, z, radius_sq, None, visitor);
    }

    fn visit(
        &self,
        x: f32,
        z: f32,
        radius_sq: f32,
        skip: Option<usize>,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let radius = radius_sq.sqrt();
        let reach = (radius * self.inv_bucket_size).ceil().max(0.0) as i32;
        let (bx, bz) = self.bucket_of(x, z);
        for dx in -reach..=reach {
            for dz in -reach..=reach {
                let Some(indices) = self.buckets.get(&(bx + dx, bz + dz)) else {
                    continue;
                };
                for &other in indices {
                    if skip == Some(other) {
                        continue;
                    }
                    let (ox, oz) = self.positions[other];
                    let ddx = ox - x;
                    let ddz = oz - z;
                    let dist_sq = ddx.mul_add(ddx, ddz * ddz);
                    if dist_sq <= radius_sq {
                        visitor(other, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}
