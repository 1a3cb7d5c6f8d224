//! Radius neighborhood queries backed by an R*-tree.

use nalgebra::Point3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

// Wrapper for RTree
struct IndexedPoint(usize, [f64; 3]);

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.1)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.1[0] - point[0];
        let dy = self.1[1] - point[1];
        let dz = self.1[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Read-only spatial index over one point set.
///
/// Query results are sorted by point index so anything accumulated over a
/// neighborhood does not depend on the tree layout.
pub struct NeighborIndex<'a> {
    points: &'a [Point3<f64>],
    tree: RTree<IndexedPoint>,
}

impl<'a> NeighborIndex<'a> {
    pub fn new(points: &'a [Point3<f64>]) -> Self {
        let wrappers: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint(i, [p.x, p.y, p.z]))
            .collect();

        Self {
            points,
            tree: RTree::bulk_load(wrappers),
        }
    }

    pub fn points(&self) -> &'a [Point3<f64>] {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Indices of all points within `radius` of `query`, ascending.
    pub fn within_radius(&self, query: &Point3<f64>, radius: f64) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .tree
            .locate_within_distance([query.x, query.y, query.z], radius * radius)
            .map(|p| p.0)
            .collect();
        found.sort_unstable();
        found
    }

    /// Neighbors of point `index` within `radius`, excluding the point itself.
    pub fn neighbors_of(&self, index: usize, radius: f64) -> Vec<usize> {
        let mut found = self.within_radius(&self.points[index], radius);
        found.retain(|&j| j != index);
        found
    }
}
