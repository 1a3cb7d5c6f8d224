use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::RigidTransform;

/// Ordered 3D point sequence.
///
/// The index of a point is its identity: correspondences refer to points by
/// index, so the set is never reordered once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    points: Vec<Point3<f64>>,
}

impl PointSet {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    /// Build a point set from raw `[x, y, z]` triples.
    pub fn from_xyz(coords: &[[f64; 3]]) -> Self {
        Self {
            points: coords.iter().map(|c| Point3::new(c[0], c[1], c[2])).collect(),
        }
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Mean of all points, `None` for an empty set.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Largest distance of any point from the centroid (0 for an empty set).
    pub fn bounding_radius(&self) -> f64 {
        match self.centroid() {
            Some(c) => self
                .points
                .iter()
                .map(|p| (p - c).norm())
                .fold(0.0, f64::max),
            None => 0.0,
        }
    }

    /// Copy of the set with every point moved by `transform`.
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| transform.transform_point(p))
                .collect(),
        }
    }

    /// Copy of the set uniformly scaled about the origin.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            points: self.points.iter().map(|p| p * factor).collect(),
        }
    }
}

impl From<Vec<Point3<f64>>> for PointSet {
    fn from(points: Vec<Point3<f64>>) -> Self {
        Self::new(points)
    }
}

impl std::ops::Index<usize> for PointSet {
    type Output = Point3<f64>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}
