//! Normal estimation on radius neighborhoods
//!
//! PCA on the neighborhood covariance: the normal is the eigenvector of the
//! smallest eigenvalue. Normals are flipped to point away from the centroid
//! of the whole set, which depends only on the shape and therefore moves
//! with it under any rigid motion.
//!
//! The orientation is a global property: when two scans overlap only
//! partially, their centroids sit at different places on the shared surface
//! and some normals in the overlap flip between the two sets. Those points
//! get different descriptors and drop out at reciprocal matching, so heavily
//! cropped inputs yield fewer correspondences.

use fgr_core::{Error, PointSet, Result};
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;

use crate::{FeatureOption, NeighborIndex};

/// Largest covariance eigenvalue (relative to radius^2) below which the
/// neighborhood is treated as a single coincident point.
const COINCIDENT_EPS: f64 = 1e-12;
/// Middle/largest eigenvalue ratio below which the neighborhood is a line.
const COLINEAR_EPS: f64 = 1e-9;

/// Estimate one normal per point.
///
/// Returns `None` for points whose neighborhood is coincident or colinear.
/// Fails with `Error::InsufficientData` if any point has fewer than
/// `option.min_neighbors` other points inside `option.normals_search_radius`.
pub fn estimate_normals(
    cloud: &PointSet,
    index: &NeighborIndex<'_>,
    option: &FeatureOption,
) -> Result<Vec<Option<Vector3<f64>>>> {
    let radius = option.normals_search_radius;
    let points = cloud.points();
    let centroid = cloud
        .centroid()
        .ok_or_else(|| Error::insufficient_data("cannot estimate normals of an empty point set"))?;

    let neighborhoods: Vec<Vec<usize>> = (0..points.len())
        .into_par_iter()
        .map(|i| index.neighbors_of(i, radius))
        .collect();

    // Report the lowest offending index so the error is reproducible
    if let Some((i, nb)) = neighborhoods
        .iter()
        .enumerate()
        .find(|(_, nb)| nb.len() < option.min_neighbors)
    {
        return Err(Error::insufficient_data(format!(
            "point {} has {} neighbors within radius {}, need at least {}",
            i,
            nb.len(),
            radius,
            option.min_neighbors
        )));
    }

    let normals: Vec<Option<Vector3<f64>>> = neighborhoods
        .par_iter()
        .enumerate()
        .map(|(i, nb)| {
            let normal = fit_normal(&points[i], nb.iter().map(|&j| &points[j]), radius)?;
            if normal.dot(&(points[i] - centroid)) < 0.0 {
                Some(-normal)
            } else {
                Some(normal)
            }
        })
        .collect();

    Ok(normals)
}

/// Unit normal of the plane through `center` and `neighbors`, `None` when
/// the points do not span a plane.
fn fit_normal<'p>(
    center: &Point3<f64>,
    neighbors: impl Iterator<Item = &'p Point3<f64>> + Clone,
    radius: f64,
) -> Option<Vector3<f64>> {
    let mut count = 1usize;
    let mut sum = center.coords;
    for p in neighbors.clone() {
        sum += p.coords;
        count += 1;
    }
    let mean = sum / count as f64;

    let mut cov = Matrix3::zeros();
    let d = center.coords - mean;
    cov += d * d.transpose();
    for p in neighbors {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    cov /= count as f64;

    let eigen = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let (smallest, middle, largest) = (
        order[0],
        eigen.eigenvalues[order[1]],
        eigen.eigenvalues[order[2]],
    );

    if largest <= COINCIDENT_EPS * radius * radius || middle <= COLINEAR_EPS * largest {
        return None;
    }

    let normal = eigen.eigenvectors.column(smallest).into_owned();
    let norm = normal.norm();
    if norm < 1e-12 {
        return None;
    }
    Some(normal / norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_grid(n: usize, spacing: f64) -> PointSet {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                points.push(Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0));
            }
        }
        PointSet::new(points)
    }

    #[test]
    fn test_plane_normals_are_vertical() {
        let cloud = plane_grid(6, 1.0);
        let index = NeighborIndex::new(cloud.points());
        let option = FeatureOption::default().with_normals_search_radius(1.5);
        let normals = estimate_normals(&cloud, &index, &option).unwrap();

        for n in normals.iter() {
            let n = n.expect("planar neighborhood should have a normal");
            assert!(n.z.abs() > 0.999, "Normal {:?} is not vertical", n);
        }
    }

    #[test]
    fn test_sparse_point_is_rejected() {
        let mut cloud = plane_grid(4, 1.0).points().to_vec();
        cloud.push(Point3::new(50.0, 50.0, 50.0));
        let cloud = PointSet::new(cloud);
        let index = NeighborIndex::new(cloud.points());
        let option = FeatureOption::default().with_normals_search_radius(1.5);

        match estimate_normals(&cloud, &index, &option) {
            Err(Error::InsufficientData(msg)) => assert!(msg.contains("point 16")),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_colinear_neighborhood_has_no_normal() {
        let cloud = PointSet::new((0..8).map(|i| Point3::new(i as f64 * 0.1, 0.0, 0.0)).collect());
        let index = NeighborIndex::new(cloud.points());
        let option = FeatureOption::default().with_normals_search_radius(0.35);
        let normals = estimate_normals(&cloud, &index, &option).unwrap();
        assert!(normals.iter().all(|n| n.is_none()));
    }

    #[test]
    fn test_normals_point_away_from_centroid() {
        let cloud = fgr_core::test_utils::make_bumpy_sphere(400);
        let index = NeighborIndex::new(cloud.points());
        let option = FeatureOption::default().with_normals_search_radius(0.35);
        let normals = estimate_normals(&cloud, &index, &option).unwrap();
        let centroid = cloud.centroid().unwrap();

        for (p, n) in cloud.points().iter().zip(normals.iter()) {
            if let Some(n) = n {
                assert!(n.dot(&(p - centroid)) >= 0.0);
                assert!((n.norm() - 1.0).abs() < 1e-9);
            }
        }
    }
}
