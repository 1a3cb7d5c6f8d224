//! Fast Point Feature Histograms
//!
//! Two passes over the cloud, both parallel over points:
//!
//! 1. SPFH: for every point, bin the Darboux-frame angles between it and each
//!    neighbor into three 11-bin histograms, each neighbor adding `100 / k`.
//! 2. FPFH: the point's own SPFH plus the inverse-squared-distance weighted
//!    sum of its neighbors' SPFH, each sub-histogram normalized to 100.
//!
//! Points without a normal take no part in either pass and end up with an
//! all-zero descriptor.

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::NeighborIndex;

/// Bins per angular sub-histogram.
pub const FPFH_BINS: usize = 11;
/// Descriptor length (three sub-histograms).
pub const FPFH_DIM: usize = 3 * FPFH_BINS;

/// A 33-bin FPFH descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FPFHFeature {
    pub histogram: [f64; FPFH_DIM],
}

impl Default for FPFHFeature {
    fn default() -> Self {
        Self::zeros()
    }
}

impl FPFHFeature {
    pub fn zeros() -> Self {
        Self {
            histogram: [0.0; FPFH_DIM],
        }
    }

    /// True for the zero-information descriptor of a degenerate point.
    pub fn is_zero(&self) -> bool {
        self.histogram.iter().all(|&v| v == 0.0)
    }

    pub fn distance_squared(&self, other: &FPFHFeature) -> f64 {
        self.histogram
            .iter()
            .zip(other.histogram.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    /// Sum of one sub-histogram (0, 1 or 2).
    pub fn sub_histogram_sum(&self, which: usize) -> f64 {
        self.histogram[which * FPFH_BINS..(which + 1) * FPFH_BINS]
            .iter()
            .sum()
    }
}

/// Compute FPFH descriptors from precomputed normals.
///
/// `normals[i] == None` marks a degenerate point. Neighbors are queried
/// within `radius` through `index`, which must be built over `points`.
pub fn compute_fpfh_with_normals(
    points: &[Point3<f64>],
    normals: &[Option<Vector3<f64>>],
    index: &NeighborIndex<'_>,
    radius: f64,
) -> Vec<FPFHFeature> {
    // Usable neighbors only: both ends need a normal and must not coincide
    let neighborhoods: Vec<Vec<usize>> = (0..points.len())
        .into_par_iter()
        .map(|i| {
            if normals[i].is_none() {
                return Vec::new();
            }
            let mut nb = index.neighbors_of(i, radius);
            nb.retain(|&j| normals[j].is_some() && (points[j] - points[i]).norm_squared() > 0.0);
            nb
        })
        .collect();

    // 1. SPFH
    let spfh: Vec<FPFHFeature> = neighborhoods
        .par_iter()
        .enumerate()
        .map(|(i, nb)| match normals[i] {
            Some(n) => compute_spfh(&points[i], &n, nb, points, normals),
            None => FPFHFeature::zeros(),
        })
        .collect();

    // 2. FPFH (own SPFH + weighted neighbors)
    neighborhoods
        .par_iter()
        .enumerate()
        .map(|(i, nb)| {
            if normals[i].is_none() {
                return FPFHFeature::zeros();
            }

            let mut weighted = [0.0; FPFH_DIM];
            for &j in nb {
                let w = 1.0 / (points[j] - points[i]).norm_squared();
                for (acc, v) in weighted.iter_mut().zip(spfh[j].histogram.iter()) {
                    *acc += w * v;
                }
            }

            let mut feature = spfh[i];
            for (h, chunk) in weighted.chunks(FPFH_BINS).enumerate() {
                let sum: f64 = chunk.iter().sum();
                if sum <= 0.0 {
                    continue;
                }
                let scale = 100.0 / sum;
                for (b, v) in chunk.iter().enumerate() {
                    feature.histogram[h * FPFH_BINS + b] += v * scale;
                }
            }
            feature
        })
        .collect()
}

fn compute_spfh(
    p: &Point3<f64>,
    n: &Vector3<f64>,
    neighbors: &[usize],
    points: &[Point3<f64>],
    normals: &[Option<Vector3<f64>>],
) -> FPFHFeature {
    let mut feature = FPFHFeature::zeros();
    if neighbors.is_empty() {
        return feature;
    }
    let increment = 100.0 / neighbors.len() as f64;

    for &j in neighbors {
        let Some(n_j) = normals[j] else { continue };
        let Some([theta, alpha, phi]) = compute_pair_features(p, n, &points[j], &n_j) else {
            continue;
        };

        feature.histogram[bin(theta, -PI, PI)] += increment;
        feature.histogram[FPFH_BINS + bin(alpha, -1.0, 1.0)] += increment;
        feature.histogram[2 * FPFH_BINS + bin(phi, -1.0, 1.0)] += increment;
    }
    feature
}

fn bin(value: f64, lo: f64, hi: f64) -> usize {
    let b = (FPFH_BINS as f64 * (value - lo) / (hi - lo)).floor();
    b.clamp(0.0, (FPFH_BINS - 1) as f64) as usize
}

/// Darboux-frame angles `[theta, alpha, phi]` between two oriented points.
///
/// The frame is anchored at whichever point's normal makes the smaller angle
/// with the connecting line, which makes the result symmetric in the pair.
/// Returns `None` for coincident points or a normal parallel to the line.
pub fn compute_pair_features(
    p1: &Point3<f64>,
    n1: &Vector3<f64>,
    p2: &Point3<f64>,
    n2: &Vector3<f64>,
) -> Option<[f64; 3]> {
    let mut delta = p2 - p1;
    let dist = delta.norm();
    if dist <= 0.0 {
        return None;
    }

    let cos1 = n1.dot(&delta) / dist;
    let cos2 = n2.dot(&delta) / dist;

    let (u, n_other, phi) = if cos1.abs().acos() > cos2.abs().acos() {
        delta = -delta;
        (n2, n1, -cos2)
    } else {
        (n1, n2, cos1)
    };

    let v = delta.cross(u);
    let v_norm = v.norm();
    if v_norm < 1e-12 {
        return None;
    }
    let v = v / v_norm;
    let w = u.cross(&v);

    let alpha = v.dot(n_other);
    let theta = w.dot(n_other).atan2(u.dot(n_other));

    Some([theta, alpha, phi])
}
