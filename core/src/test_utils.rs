//! Synthetic point sets with known geometry for tests and benchmarks.

use nalgebra::{Point3, Vector3};

use crate::{PointSet, RigidTransform};

/// Points on a closed, asymmetric bumpy surface around the origin.
///
/// Directions come from a Fibonacci lattice so the sampling is deterministic
/// and close to uniform; the radius is modulated by a smooth function with
/// no rotational symmetry, which keeps local shape descriptors distinct.
pub fn make_bumpy_sphere(num_points: usize) -> PointSet {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    let n = num_points.max(1) as f64;

    let points = (0..num_points)
        .map(|k| {
            let y = 1.0 - 2.0 * (k as f64 + 0.5) / n;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let phi = k as f64 * golden_angle;
            let d = Vector3::new(phi.cos() * r, y, phi.sin() * r);
            Point3::from(d * bump_radius(&d))
        })
        .collect();

    PointSet::new(points)
}

fn bump_radius(d: &Vector3<f64>) -> f64 {
    1.0 + 0.25 * (3.0 * d.x + 1.0).sin() * (2.0 * d.y).cos()
        + 0.2 * d.x * d.z
        + 0.15 * d.z.powi(3)
}

/// Points spread through `[-1, 1]^3` on a scrambled lattice.
///
/// Deterministic, no two points coincide and no three are collinear in
/// practice; intended for optimizer tests that bypass feature extraction.
pub fn make_scattered_cube(num_points: usize) -> PointSet {
    // Additive recurrence with irrational steps (R3 sequence)
    let g = 1.220_744_084_605_759_5_f64;
    let steps = [1.0 / g, 1.0 / (g * g), 1.0 / (g * g * g)];
    let points = (0..num_points)
        .map(|k| {
            let c: Vec<f64> = steps
                .iter()
                .map(|a| (0.5 + a * (k + 1) as f64).fract() * 2.0 - 1.0)
                .collect();
            Point3::new(c[0], c[1], c[2])
        })
        .collect();
    PointSet::new(points)
}

/// A transform with a sizeable rotation and translation.
pub fn sample_transform() -> RigidTransform {
    RigidTransform::from_scaled_axis(
        Vector3::new(0.3, -0.5, 0.8).normalize() * 0.9,
        Vector3::new(0.5, -0.25, 1.2),
    )
}
