//! Rigid SE(3) transforms
//!
//! Rotation is stored as a unit quaternion so the rotation block of the
//! homogeneous matrix stays orthonormal with determinant +1 after any number
//! of compositions.

use std::fmt;

use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Rigid transformation `p -> R * p + t`.
///
/// Serializes as the 16 values of the homogeneous matrix in row-major order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 16]", try_from = "[f64; 16]")]
pub struct RigidTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::zeros())
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::identity(), translation)
    }

    /// Rotation given as a scaled axis (axis * angle in radians).
    pub fn from_scaled_axis(axis_angle: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::from_scaled_axis(axis_angle), translation)
    }

    /// Build from a rotation matrix that is already orthonormal.
    pub fn from_rotation_matrix(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let r = Rotation3::from_matrix_unchecked(*rotation);
        Self::new(UnitQuaternion::from_rotation_matrix(&r), translation)
    }

    /// Small-motion update: `twist = [vx, vy, vz, wx, wy, wz]`.
    ///
    /// The rotational part goes through the exponential map of SO(3); the
    /// translational part is applied as-is, matching a first-order model
    /// `p' = p + w x p + v`.
    pub fn from_twist(twist: &Vector6<f64>) -> Self {
        let v = Vector3::new(twist[0], twist[1], twist[2]);
        let omega = Vector3::new(twist[3], twist[4], twist[5]);
        Self::new(UnitQuaternion::from_scaled_axis(omega), v)
    }

    /// Homogeneous 4x4 matrix.
    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Rotation block as a 3x3 matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        *self.rotation.to_rotation_matrix().matrix()
    }

    /// Recover a transform from a homogeneous matrix.
    ///
    /// Fails when the bottom row is not `[0, 0, 0, 1]` or the rotation block
    /// is not a proper rotation.
    pub fn from_matrix(m: &Matrix4<f64>) -> crate::Result<Self> {
        const TOL: f64 = 1e-6;
        let bottom = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
        if bottom
            .iter()
            .zip([0.0, 0.0, 0.0, 1.0])
            .any(|(a, b)| (a - b).abs() > TOL)
        {
            return Err(Error::configuration(format!(
                "bottom row of a rigid transform must be [0, 0, 0, 1], got {:?}",
                bottom
            )));
        }

        let r = Matrix3::from(m.fixed_view::<3, 3>(0, 0));
        let orthogonality = (r.transpose() * r - Matrix3::identity()).norm();
        if orthogonality > TOL || (r.determinant() - 1.0).abs() > TOL {
            return Err(Error::configuration(
                "rotation block is not orthonormal with determinant +1",
            ));
        }

        let t = Vector3::from(m.fixed_view::<3, 1>(0, 3));
        Ok(Self::from_rotation_matrix(&r, t))
    }

    /// The 16 matrix entries in row-major order.
    pub fn to_row_major(&self) -> [f64; 16] {
        let m = self.matrix();
        let mut out = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = m[(row, col)];
            }
        }
        out
    }

    pub fn from_row_major(values: &[f64; 16]) -> crate::Result<Self> {
        Self::from_matrix(&Matrix4::from_row_slice(values))
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &RigidTransform) -> Self {
        Self::new(
            self.rotation * other.rotation,
            self.rotation * other.translation + self.translation,
        )
    }

    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        Self::new(inv_rotation, -(inv_rotation * self.translation))
    }

    /// Rotation angle (radians) of `self^-1 * other`.
    pub fn rotation_distance(&self, other: &RigidTransform) -> f64 {
        // atan2 form stays accurate for tiny angles, unlike acos(w)
        let delta = self.rotation.inverse() * other.rotation;
        let q = delta.quaternion();
        2.0 * q.imag().norm().atan2(q.scalar().abs())
    }

    pub fn translation_distance(&self, other: &RigidTransform) -> f64 {
        (self.translation - other.translation).norm()
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> Self::Output {
        self.compose(&rhs)
    }
}

impl From<RigidTransform> for [f64; 16] {
    fn from(t: RigidTransform) -> Self {
        t.to_row_major()
    }
}

impl TryFrom<[f64; 16]> for RigidTransform {
    type Error = Error;

    fn try_from(values: [f64; 16]) -> Result<Self, Self::Error> {
        Self::from_row_major(&values)
    }
}

impl fmt::Display for RigidTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.to_row_major();
        for row in v.chunks(4) {
            writeln!(
                f,
                "{:>12.6} {:>12.6} {:>12.6} {:>12.6}",
                row[0], row[1], row[2], row[3]
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RigidTransform {
        RigidTransform::from_scaled_axis(Vector3::new(0.2, -0.4, 0.7), Vector3::new(1.0, 2.0, -3.0))
    }

    #[test]
    fn test_compose_with_inverse_is_identity() {
        let t = sample();
        let id = t.compose(&t.inverse());
        assert!(id.rotation_distance(&RigidTransform::identity()) < 1e-12);
        assert!(id.translation.norm() < 1e-12);
    }

    #[test]
    fn test_row_major_layout() {
        let t = RigidTransform::from_translation(Vector3::new(4.0, 5.0, 6.0));
        let v = t.to_row_major();
        assert_eq!(v[3], 4.0);
        assert_eq!(v[7], 5.0);
        assert_eq!(v[11], 6.0);
        assert_eq!(&v[12..], &[0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_from_row_major_rejects_non_rigid() {
        let mut v = RigidTransform::identity().to_row_major();
        v[0] = 2.0;
        assert!(matches!(
            RigidTransform::from_row_major(&v),
            Err(Error::Configuration(_))
        ));

        let mut v = RigidTransform::identity().to_row_major();
        v[15] = 0.5;
        assert!(RigidTransform::from_row_major(&v).is_err());
    }

    #[test]
    fn test_rotation_block_is_proper() {
        let mut t = RigidTransform::identity();
        let step = sample();
        for _ in 0..1000 {
            t = step * t;
        }
        let r = t.rotation_matrix();
        assert!((r.determinant() - 1.0).abs() < 1e-9);
        assert!((r.transpose() * r - Matrix3::identity()).norm() < 1e-9);
    }

    #[test]
    fn test_twist_matches_first_order_motion() {
        let twist = Vector6::new(0.1, 0.0, 0.0, 0.0, 0.0, 1e-4);
        let t = RigidTransform::from_twist(&twist);
        let p = Point3::new(1.0, 0.0, 0.0);
        let q = t.transform_point(&p);
        assert!((q.x - 1.1).abs() < 1e-7);
        assert!((q.y - 1e-4).abs() < 1e-7);
    }

    #[test]
    fn test_display_has_four_rows() {
        let text = sample().to_string();
        assert_eq!(text.lines().count(), 4);
    }
}
