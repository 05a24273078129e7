use serde::{Deserialize, Serialize};

use crate::linalg;

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation.
/// * `angle` - The angle of rotation.
///
/// # Returns
///
/// The rotation matrix.
///
/// Example:
///
/// ```
/// use kornia_3d::transforms::axis_angle_to_rotation_matrix;
///
/// let axis = [1.0, 0.0, 0.0];
/// let angle = std::f64::consts::PI / 2.0;
/// let rotation = axis_angle_to_rotation_matrix(&axis, angle).unwrap();
/// assert!((rotation[1][2] + 1.0).abs() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix(
    axis: &[f64; 3],
    angle: f64,
) -> Result<[[f64; 3]; 3], &'static str> {
    // normalize the vector
    let axis_norm = {
        let magnitude = linalg::squared_norm3(axis).sqrt();
        match magnitude < 1e-10 {
            true => return Err("cannot compute rotation matrix from a zero vector"),
            false => [
                axis[0] / magnitude,
                axis[1] / magnitude,
                axis[2] / magnitude,
            ],
        }
    };

    let [x, y, z] = axis_norm;

    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    let m00 = c + x * x * t;
    let m11 = c + y * y * t;
    let m22 = c + z * z * t;

    let tmp1 = x * y * t;
    let tmp2 = z * s;

    let m10 = tmp1 + tmp2;
    let m01 = tmp1 - tmp2;

    let tmp3 = x * z * t;
    let tmp4 = y * s;

    let m20 = tmp3 - tmp4;
    let m02 = tmp3 + tmp4;

    let tmp5 = y * z * t;
    let tmp6 = x * s;

    let m12 = tmp5 - tmp6;
    let m21 = tmp5 + tmp6;

    Ok([[m00, m01, m02], [m10, m11, m12], [m20, m21, m22]])
}

/// Compute the rotation matrix `Rz(yaw) * Ry(pitch) * Rx(roll)`.
///
/// For small angles this matches the linearization `I + [w]x` with
/// `w = [roll, pitch, yaw]`, which makes it the natural way to turn a
/// Gauss-Newton rotation step back into a rotation matrix.
pub fn euler_zyx_to_rotation_matrix(roll: f64, pitch: f64, yaw: f64) -> [[f64; 3]; 3] {
    let (sx, cx) = roll.sin_cos();
    let (sy, cy) = pitch.sin_cos();
    let (sz, cz) = yaw.sin_cos();

    [
        [cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx],
        [sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx],
        [-sy, cy * sx, cy * cx],
    ]
}

/// A rigid transformation in 3d, i.e. a rotation followed by a translation.
///
/// A point `p` is mapped to `rotation * p + translation`. The rotation is
/// stored row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    /// The rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// The translation vector.
    pub translation: [f64; 3],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    /// The identity transformation.
    pub const IDENTITY: Self = Self {
        rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation: [0.0, 0.0, 0.0],
    };

    /// Create a new rigid transformation from a rotation and a translation.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a pure translation.
    pub fn from_translation(translation: [f64; 3]) -> Self {
        Self {
            rotation: Self::IDENTITY.rotation,
            translation,
        }
    }

    /// Create a rigid transformation from an axis-angle rotation and a translation.
    pub fn from_axis_angle(
        axis: &[f64; 3],
        angle: f64,
        translation: [f64; 3],
    ) -> Result<Self, &'static str> {
        Ok(Self {
            rotation: axis_angle_to_rotation_matrix(axis, angle)?,
            translation,
        })
    }

    /// Apply the transformation to a single point.
    #[inline]
    pub fn transform_point(&self, point: &[f64; 3]) -> [f64; 3] {
        let p = linalg::mat33_vec3(&self.rotation, point);
        [
            p[0] + self.translation[0],
            p[1] + self.translation[1],
            p[2] + self.translation[2],
        ]
    }

    /// Apply only the rotation to a vector, e.g. a normal.
    #[inline]
    pub fn rotate_vector(&self, vector: &[f64; 3]) -> [f64; 3] {
        linalg::mat33_vec3(&self.rotation, vector)
    }

    /// The inverse transformation, assuming an orthonormal rotation.
    pub fn inverse(&self) -> Self {
        let rotation = linalg::transpose33(&self.rotation);
        let t = linalg::mat33_vec3(&rotation, &self.translation);
        Self {
            rotation,
            translation: [-t[0], -t[1], -t[2]],
        }
    }

    /// Compose two transformations as `self * other`, i.e. `other` is applied first.
    pub fn compose(&self, other: &RigidTransform) -> Self {
        Self {
            rotation: linalg::matmul33(&self.rotation, &other.rotation),
            translation: self.transform_point(&other.translation),
        }
    }

    /// Replace the rotation with the closest orthonormal rotation matrix.
    pub fn orthonormalize(&mut self) {
        self.rotation = linalg::orthonormalize_rotation(&self.rotation);
    }

    /// Magnitude of the transformation as `sqrt(|R - I|_F^2 + |t|^2)`.
    ///
    /// Zero for the identity; used as the step size of incremental updates.
    pub fn delta_norm(&self) -> f64 {
        let mut sum = 0.0;
        for (i, row) in self.rotation.iter().enumerate() {
            for (j, val) in row.iter().enumerate() {
                let id = if i == j { 1.0 } else { 0.0 };
                sum += (val - id).powi(2);
            }
        }
        (sum + linalg::squared_norm3(&self.translation)).sqrt()
    }
}
