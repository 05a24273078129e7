use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    linalg::{self, LinalgError},
    transforms::RigidTransform,
};

/// A point cloud with points, colors, and normals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
    // The normals of the points.
    normals: Option<Vec<[f64; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points, colors (optional), and normals (optional).
    pub fn new(
        points: Vec<[f64; 3]>,
        colors: Option<Vec<[u8; 3]>>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Self {
        Self {
            points,
            colors,
            normals,
        }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Compute the positions of the points mapped by `transform`.
    ///
    /// The cloud itself is left untouched; the result has the same length and order.
    pub fn transformed_points(
        &self,
        transform: &RigidTransform,
    ) -> Result<Vec<[f64; 3]>, LinalgError> {
        let mut out = vec![[0.0; 3]; self.points.len()];
        self.transformed_points_into(transform, &mut out)?;
        Ok(out)
    }

    /// Same as [`PointCloud::transformed_points`] writing into a caller buffer.
    ///
    /// # Errors
    ///
    /// Fails if `out` does not hold exactly one slot per point.
    pub fn transformed_points_into(
        &self,
        transform: &RigidTransform,
        out: &mut [[f64; 3]],
    ) -> Result<(), LinalgError> {
        linalg::transform_points(
            &self.points,
            &transform.rotation,
            &transform.translation,
            out,
        )
    }

    /// Apply `transform` to the points and normals in place.
    pub fn transform(&mut self, transform: &RigidTransform) -> Result<(), LinalgError> {
        self.points = self.transformed_points(transform)?;
        if let Some(normals) = self.normals.as_mut() {
            normals
                .par_iter_mut()
                .for_each(|n| *n = transform.rotate_vector(n));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pointcloud() {
        let pointcloud = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[255, 0, 0], [0, 255, 0]]),
            Some(vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
        );

        assert_eq!(pointcloud.len(), 2);
        assert_eq!(pointcloud.points().len(), 2);

        if let Some(colors) = pointcloud.colors() {
            assert_eq!(colors.len(), 2);
        }
        if let Some(normals) = pointcloud.normals() {
            assert_eq!(normals.len(), 2);
        }

        if let Some(p1) = pointcloud.points().last() {
            assert_eq!(p1, &[1.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_transformed_points_leaves_cloud_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let pointcloud = PointCloud::new(vec![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]], None, None);
        let transform = RigidTransform::from_axis_angle(
            &[0.0, 0.0, 1.0],
            std::f64::consts::FRAC_PI_2,
            [0.0, 0.0, 1.0],
        )?;

        let moved = pointcloud.transformed_points(&transform)?;
        assert_eq!(moved.len(), 2);
        assert_relative_eq!(moved[0][0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(moved[0][1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(moved[0][2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(moved[1][0], -2.0, epsilon = 1e-12);

        assert_eq!(pointcloud.points()[0], [1.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_transform_rotates_normals() -> Result<(), Box<dyn std::error::Error>> {
        let mut pointcloud = PointCloud::new(
            vec![[0.0, 0.0, 1.0]],
            None,
            Some(vec![[0.0, 0.0, 1.0]]),
        );
        let transform = RigidTransform::from_axis_angle(
            &[1.0, 0.0, 0.0],
            std::f64::consts::FRAC_PI_2,
            [5.0, 0.0, 0.0],
        )?;
        pointcloud.transform(&transform)?;

        let normal = pointcloud.normals().map(|n| n[0]).ok_or("missing normals")?;
        assert_relative_eq!(normal[1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(normal[2], 0.0, epsilon = 1e-12);
        assert_relative_eq!(pointcloud.points()[0][0], 5.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_transformed_points_into_checks_buffer() {
        let pointcloud = PointCloud::new(vec![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]], None, None);
        let transform = RigidTransform::from_translation([0.0, 0.0, 1.0]);

        let mut short = vec![[0.0; 3]; 1];
        assert_eq!(
            pointcloud.transformed_points_into(&transform, &mut short),
            Err(LinalgError::SizeMismatch(2, 1))
        );

        let mut out = vec![[0.0; 3]; 2];
        assert_eq!(pointcloud.transformed_points_into(&transform, &mut out), Ok(()));
        assert_eq!(out, vec![[1.0, 0.0, 1.0], [0.0, 2.0, 1.0]]);
    }
}
