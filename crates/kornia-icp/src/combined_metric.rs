use std::sync::OnceLock;

use kornia_3d::{
    linalg::{dot_product3, squared_norm3, sub_vec3},
    pointcloud::PointCloud,
    transforms::RigidTransform,
};
use rayon::prelude::*;

use crate::{
    error::IcpError,
    estimation::estimate_rigid_transform_combined_metric,
    icp::{CorrespondenceSearch, Icp, IcpMetric, IcpState},
    kdtree::NearestNeighborIndex,
};

/// Rigid ICP metric mixing point-to-point and point-to-plane distances.
///
/// The destination cloud must carry one normal per point. Each update solves
/// for the increment minimizing
///
/// `w_pt * |d - s|^2 + w_pl * (n . (d - s))^2`
///
/// over the current correspondences and left-composes it onto the estimate.
pub struct CombinedMetric<'a> {
    dst: &'a PointCloud,
    dst_normals: &'a [[f64; 3]],
    src: &'a PointCloud,
    // source points under the current estimate
    src_transformed: Vec<[f64; 3]>,
    point_to_point_weight: f64,
    point_to_plane_weight: f64,
    max_optimization_iterations: usize,
    optimization_convergence_tolerance: f64,
    // built lazily for the residuals
    dst_index: OnceLock<NearestNeighborIndex>,
}

impl<'a> CombinedMetric<'a> {
    /// Create the metric for registering `src` onto `dst`.
    ///
    /// # Errors
    ///
    /// Fails if `dst` has no normals or their count differs from the points.
    pub fn new(dst: &'a PointCloud, src: &'a PointCloud) -> Result<Self, IcpError> {
        let dst_normals = validate_normals(dst)?;
        Ok(Self {
            dst,
            dst_normals,
            src,
            src_transformed: Vec::with_capacity(src.len()),
            point_to_point_weight: 0.1,
            point_to_plane_weight: 1.0,
            max_optimization_iterations: 1,
            optimization_convergence_tolerance: 1e-5,
            dst_index: OnceLock::new(),
        })
    }

    /// The destination cloud.
    pub fn destination(&self) -> &'a PointCloud {
        self.dst
    }

    /// Replace the destination cloud.
    pub fn set_destination(&mut self, dst: &'a PointCloud) -> Result<&mut Self, IcpError> {
        self.dst_normals = validate_normals(dst)?;
        self.dst = dst;
        self.dst_index = OnceLock::new();
        Ok(self)
    }

    /// The source cloud.
    pub fn source(&self) -> &'a PointCloud {
        self.src
    }

    /// Replace the source cloud.
    pub fn set_source(&mut self, src: &'a PointCloud) -> &mut Self {
        self.src = src;
        self
    }

    /// The source points as transformed by the last update.
    pub fn transformed_source(&self) -> &[[f64; 3]] {
        &self.src_transformed
    }

    /// Weight of the point-to-point term.
    pub fn point_to_point_weight(&self) -> f64 {
        self.point_to_point_weight
    }

    /// Set the weight of the point-to-point term.
    pub fn set_point_to_point_weight(&mut self, weight: f64) -> &mut Self {
        self.point_to_point_weight = weight;
        self
    }

    /// Weight of the point-to-plane term.
    pub fn point_to_plane_weight(&self) -> f64 {
        self.point_to_plane_weight
    }

    /// Set the weight of the point-to-plane term.
    pub fn set_point_to_plane_weight(&mut self, weight: f64) -> &mut Self {
        self.point_to_plane_weight = weight;
        self
    }

    /// Number of inner Gauss-Newton steps per ICP iteration.
    pub fn max_optimization_iterations(&self) -> usize {
        self.max_optimization_iterations
    }

    /// Set the number of inner Gauss-Newton steps per ICP iteration.
    pub fn set_max_optimization_iterations(&mut self, max_iterations: usize) -> &mut Self {
        self.max_optimization_iterations = max_iterations;
        self
    }

    /// Step size below which the inner optimization stops.
    pub fn optimization_convergence_tolerance(&self) -> f64 {
        self.optimization_convergence_tolerance
    }

    /// Set the step size below which the inner optimization stops.
    pub fn set_optimization_convergence_tolerance(&mut self, tolerance: f64) -> &mut Self {
        self.optimization_convergence_tolerance = tolerance;
        self
    }
}

fn validate_normals(dst: &PointCloud) -> Result<&[[f64; 3]], IcpError> {
    let normals = dst.normals().ok_or(IcpError::MissingNormals)?;
    if normals.len() != dst.len() {
        return Err(IcpError::SizeMismatch {
            what: "destination normals",
            expected: dst.len(),
            actual: normals.len(),
        });
    }
    Ok(normals)
}

impl IcpMetric for CombinedMetric<'_> {
    fn update_estimate(&mut self, state: &mut IcpState) -> Result<(), IcpError> {
        self.src_transformed.resize(self.src.len(), [0.0; 3]);
        self.src
            .transformed_points_into(&state.transform, &mut self.src_transformed)?;

        let estimate = estimate_rigid_transform_combined_metric(
            self.dst.points(),
            self.dst_normals,
            &self.src_transformed,
            &state.correspondences,
            self.point_to_point_weight,
            self.point_to_plane_weight,
            self.max_optimization_iterations,
            self.optimization_convergence_tolerance,
        )?;

        let increment = estimate.transform;
        state.transform = increment.compose(&state.transform);
        state.transform.orthonormalize();
        state.last_delta_norm = increment.delta_norm();

        Ok(())
    }

    fn compute_residuals(&self, transform: &RigidTransform) -> Vec<f64> {
        if self.dst.is_empty() {
            return vec![f64::NAN; self.src.len()];
        }

        let index = self
            .dst_index
            .get_or_init(|| NearestNeighborIndex::new(self.dst.points()));
        let dst_points = self.dst.points();
        let dst_normals = self.dst_normals;
        let w_pt = self.point_to_point_weight;
        let w_pl = self.point_to_plane_weight;

        let mut residuals = vec![0.0; self.src.len()];
        residuals
            .par_iter_mut()
            .zip(self.src.points().par_iter())
            .for_each(|(r, p)| {
                let s = transform.transform_point(p);
                *r = match index.nearest(&s) {
                    Some((i, _)) => {
                        let diff = sub_vec3(&dst_points[i], &s);
                        let plane = dot_product3(&dst_normals[i], &diff);
                        w_pt * squared_norm3(&diff) + w_pl * plane * plane
                    }
                    None => f64::NAN,
                };
            });

        residuals
    }
}

/// Rigid ICP driven by [`CombinedMetric`].
pub type CombinedMetricRigidIcp<'a, C> = Icp<C, CombinedMetric<'a>>;

impl<'a, C: CorrespondenceSearch> Icp<C, CombinedMetric<'a>> {
    /// Create a combined metric ICP registering `src` onto `dst` with the given search.
    ///
    /// # Errors
    ///
    /// Fails if `dst` does not carry one normal per point.
    pub fn combined_metric(
        dst: &'a PointCloud,
        src: &'a PointCloud,
        search: C,
    ) -> Result<Self, IcpError> {
        Ok(Icp::new(search, CombinedMetric::new(dst, src)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence;
    use approx::assert_relative_eq;

    fn plane_cloud(z: f64) -> PointCloud {
        let mut points = vec![];
        for i in 0..5 {
            for j in 0..5 {
                points.push([i as f64 * 0.1, j as f64 * 0.1, z]);
            }
        }
        let normals = vec![[0.0, 0.0, 1.0]; points.len()];
        PointCloud::new(points, None, Some(normals))
    }

    #[test]
    fn test_new_requires_normals() {
        let dst = PointCloud::new(vec![[0.0, 0.0, 1.0]], None, None);
        let src = plane_cloud(1.0);
        assert!(matches!(
            CombinedMetric::new(&dst, &src),
            Err(IcpError::MissingNormals)
        ));

        let dst = PointCloud::new(vec![[0.0, 0.0, 1.0]; 2], None, Some(vec![[0.0, 0.0, 1.0]]));
        assert_eq!(
            CombinedMetric::new(&dst, &src).err(),
            Some(IcpError::SizeMismatch {
                what: "destination normals",
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_defaults_and_setters() -> Result<(), IcpError> {
        let dst = plane_cloud(1.0);
        let mut metric = CombinedMetric::new(&dst, &dst)?;
        assert_eq!(metric.point_to_point_weight(), 0.1);
        assert_eq!(metric.point_to_plane_weight(), 1.0);
        assert_eq!(metric.max_optimization_iterations(), 1);
        assert_eq!(metric.optimization_convergence_tolerance(), 1e-5);

        metric
            .set_point_to_point_weight(0.0)
            .set_point_to_plane_weight(2.0)
            .set_max_optimization_iterations(4)
            .set_optimization_convergence_tolerance(1e-8);
        assert_eq!(metric.point_to_point_weight(), 0.0);
        assert_eq!(metric.point_to_plane_weight(), 2.0);
        assert_eq!(metric.max_optimization_iterations(), 4);
        assert_eq!(metric.optimization_convergence_tolerance(), 1e-8);
        Ok(())
    }

    #[test]
    fn test_update_without_correspondences() -> Result<(), IcpError> {
        let dst = plane_cloud(1.0);
        let src = plane_cloud(1.2);
        let mut metric = CombinedMetric::new(&dst, &src)?;

        let initial = RigidTransform::from_translation([0.1, 0.0, 0.0]);
        let mut state = IcpState {
            transform: initial,
            correspondences: vec![],
            last_delta_norm: 1.0,
        };
        metric.update_estimate(&mut state)?;

        assert_eq!(state.transform, initial);
        assert_eq!(state.last_delta_norm, 0.0);
        Ok(())
    }

    #[test]
    fn test_update_point_to_plane_offset() -> Result<(), IcpError> {
        let dst = plane_cloud(1.0);
        let src = plane_cloud(1.05);
        let mut metric = CombinedMetric::new(&dst, &src)?;
        metric.set_point_to_point_weight(0.0);

        let mut state = IcpState {
            transform: RigidTransform::IDENTITY,
            correspondences: (0..dst.len())
                .map(|i| Correspondence::new(i, i, 0.0))
                .collect(),
            last_delta_norm: f64::INFINITY,
        };
        metric.update_estimate(&mut state)?;

        assert_relative_eq!(state.transform.translation[2], -0.05, epsilon = 1e-9);
        assert_relative_eq!(state.last_delta_norm, 0.05, epsilon = 1e-9);
        assert_eq!(metric.transformed_source().len(), src.len());
        Ok(())
    }

    #[test]
    fn test_residuals_empty_destination() -> Result<(), IcpError> {
        let dst = PointCloud::new(vec![], None, Some(vec![]));
        let src = plane_cloud(1.0);
        let metric = CombinedMetric::new(&dst, &src)?;

        let residuals = metric.compute_residuals(&RigidTransform::IDENTITY);
        assert_eq!(residuals.len(), src.len());
        assert!(residuals.iter().all(|r| r.is_nan()));
        Ok(())
    }

    #[test]
    fn test_residuals_weighted_cost() -> Result<(), IcpError> {
        let dst = plane_cloud(1.0);
        let src = plane_cloud(1.0);
        let metric = CombinedMetric::new(&dst, &src)?;

        let residuals = metric.compute_residuals(&RigidTransform::IDENTITY);
        assert!(residuals.iter().all(|&r| r == 0.0));

        // a small offset along the normal, nearest neighbour is the same point
        let shifted = metric.compute_residuals(&RigidTransform::from_translation([0.0, 0.0, 0.02]));
        let expected = 0.1 * 0.02 * 0.02 + 1.0 * 0.02 * 0.02;
        for r in shifted {
            assert_relative_eq!(r, expected, epsilon = 1e-12);
        }
        Ok(())
    }
}
