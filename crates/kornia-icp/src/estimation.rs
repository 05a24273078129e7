use kornia_3d::{
    linalg::{cross_vec3, dot_product3, sub_vec3},
    transforms::{euler_zyx_to_rotation_matrix, RigidTransform},
};
use rayon::prelude::*;

use crate::{correspondence::Correspondence, error::IcpError};

// singular values below this fraction of the largest are treated as zero
const RANK_TOLERANCE: f64 = 1e-12;

/// Output of [`estimate_rigid_transform_combined_metric`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedMetricEstimate {
    /// The transform that maps the source points onto the destination.
    pub transform: RigidTransform,
    /// Number of Gauss-Newton steps performed.
    pub num_iterations: usize,
    /// Whether the last step was smaller than the tolerance.
    pub converged: bool,
}

impl CombinedMetricEstimate {
    fn identity() -> Self {
        Self {
            transform: RigidTransform::IDENTITY,
            num_iterations: 0,
            converged: false,
        }
    }
}

/// Estimate the rigid transform minimizing a weighted point-to-point and point-to-plane cost.
///
/// The cost over the correspondences `(d, s)` with destination normal `n` is
///
/// `w_pt * sum |d - T s|^2 + w_pl * sum (n . (d - T s))^2`
///
/// and is minimized with Gauss-Newton steps on the small angle linearization
/// `T s ~ s + w x s + t`. Each step is solved through the pseudo-inverse of
/// the 6x6 normal equations, so directions the cost does not constrain (e.g.
/// sliding along a plane with `w_pt = 0`) receive a zero update.
///
/// # Arguments
///
/// * `dst_points` - The destination points.
/// * `dst_normals` - The destination normals, one per destination point.
/// * `src_points` - The source points.
/// * `correspondences` - Pairs of (destination, source) indices.
/// * `point_to_point_weight` - Weight of the point-to-point term.
/// * `point_to_plane_weight` - Weight of the point-to-plane term.
/// * `max_iterations` - Maximum number of Gauss-Newton steps.
/// * `convergence_tolerance` - Stop once the norm of a step falls below this value.
///
/// An empty correspondence set, zero weights or zero iterations return the
/// identity transform.
#[allow(clippy::too_many_arguments)]
pub fn estimate_rigid_transform_combined_metric(
    dst_points: &[[f64; 3]],
    dst_normals: &[[f64; 3]],
    src_points: &[[f64; 3]],
    correspondences: &[Correspondence],
    point_to_point_weight: f64,
    point_to_plane_weight: f64,
    max_iterations: usize,
    convergence_tolerance: f64,
) -> Result<CombinedMetricEstimate, IcpError> {
    if dst_normals.len() != dst_points.len() {
        return Err(IcpError::SizeMismatch {
            what: "destination normals",
            expected: dst_points.len(),
            actual: dst_normals.len(),
        });
    }

    if let Some(c) = correspondences
        .iter()
        .find(|c| c.index_in_first >= dst_points.len() || c.index_in_second >= src_points.len())
    {
        return Err(IcpError::IndexOutOfBounds {
            dst: c.index_in_first,
            src: c.index_in_second,
            num_dst: dst_points.len(),
            num_src: src_points.len(),
        });
    }

    let w_pt = point_to_point_weight.max(0.0);
    let w_pl = point_to_plane_weight.max(0.0);
    if correspondences.is_empty() || max_iterations == 0 || (w_pt == 0.0 && w_pl == 0.0) {
        return Ok(CombinedMetricEstimate::identity());
    }

    // working copy of the matched source points under the current estimate
    let mut src_matched = correspondences
        .iter()
        .map(|c| src_points[c.index_in_second])
        .collect::<Vec<_>>();

    let mut estimate = CombinedMetricEstimate::identity();

    for _ in 0..max_iterations {
        let step = solve_linearized_step(
            dst_points,
            dst_normals,
            &src_matched,
            correspondences,
            w_pt,
            w_pl,
        );

        let increment = RigidTransform::new(
            euler_zyx_to_rotation_matrix(step[0], step[1], step[2]),
            [step[3], step[4], step[5]],
        );
        estimate.transform = increment.compose(&estimate.transform);
        estimate.transform.orthonormalize();
        estimate.num_iterations += 1;

        let step_norm = step.iter().map(|v| v * v).sum::<f64>().sqrt();
        if step_norm < convergence_tolerance {
            estimate.converged = true;
            break;
        }

        let transform = estimate.transform;
        src_matched
            .par_iter_mut()
            .zip(correspondences.par_iter())
            .for_each(|(p, c)| *p = transform.transform_point(&src_points[c.index_in_second]));
    }

    Ok(estimate)
}

// Build and solve the normal equations of one linearized step.
// Returns [wx, wy, wz, tx, ty, tz].
fn solve_linearized_step(
    dst_points: &[[f64; 3]],
    dst_normals: &[[f64; 3]],
    src_matched: &[[f64; 3]],
    correspondences: &[Correspondence],
    w_pt: f64,
    w_pl: f64,
) -> [f64; 6] {
    let mut ata = [[0.0; 6]; 6];
    let mut atb = [0.0; 6];

    let mut accumulate = |row: &[f64; 6], rhs: f64, weight: f64| {
        for i in 0..6 {
            atb[i] += weight * row[i] * rhs;
            for j in 0..6 {
                ata[i][j] += weight * row[i] * row[j];
            }
        }
    };

    for (s, c) in src_matched.iter().zip(correspondences.iter()) {
        let d = &dst_points[c.index_in_first];
        let diff = sub_vec3(d, s);

        if w_pt > 0.0 {
            // w x s = -[s]x w
            let rows = [
                [0.0, s[2], -s[1], 1.0, 0.0, 0.0],
                [-s[2], 0.0, s[0], 0.0, 1.0, 0.0],
                [s[1], -s[0], 0.0, 0.0, 0.0, 1.0],
            ];
            for (row, rhs) in rows.iter().zip(diff.iter()) {
                accumulate(row, *rhs, w_pt);
            }
        }

        if w_pl > 0.0 {
            let n = &dst_normals[c.index_in_first];
            let sxn = cross_vec3(s, n);
            let row = [sxn[0], sxn[1], sxn[2], n[0], n[1], n[2]];
            accumulate(&row, dot_product3(n, &diff), w_pl);
        }
    }

    solve_pseudo_inverse6(&ata, &atb)
}

// Minimum norm least squares solution of `a x = b` through the SVD of `a`.
fn solve_pseudo_inverse6(a: &[[f64; 6]; 6], b: &[f64; 6]) -> [f64; 6] {
    let mat_a = faer::Mat::<f64>::from_fn(6, 6, |i, j| a[i][j]);
    let svd = mat_a.svd();
    let (u, s, v) = (svd.u(), svd.s_diagonal(), svd.v());

    let s_max = (0..6).map(|k| s.read(k)).fold(0.0, f64::max);
    let mut x = [0.0; 6];
    if s_max <= 0.0 {
        return x;
    }

    for k in 0..6 {
        let sk = s.read(k);
        if sk <= RANK_TOLERANCE * s_max {
            continue;
        }
        // coefficient of the k-th right singular vector
        let coeff = (0..6).map(|i| u.read(i, k) * b[i]).sum::<f64>() / sk;
        for (i, xi) in x.iter_mut().enumerate() {
            *xi += coeff * v.read(i, k);
        }
    }

    x
}
