use rayon::prelude::*;

/// Errors produced by the linear algebra helpers.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LinalgError {
    /// Source and destination buffers have different lengths.
    #[error("source has {0} points but destination has {1}")]
    SizeMismatch(usize, usize),
}

/// Transform a set of points using a rotation and translation.
///
/// Every output slot is written by exactly one worker, so the work is split
/// across the rayon thread pool without synchronization.
///
/// # Arguments
///
/// * `src_points` - A set of points to be transformed.
/// * `dst_r_src` - A rotation matrix (row-major).
/// * `dst_t_src` - A translation vector.
/// * `dst_points` - A pre-allocated vector to store the transformed points.
///
/// PRECONDITION: dst_points is a pre-allocated vector of the same size as source.
///
/// Example:
///
/// ```
/// use kornia_3d::linalg::transform_points;
///
/// let src_points = vec![[2.0, 2.0, 2.0], [3.0, 4.0, 5.0]];
/// let rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let translation = [0.0, 0.0, 0.0];
/// let mut dst_points = vec![[0.0; 3]; src_points.len()];
/// transform_points(&src_points, &rotation, &translation, &mut dst_points).unwrap();
/// ```
pub fn transform_points(
    src_points: &[[f64; 3]],
    dst_r_src: &[[f64; 3]; 3],
    dst_t_src: &[f64; 3],
    dst_points: &mut [[f64; 3]],
) -> Result<(), LinalgError> {
    if src_points.len() != dst_points.len() {
        return Err(LinalgError::SizeMismatch(
            src_points.len(),
            dst_points.len(),
        ));
    }

    dst_points
        .par_iter_mut()
        .zip(src_points.par_iter())
        .for_each(|(dst, src)| {
            let rotated = mat33_vec3(dst_r_src, src);
            *dst = [
                rotated[0] + dst_t_src[0],
                rotated[1] + dst_t_src[1],
                rotated[2] + dst_t_src[2],
            ];
        });

    Ok(())
}

/// Compute the dot product of two 3d vectors.
#[inline]
pub fn dot_product3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Compute the cross product `a x b` of two 3d vectors.
#[inline]
pub fn cross_vec3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Subtract two 3d vectors `a - b`.
#[inline]
pub fn sub_vec3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Squared euclidean norm of a 3d vector.
#[inline]
pub fn squared_norm3(a: &[f64; 3]) -> f64 {
    dot_product3(a, a)
}

/// Squared euclidean distance between two points.
#[inline]
pub fn squared_distance3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    squared_norm3(&sub_vec3(a, b))
}

/// Multiply a 3x3 matrix by a 3d vector.
#[inline]
pub fn mat33_vec3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        dot_product3(&m[0], v),
        dot_product3(&m[1], v),
        dot_product3(&m[2], v),
    ]
}

/// Multiply two 3x3 matrices `a * b`.
pub fn matmul33(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut m = [[0.0; 3]; 3];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    m
}

/// Transpose a 3x3 matrix.
pub fn transpose33(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// Determinant of a 3x3 matrix.
pub fn det_mat33(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Project a 3x3 matrix onto the closest rotation matrix.
///
/// Uses the polar decomposition through the SVD `M = U S V^T`, returning
/// `U V^T` with the sign of the last singular vector flipped when needed so
/// that the determinant is `+1`.
pub fn orthonormalize_rotation(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mat = faer::Mat::<f64>::from_fn(3, 3, |i, j| m[i][j]);
    let svd = mat.svd();

    let mut u = [[0.0; 3]; 3];
    let mut v = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            u[i][j] = svd.u().read(i, j);
            v[i][j] = svd.v().read(i, j);
        }
    }

    let vt = transpose33(&v);
    let r = matmul33(&u, &vt);
    if det_mat33(&r) >= 0.0 {
        return r;
    }

    // flip the singular vector associated with the smallest singular value
    for row in u.iter_mut() {
        row[2] = -row[2];
    }
    matmul33(&u, &vt)
}
