/// Errors produced by the registration algorithms.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum IcpError {
    /// The destination cloud must carry one normal per point.
    #[error("destination point cloud has no normals")]
    MissingNormals,

    /// Two buffers that must be aligned have different lengths.
    #[error("{what}: expected {expected} elements, got {actual}")]
    SizeMismatch {
        /// The buffer being checked.
        what: &'static str,
        /// The expected length.
        expected: usize,
        /// The actual length.
        actual: usize,
    },

    /// A correspondence points outside one of the clouds.
    #[error("correspondence ({dst}, {src}) out of bounds for clouds of size ({num_dst}, {num_src})")]
    IndexOutOfBounds {
        /// The destination index of the correspondence.
        dst: usize,
        /// The source index of the correspondence.
        src: usize,
        /// Number of destination points.
        num_dst: usize,
        /// Number of source points.
        num_src: usize,
    },

    /// Error from the 3d linear algebra helpers.
    #[error(transparent)]
    Linalg(#[from] kornia_3d::linalg::LinalgError),
}
