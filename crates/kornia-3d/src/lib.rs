#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole camera model and image/point cloud conversions.
pub mod camera;

/// Linear algebra utilities.
pub mod linalg;

/// Point cloud traits.
pub mod pointcloud;

/// 3D transforms algorithms.
pub mod transforms;
