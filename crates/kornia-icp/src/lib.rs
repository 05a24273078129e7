#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Combined point-to-point and point-to-plane rigid ICP.
pub mod combined_metric;

/// Correspondences between two point clouds.
pub mod correspondence;

/// Error types for the icp module.
pub mod error;

/// Closed form and iterative rigid transform estimators.
pub mod estimation;

/// The generic ICP loop.
pub mod icp;

/// Nearest neighbour search.
pub mod kdtree;

/// Correspondence search by projection into a depth image.
pub mod projective;

pub use combined_metric::{CombinedMetric, CombinedMetricRigidIcp};
pub use correspondence::{Correspondence, CorrespondenceEvaluator, CorrespondenceSet};
pub use error::IcpError;
pub use icp::{CorrespondenceSearch, Icp, IcpConvergenceCriteria, IcpMetric, IcpResult, IcpState};
pub use projective::ProjectiveCorrespondenceSearch;
