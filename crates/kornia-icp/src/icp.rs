use kornia_3d::transforms::RigidTransform;
use serde::{Deserialize, Serialize};

use crate::{correspondence::CorrespondenceSet, error::IcpError};

/// Finds correspondences between the destination and the (transformed) source cloud.
pub trait CorrespondenceSearch {
    /// Fill `correspondences` with the associations for the source cloud.
    ///
    /// With `Some(transform)` the source points are mapped by `transform`
    /// first; with `None` they are used as given.
    fn find_correspondences_into(
        &mut self,
        transform: Option<&RigidTransform>,
        correspondences: &mut CorrespondenceSet,
    ) -> Result<(), IcpError>;
}

impl<T: CorrespondenceSearch + ?Sized> CorrespondenceSearch for &mut T {
    fn find_correspondences_into(
        &mut self,
        transform: Option<&RigidTransform>,
        correspondences: &mut CorrespondenceSet,
    ) -> Result<(), IcpError> {
        (**self).find_correspondences_into(transform, correspondences)
    }
}

/// The state shared between the ICP loop and its metric.
#[derive(Debug, Clone, Default)]
pub struct IcpState {
    /// The current estimate, mapping the source to the destination frame.
    pub transform: RigidTransform,
    /// The correspondences found in the last iteration.
    pub correspondences: CorrespondenceSet,
    /// The magnitude of the last update, used to test convergence.
    pub last_delta_norm: f64,
}

/// The metric specific part of an ICP variant.
pub trait IcpMetric {
    /// Refine `state.transform` from `state.correspondences`.
    ///
    /// Called once per iteration right after the correspondences were
    /// refreshed. Must store the size of the applied update in
    /// `state.last_delta_norm`.
    fn update_estimate(&mut self, state: &mut IcpState) -> Result<(), IcpError>;

    /// Per source point residuals under `transform`, for monitoring only.
    fn compute_residuals(&self, transform: &RigidTransform) -> Vec<f64>;
}

/// Structure to define the ICP parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpConvergenceCriteria {
    /// Maximum number of iterations to perform.
    pub max_iterations: usize,
    /// Convergence tolerance on the magnitude of the last update.
    pub tolerance: f64,
}

impl Default for IcpConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            tolerance: 1e-5,
        }
    }
}

/// Result of the ICP algorithm.
///
/// The transformation is from the source to the destination frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcpResult {
    /// Estimated transformation.
    pub transform: RigidTransform,
    /// The total number of iterations performed.
    pub num_iterations: usize,
    /// Whether the last update fell below the tolerance.
    pub converged: bool,
    /// Magnitude of the last update.
    pub last_delta_norm: f64,
    /// Number of correspondences used in the last iteration.
    pub num_correspondences: usize,
}

/// Iterative closest point driver.
///
/// Alternates between a [`CorrespondenceSearch`] and an [`IcpMetric`] update
/// until the update becomes smaller than the tolerance or the iteration
/// budget is exhausted.
pub struct Icp<C, M> {
    search: C,
    metric: M,
    initial_guess: RigidTransform,
    criteria: IcpConvergenceCriteria,
    state: IcpState,
    num_iterations: usize,
    converged: bool,
}

impl<C: CorrespondenceSearch, M: IcpMetric> Icp<C, M> {
    /// Create a new ICP driver starting from the identity.
    pub fn new(search: C, metric: M) -> Self {
        Self {
            search,
            metric,
            initial_guess: RigidTransform::IDENTITY,
            criteria: IcpConvergenceCriteria::default(),
            state: IcpState::default(),
            num_iterations: 0,
            converged: false,
        }
    }

    /// Run the registration from the initial guess.
    pub fn estimate(&mut self) -> Result<IcpResult, IcpError> {
        self.state.transform = self.initial_guess;
        self.state.correspondences.clear();
        self.state.last_delta_norm = f64::INFINITY;
        self.num_iterations = 0;
        self.converged = false;

        while self.num_iterations < self.criteria.max_iterations {
            // NOTE: for debugging purposes, we measure the time taken for each iteration
            let now = std::time::Instant::now();

            self.search.find_correspondences_into(
                Some(&self.state.transform),
                &mut self.state.correspondences,
            )?;

            if self.state.correspondences.is_empty() {
                log::warn!("Iteration {}: no correspondences found", self.num_iterations);
            }

            self.metric.update_estimate(&mut self.state)?;
            self.num_iterations += 1;

            log::debug!(
                "Iteration: {} correspondences: {} delta: {:e} elapsed: {:?}",
                self.num_iterations,
                self.state.correspondences.len(),
                self.state.last_delta_norm,
                now.elapsed()
            );

            if self.state.last_delta_norm < self.criteria.tolerance {
                break;
            }
        }

        self.converged = self.num_iterations > 0
            && self.state.last_delta_norm < self.criteria.tolerance
            && !self.state.correspondences.is_empty();

        if self.converged {
            log::debug!("ICP converged in {} iterations", self.num_iterations);
        }

        Ok(self.result())
    }

    /// Residuals of the current estimate as computed by the metric.
    pub fn compute_residuals(&self) -> Vec<f64> {
        self.metric.compute_residuals(&self.state.transform)
    }

    /// Summary of the last run.
    pub fn result(&self) -> IcpResult {
        IcpResult {
            transform: self.state.transform,
            num_iterations: self.num_iterations,
            converged: self.converged,
            last_delta_norm: self.state.last_delta_norm,
            num_correspondences: self.state.correspondences.len(),
        }
    }

    /// The current estimate.
    pub fn transform(&self) -> &RigidTransform {
        &self.state.transform
    }

    /// The correspondences of the last iteration.
    pub fn correspondences(&self) -> &CorrespondenceSet {
        &self.state.correspondences
    }

    /// The shared loop state.
    pub fn state(&self) -> &IcpState {
        &self.state
    }

    /// Number of iterations performed by the last run.
    pub fn iterations(&self) -> usize {
        self.num_iterations
    }

    /// Whether the last run converged.
    pub fn has_converged(&self) -> bool {
        self.converged
    }

    /// The transform the next run starts from.
    pub fn initial_guess(&self) -> &RigidTransform {
        &self.initial_guess
    }

    /// Set the transform the next run starts from.
    pub fn set_initial_guess(&mut self, initial_guess: RigidTransform) -> &mut Self {
        self.initial_guess = initial_guess;
        self
    }

    /// The outer loop stopping criteria.
    pub fn convergence_criteria(&self) -> &IcpConvergenceCriteria {
        &self.criteria
    }

    /// Set the outer loop stopping criteria.
    pub fn set_convergence_criteria(&mut self, criteria: IcpConvergenceCriteria) -> &mut Self {
        self.criteria = criteria;
        self
    }

    /// The correspondence search.
    pub fn search(&self) -> &C {
        &self.search
    }

    /// The correspondence search, mutably.
    pub fn search_mut(&mut self) -> &mut C {
        &mut self.search
    }

    /// The metric.
    pub fn metric(&self) -> &M {
        &self.metric
    }

    /// The metric, mutably.
    pub fn metric_mut(&mut self) -> &mut M {
        &mut self.metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence;
    use approx::assert_relative_eq;

    // returns a single fake correspondence, or none when `empty` is set
    struct FakeSearch {
        empty: bool,
        calls: Vec<RigidTransform>,
    }

    impl CorrespondenceSearch for FakeSearch {
        fn find_correspondences_into(
            &mut self,
            transform: Option<&RigidTransform>,
            correspondences: &mut CorrespondenceSet,
        ) -> Result<(), IcpError> {
            correspondences.clear();
            if let Some(t) = transform {
                self.calls.push(*t);
            }
            if !self.empty {
                correspondences.push(Correspondence::new(0, 0, 0.0));
            }
            Ok(())
        }
    }

    // moves halfway towards `target` along x on every update
    struct HalfStepMetric {
        target: f64,
    }

    impl IcpMetric for HalfStepMetric {
        fn update_estimate(&mut self, state: &mut IcpState) -> Result<(), IcpError> {
            if state.correspondences.is_empty() {
                state.last_delta_norm = 0.0;
                return Ok(());
            }
            let step = 0.5 * (self.target - state.transform.translation[0]);
            let increment = RigidTransform::from_translation([step, 0.0, 0.0]);
            state.transform = increment.compose(&state.transform);
            state.last_delta_norm = increment.delta_norm();
            Ok(())
        }

        fn compute_residuals(&self, transform: &RigidTransform) -> Vec<f64> {
            vec![(self.target - transform.translation[0]).abs()]
        }
    }

    #[test]
    fn test_icp_loop_converges() -> Result<(), IcpError> {
        let search = FakeSearch {
            empty: false,
            calls: vec![],
        };
        let mut icp = Icp::new(search, HalfStepMetric { target: 1.0 });
        icp.set_convergence_criteria(IcpConvergenceCriteria {
            max_iterations: 100,
            tolerance: 1e-3,
        });

        let result = icp.estimate()?;

        // steps are 0.5, 0.25, ... and the first one below 1e-3 is 2^-10
        assert_eq!(result.num_iterations, 10);
        assert!(result.converged);
        assert!(result.last_delta_norm < 1e-3);
        assert_eq!(result.num_correspondences, 1);
        assert_relative_eq!(result.transform.translation[0], 1.0, epsilon = 1e-3);

        // the search always sees the estimate of the previous iteration
        assert_eq!(icp.search().calls.len(), 10);
        assert_eq!(icp.search().calls[0], RigidTransform::IDENTITY);
        assert_relative_eq!(icp.search().calls[1].translation[0], 0.5);

        assert!(icp.compute_residuals()[0] < 1e-3);
        Ok(())
    }

    #[test]
    fn test_icp_iteration_cap() -> Result<(), IcpError> {
        let search = FakeSearch {
            empty: false,
            calls: vec![],
        };
        let mut icp = Icp::new(search, HalfStepMetric { target: 1.0 });
        icp.set_convergence_criteria(IcpConvergenceCriteria {
            max_iterations: 3,
            tolerance: 1e-6,
        });

        let result = icp.estimate()?;
        assert_eq!(result.num_iterations, 3);
        assert!(!result.converged);
        assert!(!icp.has_converged());
        assert_relative_eq!(icp.transform().translation[0], 0.875);
        Ok(())
    }

    #[test]
    fn test_icp_initial_guess_and_rerun() -> Result<(), IcpError> {
        let search = FakeSearch {
            empty: false,
            calls: vec![],
        };
        let mut icp = Icp::new(search, HalfStepMetric { target: 1.0 });
        icp.set_initial_guess(RigidTransform::from_translation([1.0, 0.0, 0.0]));

        let result = icp.estimate()?;
        assert_eq!(result.num_iterations, 1);
        assert!(result.converged);
        assert_eq!(icp.search().calls[0].translation[0], 1.0);

        // a second run restarts from the initial guess
        icp.set_initial_guess(RigidTransform::IDENTITY);
        let result = icp.estimate()?;
        assert!(result.num_iterations > 1);
        Ok(())
    }

    #[test]
    fn test_icp_without_correspondences_is_not_converged() -> Result<(), IcpError> {
        let search = FakeSearch {
            empty: true,
            calls: vec![],
        };
        let mut icp = Icp::new(search, HalfStepMetric { target: 1.0 });

        let result = icp.estimate()?;
        assert_eq!(result.num_iterations, 1);
        assert!(!result.converged);
        assert_eq!(result.transform, RigidTransform::IDENTITY);
        assert_eq!(result.num_correspondences, 0);
        Ok(())
    }
}
