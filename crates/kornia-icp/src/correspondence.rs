use serde::{Deserialize, Serialize};

/// An association between a destination point and a source point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Index of the point in the destination (first) cloud.
    pub index_in_first: usize,
    /// Index of the point in the source (second) cloud.
    pub index_in_second: usize,
    /// Cost of the association, lower is better.
    pub value: f64,
}

impl Correspondence {
    /// Create a new correspondence.
    pub fn new(index_in_first: usize, index_in_second: usize, value: f64) -> Self {
        Self {
            index_in_first,
            index_in_second,
            value,
        }
    }
}

/// An ordered set of correspondences.
pub type CorrespondenceSet = Vec<Correspondence>;

/// Scores a candidate association.
///
/// Receives the destination index, the source index and the squared euclidean
/// distance between both points, and returns the value compared against the
/// maximum distance threshold. Any `Fn(usize, usize, f64) -> f64` closure
/// implements this trait.
pub trait CorrespondenceEvaluator: Sync {
    /// Compute the association cost.
    fn evaluate(&self, dst_index: usize, src_index: usize, squared_distance: f64) -> f64;
}

impl<F> CorrespondenceEvaluator for F
where
    F: Fn(usize, usize, f64) -> f64 + Sync,
{
    #[inline]
    fn evaluate(&self, dst_index: usize, src_index: usize, squared_distance: f64) -> f64 {
        self(dst_index, src_index, squared_distance)
    }
}

/// Uses the squared distance itself as the association cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceEvaluator;

impl CorrespondenceEvaluator for DistanceEvaluator {
    #[inline]
    fn evaluate(&self, _dst_index: usize, _src_index: usize, squared_distance: f64) -> f64 {
        squared_distance
    }
}

/// Keep only the lowest-cost fraction of the correspondences.
///
/// Keeps `floor(fraction * len)` entries with the smallest values; entries
/// with equal values keep their relative order. The result is sorted back by
/// ascending source index. A fraction outside `(0, 1)` leaves the set untouched.
pub fn filter_correspondences_fraction(correspondences: &mut CorrespondenceSet, fraction: f64) {
    if !(fraction > 0.0 && fraction < 1.0) {
        return;
    }

    let num_keep = (fraction * correspondences.len() as f64).floor() as usize;
    correspondences.sort_by(|a, b| a.value.total_cmp(&b.value));
    correspondences.truncate(num_keep);
    correspondences.sort_by_key(|c| c.index_in_second);
}
