use kiddo::immutable::float::kdtree::ImmutableKdTree;

/// Exact nearest neighbour search over a fixed set of 3d points.
///
/// Thin wrapper around an immutable kd-tree; an empty point set is allowed
/// and never returns a neighbour.
pub struct NearestNeighborIndex {
    tree: Option<ImmutableKdTree<f64, u32, 3, 32>>,
}

impl NearestNeighborIndex {
    /// Build the index over `points`.
    pub fn new(points: &[[f64; 3]]) -> Self {
        let tree = match points.is_empty() {
            true => None,
            false => Some(ImmutableKdTree::new_from_slice(points)),
        };
        Self { tree }
    }

    /// Find the closest indexed point to `query`.
    ///
    /// Returns the index of the point and its squared euclidean distance to
    /// the query, or `None` when the index is empty.
    #[inline]
    pub fn nearest(&self, query: &[f64; 3]) -> Option<(usize, f64)> {
        let tree = self.tree.as_ref()?;
        let nn = tree.nearest_one::<kiddo::SquaredEuclidean>(query);
        Some((nn.item as usize, nn.distance))
    }
}
