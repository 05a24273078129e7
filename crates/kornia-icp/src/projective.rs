use kornia_3d::{
    camera::{IndexMap, PinholeIntrinsics},
    linalg::squared_distance3,
    pointcloud::PointCloud,
    transforms::RigidTransform,
};
use rayon::prelude::*;

use crate::{
    correspondence::{
        filter_correspondences_fraction, Correspondence, CorrespondenceEvaluator,
        CorrespondenceSet, DistanceEvaluator,
    },
    error::IcpError,
    icp::CorrespondenceSearch,
};

/// Approximate correspondence search through projective data association.
///
/// The destination cloud is rendered once into an [`IndexMap`] with a pinhole
/// camera. Each source point is then projected with the same camera and
/// associated with whatever destination point landed on that pixel, which
/// costs O(1) per query.
///
/// The index map is rebuilt lazily on the next search after any change to the
/// camera intrinsics, extrinsics, image size or destination cloud.
pub struct ProjectiveCorrespondenceSearch<'a, E = DistanceEvaluator> {
    dst: &'a PointCloud,
    src: &'a PointCloud,
    evaluator: E,
    intrinsics: PinholeIntrinsics,
    image_width: usize,
    image_height: usize,
    // camera to world, and its inverse
    extrinsics: RigidTransform,
    extrinsics_inv: RigidTransform,
    max_distance: f64,
    inlier_fraction: f64,
    // None means the map must be rebuilt before the next search
    index_map: Option<IndexMap>,
    src_transformed: Vec<[f64; 3]>,
}

impl<'a> ProjectiveCorrespondenceSearch<'a, DistanceEvaluator> {
    /// Create a search between a destination and a source cloud.
    ///
    /// Uses a 640x480 camera at the origin with the intrinsics of a typical
    /// depth sensor, a maximum squared distance of `1e-4` and the squared
    /// distance as association cost.
    pub fn new(dst: &'a PointCloud, src: &'a PointCloud) -> Self {
        Self::with_evaluator(dst, src, DistanceEvaluator)
    }
}

impl<'a, E: CorrespondenceEvaluator> ProjectiveCorrespondenceSearch<'a, E> {
    /// Create a search with a custom association cost.
    pub fn with_evaluator(dst: &'a PointCloud, src: &'a PointCloud, evaluator: E) -> Self {
        Self {
            dst,
            src,
            evaluator,
            intrinsics: PinholeIntrinsics::default(),
            image_width: 640,
            image_height: 480,
            extrinsics: RigidTransform::IDENTITY,
            extrinsics_inv: RigidTransform::IDENTITY,
            max_distance: 1e-4,
            inlier_fraction: 1.0,
            index_map: None,
            src_transformed: Vec::new(),
        }
    }

    /// Find correspondences for the source cloud.
    ///
    /// With `Some(transform)` the source points are mapped by `transform`
    /// first; with `None` they are used as given.
    ///
    /// # Errors
    ///
    /// Fails if transforming the source points fails.
    pub fn find_correspondences(
        &mut self,
        transform: Option<&RigidTransform>,
    ) -> Result<CorrespondenceSet, IcpError> {
        let mut correspondences = CorrespondenceSet::new();
        self.find_correspondences_into(transform, &mut correspondences)?;
        Ok(correspondences)
    }

    /// Same as [`ProjectiveCorrespondenceSearch::find_correspondences`] reusing a caller buffer.
    ///
    /// The buffer is cleared first. On return it holds the accepted
    /// correspondences in ascending source index.
    pub fn find_correspondences_into(
        &mut self,
        transform: Option<&RigidTransform>,
        correspondences: &mut CorrespondenceSet,
    ) -> Result<(), IcpError> {
        correspondences.clear();

        if let Some(transform) = transform {
            self.src_transformed.resize(self.src.len(), [0.0; 3]);
            self.src
                .transformed_points_into(transform, &mut self.src_transformed)?;
        }
        self.ensure_index_map();

        let Some(index_map) = self.index_map.as_ref() else {
            return Ok(());
        };
        let src_points: &[[f64; 3]] = match transform {
            Some(_) => &self.src_transformed,
            None => self.src.points(),
        };
        let dst_points = self.dst.points();

        let (width, height) = (self.image_width, self.image_height);
        let world_to_camera = &self.extrinsics_inv;
        let intrinsics = &self.intrinsics;
        let evaluator = &self.evaluator;
        let value_to_reject = self.max_distance + 1.0;

        // one slot per source point, rejected unless a match is written
        let mut candidates =
            vec![Correspondence::new(usize::MAX, usize::MAX, value_to_reject); src_points.len()];

        candidates
            .par_iter_mut()
            .zip(src_points.par_iter())
            .enumerate()
            .for_each(|(i, (slot, src_point))| {
                let point_in_camera = world_to_camera.transform_point(src_point);
                let Some((x, y)) = intrinsics.project_to_pixel(&point_in_camera, width, height)
                else {
                    return;
                };
                let Some(dst_index) = index_map.get(x, y) else {
                    return;
                };
                let squared_distance = squared_distance3(src_point, &dst_points[dst_index]);
                *slot = Correspondence::new(
                    dst_index,
                    i,
                    evaluator.evaluate(dst_index, i, squared_distance),
                );
            });

        correspondences.extend(
            candidates
                .into_iter()
                .filter(|c| c.value < self.max_distance),
        );

        filter_correspondences_fraction(correspondences, self.inlier_fraction);

        Ok(())
    }

    // Rebuild the index map if it was invalidated or its size is stale.
    fn ensure_index_map(&mut self) {
        let is_valid = self.index_map.as_ref().is_some_and(|map| {
            map.width() == self.image_width && map.height() == self.image_height
        });
        if is_valid {
            return;
        }

        let index_map = IndexMap::from_points(
            self.dst.points(),
            &self.extrinsics,
            &self.intrinsics,
            self.image_width,
            self.image_height,
        );
        log::debug!(
            "Rebuilt projective index map {}x{}: {} of {} destination points visible",
            self.image_width,
            self.image_height,
            index_map.num_filled(),
            self.dst.len()
        );
        self.index_map = Some(index_map);
    }

    /// Mark the index map as stale so that the next search rebuilds it.
    pub fn invalidate_index_map(&mut self) -> &mut Self {
        self.index_map = None;
        self
    }

    /// Whether the cached index map matches the current configuration.
    pub fn is_index_map_valid(&self) -> bool {
        self.index_map.is_some()
    }

    /// The cached index map, if built and not invalidated.
    pub fn index_map(&self) -> Option<&IndexMap> {
        self.index_map.as_ref()
    }

    /// The destination cloud.
    pub fn destination(&self) -> &'a PointCloud {
        self.dst
    }

    /// Replace the destination cloud. Invalidates the index map.
    pub fn set_destination(&mut self, dst: &'a PointCloud) -> &mut Self {
        self.dst = dst;
        self.invalidate_index_map()
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

    /// The camera intrinsics used for the projection.
    pub fn intrinsics(&self) -> &PinholeIntrinsics {
        &self.intrinsics
    }

    /// Set the camera intrinsics. Invalidates the index map.
    pub fn set_intrinsics(&mut self, intrinsics: PinholeIntrinsics) -> &mut Self {
        self.intrinsics = intrinsics;
        self.invalidate_index_map()
    }

    /// The camera intrinsics as a 3x3 matrix.
    pub fn intrinsic_matrix(&self) -> [[f64; 3]; 3] {
        self.intrinsics.matrix()
    }

    /// Set the camera intrinsics from a 3x3 matrix. Invalidates the index map.
    pub fn set_intrinsic_matrix(&mut self, k: &[[f64; 3]; 3]) -> &mut Self {
        self.set_intrinsics(PinholeIntrinsics::from_matrix(k))
    }

    /// The projection image width in pixels.
    pub fn image_width(&self) -> usize {
        self.image_width
    }

    /// Set the projection image width. Invalidates the index map.
    pub fn set_image_width(&mut self, width: usize) -> &mut Self {
        self.image_width = width;
        self.invalidate_index_map()
    }

    /// The projection image height in pixels.
    pub fn image_height(&self) -> usize {
        self.image_height
    }

    /// Set the projection image height. Invalidates the index map.
    pub fn set_image_height(&mut self, height: usize) -> &mut Self {
        self.image_height = height;
        self.invalidate_index_map()
    }

    /// The pose of the projection camera in the destination frame.
    pub fn extrinsics(&self) -> &RigidTransform {
        &self.extrinsics
    }

    /// Set the pose of the projection camera (camera to world). Invalidates the index map.
    pub fn set_extrinsics(&mut self, extrinsics: RigidTransform) -> &mut Self {
        self.extrinsics = extrinsics;
        self.extrinsics_inv = extrinsics.inverse();
        self.invalidate_index_map()
    }

    /// The maximum accepted association cost.
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Set the maximum accepted association cost.
    ///
    /// With the default evaluator this is a squared distance.
    pub fn set_max_distance(&mut self, max_distance: f64) -> &mut Self {
        self.max_distance = max_distance;
        self
    }

    /// The association cost evaluator.
    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Replace the association cost evaluator.
    pub fn set_evaluator(&mut self, evaluator: E) -> &mut Self {
        self.evaluator = evaluator;
        self
    }

    /// The fraction of lowest-cost correspondences kept after each search.
    pub fn inlier_fraction(&self) -> f64 {
        self.inlier_fraction
    }

    /// Set the fraction of lowest-cost correspondences to keep.
    ///
    /// Values outside `(0, 1)` keep all correspondences.
    pub fn set_inlier_fraction(&mut self, fraction: f64) -> &mut Self {
        self.inlier_fraction = fraction;
        self
    }
}

impl<E: CorrespondenceEvaluator> CorrespondenceSearch for ProjectiveCorrespondenceSearch<'_, E> {
    fn find_correspondences_into(
        &mut self,
        transform: Option<&RigidTransform>,
        correspondences: &mut CorrespondenceSet,
    ) -> Result<(), IcpError> {
        ProjectiveCorrespondenceSearch::find_correspondences_into(self, transform, correspondences)
    }
}
