use serde::{Deserialize, Serialize};

use crate::transforms::RigidTransform;

/// The intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeIntrinsics {
    /// The focal length in the x direction
    pub fx: f64,
    /// The focal length in the y direction
    pub fy: f64,
    /// The x coordinate of the principal point
    pub cx: f64,
    /// The y coordinate of the principal point
    pub cy: f64,
}

impl Default for PinholeIntrinsics {
    /// Intrinsics of a typical 640x480 structured light depth sensor.
    fn default() -> Self {
        Self {
            fx: 528.0,
            fy: 528.0,
            cx: 320.0,
            cy: 240.0,
        }
    }
}

impl PinholeIntrinsics {
    /// Create the intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Create the intrinsics from a 3x3 camera matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    ///
    /// The skew and last row are ignored.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Self {
        Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        }
    }

    /// Returns the 3x3 camera matrix.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Project a point expressed in the camera frame to an integer pixel.
    ///
    /// Returns `None` when the depth is not strictly positive or the pixel
    /// falls outside `[0, width) x [0, height)`. Sub-pixel coordinates are
    /// rounded half away from zero, so `2.5` maps to pixel `3`.
    #[inline]
    pub fn project_to_pixel(
        &self,
        point_in_camera: &[f64; 3],
        width: usize,
        height: usize,
    ) -> Option<(usize, usize)> {
        let [x, y, z] = *point_in_camera;
        if z <= 0.0 {
            return None;
        }

        let u = (x * self.fx / z + self.cx).round();
        let v = (y * self.fy / z + self.cy).round();

        // the negated comparisons also reject NaN
        if !(u >= 0.0 && u < width as f64) || !(v >= 0.0 && v < height as f64) {
            return None;
        }

        Some((u as usize, v as usize))
    }
}

/// A dense image-sized grid storing, per pixel, the index of the point that projects there.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMap {
    width: usize,
    height: usize,
    data: Vec<Option<usize>>,
}

impl IndexMap {
    /// Create an index map with all cells empty.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![None; width * height],
        }
    }

    /// Project `points` into a camera and record the index of each point at its pixel.
    ///
    /// # Arguments
    ///
    /// * `points` - The points, expressed in the world frame.
    /// * `extrinsics` - The pose of the camera in the world frame (camera to world).
    /// * `intrinsics` - The pinhole intrinsics of the camera.
    /// * `width` - The image width in pixels.
    /// * `height` - The image height in pixels.
    ///
    /// Points behind the camera or outside the image are skipped. When several
    /// points fall on the same pixel the one with the largest index is kept.
    pub fn from_points(
        points: &[[f64; 3]],
        extrinsics: &RigidTransform,
        intrinsics: &PinholeIntrinsics,
        width: usize,
        height: usize,
    ) -> Self {
        let mut index_map = Self::new(width, height);
        let world_to_camera = extrinsics.inverse();

        for (i, point) in points.iter().enumerate() {
            let point_in_camera = world_to_camera.transform_point(point);
            if let Some((x, y)) = intrinsics.project_to_pixel(&point_in_camera, width, height) {
                index_map.data[y * width + x] = Some(i);
            }
        }

        index_map
    }

    /// The width of the map in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The height of the map in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The point index stored at pixel `(x, y)`, if any.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data[y * self.width + x]
    }

    /// Number of non-empty cells.
    pub fn num_filled(&self) -> usize {
        self.data.iter().filter(|c| c.is_some()).count()
    }
}
