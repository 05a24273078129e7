use argh::FromArgs;

use kornia_3d::{
    camera::PinholeIntrinsics,
    linalg::{cross_vec3, squared_norm3},
    pointcloud::PointCloud,
    transforms::RigidTransform,
};
use kornia_icp::{projective::ProjectiveCorrespondenceSearch, Icp, IcpConvergenceCriteria};

#[derive(FromArgs)]
/// Register two synthetic depth frames with projective combined metric ICP
struct Args {
    /// image width in pixels
    #[argh(option, default = "320")]
    width: usize,

    /// image height in pixels
    #[argh(option, default = "240")]
    height: usize,

    /// rotation of the source frame around the y axis, in degrees
    #[argh(option, default = "1.0")]
    angle_deg: f64,

    /// translation of the source frame along the x axis, in meters
    #[argh(option, default = "0.01")]
    shift: f64,

    /// maximum association distance in meters
    #[argh(option, default = "0.05")]
    max_distance: f64,

    /// weight of the point-to-point term
    #[argh(option, default = "0.1")]
    point_to_point_weight: f64,

    /// maximum number of ICP iterations
    #[argh(option, default = "30")]
    max_iterations: usize,
}

// Back-project a bumpy wall so every pixel holds one point.
fn synthetic_depth_frame(
    width: usize,
    height: usize,
    intrinsics: &PinholeIntrinsics,
) -> PointCloud {
    let mut points = Vec::with_capacity(width * height);
    let mut normals = Vec::with_capacity(width * height);

    for v in 0..height {
        for u in 0..width {
            let a = (u as f64 - intrinsics.cx) / intrinsics.fx;
            let b = (v as f64 - intrinsics.cy) / intrinsics.fy;

            let z = 1.5 + 0.1 * (6.0 * a).sin() * (6.0 * b).cos();
            let za = 0.6 * (6.0 * a).cos() * (6.0 * b).cos();
            let zb = -0.6 * (6.0 * a).sin() * (6.0 * b).sin();

            // tangents of z(a, b) * (a, b, 1)
            let pa = [za * a + z, za * b, za];
            let pb = [zb * a, zb * b + z, zb];
            let n = cross_vec3(&pa, &pb);
            let norm = squared_norm3(&n).sqrt();

            points.push([a * z, b * z, z]);
            normals.push([n[0] / norm, n[1] / norm, n[2] / norm]);
        }
    }

    PointCloud::new(points, None, Some(normals))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let intrinsics = PinholeIntrinsics::new(
        528.0 * args.width as f64 / 640.0,
        528.0 * args.height as f64 / 480.0,
        args.width as f64 / 2.0,
        args.height as f64 / 2.0,
    );

    let target_cloud = synthetic_depth_frame(args.width, args.height, &intrinsics);
    log::info!("Target cloud: #{} points", target_cloud.len());

    let ground_truth = RigidTransform::from_axis_angle(
        &[0.0, 1.0, 0.0],
        args.angle_deg.to_radians(),
        [args.shift, 0.0, 0.0],
    )?;

    // the source sees the same scene from a moved camera
    let mut source_cloud = target_cloud.clone();
    source_cloud.transform(&ground_truth.inverse())?;
    log::info!("Source cloud: #{} points", source_cloud.len());

    let mut search = ProjectiveCorrespondenceSearch::new(&target_cloud, &source_cloud);
    search
        .set_intrinsics(intrinsics)
        .set_image_width(args.width)
        .set_image_height(args.height)
        .set_max_distance(args.max_distance * args.max_distance);

    let mut icp = Icp::combined_metric(&target_cloud, &source_cloud, search)?;
    icp.metric_mut()
        .set_point_to_point_weight(args.point_to_point_weight);
    icp.set_convergence_criteria(IcpConvergenceCriteria {
        max_iterations: args.max_iterations,
        tolerance: 1e-6,
    });

    let now = std::time::Instant::now();
    let result = icp.estimate()?;
    log::info!("ICP finished in {:?}", now.elapsed());

    let residuals = icp.compute_residuals();
    let mean_residual = residuals.iter().sum::<f64>() / residuals.len().max(1) as f64;
    log::info!("Mean residual: {:e}", mean_residual);

    println!("Ground truth: {}", serde_json::to_string(&ground_truth)?);
    println!("ICP registration result: {}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
