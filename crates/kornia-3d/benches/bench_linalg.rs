use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kornia_3d::{linalg, transforms::RigidTransform};

// sequential baseline to compare against the rayon version
fn transform_points_serial(
    src_points: &[[f64; 3]],
    transform: &RigidTransform,
    dst_points: &mut [[f64; 3]],
) {
    for (dst, src) in dst_points.iter_mut().zip(src_points.iter()) {
        *dst = transform.transform_point(src);
    }
}

fn bench_transform_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_points");

    for num_points in [1000, 10000, 100000, 500000].iter() {
        group.throughput(criterion::Throughput::Elements(*num_points as u64));
        let parameter_string = format!("{}", num_points);

        let src_points = vec![[2.0, 2.0, 2.0]; *num_points];
        let transform = RigidTransform::from_axis_angle(&[0.0, 1.0, 0.0], 0.3, [0.1, 0.2, 0.3])
            .expect("valid axis");
        let mut dst_points = vec![[0.0; 3]; src_points.len()];

        group.bench_with_input(
            BenchmarkId::new("transform_points_par", &parameter_string),
            &src_points,
            |b, src| {
                b.iter(|| {
                    linalg::transform_points(
                        src,
                        &transform.rotation,
                        &transform.translation,
                        &mut dst_points,
                    )
                    .unwrap();
                    black_box(&dst_points);
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("transform_points_serial", &parameter_string),
            &src_points,
            |b, src| {
                b.iter(|| {
                    transform_points_serial(src, &transform, &mut dst_points);
                    black_box(&dst_points);
                });
            },
        );
    }
    group.finish();
}

fn bench_orthonormalize(c: &mut Criterion) {
    let rotation = [[1.0001, 0.0002, 0.0], [-0.0001, 0.9999, 0.0003], [0.0, 0.0, 1.0]];
    c.bench_function("orthonormalize_rotation", |b| {
        b.iter(|| black_box(linalg::orthonormalize_rotation(black_box(&rotation))))
    });
}

criterion_group!(benches, bench_transform_points, bench_orthonormalize);
criterion_main!(benches);
