use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use vds_access::{Format, InterpolationMethod, NoiseVolumeGenerator, Vds, VolumeBuffer, VoxelBox};

fn noise_volume() -> Vds {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime
        .block_on(NoiseVolumeGenerator::new(128, 128, 128, Format::R32).generate())
        .unwrap()
}

fn bench_requests(c: &mut Criterion) {
    let vds = noise_volume();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    let slice = VoxelBox::new([0, 0, 64, 0, 0, 0], [128, 128, 65, 1, 1, 1]);
    let buffer = VolumeBuffer::new(128 * 128 * 4);
    c.bench_function("subset_slice_r32", |b| {
        b.iter(|| {
            let id = manager
                .request_volume_subset(&buffer, dims, 0, 0, &slice, Format::R32, None)
                .unwrap();
            black_box(manager.wait_for_completion(id, None))
        })
    });

    let slice_u8 = VolumeBuffer::new(128 * 128);
    c.bench_function("subset_slice_u8_convert", |b| {
        b.iter(|| {
            let id = manager
                .request_volume_subset(&slice_u8, dims, 0, 0, &slice, Format::U8, None)
                .unwrap();
            black_box(manager.wait_for_completion(id, None))
        })
    });

    let positions: Vec<[f32; 6]> = (0..4096)
        .map(|i| {
            let i = i as f32;
            [(i * 0.37) % 127.0, (i * 0.61) % 127.0, (i * 0.13) % 127.0, 0.0, 0.0, 0.0]
        })
        .collect();
    let samples = VolumeBuffer::new(positions.len() * 4);
    for method in [InterpolationMethod::Nearest, InterpolationMethod::Linear, InterpolationMethod::Cubic] {
        c.bench_function(&format!("samples_{:?}", method).to_lowercase(), |b| {
            b.iter(|| {
                let id = manager
                    .request_volume_samples(&samples, dims, 0, 0, &positions, method, None)
                    .unwrap();
                black_box(manager.wait_for_completion(id, None))
            })
        });
    }
}

criterion_group!(benches, bench_requests);
criterion_main!(benches);
