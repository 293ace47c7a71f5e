//! End-to-end request tests against generated in-memory volumes

use std::time::Duration;
use vds_access::{
    generate_noise_volume, AccessManagerConfig, DimensionsND, Format, InterpolationMethod,
    NoiseVolumeGenerator, RequestStatus, VdsError, VolumeBuffer, VoxelBox,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> AccessManagerConfig {
    AccessManagerConfig::default().with_worker_threads(4)
}

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(30));

#[tokio::test]
async fn test_u8_slice_matches_nearest_samples() {
    init_logging();
    let vds = NoiseVolumeGenerator::new(60, 60, 60, Format::U8)
        .with_config(config())
        .generate()
        .await
        .unwrap();
    let manager = vds.access_manager();
    let layout = vds.layout();
    let dims = layout.primary_dimensions();

    let slice = VoxelBox::new([0, 0, 0, 0, 0, 0], [60, 60, 1, 1, 1, 1]);
    let size = manager.volume_subset_buffer_size(&slice, Format::U8, 0, 0).unwrap();
    assert_eq!(size, 3600);

    let subset = VolumeBuffer::new(size);
    let subset_request = manager
        .request_volume_subset(&subset, dims, 0, 0, &slice, Format::U8, None)
        .unwrap();

    let positions: Vec<[f32; 6]> = (0..3600)
        .map(|i| [(i % 60) as f32 + 0.5, (i / 60) as f32 + 0.5, 0.5, 0.0, 0.0, 0.0])
        .collect();
    let samples = VolumeBuffer::new(manager.volume_samples_buffer_size(positions.len(), 0).unwrap());
    let samples_request = manager
        .request_volume_samples(&samples, dims, 0, 0, &positions, InterpolationMethod::Nearest, None)
        .unwrap();

    assert!(manager.wait_for_completion(subset_request, TIMEOUT));
    assert!(manager.wait_for_completion(samples_request, TIMEOUT));

    let channel = layout.channel(0).unwrap();
    let bytes = subset.to_vec();
    let values = samples.as_f32_vec();
    for i in 0..3600 {
        let expected = channel.to_real(bytes[i] as f64) as f32;
        assert!(
            (expected - values[i]).abs() < 1e-6,
            "voxel {}: subset {} sample {}",
            i,
            expected,
            values[i]
        );
    }
}

#[tokio::test]
async fn test_traces_match_samples() {
    init_logging();
    let vds = NoiseVolumeGenerator::new(40, 36, 34, Format::R32)
        .with_config(config())
        .generate()
        .await
        .unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    let trace_positions = [[0.0, 3.5, 7.5, 0.0, 0.0, 0.0], [0.0, 35.5, 33.5, 0.0, 0.0, 0.0]];
    let traces = VolumeBuffer::new(manager.volume_traces_buffer_size(2, 0, 0, 0).unwrap());
    assert_eq!(traces.len(), 2 * 40 * 4);
    let traces_request = manager
        .request_volume_traces(&traces, dims, 0, 0, &trace_positions, InterpolationMethod::Nearest, 0, None)
        .unwrap();

    let sample_positions: Vec<[f32; 6]> = trace_positions
        .iter()
        .flat_map(|position| {
            (0..40).map(move |s| [s as f32 + 0.5, position[1], position[2], 0.0, 0.0, 0.0])
        })
        .collect();
    let samples = VolumeBuffer::new(sample_positions.len() * 4);
    let samples_request = manager
        .request_volume_samples(&samples, dims, 0, 0, &sample_positions, InterpolationMethod::Nearest, None)
        .unwrap();

    assert!(manager.wait_for_completion(traces_request, TIMEOUT));
    assert!(manager.wait_for_completion(samples_request, TIMEOUT));
    assert_eq!(traces.as_f32_vec(), samples.as_f32_vec());
}

#[tokio::test]
async fn test_linear_samples_between_voxels() {
    init_logging();
    let generator = NoiseVolumeGenerator::new(40, 40, 40, Format::R32).with_config(config());
    let vds = generator.generate().await.unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    // Halfway between voxels 10 and 11 along dimension 0, centered on the others
    let positions = [[11.0, 20.5, 30.5, 0.0, 0.0, 0.0]];
    let buffer = VolumeBuffer::new(4);
    let request = manager
        .request_volume_samples(&buffer, dims, 0, 0, &positions, InterpolationMethod::Linear, None)
        .unwrap();
    assert!(manager.wait_for_completion(request, TIMEOUT));

    let a = generator.value_at(&[10, 20, 30, 0, 0, 0]) as f32;
    let b = generator.value_at(&[11, 20, 30, 0, 0, 0]) as f32;
    let value = buffer.as_f32_vec()[0];
    assert!((value - (a + b) / 2.0).abs() < 1e-6, "{} vs {} {}", value, a, b);
}

#[tokio::test]
async fn test_projected_plane_matches_slice() {
    init_logging();
    let vds = NoiseVolumeGenerator::new(40, 40, 40, Format::R32)
        .with_config(config())
        .generate()
        .await
        .unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    let slice = VoxelBox::new([0, 0, 10, 0, 0, 0], [40, 40, 11, 1, 1, 1]);
    let subset = VolumeBuffer::new(manager.volume_subset_buffer_size(&slice, Format::R32, 0, 0).unwrap());
    let subset_request = manager
        .request_volume_subset(&subset, dims, 0, 0, &slice, Format::R32, None)
        .unwrap();

    let area = VoxelBox::new([0, 0, 0, 0, 0, 0], [40, 40, 1, 1, 1, 1]);
    let size = manager
        .projected_volume_subset_buffer_size(&area, DimensionsND::Dimensions01, Format::R32, 0, 0)
        .unwrap();
    assert_eq!(size, 40 * 40 * 4);
    let projected = VolumeBuffer::new(size);
    let projected_request = manager
        .request_projected_volume_subset(
            &projected,
            dims,
            0,
            0,
            &area,
            [0.0, 0.0, 1.0, -10.5],
            DimensionsND::Dimensions01,
            Format::R32,
            InterpolationMethod::Nearest,
            None,
        )
        .unwrap();

    assert!(manager.wait_for_completion(subset_request, TIMEOUT));
    assert!(manager.wait_for_completion(projected_request, TIMEOUT));
    assert_eq!(subset.as_f32_vec(), projected.as_f32_vec());
}

#[tokio::test]
async fn test_invalid_projection_rejected() {
    init_logging();
    let vds = generate_noise_volume(40, 40, 40, Format::R32).await.unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();
    let area = VoxelBox::new([0, 0, 0, 0, 0, 0], [40, 40, 1, 1, 1, 1]);
    let buffer = VolumeBuffer::new(40 * 40 * 4);

    let wrong_group = manager.request_projected_volume_subset(
        &buffer,
        dims,
        0,
        0,
        &area,
        [0.0, 0.0, 1.0, -10.5],
        DimensionsND::Dimensions03,
        Format::R32,
        InterpolationMethod::Nearest,
        None,
    );
    assert!(matches!(wrong_group, Err(VdsError::InvalidArgument(_))));

    let flat_plane = manager.request_projected_volume_subset(
        &buffer,
        dims,
        0,
        0,
        &area,
        [1.0, 0.0, 0.0, -10.5],
        DimensionsND::Dimensions01,
        Format::R32,
        InterpolationMethod::Nearest,
        None,
    );
    assert!(matches!(flat_plane, Err(VdsError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_buffer_validation() {
    init_logging();
    let vds = generate_noise_volume(60, 60, 60, Format::U8).await.unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    let full = VoxelBox::new([0; 6], [60, 60, 60, 1, 1, 1]);
    assert_eq!(manager.volume_subset_buffer_size(&full, Format::U8, 0, 0).unwrap(), 216_000);
    assert_eq!(manager.volume_subset_buffer_size(&full, Format::R32, 0, 0).unwrap(), 864_000);

    let small = VolumeBuffer::new(10);
    let result = manager.request_volume_subset(&small, dims, 0, 0, &full, Format::U8, None);
    assert!(matches!(
        result,
        Err(VdsError::BufferTooSmall { required: 216_000, actual: 10 })
    ));

    let outside = VoxelBox::new([0; 6], [61, 60, 60, 1, 1, 1]);
    let result = manager.request_volume_subset(&VolumeBuffer::new(1 << 20), dims, 0, 0, &outside, Format::U8, None);
    assert!(matches!(result, Err(VdsError::OutOfRange(_))));

    let result = manager.request_volume_samples(&small, dims, 0, 0, &[], InterpolationMethod::Linear, None);
    assert!(matches!(result, Err(VdsError::InvalidArgument(_))));

    let result = manager.request_volume_subset(&small, DimensionsND::Dimensions01, 0, 0, &full, Format::U8, None);
    assert!(result.unwrap_err().is_validation_error());
}

#[tokio::test]
async fn test_completion_reported_once() {
    init_logging();
    let vds = generate_noise_volume(40, 40, 40, Format::R32).await.unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    let chunk = manager.chunk_index_from_position(dims, 0, 0, &[35, 5, 5, 0, 0, 0]).unwrap();
    let request = manager.prefetch_volume_chunk(dims, 0, 0, chunk).unwrap();
    assert!(manager.wait_for_completion(request, TIMEOUT));
    assert!(!manager.is_completed(request));
    assert!(!manager.wait_for_completion(request, Some(Duration::from_millis(10))));
    assert_eq!(manager.request_status(request), RequestStatus::Unknown);

    let box_ = VoxelBox::new([0; 6], [40, 40, 40, 1, 1, 1]);
    let buffer = VolumeBuffer::new(40 * 40 * 40 * 4);
    let request = manager
        .request_volume_subset(&buffer, dims, 0, 0, &box_, Format::R32, None)
        .unwrap();
    while manager.request_status(request) == RequestStatus::Pending {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(manager.request_status(request), RequestStatus::Completed);
    assert_eq!(manager.request_status(request), RequestStatus::Completed);
    assert_eq!(manager.completion_factor(request), 1.0);
    assert!(manager.is_completed(request));
    assert!(!manager.is_completed(request));
}

#[tokio::test]
async fn test_chunk_queries() {
    init_logging();
    let vds = generate_noise_volume(100, 40, 40, Format::R32).await.unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    assert_eq!(manager.chunk_count(dims, 0, 0).unwrap(), 4 * 2 * 2);
    let chunk = manager.chunk_index_from_position(dims, 0, 0, &[99, 39, 0, 0, 0, 0]).unwrap();
    assert_eq!(chunk, 3 + 4);
    let extent = manager.chunk_extent(dims, 0, 0, chunk).unwrap();
    assert_eq!(extent.min_excluding_margin[0], 96);
    assert_eq!(extent.max_excluding_margin[0], 100);
    assert_eq!(extent.min_including_margin[0], 92);

    assert!(manager.chunk_index_from_position(dims, 0, 0, &[100, 0, 0, 0, 0, 0]).is_err());
    assert!(manager.chunk_extent(dims, 0, 0, 16).is_err());
    assert!(manager.prefetch_volume_chunk(dims, 0, 0, -1).is_err());
}

#[tokio::test]
async fn test_repeated_requests_agree() {
    init_logging();
    let vds = generate_noise_volume(90, 70, 40, Format::R32).await.unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    let voxels = VoxelBox::new([10, 5, 3, 0, 0, 0], [85, 66, 38, 1, 1, 1]);
    let size = manager.volume_subset_buffer_size(&voxels, Format::U16, 0, 0).unwrap();
    let first = VolumeBuffer::new(size);
    let second = VolumeBuffer::new(size);
    let requests = [
        manager.request_volume_subset(&first, dims, 0, 0, &voxels, Format::U16, None).unwrap(),
        manager.request_volume_subset(&second, dims, 0, 0, &voxels, Format::U16, None).unwrap(),
    ];
    for request in requests {
        assert!(manager.wait_for_completion(request, TIMEOUT));
    }
    assert_eq!(first.to_vec(), second.to_vec());

    // Positions on both sides of the chunk boundary at 64
    let positions: Vec<[f32; 6]> = (0..200)
        .map(|i| [55.0 + i as f32 * 0.1, 10.3 + (i % 7) as f32, 20.7, 0.0, 0.0, 0.0])
        .collect();
    let first = VolumeBuffer::new(positions.len() * 4);
    let second = VolumeBuffer::new(positions.len() * 4);
    let requests = [
        manager
            .request_volume_samples(&first, dims, 0, 0, &positions, InterpolationMethod::Cubic, None)
            .unwrap(),
        manager
            .request_volume_samples(&second, dims, 0, 0, &positions, InterpolationMethod::Cubic, None)
            .unwrap(),
    ];
    for request in requests {
        assert!(manager.wait_for_completion(request, TIMEOUT));
    }
    assert_eq!(first.to_vec(), second.to_vec());
    assert!(first.as_f32_vec().iter().all(|value| value.is_finite()));
}

#[tokio::test]
async fn test_linear_samples_across_chunk_boundaries() {
    init_logging();
    let generator = NoiseVolumeGenerator::new(70, 40, 40, Format::R32).with_config(config());
    let vds = generator.generate().await.unwrap();
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    // Between voxels 31 and 32 along dimensions 0 and 1 and near the far corner
    // of the first chunk along dimension 2
    let positions = [[32.0, 32.0, 31.5, 0.0, 0.0, 0.0], [64.0, 0.5, 0.5, 0.0, 0.0, 0.0]];
    let buffer = VolumeBuffer::new(8);
    let request = manager
        .request_volume_samples(&buffer, dims, 0, 0, &positions, InterpolationMethod::Linear, None)
        .unwrap();
    assert!(manager.wait_for_completion(request, TIMEOUT));
    let values = buffer.as_f32_vec();

    let corners: f64 = [[31, 31], [32, 31], [31, 32], [32, 32]]
        .iter()
        .map(|[x, y]| generator.value_at(&[*x, *y, 31, 0, 0, 0]))
        .sum();
    assert!((values[0] as f64 - corners / 4.0).abs() < 1e-6, "{} vs {}", values[0], corners / 4.0);

    let a = generator.value_at(&[63, 0, 0, 0, 0, 0]);
    let b = generator.value_at(&[64, 0, 0, 0, 0, 0]);
    assert!((values[1] as f64 - (a + b) / 2.0).abs() < 1e-6, "{} vs {} {}", values[1], a, b);
}
