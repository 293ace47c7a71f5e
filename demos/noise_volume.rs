//! Example: generate a noise volume and read it back in several ways
//!
//! Run with: cargo run --example noise_volume

use anyhow::Context;
use std::time::{Duration, Instant};
use vds_access::{
    generate_noise_volume, DimensionsND, Format, InterpolationMethod, MetadataReadAccess, VolumeBuffer, VoxelBox,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let vds = generate_noise_volume(200, 160, 120, Format::U16)
        .await
        .context("generating volume")?;
    let layout = vds.layout();
    let manager = vds.access_manager();
    let dims = layout.primary_dimensions();

    println!("Volume: {}", layout.summary());
    for category in layout.metadata().categories() {
        println!("  metadata {}: {:?}", category, layout.metadata().names(&category));
    }
    println!("Chunks at LOD 0: {}", manager.chunk_count(dims, 0, 0)?);
    println!();

    // One inline slice as 32-bit floats
    let slice = VoxelBox::new([0, 0, 60, 0, 0, 0], [200, 160, 61, 1, 1, 1]);
    let buffer = VolumeBuffer::new(manager.volume_subset_buffer_size(&slice, Format::R32, 0, 0)?);
    let start = Instant::now();
    let request = manager.request_volume_subset(&buffer, dims, 0, 0, &slice, Format::R32, None)?;
    anyhow::ensure!(
        manager.wait_for_completion(request, Some(Duration::from_secs(30))),
        "slice request did not complete"
    );
    let array = buffer.to_array3(Format::R32, [200, 160, 1])?;
    println!(
        "Slice 200x160 in {:?}: min {:.4} max {:.4}",
        start.elapsed(),
        array.iter().cloned().fold(f64::INFINITY, f64::min),
        array.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    );

    // The same position with every interpolation method
    let position = [[100.3, 80.7, 60.2, 0.0, 0.0, 0.0]];
    for method in [
        InterpolationMethod::Nearest,
        InterpolationMethod::Linear,
        InterpolationMethod::Cubic,
        InterpolationMethod::Angular,
        InterpolationMethod::Triangular,
    ] {
        let buffer = VolumeBuffer::new(manager.volume_samples_buffer_size(1, 0)?);
        let request = manager.request_volume_samples(&buffer, dims, 0, 0, &position, method, None)?;
        if manager.wait_for_completion(request, None) {
            println!("  {:?}: {:.6}", method, buffer.as_f32_vec()[0]);
        }
    }

    // A tilted plane projected onto the sample/crossline axes
    let area = VoxelBox::new([0, 0, 0, 0, 0, 0], [200, 160, 1, 1, 1, 1]);
    let buffer = VolumeBuffer::new(manager.projected_volume_subset_buffer_size(
        &area,
        DimensionsND::Dimensions01,
        Format::R32,
        0,
        0,
    )?);
    let request = manager.request_projected_volume_subset(
        &buffer,
        dims,
        0,
        0,
        &area,
        [0.1, 0.2, 1.0, -90.0],
        DimensionsND::Dimensions01,
        Format::R32,
        InterpolationMethod::Linear,
        Some(0.0),
    )?;
    if manager.wait_for_completion(request, None) {
        let values = buffer.as_f32_vec();
        let covered = values.iter().filter(|value| **value != 0.0).count();
        println!("Projected plane: {} of {} voxels on the volume", covered, values.len());
    }

    vds.close()?;
    Ok(())
}
