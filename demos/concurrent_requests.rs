//! Example: many concurrent requests sharing one page cache
//!
//! Run with: cargo run --example concurrent_requests

use std::time::{Duration, Instant};
use vds_access::{
    AccessManagerConfig, Format, InterpolationMethod, NoiseVolumeGenerator, RequestStatus, VolumeBuffer, VoxelBox,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AccessManagerConfig::default()
        .with_worker_threads(4)
        .with_max_concurrent_chunk_tasks(8);
    let vds = NoiseVolumeGenerator::new(256, 256, 128, Format::R32)
        .with_config(config)
        .generate()
        .await?;
    let manager = vds.access_manager();
    let dims = vds.layout().primary_dimensions();

    // Every inline slice at once
    let start = Instant::now();
    let requests: Vec<_> = (0..128)
        .map(|inline| {
            let slice = VoxelBox::new([0, 0, inline, 0, 0, 0], [256, 256, inline + 1, 1, 1, 1]);
            let buffer = VolumeBuffer::new(256 * 256 * 4);
            manager
                .request_volume_subset(&buffer, dims, 0, 0, &slice, Format::R32, None)
                .map(|id| (id, buffer))
        })
        .collect::<vds_access::Result<_>>()?;
    println!("Issued {} slice requests", requests.len());

    let mut completed = 0;
    for (id, _buffer) in &requests {
        if manager.wait_for_completion(*id, Some(Duration::from_secs(60))) {
            completed += 1;
        }
    }
    println!("{} slices completed in {:?}", completed, start.elapsed());

    // Traces through a grid, canceled halfway through
    let positions: Vec<[f32; 6]> = (0..64)
        .flat_map(|y| (0..64).map(move |z| [0.0, y as f32 * 4.0 + 0.5, z as f32 * 2.0 + 0.5, 0.0, 0.0, 0.0]))
        .collect();
    let buffer = VolumeBuffer::new(manager.volume_traces_buffer_size(positions.len(), 0, 0, 0)?);
    let id = manager.request_volume_traces(
        &buffer,
        dims,
        0,
        0,
        &positions,
        InterpolationMethod::Cubic,
        0,
        None,
    )?;
    std::thread::sleep(Duration::from_millis(1));
    manager.cancel(id);
    match manager.request_status(id) {
        RequestStatus::Canceled => println!("Trace request canceled: {:?}", manager.cancel_reason(id)),
        status => println!("Trace request status after cancel: {:?}", status),
    }
    manager.wait_for_completion(id, Some(Duration::from_secs(60)));

    vds.close()?;
    Ok(())
}
