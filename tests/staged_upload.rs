mod common;

use ash::vk;
use bindery::*;
use common::{device, device_local_buffer};

#[test]
fn build_staged_uploads_through_the_transfer_context() {
    let dev = device();
    let data: Vec<u8> = (0..48).collect();
    let mut recorder = CopyRecorder::new();

    let buffer = BufferBuilder::new(dev.clone())
        .debug_name("mesh")
        .size(64)
        .add_usage(vk::BufferUsageFlags::VERTEX_BUFFER)
        .add_memory_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .initial_data(&data)
        .initial_state(ResourceUse::CopyDst)
        .build_staged(&mut recorder)
        .unwrap();

    assert!(buffer
        .info()
        .usage
        .contains(vk::BufferUsageFlags::TRANSFER_DST));
    assert_eq!(buffer.state().usage, ResourceUse::CopyDst);
    assert_eq!(recorder.pending(), 1);
    // the staging buffer lives in the recorder until the copy runs
    assert_eq!(dev.live_buffers(), 2);
    assert_eq!(dev.read_buffer(buffer.raw(), 0, 48).unwrap(), vec![0u8; 48]);

    recorder.submit(&dev).unwrap();
    assert_eq!(recorder.pending(), 0);
    assert_eq!(dev.live_buffers(), 1);
    assert_eq!(dev.read_buffer(buffer.raw(), 0, 48).unwrap(), data);
}

#[test]
fn staged_update_lands_at_offset() {
    let dev = device();
    let mut buffer = device_local_buffer(&dev, "particles", 128);
    let mut recorder = CopyRecorder::new();

    buffer
        .update_data(96, &[7u8; 32], Some(&mut recorder))
        .unwrap();
    buffer
        .update_pod(0, &[1.0f32, 2.0], Some(&mut recorder))
        .unwrap();
    assert_eq!(recorder.pending(), 2);
    recorder.submit(&dev).unwrap();

    assert_eq!(dev.read_buffer(buffer.raw(), 96, 32).unwrap(), vec![7u8; 32]);
    let head = dev.read_buffer(buffer.raw(), 0, 8).unwrap();
    assert_eq!(head, bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0]));
}

#[test]
fn empty_update_records_nothing() {
    let dev = device();
    let mut buffer = device_local_buffer(&dev, "empty", 16);
    let mut recorder = CopyRecorder::new();
    buffer.update_data(16, &[], Some(&mut recorder)).unwrap();
    assert_eq!(recorder.pending(), 0);
}

#[test]
fn pending_staging_is_released_with_the_recorder() {
    let dev = device();
    let mut buffer = device_local_buffer(&dev, "dropped", 16);
    {
        let mut recorder = CopyRecorder::new();
        buffer
            .update_data(0, &[3u8; 16], Some(&mut recorder))
            .unwrap();
        assert_eq!(dev.live_buffers(), 2);
    }
    assert_eq!(dev.live_buffers(), 1);
    assert_eq!(dev.live_memory_allocations(), 1);
}

#[test]
fn failed_copy_keeps_later_copies_queued() {
    let dev = device();
    let mut gone = device_local_buffer(&dev, "gone", 16);
    let mut kept = device_local_buffer(&dev, "kept", 16);
    let mut recorder = CopyRecorder::new();

    gone.update_data(0, &[1u8; 16], Some(&mut recorder)).unwrap();
    kept.update_data(0, &[2u8; 16], Some(&mut recorder)).unwrap();
    drop(gone);

    assert!(recorder.submit(&dev).is_err());
    assert_eq!(recorder.pending(), 1);
    assert_eq!(dev.read_buffer(kept.raw(), 0, 16).unwrap(), vec![0u8; 16]);

    recorder.submit(&dev).unwrap();
    assert_eq!(recorder.pending(), 0);
    assert_eq!(dev.read_buffer(kept.raw(), 0, 16).unwrap(), vec![2u8; 16]);
    assert_eq!(dev.live_buffers(), 1);
}
