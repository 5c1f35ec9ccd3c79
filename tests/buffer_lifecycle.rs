mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use bindery::*;
use common::{device, device_local_buffer, host_buffer, named_device};

#[test]
fn host_visible_round_trip() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "round_trip", 128);

    let data: Vec<u8> = (0..32).map(|i| i * 3).collect();
    buffer.update_data(40, &data, None).unwrap();

    let mapped = buffer.map(40, 32).unwrap();
    assert_eq!(mapped, &data[..]);
    buffer.unmap().unwrap();
    assert_eq!(dev.read_buffer(buffer.raw(), 40, 32).unwrap(), data);
}

#[test]
fn map_unmap_map_again() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "remap", 64);

    buffer.map(0, vk::WHOLE_SIZE).unwrap();
    assert!(buffer.is_mapped());
    let err = buffer.map(0, 16).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);

    buffer.unmap().unwrap();
    assert!(!buffer.is_mapped());
    let mapped = buffer.map(16, vk::WHOLE_SIZE).unwrap();
    assert_eq!(mapped.len(), 48);
    buffer.unmap().unwrap();
}

#[test]
fn unmap_without_mapping_is_reported() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "unmapped", 16);
    assert_eq!(buffer.unmap().unwrap_err().kind(), ErrorKind::IllegalState);
}

#[test]
fn map_rejects_bad_ranges_and_memory() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "ranges", 64);
    assert_eq!(
        buffer.map(60, 8).unwrap_err().kind(),
        ErrorKind::OutOfRange
    );
    assert_eq!(
        buffer.map(80, vk::WHOLE_SIZE).unwrap_err().kind(),
        ErrorKind::OutOfRange
    );
    assert!(!buffer.is_mapped());

    let mut local = device_local_buffer(&dev, "local", 64);
    assert_eq!(
        local.map(0, 16).unwrap_err().kind(),
        ErrorKind::UnsupportedOperation
    );
}

#[test]
fn update_data_errors() {
    let dev = device();
    let mut host = host_buffer(&dev, "host", 32);
    assert_eq!(
        host.update_data(24, &[0u8; 16], None).unwrap_err().kind(),
        ErrorKind::OutOfRange
    );

    let mut local = device_local_buffer(&dev, "local", 32);
    assert_eq!(
        local.update_data(0, &[1u8; 8], None).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    let mut no_dst = BufferBuilder::new(dev.clone())
        .size(32)
        .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
        .add_memory_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .build()
        .unwrap();
    let mut recorder = CopyRecorder::new();
    assert_eq!(
        no_dst
            .update_data(0, &[1u8; 8], Some(&mut recorder))
            .unwrap_err()
            .kind(),
        ErrorKind::UnsupportedOperation
    );
    assert_eq!(recorder.pending(), 0);
}

#[test]
fn typed_mapping() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "typed", 64);
    buffer.update_pod(0, &[1u32, 2, 3, 4], None).unwrap();

    let words = buffer.map_as::<u32>(0, 16).unwrap();
    assert_eq!(words, &[1, 2, 3, 4]);
    words[2] = 30;
    buffer.unmap().unwrap();

    let bytes = dev.read_buffer(buffer.raw(), 8, 4).unwrap();
    assert_eq!(bytes, 30u32.to_ne_bytes());

    assert_eq!(
        buffer.map_as::<u32>(0, 6).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert!(!buffer.is_mapped());
}

#[test]
fn non_coherent_memory_is_flushed_on_unmap() {
    let dev = device();
    let mut buffer = BufferBuilder::new(dev.clone())
        .size(32)
        .add_usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
        .add_memory_properties(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        )
        .build()
        .unwrap();
    assert!(!buffer
        .memory_properties()
        .contains(vk::MemoryPropertyFlags::HOST_COHERENT));

    buffer.update_data(0, &[9u8; 32], None).unwrap();
    assert_eq!(dev.read_buffer(buffer.raw(), 0, 32).unwrap(), vec![9u8; 32]);
}

#[test]
fn transitions_return_previous_state() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "states", 16);
    assert_eq!(buffer.state(), ResourceState::UNDEFINED);

    let sequence = [
        ResourceUse::CopyDst,
        ResourceUse::ShaderRead,
        ResourceUse::ShaderWrite,
        ResourceUse::CopySrc,
    ];
    let mut expected = ResourceState::UNDEFINED;
    for usage in sequence {
        let previous = buffer.transition_state(usage.into());
        assert_eq!(previous, expected);
        expected = usage.into();
    }
    assert_eq!(buffer.state().usage, ResourceUse::CopySrc);

    let moved = buffer.transition_state(ResourceState::on_queue(ResourceUse::ShaderRead, 2));
    assert_eq!(moved.usage, ResourceUse::CopySrc);
    assert_eq!(buffer.state().queue_family, 2);
}

#[test]
fn destroy_callback_runs_once_after_views_are_invalidated() {
    let dev = device();
    let calls = Arc::new(AtomicUsize::new(0));
    let replaced = Arc::new(AtomicUsize::new(0));

    let mut buffer = host_buffer(&dev, "callback", 64);
    let view = buffer.get_buffer_view(0, 64, vk::Format::R32_UINT).unwrap();

    let counter = replaced.clone();
    buffer.set_on_destroy_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = calls.clone();
    let seen = view.clone();
    buffer.set_on_destroy_callback(move || {
        assert!(!seen.is_valid());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    drop(buffer);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(replaced.load(Ordering::SeqCst), 0);
    assert!(!view.is_valid());
    assert_eq!(dev.live_buffers(), 0);
    assert_eq!(dev.live_memory_allocations(), 0);
}

#[test]
#[should_panic(expected = "teardown hook failed")]
fn destroy_callback_failures_propagate() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "failing_callback", 16);
    buffer.set_on_destroy_callback(|| panic!("teardown hook failed"));
    drop(buffer);
}

#[test]
fn buffer_dropped_while_mapped_releases_everything() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "mapped_drop", 64);
    buffer.map(0, 32).unwrap();
    drop(buffer);
    assert_eq!(dev.live_buffers(), 0);
    assert_eq!(dev.memory_in_use(), 0);
}

#[test]
fn external_allocator_owns_reclamation() {
    let dev = device();
    let allocator = Arc::new(HeadlessAllocator::new(dev.clone(), 1024));

    let mut buffer = BufferBuilder::new(dev.clone())
        .allocator(allocator.clone())
        .size(256)
        .add_usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
        .add_memory_properties(vk::MemoryPropertyFlags::HOST_VISIBLE)
        .initial_data(&[5u8; 16])
        .build()
        .unwrap();
    assert!(buffer.is_externally_allocated());
    assert_eq!(allocator.live_blocks(), 1);

    let mapped = buffer.map(8, 8).unwrap();
    assert_eq!(mapped, &[5u8; 8]);
    buffer.unmap().unwrap();

    drop(buffer);
    assert_eq!(allocator.live_blocks(), 0);
    assert_eq!(dev.live_memory_allocations(), 0);
    assert_eq!(dev.live_buffers(), 0);
}

#[test]
fn external_allocator_exhaustion_leaves_no_buffer() {
    let dev = device();
    let allocator = Arc::new(HeadlessAllocator::new(dev.clone(), 64));

    let err = BufferBuilder::new(dev.clone())
        .allocator(allocator.clone())
        .size(128)
        .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(err.kind().is_recoverable());
    assert_eq!(dev.live_buffers(), 0);
    assert_eq!(allocator.live_blocks(), 0);
}

#[test]
fn debug_names_reach_the_device() {
    let dev = named_device();
    let mut buffer = host_buffer(&dev, "vertices", 16);
    assert_eq!(
        dev.debug_name(vk::ObjectType::BUFFER, buffer.raw().as_raw())
            .as_deref(),
        Some("vertices")
    );

    buffer.set_debug_name("renamed");
    assert_eq!(buffer.info().debug_name, "renamed");
    assert_eq!(
        dev.debug_name(vk::ObjectType::BUFFER, buffer.raw().as_raw())
            .as_deref(),
        Some("renamed")
    );

    let tag = DebugTag {
        name: 0x42,
        data: vec![1, 2, 3],
    };
    buffer.set_debug_tag(&tag);
    assert_eq!(
        dev.debug_tag(vk::ObjectType::BUFFER, buffer.raw().as_raw()),
        Some(tag)
    );
}

#[test]
fn example_scenario() {
    let dev = device();
    let mut buffer = host_buffer(&dev, "scenario", 256);

    let data: Vec<u8> = (0..64).collect();
    buffer.update_data(0, &data, None).unwrap();

    let first = buffer.get_buffer_view(0, 64, vk::Format::R32_SFLOAT).unwrap();
    let second = buffer.get_buffer_view(0, 64, vk::Format::R32_SFLOAT).unwrap();
    assert!(BufferView::ptr_eq(&first, &second));

    let mapped = buffer.map(0, 256).unwrap();
    assert_eq!(mapped.len(), 256);
    assert_eq!(&mapped[..64], &data[..]);
    buffer.unmap().unwrap();

    let previous = buffer.transition_state(ResourceUse::ShaderRead.into());
    assert_eq!(previous.usage, ResourceUse::Undefined);
}
