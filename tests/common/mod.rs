#![allow(dead_code)]

use std::sync::{Arc, Once};

use ash::vk;
use bindery::{BufferBuilder, DeviceBuffer, HeadlessDevice, HeadlessInfo};

static LOGGER: Once = Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn device() -> Arc<HeadlessDevice> {
    init_logging();
    Arc::new(HeadlessDevice::new(&HeadlessInfo::default()))
}

pub fn named_device() -> Arc<HeadlessDevice> {
    init_logging();
    Arc::new(HeadlessDevice::new(&HeadlessInfo {
        retain_debug_names: true,
        ..Default::default()
    }))
}

/// Host-visible, coherent buffer usable for texel views.
pub fn host_buffer(device: &Arc<HeadlessDevice>, name: &str, size: u64) -> DeviceBuffer {
    BufferBuilder::new(device.clone())
        .debug_name(name)
        .size(size)
        .add_usage(vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER)
        .add_usage(vk::BufferUsageFlags::TRANSFER_SRC)
        .add_memory_properties(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .build()
        .unwrap()
}

pub fn device_local_buffer(device: &Arc<HeadlessDevice>, name: &str, size: u64) -> DeviceBuffer {
    BufferBuilder::new(device.clone())
        .debug_name(name)
        .size(size)
        .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
        .add_usage(vk::BufferUsageFlags::TRANSFER_DST)
        .add_memory_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .build()
        .unwrap()
}
