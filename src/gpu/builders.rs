//! Builder pattern entry point for device buffers.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle as _;

use super::buffer::{BackingMemory, DeviceBuffer};
use super::device::{Device, MemoryAllocator, TransferContext};
use crate::{BufferInfo, GPUError, ResourceState, Result};

/// Accumulates buffer configuration and produces one [`DeviceBuffer`] per
/// `build*` call. Flag setters union into the accumulated set; scalar setters
/// overwrite.
#[derive(Clone)]
pub struct BufferBuilder<'a> {
    device: Arc<dyn Device>,
    allocator: Option<Arc<dyn MemoryAllocator>>,
    debug_name: String,
    byte_size: u64,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    shared_queues: Vec<u32>,
    initial_data: Option<&'a [u8]>,
    initial_state: ResourceState,
}

impl<'a> BufferBuilder<'a> {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            allocator: None,
            debug_name: String::new(),
            byte_size: 0,
            usage: vk::BufferUsageFlags::empty(),
            properties: vk::MemoryPropertyFlags::empty(),
            shared_queues: Vec::new(),
            initial_data: None,
            initial_state: ResourceState::UNDEFINED,
        }
    }

    /// Source memory from `allocator` instead of allocating directly.
    pub fn allocator(mut self, allocator: Arc<dyn MemoryAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }

    pub fn size(mut self, byte_size: u64) -> Self {
        self.byte_size = byte_size;
        self
    }

    pub fn add_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn add_memory_properties(mut self, properties: vk::MemoryPropertyFlags) -> Self {
        self.properties |= properties;
        self
    }

    pub fn add_shared_queue(mut self, queue_family: u32) -> Self {
        if !self.shared_queues.contains(&queue_family) {
            self.shared_queues.push(queue_family);
        }
        self
    }

    pub fn initial_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn initial_state(mut self, state: impl Into<ResourceState>) -> Self {
        self.initial_state = state.into();
        self
    }

    /// Builds the buffer, uploading initial data through a direct mapping.
    /// Device-local initial data needs [`BufferBuilder::build_staged`].
    pub fn build(self) -> Result<DeviceBuffer> {
        self.build_inner(None)
    }

    /// Builds the buffer and stages initial data through `transfer` when the
    /// memory is not host visible.
    pub fn build_staged(self, transfer: &mut dyn TransferContext) -> Result<DeviceBuffer> {
        self.build_inner(Some(transfer))
    }

    fn build_inner(self, transfer: Option<&mut dyn TransferContext>) -> Result<DeviceBuffer> {
        if self.byte_size == 0 {
            return Err(GPUError::InvalidArgument(format!(
                "buffer '{}' must have a non-zero size",
                self.debug_name
            )));
        }
        if self.usage.is_empty() {
            return Err(GPUError::InvalidArgument(format!(
                "buffer '{}' has no usage flags",
                self.debug_name
            )));
        }
        if let Some(data) = self.initial_data {
            if data.len() as u64 > self.byte_size {
                return Err(GPUError::OutOfRange {
                    offset: 0,
                    size: data.len() as u64,
                    limit: self.byte_size,
                });
            }
        }

        let mut usage = self.usage;
        if self.initial_data.is_some()
            && !self
                .properties
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }

        let sharing_mode = if self.shared_queues.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let info = BufferInfo {
            debug_name: self.debug_name,
            byte_size: self.byte_size,
            usage,
            sharing_mode,
            queue_families: self.shared_queues,
        };

        let raw = self.device.create_buffer(&info)?;
        let requirements = self.device.buffer_memory_requirements(raw);
        let acquired = match &self.allocator {
            Some(allocator) => allocator
                .allocate(&requirements, self.properties)
                .map(|block| {
                    let properties = block.properties;
                    (
                        BackingMemory::External {
                            allocator: allocator.clone(),
                            block,
                        },
                        properties,
                    )
                }),
            None => self
                .device
                .allocate_memory(&requirements, self.properties)
                .map(|(memory, properties)| (BackingMemory::Owned(memory), properties)),
        };
        let (memory, properties) = match acquired {
            Ok(acquired) => acquired,
            Err(err) => {
                self.device.destroy_buffer(raw);
                return Err(err);
            }
        };

        // From here on, dropping the buffer releases everything acquired so far.
        let mut buffer = DeviceBuffer::from_parts(
            self.device.clone(),
            raw,
            memory,
            info,
            properties,
            self.initial_state,
        );
        buffer.bind_memory()?;

        if !buffer.info().debug_name.is_empty() {
            self.device.set_debug_name(
                vk::ObjectType::BUFFER,
                raw.as_raw(),
                &buffer.info().debug_name,
            );
        }

        if let Some(data) = self.initial_data {
            buffer.update_data(0, data, transfer)?;
        }

        log::debug!(
            "created buffer '{}' ({} bytes, {:?}, {:?})",
            buffer.info().debug_name,
            buffer.size(),
            buffer.info().usage,
            properties
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{HeadlessAllocator, HeadlessDevice};
    use crate::{ErrorKind, ResourceUse};

    fn device() -> Arc<HeadlessDevice> {
        Arc::new(HeadlessDevice::new(&Default::default()))
    }

    #[test]
    fn zero_size_is_rejected() {
        let dev = device();
        let err = BufferBuilder::new(dev.clone())
            .add_usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(dev.live_buffers(), 0);
    }

    #[test]
    fn missing_usage_is_rejected() {
        let err = BufferBuilder::new(device())
            .size(64)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn flags_union_and_scalars_overwrite() {
        let buffer = BufferBuilder::new(device())
            .size(32)
            .size(128)
            .add_usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .add_usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .add_usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .add_memory_properties(vk::MemoryPropertyFlags::HOST_VISIBLE)
            .add_memory_properties(vk::MemoryPropertyFlags::HOST_COHERENT)
            .initial_state(ResourceUse::CopyDst)
            .initial_state(ResourceUse::ShaderRead)
            .build()
            .unwrap();

        assert_eq!(buffer.size(), 128);
        assert_eq!(
            buffer.info().usage,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert!(buffer.memory_properties().contains(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        ));
        assert_eq!(buffer.state().usage, ResourceUse::ShaderRead);
    }

    #[test]
    fn shared_queues_select_concurrent_sharing() {
        let dev = device();
        let exclusive = BufferBuilder::new(dev.clone())
            .size(16)
            .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .add_shared_queue(0)
            .add_shared_queue(0)
            .build()
            .unwrap();
        assert_eq!(exclusive.info().sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert_eq!(exclusive.info().queue_families, vec![0]);

        let concurrent = BufferBuilder::new(dev)
            .size(16)
            .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .add_shared_queue(0)
            .add_shared_queue(2)
            .build()
            .unwrap();
        assert_eq!(concurrent.info().sharing_mode, vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn each_build_is_independent() {
        let dev = device();
        let builder = BufferBuilder::new(dev.clone())
            .size(64)
            .add_usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .add_memory_properties(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let a = builder.clone().build().unwrap();
        let b = builder.build().unwrap();
        assert_ne!(a.raw(), b.raw());
        assert_eq!(dev.live_buffers(), 2);
    }

    #[test]
    fn oversized_initial_data_fails_without_leaks() {
        let dev = device();
        let data = [0u8; 32];
        let err = BufferBuilder::new(dev.clone())
            .size(16)
            .add_usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .add_memory_properties(vk::MemoryPropertyFlags::HOST_VISIBLE)
            .initial_data(&data)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert_eq!(dev.live_buffers(), 0);
        assert_eq!(dev.live_memory_allocations(), 0);
    }

    #[test]
    fn device_local_initial_data_without_transfer_fails_cleanly() {
        let dev = device();
        let data = [1u8; 16];
        let err = BufferBuilder::new(dev.clone())
            .size(16)
            .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .add_memory_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .initial_data(&data)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(dev.live_buffers(), 0);
        assert_eq!(dev.live_memory_allocations(), 0);
    }

    #[test]
    fn huge_sizes_exhaust_memory_instead_of_overflowing() {
        let dev = device();
        let err = BufferBuilder::new(dev.clone())
            .size(u64::MAX - 3)
            .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(dev.live_buffers(), 0);
        assert_eq!(dev.live_memory_allocations(), 0);

        let allocator = Arc::new(HeadlessAllocator::new(dev.clone(), 1024));
        let err = BufferBuilder::new(dev.clone())
            .allocator(allocator.clone())
            .size(u64::MAX)
            .add_usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(dev.live_buffers(), 0);
        assert_eq!(allocator.live_blocks(), 0);
    }
}
