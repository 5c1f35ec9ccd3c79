//! Capabilities this crate consumes from the surrounding engine.
//!
//! Buffers and pools hold an `Arc<dyn Device>` and only ever create, bind and
//! destroy objects through it. The device itself is never owned: dropping the
//! last buffer does not tear the device down.

use ash::vk;

use crate::gpu::bind_table::BoundResource;
use crate::gpu::buffer::DeviceBuffer;
use crate::{BindTableVariable, BufferInfo, DebugTag, Result};

pub trait Device: Send + Sync {
    fn create_buffer(&self, info: &BufferInfo) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    /// Allocates a dedicated block carrying at least `properties`. Returns the
    /// memory together with the full property set of the chosen memory type.
    fn allocate_memory(
        &self,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::DeviceMemory, vk::MemoryPropertyFlags)>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> Result<()>;

    /// Maps `size` bytes at `offset`. The pointer stays valid until
    /// [`Device::unmap_memory`] is called on the same memory.
    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<*mut u8>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    fn flush_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<()>;

    fn create_buffer_view(
        &self,
        buffer: vk::Buffer,
        format: vk::Format,
        offset: u64,
        range: u64,
    ) -> Result<vk::BufferView>;
    fn destroy_buffer_view(&self, view: vk::BufferView);

    fn create_bind_table_layout(
        &self,
        variables: &[(BindTableVariable, vk::ShaderStageFlags)],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_bind_table_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_bind_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;
    fn reset_bind_pool(&self, pool: vk::DescriptorPool) -> Result<()>;
    fn destroy_bind_pool(&self, pool: vk::DescriptorPool);
    fn allocate_bind_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>;
    fn free_bind_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()>;

    fn write_binding(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        slot: u32,
        ty: vk::DescriptorType,
        resource: &BoundResource,
    ) -> Result<()>;
    /// Copies slots `first_slot..first_slot + count` of `binding`.
    fn copy_bindings(
        &self,
        src: vk::DescriptorSet,
        dst: vk::DescriptorSet,
        binding: u32,
        first_slot: u32,
        count: u32,
    ) -> Result<()>;

    fn set_debug_name(&self, _object: vk::ObjectType, _raw: u64, _name: &str) {}
    fn set_debug_tag(&self, _object: vk::ObjectType, _raw: u64, _tag: &DebugTag) {}
}

/// A range of device memory handed out by a [`MemoryAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Allocator-private identifier.
    pub id: u64,
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    pub size: u64,
    pub properties: vk::MemoryPropertyFlags,
}

/// External memory source. Buffers built against an allocator bind into the
/// blocks it returns and hand them back on drop; reclamation policy stays with
/// the allocator.
pub trait MemoryAllocator: Send + Sync {
    fn allocate(
        &self,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<MemoryBlock>;
    fn free(&self, block: &MemoryBlock);

    /// Returns a pointer to the first byte of `block`.
    fn map(&self, block: &MemoryBlock) -> Result<*mut u8>;
    fn unmap(&self, block: &MemoryBlock);
    fn flush(&self, _block: &MemoryBlock, _offset: u64, _size: u64) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyBuffer {
    pub src: vk::Buffer,
    pub dst: vk::Buffer,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub amount: u64,
}

/// Recording surface for GPU-side copies. Takes ownership of the staging
/// buffer; waiting for the copy to finish is the caller's business.
pub trait TransferContext {
    fn record_copy(&mut self, copy: CopyBuffer, staging: DeviceBuffer) -> Result<()>;
}
