use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use parking_lot::Mutex;
use vk_mem::Alloc;

use crate::gpu::device::{MemoryAllocator, MemoryBlock};
use crate::{GPUError, Result};

/// [`MemoryAllocator`] backed by the Vulkan Memory Allocator.
pub struct VmaAllocator {
    allocator: vk_mem::Allocator,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    next_id: AtomicU64,
    allocations: Mutex<HashMap<u64, vk_mem::Allocation>>,
}

impl VmaAllocator {
    /// # Safety
    /// `device` must have been created from `pdevice` on `instance` and must
    /// outlive the allocator.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        pdevice: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator =
            vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(instance, device, pdevice))?;
        Ok(Self {
            allocator,
            memory_properties: instance.get_physical_device_memory_properties(pdevice),
            next_id: AtomicU64::new(1),
            allocations: Mutex::new(HashMap::new()),
        })
    }

    pub fn live_blocks(&self) -> usize {
        self.allocations.lock().len()
    }
}

impl MemoryAllocator for VmaAllocator {
    fn allocate(
        &self,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<MemoryBlock> {
        let create_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Unknown,
            required_flags: properties,
            ..Default::default()
        };
        let allocation = unsafe { self.allocator.allocate_memory(requirements, &create_info) }
            .map_err(|res| match res {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    GPUError::ResourceExhausted(format!(
                        "vma: {} bytes of {:?} memory",
                        requirements.size, properties
                    ))
                }
                _ => GPUError::from(res),
            })?;
        let info = self.allocator.get_allocation_info(&allocation);
        let block = MemoryBlock {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            memory: info.device_memory,
            offset: info.offset,
            size: info.size,
            properties: self.memory_properties.memory_types[info.memory_type as usize]
                .property_flags,
        };
        self.allocations.lock().insert(block.id, allocation);
        Ok(block)
    }

    fn free(&self, block: &MemoryBlock) {
        match self.allocations.lock().remove(&block.id) {
            Some(mut allocation) => unsafe { self.allocator.free_memory(&mut allocation) },
            None => log::warn!("vma: free of unknown block {}", block.id),
        }
    }

    fn map(&self, block: &MemoryBlock) -> Result<*mut u8> {
        let mut allocations = self.allocations.lock();
        let allocation = allocations
            .get_mut(&block.id)
            .ok_or_else(|| GPUError::InvalidArgument(format!("unknown block {}", block.id)))?;
        Ok(unsafe { self.allocator.map_memory(allocation)? })
    }

    fn unmap(&self, block: &MemoryBlock) {
        if let Some(allocation) = self.allocations.lock().get_mut(&block.id) {
            unsafe { self.allocator.unmap_memory(allocation) };
        }
    }

    fn flush(&self, block: &MemoryBlock, offset: u64, size: u64) -> Result<()> {
        let allocations = self.allocations.lock();
        let allocation = allocations
            .get(&block.id)
            .ok_or_else(|| GPUError::InvalidArgument(format!("unknown block {}", block.id)))?;
        self.allocator
            .flush_allocation(allocation, offset as usize, size as usize)?;
        Ok(())
    }
}

impl Drop for VmaAllocator {
    fn drop(&mut self) {
        let leaked = self.allocations.get_mut().len();
        if leaked > 0 {
            log::warn!("vma allocator dropped with {} live blocks", leaked);
        }
        for (_, mut allocation) in self.allocations.get_mut().drain() {
            unsafe { self.allocator.free_memory(&mut allocation) };
        }
    }
}
