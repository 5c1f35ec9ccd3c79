//! Software implementation of [`Device`] for off-GPU use and tests.
//!
//! Every allocation is backed by host memory. Memory types mirror a typical
//! discrete GPU: device-local memory is never host visible, so staged uploads
//! take the same path they would on hardware. Descriptor pools enforce their
//! set and per-type limits and answer `ERROR_OUT_OF_POOL_MEMORY` like a
//! driver would.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle as _;
use parking_lot::Mutex;

use crate::gpu::bind_table::BoundResource;
use crate::gpu::conversions::find_memory_type;
use crate::gpu::device::{CopyBuffer, Device, MemoryAllocator, MemoryBlock, TransferContext};
use crate::gpu::error::check_range;
use crate::utils::{Handle, Pool};
use crate::{
    BindTableVariable, BufferInfo, DebugTag, DeviceBuffer, GPUError, HeadlessInfo, Result,
};

struct BufferRecord {
    size: u64,
    usage: vk::BufferUsageFlags,
    memory: Option<(Handle<MemoryRecord>, u64)>,
}

struct MemoryRecord {
    data: Box<[u8]>,
    type_index: u32,
    mapped: bool,
}

struct ViewRecord {
    _buffer: Handle<BufferRecord>,
}

struct LayoutRecord {
    variables: Vec<BindTableVariable>,
}

struct PoolRecord {
    max_sets: u32,
    capacity: HashMap<vk::DescriptorType, u32>,
    used: HashMap<vk::DescriptorType, u32>,
    sets: Vec<Handle<SetRecord>>,
}

struct SetRecord {
    pool: Handle<PoolRecord>,
    cost: Vec<(vk::DescriptorType, u32)>,
    slots: HashMap<(u32, u32), BoundResource>,
}

#[derive(Default)]
struct HeadlessState {
    buffers: Pool<BufferRecord>,
    memories: Pool<MemoryRecord>,
    views: Pool<ViewRecord>,
    layouts: Pool<LayoutRecord>,
    pools: Pool<PoolRecord>,
    sets: Pool<SetRecord>,
    memory_used: u64,
    names: HashMap<(vk::ObjectType, u64), String>,
    tags: HashMap<(vk::ObjectType, u64), DebugTag>,
}

pub struct HeadlessDevice {
    info: HeadlessInfo,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    state: Mutex<HeadlessState>,
}

fn handle<T>(raw: u64) -> Handle<T> {
    Handle::from_raw(raw)
}

fn invalid_handle(what: &str) -> GPUError {
    GPUError::InvalidArgument(format!("unknown {} handle", what))
}

impl HeadlessDevice {
    pub fn new(info: &HeadlessInfo) -> Self {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 4,
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_heaps[0] = vk::MemoryHeap {
            size: info.memory_budget,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props.memory_heaps[1] = vk::MemoryHeap {
            size: info.memory_budget,
            flags: vk::MemoryHeapFlags::empty(),
        };
        props.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        props.memory_types[2] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_CACHED,
            heap_index: 1,
        };
        props.memory_types[3] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 0,
        };

        log::debug!(
            "headless device with {} byte budget",
            info.memory_budget
        );
        Self {
            info: *info,
            memory_properties: props,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_memory_allocations(&self) -> usize {
        self.state.lock().memories.len()
    }

    pub fn live_buffer_views(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn live_bind_pools(&self) -> usize {
        self.state.lock().pools.len()
    }

    pub fn live_bind_sets(&self) -> usize {
        self.state.lock().sets.len()
    }

    pub fn memory_in_use(&self) -> u64 {
        self.state.lock().memory_used
    }

    pub fn debug_name(&self, object: vk::ObjectType, raw: u64) -> Option<String> {
        self.state.lock().names.get(&(object, raw)).cloned()
    }

    pub fn debug_tag(&self, object: vk::ObjectType, raw: u64) -> Option<DebugTag> {
        self.state.lock().tags.get(&(object, raw)).cloned()
    }

    /// Reads a buffer's contents regardless of memory type.
    pub fn read_buffer(&self, buffer: vk::Buffer, offset: u64, size: u64) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let record = state
            .buffers
            .get_ref(handle(buffer.as_raw()))
            .ok_or_else(|| invalid_handle("buffer"))?;
        check_range(offset, size, record.size)?;
        let (memory, base) = record
            .memory
            .ok_or_else(|| GPUError::IllegalState("buffer has no bound memory".to_string()))?;
        let memory = state
            .memories
            .get_ref(memory)
            .ok_or_else(|| invalid_handle("memory"))?;
        let start = (base + offset) as usize;
        Ok(memory.data[start..start + size as usize].to_vec())
    }

    /// Descriptor currently written at `(binding, slot)` of `set`.
    pub fn binding(&self, set: vk::DescriptorSet, binding: u32, slot: u32) -> Option<BoundResource> {
        let state = self.state.lock();
        state
            .sets
            .get_ref(handle(set.as_raw()))
            .and_then(|record| record.slots.get(&(binding, slot)).copied())
    }

    /// Executes a buffer copy as the transfer queue would.
    pub fn execute_copy(&self, copy: &CopyBuffer) -> Result<()> {
        let src = self.read_buffer(copy.src, copy.src_offset, copy.amount)?;

        let mut state = self.state.lock();
        let record = state
            .buffers
            .get_ref(handle(copy.dst.as_raw()))
            .ok_or_else(|| invalid_handle("buffer"))?;
        check_range(copy.dst_offset, copy.amount, record.size)?;
        if !record.usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
            return Err(GPUError::UnsupportedOperation(
                "copy destination lacks TRANSFER_DST usage".to_string(),
            ));
        }
        let (memory, base) = record
            .memory
            .ok_or_else(|| GPUError::IllegalState("buffer has no bound memory".to_string()))?;
        let memory = state
            .memories
            .get_mut_ref(memory)
            .ok_or_else(|| invalid_handle("memory"))?;
        let start = (base + copy.dst_offset) as usize;
        memory.data[start..start + src.len()].copy_from_slice(&src);
        Ok(())
    }

    fn memory_flags(&self, type_index: u32) -> vk::MemoryPropertyFlags {
        self.memory_properties.memory_types[type_index as usize].property_flags
    }
}

impl Device for HeadlessDevice {
    fn create_buffer(&self, info: &BufferInfo) -> Result<vk::Buffer> {
        if info.byte_size == 0 {
            return Err(GPUError::InvalidArgument("zero sized buffer".to_string()));
        }
        let mut state = self.state.lock();
        let h = state.buffers.insert(BufferRecord {
            size: info.byte_size,
            usage: info.usage,
            memory: None,
        });
        Ok(vk::Buffer::from_raw(h.to_raw()))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        if state.buffers.release(handle(buffer.as_raw())).is_none() {
            log::warn!("destroy of unknown buffer {:?}", buffer);
        }
        state.names.remove(&(vk::ObjectType::BUFFER, buffer.as_raw()));
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state.lock();
        let size = state
            .buffers
            .get_ref(handle(buffer.as_raw()))
            .map(|record| record.size)
            .unwrap_or(0);
        let align = self.info.buffer_alignment.max(1);
        vk::MemoryRequirements {
            // saturates so oversized buffers fail the budget check instead
            size: size.checked_next_multiple_of(align).unwrap_or(u64::MAX),
            alignment: align,
            memory_type_bits: (1 << self.memory_properties.memory_type_count) - 1,
        }
    }

    fn allocate_memory(
        &self,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
        let Some(type_index) = find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            properties,
        ) else {
            return Err(GPUError::UnsupportedOperation(format!(
                "no memory type provides {:?}",
                properties
            )));
        };

        let mut state = self.state.lock();
        if state.memory_used.saturating_add(requirements.size) > self.info.memory_budget {
            return Err(GPUError::ResourceExhausted(format!(
                "{} bytes requested with {} of {} in use",
                requirements.size, state.memory_used, self.info.memory_budget
            )));
        }
        state.memory_used += requirements.size;
        let h = state.memories.insert(MemoryRecord {
            data: vec![0u8; requirements.size as usize].into_boxed_slice(),
            type_index,
            mapped: false,
        });
        Ok((
            vk::DeviceMemory::from_raw(h.to_raw()),
            self.memory_flags(type_index),
        ))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        match state.memories.release(handle(memory.as_raw())) {
            Some(record) => state.memory_used -= record.data.len() as u64,
            None => log::warn!("free of unknown memory {:?}", memory),
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let memory_handle = handle::<MemoryRecord>(memory.as_raw());
        let available = state
            .memories
            .get_ref(memory_handle)
            .map(|record| record.data.len() as u64)
            .ok_or_else(|| invalid_handle("memory"))?;
        let record = state
            .buffers
            .get_mut_ref(handle(buffer.as_raw()))
            .ok_or_else(|| invalid_handle("buffer"))?;
        if record.memory.is_some() {
            return Err(GPUError::IllegalState("buffer memory already bound".to_string()));
        }
        check_range(offset, record.size, available)?;
        record.memory = Some((memory_handle, offset));
        Ok(())
    }

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<*mut u8> {
        let mut state = self.state.lock();
        let record = state
            .memories
            .get_mut_ref(handle(memory.as_raw()))
            .ok_or_else(|| invalid_handle("memory"))?;
        let flags = self.memory_properties.memory_types[record.type_index as usize].property_flags;
        if !flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) || record.mapped {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED.into());
        }
        let len = record.data.len() as u64;
        let size = if size == vk::WHOLE_SIZE {
            len.saturating_sub(offset)
        } else {
            size
        };
        check_range(offset, size, len)?;
        record.mapped = true;
        // SAFETY: offset is in bounds; the boxed slice never reallocates.
        Ok(unsafe { record.data.as_mut_ptr().add(offset as usize) })
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        if let Some(record) = state.memories.get_mut_ref(handle(memory.as_raw())) {
            record.mapped = false;
        }
    }

    fn flush_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<()> {
        let state = self.state.lock();
        let record = state
            .memories
            .get_ref(handle(memory.as_raw()))
            .ok_or_else(|| invalid_handle("memory"))?;
        if !record.mapped {
            return Err(GPUError::IllegalState("flush of unmapped memory".to_string()));
        }
        check_range(offset, size, record.data.len() as u64)
    }

    fn create_buffer_view(
        &self,
        buffer: vk::Buffer,
        _format: vk::Format,
        offset: u64,
        range: u64,
    ) -> Result<vk::BufferView> {
        let mut state = self.state.lock();
        let buffer_handle = handle::<BufferRecord>(buffer.as_raw());
        let size = state
            .buffers
            .get_ref(buffer_handle)
            .map(|record| record.size)
            .ok_or_else(|| invalid_handle("buffer"))?;
        check_range(offset, range, size)?;
        let h = state.views.insert(ViewRecord {
            _buffer: buffer_handle,
        });
        Ok(vk::BufferView::from_raw(h.to_raw()))
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        let mut state = self.state.lock();
        if state.views.release(handle(view.as_raw())).is_none() {
            log::warn!("destroy of unknown buffer view {:?}", view);
        }
    }

    fn create_bind_table_layout(
        &self,
        variables: &[(BindTableVariable, vk::ShaderStageFlags)],
    ) -> Result<vk::DescriptorSetLayout> {
        let mut state = self.state.lock();
        let h = state.layouts.insert(LayoutRecord {
            variables: variables.iter().map(|(var, _)| *var).collect(),
        });
        Ok(vk::DescriptorSetLayout::from_raw(h.to_raw()))
    }

    fn destroy_bind_table_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().layouts.release(handle(layout.as_raw()));
    }

    fn create_bind_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        if max_sets == 0 {
            return Err(GPUError::InvalidArgument("max_sets must be non-zero".to_string()));
        }
        let mut capacity = HashMap::new();
        for size in sizes {
            *capacity.entry(size.ty).or_insert(0) += size.descriptor_count;
        }
        let mut state = self.state.lock();
        let h = state.pools.insert(PoolRecord {
            max_sets,
            capacity,
            used: HashMap::new(),
            sets: Vec::new(),
        });
        Ok(vk::DescriptorPool::from_raw(h.to_raw()))
    }

    fn reset_bind_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .pools
            .get_mut_ref(handle(pool.as_raw()))
            .ok_or_else(|| invalid_handle("descriptor pool"))?;
        let sets = std::mem::take(&mut record.sets);
        record.used.clear();
        for set in sets {
            state.sets.release(set);
        }
        Ok(())
    }

    fn destroy_bind_pool(&self, pool: vk::DescriptorPool) {
        if let Err(err) = self.reset_bind_pool(pool) {
            log::warn!("destroy of descriptor pool {:?}: {}", pool, err);
            return;
        }
        self.state.lock().pools.release(handle(pool.as_raw()));
    }

    fn allocate_bind_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let mut state = self.state.lock();
        let cost: Vec<(vk::DescriptorType, u32)> = state
            .layouts
            .get_ref(handle(layout.as_raw()))
            .ok_or_else(|| invalid_handle("descriptor set layout"))?
            .variables
            .iter()
            .map(|var| (vk::DescriptorType::from(var.var_type), var.count))
            .collect();

        let pool_handle = handle::<PoolRecord>(pool.as_raw());
        let record = state
            .pools
            .get_mut_ref(pool_handle)
            .ok_or_else(|| invalid_handle("descriptor pool"))?;
        if record.sets.len() as u32 >= record.max_sets {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY.into());
        }
        let mut demand: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for (ty, count) in &cost {
            *demand.entry(*ty).or_insert(0) += count;
        }
        for (ty, count) in &demand {
            let capacity = record.capacity.get(ty).copied().unwrap_or(0);
            let used = record.used.get(ty).copied().unwrap_or(0);
            if used + count > capacity {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY.into());
            }
        }
        for (ty, count) in &demand {
            *record.used.entry(*ty).or_insert(0) += count;
        }

        let h = state.sets.insert(SetRecord {
            pool: pool_handle,
            cost,
            slots: HashMap::new(),
        });
        if let Some(record) = state.pools.get_mut_ref(pool_handle) {
            record.sets.push(h);
        }
        Ok(vk::DescriptorSet::from_raw(h.to_raw()))
    }

    fn free_bind_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()> {
        let mut state = self.state.lock();
        let set_handle = handle::<SetRecord>(set.as_raw());
        let pool_handle = handle::<PoolRecord>(pool.as_raw());
        match state.sets.get_ref(set_handle) {
            Some(record) if record.pool == pool_handle => {}
            Some(_) => {
                return Err(GPUError::InvalidArgument(
                    "descriptor set belongs to another pool".to_string(),
                ))
            }
            None => return Err(invalid_handle("descriptor set")),
        }
        let record = state
            .sets
            .release(set_handle)
            .ok_or_else(|| invalid_handle("descriptor set"))?;
        let pool_record = state
            .pools
            .get_mut_ref(pool_handle)
            .ok_or_else(|| invalid_handle("descriptor pool"))?;
        pool_record.sets.retain(|h| *h != set_handle);
        for (ty, count) in record.cost {
            if let Some(used) = pool_record.used.get_mut(&ty) {
                *used = used.saturating_sub(count);
            }
        }
        Ok(())
    }

    fn write_binding(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        slot: u32,
        _ty: vk::DescriptorType,
        resource: &BoundResource,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .sets
            .get_mut_ref(handle(set.as_raw()))
            .ok_or_else(|| invalid_handle("descriptor set"))?;
        record.slots.insert((binding, slot), *resource);
        Ok(())
    }

    fn copy_bindings(
        &self,
        src: vk::DescriptorSet,
        dst: vk::DescriptorSet,
        binding: u32,
        first_slot: u32,
        count: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let copied: Vec<((u32, u32), BoundResource)> = state
            .sets
            .get_ref(handle(src.as_raw()))
            .ok_or_else(|| invalid_handle("descriptor set"))?
            .slots
            .iter()
            .filter(|((b, slot), _)| {
                *b == binding && *slot >= first_slot && *slot - first_slot < count
            })
            .map(|(key, res)| (*key, *res))
            .collect();
        let record = state
            .sets
            .get_mut_ref(handle(dst.as_raw()))
            .ok_or_else(|| invalid_handle("descriptor set"))?;
        record.slots.extend(copied);
        Ok(())
    }

    fn set_debug_name(&self, object: vk::ObjectType, raw: u64, name: &str) {
        if self.info.retain_debug_names {
            self.state
                .lock()
                .names
                .insert((object, raw), name.to_string());
        }
    }

    fn set_debug_tag(&self, object: vk::ObjectType, raw: u64, tag: &DebugTag) {
        if self.info.retain_debug_names {
            self.state.lock().tags.insert((object, raw), tag.clone());
        }
    }
}

/// Budgeted external allocator over a [`HeadlessDevice`]. Each block is a
/// dedicated device allocation; blocks are reclaimed when handed back.
pub struct HeadlessAllocator {
    device: Arc<HeadlessDevice>,
    budget: u64,
    next_id: AtomicU64,
    blocks: Mutex<HashMap<u64, MemoryBlock>>,
}

impl HeadlessAllocator {
    pub fn new(device: Arc<HeadlessDevice>, budget: u64) -> Self {
        Self {
            device,
            budget,
            next_id: AtomicU64::new(1),
            blocks: Mutex::new(HashMap::new()),
        }
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.blocks.lock().values().map(|block| block.size).sum()
    }
}

impl MemoryAllocator for HeadlessAllocator {
    fn allocate(
        &self,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<MemoryBlock> {
        let mut blocks = self.blocks.lock();
        let in_use: u64 = blocks.values().map(|block| block.size).sum();
        if in_use.saturating_add(requirements.size) > self.budget {
            return Err(GPUError::ResourceExhausted(format!(
                "allocator budget of {} bytes exceeded",
                self.budget
            )));
        }
        let (memory, properties) = self.device.allocate_memory(requirements, properties)?;
        let block = MemoryBlock {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            memory,
            offset: 0,
            size: requirements.size,
            properties,
        };
        blocks.insert(block.id, block);
        Ok(block)
    }

    fn free(&self, block: &MemoryBlock) {
        if self.blocks.lock().remove(&block.id).is_some() {
            self.device.free_memory(block.memory);
        } else {
            log::warn!("free of unknown memory block {}", block.id);
        }
    }

    fn map(&self, block: &MemoryBlock) -> Result<*mut u8> {
        self.device.map_memory(block.memory, block.offset, block.size)
    }

    fn unmap(&self, block: &MemoryBlock) {
        self.device.unmap_memory(block.memory);
    }
}

/// Transfer context that queues copies until [`CopyRecorder::submit`].
#[derive(Default)]
pub struct CopyRecorder {
    pending: VecDeque<(CopyBuffer, DeviceBuffer)>,
}

impl CopyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Runs every queued copy in order and releases the staging buffers.
    ///
    /// Stops at the first copy that fails. That copy and its staging buffer
    /// are dropped; later copies stay queued for the next submit.
    pub fn submit(&mut self, device: &HeadlessDevice) -> Result<()> {
        while let Some((copy, staging)) = self.pending.pop_front() {
            let result = device.execute_copy(&copy);
            drop(staging);
            if let Err(err) = result {
                log::warn!(
                    "copy into {:?} failed, {} copies left pending",
                    copy.dst,
                    self.pending.len()
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

impl TransferContext for CopyRecorder {
    fn record_copy(&mut self, copy: CopyBuffer, staging: DeviceBuffer) -> Result<()> {
        self.pending.push_back((copy, staging));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_local_memory_is_not_mappable() {
        let dev = HeadlessDevice::new(&Default::default());
        let req = vk::MemoryRequirements {
            size: 64,
            alignment: 16,
            memory_type_bits: 0b1111,
        };
        let (memory, flags) = dev
            .allocate_memory(&req, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .unwrap();
        assert!(!flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(dev.map_memory(memory, 0, 64).is_err());
        dev.free_memory(memory);
        assert_eq!(dev.memory_in_use(), 0);
    }

    #[test]
    fn memory_budget_is_enforced() {
        let dev = HeadlessDevice::new(&HeadlessInfo {
            memory_budget: 128,
            ..Default::default()
        });
        let req = vk::MemoryRequirements {
            size: 96,
            alignment: 16,
            memory_type_bits: 0b1111,
        };
        let (memory, _) = dev
            .allocate_memory(&req, vk::MemoryPropertyFlags::empty())
            .unwrap();
        let err = dev
            .allocate_memory(&req, vk::MemoryPropertyFlags::empty())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ResourceExhausted);
        dev.free_memory(memory);
    }

    #[test]
    fn pool_limits_report_out_of_pool_memory() {
        let dev = HeadlessDevice::new(&Default::default());
        let layout = dev
            .create_bind_table_layout(&[(
                BindTableVariable {
                    var_type: crate::BindTableVariableType::Uniform,
                    binding: 0,
                    count: 2,
                },
                vk::ShaderStageFlags::ALL,
            )])
            .unwrap();
        let pool = dev
            .create_bind_pool(
                4,
                &[vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: 3,
                }],
            )
            .unwrap();

        let set = dev.allocate_bind_set(pool, layout).unwrap();
        let err = dev.allocate_bind_set(pool, layout).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ResourceExhausted);

        dev.free_bind_set(pool, set).unwrap();
        assert!(dev.allocate_bind_set(pool, layout).is_ok());

        dev.destroy_bind_pool(pool);
        dev.destroy_bind_table_layout(layout);
        assert_eq!(dev.live_bind_sets(), 0);
        assert_eq!(dev.live_bind_pools(), 0);
    }
}
