//! [`Device`] over a live `ash::Device`.
//!
//! The engine keeps ownership of the instance and device; [`VulkanDevice`]
//! only borrows them through cloned dispatch tables and never destroys either.

use std::collections::HashMap;
use std::ffi::CString;

use ash::extensions::ext::DebugUtils;
use ash::vk;
use parking_lot::Mutex;

use crate::gpu::bind_table::BoundResource;
use crate::gpu::conversions::find_memory_type;
use crate::gpu::device::{CopyBuffer, Device, TransferContext};
use crate::sync::BarrierBuilder;
use crate::{BindTableVariable, BufferInfo, DebugTag, DeviceBuffer, GPUError, Result};

#[cfg(feature = "bindery-vma")]
pub mod vma;
#[cfg(feature = "bindery-vma")]
pub use vma::VmaAllocator;

pub struct VulkanDevice {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    non_coherent_atom_size: u64,
    debug_utils: Option<DebugUtils>,
    allocation_sizes: Mutex<HashMap<vk::DeviceMemory, u64>>,
}

impl VulkanDevice {
    /// # Safety
    /// `device` must have been created from `pdevice` on `instance` and must
    /// outlive every object created through the returned value.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: ash::Device,
        pdevice: vk::PhysicalDevice,
    ) -> Self {
        let memory_properties = instance.get_physical_device_memory_properties(pdevice);
        let limits = instance.get_physical_device_properties(pdevice).limits;
        Self {
            device,
            memory_properties,
            non_coherent_atom_size: limits.non_coherent_atom_size.max(1),
            debug_utils: None,
            allocation_sizes: Mutex::new(HashMap::new()),
        }
    }

    /// Routes debug names and tags to `VK_EXT_debug_utils`. The extension
    /// must be enabled on `instance`.
    pub fn with_debug_utils(mut self, entry: &ash::Entry, instance: &ash::Instance) -> Self {
        self.debug_utils = Some(DebugUtils::new(entry, instance));
        self
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Widens `offset..offset + size` to whole non-coherent atoms.
    fn flush_range(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> (u64, u64) {
        let atom = self.non_coherent_atom_size;
        let start = offset / atom * atom;
        let end = offset.saturating_add(size).div_ceil(atom).saturating_mul(atom);
        let allocated = self
            .allocation_sizes
            .lock()
            .get(&memory)
            .copied()
            .unwrap_or(0);
        if size == vk::WHOLE_SIZE || end >= allocated {
            (start, vk::WHOLE_SIZE)
        } else {
            (start, end - start)
        }
    }
}

impl Device for VulkanDevice {
    fn create_buffer(&self, info: &BufferInfo) -> Result<vk::Buffer> {
        let mut create_info = vk::BufferCreateInfo::builder()
            .size(info.byte_size)
            .usage(info.usage)
            .sharing_mode(info.sharing_mode);
        if info.sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&info.queue_families);
        }
        Ok(unsafe { self.device.create_buffer(&create_info, None)? })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
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

        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);
        let memory = unsafe { self.device.allocate_memory(&info, None) }.map_err(|res| {
            match res {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    GPUError::ResourceExhausted(format!(
                        "{} bytes of {:?} memory: {}",
                        requirements.size, properties, res
                    ))
                }
                _ => GPUError::from(res),
            }
        })?;
        self.allocation_sizes
            .lock()
            .insert(memory, requirements.size);
        Ok((
            memory,
            self.memory_properties.memory_types[type_index as usize].property_flags,
        ))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.allocation_sizes.lock().remove(&memory);
        unsafe { self.device.free_memory(memory, None) };
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> Result<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset)? };
        Ok(())
    }

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<*mut u8> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())?
        };
        Ok(ptr.cast::<u8>())
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) };
    }

    fn flush_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<()> {
        let (offset, size) = self.flush_range(memory, offset, size);
        let range = vk::MappedMemoryRange::builder()
            .memory(memory)
            .offset(offset)
            .size(size)
            .build();
        unsafe { self.device.flush_mapped_memory_ranges(&[range])? };
        Ok(())
    }

    fn create_buffer_view(
        &self,
        buffer: vk::Buffer,
        format: vk::Format,
        offset: u64,
        range: u64,
    ) -> Result<vk::BufferView> {
        let info = vk::BufferViewCreateInfo::builder()
            .buffer(buffer)
            .format(format)
            .offset(offset)
            .range(range);
        Ok(unsafe { self.device.create_buffer_view(&info, None)? })
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        unsafe { self.device.destroy_buffer_view(view, None) };
    }

    fn create_bind_table_layout(
        &self,
        variables: &[(BindTableVariable, vk::ShaderStageFlags)],
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = variables
            .iter()
            .map(|(var, stages)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(var.binding)
                    .descriptor_type(var.var_type.into())
                    .descriptor_count(var.count)
                    .stage_flags(*stages)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        Ok(unsafe { self.device.create_descriptor_set_layout(&info, None)? })
    }

    fn destroy_bind_table_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_bind_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        Ok(unsafe { self.device.create_descriptor_pool(&info, None)? })
    }

    fn reset_bind_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?
        };
        Ok(())
    }

    fn destroy_bind_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_bind_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info)? };
        sets.into_iter()
            .next()
            .ok_or_else(|| GPUError::IllegalState("driver returned no descriptor set".to_string()))
    }

    fn free_bind_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()> {
        unsafe { self.device.free_descriptor_sets(pool, &[set])? };
        Ok(())
    }

    fn write_binding(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        slot: u32,
        ty: vk::DescriptorType,
        resource: &BoundResource,
    ) -> Result<()> {
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(slot)
            .descriptor_type(ty);

        let buffer_info;
        let image_info;
        let texel_view;
        let write = match *resource {
            BoundResource::Buffer {
                buffer,
                offset,
                range,
            } => {
                buffer_info = [vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                }];
                write.buffer_info(&buffer_info)
            }
            BoundResource::TexelBuffer(view) => {
                texel_view = [view];
                write.texel_buffer_view(&texel_view)
            }
            BoundResource::Image { view, layout } => {
                image_info = [vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view,
                    image_layout: layout,
                }];
                write.image_info(&image_info)
            }
            BoundResource::Sampler(sampler) => {
                image_info = [vk::DescriptorImageInfo {
                    sampler,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }];
                write.image_info(&image_info)
            }
            BoundResource::CombinedImageSampler {
                view,
                layout,
                sampler,
            } => {
                image_info = [vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                }];
                write.image_info(&image_info)
            }
        };

        unsafe { self.device.update_descriptor_sets(&[write.build()], &[]) };
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
        let copy = vk::CopyDescriptorSet::builder()
            .src_set(src)
            .src_binding(binding)
            .src_array_element(first_slot)
            .dst_set(dst)
            .dst_binding(binding)
            .dst_array_element(first_slot)
            .descriptor_count(count)
            .build();
        unsafe { self.device.update_descriptor_sets(&[], &[copy]) };
        Ok(())
    }

    fn set_debug_name(&self, object: vk::ObjectType, raw: u64, name: &str) {
        let Some(utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            log::warn!("debug name {:?} contains a NUL byte", name);
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(object)
            .object_handle(raw)
            .object_name(&name);
        if let Err(err) =
            unsafe { utils.set_debug_utils_object_name(self.device.handle(), &info) }
        {
            log::warn!("failed to name {:?} {:#x}: {}", object, raw, err);
        }
    }

    fn set_debug_tag(&self, object: vk::ObjectType, raw: u64, tag: &DebugTag) {
        let Some(utils) = &self.debug_utils else {
            return;
        };
        let info = vk::DebugUtilsObjectTagInfoEXT::builder()
            .object_type(object)
            .object_handle(raw)
            .tag_name(tag.name)
            .tag(&tag.data);
        if let Err(err) = unsafe { utils.set_debug_utils_object_tag(self.device.handle(), &info) }
        {
            log::warn!("failed to tag {:?} {:#x}: {}", object, raw, err);
        }
    }
}

/// Records staged copies into a command buffer the caller is recording.
///
/// Staging buffers stay alive until [`CommandRecorder::retire`], which must
/// only be called once the submission using the command buffer has finished.
pub struct CommandRecorder {
    device: ash::Device,
    cmd: vk::CommandBuffer,
    staging: Vec<DeviceBuffer>,
}

impl CommandRecorder {
    /// # Safety
    /// `cmd` must be in the recording state on `device` for as long as copies
    /// are recorded through the returned value.
    pub unsafe fn new(device: ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self {
            device,
            cmd,
            staging: Vec::new(),
        }
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Emits the barriers collected in `barriers`, leaving it empty.
    pub fn barrier(&mut self, barriers: &mut BarrierBuilder) {
        unsafe { barriers.emit(&self.device, self.cmd) };
    }

    pub fn pending_staging(&self) -> usize {
        self.staging.len()
    }

    /// Releases staging memory of completed copies.
    pub fn retire(&mut self) {
        if !self.staging.is_empty() {
            log::trace!("retiring {} staging buffers", self.staging.len());
        }
        self.staging.clear();
    }
}

impl TransferContext for CommandRecorder {
    fn record_copy(&mut self, copy: CopyBuffer, staging: DeviceBuffer) -> Result<()> {
        let region = vk::BufferCopy {
            src_offset: copy.src_offset,
            dst_offset: copy.dst_offset,
            size: copy.amount,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(self.cmd, copy.src, copy.dst, &[region])
        };
        self.staging.push(staging);
        Ok(())
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if !self.staging.is_empty() {
            log::warn!(
                "command recorder dropped with {} unretired staging buffers",
                self.staging.len()
            );
        }
    }
}
