use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ash::vk;
use ash::vk::Handle as _;
use bytemuck::Pod;

use super::conversions::texel_size;
use super::device::{CopyBuffer, Device, MemoryAllocator, MemoryBlock, TransferContext};
use super::error::check_range;
use crate::{BufferBuilder, BufferInfo, DebugTag, GPUError, ResourceState, Result};

pub(crate) enum BackingMemory {
    /// Allocated directly through the device; freed with the buffer.
    Owned(vk::DeviceMemory),
    /// Borrowed from an external allocator, which reclaims it.
    External {
        allocator: Arc<dyn MemoryAllocator>,
        block: MemoryBlock,
    },
}

impl BackingMemory {
    fn handle(&self) -> vk::DeviceMemory {
        match self {
            BackingMemory::Owned(memory) => *memory,
            BackingMemory::External { block, .. } => block.memory,
        }
    }

    fn base_offset(&self) -> u64 {
        match self {
            BackingMemory::Owned(_) => 0,
            BackingMemory::External { block, .. } => block.offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ViewKey {
    offset: u64,
    size: u64,
    format: vk::Format,
}

#[derive(Debug, Clone, Copy)]
struct MappedRange {
    offset: u64,
    size: u64,
}

struct ViewInner {
    device: Arc<dyn Device>,
    raw: vk::BufferView,
    buffer: vk::Buffer,
    key: ViewKey,
    source_alive: Arc<AtomicBool>,
    released: AtomicBool,
}

impl ViewInner {
    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.device.destroy_buffer_view(self.raw);
        }
    }
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Texel view over a byte range of a [`DeviceBuffer`].
///
/// Views never keep their buffer alive. Once the buffer is dropped every
/// outstanding view reports `is_valid() == false` and its accessors fail with
/// `IllegalState`.
#[derive(Clone)]
pub struct BufferView {
    inner: Arc<ViewInner>,
}

impl BufferView {
    pub fn is_valid(&self) -> bool {
        self.inner.source_alive.load(Ordering::Acquire)
            && !self.inner.released.load(Ordering::Acquire)
    }

    pub fn raw(&self) -> Result<vk::BufferView> {
        self.ensure_valid()?;
        Ok(self.inner.raw)
    }

    pub fn buffer(&self) -> Result<vk::Buffer> {
        self.ensure_valid()?;
        Ok(self.inner.buffer)
    }

    pub fn offset(&self) -> u64 {
        self.inner.key.offset
    }

    pub fn size(&self) -> u64 {
        self.inner.key.size
    }

    pub fn format(&self) -> vk::Format {
        self.inner.key.format
    }

    /// True when both handles refer to the same cached view object.
    pub fn ptr_eq(a: &BufferView, b: &BufferView) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(GPUError::IllegalState(
                "buffer view outlived its source buffer".to_string(),
            ))
        }
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("raw", &self.inner.raw)
            .field("offset", &self.inner.key.offset)
            .field("size", &self.inner.key.size)
            .field("format", &self.inner.key.format)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A device buffer with its backing memory, tracked state and view cache.
///
/// Only [`BufferBuilder`] creates these. Operations are not internally
/// synchronized; mutating calls take `&mut self`.
pub struct DeviceBuffer {
    device: Arc<dyn Device>,
    raw: vk::Buffer,
    memory: BackingMemory,
    info: BufferInfo,
    properties: vk::MemoryPropertyFlags,
    state: ResourceState,
    views: HashMap<ViewKey, Weak<ViewInner>>,
    alive: Arc<AtomicBool>,
    mapped: Option<MappedRange>,
    on_destroy: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceBuffer {
    pub(crate) fn from_parts(
        device: Arc<dyn Device>,
        raw: vk::Buffer,
        memory: BackingMemory,
        info: BufferInfo,
        properties: vk::MemoryPropertyFlags,
        state: ResourceState,
    ) -> Self {
        Self {
            device,
            raw,
            memory,
            info,
            properties,
            state,
            views: HashMap::new(),
            alive: Arc::new(AtomicBool::new(true)),
            mapped: None,
            on_destroy: None,
        }
    }

    pub(crate) fn bind_memory(&self) -> Result<()> {
        self.device
            .bind_buffer_memory(self.raw, self.memory.handle(), self.memory.base_offset())
    }

    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.info.byte_size
    }

    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    pub fn is_externally_allocated(&self) -> bool {
        matches!(self.memory, BackingMemory::External { .. })
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Maps `size` bytes at `offset`; `vk::WHOLE_SIZE` maps the rest of the
    /// buffer. Only one mapping may be active at a time.
    pub fn map(&mut self, offset: u64, size: u64) -> Result<&mut [u8]> {
        let (ptr, len) = self.map_raw(offset, size)?;
        // SAFETY: the backend guarantees `ptr` addresses `len` writable bytes
        // until unmap, and the returned borrow of `self` prevents unmap (or a
        // second map) while the slice is alive.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Typed variant of [`DeviceBuffer::map`]. The mapping is released again
    /// if the range cannot be viewed as `T`.
    pub fn map_as<T: Pod>(&mut self, offset: u64, size: u64) -> Result<&mut [T]> {
        let (ptr, len) = self.map_raw(offset, size)?;
        let elem = std::mem::size_of::<T>();
        if elem == 0 || len % elem != 0 || (ptr as usize) % std::mem::align_of::<T>() != 0 {
            self.unmap()?;
            return Err(GPUError::InvalidArgument(format!(
                "mapped range is not a whole, aligned run of {}",
                std::any::type_name::<T>()
            )));
        }
        // SAFETY: as in `map`; alignment and length were checked for `T`, and
        // `T: Pod` accepts any bit pattern.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.cast::<T>(), len / elem) })
    }

    fn map_raw(&mut self, offset: u64, size: u64) -> Result<(*mut u8, usize)> {
        if self.mapped.is_some() {
            return Err(GPUError::IllegalState(format!(
                "buffer '{}' is already mapped",
                self.info.debug_name
            )));
        }
        let size = self.resolve_size(offset, size)?;
        check_range(offset, size, self.info.byte_size)?;
        if size == 0 {
            return Err(GPUError::InvalidArgument(
                "cannot map an empty range".to_string(),
            ));
        }
        if !self.is_host_visible() {
            return Err(GPUError::UnsupportedOperation(format!(
                "buffer '{}' is not host visible",
                self.info.debug_name
            )));
        }

        let ptr = match &self.memory {
            BackingMemory::Owned(memory) => {
                let base = self.device.map_memory(*memory, 0, vk::WHOLE_SIZE)?;
                // SAFETY: the allocation spans at least `byte_size` bytes.
                unsafe { base.add(offset as usize) }
            }
            BackingMemory::External { allocator, block } => {
                let base = allocator.map(block)?;
                // SAFETY: the block spans at least `byte_size` bytes and the
                // range was checked against it above.
                unsafe { base.add(offset as usize) }
            }
        };
        self.mapped = Some(MappedRange { offset, size });
        Ok((ptr, size as usize))
    }

    pub fn unmap(&mut self) -> Result<()> {
        let Some(range) = self.mapped.take() else {
            log::warn!("unmap of buffer '{}' which is not mapped", self.info.debug_name);
            return Err(GPUError::IllegalState(format!(
                "buffer '{}' is not mapped",
                self.info.debug_name
            )));
        };

        let coherent = self
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        match &self.memory {
            BackingMemory::Owned(memory) => {
                let flushed = if coherent {
                    Ok(())
                } else {
                    self.device.flush_memory(*memory, range.offset, range.size)
                };
                self.device.unmap_memory(*memory);
                flushed
            }
            BackingMemory::External { allocator, block } => {
                let flushed = if coherent {
                    Ok(())
                } else {
                    allocator.flush(block, range.offset, range.size)
                };
                allocator.unmap(block);
                flushed
            }
        }
    }

    /// Writes `data` at `offset`. Host-visible memory is written through a
    /// temporary mapping; anything else is staged through `transfer`.
    pub fn update_data(
        &mut self,
        offset: u64,
        data: &[u8],
        transfer: Option<&mut dyn TransferContext>,
    ) -> Result<()> {
        let size = data.len() as u64;
        check_range(offset, size, self.info.byte_size)?;
        if data.is_empty() {
            return Ok(());
        }

        if self.is_host_visible() {
            let mapped = self.map(offset, size)?;
            mapped.copy_from_slice(data);
            return self.unmap();
        }

        let Some(transfer) = transfer else {
            return Err(GPUError::InvalidArgument(format!(
                "buffer '{}' is device local and needs a transfer context",
                self.info.debug_name
            )));
        };
        if !self
            .info
            .usage
            .contains(vk::BufferUsageFlags::TRANSFER_DST)
        {
            return Err(GPUError::UnsupportedOperation(format!(
                "buffer '{}' lacks TRANSFER_DST usage for a staged copy",
                self.info.debug_name
            )));
        }

        let staging = BufferBuilder::new(self.device.clone())
            .debug_name(format!("{} Staging Buffer", self.info.debug_name))
            .size(size)
            .add_usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .add_memory_properties(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .initial_data(data)
            .build()?;

        log::trace!(
            "staging {} bytes into '{}' at offset {}",
            size,
            self.info.debug_name,
            offset
        );
        transfer.record_copy(
            CopyBuffer {
                src: staging.raw(),
                dst: self.raw,
                src_offset: 0,
                dst_offset: offset,
                amount: size,
            },
            staging,
        )
    }

    pub fn update_pod<T: Pod>(
        &mut self,
        offset: u64,
        data: &[T],
        transfer: Option<&mut dyn TransferContext>,
    ) -> Result<()> {
        self.update_data(offset, bytemuck::cast_slice(data), transfer)
    }

    /// Returns the cached view for `(offset, size, format)` or creates one.
    pub fn get_buffer_view(
        &mut self,
        offset: u64,
        size: u64,
        format: vk::Format,
    ) -> Result<BufferView> {
        let size = match self.resolve_size(offset, size) {
            Ok(size) if size > 0 && check_range(offset, size, self.info.byte_size).is_ok() => size,
            _ => {
                return Err(GPUError::InvalidArgument(format!(
                    "view range {}+{} does not fit buffer '{}' of {} bytes",
                    offset, size, self.info.debug_name, self.info.byte_size
                )))
            }
        };

        let key = ViewKey {
            offset,
            size,
            format,
        };
        if let Some(inner) = self.views.get(&key).and_then(Weak::upgrade) {
            log::trace!("view cache hit on '{}' {:?}", self.info.debug_name, key);
            return Ok(BufferView { inner });
        }

        self.validate_view_format(size, format)?;
        let raw = self
            .device
            .create_buffer_view(self.raw, format, offset, size)?;
        let inner = Arc::new(ViewInner {
            device: self.device.clone(),
            raw,
            buffer: self.raw,
            key,
            source_alive: self.alive.clone(),
            released: AtomicBool::new(false),
        });

        self.views.retain(|_, view| view.strong_count() > 0);
        self.views.insert(key, Arc::downgrade(&inner));
        Ok(BufferView { inner })
    }

    /// Number of cached views that are still held somewhere.
    pub fn live_view_count(&self) -> usize {
        self.views
            .values()
            .filter(|view| view.strong_count() > 0)
            .count()
    }

    /// Records `new_state` and returns the state it replaces, for barrier
    /// synthesis by the caller. No GPU work is issued.
    pub fn transition_state(&mut self, new_state: ResourceState) -> ResourceState {
        std::mem::replace(&mut self.state, new_state)
    }

    /// Registers the teardown hook, replacing any earlier one. The hook runs
    /// once, after views are invalidated and before native objects are freed.
    pub fn set_on_destroy_callback<F>(&mut self, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_destroy = Some(Box::new(func));
    }

    pub fn set_debug_name(&mut self, name: &str) {
        self.info.debug_name = name.to_string();
        self.device
            .set_debug_name(vk::ObjectType::BUFFER, self.raw.as_raw(), name);
    }

    pub fn set_debug_tag(&self, tag: &DebugTag) {
        self.device
            .set_debug_tag(vk::ObjectType::BUFFER, self.raw.as_raw(), tag);
    }

    fn resolve_size(&self, offset: u64, size: u64) -> Result<u64> {
        if size != vk::WHOLE_SIZE {
            return Ok(size);
        }
        self.info
            .byte_size
            .checked_sub(offset)
            .ok_or(GPUError::OutOfRange {
                offset,
                size,
                limit: self.info.byte_size,
            })
    }

    fn validate_view_format(&self, size: u64, format: vk::Format) -> Result<()> {
        let texel_usage =
            vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
        if !self.info.usage.intersects(texel_usage) {
            return Err(GPUError::InvalidArgument(format!(
                "buffer '{}' has no texel buffer usage",
                self.info.debug_name
            )));
        }
        let Some(texel) = texel_size(format) else {
            return Err(GPUError::InvalidArgument(format!(
                "{:?} is not a texel buffer format",
                format
            )));
        };
        if size % texel != 0 {
            return Err(GPUError::InvalidArgument(format!(
                "view size {} is not a multiple of the {:?} texel size",
                size, format
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("raw", &self.raw)
            .field("info", &self.info)
            .field("properties", &self.properties)
            .field("state", &self.state)
            .field("mapped", &self.mapped.is_some())
            .finish()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        for (_, view) in self.views.drain() {
            if let Some(view) = view.upgrade() {
                view.release();
            }
        }

        if self.mapped.is_some() {
            log::debug!("buffer '{}' dropped while mapped", self.info.debug_name);
            if let Err(err) = self.unmap() {
                log::warn!("unmap during drop of '{}': {}", self.info.debug_name, err);
            }
        }

        if let Some(callback) = self.on_destroy.take() {
            callback();
        }

        self.device.destroy_buffer(self.raw);
        match &self.memory {
            BackingMemory::Owned(memory) => self.device.free_memory(*memory),
            BackingMemory::External { allocator, block } => allocator.free(block),
        }
        log::debug!("destroyed buffer '{}'", self.info.debug_name);
    }
}
