use ash::vk;
use smallvec::SmallVec;

use crate::sync::state::ResourceState;

/// Collects buffer barriers from the `(previous, next)` pairs returned by
/// `DeviceBuffer::transition_state`. Emission into a command buffer belongs to
/// the recording layer; this only produces the Vulkan structures.
#[derive(Default)]
pub struct BarrierBuilder {
    buffers: SmallVec<[vk::BufferMemoryBarrier2; 4]>,
}

impl BarrierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&mut self, buffer: vk::Buffer, src: ResourceState, dst: ResourceState) {
        self.buffer_range(buffer, src, dst, 0, vk::WHOLE_SIZE);
    }

    pub fn buffer_range(
        &mut self,
        buffer: vk::Buffer,
        src: ResourceState,
        dst: ResourceState,
        offset: u64,
        size: u64,
    ) {
        if src == dst && !dst.usage.is_write() {
            return;
        }

        // Ownership only moves when both sides name a concrete family.
        let (src_family, dst_family) = if src.queue_family != dst.queue_family
            && src.queue_family != vk::QUEUE_FAMILY_IGNORED
            && dst.queue_family != vk::QUEUE_FAMILY_IGNORED
        {
            (src.queue_family, dst.queue_family)
        } else {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        };

        let src_scope = src.res_state();
        let dst_scope = dst.res_state();
        let barrier = vk::BufferMemoryBarrier2 {
            src_stage_mask: src_scope.stages.into(),
            src_access_mask: src_scope.access.into(),
            dst_stage_mask: dst_scope.stages.into(),
            dst_access_mask: dst_scope.access.into(),
            src_queue_family_index: src_family,
            dst_queue_family_index: dst_family,
            buffer,
            offset,
            size,
            ..Default::default()
        };
        self.buffers.push(barrier);
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer_barriers(&self) -> &[vk::BufferMemoryBarrier2] {
        &self.buffers
    }

    /// Records the collected barriers and clears the batch.
    ///
    /// # Safety
    /// `cmd` must be a command buffer in the recording state on `device`, and
    /// every buffer referenced by the batch must still be alive.
    pub unsafe fn emit(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.buffers.is_empty() {
            return;
        }
        let deps = vk::DependencyInfo::builder()
            .buffer_memory_barriers(&self.buffers)
            .build();
        device.cmd_pipeline_barrier2(cmd, &deps);
        self.buffers.clear();
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::state::ResourceUse;
    use ash::vk::Handle;

    #[test]
    fn identical_read_states_need_no_barrier() {
        let mut builder = BarrierBuilder::new();
        let state = ResourceState::new(ResourceUse::ShaderRead);
        builder.buffer(vk::Buffer::from_raw(1), state, state);
        assert!(builder.is_empty());
    }

    #[test]
    fn write_after_write_is_kept() {
        let mut builder = BarrierBuilder::new();
        let state = ResourceState::new(ResourceUse::ShaderWrite);
        builder.buffer(vk::Buffer::from_raw(1), state, state);
        assert_eq!(builder.buffer_barriers().len(), 1);
    }

    #[test]
    fn queue_transfer_sets_both_families() {
        let mut builder = BarrierBuilder::new();
        builder.buffer(
            vk::Buffer::from_raw(7),
            ResourceState::on_queue(ResourceUse::CopyDst, 2),
            ResourceState::on_queue(ResourceUse::ShaderRead, 0),
        );
        let barrier = builder.buffer_barriers()[0];
        assert_eq!(barrier.src_queue_family_index, 2);
        assert_eq!(barrier.dst_queue_family_index, 0);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::SHADER_READ);
        assert_eq!(barrier.size, vk::WHOLE_SIZE);
    }
}
