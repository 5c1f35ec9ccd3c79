use ash::vk;
use bitflags::bitflags;

#[cfg(feature = "bindery-serde")]
use serde::{Deserialize, Serialize};

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u64 {
        const NONE = 0;
        const INDIRECT_COMMAND_READ = vk::AccessFlags2::INDIRECT_COMMAND_READ.as_raw();
        const INDEX_READ = vk::AccessFlags2::INDEX_READ.as_raw();
        const VERTEX_ATTRIBUTE_READ = vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw();
        const UNIFORM_READ = vk::AccessFlags2::UNIFORM_READ.as_raw();
        const SHADER_READ = vk::AccessFlags2::SHADER_READ.as_raw();
        const SHADER_WRITE = vk::AccessFlags2::SHADER_WRITE.as_raw();
        const TRANSFER_READ = vk::AccessFlags2::TRANSFER_READ.as_raw();
        const TRANSFER_WRITE = vk::AccessFlags2::TRANSFER_WRITE.as_raw();
        const HOST_READ = vk::AccessFlags2::HOST_READ.as_raw();
        const HOST_WRITE = vk::AccessFlags2::HOST_WRITE.as_raw();
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Stage: u64 {
        const NONE = 0;
        const TOP_OF_PIPE = vk::PipelineStageFlags2::TOP_OF_PIPE.as_raw();
        const DRAW_INDIRECT = vk::PipelineStageFlags2::DRAW_INDIRECT.as_raw();
        const VERTEX_INPUT = vk::PipelineStageFlags2::VERTEX_INPUT.as_raw();
        const VERTEX_SHADER = vk::PipelineStageFlags2::VERTEX_SHADER.as_raw();
        const FRAGMENT_SHADER = vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw();
        const COMPUTE_SHADER = vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw();
        const TRANSFER = vk::PipelineStageFlags2::TRANSFER.as_raw();
        const HOST = vk::PipelineStageFlags2::HOST.as_raw();
        const BOTTOM_OF_PIPE = vk::PipelineStageFlags2::BOTTOM_OF_PIPE.as_raw();
    }
}

impl From<Access> for vk::AccessFlags2 {
    fn from(acc: Access) -> Self {
        vk::AccessFlags2::from_raw(acc.bits())
    }
}

impl From<Stage> for vk::PipelineStageFlags2 {
    fn from(stage: Stage) -> Self {
        vk::PipelineStageFlags2::from_raw(stage.bits())
    }
}

/// Synchronization scope of a resource usage, in barrier terms.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResState {
    pub access: Access,
    pub stages: Stage,
}

/// How a buffer is currently being used by the GPU or the host.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "bindery-serde", derive(Serialize, Deserialize))]
pub enum ResourceUse {
    #[default]
    Undefined,
    CopySrc,
    CopyDst,
    ShaderRead,
    ShaderWrite,
    UniformRead,
    VertexRead,
    IndexRead,
    IndirectRead,
    HostRead,
    HostWrite,
}

impl ResourceUse {
    pub fn res_state(self) -> ResState {
        let shader_stages = Stage::VERTEX_SHADER | Stage::FRAGMENT_SHADER | Stage::COMPUTE_SHADER;
        let (access, stages) = match self {
            ResourceUse::Undefined => (Access::NONE, Stage::TOP_OF_PIPE),
            ResourceUse::CopySrc => (Access::TRANSFER_READ, Stage::TRANSFER),
            ResourceUse::CopyDst => (Access::TRANSFER_WRITE, Stage::TRANSFER),
            ResourceUse::ShaderRead => (Access::SHADER_READ, shader_stages),
            ResourceUse::ShaderWrite => (Access::SHADER_WRITE, shader_stages),
            ResourceUse::UniformRead => (Access::UNIFORM_READ, shader_stages),
            ResourceUse::VertexRead => (Access::VERTEX_ATTRIBUTE_READ, Stage::VERTEX_INPUT),
            ResourceUse::IndexRead => (Access::INDEX_READ, Stage::VERTEX_INPUT),
            ResourceUse::IndirectRead => (Access::INDIRECT_COMMAND_READ, Stage::DRAW_INDIRECT),
            ResourceUse::HostRead => (Access::HOST_READ, Stage::HOST),
            ResourceUse::HostWrite => (Access::HOST_WRITE, Stage::HOST),
        };
        ResState { access, stages }
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            ResourceUse::CopyDst | ResourceUse::ShaderWrite | ResourceUse::HostWrite
        )
    }
}

/// Current usage of a resource plus the queue family that owns it.
///
/// Transitions are explicit: the only mutator is `DeviceBuffer::transition_state`,
/// which hands back the previous value so the caller can build a barrier.
/// Any state may follow any other; legality is left to the barrier emitter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "bindery-serde", derive(Serialize, Deserialize))]
pub struct ResourceState {
    pub usage: ResourceUse,
    pub queue_family: u32,
}

impl ResourceState {
    pub const UNDEFINED: ResourceState = ResourceState {
        usage: ResourceUse::Undefined,
        queue_family: vk::QUEUE_FAMILY_IGNORED,
    };

    pub fn new(usage: ResourceUse) -> Self {
        Self {
            usage,
            queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    pub fn on_queue(usage: ResourceUse, queue_family: u32) -> Self {
        Self {
            usage,
            queue_family,
        }
    }

    pub fn res_state(&self) -> ResState {
        self.usage.res_state()
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl From<ResourceUse> for ResourceState {
    fn from(usage: ResourceUse) -> Self {
        Self::new(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_undefined_and_unowned() {
        let state = ResourceState::default();
        assert_eq!(state.usage, ResourceUse::Undefined);
        assert_eq!(state.queue_family, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(state.res_state().access, Access::NONE);
    }

    #[test]
    fn usages_map_to_barrier_scopes() {
        let copy = ResourceUse::CopyDst.res_state();
        assert_eq!(copy.access, Access::TRANSFER_WRITE);
        assert_eq!(copy.stages, Stage::TRANSFER);
        assert!(ResourceUse::CopyDst.is_write());
        assert!(!ResourceUse::ShaderRead.is_write());

        let raw: vk::AccessFlags2 = ResourceUse::ShaderRead.res_state().access.into();
        assert_eq!(raw, vk::AccessFlags2::SHADER_READ);
    }
}
