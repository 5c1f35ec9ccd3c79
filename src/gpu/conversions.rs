use ash::vk;

use crate::{BindTableVariableType, ShaderType};

impl From<BindTableVariableType> for vk::DescriptorType {
    fn from(value: BindTableVariableType) -> Self {
        match value {
            BindTableVariableType::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            BindTableVariableType::DynamicUniform => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            BindTableVariableType::Storage => vk::DescriptorType::STORAGE_BUFFER,
            BindTableVariableType::DynamicStorage => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            BindTableVariableType::UniformTexel => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            BindTableVariableType::StorageTexel => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            BindTableVariableType::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindTableVariableType::Image => vk::DescriptorType::SAMPLED_IMAGE,
            BindTableVariableType::Sampler => vk::DescriptorType::SAMPLER,
            BindTableVariableType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

impl From<ShaderType> for vk::ShaderStageFlags {
    fn from(value: ShaderType) -> Self {
        match value {
            ShaderType::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderType::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderType::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderType::All => vk::ShaderStageFlags::ALL,
        }
    }
}

/// Bytes per texel for the formats a texel buffer view may use.
pub fn texel_size(format: vk::Format) -> Option<u64> {
    let size = match format {
        vk::Format::R8_UINT | vk::Format::R8_SINT | vk::Format::R8_UNORM => 1,
        vk::Format::R16_UINT | vk::Format::R16_SINT | vk::Format::R16_SFLOAT => 2,
        vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R32_SFLOAT => 4,
        vk::Format::R32G32_UINT | vk::Format::R32G32_SINT | vk::Format::R32G32_SFLOAT => 8,
        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

/// Picks the first memory type allowed by `type_bits` carrying `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&idx| {
        type_bits & (1 << idx) != 0
            && props.memory_types[idx as usize]
                .property_flags
                .contains(required)
    })
}
