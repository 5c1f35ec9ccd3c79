use ash::vk;

#[cfg(feature = "bindery-serde")]
use serde::{Deserialize, Serialize};

/// Creation-time description of a buffer, returned by `DeviceBuffer::info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    pub debug_name: String,
    pub byte_size: u64,
    pub usage: vk::BufferUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_families: Vec<u32>,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            byte_size: 0,
            usage: vk::BufferUsageFlags::empty(),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_families: Vec::new(),
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindery-serde", derive(Serialize, Deserialize))]
pub enum BindTableVariableType {
    Uniform,
    DynamicUniform,
    Storage,
    DynamicStorage,
    UniformTexel,
    StorageTexel,
    SampledImage,
    Image,
    Sampler,
    StorageImage,
}

impl BindTableVariableType {
    pub const ALL: [BindTableVariableType; 10] = [
        BindTableVariableType::Uniform,
        BindTableVariableType::DynamicUniform,
        BindTableVariableType::Storage,
        BindTableVariableType::DynamicStorage,
        BindTableVariableType::UniformTexel,
        BindTableVariableType::StorageTexel,
        BindTableVariableType::SampledImage,
        BindTableVariableType::Image,
        BindTableVariableType::Sampler,
        BindTableVariableType::StorageImage,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindery-serde", derive(Serialize, Deserialize))]
pub struct BindTableVariable {
    pub var_type: BindTableVariableType,
    pub binding: u32,
    pub count: u32,
}

impl Default for BindTableVariable {
    fn default() -> Self {
        Self {
            var_type: BindTableVariableType::Uniform,
            binding: 0,
            count: 1,
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindery-serde", derive(Serialize, Deserialize))]
pub enum ShaderType {
    Vertex,
    Fragment,
    Compute,
    All,
}

/// Reflected binding variables of one shader stage.
#[derive(Hash, Clone, Debug)]
pub struct ShaderInfo<'a> {
    pub shader_type: ShaderType,
    pub variables: &'a [BindTableVariable],
}

/// Reflection signature of a pipeline: every stage's variables.
pub type ShaderReflection<'a> = [ShaderInfo<'a>];

#[derive(Hash, Clone, Debug)]
pub struct BindTableLayoutInfo<'a> {
    pub debug_name: &'a str,
    pub shaders: &'a [ShaderInfo<'a>],
}

impl<'a> Default for BindTableLayoutInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            shaders: &[],
        }
    }
}

/// Tagged binary payload attached to an object for external debuggers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugTag {
    pub name: u64,
    pub data: Vec<u8>,
}

/// Configuration of the software backend.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "bindery-serde", derive(Serialize, Deserialize))]
pub struct HeadlessInfo {
    /// Total bytes the backend will hand out across all memory allocations.
    pub memory_budget: u64,
    /// Alignment reported in buffer memory requirements.
    pub buffer_alignment: u64,
    /// Keep debug names on objects; also enabled by `BINDERY_DEBUG_NAMES=1`.
    pub retain_debug_names: bool,
}

impl Default for HeadlessInfo {
    fn default() -> Self {
        Self {
            memory_budget: 256 * 1024 * 1024,
            buffer_alignment: 16,
            retain_debug_names: std::env::var("BINDERY_DEBUG_NAMES")
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }
}
