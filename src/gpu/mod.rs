//! Device buffers, their views and bind tables, over a pluggable [`Device`].
//!
//! Two backends ship with the crate: [`vulkan::VulkanDevice`] wraps a live
//! `ash::Device`, and [`headless::HeadlessDevice`] emulates one in host
//! memory for tools and tests.

pub mod bind_table;
pub mod buffer;
pub mod builders;
pub mod conversions;
pub mod device;
pub mod error;
pub mod headless;
pub mod structs;
pub mod vulkan;

pub use bind_table::{BindTableLayout, BindingBudget, BindingSet, BindingTablePool, BoundResource};
pub use buffer::{BufferView, DeviceBuffer};
pub use builders::BufferBuilder;
pub use device::{CopyBuffer, Device, MemoryAllocator, MemoryBlock, TransferContext};
pub use error::{ErrorKind, GPUError, Result};
pub use headless::{CopyRecorder, HeadlessAllocator, HeadlessDevice};
pub use structs::*;
pub use vulkan::{CommandRecorder, VulkanDevice};
