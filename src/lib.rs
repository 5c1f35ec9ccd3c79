pub mod gpu;
pub mod sync;
pub mod utils;

pub use gpu::*;
pub use sync::{ResourceState, ResourceUse};
