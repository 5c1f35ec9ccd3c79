pub mod barrier_builder;
pub mod state;

pub use barrier_builder::BarrierBuilder;
pub use state::{Access, ResState, ResourceState, ResourceUse, Stage};
