//! GPU abstraction layer (Render Hardware Interface).
//!
//! [`backend::GpuBackend`] is the contract the frame loop and renderer are
//! written against. This crate provides two implementations:
//!
//! - [`vulkan::VulkanBackend`], built from the safe `ash` wrappers in this
//!   crate (instance, device, swapchain, command buffers, buffers, pipelines,
//!   descriptor sets, synchronization)
//! - [`headless::HeadlessBackend`], a CPU simulation that records every call
//!   and checks synchronization hazards, used by tests and `--headless` runs

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod depth;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;
pub mod vulkan;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
