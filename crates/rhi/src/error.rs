//! RHI error types.

use thiserror::Error;

/// Error type shared by every backend.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device can present to the surface
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// GLSL parsing, validation or SPIR-V generation failed
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain or depth target creation error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// A handle was not created by this backend or was already destroyed
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A call that violates the synchronization rules, such as recording into
    /// a command buffer the GPU still owns
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A failure injected by the headless backend
    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

impl RhiError {
    /// Returns true if the device was lost and every later call will fail.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RhiError::VulkanError(ash::vk::Result::ERROR_DEVICE_LOST))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_detection() {
        assert!(RhiError::from(ash::vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(!RhiError::from(ash::vk::Result::TIMEOUT).is_device_lost());
        assert!(!RhiError::NoSuitableGpu.is_device_lost());
    }

    #[test]
    fn test_error_messages() {
        let err = RhiError::InvalidOperation("reset of pending fence".into());
        assert_eq!(err.to_string(), "Invalid operation: reset of pending fence");
    }
}
