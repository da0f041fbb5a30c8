//! GPU buffer management.
//!
//! Buffers are backed by gpu-allocator. Three placements are used:
//!
//! - [`BufferPlacement::Static`]: device-local vertex and index data, filled
//!   once through a staging copy
//! - [`BufferPlacement::Uniform`]: host-visible, persistently mapped
//!   per-slot uniform data
//! - [`BufferPlacement::Staging`]: host-visible transfer source
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameloop_rhi::backend::BufferUsage;
//! use frameloop_rhi::buffer::{Buffer, BufferPlacement};
//! use frameloop_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> frameloop_rhi::RhiResult<()> {
//! let uniform = Buffer::new(device, BufferPlacement::Uniform, 80)?;
//! uniform.write_data(0, &[0u8; 80])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::backend::BufferUsage;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferPlacement {
    Static(BufferUsage),
    Uniform,
    Staging,
}

impl BufferPlacement {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferPlacement::Static(BufferUsage::Vertex) => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferPlacement::Static(BufferUsage::Index) => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferPlacement::Static(BufferUsage::Uniform) | BufferPlacement::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER
            }
            BufferPlacement::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferPlacement::Static(_) => MemoryLocation::GpuOnly,
            BufferPlacement::Uniform | BufferPlacement::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferPlacement::Static(usage) => usage.name(),
            BufferPlacement::Uniform => "uniform",
            BufferPlacement::Staging => "staging",
        }
    }
}

/// VkBuffer with gpu-allocator managed memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    placement: BufferPlacement,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidOperation`] for a zero size, or an allocator
    /// or Vulkan error.
    pub fn new(
        device: Arc<Device>,
        placement: BufferPlacement,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidOperation(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(placement.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: placement.name(),
                    requirements,
                    location: placement.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let this = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            placement,
        };

        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device.handle().bind_buffer_memory(
                    this.buffer,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        debug!("Created {} buffer: {} bytes", placement.name(), size);
        Ok(this)
    }

    /// Creates a host-visible buffer and fills it with `data`.
    pub fn new_with_data(
        device: Arc<Device>,
        placement: BufferPlacement,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, placement, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into mapped memory at `offset`.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidOperation(format!(
                "write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidOperation("buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped_ptr.as_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
        }

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn placement(&self) -> BufferPlacement {
        self.placement
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking buffer allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.placement.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_to_vk_usage() {
        assert!(
            BufferPlacement::Static(BufferUsage::Vertex)
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferPlacement::Static(BufferUsage::Index)
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferPlacement::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferPlacement::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
    }

    #[test]
    fn test_placement_memory_location() {
        assert_eq!(
            BufferPlacement::Static(BufferUsage::Vertex).memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferPlacement::Uniform.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferPlacement::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_placement_name() {
        assert_eq!(BufferPlacement::Static(BufferUsage::Index).name(), "index");
        assert_eq!(BufferPlacement::Uniform.name(), "uniform");
        assert_eq!(BufferPlacement::Staging.name(), "staging");
    }
}
