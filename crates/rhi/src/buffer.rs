//! GPU buffer creation.
//!
//! Buffers are created through [`DeviceContext::create_buffer`] and identified
//! by their raw handle afterwards. This module holds the usage classification
//! and the gpu-allocator plumbing the ash device uses to back them with
//! host-visible memory.
//!
//! [`DeviceContext::create_buffer`]: crate::context::DeviceContext::create_buffer

use std::sync::Mutex;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use tracing::debug;

use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which affects
/// Vulkan usage flags and memory allocation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Uniform buffer - stores shader uniform data
    Uniform,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }

    /// Returns the memory location used for this buffer type.
    ///
    /// Buffers are written once from the host at creation, so all usages live
    /// in host-visible, device-readable memory.
    pub fn memory_location(self) -> MemoryLocation {
        MemoryLocation::CpuToGpu
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
        }
    }
}

/// Creates a buffer, backs it with host-visible memory and copies `data` into it.
///
/// On failure nothing is leaked: a created buffer is destroyed and a made
/// allocation is freed before the error is returned.
pub(crate) fn create_buffer_with_data(
    device: &ash::Device,
    allocator: &Mutex<Allocator>,
    usage: BufferUsage,
    data: &[u8],
) -> RhiResult<(vk::Buffer, Allocation)> {
    if data.is_empty() {
        return Err(RhiError::InvalidHandle(format!(
            "{} buffer data must not be empty",
            usage.name()
        )));
    }

    let size = data.len() as vk::DeviceSize;
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage.to_vk_usage())
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = allocator
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

    let mut allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }
    };

    let filled = fill_and_bind(device, buffer, &mut allocation, data);
    if let Err(e) = filled {
        unsafe { device.destroy_buffer(buffer, None) };
        free_allocation(allocator, allocation);
        return Err(e);
    }

    debug!("Created {} buffer ({} bytes)", usage.name(), size);
    Ok((buffer, allocation))
}

fn fill_and_bind(
    device: &ash::Device,
    buffer: vk::Buffer,
    allocation: &mut Allocation,
    data: &[u8],
) -> RhiResult<()> {
    let mapped = allocation
        .mapped_slice_mut()
        .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;
    mapped[..data.len()].copy_from_slice(data);

    unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())? };
    Ok(())
}

/// Returns an allocation to the allocator, logging instead of failing.
pub(crate) fn free_allocation(allocator: &Mutex<Allocator>, allocation: Allocation) {
    let result = allocator
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .free(allocation);
    if let Err(e) = result {
        tracing::error!("Failed to free allocation: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
    }

    #[test]
    fn test_all_usages_are_host_visible() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index, BufferUsage::Uniform] {
            assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu);
        }
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Index.name(), "index");
        assert_eq!(BufferUsage::Uniform.name(), "uniform");
    }
}
