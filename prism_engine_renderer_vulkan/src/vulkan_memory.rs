/// MemoryAllocator - Buffer and image allocation plus host-write flushing
///
/// Thin wrapper over the gpu-allocator crate that owns the recurring
/// patterns of this backend:
/// - create/destroy buffers and images with named allocations
/// - one-shot command buffer submission for uploads
/// - staging-buffer uploads into device-local memory
/// - mapped writes with flush ranges aligned to the non-coherent atom size

use prism_engine::prism::{Result, Error};
use prism_engine::{engine_err, engine_error};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// A buffer together with its backing allocation
pub struct BufferBlock {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl BufferBlock {
    /// Mapped base pointer, or an error for device-local memory
    pub fn mapped_ptr(&self) -> Result<*mut u8> {
        let allocation = self
            .allocation
            .as_ref()
            .ok_or_else(|| Error::BackendError("Buffer has no allocation".to_string()))?;
        Ok(allocation
            .mapped_ptr()
            .ok_or_else(|| Error::BackendError("Buffer is not CPU-accessible".to_string()))?
            .as_ptr() as *mut u8)
    }
}

/// An image together with its backing allocation
pub struct ImageBlock {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
}

/// Align a host-write flush range to the non-coherent atom size.
///
/// The start is rounded down and the end rounded up, clamped to the
/// allocation size as required by vkFlushMappedMemoryRanges.
pub fn align_flush_range(offset: u64, size: u64, atom: u64, allocation_size: u64) -> (u64, u64) {
    let start = (offset / atom) * atom;
    let end = offset + size;
    let end = end.div_ceil(atom) * atom;
    let end = end.min(allocation_size);
    (start, end - start)
}

/// Buffer/image allocator shared by all backend subsystems
pub struct MemoryAllocator {
    ctx: Arc<GpuContext>,
}

impl MemoryAllocator {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Create a buffer with bound memory
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<BufferBlock> {
        unsafe {
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self.ctx.device.create_buffer(&buffer_create_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create buffer '{}': {:?}", name, e))?;

            let requirements = self.ctx.device.get_buffer_memory_requirements(buffer);

            let allocation = self.ctx.allocator.lock().unwrap().allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                engine_error!("prism::vulkan", "Out of GPU memory for buffer '{}' ({:.2} MB)", name, size_mb);
                self.ctx.device.destroy_buffer(buffer, None);
                Error::OutOfMemory
            })?;

            self.ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| engine_err!("prism::vulkan", "Failed to bind buffer memory '{}': {:?}", name, e))?;

            Ok(BufferBlock {
                buffer,
                allocation: Some(allocation),
                size,
            })
        }
    }

    /// Destroy a buffer and free its memory
    pub fn destroy_buffer(&self, block: &mut BufferBlock) {
        unsafe {
            if let Some(allocation) = block.allocation.take() {
                // Don't panic if lock fails - we still need to destroy the buffer
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_buffer(block.buffer, None);
            block.buffer = vk::Buffer::null();
        }
    }

    /// Create an image with bound memory
    pub fn create_image(
        &self,
        create_info: &vk::ImageCreateInfo,
        name: &str,
    ) -> Result<ImageBlock> {
        unsafe {
            let image = self.ctx.device.create_image(create_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create image '{}': {:?}", name, e))?;

            let requirements = self.ctx.device.get_image_memory_requirements(image);

            let allocation = self.ctx.allocator.lock().unwrap().allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                engine_error!("prism::vulkan", "Out of GPU memory for image '{}' ({:.2} MB)", name, size_mb);
                self.ctx.device.destroy_image(image, None);
                Error::OutOfMemory
            })?;

            self.ctx.device.bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| engine_err!("prism::vulkan", "Failed to bind image memory '{}': {:?}", name, e))?;

            Ok(ImageBlock {
                image,
                allocation: Some(allocation),
            })
        }
    }

    /// Destroy an image and free its memory
    pub fn destroy_image(&self, block: &mut ImageBlock) {
        unsafe {
            if let Some(allocation) = block.allocation.take() {
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_image(block.image, None);
            block.image = vk::Image::null();
        }
    }

    /// Copy bytes into a mapped buffer at the given offset
    pub fn write_mapped(&self, block: &BufferBlock, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > block.size {
            engine_error!("prism::vulkan", "Mapped write out of bounds: offset {} + {} bytes > buffer size {}",
                offset, data.len(), block.size);
            return Err(Error::InvalidResource("mapped write out of bounds".to_string()));
        }
        unsafe {
            let mapped_ptr = block.mapped_ptr()?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped_ptr.offset(offset as isize), data.len());
        }
        Ok(())
    }

    /// Build a flush range for a mapped write, aligned to the non-coherent atom size
    pub fn flush_range(&self, block: &BufferBlock, offset: u64, size: u64) -> Result<vk::MappedMemoryRange<'static>> {
        let allocation = block
            .allocation
            .as_ref()
            .ok_or_else(|| Error::BackendError("Buffer has no allocation".to_string()))?;

        let atom = self.ctx.limits.non_coherent_atom_size;
        let (start, len) = align_flush_range(offset, size, atom, allocation.size());

        Ok(vk::MappedMemoryRange::default()
            .memory(unsafe { allocation.memory() })
            .offset(allocation.offset() + start)
            .size(len))
    }

    /// Flush a batch of mapped ranges in one API call
    pub fn flush_mapped_ranges(&self, ranges: &[vk::MappedMemoryRange]) -> Result<()> {
        if ranges.is_empty() {
            return Ok(());
        }
        unsafe {
            self.ctx.device.flush_mapped_memory_ranges(ranges)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to flush mapped memory ranges: {:?}", e))?;
        }
        Ok(())
    }

    /// Record and submit a one-shot command buffer, waiting for completion
    pub fn one_shot_commands<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        unsafe {
            let pool = *self.ctx.upload_command_pool.lock().unwrap();

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffers = self.ctx.device.allocate_command_buffers(&allocate_info)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to allocate upload command buffer: {:?}", e))?;
            let command_buffer = command_buffers[0];

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            self.ctx.device.begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to begin upload command buffer: {:?}", e))?;

            let recorded = record(command_buffer);

            let result = recorded.and_then(|_| {
                self.ctx.device.end_command_buffer(command_buffer)
                    .map_err(|e| engine_err!("prism::vulkan", "Failed to end upload command buffer: {:?}", e))?;

                let fence_create_info = vk::FenceCreateInfo::default();
                let fence = self.ctx.device.create_fence(&fence_create_info, None)
                    .map_err(|e| engine_err!("prism::vulkan", "Failed to create upload fence: {:?}", e))?;

                let buffers = [command_buffer];
                let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);

                let submit_result = self.ctx.device
                    .queue_submit(self.ctx.graphics_queue, &[submit_info], fence)
                    .map_err(|e| engine_err!("prism::vulkan", "Failed to submit upload commands: {:?}", e))
                    .and_then(|_| {
                        self.ctx.device.wait_for_fences(&[fence], true, u64::MAX)
                            .map_err(|e| engine_err!("prism::vulkan", "Failed to wait for upload fence: {:?}", e))
                    });

                self.ctx.device.destroy_fence(fence, None);
                submit_result
            });

            self.ctx.device.free_command_buffers(pool, &command_buffers);
            result
        }
    }

    /// Upload bytes into a device-local buffer through a staging buffer
    pub fn upload_to_buffer(&self, dst: vk::Buffer, dst_offset: u64, data: &[u8]) -> Result<()> {
        let mut staging = self.create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging_buffer",
        )?;

        let result = self.write_mapped(&staging, 0, data).and_then(|_| {
            self.one_shot_commands(|command_buffer| {
                let region = vk::BufferCopy::default()
                    .src_offset(0)
                    .dst_offset(dst_offset)
                    .size(data.len() as u64);
                unsafe {
                    self.ctx.device.cmd_copy_buffer(command_buffer, staging.buffer, dst, &[region]);
                }
                Ok(())
            })
        });

        self.destroy_buffer(&mut staging);
        result
    }
}

#[cfg(test)]
#[path = "vulkan_memory_tests.rs"]
mod tests;
