/// Geometry - Uploaded vertex/index buffers
///
/// Buffers live in device-local memory and are filled through a staging
/// upload at creation time. The vertex layout travels with the geometry so
/// binding it can feed the pipeline key.

use prism_engine::prism::Result;
use prism_engine::prism::render::{Geometry as RendererGeometry, IndexType, VertexLayout};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_memory::{BufferBlock, MemoryAllocator};

/// Vulkan geometry implementation
pub struct Geometry {
    ctx: Arc<GpuContext>,
    pub(crate) vertex_buffer: BufferBlock,
    pub(crate) index_buffer: Option<BufferBlock>,
    pub(crate) index_type: vk::IndexType,
    pub(crate) layout: VertexLayout,
    /// Interned layout id, part of pipeline identity
    pub(crate) layout_id: u16,
    vertex_count: u32,
    index_count: u32,
}

impl Geometry {
    /// Upload vertex (and optionally index) data into device-local buffers
    pub fn new(
        ctx: Arc<GpuContext>,
        memory: &MemoryAllocator,
        layout: VertexLayout,
        layout_id: u16,
        vertex_data: &[u8],
        vertex_count: u32,
        index_data: Option<(&[u8], IndexType)>,
    ) -> Result<Self> {
        let vertex_buffer = memory.create_buffer(
            vertex_data.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            gpu_allocator::MemoryLocation::GpuOnly,
            "geometry_vertices",
        )?;
        memory.upload_to_buffer(vertex_buffer.buffer, 0, vertex_data)?;

        let mut index_buffer = None;
        let mut index_count = 0;
        let mut index_type = vk::IndexType::UINT16;

        if let Some((data, ty)) = index_data {
            let buffer = memory.create_buffer(
                data.len() as u64,
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                gpu_allocator::MemoryLocation::GpuOnly,
                "geometry_indices",
            )?;
            memory.upload_to_buffer(buffer.buffer, 0, data)?;

            index_count = data.len() as u32 / ty.size_bytes();
            index_type = match ty {
                IndexType::U16 => vk::IndexType::UINT16,
                IndexType::U32 => vk::IndexType::UINT32,
            };
            index_buffer = Some(buffer);
        }

        Ok(Self {
            ctx,
            vertex_buffer,
            index_buffer,
            index_type,
            layout,
            layout_id,
            vertex_count,
            index_count,
        })
    }
}

impl RendererGeometry for Geometry {
    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl Drop for Geometry {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.vertex_buffer.allocation.take() {
                // Don't panic if lock fails - we still need to destroy the buffer
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_buffer(self.vertex_buffer.buffer, None);

            if let Some(mut index_buffer) = self.index_buffer.take() {
                if let Some(allocation) = index_buffer.allocation.take() {
                    if let Ok(mut allocator) = self.ctx.allocator.lock() {
                        allocator.free(allocation).ok();
                    }
                }
                self.ctx.device.destroy_buffer(index_buffer.buffer, None);
            }
        }
    }
}
