/// Texture - Uploaded sampled image
///
/// Pixel data is staged into an optimal-tiling image and transitioned to
/// SHADER_READ_ONLY at creation. Textures carry the sampler flavor to use
/// when bound to a unit.

use prism_engine::prism::Result;
use prism_engine::prism::render::{Texture as RendererTexture, TextureFormat, TextureInfo};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_memory::MemoryAllocator;
use crate::vulkan_sampler::SamplerType;

/// Map the engine texture format onto Vulkan
pub(crate) fn format_to_vk(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::B8G8R8A8_SRGB => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
    }
}

/// Vulkan texture implementation
pub struct Texture {
    ctx: Arc<GpuContext>,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    allocation: Option<gpu_allocator::vulkan::Allocation>,
    pub(crate) sampler_type: SamplerType,
    info: TextureInfo,
}

impl Texture {
    /// Create a sampled texture, uploading `pixels` when given.
    ///
    /// `pixels` must be tightly packed rows of 4-byte texels.
    pub fn new(
        ctx: Arc<GpuContext>,
        memory: &MemoryAllocator,
        info: TextureInfo,
        pixels: Option<&[u8]>,
        sampler_type: SamplerType,
    ) -> Result<Self> {
        let format = format_to_vk(info.format);

        let image_create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image_block = memory.create_image(&image_create_info, "texture")?;

        if let Some(data) = pixels {
            if let Err(e) = Self::upload_pixels(memory, image_block.image, info, data) {
                memory.destroy_image(&mut image_block);
                return Err(e);
            }
        }

        let view_create_info = vk::ImageViewCreateInfo::default()
            .image(image_block.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            match ctx.device.create_image_view(&view_create_info, None) {
                Ok(view) => view,
                Err(e) => {
                    memory.destroy_image(&mut image_block);
                    return Err(prism_engine::engine_err!("prism::vulkan",
                        "Failed to create texture image view: {:?}", e));
                }
            }
        };

        Ok(Self {
            ctx,
            image: image_block.image,
            view,
            allocation: image_block.allocation.take(),
            sampler_type,
            info,
        })
    }

    /// Stage pixel data into the image and leave it in SHADER_READ_ONLY
    fn upload_pixels(
        memory: &MemoryAllocator,
        image: vk::Image,
        info: TextureInfo,
        data: &[u8],
    ) -> Result<()> {
        let mut staging = memory.create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            gpu_allocator::MemoryLocation::CpuToGpu,
            "texture_staging_buffer",
        )?;

        let result = memory.write_mapped(&staging, 0, data).and_then(|_| {
            memory.one_shot_commands(|command_buffer| {
                let device = &memory.context().device;
                let range = vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                };

                unsafe {
                    let barrier_to_transfer = vk::ImageMemoryBarrier::default()
                        .old_layout(vk::ImageLayout::UNDEFINED)
                        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(image)
                        .subresource_range(range)
                        .src_access_mask(vk::AccessFlags::empty())
                        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

                    device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[], &[], &[barrier_to_transfer],
                    );

                    let region = vk::BufferImageCopy::default()
                        .buffer_offset(0)
                        .buffer_row_length(0)
                        .buffer_image_height(0)
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                        .image_extent(vk::Extent3D {
                            width: info.width,
                            height: info.height,
                            depth: 1,
                        });

                    device.cmd_copy_buffer_to_image(
                        command_buffer,
                        staging.buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );

                    let barrier_to_sampled = vk::ImageMemoryBarrier::default()
                        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(image)
                        .subresource_range(range)
                        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .dst_access_mask(vk::AccessFlags::SHADER_READ);

                    device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::DependencyFlags::empty(),
                        &[], &[], &[barrier_to_sampled],
                    );
                }

                Ok(())
            })
        });

        memory.destroy_buffer(&mut staging);
        result
    }
}

impl RendererTexture for Texture {
    fn info(&self) -> TextureInfo {
        self.info
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_image_view(self.view, None);

            if let Some(allocation) = self.allocation.take() {
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }

            self.ctx.device.destroy_image(self.image, None);
        }
    }
}
