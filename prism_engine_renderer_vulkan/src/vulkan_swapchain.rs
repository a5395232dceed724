/// SwapchainManager - Presentation surface lifecycle
///
/// Owns the swapchain and everything keyed by its images: views,
/// framebuffers, per-image command buffers plus one spare for frame capture,
/// and the semaphores used to order acquire/submit/present. Window resizes
/// and out-of-date signals are handled by rebuilding in place, chaining the
/// old swapchain through `old_swapchain` so in-flight presents stay valid.

use prism_engine::prism::{Result, Error};
use prism_engine::{engine_error, engine_err, engine_info};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_render_pass_cache::{AttachmentDesc, RenderPassCache, RenderPassDesc};

/// Result of trying to acquire the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready for rendering
    Ready {
        image_index: u32,
        /// The surface no longer matches the swapchain exactly; present will
        /// still work but the caller should recreate afterwards
        suboptimal: bool,
    },
    /// The swapchain must be recreated before any image can be acquired
    OutOfDate,
    /// No image became available within the timeout; skip this frame
    Timeout,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented or rejected with a stale surface; recreate before the next frame
    NeedsRecreate,
}

/// Rebuild bookkeeping shared by resize, suboptimal and out-of-date signals.
///
/// A request survives a failed rebuild, so the next frame retries instead of
/// rendering against whatever per-image objects the failure left behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildTracker {
    pending: bool,
}

impl RebuildTracker {
    pub fn request(&mut self) {
        self.pending = true;
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    /// Note a rebuild attempt's outcome; only success clears the request
    pub fn note_rebuild(&mut self, succeeded: bool) {
        if succeeded {
            self.pending = false;
        }
    }
}

/// Map a vkAcquireNextImageKHR result onto the frame-pacing outcome
fn classify_acquire(
    result: std::result::Result<(u32, bool), vk::Result>,
) -> Result<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready { image_index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(AcquireOutcome::Timeout),
        Err(e) => Err(engine_err!("prism::vulkan", "Failed to acquire swapchain image: {:?}", e)),
    }
}

/// Map a vkQueuePresentKHR result onto the present outcome
fn classify_present(result: std::result::Result<bool, vk::Result>) -> Result<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            Ok(PresentOutcome::NeedsRecreate)
        }
        Err(e) => Err(engine_err!("prism::vulkan", "Failed to present swapchain image: {:?}", e)),
    }
}

/// Prefer an 8-bit sRGB format; anything the surface reports works as a
/// fallback. Callers guarantee `formats` is non-empty.
fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    *formats
        .iter()
        .find(|f| {
            (f.format == vk::Format::B8G8R8A8_SRGB || f.format == vk::Format::R8G8B8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(&formats[0])
}

/// The surface-fixed extent when the platform dictates one, otherwise the
/// window size clamped to the surface limits
fn select_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One image above the minimum for pacing slack, clamped when the surface
/// caps the count (0 means uncapped)
fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Swapchain plus all per-image objects
pub struct SwapchainManager {
    ctx: Arc<GpuContext>,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,

    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,

    /// Interned pass all framebuffers are compatible with
    render_pass: vk::RenderPass,
    render_pass_id: u16,
    color_attachment_count: u32,

    /// One primary command buffer per swapchain image, plus one spare used
    /// for frame-buffer capture
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    capture_command_buffer: vk::CommandBuffer,

    /// One acquire semaphore per frame lane
    image_available_semaphores: Vec<vk::Semaphore>,
    /// One present semaphore per swapchain image
    render_finished_semaphores: Vec<vk::Semaphore>,
}

impl SwapchainManager {
    pub fn new(
        ctx: Arc<GpuContext>,
        physical_device: vk::PhysicalDevice,
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        render_passes: &mut RenderPassCache,
        frame_lanes: usize,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        unsafe {
            let format = Self::choose_surface_format(&surface_loader, physical_device, surface)?;

            let pass_desc = RenderPassDesc {
                color: vec![AttachmentDesc::present_color(format.format)],
                depth_stencil: None,
            };
            let color_attachment_count = pass_desc.color.len() as u32;
            let interned = render_passes.intern(&ctx.device, &pass_desc)?;

            let swapchain_loader = ash::khr::swapchain::Device::new(instance, &ctx.device);

            let command_pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = ctx.device.create_command_pool(&command_pool_info, None)
                .map_err(|e| {
                    engine_error!("prism::vulkan", "Failed to create swapchain command pool: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create command pool: {:?}", e))
                })?;

            let semaphore_create_info = vk::SemaphoreCreateInfo::default();
            let mut image_available_semaphores = Vec::with_capacity(frame_lanes);
            for _ in 0..frame_lanes {
                image_available_semaphores.push(
                    ctx.device.create_semaphore(&semaphore_create_info, None)
                        .map_err(|e| {
                            engine_error!("prism::vulkan", "Failed to create image-available semaphore: {:?}", e);
                            Error::InitializationFailed(format!("Failed to create semaphore: {:?}", e))
                        })?
                );
            }

            let mut manager = Self {
                ctx,
                surface,
                surface_loader,
                physical_device,
                swapchain: vk::SwapchainKHR::null(),
                swapchain_loader,
                images: Vec::new(),
                image_views: Vec::new(),
                framebuffers: Vec::new(),
                format,
                extent: vk::Extent2D { width, height },
                render_pass: interned.pass,
                render_pass_id: interned.id,
                color_attachment_count,
                command_pool,
                command_buffers: Vec::new(),
                capture_command_buffer: vk::CommandBuffer::null(),
                image_available_semaphores,
                render_finished_semaphores: Vec::new(),
            };

            manager.build(width, height)?;
            Ok(manager)
        }
    }

    fn choose_surface_format(
        surface_loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceFormatKHR> {
        unsafe {
            let formats = surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(|e| {
                    engine_error!("prism::vulkan", "Failed to query surface formats: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get surface formats: {:?}", e))
                })?;

            let present_modes = surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(|e| {
                    engine_error!("prism::vulkan", "Failed to query present modes: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get present modes: {:?}", e))
                })?;

            if formats.is_empty() || present_modes.is_empty() {
                engine_error!("prism::vulkan", "Surface reports {} formats and {} present modes",
                    formats.len(), present_modes.len());
                return Err(Error::InitializationFailed(
                    "no compatible surface configuration".to_string(),
                ));
            }

            Ok(pick_surface_format(&formats))
        }
    }

    /// (Re)build the swapchain and all per-image objects.
    ///
    /// Chains through `old_swapchain` so presentation engines can finish
    /// outstanding presents against the previous chain.
    fn build(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            let surface_capabilities = self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| {
                    engine_error!("prism::vulkan", "Failed to get surface capabilities: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get surface capabilities: {:?}", e))
                })?;

            let extent = select_extent(&surface_capabilities, width, height);
            let image_count = select_image_count(&surface_capabilities);

            let old_swapchain = self.swapchain;
            let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(self.surface)
                .min_image_count(image_count)
                .image_format(self.format.format)
                .image_color_space(self.format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(surface_capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(vk::PresentModeKHR::FIFO)
                .clipped(true)
                .old_swapchain(old_swapchain);

            let swapchain = self.swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| {
                    engine_error!("prism::vulkan", "Failed to create swapchain: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
                })?;

            if old_swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(old_swapchain, None);
            }
            self.swapchain = swapchain;
            self.extent = extent;

            self.images = self.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|e| {
                    engine_error!("prism::vulkan", "Failed to get swapchain images: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get swapchain images: {:?}", e))
                })?;

            for &image in &self.images {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.format.format)
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

                let image_view = self.ctx.device.create_image_view(&create_info, None)
                    .map_err(|e| {
                        engine_error!("prism::vulkan", "Failed to create swapchain image view: {:?}", e);
                        Error::InitializationFailed(format!("Failed to create image view: {:?}", e))
                    })?;
                self.image_views.push(image_view);
            }

            for &view in &self.image_views {
                let attachments = [view];
                let framebuffer_info = vk::FramebufferCreateInfo::default()
                    .render_pass(self.render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                let framebuffer = self.ctx.device.create_framebuffer(&framebuffer_info, None)
                    .map_err(|e| {
                        engine_error!("prism::vulkan", "Failed to create framebuffer: {:?}", e);
                        Error::InitializationFailed(format!("Failed to create framebuffer: {:?}", e))
                    })?;
                self.framebuffers.push(framebuffer);
            }

            // One command buffer per image, plus the capture spare
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(self.images.len() as u32 + 1);
            let mut buffers = self.ctx.device.allocate_command_buffers(&allocate_info)
                .map_err(|e| {
                    engine_error!("prism::vulkan", "Failed to allocate swapchain command buffers: {:?}", e);
                    Error::InitializationFailed(format!("Failed to allocate command buffers: {:?}", e))
                })?;
            self.capture_command_buffer = buffers.pop().unwrap_or(vk::CommandBuffer::null());
            self.command_buffers = buffers;

            let semaphore_create_info = vk::SemaphoreCreateInfo::default();
            for _ in 0..self.images.len() {
                self.render_finished_semaphores.push(
                    self.ctx.device.create_semaphore(&semaphore_create_info, None)
                        .map_err(|e| {
                            engine_error!("prism::vulkan", "Failed to create render-finished semaphore: {:?}", e);
                            Error::InitializationFailed(format!("Failed to create semaphore: {:?}", e))
                        })?
                );
            }

            engine_info!("prism::vulkan", "Swapchain built: {}x{}, {} images, format {:?}",
                extent.width, extent.height, self.images.len(), self.format.format);

            Ok(())
        }
    }

    /// Destroy everything keyed by the current swapchain images
    fn destroy_image_objects(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.ctx.device.destroy_framebuffer(framebuffer, None);
            }
            self.framebuffers.clear();

            for &image_view in &self.image_views {
                self.ctx.device.destroy_image_view(image_view, None);
            }
            self.image_views.clear();

            for &semaphore in &self.render_finished_semaphores {
                self.ctx.device.destroy_semaphore(semaphore, None);
            }
            self.render_finished_semaphores.clear();

            if !self.command_buffers.is_empty() {
                let mut buffers = std::mem::take(&mut self.command_buffers);
                buffers.push(self.capture_command_buffer);
                self.ctx.device.free_command_buffers(self.command_pool, &buffers);
                self.capture_command_buffer = vk::CommandBuffer::null();
            }

            self.images.clear();
        }
    }

    /// Rebuild after a resize or an out-of-date signal
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.ctx.device.device_wait_idle()
                .map_err(|e| engine_err!("prism::vulkan", "Failed to wait idle before swapchain recreate: {:?}", e))?;
        }
        self.destroy_image_objects();
        if let Err(e) = self.build(width, height) {
            // A failed rebuild must not leave half-created per-image objects
            // behind: the caller keeps its rebuild request and retries
            self.destroy_image_objects();
            return Err(e);
        }
        Ok(())
    }

    /// Acquire the next image, waiting at most `timeout_ns`
    pub fn acquire(&mut self, lane: usize, timeout_ns: u64) -> Result<AcquireOutcome> {
        unsafe {
            classify_acquire(self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                self.image_available_semaphores[lane],
                vk::Fence::null(),
            ))
        }
    }

    /// Present a rendered image, waiting on its render-finished semaphore
    pub fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        unsafe {
            let swapchains = [self.swapchain];
            let image_indices = [image_index];
            let wait_semaphores = [self.render_finished_semaphores[image_index as usize]];

            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            classify_present(self.swapchain_loader.queue_present(self.ctx.graphics_queue, &present_info))
        }
    }

    /// (wait_semaphore, signal_semaphore) for submitting the frame that
    /// renders into `image_index` on `lane`
    pub fn sync_info(&self, lane: usize, image_index: u32) -> (vk::Semaphore, vk::Semaphore) {
        (
            self.image_available_semaphores[lane],
            self.render_finished_semaphores[image_index as usize],
        )
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn render_pass_id(&self) -> u16 {
        self.render_pass_id
    }

    /// Color attachments of the interned pass, for pipeline blend state
    pub fn color_attachment_count(&self) -> u32 {
        self.color_attachment_count
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub fn command_buffer(&self, image_index: u32) -> vk::CommandBuffer {
        self.command_buffers[image_index as usize]
    }

    pub fn capture_command_buffer(&self) -> vk::CommandBuffer {
        self.capture_command_buffer
    }

    pub fn image(&self, image_index: u32) -> vk::Image {
        self.images[image_index as usize]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();

            self.destroy_image_objects();

            for &semaphore in &self.image_available_semaphores {
                self.ctx.device.destroy_semaphore(semaphore, None);
            }

            self.ctx.device.destroy_command_pool(self.command_pool, None);
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
#[path = "vulkan_swapchain_tests.rs"]
mod tests;
