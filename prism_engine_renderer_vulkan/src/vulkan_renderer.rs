/// VulkanRenderer - Vulkan implementation of the SceneRenderer trait
///
/// Owns the whole backend: instance, device, swapchain, frame pacing,
/// descriptor rings, pipeline/render-pass/program caches and the per-frame
/// command recorder. The scene graph drives it exclusively through
/// `SceneRenderer` plus the resource factory methods.

use prism_engine::prism::{Result, Error};
use prism_engine::prism::render::{
    BlendFactor, BlendOp, BuiltinUniform, DrawHookList, Geometry as RendererGeometry,
    HookOperation, HookPhase, IndexType, LogicOp, PolygonMode, PrimitiveType,
    Program as RendererProgram, Rect2D, SampleCount, SceneRenderer, ShaderSource,
    Texture as RendererTexture, TextureInfo, UniformValue, VertexLayout, Viewport,
};
use prism_engine::{engine_err, engine_info, engine_warn};
use ash::vk;
use glam::Vec2;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use crate::debug;
use crate::vulkan_context::{DeviceLimits, GpuContext};
use crate::vulkan_descriptor_allocator::{DescriptorAllocator, DescriptorConfig, TEXTURE_UNIT_COUNT};
use crate::vulkan_frame::FrameController;
use crate::vulkan_geometry::Geometry;
use crate::vulkan_memory::MemoryAllocator;
use crate::vulkan_pipeline_cache::PipelineCache;
use crate::vulkan_program::{Program, ProgramCache, ProgramVariant};
use crate::vulkan_recorder::{CommandRecorder, RecorderPhase};
use crate::vulkan_render_pass_cache::RenderPassCache;
use crate::vulkan_sampler::{SamplerCache, SamplerType};
use crate::vulkan_swapchain::{AcquireOutcome, PresentOutcome, RebuildTracker, SwapchainManager};
use crate::vulkan_texture::Texture;

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Enable the Khronos validation layer and debug messenger
    pub enable_validation: bool,
    /// How many frames may be in flight
    pub frame_lanes: usize,
    /// How long acquire may block before the frame is skipped
    pub acquire_timeout_ns: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "prism".to_string(),
            enable_validation: cfg!(feature = "vulkan-validation"),
            frame_lanes: 2,
            acquire_timeout_ns: 100_000_000,
        }
    }
}

/// Counters exposed for instrumentation and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub frames: u64,
    pub draw_calls: u64,
    pub pipeline_builds: u64,
    pub pipeline_cache_hits: u64,
    pub transform_copies: u64,
    pub user_data_copies: u64,
    pub fence_waits: u64,
}

/// Vulkan renderer implementation
pub struct VulkanRenderer {
    _entry: ash::Entry,
    instance: ash::Instance,
    ctx: Arc<GpuContext>,

    memory: MemoryAllocator,
    render_passes: RenderPassCache,
    swapchain: ManuallyDrop<SwapchainManager>,
    frames: FrameController,
    descriptors: DescriptorAllocator,
    programs: ProgramCache,
    pipelines: PipelineCache,
    samplers: SamplerCache,
    recorder: CommandRecorder,

    /// Layout shared by every pipeline: set 0 transform, set 1 user data,
    /// set 2 textures
    pipeline_layout: vk::PipelineLayout,

    /// 1x1 white texture filling texture units the scene left unbound
    default_texture: Option<Texture>,
    default_view: vk::ImageView,
    default_sampler: vk::Sampler,

    bound_program: Option<(u32, ProgramVariant)>,
    geometry_indexed: bool,
    wireframe_debug: bool,

    /// Hook records invoked around frame and draw operations
    hooks: DrawHookList,

    window_width: u32,
    window_height: u32,
    rebuild: RebuildTracker,
    last_image_index: Option<u32>,

    config: RendererConfig,
    frames_rendered: u64,
    draw_calls: u64,
}

impl VulkanRenderer {
    /// Create the renderer against a window surface
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| Error::InitializationFailed(format!("Failed to load Vulkan: {}", e)))?;

            let app_name = CString::new(config.app_name.as_str())
                .map_err(|e| Error::InitializationFailed(format!("Invalid app name: {}", e)))?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(c"Prism")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_2);

            let mut extension_names = ash_window::enumerate_required_extensions(display)
                .map_err(|e| Error::InitializationFailed(format!("Failed to get required extensions: {:?}", e)))?
                .to_vec();
            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names = if config.enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let mut messenger_info = debug::messenger_create_info();
            let mut create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);
            if config.enable_validation {
                create_info = create_info.push_next(&mut messenger_info);
            }

            let instance = entry.create_instance(&create_info, None)
                .map_err(|e| Error::InitializationFailed(format!("Failed to create instance: {:?}", e)))?;

            let (debug_utils_loader, debug_messenger) = if config.enable_validation {
                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let messenger = loader
                    .create_debug_utils_messenger(&debug::messenger_create_info(), None)
                    .map_err(|e| Error::InitializationFailed(format!("Failed to create debug messenger: {:?}", e)))?;
                (Some(loader), Some(messenger))
            } else {
                (None, None)
            };

            let surface = ash_window::create_surface(&entry, &instance, display, window, None)
                .map_err(|e| Error::InitializationFailed(format!("Failed to create surface: {:?}", e)))?;
            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            let (physical_device, graphics_family) =
                Self::pick_physical_device(&instance, &surface_loader, surface)?;

            let properties = instance.get_physical_device_properties(physical_device);
            let device_name = properties
                .device_name_as_c_str()
                .ok()
                .and_then(|n| n.to_str().ok())
                .unwrap_or("unknown")
                .to_string();

            let supported = instance.get_physical_device_features(physical_device);
            let features = vk::PhysicalDeviceFeatures::default()
                .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
                .wide_lines(supported.wide_lines == vk::TRUE);

            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_family)
                .queue_priorities(&queue_priorities)];
            let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&features);

            let device = instance.create_device(physical_device, &device_create_info, None)
                .map_err(|e| Error::InitializationFailed(format!("Failed to create device: {:?}", e)))?;
            let graphics_queue = device.get_device_queue(graphics_family, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| Error::InitializationFailed(format!("Failed to create allocator: {:?}", e)))?;

            let upload_pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_family)
                .flags(
                    vk::CommandPoolCreateFlags::TRANSIENT
                        | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                );
            let upload_command_pool = device.create_command_pool(&upload_pool_info, None)
                .map_err(|e| Error::InitializationFailed(format!("Failed to create upload command pool: {:?}", e)))?;

            let limits = DeviceLimits::query(&instance, physical_device);

            let ctx = Arc::new(GpuContext::new(
                device,
                Arc::new(Mutex::new(allocator)),
                graphics_queue,
                graphics_family,
                upload_command_pool,
                limits,
                instance.clone(),
                debug_utils_loader,
                debug_messenger,
            ));

            let memory = MemoryAllocator::new(Arc::clone(&ctx));
            let mut render_passes = RenderPassCache::new();

            let swapchain = SwapchainManager::new(
                Arc::clone(&ctx),
                physical_device,
                &instance,
                surface,
                surface_loader,
                &mut render_passes,
                config.frame_lanes,
                width,
                height,
            )?;

            let frames = FrameController::new(Arc::clone(&ctx), config.frame_lanes)?;

            let descriptor_config = DescriptorConfig {
                frame_lanes: config.frame_lanes,
                ..DescriptorConfig::default()
            };
            let descriptors = DescriptorAllocator::new(Arc::clone(&ctx), &memory, &descriptor_config)?;

            let set_layouts = [
                descriptors.transform_layout,
                descriptors.user_data_layout,
                descriptors.texture_layout,
            ];
            let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
            let pipeline_layout = ctx.device.create_pipeline_layout(&layout_info, None)
                .map_err(|e| Error::InitializationFailed(format!("Failed to create pipeline layout: {:?}", e)))?;

            let programs = ProgramCache::new(Arc::clone(&ctx))?;

            let mut pipelines = PipelineCache::new();
            pipelines.working.render_pass = swapchain.render_pass();
            pipelines.working.render_pass_id = swapchain.render_pass_id();
            pipelines.working.color_attachment_count = swapchain.color_attachment_count();

            let mut samplers = SamplerCache::new(Arc::clone(&ctx));

            let default_texture = Texture::new(
                Arc::clone(&ctx),
                &memory,
                TextureInfo {
                    width: 1,
                    height: 1,
                    format: prism_engine::prism::render::TextureFormat::R8G8B8A8_UNORM,
                },
                Some(&[255u8, 255, 255, 255]),
                SamplerType::LinearClamp,
            )?;
            let default_view = default_texture.view;
            let default_sampler = samplers.get(SamplerType::LinearClamp)?;

            engine_info!("prism::vulkan", "Renderer initialized on '{}' ({} frame lanes, validation {})",
                device_name, config.frame_lanes, if config.enable_validation { "on" } else { "off" });

            Ok(Self {
                _entry: entry,
                instance,
                ctx,
                memory,
                render_passes,
                swapchain: ManuallyDrop::new(swapchain),
                frames,
                descriptors,
                programs,
                pipelines,
                samplers,
                recorder: CommandRecorder::new(),
                pipeline_layout,
                default_texture: Some(default_texture),
                default_view,
                default_sampler,
                bound_program: None,
                geometry_indexed: false,
                wireframe_debug: false,
                hooks: DrawHookList::new(),
                window_width: width,
                window_height: height,
                rebuild: RebuildTracker::default(),
                last_image_index: None,
                config,
                frames_rendered: 0,
                draw_calls: 0,
            })
        }
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        unsafe {
            let physical_devices = instance.enumerate_physical_devices()
                .map_err(|e| Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e)))?;

            let mut best: Option<(vk::PhysicalDevice, u32, u32)> = None;
            for device in physical_devices {
                // One family must do both graphics and present
                let families = instance.get_physical_device_queue_family_properties(device);
                let family = families.iter().enumerate().find(|(index, family)| {
                    family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                        && surface_loader
                            .get_physical_device_surface_support(device, *index as u32, surface)
                            .unwrap_or(false)
                });
                let Some((family_index, _)) = family else { continue };

                let properties = instance.get_physical_device_properties(device);
                let score = match properties.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    _ => 0,
                };

                if best.is_none() || score > best.as_ref().map(|b| b.2).unwrap_or(0) {
                    best = Some((device, family_index as u32, score));
                }
            }

            best.map(|(device, family, _)| (device, family))
                .ok_or_else(|| Error::InitializationFailed("No Vulkan-capable GPU with present support found".to_string()))
        }
    }

    /// Upload vertex (and optional index) data as a reusable geometry
    pub fn create_geometry(
        &mut self,
        layout: VertexLayout,
        vertex_data: &[u8],
        vertex_count: u32,
        index_data: Option<(&[u8], IndexType)>,
    ) -> Result<Arc<dyn RendererGeometry>> {
        let layout_id = self.pipelines.intern_vertex_layout(&layout);
        let geometry = Geometry::new(
            Arc::clone(&self.ctx),
            &self.memory,
            layout,
            layout_id,
            vertex_data,
            vertex_count,
            index_data,
        )?;
        Ok(Arc::new(geometry))
    }

    /// Upload a texture, optionally with initial pixel data
    pub fn create_texture(
        &mut self,
        info: TextureInfo,
        pixels: Option<&[u8]>,
        sampler: SamplerType,
    ) -> Result<Arc<dyn RendererTexture>> {
        if let Some(data) = pixels {
            let expected = info.width as usize * info.height as usize * 4;
            if data.len() != expected {
                return Err(Error::InvalidResource(format!(
                    "texture pixel data is {} bytes, expected {} for {}x{}",
                    data.len(), expected, info.width, info.height
                )));
            }
        }
        let texture = Texture::new(Arc::clone(&self.ctx), &self.memory, info, pixels, sampler)?;
        Ok(Arc::new(texture))
    }

    /// Register a program; variants compile lazily on first bind
    pub fn create_program(
        &mut self,
        name: &str,
        vertex_source: ShaderSource,
        fragment_source: ShaderSource,
    ) -> Result<Arc<dyn RendererProgram>> {
        let program = self.programs.create_program(name, vertex_source, fragment_source)?;
        Ok(program)
    }

    /// Render everything as wireframe using each program's debug variant
    pub fn set_wireframe_debug(&mut self, enabled: bool) {
        self.wireframe_debug = enabled;
    }

    /// Note a window resize; the swapchain rebuilds on the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.window_width = width;
            self.window_height = height;
            self.rebuild.request();
        }
    }

    /// The hook records invoked around frame and draw operations
    pub fn hooks_mut(&mut self) -> &mut DrawHookList {
        &mut self.hooks
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.ctx.device.device_wait_idle()
                .map_err(|e| engine_err!("prism::vulkan", "Failed to wait idle: {:?}", e))
        }
    }

    pub fn stats(&self) -> RendererStats {
        let (builds, hits) = self.pipelines.stats();
        let mut transform_copies = 0;
        let mut user_data_copies = 0;
        for lane in 0..self.frames.lane_count() {
            let (transform, user_data) = self.descriptors.copy_counts(lane);
            transform_copies += transform;
            user_data_copies += user_data;
        }
        RendererStats {
            frames: self.frames_rendered,
            draw_calls: self.draw_calls,
            pipeline_builds: builds,
            pipeline_cache_hits: hits,
            transform_copies,
            user_data_copies,
            fence_waits: self.frames.fence_waits(),
        }
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.swapchain.recreate(self.window_width, self.window_height)?;
        self.last_image_index = None;
        Ok(())
    }

    /// Record the capture copy into the spare command buffer and run it to
    /// completion
    #[allow(clippy::too_many_arguments)]
    fn run_capture_copy(
        &self,
        image: vk::Image,
        buffer: vk::Buffer,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let device = &self.ctx.device;
        let command_buffer = self.swapchain.capture_command_buffer();
        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to begin capture command buffer: {:?}", e))?;

            let range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };

            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[], &[], &[to_transfer],
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
                .image_offset(vk::Offset3D { x, y, z: 0 })
                .image_extent(vk::Extent3D { width, height, depth: 1 });
            device.cmd_copy_image_to_buffer(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                &[region],
            );

            let to_present = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ);
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[], &[], &[to_present],
            );

            device.end_command_buffer(command_buffer)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to end capture command buffer: {:?}", e))?;

            let fence = device.create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create capture fence: {:?}", e))?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            let submit = device
                .queue_submit(self.ctx.graphics_queue, &[submit_info], fence)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to submit capture copy: {:?}", e))
                .and_then(|_| {
                    device.wait_for_fences(&[fence], true, u64::MAX)
                        .map_err(|e| engine_err!("prism::vulkan", "Failed to wait for capture copy: {:?}", e))
                });
            device.destroy_fence(fence, None);
            submit
        }
    }
}

impl SceneRenderer for VulkanRenderer {
    fn begin_frame(
        &mut self,
        total_time: f32,
        delta_time: f32,
        scale_x: f32,
        scale_y: f32,
    ) -> Result<()> {
        if self.recorder.phase() != RecorderPhase::Idle {
            return Err(Error::BackendError("begin_frame while a frame is in progress".to_string()));
        }

        self.hooks.invoke(HookPhase::Before, HookOperation::BeginFrame);

        if self.rebuild.pending() {
            let rebuilt = self.recreate_swapchain();
            self.rebuild.note_rebuild(rebuilt.is_ok());
            rebuilt?;
        }

        let lane = self.frames.begin_frame()?;

        let image_index = match self.swapchain.acquire(lane, self.config.acquire_timeout_ns)? {
            AcquireOutcome::Ready { image_index, suboptimal } => {
                if suboptimal {
                    self.rebuild.request();
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                self.frames.abort_frame();
                self.rebuild.request();
                let rebuilt = self.recreate_swapchain();
                self.rebuild.note_rebuild(rebuilt.is_ok());
                rebuilt?;
                return Err(Error::BackendError("swapchain recreated, retry frame".to_string()));
            }
            AcquireOutcome::Timeout => {
                self.frames.abort_frame();
                engine_warn!("prism::vulkan", "Swapchain image acquire timed out, skipping frame");
                return Err(Error::BackendError("swapchain acquire timed out, frame skipped".to_string()));
            }
        };

        self.descriptors.begin_frame(lane)?;
        self.pipelines.reset_working_state();
        self.bound_program = None;
        self.geometry_indexed = false;

        self.recorder.begin(
            &self.ctx.device,
            self.swapchain.command_buffer(image_index),
            self.swapchain.render_pass(),
            self.swapchain.framebuffer(image_index),
            self.swapchain.extent(),
            lane,
            image_index,
        )?;

        self.recorder.bind_uniform(BuiltinUniform::TotalTime, UniformValue::Scalar(total_time));
        self.recorder.bind_uniform(BuiltinUniform::DeltaTime, UniformValue::Scalar(delta_time));
        self.recorder.bind_uniform(
            BuiltinUniform::ContentScale,
            UniformValue::Vector2(Vec2::new(scale_x, scale_y)),
        );

        self.hooks.invoke(HookPhase::After, HookOperation::BeginFrame);

        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.hooks.invoke(HookPhase::Before, HookOperation::EndFrame);

        self.recorder.end(&self.ctx.device, &self.memory)?;

        // End hooks run once the command stream is sealed, before submission
        self.hooks.invoke(HookPhase::After, HookOperation::EndFrame);

        let lane = self.recorder.lane;
        let image_index = self.recorder.image_index;
        let (wait_semaphore, signal_semaphore) = self.swapchain.sync_info(lane, image_index);

        unsafe {
            let wait_semaphores = [wait_semaphore];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let signal_semaphores = [signal_semaphore];
            let command_buffers = [self.recorder.command_buffer];

            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            if let Err(e) = self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                &[submit_info],
                self.frames.fence(lane),
            ) {
                self.recorder.abort();
                self.frames.abort_frame();
                return Err(engine_err!("prism::vulkan", "Failed to submit frame: {:?}", e));
            }
        }

        self.frames.mark_submitted();
        self.recorder.finish_submit();
        self.frames_rendered += 1;
        self.last_image_index = Some(image_index);

        match self.swapchain.present(image_index)? {
            PresentOutcome::Presented => {}
            PresentOutcome::NeedsRecreate => {
                self.rebuild.request();
            }
        }

        Ok(())
    }

    fn bind_geometry(&mut self, geometry: &Arc<dyn RendererGeometry>) -> Result<()> {
        if !self.recorder.check_recording("bind_geometry") {
            return Ok(());
        }

        let geometry = geometry.as_ref() as *const dyn RendererGeometry as *const Geometry;
        let geometry = unsafe { &*geometry };

        let identity = geometry as *const Geometry as usize;
        if !self.recorder.note_geometry_bind(identity) {
            return Ok(());
        }

        self.pipelines.working.vertex_layout = geometry.layout.clone();
        self.pipelines.working.layout_id = geometry.layout_id;
        self.geometry_indexed = geometry.index_buffer.is_some();

        unsafe {
            let command_buffer = self.recorder.command_buffer;
            self.ctx.device.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                &[geometry.vertex_buffer.buffer],
                &[0],
            );
            if let Some(index_buffer) = &geometry.index_buffer {
                self.ctx.device.cmd_bind_index_buffer(
                    command_buffer,
                    index_buffer.buffer,
                    0,
                    geometry.index_type,
                );
            }
        }
        Ok(())
    }

    fn bind_program(&mut self, program: &Arc<dyn RendererProgram>, mask_count: u32) -> Result<()> {
        if !self.recorder.check_recording("bind_program") {
            return Ok(());
        }

        let program = program.as_ref() as *const dyn RendererProgram as *const Program;
        let program = unsafe { &*program };

        let mask_count = u8::try_from(mask_count)
            .map_err(|_| Error::InvalidResource(format!("mask count {} out of range", mask_count)))?;

        let variant = if self.wireframe_debug {
            ProgramVariant::Wireframe
        } else {
            ProgramVariant::Masks(mask_count)
        };

        let version = self.programs.version(program.id, variant)?;
        self.pipelines.working.vertex_module = version.vertex_module;
        self.pipelines.working.fragment_module = version.fragment_module;
        self.pipelines.working.program_version_id = version.version_id;
        self.pipelines.working.polygon_mode = if self.wireframe_debug {
            PolygonMode::Line
        } else {
            PolygonMode::Fill
        };

        self.bound_program = Some((program.id, variant));
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: &Arc<dyn RendererTexture>) -> Result<()> {
        if !self.recorder.check_recording("bind_texture") {
            return Ok(());
        }
        if unit >= TEXTURE_UNIT_COUNT {
            return Err(Error::InvalidResource(format!(
                "texture unit {} out of range (0..{})",
                unit, TEXTURE_UNIT_COUNT
            )));
        }

        let texture = texture.as_ref() as *const dyn RendererTexture as *const Texture;
        let texture = unsafe { &*texture };

        let sampler = self.samplers.get(texture.sampler_type)?;
        self.recorder.bind_texture_unit(unit, texture.view, sampler);

        // Unit 0 drives the texel-size built-in
        if unit == 0 {
            let info = RendererTexture::info(texture);
            self.recorder.bind_uniform(
                BuiltinUniform::TexelSize,
                UniformValue::Vector2(Vec2::new(
                    1.0 / info.width.max(1) as f32,
                    1.0 / info.height.max(1) as f32,
                )),
            );
        }
        Ok(())
    }

    fn bind_uniform(&mut self, slot: BuiltinUniform, value: UniformValue) {
        self.recorder.bind_uniform(slot, value);
    }

    fn set_blend_enabled(&mut self, enabled: bool) {
        for attachment in self.pipelines.working.blend.iter_mut() {
            attachment.enabled = enabled;
        }
    }

    fn set_blend_factors(
        &mut self,
        src_color: BlendFactor,
        dst_color: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        for attachment in self.pipelines.working.blend.iter_mut() {
            attachment.src_color = src_color;
            attachment.dst_color = dst_color;
            attachment.src_alpha = src_alpha;
            attachment.dst_alpha = dst_alpha;
        }
    }

    fn set_blend_equation(&mut self, color_op: BlendOp, alpha_op: BlendOp) {
        for attachment in self.pipelines.working.blend.iter_mut() {
            attachment.color_op = color_op;
            attachment.alpha_op = alpha_op;
        }
    }

    fn set_logic_op(&mut self, op: Option<LogicOp>) {
        self.pipelines.working.logic_op = op;
    }

    fn set_multisample(&mut self, samples: SampleCount) {
        self.pipelines.working.samples = samples;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if !self.recorder.check_recording("set_viewport") {
            return;
        }
        unsafe {
            self.ctx.device.cmd_set_viewport(
                self.recorder.command_buffer,
                0,
                &[vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width,
                    height: viewport.height,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                }],
            );
        }
    }

    fn set_scissor(&mut self, scissor: Rect2D) {
        if !self.recorder.check_recording("set_scissor") {
            return;
        }
        unsafe {
            self.ctx.device.cmd_set_scissor(
                self.recorder.command_buffer,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: scissor.x, y: scissor.y },
                    extent: vk::Extent2D { width: scissor.width, height: scissor.height },
                }],
            );
        }
    }

    fn draw(&mut self, first_vertex: u32, vertex_count: u32, primitive: PrimitiveType) -> Result<()> {
        if !self.recorder.check_recording("draw") {
            return Ok(());
        }
        let Some((program_id, variant)) = self.bound_program else {
            return Err(Error::InvalidResource("draw without a bound program".to_string()));
        };

        let version = self.programs.version(program_id, variant)?;
        let ready = self.recorder.prepare_draw(
            &self.ctx.device,
            self.pipeline_layout,
            &mut self.pipelines,
            &mut self.descriptors,
            &self.memory,
            version,
            (self.default_view, self.default_sampler),
            primitive,
        )?;
        if !ready {
            return Ok(());
        }

        self.hooks.invoke(HookPhase::Before, HookOperation::Draw);
        unsafe {
            self.ctx.device.cmd_draw(self.recorder.command_buffer, vertex_count, 1, first_vertex, 0);
        }
        self.hooks.invoke(HookPhase::After, HookOperation::Draw);
        self.draw_calls += 1;
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, primitive: PrimitiveType) -> Result<()> {
        if !self.recorder.check_recording("draw_indexed") {
            return Ok(());
        }
        debug_assert!(self.geometry_indexed, "draw_indexed on geometry without an index buffer");
        if !self.geometry_indexed {
            engine_warn!("prism::vulkan", "draw_indexed ignored: bound geometry has no index buffer");
            return Ok(());
        }
        let Some((program_id, variant)) = self.bound_program else {
            return Err(Error::InvalidResource("draw without a bound program".to_string()));
        };

        let version = self.programs.version(program_id, variant)?;
        let ready = self.recorder.prepare_draw(
            &self.ctx.device,
            self.pipeline_layout,
            &mut self.pipelines,
            &mut self.descriptors,
            &self.memory,
            version,
            (self.default_view, self.default_sampler),
            primitive,
        )?;
        if !ready {
            return Ok(());
        }

        self.hooks.invoke(HookPhase::Before, HookOperation::Draw);
        unsafe {
            self.ctx.device.cmd_draw_indexed(self.recorder.command_buffer, index_count, 1, 0, 0, 0);
        }
        self.hooks.invoke(HookPhase::After, HookOperation::Draw);
        self.draw_calls += 1;
        Ok(())
    }

    fn capture_frame_buffer(&mut self, region: Rect2D) -> Result<Vec<u8>> {
        if self.recorder.phase() == RecorderPhase::Recording {
            return Err(Error::InvalidResource(
                "capture_frame_buffer during frame recording".to_string(),
            ));
        }
        let Some(image_index) = self.last_image_index else {
            return Err(Error::InvalidResource("no rendered frame to capture".to_string()));
        };

        let extent = self.swapchain.extent();
        let x = region.x.clamp(0, extent.width as i32);
        let y = region.y.clamp(0, extent.height as i32);
        let width = region.width.min((extent.width as i32 - x) as u32);
        let height = region.height.min((extent.height as i32 - y) as u32);
        if width == 0 || height == 0 {
            return Err(Error::InvalidResource("capture region is empty".to_string()));
        }

        // Serialize with anything the GPU is still rendering
        self.frames.wait_outstanding()?;

        let byte_len = width as u64 * height as u64 * 4;
        let mut staging = self.memory.create_buffer(
            byte_len,
            vk::BufferUsageFlags::TRANSFER_DST,
            gpu_allocator::MemoryLocation::GpuToCpu,
            "frame_capture",
        )?;

        let image = self.swapchain.image(image_index);
        let copied = self.run_capture_copy(image, staging.buffer, x, y, width, height)
            .and_then(|_| {
                let range = self.memory.flush_range(&staging, 0, byte_len)?;
                unsafe {
                    self.ctx.device.invalidate_mapped_memory_ranges(&[range])
                        .map_err(|e| engine_err!("prism::vulkan", "Failed to invalidate capture memory: {:?}", e))?;
                }
                let mapped = staging.mapped_ptr()?;
                let mut pixels = vec![0u8; byte_len as usize];
                unsafe {
                    std::ptr::copy_nonoverlapping(mapped, pixels.as_mut_ptr(), byte_len as usize);
                }

                // The caller always receives RGBA
                let format = self.swapchain.format();
                if format == vk::Format::B8G8R8A8_SRGB || format == vk::Format::B8G8R8A8_UNORM {
                    for texel in pixels.chunks_exact_mut(4) {
                        texel.swap(0, 2);
                    }
                }
                Ok(pixels)
            });

        self.memory.destroy_buffer(&mut staging);
        copied
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
        }

        self.default_texture.take();
        self.pipelines.destroy_all(&self.ctx.device);
        self.programs.destroy_all();
        self.descriptors.destroy(&self.memory);
        self.frames.destroy();
        self.samplers.shutdown();

        unsafe {
            ManuallyDrop::drop(&mut self.swapchain);
            self.ctx.device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
        self.render_passes.destroy_all(&self.ctx.device);

        // The context may still be referenced by geometries or textures the
        // application holds; the device can only go down with the last one.
        match Arc::get_mut(&mut self.ctx) {
            Some(ctx) => unsafe {
                // Don't panic if lock fails
                if let Ok(pool) = ctx.upload_command_pool.lock() {
                    ctx.device.destroy_command_pool(*pool, None);
                }
                ManuallyDrop::drop(&mut ctx.allocator);
                if let (Some(loader), Some(messenger)) =
                    (&ctx.debug_utils_loader, ctx.debug_messenger)
                {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
                ctx.device.destroy_device(None);
                self.instance.destroy_instance(None);
            },
            None => {
                engine_warn!("prism::vulkan",
                    "GPU resources still referenced at renderer shutdown; device left alive");
            }
        }
    }
}
