/// GpuContext - Shared GPU state for all Vulkan objects
///
/// Contains everything needed for GPU operations:
/// - Device for Vulkan API calls
/// - Allocator for memory management
/// - Queue for command submission
/// - Command pool for one-shot upload operations
/// - Device limits (non-coherent atom size, UBO alignment, line width granularity)

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Shared GPU context for all Vulkan resources.
///
/// This struct is shared (via `Arc`) by all GPU resources (textures, buffers,
/// geometry) to avoid duplicating device/allocator/queue references in each
/// resource.
///
/// Note: Device and instance destruction is handled by VulkanRenderer::drop()
/// to avoid issues with drop ordering.
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex because resource Drop
    /// impls may run off the render thread)
    /// Wrapped in ManuallyDrop to ensure it's dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Graphics queue for command submission
    pub graphics_queue: vk::Queue,

    /// Graphics queue family index
    pub graphics_queue_family: u32,

    /// Reusable command pool for one-shot upload operations
    /// (created with TRANSIENT + RESET_COMMAND_BUFFER flags)
    pub upload_command_pool: Mutex<vk::CommandPool>,

    /// Device limits captured at init (alignment and granularity queries)
    pub limits: DeviceLimits,

    /// Vulkan instance (kept for reference, destroyed by VulkanRenderer)
    #[allow(dead_code)]
    instance: ash::Instance,

    /// Debug utils loader (for validation layers)
    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,

    /// Debug messenger handle
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// The subset of `vk::PhysicalDeviceLimits` the backend needs after init
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    /// Minimum aligned byte range for flushing host writes to non-coherent memory
    pub non_coherent_atom_size: u64,
    /// Required alignment of dynamic uniform buffer offsets
    pub min_uniform_buffer_offset_alignment: u64,
    /// Largest supported uniform buffer range
    pub max_uniform_buffer_range: u64,
}

impl DeviceLimits {
    /// Capture the needed limits from a physical device
    pub fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        Self {
            non_coherent_atom_size: props.limits.non_coherent_atom_size,
            min_uniform_buffer_offset_alignment: props.limits.min_uniform_buffer_offset_alignment,
            max_uniform_buffer_range: props.limits.max_uniform_buffer_range as u64,
        }
    }
}

impl GpuContext {
    /// Create a new GPU context
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
        upload_command_pool: vk::CommandPool,
        limits: DeviceLimits,
        instance: ash::Instance,
        debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(allocator),
            graphics_queue,
            graphics_queue_family,
            upload_command_pool: Mutex::new(upload_command_pool),
            limits,
            instance,
            debug_utils_loader,
            debug_messenger,
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // NOTE: Device and instance destruction is handled by VulkanRenderer::drop()
        // to avoid issues with drop ordering.
        // This Drop impl intentionally does nothing.
    }
}
