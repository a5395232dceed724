/*!
# Prism Engine - Vulkan Renderer Backend

Vulkan implementation of the prism_engine rendering traits, built on ash for
the API bindings, gpu-allocator for memory, shaderc for GLSL compilation and
spirq for reflection.

Draw state flows through a working-state struct that is hashed into compact
pipeline keys; pipelines, render passes and program variants are all interned
so steady-state frames create no Vulkan objects.
*/

mod debug;
mod vulkan_context;
mod vulkan_descriptor_allocator;
mod vulkan_frame;
mod vulkan_geometry;
mod vulkan_memory;
mod vulkan_pipeline_cache;
mod vulkan_program;
mod vulkan_recorder;
mod vulkan_render_pass_cache;
mod vulkan_renderer;
mod vulkan_sampler;
mod vulkan_swapchain;
mod vulkan_texture;

// Main prism namespace module, mirroring the core crate
pub mod prism {
    pub use crate::vulkan_renderer::{RendererConfig, RendererStats, VulkanRenderer};
    pub use crate::vulkan_sampler::SamplerType;
    pub use crate::debug::validation_stats;
}

pub use prism::{RendererConfig, RendererStats, SamplerType, VulkanRenderer};

pub(crate) use prism_engine::prism::Result;
