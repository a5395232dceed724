/// SamplerCache - internal VkSampler management
///
/// Samplers are created on first use and live for the renderer's lifetime.
/// A 2D scene only ever needs a handful of them.

use prism_engine::prism::{Result, Error};
use prism_engine::engine_err;
use crate::vulkan_context::GpuContext;
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

/// The sampling flavors textures can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerType {
    LinearClamp,
    LinearRepeat,
    NearestClamp,
    NearestRepeat,
}

/// Creates VkSamplers on first use, destroys them on shutdown
pub(crate) struct SamplerCache {
    ctx: Option<Arc<GpuContext>>,
    cache: HashMap<SamplerType, vk::Sampler>,
}

impl SamplerCache {
    pub(crate) fn new(ctx: Arc<GpuContext>) -> Self {
        Self {
            ctx: Some(ctx),
            cache: HashMap::new(),
        }
    }

    /// Get or create a VkSampler for the given type
    pub(crate) fn get(&mut self, sampler_type: SamplerType) -> Result<vk::Sampler> {
        if let Some(&sampler) = self.cache.get(&sampler_type) {
            return Ok(sampler);
        }

        let Some(ctx) = self.ctx.as_ref() else {
            return Err(Error::InvalidResource(
                "sampler requested after renderer shutdown".to_string(),
            ));
        };
        let sampler = Self::create_vk_sampler(ctx, sampler_type)?;
        self.cache.insert(sampler_type, sampler);
        Ok(sampler)
    }

    /// Destroy all cached samplers and release the context reference.
    /// Must run while the device is still alive.
    pub(crate) fn shutdown(&mut self) {
        if let Some(ctx) = &self.ctx {
            for (_, sampler) in self.cache.drain() {
                unsafe { ctx.device.destroy_sampler(sampler, None); }
            }
        }
        self.ctx = None;
    }

    fn create_vk_sampler(ctx: &GpuContext, sampler_type: SamplerType) -> Result<vk::Sampler> {
        let (filter, mipmap, address) = match sampler_type {
            SamplerType::LinearClamp => (
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ),
            SamplerType::LinearRepeat => (
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                vk::SamplerAddressMode::REPEAT,
            ),
            SamplerType::NearestClamp => (
                vk::Filter::NEAREST,
                vk::SamplerMipmapMode::NEAREST,
                vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ),
            SamplerType::NearestRepeat => (
                vk::Filter::NEAREST,
                vk::SamplerMipmapMode::NEAREST,
                vk::SamplerAddressMode::REPEAT,
            ),
        };

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .anisotropy_enable(false)
            .max_anisotropy(1.0);

        unsafe {
            ctx.device.create_sampler(&create_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create sampler ({:?}): {:?}", sampler_type, e))
        }
    }
}

impl Drop for SamplerCache {
    fn drop(&mut self) {
        // Fallback if shutdown() was never called
        if let Some(ctx) = &self.ctx {
            for (_, sampler) in self.cache.drain() {
                unsafe { ctx.device.destroy_sampler(sampler, None); }
            }
        }
    }
}

#[cfg(test)]
#[path = "vulkan_sampler_tests.rs"]
mod tests;
