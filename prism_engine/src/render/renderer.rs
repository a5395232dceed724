/// Renderer-facing traits
///
/// The scene graph drives a backend exclusively through these traits: a
/// stream of bind/state/draw calls per visible object, bracketed by
/// begin_frame/end_frame. Backend crates provide the concrete types.

use std::sync::Arc;
use crate::error::PrismResult as Result;
use crate::render::{
    BlendFactor, BlendOp, LogicOp, PrimitiveType, Rect2D, SampleCount, UniformValue, Viewport,
    BuiltinUniform,
};

/// Texture pixel format
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
}

/// Immutable description of an uploaded texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: TextureFormat,
}

/// Uploaded vertex/index geometry
///
/// Owns its device buffers; dropped when the last reference goes away.
pub trait Geometry: Send + Sync {
    /// Number of vertices uploaded
    fn vertex_count(&self) -> u32;
    /// Number of indices uploaded (0 for non-indexed geometry)
    fn index_count(&self) -> u32;
}

/// Uploaded texture image
pub trait Texture: Send + Sync {
    /// Dimensions and format
    fn info(&self) -> TextureInfo;
}

/// A compiled shader program (vertex + fragment source pair)
///
/// Mask-count variants are compiled lazily by the backend on first bind.
pub trait Program: Send + Sync {
    /// Source-level name, for diagnostics
    fn name(&self) -> &str;
}

/// The per-frame command interface the scene graph records against
///
/// One logical render thread drives this; calls outside a
/// begin_frame/end_frame bracket are contract violations.
pub trait SceneRenderer {
    /// Begin recording a frame
    ///
    /// # Arguments
    ///
    /// * `total_time` - Seconds since renderer start
    /// * `delta_time` - Seconds since the previous frame
    /// * `scale_x` / `scale_y` - Content scale (HiDPI) factors
    fn begin_frame(
        &mut self,
        total_time: f32,
        delta_time: f32,
        scale_x: f32,
        scale_y: f32,
    ) -> Result<()>;

    /// Finish recording, submit, and present
    fn end_frame(&mut self) -> Result<()>;

    /// Bind geometry for subsequent draws
    fn bind_geometry(&mut self, geometry: &Arc<dyn Geometry>) -> Result<()>;

    /// Bind a program (with the current active mask count)
    fn bind_program(&mut self, program: &Arc<dyn Program>, mask_count: u32) -> Result<()>;

    /// Bind a texture to a sampler unit
    fn bind_texture(&mut self, unit: u32, texture: &Arc<dyn Texture>) -> Result<()>;

    /// Record the latest value for a built-in uniform slot (newest write wins)
    fn bind_uniform(&mut self, slot: BuiltinUniform, value: UniformValue);

    /// Enable or disable blending
    fn set_blend_enabled(&mut self, enabled: bool);

    /// Set the four blend factors (color src/dst, alpha src/dst)
    fn set_blend_factors(
        &mut self,
        src_color: BlendFactor,
        dst_color: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    );

    /// Set the blend equations (color, alpha)
    fn set_blend_equation(&mut self, color_op: BlendOp, alpha_op: BlendOp);

    /// Set the framebuffer logic op; `None` disables it
    fn set_logic_op(&mut self, op: Option<LogicOp>);

    /// Set the multisample count
    fn set_multisample(&mut self, samples: SampleCount);

    /// Set the viewport (dynamic state; not part of pipeline identity)
    fn set_viewport(&mut self, viewport: Viewport);

    /// Set the scissor rectangle (dynamic state)
    fn set_scissor(&mut self, scissor: Rect2D);

    /// Draw non-indexed geometry
    fn draw(&mut self, first_vertex: u32, vertex_count: u32, primitive: PrimitiveType)
        -> Result<()>;

    /// Draw indexed geometry
    fn draw_indexed(&mut self, index_count: u32, primitive: PrimitiveType) -> Result<()>;

    /// Synchronously read back a framebuffer region as tightly packed RGBA8
    ///
    /// Serializes with normal frame submission (waits, copies, resumes).
    fn capture_frame_buffer(&mut self, region: Rect2D) -> Result<Vec<u8>>;
}
