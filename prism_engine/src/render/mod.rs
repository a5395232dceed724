/// Render-facing value types and traits
///
/// Everything the scene graph needs to describe draw state to a backend,
/// without any backend types leaking through.

mod pipeline_state;
mod vertex;
mod shader;
mod uniforms;
mod hooks;
mod renderer;

pub use pipeline_state::{
    BlendFactor, BlendOp, ColorWriteMask, CompareOp, CullMode, FrontFace, LoadOp, LogicOp,
    PolygonMode, PrimitiveType, Rect2D, SampleCount, StencilOp, StencilOpState, StoreOp, Viewport,
};
pub use vertex::{
    BufferFormat, IndexType, VertexAttribute, VertexBinding, VertexInputRate, VertexLayout,
};
pub use shader::{ShaderDetail, ShaderSource, ShaderStage};
pub use uniforms::{BuiltinUniform, UniformValue};
pub use hooks::{DrawHook, DrawHookList, HookOperation, HookPhase};
pub use renderer::{Geometry, Program, SceneRenderer, Texture, TextureFormat, TextureInfo};

#[cfg(test)]
#[path = "render_tests.rs"]
mod tests;
