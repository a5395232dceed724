/// PipelineCache - Graphics pipeline interning keyed by packed draw state
///
/// Every field that contributes to pipeline identity is packed into a
/// fixed-size key. Draw-time state setters mutate a working state; `resolve`
/// packs it into a key and either returns the cached pipeline or builds one.
/// The first pipeline ever built allows derivatives and later builds chain
/// off it as derivative pipelines.
///
/// Float state is quantized before packing so that values closer than the
/// quantization step cannot produce distinct pipelines:
/// - line width in 1/16 steps
/// - blend constants in 8-bit unorm steps
/// - depth bounds in 12-bit unorm steps
///
/// Viewport, scissor and stencil reference are dynamic state and deliberately
/// not part of the key.

use prism_engine::prism::Result;
use prism_engine::prism::render::{
    BlendFactor, BlendOp, BufferFormat, ColorWriteMask, CompareOp, CullMode, FrontFace, LogicOp,
    PolygonMode, PrimitiveType, SampleCount, StencilOp, StencilOpState, VertexInputRate,
    VertexLayout,
};
use prism_engine::{engine_err, engine_error};
use ash::vk;
use rustc_hash::FxHashMap;

// ============================================================================
// QUANTIZATION
// ============================================================================

/// Line width quantization step
pub const LINE_WIDTH_STEP: f32 = 1.0 / 16.0;

/// Quantize a line width to 1/16 steps (12-bit fixed point)
pub fn quantize_line_width(width: f32) -> u16 {
    let q = (width / LINE_WIDTH_STEP).round();
    q.clamp(0.0, 4095.0) as u16
}

/// Decode a quantized line width
pub fn line_width_from_bits(bits: u16) -> f32 {
    bits as f32 * LINE_WIDTH_STEP
}

/// Quantize a [0, 1] value to 8 bits (blend constants)
pub fn quantize_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Decode an 8-bit unorm
pub fn unorm8_to_f32(bits: u8) -> f32 {
    bits as f32 / 255.0
}

/// Quantize a [0, 1] value to 12 bits (depth bounds)
pub fn quantize_unorm12(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * 4095.0).round() as u16
}

/// Decode a 12-bit unorm
pub fn unorm12_to_f32(bits: u16) -> f32 {
    bits as f32 / 4095.0
}

// ============================================================================
// KEY
// ============================================================================

/// Color attachments a pipeline can blend into
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Fixed-size, densely packed pipeline identity.
///
/// Two working states that pack to the same key are interchangeable at the
/// API level, so key equality is the cache's correctness contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// topology | polygon | cull | front face | samples | quantized line
    /// width | logic op | color attachment count
    state: u64,
    /// depth test/write/compare | quantized depth bounds
    depth: u64,
    /// stencil enable | per-face ops | 8-bit compare/write masks
    stencil: u64,
    /// quantized blend constants
    blend: u64,
    /// Per-attachment blend state, zeroed beyond the attachment count
    attachments: [u32; MAX_COLOR_ATTACHMENTS],
    /// Interned vertex layout id
    layout_id: u16,
    /// Program version id (program + variant)
    program_id: u16,
    /// Interned render pass id
    render_pass_id: u16,
}

fn topology_bits(primitive: PrimitiveType) -> u64 {
    match primitive {
        PrimitiveType::Triangles => 0,
        PrimitiveType::TriangleStrip => 1,
        PrimitiveType::TriangleFan => 2,
        PrimitiveType::Lines => 3,
        PrimitiveType::LineStrip => 4,
        PrimitiveType::Points => 5,
    }
}

fn polygon_bits(mode: PolygonMode) -> u64 {
    match mode {
        PolygonMode::Fill => 0,
        PolygonMode::Line => 1,
        PolygonMode::Point => 2,
    }
}

fn cull_bits(mode: CullMode) -> u64 {
    match mode {
        CullMode::None => 0,
        CullMode::Front => 1,
        CullMode::Back => 2,
    }
}

fn compare_bits(op: CompareOp) -> u64 {
    match op {
        CompareOp::Never => 0,
        CompareOp::Less => 1,
        CompareOp::Equal => 2,
        CompareOp::LessOrEqual => 3,
        CompareOp::Greater => 4,
        CompareOp::NotEqual => 5,
        CompareOp::GreaterOrEqual => 6,
        CompareOp::Always => 7,
    }
}

fn stencil_op_bits(op: StencilOp) -> u64 {
    match op {
        StencilOp::Keep => 0,
        StencilOp::Zero => 1,
        StencilOp::Replace => 2,
        StencilOp::IncrementAndClamp => 3,
        StencilOp::DecrementAndClamp => 4,
        StencilOp::Invert => 5,
        StencilOp::IncrementAndWrap => 6,
        StencilOp::DecrementAndWrap => 7,
    }
}

fn blend_factor_bits(factor: BlendFactor) -> u64 {
    match factor {
        BlendFactor::Zero => 0,
        BlendFactor::One => 1,
        BlendFactor::SrcColor => 2,
        BlendFactor::OneMinusSrcColor => 3,
        BlendFactor::DstColor => 4,
        BlendFactor::OneMinusDstColor => 5,
        BlendFactor::SrcAlpha => 6,
        BlendFactor::OneMinusSrcAlpha => 7,
        BlendFactor::DstAlpha => 8,
        BlendFactor::OneMinusDstAlpha => 9,
        BlendFactor::ConstantColor => 10,
        BlendFactor::OneMinusConstantColor => 11,
        BlendFactor::SrcAlphaSaturate => 12,
    }
}

fn blend_op_bits(op: BlendOp) -> u64 {
    match op {
        BlendOp::Add => 0,
        BlendOp::Subtract => 1,
        BlendOp::ReverseSubtract => 2,
        BlendOp::Min => 3,
        BlendOp::Max => 4,
    }
}

fn logic_op_bits(op: LogicOp) -> u64 {
    match op {
        LogicOp::Clear => 0,
        LogicOp::And => 1,
        LogicOp::AndReverse => 2,
        LogicOp::Copy => 3,
        LogicOp::AndInverted => 4,
        LogicOp::NoOp => 5,
        LogicOp::Xor => 6,
        LogicOp::Or => 7,
        LogicOp::Nor => 8,
        LogicOp::Equivalent => 9,
        LogicOp::Invert => 10,
        LogicOp::OrReverse => 11,
        LogicOp::CopyInverted => 12,
        LogicOp::OrInverted => 13,
        LogicOp::Nand => 14,
        LogicOp::Set => 15,
    }
}

fn stencil_face_bits(face: &StencilOpState) -> u64 {
    stencil_op_bits(face.fail_op)
        | stencil_op_bits(face.pass_op) << 3
        | stencil_op_bits(face.depth_fail_op) << 6
        | compare_bits(face.compare_op) << 9
}

/// Blend state of one color attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendAttachment {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub color_op: BlendOp,
    pub alpha_op: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for BlendAttachment {
    /// Blending off, factors preset to standard alpha blending so enabling
    /// the toggle alone gives the usual "src over" compositing
    fn default() -> Self {
        Self {
            enabled: false,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
            color_op: BlendOp::Add,
            alpha_op: BlendOp::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }
}

impl BlendAttachment {
    /// Pack into 27 bits: enable | factors | ops | write mask
    fn packed_bits(&self) -> u32 {
        (self.enabled as u32)
            | (blend_factor_bits(self.src_color) as u32) << 1
            | (blend_factor_bits(self.dst_color) as u32) << 5
            | (blend_op_bits(self.color_op) as u32) << 9
            | (blend_factor_bits(self.src_alpha) as u32) << 12
            | (blend_factor_bits(self.dst_alpha) as u32) << 16
            | (blend_op_bits(self.alpha_op) as u32) << 20
            | (self.write_mask.bits() as u32) << 23
    }
}

// ============================================================================
// WORKING STATE
// ============================================================================

/// The unpacked draw state mutated between draws.
///
/// Also carries the non-key ingredients the pipeline builder needs: the
/// actual vertex layout, shader modules and render pass behind the ids.
#[derive(Clone)]
pub struct WorkingState {
    pub topology: PrimitiveType,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub line_width: f32,
    pub samples: SampleCount,

    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub depth_bounds: Option<(f32, f32)>,

    pub stencil_test: bool,
    pub stencil_front: StencilOpState,
    pub stencil_back: StencilOpState,

    /// Per-attachment blend state; only the first `color_attachment_count`
    /// entries reach the key and the built pipeline
    pub blend: [BlendAttachment; MAX_COLOR_ATTACHMENTS],
    pub blend_constants: [f32; 4],
    pub logic_op: Option<LogicOp>,
    /// Color attachment count of the bound render pass
    pub color_attachment_count: u32,

    pub vertex_layout: VertexLayout,
    pub layout_id: u16,
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub program_version_id: u16,
    pub render_pass: vk::RenderPass,
    pub render_pass_id: u16,
}

impl Default for WorkingState {
    /// Frame-start defaults: opaque fill, no depth or stencil, single
    /// sample, counter-clockwise front faces, standard alpha-blend factors
    /// on every attachment (disabled), one color attachment.
    fn default() -> Self {
        Self {
            topology: PrimitiveType::Triangles,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            line_width: 1.0,
            samples: SampleCount::S1,

            depth_test: false,
            depth_write: false,
            depth_compare: CompareOp::LessOrEqual,
            depth_bounds: None,

            stencil_test: false,
            stencil_front: StencilOpState::default(),
            stencil_back: StencilOpState::default(),

            blend: [BlendAttachment::default(); MAX_COLOR_ATTACHMENTS],
            blend_constants: [0.0; 4],
            logic_op: None,
            color_attachment_count: 1,

            vertex_layout: VertexLayout::default(),
            layout_id: 0,
            vertex_module: vk::ShaderModule::null(),
            fragment_module: vk::ShaderModule::null(),
            program_version_id: 0,
            render_pass: vk::RenderPass::null(),
            render_pass_id: 0,
        }
    }
}

impl WorkingState {
    /// Pack the current state into the cache key
    pub fn key(&self) -> PipelineKey {
        let attachment_count =
            (self.color_attachment_count as usize).min(MAX_COLOR_ATTACHMENTS);
        let (logic_enable, logic) = match self.logic_op {
            Some(op) => (1u64, logic_op_bits(op)),
            None => (0, 0),
        };
        let state = topology_bits(self.topology)
            | polygon_bits(self.polygon_mode) << 4
            | cull_bits(self.cull_mode) << 6
            | ((self.front_face == FrontFace::Clockwise) as u64) << 8
            | (self.samples.as_u32() as u64) << 9
            | (quantize_line_width(self.line_width) as u64) << 16
            | logic_enable << 28
            | logic << 29
            | (attachment_count as u64) << 33;

        let (bounds_enable, min_bound, max_bound) = match self.depth_bounds {
            Some((min, max)) => (1u64, quantize_unorm12(min), quantize_unorm12(max)),
            None => (0, 0, 0),
        };
        let depth = (self.depth_test as u64)
            | (self.depth_write as u64) << 1
            | compare_bits(self.depth_compare) << 2
            | bounds_enable << 5
            | (min_bound as u64) << 8
            | (max_bound as u64) << 20;

        let stencil = (self.stencil_test as u64)
            | stencil_face_bits(&self.stencil_front) << 1
            | stencil_face_bits(&self.stencil_back) << 13
            | ((self.stencil_front.compare_mask & 0xFF) as u64) << 25
            | ((self.stencil_front.write_mask & 0xFF) as u64) << 33
            | ((self.stencil_back.compare_mask & 0xFF) as u64) << 41
            | ((self.stencil_back.write_mask & 0xFF) as u64) << 49;

        let blend = (quantize_unorm8(self.blend_constants[0]) as u64)
            | (quantize_unorm8(self.blend_constants[1]) as u64) << 8
            | (quantize_unorm8(self.blend_constants[2]) as u64) << 16
            | (quantize_unorm8(self.blend_constants[3]) as u64) << 24;

        // Attachments beyond the bound pass's count stay zero so they cannot
        // split otherwise identical keys
        let mut attachments = [0u32; MAX_COLOR_ATTACHMENTS];
        for (packed, attachment) in attachments[..attachment_count].iter_mut().zip(&self.blend) {
            *packed = attachment.packed_bits();
        }

        PipelineKey {
            state,
            depth,
            stencil,
            blend,
            attachments,
            layout_id: self.layout_id,
            program_id: self.program_version_id,
            render_pass_id: self.render_pass_id,
        }
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Pipeline interning cache plus the working state feeding it
pub struct PipelineCache {
    pipelines: FxHashMap<PipelineKey, vk::Pipeline>,
    /// First successfully built pipeline; later builds derive from it
    base_pipeline: Option<vk::Pipeline>,
    vertex_layouts: Vec<VertexLayout>,
    pub working: WorkingState,
    builds: u64,
    hits: u64,
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCache {
    pub fn new() -> Self {
        Self {
            pipelines: FxHashMap::default(),
            base_pipeline: None,
            vertex_layouts: Vec::new(),
            working: WorkingState::default(),
            builds: 0,
            hits: 0,
        }
    }

    /// Intern a vertex layout, returning its stable id.
    ///
    /// The set of layouts in a scene is tiny, so a linear scan beats hashing.
    pub fn intern_vertex_layout(&mut self, layout: &VertexLayout) -> u16 {
        if let Some(index) = self.vertex_layouts.iter().position(|l| l == layout) {
            return index as u16;
        }
        self.vertex_layouts.push(layout.clone());
        (self.vertex_layouts.len() - 1) as u16
    }

    /// Reset the working state to frame-start defaults, keeping the
    /// render-pass binding and its attachment count
    pub fn reset_working_state(&mut self) {
        let render_pass = self.working.render_pass;
        let render_pass_id = self.working.render_pass_id;
        let color_attachment_count = self.working.color_attachment_count;
        self.working = WorkingState::default();
        self.working.render_pass = render_pass;
        self.working.render_pass_id = render_pass_id;
        self.working.color_attachment_count = color_attachment_count;
    }

    /// (pipelines built, cache hits) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.builds, self.hits)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Resolve the working state to a pipeline through an arbitrary builder.
    ///
    /// Returns None when building fails; the failure is logged and cached so
    /// the draw is skipped without retrying every frame.
    pub fn resolve_with<F>(&mut self, build: F) -> Option<vk::Pipeline>
    where
        F: FnOnce(&PipelineKey, &WorkingState, Option<vk::Pipeline>) -> Result<vk::Pipeline>,
    {
        let key = self.working.key();

        if let Some(&pipeline) = self.pipelines.get(&key) {
            self.hits += 1;
            return if pipeline == vk::Pipeline::null() {
                None
            } else {
                Some(pipeline)
            };
        }

        match build(&key, &self.working, self.base_pipeline) {
            Ok(pipeline) => {
                self.builds += 1;
                self.pipelines.insert(key, pipeline);
                if self.base_pipeline.is_none() {
                    self.base_pipeline = Some(pipeline);
                }
                Some(pipeline)
            }
            Err(e) => {
                engine_error!("prism::vulkan", "Pipeline build failed, draws with this state will be skipped: {}", e);
                self.pipelines.insert(key, vk::Pipeline::null());
                None
            }
        }
    }

    /// Resolve against the device, building a real graphics pipeline on miss
    pub fn resolve(
        &mut self,
        device: &ash::Device,
        pipeline_layout: vk::PipelineLayout,
    ) -> Option<vk::Pipeline> {
        self.resolve_with(|_key, state, base| build_pipeline(device, pipeline_layout, state, base))
    }

    /// Destroy all cached pipelines. Must be called with the device idle.
    pub fn destroy_all(&mut self, device: &ash::Device) {
        unsafe {
            for (_, pipeline) in self.pipelines.drain() {
                if pipeline != vk::Pipeline::null() {
                    device.destroy_pipeline(pipeline, None);
                }
            }
        }
        self.base_pipeline = None;
    }
}

// ============================================================================
// PIPELINE CONSTRUCTION
// ============================================================================

fn buffer_format_to_vk(format: BufferFormat) -> vk::Format {
    match format {
        BufferFormat::R32_SFLOAT => vk::Format::R32_SFLOAT,
        BufferFormat::R32G32_SFLOAT => vk::Format::R32G32_SFLOAT,
        BufferFormat::R32G32B32_SFLOAT => vk::Format::R32G32B32_SFLOAT,
        BufferFormat::R32G32B32A32_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
        BufferFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        BufferFormat::R32_SINT => vk::Format::R32_SINT,
        BufferFormat::R32_UINT => vk::Format::R32_UINT,
        BufferFormat::R16G16_SINT => vk::Format::R16G16_SINT,
        BufferFormat::R8G8B8A8_UINT => vk::Format::R8G8B8A8_UINT,
    }
}

fn primitive_to_vk(primitive: PrimitiveType) -> vk::PrimitiveTopology {
    match primitive {
        PrimitiveType::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveType::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        PrimitiveType::Lines => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveType::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveType::Points => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn blend_factor_to_vk(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
    }
}

fn blend_op_to_vk(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

fn logic_op_to_vk(op: LogicOp) -> vk::LogicOp {
    match op {
        LogicOp::Clear => vk::LogicOp::CLEAR,
        LogicOp::And => vk::LogicOp::AND,
        LogicOp::AndReverse => vk::LogicOp::AND_REVERSE,
        LogicOp::Copy => vk::LogicOp::COPY,
        LogicOp::AndInverted => vk::LogicOp::AND_INVERTED,
        LogicOp::NoOp => vk::LogicOp::NO_OP,
        LogicOp::Xor => vk::LogicOp::XOR,
        LogicOp::Or => vk::LogicOp::OR,
        LogicOp::Nor => vk::LogicOp::NOR,
        LogicOp::Equivalent => vk::LogicOp::EQUIVALENT,
        LogicOp::Invert => vk::LogicOp::INVERT,
        LogicOp::OrReverse => vk::LogicOp::OR_REVERSE,
        LogicOp::CopyInverted => vk::LogicOp::COPY_INVERTED,
        LogicOp::OrInverted => vk::LogicOp::OR_INVERTED,
        LogicOp::Nand => vk::LogicOp::NAND,
        LogicOp::Set => vk::LogicOp::SET,
    }
}

fn stencil_op_to_vk(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementAndClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementAndClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementAndWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementAndWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

fn stencil_state_to_vk(face: &StencilOpState) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: stencil_op_to_vk(face.fail_op),
        pass_op: stencil_op_to_vk(face.pass_op),
        depth_fail_op: stencil_op_to_vk(face.depth_fail_op),
        compare_op: compare_op_to_vk(face.compare_op),
        compare_mask: face.compare_mask,
        write_mask: face.write_mask,
        // Reference is dynamic state
        reference: 0,
    }
}

/// Build a graphics pipeline from the working state
fn build_pipeline(
    device: &ash::Device,
    pipeline_layout: vk::PipelineLayout,
    state: &WorkingState,
    base: Option<vk::Pipeline>,
) -> Result<vk::Pipeline> {
    unsafe {
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(state.vertex_module)
                .name(entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(state.fragment_module)
                .name(entry),
        ];

        let binding_descriptions: Vec<vk::VertexInputBindingDescription> = state
            .vertex_layout
            .bindings
            .iter()
            .map(|binding| {
                vk::VertexInputBindingDescription::default()
                    .binding(binding.binding)
                    .stride(binding.stride)
                    .input_rate(match binding.input_rate {
                        VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                        VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
                    })
            })
            .collect();

        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = state
            .vertex_layout
            .attributes
            .iter()
            .map(|attribute| {
                vk::VertexInputAttributeDescription::default()
                    .location(attribute.location)
                    .binding(attribute.binding)
                    .format(buffer_format_to_vk(attribute.format))
                    .offset(attribute.offset)
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(primitive_to_vk(state.topology))
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only counts matter here
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(match state.polygon_mode {
                PolygonMode::Fill => vk::PolygonMode::FILL,
                PolygonMode::Line => vk::PolygonMode::LINE,
                PolygonMode::Point => vk::PolygonMode::POINT,
            })
            .cull_mode(match state.cull_mode {
                CullMode::None => vk::CullModeFlags::NONE,
                CullMode::Front => vk::CullModeFlags::FRONT,
                CullMode::Back => vk::CullModeFlags::BACK,
            })
            .front_face(match state.front_face {
                FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
                FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
            })
            // The quantized value, so key and pipeline agree exactly
            .line_width(line_width_from_bits(quantize_line_width(state.line_width)));

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(match state.samples {
                SampleCount::S1 => vk::SampleCountFlags::TYPE_1,
                SampleCount::S2 => vk::SampleCountFlags::TYPE_2,
                SampleCount::S4 => vk::SampleCountFlags::TYPE_4,
                SampleCount::S8 => vk::SampleCountFlags::TYPE_8,
            });

        let (bounds_enable, min_bound, max_bound) = match state.depth_bounds {
            Some((min, max)) => (
                true,
                unorm12_to_f32(quantize_unorm12(min)),
                unorm12_to_f32(quantize_unorm12(max)),
            ),
            None => (false, 0.0, 1.0),
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(compare_op_to_vk(state.depth_compare))
            .depth_bounds_test_enable(bounds_enable)
            .min_depth_bounds(min_bound)
            .max_depth_bounds(max_bound)
            .stencil_test_enable(state.stencil_test)
            .front(stencil_state_to_vk(&state.stencil_front))
            .back(stencil_state_to_vk(&state.stencil_back));

        // One blend state per attachment of the bound render pass
        let attachment_count = (state.color_attachment_count.max(1) as usize)
            .min(MAX_COLOR_ATTACHMENTS);
        let attachments: Vec<vk::PipelineColorBlendAttachmentState> = state.blend
            [..attachment_count]
            .iter()
            .map(|attachment| {
                let mask = attachment.write_mask;
                let mut write_mask = vk::ColorComponentFlags::empty();
                if mask.r { write_mask |= vk::ColorComponentFlags::R; }
                if mask.g { write_mask |= vk::ColorComponentFlags::G; }
                if mask.b { write_mask |= vk::ColorComponentFlags::B; }
                if mask.a { write_mask |= vk::ColorComponentFlags::A; }

                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(attachment.enabled)
                    .src_color_blend_factor(blend_factor_to_vk(attachment.src_color))
                    .dst_color_blend_factor(blend_factor_to_vk(attachment.dst_color))
                    .color_blend_op(blend_op_to_vk(attachment.color_op))
                    .src_alpha_blend_factor(blend_factor_to_vk(attachment.src_alpha))
                    .dst_alpha_blend_factor(blend_factor_to_vk(attachment.dst_alpha))
                    .alpha_blend_op(blend_op_to_vk(attachment.alpha_op))
                    .color_write_mask(write_mask)
            })
            .collect();

        let constants = [
            unorm8_to_f32(quantize_unorm8(state.blend_constants[0])),
            unorm8_to_f32(quantize_unorm8(state.blend_constants[1])),
            unorm8_to_f32(quantize_unorm8(state.blend_constants[2])),
            unorm8_to_f32(quantize_unorm8(state.blend_constants[3])),
        ];
        let mut color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&attachments)
            .blend_constants(constants);
        if let Some(op) = state.logic_op {
            color_blend = color_blend.logic_op_enable(true).logic_op(logic_op_to_vk(op));
        }

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::STENCIL_REFERENCE,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let flags = if base.is_none() {
            vk::PipelineCreateFlags::ALLOW_DERIVATIVES
        } else {
            vk::PipelineCreateFlags::DERIVATIVE
        };

        let mut create_info = vk::GraphicsPipelineCreateInfo::default()
            .flags(flags)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(state.render_pass)
            .subpass(0)
            .base_pipeline_index(-1);

        if let Some(base_pipeline) = base {
            create_info = create_info.base_pipeline_handle(base_pipeline);
        }

        let pipelines = device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
            .map_err(|(_, e)| engine_err!("prism::vulkan", "Failed to create graphics pipeline: {:?}", e))?;

        Ok(pipelines[0])
    }
}

#[cfg(test)]
#[path = "vulkan_pipeline_cache_tests.rs"]
mod tests;
