/// CommandRecorder - Per-frame recording state machine
///
/// Tracks the Idle -> Recording -> Submitted frame phases, stages built-in
/// uniform values between draws (newest write wins), and elides redundant
/// binds: a pipeline, descriptor set or geometry that is already bound is
/// never re-bound.
///
/// At draw time the staged uniforms are laid out into a workspace using the
/// bound program version's reflected offsets, then pushed through the
/// descriptor allocator's slot rings. Flush ranges accumulate across the
/// frame and are flushed once before submit.

use prism_engine::prism::{Result, Error};
use prism_engine::prism::render::{BuiltinUniform, PrimitiveType, UniformValue};
use prism_engine::{engine_err, engine_warn};
use ash::vk;
use glam::{Mat4, Vec2, Vec4};

use crate::vulkan_descriptor_allocator::{
    DescriptorAllocator, RingKind, TEXTURE_UNIT_COUNT,
};
use crate::vulkan_memory::MemoryAllocator;
use crate::vulkan_pipeline_cache::PipelineCache;
use crate::vulkan_program::{
    slot_index, ProgramVersion, UniformBlockLayout, BUILTIN_SLOT_COUNT,
};

/// Frame recording phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    /// No frame in progress
    Idle,
    /// Between begin_frame and end_frame, draws are legal
    Recording,
    /// Commands handed to the queue, present pending
    Submitted,
}

fn default_value(uniform: BuiltinUniform) -> UniformValue {
    match uniform {
        BuiltinUniform::ViewProjection
        | BuiltinUniform::MaskMatrix0
        | BuiltinUniform::MaskMatrix1
        | BuiltinUniform::MaskMatrix2 => UniformValue::Matrix(Mat4::IDENTITY),
        BuiltinUniform::TotalTime | BuiltinUniform::DeltaTime => UniformValue::Scalar(0.0),
        BuiltinUniform::TexelSize => UniformValue::Vector2(Vec2::ZERO),
        BuiltinUniform::ContentScale => UniformValue::Vector2(Vec2::ONE),
        BuiltinUniform::UserData0
        | BuiltinUniform::UserData1
        | BuiltinUniform::UserData2
        | BuiltinUniform::UserData3 => UniformValue::Vector(Vec4::ZERO),
    }
}

/// Per-frame recording state
pub struct CommandRecorder {
    pub(crate) phase: RecorderPhase,
    pub(crate) lane: usize,
    pub(crate) image_index: u32,
    pub(crate) command_buffer: vk::CommandBuffer,

    /// Latest value per built-in slot; draws consume the newest write
    values: [UniformValue; BUILTIN_SLOT_COUNT],
    /// Slots whose value changed since they were last written to a ring slot
    changed: u16,
    /// Program version the last draw's uniforms were laid out for
    program_version: Option<u16>,

    /// Redundant-bind elision
    bound_pipeline: vk::Pipeline,
    bound_uniform_sets: [Option<(vk::DescriptorSet, u32)>; 2],
    bound_texture_set: Option<vk::DescriptorSet>,
    bound_geometry: Option<usize>,

    /// Texture units staged for the next draw
    pub(crate) textures: [Option<(vk::ImageView, vk::Sampler)>; TEXTURE_UNIT_COUNT as usize],
    textures_dirty: bool,

    workspace: Vec<u8>,
    flush_ranges: Vec<vk::MappedMemoryRange<'static>>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        let mut values = [UniformValue::Scalar(0.0); BUILTIN_SLOT_COUNT];
        for uniform in BuiltinUniform::ALL {
            values[slot_index(uniform)] = default_value(uniform);
        }
        Self {
            phase: RecorderPhase::Idle,
            lane: 0,
            image_index: 0,
            command_buffer: vk::CommandBuffer::null(),
            values,
            changed: u16::MAX,
            program_version: None,
            bound_pipeline: vk::Pipeline::null(),
            bound_uniform_sets: [None; 2],
            bound_texture_set: None,
            bound_geometry: None,
            textures: [None; TEXTURE_UNIT_COUNT as usize],
            textures_dirty: true,
            workspace: Vec::new(),
            flush_ranges: Vec::new(),
        }
    }

    pub fn phase(&self) -> RecorderPhase {
        self.phase
    }

    /// True when draws are currently legal; logs in release builds
    pub(crate) fn check_recording(&self, operation: &str) -> bool {
        debug_assert!(
            self.phase == RecorderPhase::Recording,
            "{} called outside begin_frame/end_frame",
            operation
        );
        if self.phase != RecorderPhase::Recording {
            engine_warn!("prism::vulkan", "{} ignored: no frame is being recorded", operation);
            return false;
        }
        true
    }

    /// Begin recording into the image's command buffer and open the pass
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        lane: usize,
        image_index: u32,
    ) -> Result<()> {
        debug_assert!(self.phase == RecorderPhase::Idle, "begin_frame while a frame is in progress");

        self.lane = lane;
        self.image_index = image_index;
        self.command_buffer = command_buffer;

        // Nothing carries over between frames: the lane's rings were reset
        self.bound_pipeline = vk::Pipeline::null();
        self.bound_uniform_sets = [None; 2];
        self.bound_texture_set = None;
        self.bound_geometry = None;
        self.textures_dirty = true;
        self.changed = u16::MAX;
        self.program_version = None;
        self.flush_ranges.clear();

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to begin frame command buffer: {:?}", e))?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] },
            }];
            let render_pass_begin = vk::RenderPassBeginInfo::default()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(command_buffer, &render_pass_begin, vk::SubpassContents::INLINE);

            // Full-surface defaults until the scene sets its own
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }

        self.phase = RecorderPhase::Recording;
        Ok(())
    }

    /// Stage a uniform write; the newest write before a draw wins
    pub fn bind_uniform(&mut self, slot: BuiltinUniform, value: UniformValue) {
        let index = slot_index(slot);
        if self.values[index] != value {
            self.values[index] = value;
            self.changed |= 1 << index;
        }
    }

    /// Stage a texture for a unit
    pub fn bind_texture_unit(&mut self, unit: u32, view: vk::ImageView, sampler: vk::Sampler) {
        let staged = Some((view, sampler));
        if self.textures[unit as usize] != staged {
            self.textures[unit as usize] = staged;
            self.textures_dirty = true;
        }
    }

    /// Note a geometry bind; returns true when buffers must be (re)bound
    pub fn note_geometry_bind(&mut self, geometry_id: usize) -> bool {
        if self.bound_geometry == Some(geometry_id) {
            return false;
        }
        self.bound_geometry = Some(geometry_id);
        true
    }

    /// Note which program version the next draw uses; returns true when it
    /// differs from the version the staged ring slots were laid out for
    fn note_program_version(&mut self, version_id: u16) -> bool {
        if self.program_version == Some(version_id) {
            return false;
        }
        self.program_version = Some(version_id);
        true
    }

    /// Lay out the staged values for one block and report which slots it
    /// carries
    fn build_workspace(&mut self, layout: &UniformBlockLayout) -> u16 {
        self.workspace.clear();
        self.workspace.resize(layout.size as usize, 0);
        let mut carried = 0u16;
        for (index, offset) in layout.offsets.iter().enumerate() {
            if let Some(offset) = offset {
                let bytes = self.values[index].as_bytes();
                let start = *offset as usize;
                let end = start + bytes.len();
                if end <= self.workspace.len() {
                    self.workspace[start..end].copy_from_slice(bytes);
                    carried |= 1 << index;
                }
            }
        }
        carried
    }

    /// Bind everything a draw needs: pipeline, uniform slots, textures.
    ///
    /// Returns false when the draw must be skipped (pipeline build failure).
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_draw(
        &mut self,
        device: &ash::Device,
        pipeline_layout: vk::PipelineLayout,
        pipelines: &mut PipelineCache,
        descriptors: &mut DescriptorAllocator,
        memory: &MemoryAllocator,
        version: &ProgramVersion,
        default_unit: (vk::ImageView, vk::Sampler),
        primitive: PrimitiveType,
    ) -> Result<bool> {
        pipelines.working.topology = primitive;

        let Some(pipeline) = pipelines.resolve(device, pipeline_layout) else {
            // Already logged by the cache; the draw is dropped
            return Ok(false);
        };

        unsafe {
            if pipeline != self.bound_pipeline {
                device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
                self.bound_pipeline = pipeline;
            }
        }

        // A different program lays the same values out at different offsets,
        // so slots written under the previous layout must not be reused
        if self.note_program_version(version.version_id) {
            descriptors.invalidate_rings(self.lane);
        }

        self.bind_uniform_ring(
            device, pipeline_layout, descriptors, memory,
            RingKind::Transform, &version.transform_block, 0,
        )?;
        self.bind_uniform_ring(
            device, pipeline_layout, descriptors, memory,
            RingKind::UserData, &version.user_data_block, 1,
        )?;

        if self.textures_dirty || self.bound_texture_set.is_none() {
            let units = std::array::from_fn(|unit| self.textures[unit].unwrap_or(default_unit));
            let set = descriptors.allocate_texture_set(self.lane, &units)?;
            unsafe {
                device.cmd_bind_descriptor_sets(
                    self.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline_layout,
                    2,
                    &[set],
                    &[],
                );
            }
            self.bound_texture_set = Some(set);
            self.textures_dirty = false;
        }

        Ok(true)
    }

    fn bind_uniform_ring(
        &mut self,
        device: &ash::Device,
        pipeline_layout: vk::PipelineLayout,
        descriptors: &mut DescriptorAllocator,
        memory: &MemoryAllocator,
        kind: RingKind,
        layout: &UniformBlockLayout,
        set_index: usize,
    ) -> Result<()> {
        if layout.size == 0 {
            // The shader has no block in this set
            return Ok(());
        }

        let dirty = self.build_workspace(layout);
        let changed = self.changed & dirty;

        let slot = descriptors.acquire_uniform_slot(
            self.lane,
            kind,
            &self.workspace,
            dirty,
            changed,
            memory,
            &mut self.flush_ranges,
        )?;

        if slot.wrote {
            self.changed &= !dirty;
        }

        let binding = Some((slot.set, slot.dynamic_offset));
        if self.bound_uniform_sets[set_index] != binding {
            unsafe {
                device.cmd_bind_descriptor_sets(
                    self.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline_layout,
                    set_index as u32,
                    &[slot.set],
                    &[slot.dynamic_offset],
                );
            }
            self.bound_uniform_sets[set_index] = binding;
        }

        Ok(())
    }

    /// Close the pass, flush staged uniform writes, end the command buffer
    pub fn end(&mut self, device: &ash::Device, memory: &MemoryAllocator) -> Result<()> {
        if self.phase != RecorderPhase::Recording {
            return Err(Error::BackendError("end_frame without begin_frame".to_string()));
        }

        unsafe {
            device.cmd_end_render_pass(self.command_buffer);
            device.end_command_buffer(self.command_buffer)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to end frame command buffer: {:?}", e))?;
        }

        let ranges = std::mem::take(&mut self.flush_ranges);
        memory.flush_mapped_ranges(&ranges)?;

        self.phase = RecorderPhase::Submitted;
        Ok(())
    }

    /// Abandon the frame before anything was recorded
    pub fn abort(&mut self) {
        self.phase = RecorderPhase::Idle;
    }

    /// The frame was presented; the recorder is ready for the next one
    pub fn finish_submit(&mut self) {
        debug_assert!(self.phase == RecorderPhase::Submitted);
        self.phase = RecorderPhase::Idle;
    }
}

impl Default for CommandRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "vulkan_recorder_tests.rs"]
mod tests;
