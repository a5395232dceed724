/// DescriptorAllocator - Per-frame descriptor sets and uniform ring buffers
///
/// Uniform data is streamed through ring buffers: each frame lane owns a
/// chain of host-visible buffers divided into fixed-size slots, bound through
/// dynamic-offset descriptors. A written/dirty bitmask over the built-in
/// uniform slots elides the copy entirely when a draw requests uniforms the
/// current slot already holds.
///
/// Set layout used by every program:
/// - set 0: transform block (view-projection, mask matrices, time, texel size)
/// - set 1: user-data block (four user vectors)
/// - set 2: texture units, allocated per draw from a pool reset each frame

use prism_engine::prism::{Result, Error};
use prism_engine::{engine_err, engine_error};
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_memory::{BufferBlock, MemoryAllocator};

/// Number of texture units addressable per draw
pub const TEXTURE_UNIT_COUNT: u32 = 4;

/// Outcome of acquiring a uniform slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    /// The current slot already holds every requested uniform
    Reuse { buffer: usize, offset: u64 },
    /// A fresh slot was claimed and must be written
    Write { buffer: usize, offset: u64 },
}

impl SlotDecision {
    pub fn offset(&self) -> u64 {
        match *self {
            SlotDecision::Reuse { offset, .. } | SlotDecision::Write { offset, .. } => offset,
        }
    }

    pub fn buffer(&self) -> usize {
        match *self {
            SlotDecision::Reuse { buffer, .. } | SlotDecision::Write { buffer, .. } => buffer,
        }
    }
}

/// Slot cursor and written/dirty bookkeeping for one uniform ring.
///
/// Holds no GPU objects: the caller performs the actual copy when `acquire`
/// answers `Write`. Slots are never rewritten within a frame, so earlier
/// draws keep valid data while later draws advance through the ring.
pub struct SlotRing {
    slot_size: u64,
    slots_per_buffer: u32,
    buffer_count: usize,
    /// Last written slot, None until the first write of the frame
    cursor: Option<(usize, u32)>,
    /// Uniform slots present in the cursor slot
    written: u16,
    /// Cumulative slot writes, for instrumentation
    copies: u64,
}

impl SlotRing {
    pub fn new(slot_size: u64, slots_per_buffer: u32, buffer_count: usize) -> Self {
        debug_assert!(slot_size > 0 && slots_per_buffer > 0 && buffer_count > 0);
        Self {
            slot_size,
            slots_per_buffer,
            buffer_count,
            cursor: None,
            written: 0,
            copies: 0,
        }
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Total writes since creation
    pub fn copies(&self) -> u64 {
        self.copies
    }

    /// Clear written bits for uniforms whose value changed since the last write
    pub fn mark_stale(&mut self, changed: u16) {
        self.written &= !changed;
    }

    /// Drop the reuse claim on the cursor slot without moving the cursor.
    ///
    /// Used when the block layout behind the ring changes: the cursor slot's
    /// bytes were laid out for the old offsets, so even an unchanged value
    /// set must go to a fresh slot. The cursor stays put because earlier
    /// draws still reference the slots behind it.
    pub fn invalidate(&mut self) {
        self.written = 0;
    }

    /// Claim a slot for a draw that needs the uniforms in `dirty`.
    ///
    /// Returns `Reuse` when the current slot already holds all of them,
    /// otherwise advances to the next slot. Running off the end of the last
    /// buffer wraps the cursor and reports capacity exhaustion, which is a
    /// sizing bug rather than a transient condition.
    pub fn acquire(&mut self, dirty: u16) -> Result<SlotDecision> {
        if let Some((buffer, slot)) = self.cursor {
            if self.written & dirty == dirty {
                return Ok(SlotDecision::Reuse {
                    buffer,
                    offset: slot as u64 * self.slot_size,
                });
            }
        }

        let (buffer, slot) = match self.cursor {
            None => (0, 0),
            Some((buffer, slot)) => {
                if slot + 1 < self.slots_per_buffer {
                    (buffer, slot + 1)
                } else {
                    (buffer + 1, 0)
                }
            }
        };

        if buffer >= self.buffer_count {
            self.cursor = Some((0, 0));
            self.written = 0;
            return Err(Error::CapacityExhausted(format!(
                "uniform ring full ({} buffers x {} slots)",
                self.buffer_count, self.slots_per_buffer
            )));
        }

        self.cursor = Some((buffer, slot));
        self.written = dirty;
        self.copies += 1;
        Ok(SlotDecision::Write {
            buffer,
            offset: slot as u64 * self.slot_size,
        })
    }

    /// Restart the ring for a new frame. The frame fence guarantees the GPU
    /// has finished reading every slot of this lane.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.written = 0;
    }
}

/// The two dynamic-offset uniform rings of a frame lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    Transform,
    UserData,
}

/// A bound uniform slot: the descriptor set plus the dynamic offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlot {
    pub set: vk::DescriptorSet,
    pub dynamic_offset: u32,
    /// True when the slot content was freshly written this acquire
    pub wrote: bool,
}

/// One uniform ring with its backing buffers and per-buffer descriptor sets
struct RingBuffers {
    ring: SlotRing,
    buffers: Vec<BufferBlock>,
    sets: Vec<vk::DescriptorSet>,
    block_size: u64,
}

/// Per-frame-lane descriptor state
struct FrameDescriptors {
    transform: RingBuffers,
    user_data: RingBuffers,
    /// Pool for per-draw texture sets, reset at frame start
    texture_pool: vk::DescriptorPool,
}

/// Ring and pool sizing
#[derive(Debug, Clone, Copy)]
pub struct DescriptorConfig {
    pub frame_lanes: usize,
    pub slots_per_buffer: u32,
    pub buffers_per_ring: u32,
    pub transform_block_size: u64,
    pub user_data_block_size: u64,
    pub texture_sets_per_frame: u32,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            frame_lanes: 2,
            slots_per_buffer: 256,
            buffers_per_ring: 4,
            transform_block_size: 256,
            user_data_block_size: 64,
            texture_sets_per_frame: 1024,
        }
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Owner of descriptor set layouts, pools and uniform rings for all lanes
pub struct DescriptorAllocator {
    ctx: Arc<GpuContext>,
    pub transform_layout: vk::DescriptorSetLayout,
    pub user_data_layout: vk::DescriptorSetLayout,
    pub texture_layout: vk::DescriptorSetLayout,
    /// Pool backing the long-lived ring descriptor sets
    static_pool: vk::DescriptorPool,
    frames: Vec<FrameDescriptors>,
}

impl DescriptorAllocator {
    pub fn new(
        ctx: Arc<GpuContext>,
        memory: &MemoryAllocator,
        config: &DescriptorConfig,
    ) -> Result<Self> {
        unsafe {
            let device = &ctx.device;

            // One dynamic UBO binding per uniform set
            let ubo_binding = [vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)];
            let ubo_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&ubo_binding);

            let transform_layout = device.create_descriptor_set_layout(&ubo_layout_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create transform set layout: {:?}", e))?;
            let user_data_layout = device.create_descriptor_set_layout(&ubo_layout_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create user data set layout: {:?}", e))?;

            let texture_bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..TEXTURE_UNIT_COUNT)
                .map(|unit| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(unit)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .descriptor_count(1)
                        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                })
                .collect();
            let texture_layout_info =
                vk::DescriptorSetLayoutCreateInfo::default().bindings(&texture_bindings);
            let texture_layout = device.create_descriptor_set_layout(&texture_layout_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create texture set layout: {:?}", e))?;

            // Static pool sized for every ring buffer of every lane
            let ring_set_count = (config.frame_lanes as u32) * config.buffers_per_ring * 2;
            let static_pool_sizes = [vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(ring_set_count)];
            let static_pool_info = vk::DescriptorPoolCreateInfo::default()
                .max_sets(ring_set_count)
                .pool_sizes(&static_pool_sizes);
            let static_pool = device.create_descriptor_pool(&static_pool_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create descriptor pool: {:?}", e))?;

            let alignment = ctx.limits.min_uniform_buffer_offset_alignment.max(1);

            let mut frames = Vec::with_capacity(config.frame_lanes);
            for lane in 0..config.frame_lanes {
                let transform = Self::create_ring(
                    &ctx,
                    memory,
                    static_pool,
                    transform_layout,
                    config.transform_block_size,
                    alignment,
                    config,
                    &format!("transform_ring[{}]", lane),
                )?;
                let user_data = Self::create_ring(
                    &ctx,
                    memory,
                    static_pool,
                    user_data_layout,
                    config.user_data_block_size,
                    alignment,
                    config,
                    &format!("user_data_ring[{}]", lane),
                )?;

                let texture_pool_sizes = [vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(config.texture_sets_per_frame * TEXTURE_UNIT_COUNT)];
                let texture_pool_info = vk::DescriptorPoolCreateInfo::default()
                    .max_sets(config.texture_sets_per_frame)
                    .pool_sizes(&texture_pool_sizes);
                let texture_pool = device.create_descriptor_pool(&texture_pool_info, None)
                    .map_err(|e| engine_err!("prism::vulkan", "Failed to create texture descriptor pool: {:?}", e))?;

                frames.push(FrameDescriptors {
                    transform,
                    user_data,
                    texture_pool,
                });
            }

            Ok(Self {
                ctx,
                transform_layout,
                user_data_layout,
                texture_layout,
                static_pool,
                frames,
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_ring(
        ctx: &Arc<GpuContext>,
        memory: &MemoryAllocator,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        block_size: u64,
        alignment: u64,
        config: &DescriptorConfig,
        name: &str,
    ) -> Result<RingBuffers> {
        let slot_size = align_up(block_size, alignment);
        let buffer_size = slot_size * config.slots_per_buffer as u64;

        let mut buffers = Vec::with_capacity(config.buffers_per_ring as usize);
        let mut sets = Vec::with_capacity(config.buffers_per_ring as usize);

        for _ in 0..config.buffers_per_ring {
            let buffer = memory.create_buffer(
                buffer_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                gpu_allocator::MemoryLocation::CpuToGpu,
                name,
            )?;

            unsafe {
                let layouts = [layout];
                let allocate_info = vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts);
                let set = ctx.device.allocate_descriptor_sets(&allocate_info)
                    .map_err(|e| engine_err!("prism::vulkan", "Failed to allocate ring descriptor set: {:?}", e))?[0];

                // The dynamic offset selects the slot; range covers one block
                let buffer_info = [vk::DescriptorBufferInfo::default()
                    .buffer(buffer.buffer)
                    .offset(0)
                    .range(block_size)];
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                    .buffer_info(&buffer_info);
                ctx.device.update_descriptor_sets(&[write], &[]);

                sets.push(set);
            }

            buffers.push(buffer);
        }

        Ok(RingBuffers {
            ring: SlotRing::new(slot_size, config.slots_per_buffer, config.buffers_per_ring as usize),
            buffers,
            sets,
            block_size,
        })
    }

    /// Reset a lane's rings and texture pool at frame start.
    ///
    /// The caller must have waited on the lane's fence first.
    pub fn begin_frame(&mut self, lane: usize) -> Result<()> {
        let frame = &mut self.frames[lane];
        frame.transform.ring.reset();
        frame.user_data.ring.reset();
        unsafe {
            self.ctx.device
                .reset_descriptor_pool(frame.texture_pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| engine_err!("prism::vulkan", "Failed to reset texture descriptor pool: {:?}", e))?;
        }
        Ok(())
    }

    /// Drop slot-reuse claims on both of a lane's rings.
    ///
    /// Called when the bound program version changes: each version reflects
    /// its own block layouts, so bytes staged under the previous layout must
    /// not satisfy the next draw even when no value was rebound.
    pub fn invalidate_rings(&mut self, lane: usize) {
        let frame = &mut self.frames[lane];
        frame.transform.ring.invalidate();
        frame.user_data.ring.invalidate();
    }

    /// Claim a uniform slot for a draw, writing the workspace only when the
    /// ring does not already hold the requested content.
    ///
    /// `dirty` names the uniform slots the draw reads, `changed` the slots
    /// whose value was rebound since the last write. Flush ranges for fresh
    /// writes are appended to `flush_ranges` for a single batched flush.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire_uniform_slot(
        &mut self,
        lane: usize,
        kind: RingKind,
        workspace: &[u8],
        dirty: u16,
        changed: u16,
        memory: &MemoryAllocator,
        flush_ranges: &mut Vec<vk::MappedMemoryRange<'static>>,
    ) -> Result<UniformSlot> {
        let ring_buffers = match kind {
            RingKind::Transform => &mut self.frames[lane].transform,
            RingKind::UserData => &mut self.frames[lane].user_data,
        };

        if workspace.len() as u64 > ring_buffers.block_size {
            engine_error!("prism::vulkan", "Uniform workspace ({} bytes) exceeds ring block size ({} bytes)",
                workspace.len(), ring_buffers.block_size);
            return Err(Error::InvalidResource("uniform workspace too large".to_string()));
        }

        ring_buffers.ring.mark_stale(changed);
        let decision = ring_buffers.ring.acquire(dirty)?;

        let buffer = &ring_buffers.buffers[decision.buffer()];
        let offset = decision.offset();

        let wrote = matches!(decision, SlotDecision::Write { .. });
        if wrote {
            memory.write_mapped(buffer, offset, workspace)?;
            flush_ranges.push(memory.flush_range(buffer, offset, workspace.len() as u64)?);
        }

        Ok(UniformSlot {
            set: ring_buffers.sets[decision.buffer()],
            dynamic_offset: offset as u32,
            wrote,
        })
    }

    /// Allocate a texture descriptor set from the lane's per-frame pool and
    /// fill all units
    pub fn allocate_texture_set(
        &mut self,
        lane: usize,
        units: &[(vk::ImageView, vk::Sampler); TEXTURE_UNIT_COUNT as usize],
    ) -> Result<vk::DescriptorSet> {
        let frame = &self.frames[lane];
        unsafe {
            let layouts = [self.texture_layout];
            let allocate_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(frame.texture_pool)
                .set_layouts(&layouts);
            let set = self.ctx.device.allocate_descriptor_sets(&allocate_info)
                .map_err(|_e| Error::CapacityExhausted(
                    "per-frame texture descriptor pool is full".to_string(),
                ))?[0];

            let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = units
                .iter()
                .map(|(view, sampler)| {
                    [vk::DescriptorImageInfo::default()
                        .image_view(*view)
                        .sampler(*sampler)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)]
                })
                .collect();

            let writes: Vec<vk::WriteDescriptorSet> = image_infos
                .iter()
                .enumerate()
                .map(|(unit, info)| {
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(unit as u32)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(info)
                })
                .collect();

            self.ctx.device.update_descriptor_sets(&writes, &[]);
            Ok(set)
        }
    }

    /// Copy counters for the lane's rings (transform, user data)
    pub fn copy_counts(&self, lane: usize) -> (u64, u64) {
        let frame = &self.frames[lane];
        (frame.transform.ring.copies(), frame.user_data.ring.copies())
    }

    /// Destroy all pools, layouts and ring buffers. Must be called with the
    /// device idle, before device destruction.
    pub fn destroy(&mut self, memory: &MemoryAllocator) {
        unsafe {
            let device = &self.ctx.device;
            for frame in &mut self.frames {
                device.destroy_descriptor_pool(frame.texture_pool, None);
                for buffer in &mut frame.transform.buffers {
                    memory.destroy_buffer(buffer);
                }
                for buffer in &mut frame.user_data.buffers {
                    memory.destroy_buffer(buffer);
                }
            }
            self.frames.clear();
            device.destroy_descriptor_pool(self.static_pool, None);
            device.destroy_descriptor_set_layout(self.transform_layout, None);
            device.destroy_descriptor_set_layout(self.user_data_layout, None);
            device.destroy_descriptor_set_layout(self.texture_layout, None);
        }
    }
}

#[cfg(test)]
#[path = "vulkan_descriptor_allocator_tests.rs"]
mod tests;
