/// FrameController - Frame pacing across in-flight lanes
///
/// Rendering runs at most `lane_count` frames deep (two by default). Each
/// lane owns a fence signaled by its submit; beginning a frame on a lane that
/// has a submission outstanding first waits on that fence, which also makes
/// the lane's uniform ring and texture pool safe to reset.

use prism_engine::prism::{Result, Error};
use prism_engine::engine_err;
use ash::vk;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;

/// What beginning a frame on a lane requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneBegin {
    pub lane: usize,
    /// The lane has an outstanding submission; its fence must be waited on
    pub needs_wait: bool,
}

/// Pure lane-cycling bookkeeping, separate from the fences themselves
pub struct FrameLanes {
    lane_count: usize,
    current: usize,
    submitted: Vec<bool>,
    fence_waits: u64,
}

impl FrameLanes {
    pub fn new(lane_count: usize) -> Self {
        debug_assert!(lane_count >= 1);
        Self {
            lane_count,
            current: 0,
            submitted: vec![false; lane_count],
            fence_waits: 0,
        }
    }

    /// Start a frame on the current lane
    pub fn begin(&mut self) -> LaneBegin {
        let needs_wait = self.submitted[self.current];
        if needs_wait {
            self.fence_waits += 1;
            self.submitted[self.current] = false;
        }
        LaneBegin {
            lane: self.current,
            needs_wait,
        }
    }

    /// The frame on the current lane was submitted; advance to the next lane
    pub fn mark_submitted(&mut self) {
        self.submitted[self.current] = true;
        self.current = (self.current + 1) % self.lane_count;
    }

    /// The frame was abandoned before submit (acquire timeout, out-of-date
    /// surface). The lane stays current and needs no wait next time.
    pub fn abort(&mut self) {
        self.submitted[self.current] = false;
    }

    pub fn current_lane(&self) -> usize {
        self.current
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Lanes with a submission the GPU may still be working on
    pub fn submitted_lanes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.lane_count).filter(|&lane| self.submitted[lane])
    }

    /// Total fence waits since creation, for instrumentation
    pub fn fence_waits(&self) -> u64 {
        self.fence_waits
    }
}

/// Lane bookkeeping plus the per-lane fences
pub struct FrameController {
    ctx: Arc<GpuContext>,
    lanes: FrameLanes,
    fences: Vec<vk::Fence>,
}

impl FrameController {
    pub fn new(ctx: Arc<GpuContext>, lane_count: usize) -> Result<Self> {
        let mut fences = Vec::with_capacity(lane_count);
        unsafe {
            let fence_create_info = vk::FenceCreateInfo::default();
            for _ in 0..lane_count {
                fences.push(
                    ctx.device.create_fence(&fence_create_info, None)
                        .map_err(|e| {
                            Error::InitializationFailed(format!("Failed to create frame fence: {:?}", e))
                        })?,
                );
            }
        }
        Ok(Self {
            ctx,
            lanes: FrameLanes::new(lane_count),
            fences,
        })
    }

    /// Begin a frame: wait for the lane's previous submission if one is
    /// outstanding, then hand the lane to the caller
    pub fn begin_frame(&mut self) -> Result<usize> {
        let begin = self.lanes.begin();
        if begin.needs_wait {
            unsafe {
                let fence = [self.fences[begin.lane]];
                self.ctx.device.wait_for_fences(&fence, true, u64::MAX)
                    .map_err(|e| engine_err!("prism::vulkan", "Failed to wait for frame fence: {:?}", e))?;
                self.ctx.device.reset_fences(&fence)
                    .map_err(|e| engine_err!("prism::vulkan", "Failed to reset frame fence: {:?}", e))?;
            }
        }
        Ok(begin.lane)
    }

    pub fn current_lane(&self) -> usize {
        self.lanes.current_lane()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lane_count()
    }

    /// Fence the frame's submit must signal
    pub fn fence(&self, lane: usize) -> vk::Fence {
        self.fences[lane]
    }

    /// Record a successful submit on the current lane
    pub fn mark_submitted(&mut self) {
        self.lanes.mark_submitted();
    }

    /// Abandon the current frame before submit
    pub fn abort_frame(&mut self) {
        self.lanes.abort();
    }

    /// Total fence waits since creation
    pub fn fence_waits(&self) -> u64 {
        self.lanes.fence_waits()
    }

    /// Wait for every outstanding submission without consuming the fences.
    /// Used by frame capture to serialize with in-flight rendering.
    pub fn wait_outstanding(&self) -> Result<()> {
        let pending: Vec<vk::Fence> = self
            .lanes
            .submitted_lanes()
            .map(|lane| self.fences[lane])
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        unsafe {
            self.ctx.device.wait_for_fences(&pending, true, u64::MAX)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to wait for in-flight frames: {:?}", e))?;
        }
        Ok(())
    }

    /// Destroy the fences. Must be called with the device idle.
    pub fn destroy(&mut self) {
        unsafe {
            for fence in self.fences.drain(..) {
                self.ctx.device.destroy_fence(fence, None);
            }
        }
    }
}

#[cfg(test)]
#[path = "vulkan_frame_tests.rs"]
mod tests;
