/// RenderPassCache - Interned render passes keyed by attachment layout
///
/// Render pass objects are interned: a byte-vector key is built from the
/// attachment descriptions and identical keys return the same pass. Each
/// interned pass also gets a small stable id so pipeline keys can embed a
/// compact reference instead of the full key.

use prism_engine::prism::Result;
use prism_engine::engine_err;
use ash::vk;
use rustc_hash::FxHashMap;

/// One attachment of a render pass key
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    /// Color attachment that clears on load and is handed to present
    pub fn present_color(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    fn write_key_bytes(&self, key: &mut Vec<u8>) {
        key.extend_from_slice(&self.format.as_raw().to_le_bytes());
        key.extend_from_slice(&self.samples.as_raw().to_le_bytes());
        key.extend_from_slice(&self.load_op.as_raw().to_le_bytes());
        key.extend_from_slice(&self.store_op.as_raw().to_le_bytes());
        key.extend_from_slice(&self.stencil_load_op.as_raw().to_le_bytes());
        key.extend_from_slice(&self.stencil_store_op.as_raw().to_le_bytes());
        key.extend_from_slice(&self.initial_layout.as_raw().to_le_bytes());
        key.extend_from_slice(&self.final_layout.as_raw().to_le_bytes());
    }
}

/// Full attachment layout of a render pass
#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub color: Vec<AttachmentDesc>,
    pub depth_stencil: Option<AttachmentDesc>,
}

impl RenderPassDesc {
    /// Build the interning key: attachment count then every field of every
    /// attachment, in declaration order
    pub fn key(&self) -> RenderPassKey {
        let mut bytes = Vec::with_capacity((self.color.len() + 1) * 32 + 2);
        bytes.push(self.color.len() as u8);
        bytes.push(self.depth_stencil.is_some() as u8);
        for attachment in &self.color {
            attachment.write_key_bytes(&mut bytes);
        }
        if let Some(depth) = &self.depth_stencil {
            depth.write_key_bytes(&mut bytes);
        }
        RenderPassKey(bytes)
    }
}

/// Byte-vector interning key for a render pass
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassKey(Vec<u8>);

/// An interned pass: the handle plus its stable id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternedPass {
    pub pass: vk::RenderPass,
    pub id: u16,
}

/// Interning cache for render passes
#[derive(Default)]
pub struct RenderPassCache {
    entries: FxHashMap<RenderPassKey, InternedPass>,
    // id -> pass, ids are assigned in interning order and never reused
    by_id: Vec<vk::RenderPass>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a pass, creating it through `create` only on a cache miss
    pub fn intern_with<F>(&mut self, desc: &RenderPassDesc, create: F) -> Result<InternedPass>
    where
        F: FnOnce(&RenderPassDesc) -> Result<vk::RenderPass>,
    {
        let key = desc.key();
        if let Some(interned) = self.entries.get(&key) {
            return Ok(*interned);
        }

        let pass = create(desc)?;
        let id = self.by_id.len() as u16;
        self.by_id.push(pass);
        let interned = InternedPass { pass, id };
        self.entries.insert(key, interned);
        Ok(interned)
    }

    /// Intern a pass, creating the Vulkan object on a cache miss
    pub fn intern(&mut self, device: &ash::Device, desc: &RenderPassDesc) -> Result<InternedPass> {
        self.intern_with(desc, |desc| create_render_pass(device, desc))
    }

    /// Look up a pass by its stable id
    pub fn get(&self, id: u16) -> Option<vk::RenderPass> {
        self.by_id.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Destroy all interned passes. Must be called before device destruction.
    pub fn destroy_all(&mut self, device: &ash::Device) {
        unsafe {
            for pass in self.by_id.drain(..) {
                device.destroy_render_pass(pass, None);
            }
        }
        self.entries.clear();
    }
}

/// Create a single-subpass render pass from an attachment layout
fn create_render_pass(device: &ash::Device, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
    unsafe {
        let mut attachments = Vec::new();
        let mut color_attachment_refs = Vec::new();
        let mut depth_attachment_ref: Option<vk::AttachmentReference> = None;

        for (i, color) in desc.color.iter().enumerate() {
            attachments.push(vk::AttachmentDescription::default()
                .format(color.format)
                .samples(color.samples)
                .load_op(color.load_op)
                .store_op(color.store_op)
                .stencil_load_op(color.stencil_load_op)
                .stencil_store_op(color.stencil_store_op)
                .initial_layout(color.initial_layout)
                .final_layout(color.final_layout));

            color_attachment_refs.push(vk::AttachmentReference::default()
                .attachment(i as u32)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        }

        if let Some(depth) = &desc.depth_stencil {
            let depth_index = attachments.len() as u32;
            attachments.push(vk::AttachmentDescription::default()
                .format(depth.format)
                .samples(depth.samples)
                .load_op(depth.load_op)
                .store_op(depth.store_op)
                .stencil_load_op(depth.stencil_load_op)
                .stencil_store_op(depth.stencil_store_op)
                .initial_layout(depth.initial_layout)
                .final_layout(depth.final_layout));

            depth_attachment_ref = Some(vk::AttachmentReference::default()
                .attachment(depth_index)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs);

        if let Some(ref depth_ref) = depth_attachment_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        // Subpass dependency - include depth stages when depth attachment is present
        let has_depth = depth_attachment_ref.is_some();
        let (stage_mask, access_mask) = if has_depth {
            (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
        } else {
            (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
        };

        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stage_mask)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stage_mask)
            .dst_access_mask(access_mask);

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        device.create_render_pass(&render_pass_info, None)
            .map_err(|e| engine_err!("prism::vulkan", "Failed to create render pass: {:?}", e))
    }
}

#[cfg(test)]
#[path = "vulkan_render_pass_cache_tests.rs"]
mod tests;
