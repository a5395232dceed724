//! Unit tests for render pass interning
//!
//! These tests drive the cache through `intern_with` so no device is needed.
//! Handles are synthesized with `vk::RenderPass::from_raw`.

use super::*;
use ash::vk;
use ash::vk::Handle;
use std::cell::Cell;

fn color_only(format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        color: vec![AttachmentDesc::present_color(format)],
        depth_stencil: None,
    }
}

// ============================================================================
// INTERNING TESTS
// ============================================================================

#[test]
fn test_identical_descriptions_intern_once() {
    let mut cache = RenderPassCache::new();
    let creations = Cell::new(0u32);

    let desc = color_only(vk::Format::B8G8R8A8_SRGB);
    let first = cache
        .intern_with(&desc, |_| {
            creations.set(creations.get() + 1);
            Ok(vk::RenderPass::from_raw(1))
        })
        .unwrap();
    let second = cache
        .intern_with(&desc, |_| {
            creations.set(creations.get() + 1);
            Ok(vk::RenderPass::from_raw(2))
        })
        .unwrap();

    assert_eq!(creations.get(), 1);
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_distinct_descriptions_get_distinct_ids() {
    let mut cache = RenderPassCache::new();
    let mut next_handle = 1u64;
    let mut intern = |cache: &mut RenderPassCache, desc: &RenderPassDesc| {
        let handle = next_handle;
        next_handle += 1;
        cache
            .intern_with(desc, |_| Ok(vk::RenderPass::from_raw(handle)))
            .unwrap()
    };

    let srgb = intern(&mut cache, &color_only(vk::Format::B8G8R8A8_SRGB));
    let unorm = intern(&mut cache, &color_only(vk::Format::B8G8R8A8_UNORM));

    assert_ne!(srgb.id, unorm.id);
    assert_ne!(srgb.pass, unorm.pass);
    assert_eq!(cache.get(srgb.id), Some(srgb.pass));
    assert_eq!(cache.get(unorm.id), Some(unorm.pass));
}

#[test]
fn test_load_op_changes_the_key() {
    let base = color_only(vk::Format::B8G8R8A8_SRGB);
    let mut loading = base.clone();
    loading.color[0].load_op = vk::AttachmentLoadOp::LOAD;
    loading.color[0].initial_layout = vk::ImageLayout::PRESENT_SRC_KHR;

    assert_ne!(base.key(), loading.key());
}

#[test]
fn test_depth_attachment_changes_the_key() {
    let base = color_only(vk::Format::B8G8R8A8_SRGB);
    let mut with_depth = base.clone();
    with_depth.depth_stencil = Some(AttachmentDesc {
        format: vk::Format::D32_SFLOAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    });

    assert_ne!(base.key(), with_depth.key());
}

#[test]
fn test_creation_failure_is_not_cached() {
    let mut cache = RenderPassCache::new();
    let desc = color_only(vk::Format::B8G8R8A8_SRGB);

    let failed: crate::Result<InternedPass> = cache.intern_with(&desc, |_| {
        Err(prism_engine::prism::Error::BackendError("boom".to_string()))
    });
    assert!(failed.is_err());
    assert!(cache.is_empty());

    // A later successful intern of the same key must still work
    let interned = cache
        .intern_with(&desc, |_| Ok(vk::RenderPass::from_raw(7)))
        .unwrap();
    assert_eq!(cache.get(interned.id), Some(interned.pass));
}
