//! Unit tests for the pipeline cache
//!
//! The cache is driven through `resolve_with` so no device is needed; test
//! pipelines are synthesized with `vk::Pipeline::from_raw`.

use super::*;
use ash::vk;
use ash::vk::Handle;
use prism_engine::prism::render::{
    BlendFactor, ColorWriteMask, LogicOp, PrimitiveType, SampleCount, VertexAttribute,
    VertexBinding,
};
use std::cell::Cell;

fn counted_builder(
    counter: &Cell<u64>,
    handle: u64,
) -> impl FnOnce(&PipelineKey, &WorkingState, Option<vk::Pipeline>) -> crate::Result<vk::Pipeline> + '_ {
    move |_, _, _| {
        counter.set(counter.get() + 1);
        Ok(vk::Pipeline::from_raw(handle))
    }
}

// ============================================================================
// QUANTIZATION TESTS
// ============================================================================

#[test]
fn test_line_width_round_trips_within_a_step() {
    for width in [0.0f32, 1.0, 1.5, 2.25, 7.9375, 255.0] {
        let decoded = line_width_from_bits(quantize_line_width(width));
        assert!(
            (decoded - width).abs() <= LINE_WIDTH_STEP / 2.0 + f32::EPSILON,
            "width {} decoded to {}",
            width,
            decoded
        );
    }
}

#[test]
fn test_blend_constant_round_trips_within_a_step() {
    for value in [0.0f32, 0.25, 0.5, 0.333, 0.999, 1.0] {
        let decoded = unorm8_to_f32(quantize_unorm8(value));
        assert!((decoded - value).abs() <= 0.5 / 255.0 + f32::EPSILON);
    }
}

#[test]
fn test_depth_bound_round_trips_within_a_step() {
    for value in [0.0f32, 0.1, 0.5, 0.75, 1.0] {
        let decoded = unorm12_to_f32(quantize_unorm12(value));
        assert!((decoded - value).abs() <= 0.5 / 4095.0 + f32::EPSILON);
    }
}

#[test]
fn test_quantization_clamps_out_of_range_input() {
    assert_eq!(quantize_unorm8(-1.0), 0);
    assert_eq!(quantize_unorm8(2.0), 255);
    assert_eq!(quantize_unorm12(-0.5), 0);
    assert_eq!(quantize_unorm12(1.5), 4095);
}

// ============================================================================
// KEY EQUALITY TESTS
// ============================================================================

#[test]
fn test_identical_states_produce_identical_keys() {
    let a = WorkingState::default();
    let b = WorkingState::default();
    assert_eq!(a.key(), b.key());
}

#[test]
fn test_line_widths_within_a_step_share_a_key() {
    let mut a = WorkingState::default();
    let mut b = WorkingState::default();
    a.line_width = 2.0;
    b.line_width = 2.0 + LINE_WIDTH_STEP / 4.0;
    assert_eq!(a.key(), b.key());

    // A full step apart must differ
    b.line_width = 2.0 + LINE_WIDTH_STEP;
    assert_ne!(a.key(), b.key());
}

#[test]
fn test_every_state_group_contributes_to_the_key() {
    let base = WorkingState::default();

    let mut topology = base.clone();
    topology.topology = PrimitiveType::Lines;
    assert_ne!(base.key(), topology.key());

    let mut blend = base.clone();
    blend.blend[0].enabled = true;
    assert_ne!(base.key(), blend.key());

    let mut factors = base.clone();
    factors.blend[0].dst_color = BlendFactor::One;
    assert_ne!(base.key(), factors.key());

    let mut logic = base.clone();
    logic.logic_op = Some(LogicOp::Xor);
    assert_ne!(base.key(), logic.key());

    let mut depth = base.clone();
    depth.depth_test = true;
    assert_ne!(base.key(), depth.key());

    let mut stencil = base.clone();
    stencil.stencil_test = true;
    assert_ne!(base.key(), stencil.key());

    let mut samples = base.clone();
    samples.samples = SampleCount::S4;
    assert_ne!(base.key(), samples.key());

    let mut program = base.clone();
    program.program_version_id = 9;
    assert_ne!(base.key(), program.key());

    let mut pass = base.clone();
    pass.render_pass_id = 3;
    assert_ne!(base.key(), pass.key());
}

#[test]
fn test_distinct_logic_ops_produce_distinct_keys() {
    let mut xor = WorkingState::default();
    xor.logic_op = Some(LogicOp::Xor);
    let mut copy = xor.clone();
    copy.logic_op = Some(LogicOp::Copy);
    assert_ne!(xor.key(), copy.key());
}

#[test]
fn test_attachment_count_contributes_to_the_key() {
    let single = WorkingState::default();
    let mut double = single.clone();
    double.color_attachment_count = 2;
    assert_ne!(single.key(), double.key());
}

#[test]
fn test_per_attachment_blend_state_contributes_to_the_key() {
    let mut base = WorkingState::default();
    base.color_attachment_count = 2;

    // Attachment 1 diverging from attachment 0 must split the key
    let mut masked = base.clone();
    masked.blend[1].write_mask = ColorWriteMask::NONE;
    assert_ne!(base.key(), masked.key());
}

#[test]
fn test_attachments_beyond_the_bound_count_are_ignored() {
    let base = WorkingState::default();
    let mut extra = base.clone();
    extra.blend[3].enabled = true;
    assert_eq!(base.key(), extra.key());
}

#[test]
fn test_blend_constants_quantize_into_the_key() {
    let mut a = WorkingState::default();
    let mut b = WorkingState::default();
    a.blend_constants = [0.5, 0.5, 0.5, 1.0];
    b.blend_constants = [0.5 + 0.4 / 255.0, 0.5, 0.5, 1.0];
    assert_eq!(a.key(), b.key());

    b.blend_constants[0] = 0.5 + 2.0 / 255.0;
    assert_ne!(a.key(), b.key());
}

// ============================================================================
// CACHE BEHAVIOR TESTS
// ============================================================================

#[test]
fn test_resolve_builds_once_per_distinct_state() {
    let mut cache = PipelineCache::new();
    let builds = Cell::new(0u64);

    let first = cache.resolve_with(counted_builder(&builds, 1)).unwrap();
    let second = cache.resolve_with(counted_builder(&builds, 2)).unwrap();

    assert_eq!(builds.get(), 1);
    assert_eq!(first, second);
    assert_eq!(cache.stats(), (1, 1));
}

#[test]
fn test_distinct_blend_factors_build_distinct_pipelines() {
    let mut cache = PipelineCache::new();
    let builds = Cell::new(0u64);

    cache.working.blend[0].enabled = true;
    let opaque = cache.resolve_with(counted_builder(&builds, 1)).unwrap();

    cache.working.blend[0].dst_color = BlendFactor::One;
    let additive = cache.resolve_with(counted_builder(&builds, 2)).unwrap();

    assert_eq!(builds.get(), 2);
    assert_ne!(opaque, additive);

    // Switching back hits the first entry without a rebuild
    cache.working.blend[0].dst_color = BlendFactor::OneMinusSrcAlpha;
    let again = cache.resolve_with(counted_builder(&builds, 3)).unwrap();
    assert_eq!(builds.get(), 2);
    assert_eq!(again, opaque);
}

#[test]
fn test_second_build_derives_from_the_first() {
    let mut cache = PipelineCache::new();

    let first = cache
        .resolve_with(|_, _, base| {
            assert!(base.is_none());
            Ok(vk::Pipeline::from_raw(1))
        })
        .unwrap();

    cache.working.blend[0].enabled = true;
    cache
        .resolve_with(|_, _, base| {
            assert_eq!(base, Some(first));
            Ok(vk::Pipeline::from_raw(2))
        })
        .unwrap();
}

#[test]
fn test_multi_attachment_pass_builds_its_own_pipeline() {
    let mut cache = PipelineCache::new();
    let builds = Cell::new(0u64);

    let single = cache.resolve_with(counted_builder(&builds, 1)).unwrap();

    // A pass with two color attachments must not be served the
    // single-attachment pipeline
    cache.working.color_attachment_count = 2;
    let double = cache
        .resolve_with(|_, state, _| {
            builds.set(builds.get() + 1);
            assert_eq!(state.color_attachment_count, 2);
            Ok(vk::Pipeline::from_raw(2))
        })
        .unwrap();

    assert_eq!(builds.get(), 2);
    assert_ne!(single, double);
}

#[test]
fn test_build_failure_returns_none_and_is_cached() {
    let mut cache = PipelineCache::new();
    let attempts = Cell::new(0u64);

    for _ in 0..3 {
        let resolved = cache.resolve_with(|_, _, _| {
            attempts.set(attempts.get() + 1);
            Err(prism_engine::prism::Error::BackendError("no device".to_string()))
        });
        assert!(resolved.is_none());
    }

    // Only the first resolve attempted a build
    assert_eq!(attempts.get(), 1);
}

#[test]
fn test_reset_working_state_keeps_render_pass_binding() {
    let mut cache = PipelineCache::new();
    cache.working.render_pass = vk::RenderPass::from_raw(7);
    cache.working.render_pass_id = 2;
    cache.working.color_attachment_count = 3;
    cache.working.blend[0].enabled = true;
    cache.working.logic_op = Some(LogicOp::Invert);
    cache.working.line_width = 4.0;

    cache.reset_working_state();

    assert_eq!(cache.working.render_pass, vk::RenderPass::from_raw(7));
    assert_eq!(cache.working.render_pass_id, 2);
    assert_eq!(cache.working.color_attachment_count, 3);
    assert!(!cache.working.blend[0].enabled);
    assert_eq!(cache.working.logic_op, None);
    assert_eq!(cache.working.line_width, 1.0);
}

// ============================================================================
// VERTEX LAYOUT INTERNING
// ============================================================================

#[test]
fn test_vertex_layouts_intern_by_value() {
    use prism_engine::prism::render::{BufferFormat, VertexInputRate, VertexLayout};

    let mut cache = PipelineCache::new();

    let layout = VertexLayout {
        bindings: vec![VertexBinding {
            binding: 0,
            stride: 20,
            input_rate: VertexInputRate::Vertex,
        }],
        attributes: vec![
            VertexAttribute {
                location: 0,
                binding: 0,
                format: BufferFormat::R32G32B32_SFLOAT,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                binding: 0,
                format: BufferFormat::R32G32_SFLOAT,
                offset: 12,
            },
        ],
    };

    let id = cache.intern_vertex_layout(&layout);
    assert_eq!(cache.intern_vertex_layout(&layout.clone()), id);

    let mut other = layout.clone();
    other.bindings[0].stride = 24;
    assert_ne!(cache.intern_vertex_layout(&other), id);
}
