//! Unit tests for the recorder's uniform staging and bind elision
//!
//! Everything here runs without a device: workspace layout, change tracking
//! and redundant-bind detection are pure bookkeeping.

use super::*;
use crate::vulkan_descriptor_allocator::{SlotDecision, SlotRing};
use ash::vk::Handle;
use prism_engine::prism::render::{BuiltinUniform, UniformValue};
use glam::{Mat4, Vec2, Vec4};

fn layout_with(slots: &[(BuiltinUniform, u32)], size: u32) -> UniformBlockLayout {
    let mut layout = UniformBlockLayout::empty();
    layout.size = size;
    for (uniform, offset) in slots {
        layout.offsets[slot_index(*uniform)] = Some(*offset);
    }
    layout
}

// ============================================================================
// UNIFORM STAGING TESTS
// ============================================================================

#[test]
fn test_fresh_recorder_carries_sane_defaults() {
    let mut recorder = CommandRecorder::new();
    let layout = layout_with(
        &[
            (BuiltinUniform::ViewProjection, 0),
            (BuiltinUniform::ContentScale, 64),
        ],
        80,
    );

    let carried = recorder.build_workspace(&layout);
    assert_eq!(
        carried,
        slot_bit_for(BuiltinUniform::ViewProjection) | slot_bit_for(BuiltinUniform::ContentScale)
    );

    let matrix: &[u8] = &recorder.workspace[0..64];
    assert_eq!(matrix, bytemuck::bytes_of(&Mat4::IDENTITY));
    let scale: &[u8] = &recorder.workspace[64..72];
    assert_eq!(scale, bytemuck::bytes_of(&Vec2::ONE));
}

#[test]
fn test_workspace_places_values_at_reflected_offsets() {
    let mut recorder = CommandRecorder::new();
    recorder.bind_uniform(BuiltinUniform::TotalTime, UniformValue::Scalar(2.5));
    recorder.bind_uniform(
        BuiltinUniform::UserData1,
        UniformValue::Vector(Vec4::new(1.0, 2.0, 3.0, 4.0)),
    );

    let layout = layout_with(
        &[
            (BuiltinUniform::UserData1, 0),
            (BuiltinUniform::TotalTime, 16),
        ],
        32,
    );
    recorder.build_workspace(&layout);

    let vector: &[u8] = &recorder.workspace[0..16];
    assert_eq!(vector, bytemuck::bytes_of(&Vec4::new(1.0, 2.0, 3.0, 4.0)));
    let time: &[u8] = &recorder.workspace[16..20];
    assert_eq!(time, bytemuck::bytes_of(&2.5f32));
}

#[test]
fn test_slots_absent_from_the_block_are_not_carried() {
    let mut recorder = CommandRecorder::new();
    let layout = layout_with(&[(BuiltinUniform::UserData0, 0)], 16);

    let carried = recorder.build_workspace(&layout);
    assert_eq!(carried, slot_bit_for(BuiltinUniform::UserData0));
}

#[test]
fn test_rebinding_the_same_value_is_not_a_change() {
    let mut recorder = CommandRecorder::new();
    recorder.changed = 0;

    recorder.bind_uniform(BuiltinUniform::TotalTime, UniformValue::Scalar(1.0));
    assert_eq!(recorder.changed, slot_bit_for(BuiltinUniform::TotalTime));

    recorder.changed = 0;
    recorder.bind_uniform(BuiltinUniform::TotalTime, UniformValue::Scalar(1.0));
    assert_eq!(recorder.changed, 0);

    recorder.bind_uniform(BuiltinUniform::TotalTime, UniformValue::Scalar(2.0));
    assert_eq!(recorder.changed, slot_bit_for(BuiltinUniform::TotalTime));
}

#[test]
fn test_newest_write_wins_before_a_draw() {
    let mut recorder = CommandRecorder::new();
    recorder.bind_uniform(BuiltinUniform::UserData0, UniformValue::Vector(Vec4::X));
    recorder.bind_uniform(BuiltinUniform::UserData0, UniformValue::Vector(Vec4::Y));
    recorder.bind_uniform(BuiltinUniform::UserData0, UniformValue::Vector(Vec4::Z));

    let layout = layout_with(&[(BuiltinUniform::UserData0, 0)], 16);
    recorder.build_workspace(&layout);

    let vector: &[u8] = &recorder.workspace[0..16];
    assert_eq!(vector, bytemuck::bytes_of(&Vec4::Z));
}

#[test]
fn test_value_too_large_for_the_block_is_skipped() {
    let mut recorder = CommandRecorder::new();
    // A matrix cannot fit a 16-byte block at offset 0
    let layout = layout_with(&[(BuiltinUniform::ViewProjection, 0)], 16);

    let carried = recorder.build_workspace(&layout);
    assert_eq!(carried, 0);
}

// ============================================================================
// BIND ELISION TESTS
// ============================================================================

#[test]
fn test_redundant_geometry_binds_are_elided() {
    let mut recorder = CommandRecorder::new();

    assert!(recorder.note_geometry_bind(0x1000));
    assert!(!recorder.note_geometry_bind(0x1000));
    assert!(recorder.note_geometry_bind(0x2000));
    assert!(!recorder.note_geometry_bind(0x2000));
    assert!(recorder.note_geometry_bind(0x1000));
}

#[test]
fn test_texture_rebind_only_dirties_on_change() {
    let mut recorder = CommandRecorder::new();
    let view = vk::ImageView::from_raw(11);
    let sampler = vk::Sampler::from_raw(22);

    recorder.bind_texture_unit(0, view, sampler);
    assert!(recorder.textures_dirty);
    recorder.textures_dirty = false;

    recorder.bind_texture_unit(0, view, sampler);
    assert!(!recorder.textures_dirty);

    recorder.bind_texture_unit(1, view, sampler);
    assert!(recorder.textures_dirty);
}

#[test]
fn test_program_switch_is_reported_once_per_version() {
    let mut recorder = CommandRecorder::new();

    assert!(recorder.note_program_version(1));
    assert!(!recorder.note_program_version(1));
    assert!(recorder.note_program_version(2));
    assert!(!recorder.note_program_version(2));
    assert!(recorder.note_program_version(1));
}

#[test]
fn test_unchanged_values_rewrite_after_a_program_switch() {
    // Program 7 reflects uTotalTime at offset 0, program 8 at offset 16. The
    // value never changes between the two draws, so a reuse of the slot
    // staged for program 7 would hand program 8 bytes laid out for the wrong
    // offset.
    let mut recorder = CommandRecorder::new();
    let mut ring = SlotRing::new(256, 16, 2);

    let layout_a = layout_with(&[(BuiltinUniform::TotalTime, 0)], 16);
    let dirty_a = recorder.build_workspace(&layout_a);
    assert!(recorder.note_program_version(7));
    assert!(matches!(ring.acquire(dirty_a).unwrap(), SlotDecision::Write { .. }));
    recorder.changed &= !dirty_a;

    // Same draw again under the same program still reuses
    assert!(!recorder.note_program_version(7));
    assert!(matches!(ring.acquire(dirty_a).unwrap(), SlotDecision::Reuse { .. }));

    let layout_b = layout_with(&[(BuiltinUniform::TotalTime, 16)], 32);
    let dirty_b = recorder.build_workspace(&layout_b);
    if recorder.note_program_version(8) {
        ring.invalidate();
    }
    let decision = ring.acquire(dirty_b).unwrap();
    assert!(matches!(decision, SlotDecision::Write { .. }));
    assert_eq!(ring.copies(), 2);

    // The fresh slot carries the value at the new offset
    let time: &[u8] = &recorder.workspace[16..20];
    assert_eq!(time, bytemuck::bytes_of(&0.0f32));
}

#[test]
fn test_abort_returns_the_recorder_to_idle() {
    let mut recorder = CommandRecorder::new();
    recorder.phase = RecorderPhase::Recording;
    recorder.abort();
    assert_eq!(recorder.phase(), RecorderPhase::Idle);
}

fn slot_bit_for(uniform: BuiltinUniform) -> u16 {
    1 << slot_index(uniform)
}
