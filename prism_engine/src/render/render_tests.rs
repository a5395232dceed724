//! Unit tests for the render value types
//!
//! Covers built-in uniform slot mapping, hook dispatch ordering, and the
//! small helpers on the state enums.

use crate::render::*;
use glam::{Mat4, Vec4};
use std::sync::{Arc, Mutex};

// ============================================================================
// BUILT-IN UNIFORM TESTS
// ============================================================================

#[test]
fn test_builtin_uniform_member_names_are_unique() {
    let mut names: Vec<&str> = BuiltinUniform::ALL.iter().map(|u| u.member_name()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), BuiltinUniform::ALL.len());
}

#[test]
fn test_mask_matrix_slots() {
    assert_eq!(BuiltinUniform::mask_matrix(0), Some(BuiltinUniform::MaskMatrix0));
    assert_eq!(BuiltinUniform::mask_matrix(1), Some(BuiltinUniform::MaskMatrix1));
    assert_eq!(BuiltinUniform::mask_matrix(2), Some(BuiltinUniform::MaskMatrix2));
    // Mask counts only go up to 3 active masks (levels 0..=2)
    assert_eq!(BuiltinUniform::mask_matrix(3), None);
}

#[test]
fn test_user_data_slots() {
    for unit in 0..4 {
        assert!(BuiltinUniform::user_data(unit).is_some());
    }
    assert_eq!(BuiltinUniform::user_data(4), None);
}

#[test]
fn test_uniform_value_byte_sizes_match_slots() {
    assert_eq!(
        UniformValue::Matrix(Mat4::IDENTITY).as_bytes().len(),
        BuiltinUniform::ViewProjection.size_bytes()
    );
    assert_eq!(
        UniformValue::Vector(Vec4::ONE).as_bytes().len(),
        BuiltinUniform::UserData0.size_bytes()
    );
    assert_eq!(
        UniformValue::Scalar(1.0).as_bytes().len(),
        BuiltinUniform::TotalTime.size_bytes()
    );
}

// ============================================================================
// STATE ENUM HELPERS
// ============================================================================

#[test]
fn test_sample_count_round_trip() {
    for count in [1u32, 2, 4, 8] {
        let sc = SampleCount::from_u32(count).unwrap();
        assert_eq!(sc.as_u32(), count);
    }
    assert!(SampleCount::from_u32(3).is_none());
    assert!(SampleCount::from_u32(16).is_none());
}

#[test]
fn test_color_write_mask_bits() {
    assert_eq!(ColorWriteMask::ALL.bits(), 0b1111);
    assert_eq!(ColorWriteMask::NONE.bits(), 0b0000);
    let red_only = ColorWriteMask { r: true, g: false, b: false, a: false };
    assert_eq!(red_only.bits(), 0b0001);
}

#[test]
fn test_index_type_sizes() {
    assert_eq!(IndexType::U16.size_bytes(), 2);
    assert_eq!(IndexType::U32.size_bytes(), 4);
}

// ============================================================================
// SHADER SOURCE TESTS
// ============================================================================

#[test]
fn test_shader_source_detail_order_is_preserved() {
    let source = ShaderSource::new("void main() {}")
        .with_detail("HAS_INSTANCING", "1")
        .with_detail("MAX_BONES", "32");

    assert_eq!(source.details.len(), 2);
    assert_eq!(source.details[0].name, "HAS_INSTANCING");
    assert_eq!(source.details[1].name, "MAX_BONES");
}

// ============================================================================
// DRAW HOOK TESTS
// ============================================================================

#[test]
fn test_hooks_invoke_in_attachment_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = DrawHookList::new();

    for i in 0..3 {
        let order = Arc::clone(&order);
        hooks.attach(
            HookPhase::Before,
            HookOperation::Draw,
            Box::new(move || order.lock().unwrap().push(i)),
        );
    }

    hooks.invoke(HookPhase::Before, HookOperation::Draw);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_hooks_filter_by_phase_and_operation() {
    let hits = Arc::new(Mutex::new(0u32));
    let mut hooks = DrawHookList::new();

    let hits_a = Arc::clone(&hits);
    hooks.attach(
        HookPhase::After,
        HookOperation::EndFrame,
        Box::new(move || *hits_a.lock().unwrap() += 1),
    );

    // Wrong phase, then wrong operation: neither should fire.
    hooks.invoke(HookPhase::Before, HookOperation::EndFrame);
    hooks.invoke(HookPhase::After, HookOperation::Draw);
    assert_eq!(*hits.lock().unwrap(), 0);

    hooks.invoke(HookPhase::After, HookOperation::EndFrame);
    assert_eq!(*hits.lock().unwrap(), 1);
}
