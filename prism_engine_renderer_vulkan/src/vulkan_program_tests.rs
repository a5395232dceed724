//! Unit tests for shader compilation and reflection
//!
//! The compiler and reflection run on the CPU, so everything here works
//! without a GPU. Only shader module creation needs a device and is covered
//! by the renderer integration tests.

use super::*;
use prism_engine::prism::render::{BuiltinUniform, ShaderSource, ShaderStage};

const TEST_VERTEX: &str = r#"
#version 450
layout(set = 0, binding = 0) uniform TransformBlock {
    mat4 uViewProjection;
#if MASK_COUNT > 0
    mat4 uMaskMatrix0;
#endif
    float uTotalTime;
} transforms;

layout(location = 0) in vec3 inPosition;

void main() {
    gl_Position = transforms.uViewProjection * vec4(inPosition, 1.0);
}
"#;

const TEST_FRAGMENT: &str = r#"
#version 450
layout(set = 1, binding = 0) uniform UserBlock {
    vec4 uUserData0;
    vec4 uUserData2;
} user;
layout(set = 2, binding = 1) uniform sampler2D uTexture1;

layout(location = 0) out vec4 outColor;

void main() {
    outColor = texture(uTexture1, user.uUserData0.xy) + user.uUserData2;
}
"#;

fn compile_and_reflect(mask_count: u8) -> (UniformBlockLayout, UniformBlockLayout, [bool; 4]) {
    let compiler = ShaderCompiler::new().unwrap();
    let defines = [("MASK_COUNT", mask_count.to_string())];

    let vertex = compiler
        .compile("test", &ShaderSource::new(TEST_VERTEX), ShaderStage::Vertex, &defines)
        .unwrap();
    let fragment = compiler
        .compile("test", &ShaderSource::new(TEST_FRAGMENT), ShaderStage::Fragment, &defines)
        .unwrap();

    let mut transform_block = UniformBlockLayout::empty();
    let mut user_data_block = UniformBlockLayout::empty();
    let mut sampled_units = [false; 4];
    reflect_stage(&vertex, &mut transform_block, &mut user_data_block, &mut sampled_units).unwrap();
    reflect_stage(&fragment, &mut transform_block, &mut user_data_block, &mut sampled_units).unwrap();

    (transform_block, user_data_block, sampled_units)
}

// ============================================================================
// SLOT MAPPING TESTS
// ============================================================================

#[test]
fn test_slot_indices_are_dense_and_unique() {
    let mut seen = [false; BUILTIN_SLOT_COUNT];
    for uniform in BuiltinUniform::ALL {
        let index = slot_index(uniform);
        assert!(index < BUILTIN_SLOT_COUNT);
        assert!(!seen[index], "duplicate slot index {}", index);
        seen[index] = true;
    }
}

#[test]
fn test_ring_slot_masks_partition_all_slots() {
    assert_eq!(TRANSFORM_SLOTS & USER_DATA_SLOTS, 0);
    assert_eq!(
        TRANSFORM_SLOTS | USER_DATA_SLOTS,
        (1u16 << BUILTIN_SLOT_COUNT) - 1
    );
    assert_ne!(slot_bit(BuiltinUniform::ViewProjection) & TRANSFORM_SLOTS, 0);
    assert_ne!(slot_bit(BuiltinUniform::UserData3) & USER_DATA_SLOTS, 0);
}

// ============================================================================
// COMPILATION TESTS
// ============================================================================

#[test]
fn test_compile_error_preserves_diagnostics() {
    let compiler = ShaderCompiler::new().unwrap();
    let broken = ShaderSource::new("#version 450\nvoid main() { vec5 x; }");

    let err = compiler
        .compile("broken", &broken, ShaderStage::Vertex, &[])
        .unwrap_err();
    match err {
        prism_engine::prism::Error::ShaderCompilation(message) => {
            // The compiler's own wording must survive unchanged
            assert!(message.contains("vec5"), "diagnostic lost: {}", message);
        }
        other => panic!("unexpected error variant: {:?}", other),
    }
}

#[test]
fn test_detail_hints_become_macro_definitions() {
    let compiler = ShaderCompiler::new().unwrap();
    // Compiles only if POSITION_COMPONENTS is defined
    let source = ShaderSource::new(
        "#version 450\nvoid main() { gl_Position = vec4(POSITION_COMPONENTS); }",
    )
    .with_detail("POSITION_COMPONENTS", "0.0, 0.0, 0.0, 1.0");

    assert!(compiler.compile("hints", &source, ShaderStage::Vertex, &[]).is_ok());
}

// ============================================================================
// REFLECTION TESTS
// ============================================================================

#[test]
fn test_reflection_maps_declared_members_by_name() {
    let (transform_block, user_data_block, sampled_units) = compile_and_reflect(1);

    assert!(transform_block.offsets[slot_index(BuiltinUniform::ViewProjection)].is_some());
    assert!(transform_block.offsets[slot_index(BuiltinUniform::MaskMatrix0)].is_some());
    assert!(transform_block.offsets[slot_index(BuiltinUniform::TotalTime)].is_some());

    assert!(user_data_block.offsets[slot_index(BuiltinUniform::UserData0)].is_some());
    assert!(user_data_block.offsets[slot_index(BuiltinUniform::UserData2)].is_some());

    assert_eq!(sampled_units, [false, true, false, false]);
}

#[test]
fn test_reflection_skips_absent_members() {
    let (transform_block, user_data_block, _) = compile_and_reflect(1);

    // Not declared anywhere in the test shaders
    assert!(transform_block.offsets[slot_index(BuiltinUniform::DeltaTime)].is_none());
    assert!(transform_block.offsets[slot_index(BuiltinUniform::TexelSize)].is_none());
    assert!(user_data_block.offsets[slot_index(BuiltinUniform::UserData1)].is_none());
    assert!(user_data_block.offsets[slot_index(BuiltinUniform::UserData3)].is_none());
}

#[test]
fn test_mask_count_zero_drops_mask_matrix() {
    let (transform_block, _, _) = compile_and_reflect(0);
    assert!(transform_block.offsets[slot_index(BuiltinUniform::MaskMatrix0)].is_none());
    // The block shrinks accordingly but still holds the other members
    assert!(transform_block.offsets[slot_index(BuiltinUniform::ViewProjection)].is_some());
    assert!(transform_block.size >= 64);
}

#[test]
fn test_declared_mask_matches_offsets() {
    let (transform_block, user_data_block, _) = compile_and_reflect(1);

    let expected_transform = slot_bit(BuiltinUniform::ViewProjection)
        | slot_bit(BuiltinUniform::MaskMatrix0)
        | slot_bit(BuiltinUniform::TotalTime);
    assert_eq!(transform_block.declared_mask(), expected_transform);

    let expected_user =
        slot_bit(BuiltinUniform::UserData0) | slot_bit(BuiltinUniform::UserData2);
    assert_eq!(user_data_block.declared_mask(), expected_user);
}
