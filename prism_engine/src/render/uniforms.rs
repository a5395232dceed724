/// Built-in uniform slots
///
/// Every program exposes (at most) this fixed set of built-in uniforms. The
/// backend maps each slot to whatever byte offset the compiled shader
/// actually assigned it via reflection; a shader that does not use a given
/// built-in simply has no mapping for it and the per-draw write is skipped.

use glam::{Mat4, Vec2, Vec4};

/// The fixed built-in uniform slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinUniform {
    /// Combined view-projection matrix
    ViewProjection,
    /// Mask matrix for mask level 0
    MaskMatrix0,
    /// Mask matrix for mask level 1
    MaskMatrix1,
    /// Mask matrix for mask level 2
    MaskMatrix2,
    /// Seconds since renderer start
    TotalTime,
    /// Seconds since last frame
    DeltaTime,
    /// 1 / texture dimensions of the bound texture
    TexelSize,
    /// Content scale factor (HiDPI)
    ContentScale,
    /// Free-form per-draw vector 0
    UserData0,
    /// Free-form per-draw vector 1
    UserData1,
    /// Free-form per-draw vector 2
    UserData2,
    /// Free-form per-draw vector 3
    UserData3,
}

impl BuiltinUniform {
    /// All slots, in workspace order
    pub const ALL: [BuiltinUniform; 12] = [
        BuiltinUniform::ViewProjection,
        BuiltinUniform::MaskMatrix0,
        BuiltinUniform::MaskMatrix1,
        BuiltinUniform::MaskMatrix2,
        BuiltinUniform::TotalTime,
        BuiltinUniform::DeltaTime,
        BuiltinUniform::TexelSize,
        BuiltinUniform::ContentScale,
        BuiltinUniform::UserData0,
        BuiltinUniform::UserData1,
        BuiltinUniform::UserData2,
        BuiltinUniform::UserData3,
    ];

    /// The member name the slot has in shader source
    ///
    /// Reflection looks these names up in the compiled uniform block; absent
    /// names are legitimate (the shader does not use the built-in).
    pub fn member_name(self) -> &'static str {
        match self {
            BuiltinUniform::ViewProjection => "uViewProjection",
            BuiltinUniform::MaskMatrix0 => "uMaskMatrix0",
            BuiltinUniform::MaskMatrix1 => "uMaskMatrix1",
            BuiltinUniform::MaskMatrix2 => "uMaskMatrix2",
            BuiltinUniform::TotalTime => "uTotalTime",
            BuiltinUniform::DeltaTime => "uDeltaTime",
            BuiltinUniform::TexelSize => "uTexelSize",
            BuiltinUniform::ContentScale => "uContentScale",
            BuiltinUniform::UserData0 => "uUserData0",
            BuiltinUniform::UserData1 => "uUserData1",
            BuiltinUniform::UserData2 => "uUserData2",
            BuiltinUniform::UserData3 => "uUserData3",
        }
    }

    /// Mask matrix slot for the given mask level (0..=2)
    pub fn mask_matrix(level: usize) -> Option<BuiltinUniform> {
        match level {
            0 => Some(BuiltinUniform::MaskMatrix0),
            1 => Some(BuiltinUniform::MaskMatrix1),
            2 => Some(BuiltinUniform::MaskMatrix2),
            _ => None,
        }
    }

    /// User-data slot for the given unit (0..=3)
    pub fn user_data(unit: usize) -> Option<BuiltinUniform> {
        match unit {
            0 => Some(BuiltinUniform::UserData0),
            1 => Some(BuiltinUniform::UserData1),
            2 => Some(BuiltinUniform::UserData2),
            3 => Some(BuiltinUniform::UserData3),
            _ => None,
        }
    }

    /// Size in bytes of the slot's value as laid out in the uniform block
    pub fn size_bytes(self) -> usize {
        match self {
            BuiltinUniform::ViewProjection
            | BuiltinUniform::MaskMatrix0
            | BuiltinUniform::MaskMatrix1
            | BuiltinUniform::MaskMatrix2 => 64,
            BuiltinUniform::TotalTime | BuiltinUniform::DeltaTime => 4,
            BuiltinUniform::TexelSize | BuiltinUniform::ContentScale => 8,
            BuiltinUniform::UserData0
            | BuiltinUniform::UserData1
            | BuiltinUniform::UserData2
            | BuiltinUniform::UserData3 => 16,
        }
    }
}

/// A value written to a built-in uniform slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// 4x4 matrix (view-projection, mask matrices)
    Matrix(Mat4),
    /// 4-component vector (user data)
    Vector(Vec4),
    /// 2-component vector (texel size, content scale)
    Vector2(Vec2),
    /// Scalar (times)
    Scalar(f32),
}

impl UniformValue {
    /// Byte view of the value for uniform-buffer writes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            UniformValue::Matrix(m) => bytemuck::bytes_of(m),
            UniformValue::Vector(v) => bytemuck::bytes_of(v),
            UniformValue::Vector2(v) => bytemuck::bytes_of(v),
            UniformValue::Scalar(s) => bytemuck::bytes_of(s),
        }
    }
}
