/// ProgramCache - Shader compilation, reflection and per-variant versions
///
/// A program is a named vertex/fragment source pair. Each program is
/// compiled lazily into versions: one per active mask count (0..=3) plus a
/// wireframe debug version. Variant selection is communicated to the source
/// through macro definitions, together with the caller's detail hints.
///
/// Reflection (spirq) maps built-in uniform slots to the byte offsets the
/// compiler actually assigned in the uniform blocks. A slot the shader does
/// not declare simply has no offset and its per-draw write is skipped.

use prism_engine::prism::{Result, Error};
use prism_engine::prism::render::{Program as RendererProgram, ShaderSource, ShaderStage};
use prism_engine::prism::render::BuiltinUniform;
use prism_engine::{engine_err, engine_error, engine_debug};
use ash::vk;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::vulkan_context::GpuContext;
use crate::vulkan_descriptor_allocator::TEXTURE_UNIT_COUNT;

/// Number of built-in uniform slots
pub const BUILTIN_SLOT_COUNT: usize = BuiltinUniform::ALL.len();

/// Stable index of a built-in slot, used for bitmasks and offset tables
pub fn slot_index(uniform: BuiltinUniform) -> usize {
    match uniform {
        BuiltinUniform::ViewProjection => 0,
        BuiltinUniform::MaskMatrix0 => 1,
        BuiltinUniform::MaskMatrix1 => 2,
        BuiltinUniform::MaskMatrix2 => 3,
        BuiltinUniform::TotalTime => 4,
        BuiltinUniform::DeltaTime => 5,
        BuiltinUniform::TexelSize => 6,
        BuiltinUniform::ContentScale => 7,
        BuiltinUniform::UserData0 => 8,
        BuiltinUniform::UserData1 => 9,
        BuiltinUniform::UserData2 => 10,
        BuiltinUniform::UserData3 => 11,
    }
}

/// Bit for a built-in slot in a dirty/written mask
pub fn slot_bit(uniform: BuiltinUniform) -> u16 {
    1 << slot_index(uniform)
}

/// Slots carried by the transform block (set 0)
pub const TRANSFORM_SLOTS: u16 = 0b0000_1111_1111;
/// Slots carried by the user-data block (set 1)
pub const USER_DATA_SLOTS: u16 = 0b1111_0000_0000;

/// Highest number of simultaneously active masks
pub const MAX_MASK_COUNT: u8 = 3;

/// A compiled flavor of a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramVariant {
    /// Regular rendering with the given number of active masks (0..=3)
    Masks(u8),
    /// Wireframe debug rendering, no masks
    Wireframe,
}

impl ProgramVariant {
    fn mask_count(self) -> u8 {
        match self {
            ProgramVariant::Masks(count) => count,
            ProgramVariant::Wireframe => 0,
        }
    }
}

/// Reflected layout of one uniform block
#[derive(Debug, Clone, Copy)]
pub struct UniformBlockLayout {
    /// Byte offset per built-in slot, indexed by `slot_index`; None when the
    /// shader does not declare the member
    pub offsets: [Option<u32>; BUILTIN_SLOT_COUNT],
    /// Total block size in bytes
    pub size: u32,
}

impl UniformBlockLayout {
    pub fn empty() -> Self {
        Self {
            offsets: [None; BUILTIN_SLOT_COUNT],
            size: 0,
        }
    }

    /// Bitmask of the slots this block declares
    pub fn declared_mask(&self) -> u16 {
        let mut mask = 0u16;
        for (index, offset) in self.offsets.iter().enumerate() {
            if offset.is_some() {
                mask |= 1 << index;
            }
        }
        mask
    }
}

/// One compiled version of a program
pub struct ProgramVersion {
    /// Unique small id, embedded in pipeline keys
    pub version_id: u16,
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    /// set 0: view-projection, mask matrices, times, texel size, scale
    pub transform_block: UniformBlockLayout,
    /// set 1: user-data vectors
    pub user_data_block: UniformBlockLayout,
    /// Texture units (set 2 bindings) the fragment shader actually samples
    pub sampled_units: [bool; TEXTURE_UNIT_COUNT as usize],
}

struct ProgramEntry {
    name: String,
    vertex_source: ShaderSource,
    fragment_source: ShaderSource,
    versions: FxHashMap<ProgramVariant, ProgramVersion>,
}

/// Scene-facing program handle
pub struct Program {
    pub(crate) id: u32,
    name: String,
}

impl RendererProgram for Program {
    fn name(&self) -> &str {
        &self.name
    }
}

/// GLSL to SPIR-V compilation boundary
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
}

impl ShaderCompiler {
    pub fn new() -> Result<Self> {
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| Error::InitializationFailed("Failed to initialize shader compiler".to_string()))?;
        Ok(Self { compiler })
    }

    /// Compile one stage. Detail hints and variant defines become macro
    /// definitions. Compiler diagnostics are preserved verbatim.
    pub fn compile(
        &self,
        name: &str,
        source: &ShaderSource,
        stage: ShaderStage,
        extra_defines: &[(&str, String)],
    ) -> Result<Vec<u32>> {
        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| Error::InitializationFailed("Failed to create shader compile options".to_string()))?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_2 as u32,
        );

        for detail in &source.details {
            options.add_macro_definition(&detail.name, Some(&detail.value));
        }
        for (define, value) in extra_defines {
            options.add_macro_definition(define, Some(value));
        }

        let kind = match stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        };

        let file_name = match stage {
            ShaderStage::Vertex => format!("{}.vert", name),
            ShaderStage::Fragment => format!("{}.frag", name),
        };

        let artifact = self.compiler
            .compile_into_spirv(&source.text, kind, &file_name, "main", Some(&options))
            .map_err(|e| {
                engine_error!("prism::vulkan", "Shader compilation failed for '{}'", file_name);
                // Diagnostics go to the caller unmodified
                Error::ShaderCompilation(e.to_string())
            })?;

        Ok(artifact.as_binary().to_vec())
    }
}

/// Program store with lazily compiled versions
pub struct ProgramCache {
    ctx: Arc<GpuContext>,
    compiler: ShaderCompiler,
    programs: Vec<ProgramEntry>,
    next_version_id: u16,
}

impl ProgramCache {
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        Ok(Self {
            ctx,
            compiler: ShaderCompiler::new()?,
            programs: Vec::new(),
            next_version_id: 0,
        })
    }

    /// Register a program. Compilation happens on first use of each variant.
    pub fn create_program(
        &mut self,
        name: &str,
        vertex_source: ShaderSource,
        fragment_source: ShaderSource,
    ) -> Result<Arc<Program>> {
        let id = self.programs.len() as u32;
        self.programs.push(ProgramEntry {
            name: name.to_string(),
            vertex_source,
            fragment_source,
            versions: FxHashMap::default(),
        });
        Ok(Arc::new(Program {
            id,
            name: name.to_string(),
        }))
    }

    /// Get (compiling if needed) the version of a program for a variant
    pub fn version(&mut self, program_id: u32, variant: ProgramVariant) -> Result<&ProgramVersion> {
        if variant.mask_count() > MAX_MASK_COUNT {
            return Err(engine_err!("prism::vulkan",
                "Mask count {} exceeds maximum {}", variant.mask_count(), MAX_MASK_COUNT));
        }

        let entry = self.programs.get(program_id as usize)
            .ok_or_else(|| Error::InvalidResource(format!("unknown program id {}", program_id)))?;

        if !entry.versions.contains_key(&variant) {
            let (name, vertex_source, fragment_source) = (
                entry.name.clone(),
                entry.vertex_source.clone(),
                entry.fragment_source.clone(),
            );

            let version_id = self.next_version_id;
            self.next_version_id += 1;

            let version = self.compile_version(
                &name,
                &vertex_source,
                &fragment_source,
                variant,
                version_id,
            )?;

            engine_debug!("prism::vulkan", "Compiled program '{}' variant {:?} (version {})",
                name, variant, version_id);

            self.programs[program_id as usize].versions.insert(variant, version);
        }

        self.programs[program_id as usize]
            .versions
            .get(&variant)
            .ok_or_else(|| Error::InvalidResource("program version vanished".to_string()))
    }

    fn compile_version(
        &self,
        name: &str,
        vertex_source: &ShaderSource,
        fragment_source: &ShaderSource,
        variant: ProgramVariant,
        version_id: u16,
    ) -> Result<ProgramVersion> {
        let mut defines: Vec<(&str, String)> =
            vec![("MASK_COUNT", variant.mask_count().to_string())];
        if matches!(variant, ProgramVariant::Wireframe) {
            defines.push(("WIREFRAME_DEBUG", "1".to_string()));
        }

        let vertex_spirv = self.compiler.compile(name, vertex_source, ShaderStage::Vertex, &defines)?;
        let fragment_spirv = self.compiler.compile(name, fragment_source, ShaderStage::Fragment, &defines)?;

        let mut transform_block = UniformBlockLayout::empty();
        let mut user_data_block = UniformBlockLayout::empty();
        let mut sampled_units = [false; TEXTURE_UNIT_COUNT as usize];

        reflect_stage(&vertex_spirv, &mut transform_block, &mut user_data_block, &mut sampled_units)?;
        reflect_stage(&fragment_spirv, &mut transform_block, &mut user_data_block, &mut sampled_units)?;

        unsafe {
            let vertex_info = vk::ShaderModuleCreateInfo::default().code(&vertex_spirv);
            let vertex_module = self.ctx.device.create_shader_module(&vertex_info, None)
                .map_err(|e| engine_err!("prism::vulkan", "Failed to create vertex shader module for '{}': {:?}", name, e))?;

            let fragment_info = vk::ShaderModuleCreateInfo::default().code(&fragment_spirv);
            let fragment_module = match self.ctx.device.create_shader_module(&fragment_info, None) {
                Ok(module) => module,
                Err(e) => {
                    self.ctx.device.destroy_shader_module(vertex_module, None);
                    return Err(engine_err!("prism::vulkan",
                        "Failed to create fragment shader module for '{}': {:?}", name, e));
                }
            };

            Ok(ProgramVersion {
                version_id,
                vertex_module,
                fragment_module,
                transform_block,
                user_data_block,
                sampled_units,
            })
        }
    }

    /// Destroy all shader modules. Must be called with the device idle.
    pub fn destroy_all(&mut self) {
        unsafe {
            for entry in &mut self.programs {
                for version in entry.versions.values() {
                    self.ctx.device.destroy_shader_module(version.vertex_module, None);
                    self.ctx.device.destroy_shader_module(version.fragment_module, None);
                }
                entry.versions.clear();
            }
        }
    }
}

/// Fold one stage's reflection into the block layouts.
///
/// Members are matched by name; a built-in the stage does not declare is
/// skipped. When both stages declare the same member the offsets agree
/// because they compile from the same block declaration.
fn reflect_stage(
    code: &[u32],
    transform_block: &mut UniformBlockLayout,
    user_data_block: &mut UniformBlockLayout,
    sampled_units: &mut [bool; TEXTURE_UNIT_COUNT as usize],
) -> Result<()> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| engine_err!("prism::vulkan", "SPIR-V reflection failed: {:?}", e))?;

    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            if let spirq::var::Variable::Descriptor { desc_bind, desc_ty, ty, .. } = var {
                match desc_ty {
                    spirq::ty::DescriptorType::UniformBuffer() => {
                        let block = match desc_bind.set() {
                            0 => &mut *transform_block,
                            1 => &mut *user_data_block,
                            other => {
                                engine_error!("prism::vulkan",
                                    "Uniform block in unexpected descriptor set {}", other);
                                continue;
                            }
                        };
                        fold_block_members(ty, block);
                    }
                    spirq::ty::DescriptorType::CombinedImageSampler()
                    | spirq::ty::DescriptorType::SampledImage() => {
                        if desc_bind.set() == 2 && desc_bind.bind() < TEXTURE_UNIT_COUNT {
                            sampled_units[desc_bind.bind() as usize] = true;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

fn fold_block_members(ty: &spirq::ty::Type, block: &mut UniformBlockLayout) {
    if let spirq::ty::Type::Struct(st) = ty {
        if let Some(size) = ty.nbyte() {
            block.size = block.size.max(size as u32);
        }
        for member in &st.members {
            let Some(member_name) = &member.name else { continue };
            let Some(offset) = member.offset else { continue };
            for uniform in BuiltinUniform::ALL {
                if uniform.member_name() == member_name {
                    block.offsets[slot_index(uniform)] = Some(offset as u32);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "vulkan_program_tests.rs"]
mod tests;
