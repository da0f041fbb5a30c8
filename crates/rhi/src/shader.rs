//! GLSL to SPIR-V compilation and shader module creation.
//!
//! Scenes carry their shaders as GLSL source. [`compile_glsl`] runs them
//! through naga (GLSL frontend, validator, SPIR-V backend) and [`Shader`]
//! wraps the resulting `VkShaderModule`.
//!
//! The SPIR-V writer keeps naga's default coordinate-space adjustment, so
//! shaders see an OpenGL-style clip space with +Y up and depth in `[0, 1]`.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &CStr = c"main";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compiles a GLSL stage with a `main` entry point to SPIR-V words.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] with the parser or validator message.
pub fn compile_glsl(source: &str, stage: ShaderStage) -> RhiResult<Vec<u32>> {
    let mut frontend = glsl::Frontend::default();
    let module = frontend
        .parse(&glsl::Options::from(stage.to_naga()), source)
        .map_err(|e| RhiError::ShaderError(format!("{} shader: {}", stage, e)))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| RhiError::ShaderError(format!("{} shader validation: {}", stage, e)))?;

    let options = spv::Options {
        lang_version: (1, 3),
        ..Default::default()
    };
    let pipeline_options = spv::PipelineOptions {
        shader_stage: stage.to_naga(),
        entry_point: "main".into(),
    };
    let words = spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| RhiError::ShaderError(format!("{} shader SPIR-V: {}", stage, e)))?;

    debug!("Compiled {} shader to {} SPIR-V words", stage, words.len());
    Ok(words)
}

/// A shader module with its stage.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Compiles `source` and creates the module.
    pub fn from_glsl(device: Arc<Device>, source: &str, stage: ShaderStage) -> RhiResult<Self> {
        let code = compile_glsl(source, stage)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };
        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"
        #version 450
        layout(location = 0) in vec3 in_position;
        layout(set = 0, binding = 0) uniform Frame {
            mat4 mvp;
            vec4 color;
        } frame;
        void main() {
            gl_Position = frame.mvp * vec4(in_position, 1.0);
        }
    "#;

    const FRAGMENT: &str = r#"
        #version 450
        layout(location = 0) out vec4 out_color;
        void main() {
            out_color = vec4(1.0, 0.0, 0.0, 1.0);
        }
    "#;

    #[test]
    fn test_compile_vertex_stage() {
        let words = compile_glsl(VERTEX, ShaderStage::Vertex).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn test_compile_fragment_stage() {
        let words = compile_glsl(FRAGMENT, ShaderStage::Fragment).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = compile_glsl("#version 450\nvoid main( {", ShaderStage::Vertex).unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(ShaderStage::Fragment.name(), "fragment");
    }
}
