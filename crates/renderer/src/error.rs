//! Renderer error types.

use std::fmt;

use thiserror::Error;

use frameloop_rhi::RhiError;

/// Step of [`crate::Renderer::load`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStage {
    Swapchain,
    DepthTarget,
    Pipeline,
    MeshUpload,
    FrameSlots,
    DescriptorSets,
}

impl LoadStage {
    pub const ALL: [LoadStage; 6] = [
        LoadStage::Swapchain,
        LoadStage::DepthTarget,
        LoadStage::Pipeline,
        LoadStage::MeshUpload,
        LoadStage::FrameSlots,
        LoadStage::DescriptorSets,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LoadStage::Swapchain => "swapchain",
            LoadStage::DepthTarget => "depth target",
            LoadStage::Pipeline => "pipeline",
            LoadStage::MeshUpload => "mesh upload",
            LoadStage::FrameSlots => "frame slots",
            LoadStage::DescriptorSets => "descriptor sets",
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum RendererError {
    /// Loading stopped at `stage`. Everything created before it has been
    /// released.
    #[error("scene load failed at {stage}: {source}")]
    Load { stage: LoadStage, source: RhiError },

    #[error("invalid configuration: {0}")]
    Config(#[from] frameloop_core::Error),

    /// The renderer was used after [`crate::Renderer::unload`].
    #[error("renderer is not loaded")]
    NotLoaded,

    #[error(transparent)]
    Rhi(#[from] RhiError),
}

impl RendererError {
    /// Stage at which loading failed, if this is a load error.
    pub fn load_stage(&self) -> Option<LoadStage> {
        match self {
            RendererError::Load { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type RendererResult<T> = std::result::Result<T, RendererError>;

/// Tags an RHI error with the load stage it came from.
pub(crate) fn at(stage: LoadStage) -> impl FnOnce(RhiError) -> RendererError {
    move |source| RendererError::Load { stage, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_message() {
        let err = at(LoadStage::Pipeline)(RhiError::ShaderError("bad".into()));
        assert_eq!(err.load_stage(), Some(LoadStage::Pipeline));
        assert_eq!(
            err.to_string(),
            "scene load failed at pipeline: Shader error: bad"
        );
    }

    #[test]
    fn test_rhi_error_is_transparent() {
        let err = RendererError::from(RhiError::NoSuitableGpu);
        assert_eq!(err.to_string(), "No suitable GPU found");
        assert_eq!(err.load_stage(), None);
    }
}
