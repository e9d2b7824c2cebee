use thiserror::Error;

use crate::asset::{AssetTag, LoadError};
use crate::renderer::framebuffer::TargetSetKind;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("incomplete {kind} target set")]
    IncompleteTargetSet { kind: TargetSetKind },

    #[error("failed to create {what}: {reason}")]
    ResourceCreation { what: String, reason: String },

    #[error("shader program `{label}` failed to build: {reason}")]
    ShaderBuild { label: String, reason: String },

    #[error("failed to load asset {tag}")]
    AssetLoad {
        tag: AssetTag,
        #[source]
        source: LoadError,
    },

    #[error("graphics device: {0}")]
    Device(String),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("unknown {0}")]
    UnknownResource(String),
}

impl RenderError {
    pub fn creation(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::ResourceCreation {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
