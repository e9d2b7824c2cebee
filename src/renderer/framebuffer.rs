//! Construct/destroy pairs for render target sets.

use std::fmt;

use crate::renderer::backend::{GpuBackend, TargetSetId};
use crate::renderer::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    BoxBlur,
    GaussianBlur,
    AmbientOcclusion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetSetKind {
    /// One HDR color target; the raster framebuffer for frames and captures.
    Hdr,
    /// Position, albedo, material and normal+height targets.
    Geometry,
    /// One single-channel target for blur and ambient-occlusion passes.
    Filter(FilterKind),
    /// One two-channel moments target.
    Shadow,
}

impl fmt::Display for TargetSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSetKind::Hdr => f.write_str("hdr"),
            TargetSetKind::Geometry => f.write_str("geometry"),
            TargetSetKind::Filter(FilterKind::BoxBlur) => f.write_str("box blur filter"),
            TargetSetKind::Filter(FilterKind::GaussianBlur) => f.write_str("gaussian blur filter"),
            TargetSetKind::Filter(FilterKind::AmbientOcclusion) => {
                f.write_str("ambient occlusion filter")
            }
            TargetSetKind::Shadow => f.write_str("shadow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Rgba16Float,
    Rgba8Unorm,
    R16Float,
    Rg32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFormat {
    Depth32Float,
}

pub const GEOMETRY_POSITION: usize = 0;
pub const GEOMETRY_ALBEDO: usize = 1;
pub const GEOMETRY_MATERIAL: usize = 2;
pub const GEOMETRY_NORMAL_HEIGHT: usize = 3;

/// Attachment layout handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSetLayout {
    pub kind: TargetSetKind,
    pub width: u32,
    pub height: u32,
    pub colors: Vec<ColorFormat>,
    pub depth: DepthFormat,
}

impl TargetSetLayout {
    pub fn new(kind: TargetSetKind, width: u32, height: u32) -> Self {
        let colors = match kind {
            TargetSetKind::Hdr => vec![ColorFormat::Rgba16Float],
            TargetSetKind::Geometry => vec![
                ColorFormat::Rgba16Float,
                ColorFormat::Rgba8Unorm,
                ColorFormat::Rgba8Unorm,
                ColorFormat::Rgba16Float,
            ],
            TargetSetKind::Filter(_) => vec![ColorFormat::R16Float],
            TargetSetKind::Shadow => vec![ColorFormat::Rg32Float],
        };
        Self {
            kind,
            width,
            height,
            colors,
            depth: DepthFormat::Depth32Float,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.colors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSet {
    pub id: TargetSetId,
    pub kind: TargetSetKind,
    pub width: u32,
    pub height: u32,
}

pub fn create_target_set(
    backend: &mut dyn GpuBackend,
    kind: TargetSetKind,
    width: u32,
    height: u32,
) -> Result<TargetSet, RenderError> {
    let layout = TargetSetLayout::new(kind, width, height);
    if !layout.is_complete() {
        return Err(RenderError::IncompleteTargetSet { kind });
    }
    let id = backend.create_target_set(&layout)?;
    Ok(TargetSet {
        id,
        kind,
        width,
        height,
    })
}

pub fn destroy_target_set(backend: &mut dyn GpuBackend, target_set: TargetSet) {
    backend.destroy_target_set(target_set.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::HeadlessBackend;

    #[test]
    fn geometry_layout_has_four_color_targets() {
        let layout = TargetSetLayout::new(TargetSetKind::Geometry, 64, 64);
        assert_eq!(layout.colors.len(), 4);
        assert_eq!(layout.colors[GEOMETRY_ALBEDO], ColorFormat::Rgba8Unorm);
        assert_eq!(layout.depth, DepthFormat::Depth32Float);
    }

    #[test]
    fn filter_kinds_are_single_channel() {
        for filter in [
            FilterKind::BoxBlur,
            FilterKind::GaussianBlur,
            FilterKind::AmbientOcclusion,
        ] {
            let layout = TargetSetLayout::new(TargetSetKind::Filter(filter), 8, 8);
            assert_eq!(layout.colors, vec![ColorFormat::R16Float]);
        }
    }

    #[test]
    fn zero_sized_sets_are_rejected_by_kind() {
        let mut backend = HeadlessBackend::new();
        let err = create_target_set(&mut backend, TargetSetKind::Shadow, 0, 128).unwrap_err();
        assert_eq!(err.to_string(), "incomplete shadow target set");
        assert_eq!(backend.outstanding_handles(), 0);
    }

    #[test]
    fn destroy_releases_the_set() {
        let mut backend = HeadlessBackend::new();
        let set = create_target_set(&mut backend, TargetSetKind::Hdr, 32, 32).unwrap();
        assert_eq!(backend.outstanding_handles(), 1);
        destroy_target_set(&mut backend, set);
        assert_eq!(backend.outstanding_handles(), 0);
    }
}
