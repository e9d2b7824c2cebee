use glam::Mat4;

use crate::renderer::backend::GeometryId;
use crate::renderer::geometry::Aabb;
use crate::renderer::material::SurfaceMaterial;

/// One drawable unit: GPU geometry plus its baked material.
///
/// Owned by the asset cache. Render tasks copy the handle and use it as the
/// batch key, so two instances of the same surface share one instanced draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Surface {
    pub geometry: GeometryId,
    pub material: SurfaceMaterial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSurface {
    pub surface: Surface,
    /// Bounds in model space, after `transform`.
    pub bounds: Aabb,
    /// Node transform relative to the model root.
    pub transform: Mat4,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticModel {
    pub surfaces: Vec<ModelSurface>,
    pub bounds: Aabb,
}

impl StaticModel {
    pub fn new(surfaces: Vec<ModelSurface>) -> Self {
        let bounds = surfaces
            .iter()
            .map(|s| s.bounds)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(Aabb::UNIT);
        Self { surfaces, bounds }
    }

    pub fn geometries(&self) -> impl Iterator<Item = GeometryId> + '_ {
        self.surfaces.iter().map(|s| s.surface.geometry)
    }
}
