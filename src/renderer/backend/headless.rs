//! A backend without a device: issues ids, tracks what is alive and records
//! every submitted command list.

use std::collections::{HashMap, HashSet};

use crate::renderer::backend::{
    retain_live, CubeMapDesc, CubeMapFormat, CubeMapId, GeometryDesc, GeometryId, GpuBackend,
    Liveness, TargetSetId, TextureDesc, TextureId,
};
use crate::renderer::commands::{RenderCommand, RenderTarget};
use crate::renderer::error::RenderError;
use crate::renderer::framebuffer::{TargetSetKind, TargetSetLayout};

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    textures: HashSet<TextureId>,
    cube_maps: HashSet<CubeMapId>,
    geometries: HashSet<GeometryId>,
    target_sets: HashMap<TargetSetId, TargetSetKind>,
    failing: HashSet<TargetSetKind>,
    frame_size: (u32, u32),
    submissions: Vec<Vec<RenderCommand>>,
    presented: usize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Makes every later creation of `kind` fail as incomplete.
    pub fn fail_target_sets(&mut self, kind: TargetSetKind) {
        self.failing.insert(kind);
    }

    pub fn restore_target_sets(&mut self, kind: TargetSetKind) {
        self.failing.remove(&kind);
    }

    /// Live ids of every kind.
    pub fn outstanding_handles(&self) -> usize {
        self.textures.len() + self.cube_maps.len() + self.geometries.len() + self.target_sets.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_cube_maps(&self) -> usize {
        self.cube_maps.len()
    }

    pub fn live_geometries(&self) -> usize {
        self.geometries.len()
    }

    pub fn live_target_sets(&self) -> usize {
        self.target_sets.len()
    }

    pub fn is_live_cube_map(&self, id: CubeMapId) -> bool {
        self.cube_maps.contains(&id)
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn submissions(&self) -> &[Vec<RenderCommand>] {
        &self.submissions
    }

    pub fn last_submission(&self) -> Option<&[RenderCommand]> {
        self.submissions.last().map(Vec::as_slice)
    }

    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
    }

    pub fn presented(&self) -> usize {
        self.presented
    }
}

impl Liveness for HeadlessBackend {
    fn texture(&self, id: TextureId) -> bool {
        self.textures.contains(&id)
    }

    fn cube_map(&self, id: CubeMapId) -> bool {
        self.cube_maps.contains(&id)
    }

    fn geometry(&self, id: GeometryId) -> bool {
        self.geometries.contains(&id)
    }

    fn target(&self, target: RenderTarget) -> bool {
        match target {
            RenderTarget::Frame => true,
            RenderTarget::TargetSet(id) => self.target_sets.contains_key(&id),
        }
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, RenderError> {
        let expected = desc.width as usize * desc.height as usize * 4;
        if desc.width == 0 || desc.height == 0 || desc.pixels.len() != expected {
            return Err(RenderError::creation(
                desc.label,
                format!("expected {} bytes, got {}", expected, desc.pixels.len()),
            ));
        }
        let id = TextureId(self.next());
        self.textures.insert(id);
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn create_cube_map(&mut self, desc: &CubeMapDesc<'_>) -> Result<CubeMapId, RenderError> {
        if desc.resolution == 0 || desc.mip_levels == 0 {
            return Err(RenderError::creation(desc.label, "zero-sized cube map"));
        }
        if let Some(faces) = desc.faces {
            let texel = match desc.format {
                CubeMapFormat::Rgba8Srgb => 4,
                CubeMapFormat::Rgba16Float => 8,
            };
            let expected = (desc.resolution * desc.resolution) as usize * texel;
            if faces.iter().any(|face| face.len() != expected) {
                return Err(RenderError::creation(
                    desc.label,
                    format!("every face needs {} bytes", expected),
                ));
            }
        }
        let id = CubeMapId(self.next());
        self.cube_maps.insert(id);
        Ok(id)
    }

    fn destroy_cube_map(&mut self, id: CubeMapId) {
        self.cube_maps.remove(&id);
    }

    fn create_geometry(&mut self, desc: &GeometryDesc<'_>) -> Result<GeometryId, RenderError> {
        if desc.vertices.is_empty() || desc.indices.is_empty() {
            return Err(RenderError::creation(desc.label, "empty geometry"));
        }
        if desc
            .indices
            .iter()
            .any(|index| *index as usize >= desc.vertices.len())
        {
            return Err(RenderError::creation(desc.label, "index out of range"));
        }
        let id = GeometryId(self.next());
        self.geometries.insert(id);
        Ok(id)
    }

    fn destroy_geometry(&mut self, id: GeometryId) {
        self.geometries.remove(&id);
    }

    fn create_target_set(&mut self, layout: &TargetSetLayout) -> Result<TargetSetId, RenderError> {
        if !layout.is_complete() || self.failing.contains(&layout.kind) {
            return Err(RenderError::IncompleteTargetSet { kind: layout.kind });
        }
        let id = TargetSetId(self.next());
        self.target_sets.insert(id, layout.kind);
        Ok(id)
    }

    fn destroy_target_set(&mut self, id: TargetSetId) {
        self.target_sets.remove(&id);
    }

    fn configure_frame(&mut self, width: u32, height: u32) {
        self.frame_size = (width.max(1), height.max(1));
    }

    fn submit(&mut self, commands: &[RenderCommand]) -> Result<(), RenderError> {
        let live = retain_live(commands, &*self);
        self.submissions.push(live);
        Ok(())
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.presented += 1;
        Ok(())
    }

    fn release_all(&mut self) {
        self.frame_size = (0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::commands::MaterialTextures;
    use crate::renderer::geometry::unit_quad;

    #[test]
    fn ids_are_tracked_until_destroyed() {
        let mut backend = HeadlessBackend::new();
        let (vertices, indices) = unit_quad();
        let geometry = backend
            .create_geometry(&GeometryDesc {
                label: "quad",
                vertices: &vertices,
                indices: &indices,
            })
            .unwrap();
        let texture = backend
            .create_texture(&TextureDesc {
                label: "white",
                width: 1,
                height: 1,
                format: crate::renderer::backend::TextureFormat::Rgba8Srgb,
                pixels: &[255; 4],
            })
            .unwrap();
        assert_eq!(backend.outstanding_handles(), 2);
        backend.destroy_geometry(geometry);
        backend.destroy_texture(texture);
        backend.destroy_texture(texture);
        assert_eq!(backend.outstanding_handles(), 0);
    }

    #[test]
    fn mismatched_pixel_data_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let result = backend.create_texture(&TextureDesc {
            label: "short",
            width: 2,
            height: 2,
            format: crate::renderer::backend::TextureFormat::Rgba8Srgb,
            pixels: &[0; 4],
        });
        assert!(matches!(result, Err(RenderError::ResourceCreation { .. })));
    }

    #[test]
    fn dead_ids_drop_only_their_commands() {
        let mut backend = HeadlessBackend::new();
        let sky = backend
            .create_cube_map(&CubeMapDesc::render_target("sky", 4, 1))
            .unwrap();
        let gone = backend
            .create_cube_map(&CubeMapDesc::render_target("gone", 4, 1))
            .unwrap();
        backend.destroy_cube_map(gone);
        backend
            .submit(&[
                RenderCommand::ConvolveIrradiance {
                    source: gone,
                    target: sky,
                },
                RenderCommand::FilterEnvironment {
                    source: sky,
                    target: sky,
                },
            ])
            .unwrap();
        assert_eq!(
            backend.last_submission().unwrap(),
            &[RenderCommand::FilterEnvironment {
                source: sky,
                target: sky,
            }]
        );
    }

    #[test]
    fn dead_material_drops_the_draws_it_binds() {
        let mut backend = HeadlessBackend::new();
        let (vertices, indices) = unit_quad();
        let geometry = backend
            .create_geometry(&GeometryDesc {
                label: "quad",
                vertices: &vertices,
                indices: &indices,
            })
            .unwrap();
        let mut texture = |label| {
            backend
                .create_texture(&TextureDesc {
                    label,
                    width: 1,
                    height: 1,
                    format: crate::renderer::backend::TextureFormat::Rgba8Srgb,
                    pixels: &[255; 4],
                })
                .unwrap()
        };
        let live = MaterialTextures {
            albedo: texture("live"),
            normal: texture("normal"),
        };
        let dead = MaterialTextures {
            albedo: texture("dead"),
            ..live
        };
        backend.destroy_texture(dead.albedo);

        let draw = RenderCommand::DrawInstanced {
            geometry,
            instances: Vec::new(),
        };
        backend
            .submit(&[
                RenderCommand::BindMaterial(dead),
                draw.clone(),
                RenderCommand::BindMaterial(live),
                draw.clone(),
            ])
            .unwrap();
        assert_eq!(
            backend.last_submission().unwrap(),
            &[RenderCommand::BindMaterial(live), draw]
        );
    }

    #[test]
    fn failing_kinds_only_affect_that_kind() {
        let mut backend = HeadlessBackend::new();
        backend.fail_target_sets(TargetSetKind::Hdr);
        let hdr = TargetSetLayout::new(TargetSetKind::Hdr, 8, 8);
        let geometry = TargetSetLayout::new(TargetSetKind::Geometry, 8, 8);
        assert!(backend.create_target_set(&hdr).is_err());
        assert!(backend.create_target_set(&geometry).is_ok());
        backend.restore_target_sets(TargetSetKind::Hdr);
        assert!(backend.create_target_set(&hdr).is_ok());
    }
}
