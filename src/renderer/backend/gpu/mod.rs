//! The wgpu implementation of [`GpuBackend`].

mod buffers;
mod context;
mod executor;
mod pipelines;
mod resources;

use std::sync::Arc;

use winit::window::Window;

use crate::renderer::backend::{
    CubeMapDesc, CubeMapFormat, CubeMapId, GeometryDesc, GeometryId, GpuBackend, TargetSetId,
    TextureDesc, TextureId,
};
use crate::renderer::commands::RenderCommand;
use crate::renderer::error::RenderError;
use crate::renderer::framebuffer::TargetSetLayout;
use crate::settings::RenderSettings;

use context::GpuContext;
use executor::Executor;
use resources::{GpuCubeMap, GpuGeometry, GpuTargetSet, GpuTexture, ResourceTable};

pub struct WgpuBackend {
    context: GpuContext,
    resources: ResourceTable,
    /// Pipelines, samplers and the frame target; `None` after release.
    executor: Option<Executor>,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>, settings: &RenderSettings) -> Result<Self, RenderError> {
        let context = GpuContext::new(window, settings).await?;
        let executor = context
            .validated(|device| Executor::new(device, &context.queue, context.config.format))
            .map_err(|reason| RenderError::ShaderBuild {
                label: "pipelines".to_string(),
                reason,
            })?;
        Ok(Self {
            context,
            resources: ResourceTable::default(),
            executor: Some(executor),
        })
    }

    /// Resources still owned by ids.
    pub fn outstanding_handles(&self) -> usize {
        self.resources.len()
    }

    fn check_size(&self, label: &str, width: u32, height: u32) -> Result<(), RenderError> {
        let max = self.context.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::creation(
                label,
                format!("{}x{} is outside 1..={}", width, height, max),
            ));
        }
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, RenderError> {
        self.check_size(desc.label, desc.width, desc.height)?;
        let expected = desc.width as usize * desc.height as usize * 4;
        if desc.pixels.len() != expected {
            return Err(RenderError::creation(
                desc.label,
                format!("expected {} bytes, got {}", expected, desc.pixels.len()),
            ));
        }
        let texture = self
            .context
            .validated(|device| GpuTexture::new(device, &self.context.queue, desc))
            .map_err(|reason| RenderError::creation(desc.label, reason))?;
        let id = TextureId(self.resources.next_id());
        self.resources.textures.insert(id, texture);
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if self.resources.textures.remove(&id).is_some() {
            if let Some(executor) = self.executor.as_mut() {
                executor.forget_texture(id);
            }
        }
    }

    fn create_cube_map(&mut self, desc: &CubeMapDesc<'_>) -> Result<CubeMapId, RenderError> {
        self.check_size(desc.label, desc.resolution, desc.resolution)?;
        let max_mips = 32 - desc.resolution.leading_zeros();
        if desc.mip_levels == 0 || desc.mip_levels > max_mips {
            return Err(RenderError::creation(
                desc.label,
                format!("{} mips for a {}px cube map", desc.mip_levels, desc.resolution),
            ));
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
        let cube = self
            .context
            .validated(|device| GpuCubeMap::new(device, &self.context.queue, desc))
            .map_err(|reason| RenderError::creation(desc.label, reason))?;
        let id = CubeMapId(self.resources.next_id());
        self.resources.cube_maps.insert(id, cube);
        Ok(id)
    }

    fn destroy_cube_map(&mut self, id: CubeMapId) {
        if self.resources.cube_maps.remove(&id).is_some() {
            if let Some(executor) = self.executor.as_mut() {
                executor.forget_cube_map(id);
            }
        }
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
        let geometry = self
            .context
            .validated(|device| GpuGeometry::new(device, desc))
            .map_err(|reason| RenderError::creation(desc.label, reason))?;
        let id = GeometryId(self.resources.next_id());
        self.resources.geometries.insert(id, geometry);
        Ok(id)
    }

    fn destroy_geometry(&mut self, id: GeometryId) {
        self.resources.geometries.remove(&id);
    }

    fn create_target_set(&mut self, layout: &TargetSetLayout) -> Result<TargetSetId, RenderError> {
        let kind = layout.kind;
        if !layout.is_complete() || self.check_size("target set", layout.width, layout.height).is_err() {
            return Err(RenderError::IncompleteTargetSet { kind });
        }
        let target_set = self
            .context
            .validated(|device| GpuTargetSet::new(device, layout))
            .map_err(|reason| {
                log::warn!("{} target set failed validation: {}", kind, reason);
                RenderError::IncompleteTargetSet { kind }
            })?;
        let id = TargetSetId(self.resources.next_id());
        self.resources.target_sets.insert(id, target_set);
        Ok(id)
    }

    fn destroy_target_set(&mut self, id: TargetSetId) {
        if self.resources.target_sets.remove(&id).is_some() {
            if let Some(executor) = self.executor.as_mut() {
                executor.forget_target_set(id);
            }
        }
    }

    fn configure_frame(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        self.context.resize(width, height);
        if let Some(executor) = self.executor.as_mut() {
            executor.configure_frame(&self.context.device, width, height);
        }
    }

    fn submit(&mut self, commands: &[RenderCommand]) -> Result<(), RenderError> {
        let context = &self.context;
        let resources = &self.resources;
        let executor = self
            .executor
            .as_mut()
            .ok_or_else(|| RenderError::Device("backend resources were released".to_string()))?;
        executor.execute(&context.device, &context.queue, resources, commands)
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.context.reconfigure();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let context = &self.context;
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| RenderError::Device("backend resources were released".to_string()))?;
        executor.present(&context.device, &context.queue, &view);
        frame.present();
        Ok(())
    }

    fn release_all(&mut self) {
        if self.resources.len() > 0 {
            log::warn!(
                "{} GPU resources still had ids at release",
                self.resources.len()
            );
        }
        self.executor = None;
    }
}
