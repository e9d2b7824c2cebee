//! Recorded GPU work and the bound state threaded through pass recording.

use glam::Vec3;

use crate::renderer::backend::{CubeMapId, GeometryId, TargetSetId, TextureId};
use crate::renderer::camera::Viewport;
use crate::renderer::light_maps::LightMapArrays;
use crate::renderer::lights::LightArrays;
use crate::renderer::uniforms::{Ambient, InstanceRaw, ViewUniform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The top-level raster framebuffer owned by the backend.
    Frame,
    TargetSet(TargetSetId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Geometry,
    Composite,
    SkyBox,
    Forward,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp<T> {
    Clear(T),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassBegin {
    pub kind: PassKind,
    pub target: RenderTarget,
    pub color: LoadOp<[f32; 4]>,
    pub depth: LoadOp<f32>,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialTextures {
    pub albedo: TextureId,
    pub normal: TextureId,
}

/// Everything a lit full-screen or forward draw reads besides geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Lighting {
    pub lights: LightArrays,
    pub light_maps: LightMapArrays,
    pub ambient: Ambient,
    pub sky_irradiance: Option<CubeMapId>,
    pub sky_environment_filter: Option<CubeMapId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    BeginPass(PassBegin),
    EndPass,
    BindView(ViewUniform),
    BindMaterial(MaterialTextures),
    /// One instanced draw using the bound view and material.
    DrawInstanced {
        geometry: GeometryId,
        instances: Vec<InstanceRaw>,
    },
    /// Full-screen lighting over a geometry target set.
    Composite {
        geometry: TargetSetId,
        lighting: Box<Lighting>,
    },
    SkyBox {
        cube_map: CubeMapId,
        color: Vec3,
        brightness: f32,
    },
    /// One blended instance using the bound view and material.
    DrawForward {
        geometry: GeometryId,
        instance: InstanceRaw,
        lighting: Box<Lighting>,
    },
    CopyDepth {
        from: TargetSetId,
        to: RenderTarget,
    },
    CopyToCubeFace {
        from: TargetSetId,
        cube_map: CubeMapId,
        face: u32,
    },
    ConvolveIrradiance {
        source: CubeMapId,
        target: CubeMapId,
    },
    FilterEnvironment {
        source: CubeMapId,
        target: CubeMapId,
    },
}

/// What the recorded stream has bound so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundState {
    pub pass: Option<PassKind>,
    pub view: Option<ViewUniform>,
    pub material: Option<MaterialTextures>,
}

/// Records commands, keeping [`BoundState`] current and dropping redundant
/// binds. Draws outside a pass are rejected with a warning.
#[derive(Debug, Default)]
pub struct PassEncoder {
    commands: Vec<RenderCommand>,
    bound: BoundState,
}

impl PassEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(&self) -> &BoundState {
        &self.bound
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn begin_pass(&mut self, begin: PassBegin) {
        if let Some(open) = self.bound.pass {
            log::warn!("{:?} pass begun while {:?} pass was open", begin.kind, open);
            self.end_pass();
        }
        self.bound = BoundState {
            pass: Some(begin.kind),
            ..BoundState::default()
        };
        self.commands.push(RenderCommand::BeginPass(begin));
    }

    pub fn end_pass(&mut self) {
        if self.bound.pass.is_some() {
            self.bound = BoundState::default();
            self.commands.push(RenderCommand::EndPass);
        }
    }

    pub fn bind_view(&mut self, view: ViewUniform) {
        if self.bound.view != Some(view) {
            self.bound.view = Some(view);
            self.commands.push(RenderCommand::BindView(view));
        }
    }

    pub fn bind_material(&mut self, textures: MaterialTextures) {
        if self.bound.material != Some(textures) {
            self.bound.material = Some(textures);
            self.commands.push(RenderCommand::BindMaterial(textures));
        }
    }

    fn in_pass(&self, what: &str) -> bool {
        if self.bound.pass.is_none() {
            log::warn!("{} recorded outside of a pass; skipped", what);
            return false;
        }
        true
    }

    pub fn draw_instanced(&mut self, geometry: GeometryId, instances: Vec<InstanceRaw>) {
        if instances.is_empty() || !self.in_pass("instanced draw") {
            return;
        }
        self.commands.push(RenderCommand::DrawInstanced {
            geometry,
            instances,
        });
    }

    pub fn composite(&mut self, geometry: TargetSetId, lighting: Lighting) {
        if self.in_pass("composite") {
            self.commands.push(RenderCommand::Composite {
                geometry,
                lighting: Box::new(lighting),
            });
        }
    }

    pub fn sky_box(&mut self, cube_map: CubeMapId, color: Vec3, brightness: f32) {
        if self.in_pass("sky box") {
            self.commands.push(RenderCommand::SkyBox {
                cube_map,
                color,
                brightness,
            });
        }
    }

    pub fn draw_forward(&mut self, geometry: GeometryId, instance: InstanceRaw, lighting: Lighting) {
        if self.in_pass("forward draw") {
            self.commands.push(RenderCommand::DrawForward {
                geometry,
                instance,
                lighting: Box::new(lighting),
            });
        }
    }

    /// Transfers are recorded between passes; an open pass is closed first.
    fn transfer(&mut self, command: RenderCommand) {
        self.end_pass();
        self.commands.push(command);
    }

    pub fn copy_depth(&mut self, from: TargetSetId, to: RenderTarget) {
        self.transfer(RenderCommand::CopyDepth { from, to });
    }

    pub fn copy_to_cube_face(&mut self, from: TargetSetId, cube_map: CubeMapId, face: u32) {
        self.transfer(RenderCommand::CopyToCubeFace {
            from,
            cube_map,
            face,
        });
    }

    pub fn convolve_irradiance(&mut self, source: CubeMapId, target: CubeMapId) {
        self.transfer(RenderCommand::ConvolveIrradiance { source, target });
    }

    pub fn filter_environment(&mut self, source: CubeMapId, target: CubeMapId) {
        self.transfer(RenderCommand::FilterEnvironment { source, target });
    }

    pub fn finish(&mut self) -> Vec<RenderCommand> {
        self.end_pass();
        std::mem::take(&mut self.commands)
    }
}
