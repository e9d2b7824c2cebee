//! The seam between frame recording and the GPU.
//!
//! Everything above this module records [`RenderCommand`]s and talks about
//! resources through opaque ids. A backend owns the real objects behind those
//! ids and executes finished command lists in order.

pub mod headless;
pub mod gpu;

use crate::renderer::commands::{Lighting, RenderCommand, RenderTarget};
use crate::renderer::error::RenderError;
use crate::renderer::framebuffer::TargetSetLayout;
use crate::renderer::geometry::Vertex;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

resource_id!(
    /// A sampled 2D texture.
    TextureId
);
resource_id!(
    /// A six-face cube texture, optionally mipmapped.
    CubeMapId
);
resource_id!(
    /// Vertex and index buffers for one surface.
    GeometryId
);
resource_id!(
    /// A framebuffer: color attachments plus one depth attachment.
    TargetSetId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// Color data, decoded from sRGB on sampling.
    Rgba8Srgb,
    /// Linear data such as normal maps.
    Rgba8Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeMapFormat {
    Rgba8Srgb,
    Rgba16Float,
}

pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Tightly packed RGBA8 rows.
    pub pixels: &'a [u8],
}

pub struct CubeMapDesc<'a> {
    pub label: &'a str,
    pub resolution: u32,
    pub mip_levels: u32,
    pub format: CubeMapFormat,
    /// Face data for mip 0 in +X, -X, +Y, -Y, +Z, -Z order. `None` leaves the
    /// cube uninitialised so it can be rendered into.
    pub faces: Option<[&'a [u8]; 6]>,
}

impl<'a> CubeMapDesc<'a> {
    pub fn render_target(label: &'a str, resolution: u32, mip_levels: u32) -> Self {
        Self {
            label,
            resolution,
            mip_levels,
            format: CubeMapFormat::Rgba16Float,
            faces: None,
        }
    }
}

pub struct GeometryDesc<'a> {
    pub label: &'a str,
    pub vertices: &'a [Vertex],
    pub indices: &'a [u32],
}

/// Everything the renderer needs from a graphics device.
///
/// Creation calls return errors instead of panicking so that callers can
/// degrade per resource. Destroying an unknown id is a no-op.
pub trait GpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, RenderError>;
    fn destroy_texture(&mut self, id: TextureId);

    fn create_cube_map(&mut self, desc: &CubeMapDesc<'_>) -> Result<CubeMapId, RenderError>;
    fn destroy_cube_map(&mut self, id: CubeMapId);

    fn create_geometry(&mut self, desc: &GeometryDesc<'_>) -> Result<GeometryId, RenderError>;
    fn destroy_geometry(&mut self, id: GeometryId);

    /// Creates and validates a framebuffer. Incomplete sets are reported as
    /// [`RenderError::IncompleteTargetSet`].
    fn create_target_set(&mut self, layout: &TargetSetLayout) -> Result<TargetSetId, RenderError>;
    fn destroy_target_set(&mut self, id: TargetSetId);

    /// Resizes the top-level raster framebuffer if needed.
    fn configure_frame(&mut self, width: u32, height: u32);

    /// Executes a finished command list in order. Commands naming released
    /// resources are skipped one by one.
    fn submit(&mut self, commands: &[RenderCommand]) -> Result<(), RenderError>;

    /// Shows the most recently rendered top-level frame.
    fn present(&mut self) -> Result<(), RenderError>;

    /// Drops backend-owned objects that no id refers to: pipelines, shaders,
    /// samplers and the frame targets.
    fn release_all(&mut self);
}

/// Answers whether an id still names a live backend object.
pub(crate) trait Liveness {
    fn texture(&self, id: TextureId) -> bool;
    fn cube_map(&self, id: CubeMapId) -> bool;
    fn geometry(&self, id: GeometryId) -> bool;
    fn target(&self, target: RenderTarget) -> bool;
}

/// Copies `commands` without the ones that name dead resources.
///
/// A pass whose target is gone is dropped up to its `EndPass`. A dead
/// material bind drops the draws that follow it until the next bind. Dead
/// cubes in a lighting block are disabled rather than failing the draw.
pub(crate) fn retain_live(commands: &[RenderCommand], live: &impl Liveness) -> Vec<RenderCommand> {
    let mut kept = Vec::with_capacity(commands.len());
    let mut skipped = 0;
    let mut in_dead_pass = false;
    let mut material_live = true;
    for command in commands {
        if in_dead_pass {
            in_dead_pass = !matches!(command, RenderCommand::EndPass);
            skipped += 1;
            continue;
        }
        let target_set = |id: TargetSetId| live.target(RenderTarget::TargetSet(id));
        let keep = match command {
            RenderCommand::BeginPass(begin) => {
                material_live = true;
                in_dead_pass = !live.target(begin.target);
                !in_dead_pass
            }
            RenderCommand::EndPass | RenderCommand::BindView(_) => true,
            RenderCommand::BindMaterial(textures) => {
                material_live = live.texture(textures.albedo) && live.texture(textures.normal);
                material_live
            }
            RenderCommand::DrawInstanced { geometry, .. }
            | RenderCommand::DrawForward { geometry, .. } => {
                material_live && live.geometry(*geometry)
            }
            RenderCommand::Composite { geometry, .. } => target_set(*geometry),
            RenderCommand::SkyBox { cube_map, .. } => live.cube_map(*cube_map),
            RenderCommand::CopyDepth { from, to } => target_set(*from) && live.target(*to),
            RenderCommand::CopyToCubeFace { from, cube_map, .. } => {
                target_set(*from) && live.cube_map(*cube_map)
            }
            RenderCommand::ConvolveIrradiance { source, target }
            | RenderCommand::FilterEnvironment { source, target } => {
                live.cube_map(*source) && live.cube_map(*target)
            }
        };
        if !keep {
            skipped += 1;
            continue;
        }
        let mut command = command.clone();
        if let RenderCommand::Composite { lighting, .. } | RenderCommand::DrawForward { lighting, .. } =
            &mut command
        {
            disable_dead_cubes(lighting, live);
        }
        kept.push(command);
    }
    if skipped > 0 {
        log::warn!("Skipped {} commands naming released resources", skipped);
    }
    kept
}

fn disable_dead_cubes(lighting: &mut Lighting, live: &impl Liveness) {
    let dead = |id: &Option<CubeMapId>| id.is_some_and(|id| !live.cube_map(id));
    if dead(&lighting.sky_irradiance) || dead(&lighting.sky_environment_filter) {
        lighting.sky_irradiance = None;
        lighting.sky_environment_filter = None;
    }
    let maps = &mut lighting.light_maps;
    for slot in 0..maps.len() {
        if dead(&maps.irradiance_maps[slot]) || dead(&maps.environment_filter_maps[slot]) {
            maps.enableds[slot] = false;
            maps.irradiance_maps[slot] = None;
            maps.environment_filter_maps[slot] = None;
        }
    }
}
