pub mod backend;
pub mod bake;
pub mod camera;
pub mod categorize;
pub mod commands;
pub mod diagnostics;
pub mod error;
pub mod framebuffer;
pub mod geometry;
pub mod light_maps;
pub mod lights;
pub mod material;
pub mod message;
pub mod passes;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod surface;
pub mod tasks;
pub mod uniforms;

pub use backend::gpu::WgpuBackend;
pub use backend::headless::HeadlessBackend;
pub use backend::{CubeMapId, GeometryId, GpuBackend, TargetSetId, TextureId};
pub use camera::{Lens, Viewpoint, Viewport};
pub use error::RenderError;
pub use framebuffer::{create_target_set, destroy_target_set, TargetSet, TargetSetKind};
pub use geometry::{Aabb, Vertex};
pub use light_maps::{LightProbe, ProbeId};
pub use lights::{Light, LightType};
pub use material::MaterialProperties;
pub use message::{RenderMessage, RenderType};
pub use renderer::{Renderer, RendererStats};
