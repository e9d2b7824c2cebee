//! The per-frame input protocol.

use std::fmt;
use std::rc::Rc;

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::asset::AssetTag;
use crate::renderer::geometry::Vertex;
use crate::renderer::light_maps::{LightProbe, ProbeId};
use crate::renderer::lights::LightType;
use crate::renderer::material::MaterialProperties;
use crate::renderer::passes::PostPassContext;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderType {
    Deferred,
    /// Blended. Drawn back to front by `sort`, then distance, then `subsort`.
    Forward { subsort: f32, sort: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillboardOrientation {
    /// Faces the eye.
    CameraFacing,
    /// Turns about the vertical axis only.
    Upright,
}

/// Baked material for a user-defined surface.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDescriptor {
    pub albedo: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ambient_occlusion: f32,
    pub emission: f32,
    pub height: f32,
    pub invert_roughness: bool,
    pub albedo_image: Option<AssetTag>,
    pub normal_image: Option<AssetTag>,
}

impl Default for MaterialDescriptor {
    fn default() -> Self {
        Self {
            albedo: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            ambient_occlusion: 1.0,
            emission: 0.0,
            height: 0.0,
            invert_roughness: false,
            albedo_image: None,
            normal_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDescriptor {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub transform: Mat4,
    pub material: MaterialDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkyBoxDescriptor {
    pub color: Vec3,
    pub brightness: f32,
    pub ambient_color: Vec3,
    pub ambient_brightness: f32,
    pub cube_map: AssetTag,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightProbeDescriptor {
    pub id: ProbeId,
    pub probe: LightProbe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightDescriptor {
    pub origin: Vec3,
    pub rotation: Quat,
    pub color: Vec3,
    pub brightness: f32,
    pub attenuation_linear: f32,
    pub attenuation_quadratic: f32,
    pub cutoff: f32,
    pub light_type: LightType,
    pub desire_shadows: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillboardDescriptor {
    pub absolute: bool,
    pub model: Mat4,
    /// Texture-coordinate window as (x, y, width, height).
    pub inset: Option<Vec4>,
    pub properties: MaterialProperties,
    pub albedo_image: AssetTag,
    pub normal_image: Option<AssetTag>,
    pub orientation: BillboardOrientation,
    pub render_type: RenderType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillboardsDescriptor {
    pub absolute: bool,
    pub properties: MaterialProperties,
    pub albedo_image: AssetTag,
    pub normal_image: Option<AssetTag>,
    pub orientation: BillboardOrientation,
    pub render_type: RenderType,
    pub billboards: Vec<(Mat4, Option<Vec4>)>,
}

/// One simulated particle, already advanced by its emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillboardParticle {
    pub position: Vec3,
    pub scale: Vec3,
    /// Roll about the facing axis, in radians.
    pub angle: f32,
    pub color: Vec4,
    pub emission: f32,
    pub inset: Option<Vec4>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillboardParticlesDescriptor {
    pub absolute: bool,
    pub properties: MaterialProperties,
    pub albedo_image: AssetTag,
    pub normal_image: Option<AssetTag>,
    pub orientation: BillboardOrientation,
    pub render_type: RenderType,
    pub particles: Vec<BillboardParticle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticModelSurfaceDescriptor {
    pub absolute: bool,
    pub model: Mat4,
    pub inset: Option<Vec4>,
    pub properties: MaterialProperties,
    pub render_type: RenderType,
    pub static_model: AssetTag,
    pub surface_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticModelDescriptor {
    pub absolute: bool,
    pub model: Mat4,
    pub inset: Option<Vec4>,
    pub properties: MaterialProperties,
    pub render_type: RenderType,
    pub static_model: AssetTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticModelsDescriptor {
    pub absolute: bool,
    pub static_model: AssetTag,
    pub render_type: RenderType,
    pub instances: Vec<(Mat4, Option<Vec4>, MaterialProperties)>,
}

/// A callback run after the frame's forward pass.
#[derive(Clone)]
pub struct PostPass {
    /// Lower orders run first; equal orders keep submission order.
    pub order: i64,
    pub label: String,
    pub callback: Rc<dyn Fn(&mut PostPassContext<'_>)>,
}

impl PostPass {
    pub fn new(order: i64, label: impl Into<String>, callback: impl Fn(&mut PostPassContext<'_>) + 'static) -> Self {
        Self {
            order,
            label: label.into(),
            callback: Rc::new(callback),
        }
    }
}

impl fmt::Debug for PostPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostPass")
            .field("order", &self.order)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl PartialEq for PostPass {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
            && self.label == other.label
            && Rc::ptr_eq(&self.callback, &other.callback)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderMessage {
    CreateUserDefinedStaticModel {
        asset: AssetTag,
        surfaces: Vec<SurfaceDescriptor>,
    },
    DestroyUserDefinedStaticModel {
        asset: AssetTag,
    },
    SkyBox(SkyBoxDescriptor),
    LightProbe(LightProbeDescriptor),
    Light(LightDescriptor),
    Billboard(BillboardDescriptor),
    Billboards(BillboardsDescriptor),
    BillboardParticles(BillboardParticlesDescriptor),
    StaticModelSurface(StaticModelSurfaceDescriptor),
    StaticModel(StaticModelDescriptor),
    StaticModels(StaticModelsDescriptor),
    PostPass(PostPass),
    LoadPackage(String),
    UnloadPackage(String),
    ReloadAssets,
}
