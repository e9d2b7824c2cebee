//! Shared scene builders for the headless integration tests.
#![allow(dead_code)]

use std::path::PathBuf;

use glam::{Mat4, Quat, Vec3, Vec4};
use wgpu_deferred::asset::{AssetResolver, AssetTag, DirectoryResolver, ResolvedAsset};
use wgpu_deferred::renderer::geometry::{cube, Aabb};
use wgpu_deferred::renderer::message::{
    LightDescriptor, LightProbeDescriptor, MaterialDescriptor, SkyBoxDescriptor,
    StaticModelDescriptor, StaticModelsDescriptor, SurfaceDescriptor,
};
use wgpu_deferred::renderer::{
    HeadlessBackend, LightProbe, LightType, MaterialProperties, ProbeId, RenderMessage,
    RenderType, Renderer,
};
use wgpu_deferred::settings::RenderSettings;

pub const SKY_PACKAGE: &str = "sky";
pub const USER_PACKAGE: &str = "user";

pub fn settings() -> RenderSettings {
    RenderSettings {
        light_map_resolution: 16,
        irradiance_resolution: 4,
        environment_filter_resolution: 8,
        environment_filter_mips: 3,
        ..RenderSettings::default()
    }
}

pub fn no_assets() -> Box<dyn AssetResolver> {
    Box::new(|_: &AssetTag| -> Option<ResolvedAsset> { None })
}

pub fn renderer(resolver: Box<dyn AssetResolver>) -> Renderer<HeadlessBackend> {
    Renderer::new(HeadlessBackend::new(), settings(), resolver).unwrap()
}

pub fn render(renderer: &mut Renderer<HeadlessBackend>, messages: &[RenderMessage]) {
    renderer.render(Vec3::new(0.0, 1.0, 8.0), Quat::IDENTITY, (64, 48), messages);
}

/// A cube-map package on disk: `<root>/sky/day.cubemap.json` plus six faces.
pub struct SkyFixture {
    pub root: PathBuf,
}

impl SkyFixture {
    pub fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "wgpu-deferred-{}-{}",
            name,
            std::process::id()
        ));
        let package = root.join(SKY_PACKAGE);
        std::fs::create_dir_all(&package).unwrap();

        let faces = ["px", "nx", "py", "ny", "pz", "nz"].map(|face| format!("{face}.png"));
        for face in &faces {
            image::RgbaImage::from_pixel(2, 2, image::Rgba([40, 80, 160, 255]))
                .save(package.join(face))
                .unwrap();
        }
        let manifest = serde_json::json!({ "faces": faces });
        std::fs::write(package.join("day.cubemap.json"), manifest.to_string()).unwrap();
        Self { root }
    }

    pub fn resolver(&self) -> Box<dyn AssetResolver> {
        Box::new(DirectoryResolver::new(self.root.clone()))
    }
}

impl Drop for SkyFixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

pub fn sky_tag() -> AssetTag {
    AssetTag::new(SKY_PACKAGE, "day")
}

pub fn block_tag() -> AssetTag {
    AssetTag::new(USER_PACKAGE, "block")
}

pub fn create_block() -> RenderMessage {
    create_block_with(MaterialDescriptor::default())
}

pub fn create_block_with(material: MaterialDescriptor) -> RenderMessage {
    let (vertices, indices) = cube();
    RenderMessage::CreateUserDefinedStaticModel {
        asset: block_tag(),
        surfaces: vec![SurfaceDescriptor {
            vertices,
            indices,
            transform: Mat4::IDENTITY,
            material,
        }],
    }
}

pub fn sky_box() -> RenderMessage {
    RenderMessage::SkyBox(SkyBoxDescriptor {
        color: Vec3::ONE,
        brightness: 1.0,
        ambient_color: Vec3::ONE,
        ambient_brightness: 0.2,
        cube_map: sky_tag(),
    })
}

pub fn probe_at(id: u64, origin: Vec3) -> RenderMessage {
    RenderMessage::LightProbe(LightProbeDescriptor {
        id: ProbeId(id),
        probe: LightProbe {
            enabled: true,
            origin,
            bounds: Aabb::new(origin - Vec3::splat(4.0), origin + Vec3::splat(4.0)),
            ambient_color: Vec3::ONE,
            ambient_brightness: 0.1,
            stale: false,
        },
    })
}

pub fn point_light(origin: Vec3) -> RenderMessage {
    RenderMessage::Light(LightDescriptor {
        origin,
        rotation: Quat::IDENTITY,
        color: Vec3::ONE,
        brightness: 1.0,
        attenuation_linear: 0.1,
        attenuation_quadratic: 0.05,
        cutoff: 0.0,
        light_type: LightType::Point,
        desire_shadows: false,
    })
}

pub fn block_at(position: Vec3, render_type: RenderType) -> RenderMessage {
    RenderMessage::StaticModel(StaticModelDescriptor {
        absolute: false,
        model: Mat4::from_translation(position),
        inset: None,
        properties: MaterialProperties::EMPTY,
        render_type,
        static_model: block_tag(),
    })
}

pub fn translucent(sort: f32) -> RenderType {
    RenderType::Forward { subsort: 0.0, sort }
}

pub fn block_grid(count: usize) -> RenderMessage {
    let instances = (0..count)
        .map(|i| {
            (
                Mat4::from_translation(Vec3::new(i as f32 * 2.0, 0.0, 0.0)),
                None,
                MaterialProperties {
                    albedo: Some(Vec4::new(1.0, 0.5, 0.2, 1.0)),
                    ..MaterialProperties::EMPTY
                },
            )
        })
        .collect();
    RenderMessage::StaticModels(StaticModelsDescriptor {
        absolute: false,
        static_model: block_tag(),
        render_type: RenderType::Deferred,
        instances,
    })
}
