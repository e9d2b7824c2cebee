//! The categorizer driven directly against a package cache.
mod common;

use common::*;
use glam::{Mat4, Quat, Vec3, Vec4};
use wgpu_deferred::asset::{FallbackTextures, PackageCache};
use wgpu_deferred::renderer::backend::{GeometryDesc, GpuBackend, TextureDesc, TextureFormat};
use wgpu_deferred::renderer::categorize::{categorize, CategorizeContext};
use wgpu_deferred::renderer::diagnostics::WarnOnce;
use wgpu_deferred::renderer::geometry::{cube, unit_quad};
use wgpu_deferred::renderer::message::{
    BillboardDescriptor, BillboardOrientation, MaterialDescriptor, PostPass, RenderMessage,
    StaticModelSurfaceDescriptor, SurfaceDescriptor,
};
use wgpu_deferred::renderer::tasks::RenderTasks;
use wgpu_deferred::renderer::{GeometryId, HeadlessBackend, MaterialProperties, ProbeId, RenderType};

struct Harness {
    backend: HeadlessBackend,
    packages: PackageCache,
    quad: GeometryId,
    warnings: WarnOnce,
}

impl Harness {
    fn new() -> Self {
        let mut backend = HeadlessBackend::new();
        let mut texture = |label| {
            backend
                .create_texture(&TextureDesc {
                    label,
                    width: 1,
                    height: 1,
                    format: TextureFormat::Rgba8Linear,
                    pixels: &[255; 4],
                })
                .unwrap()
        };
        let fallback = FallbackTextures {
            albedo: texture("albedo"),
            normal: texture("normal"),
        };
        let (vertices, indices) = unit_quad();
        let quad = backend
            .create_geometry(&GeometryDesc {
                label: "quad",
                vertices: &vertices,
                indices: &indices,
            })
            .unwrap();

        let mut packages = PackageCache::new(no_assets(), fallback);
        let (vertices, indices) = cube();
        let surface = SurfaceDescriptor {
            vertices,
            indices,
            transform: Mat4::IDENTITY,
            material: MaterialDescriptor::default(),
        };
        packages
            .create_user_defined_static_model(&mut backend, &block_tag(), &[surface])
            .unwrap();

        Self {
            backend,
            packages,
            quad,
            warnings: WarnOnce::new(),
        }
    }

    fn categorize(&mut self, messages: &[RenderMessage], tasks: &mut RenderTasks) -> Vec<PostPass> {
        let mut context = CategorizeContext {
            backend: &mut self.backend,
            packages: &mut self.packages,
            quad: self.quad,
            warnings: &mut self.warnings,
        };
        categorize(messages, tasks, Quat::IDENTITY, &mut context)
    }
}

fn billboard(position: Vec3, render_type: RenderType) -> RenderMessage {
    RenderMessage::Billboard(BillboardDescriptor {
        absolute: false,
        model: Mat4::from_translation(position),
        inset: Some(Vec4::new(0.0, 0.0, 0.5, 0.5)),
        properties: MaterialProperties::EMPTY,
        albedo_image: wgpu_deferred::asset::AssetTag::new("fx", "spark"),
        normal_image: None,
        orientation: BillboardOrientation::CameraFacing,
        render_type,
    })
}

fn mixed_scene() -> Vec<RenderMessage> {
    vec![
        block_grid(3),
        block_at(Vec3::new(0.0, 0.0, -3.0), translucent(1.0)),
        billboard(Vec3::Y, RenderType::Deferred),
        billboard(Vec3::X, translucent(0.0)),
        point_light(Vec3::ONE),
        probe_at(4, Vec3::ZERO),
        sky_box(),
    ]
}

#[test]
fn same_messages_yield_equal_task_stores() {
    let mut harness = Harness::new();
    let messages = mixed_scene();

    let mut first = RenderTasks::new();
    let mut second = RenderTasks::new();
    harness.categorize(&messages, &mut first);
    harness.categorize(&messages, &mut second);

    assert_eq!(first, second);
    assert_eq!(first.deferred_instance_count(), 4);
    assert_eq!(first.forward_relative.len(), 2);
    assert_eq!(first.lights.len(), 1);
    assert_eq!(first.light_probes.len(), 1);
    // The sky box cube map does not resolve, so it is skipped.
    assert!(first.sky_box().is_none());
}

#[test]
fn billboards_share_the_unit_quad() {
    let mut harness = Harness::new();
    let mut tasks = RenderTasks::new();
    harness.categorize(
        &[
            billboard(Vec3::ZERO, RenderType::Deferred),
            billboard(Vec3::X, RenderType::Deferred),
        ],
        &mut tasks,
    );

    assert_eq!(tasks.deferred_relative.len(), 1);
    let (surface, instances) = tasks.deferred_relative.iter().next().unwrap();
    assert_eq!(surface.geometry, harness.quad);
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].tex_coords_offset, Vec4::new(0.0, 0.0, 0.5, 0.5));
}

#[test]
fn duplicate_probe_replaces_and_warns_once() {
    let mut harness = Harness::new();
    let later = Vec3::new(0.0, 5.0, 0.0);
    let messages = [probe_at(7, Vec3::ZERO), probe_at(7, later)];

    let mut tasks = RenderTasks::new();
    harness.categorize(&messages, &mut tasks);
    assert_eq!(tasks.light_probes.len(), 1);
    assert_eq!(tasks.light_probes[&ProbeId(7)].origin, later);

    let before = harness.warnings.count();
    tasks.clear();
    harness.categorize(&messages, &mut tasks);
    assert_eq!(harness.warnings.count(), before);
}

#[test]
fn out_of_range_surface_index_is_ignored() {
    let mut harness = Harness::new();
    let mut tasks = RenderTasks::new();
    let surface = |index| {
        RenderMessage::StaticModelSurface(StaticModelSurfaceDescriptor {
            absolute: false,
            model: Mat4::IDENTITY,
            inset: None,
            properties: MaterialProperties::EMPTY,
            render_type: RenderType::Deferred,
            static_model: block_tag(),
            surface_index: index,
        })
    };
    harness.categorize(&[surface(0), surface(3)], &mut tasks);
    assert_eq!(tasks.deferred_instance_count(), 1);
}

#[test]
fn absolute_entries_are_kept_apart() {
    let mut harness = Harness::new();
    let mut tasks = RenderTasks::new();
    let mut absolute = billboard(Vec3::ZERO, translucent(0.0));
    if let RenderMessage::Billboard(descriptor) = &mut absolute {
        descriptor.absolute = true;
    }
    harness.categorize(&[absolute, billboard(Vec3::ZERO, translucent(0.0))], &mut tasks);
    assert_eq!(tasks.forward_absolute.len(), 1);
    assert_eq!(tasks.forward_relative.len(), 1);
}

#[test]
fn post_passes_come_back_sorted_and_stable() {
    let mut harness = Harness::new();
    let mut tasks = RenderTasks::new();
    let pass = |order, label: &str| RenderMessage::PostPass(PostPass::new(order, label, |_| {}));
    let post_passes = harness.categorize(
        &[pass(2, "fog"), pass(-1, "outline"), pass(2, "bloom")],
        &mut tasks,
    );
    let labels: Vec<&str> = post_passes.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, vec!["outline", "fog", "bloom"]);
}
