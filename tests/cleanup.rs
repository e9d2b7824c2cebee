//! Resource ownership across frames, package changes and clean-up.
mod common;

use common::*;
use glam::Vec3;
use wgpu_deferred::asset::AssetTag;
use wgpu_deferred::renderer::commands::RenderCommand;
use wgpu_deferred::renderer::message::{MaterialDescriptor, RenderMessage};
use wgpu_deferred::renderer::{CubeMapId, RenderType, TextureId};

fn sky_cube_map(commands: &[RenderCommand]) -> Option<CubeMapId> {
    commands.iter().find_map(|c| match c {
        RenderCommand::SkyBox { cube_map, .. } => Some(*cube_map),
        _ => None,
    })
}

fn bound_albedo(commands: &[RenderCommand]) -> Option<TextureId> {
    commands.iter().find_map(|c| match c {
        RenderCommand::BindMaterial(textures) => Some(textures.albedo),
        _ => None,
    })
}

fn draw_count(commands: &[RenderCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, RenderCommand::DrawInstanced { .. }))
        .count()
}

/// A block whose albedo is one of the sky package's face images.
fn create_face_block() -> RenderMessage {
    create_block_with(MaterialDescriptor {
        albedo_image: Some(AssetTag::new(SKY_PACKAGE, "px")),
        ..MaterialDescriptor::default()
    })
}

#[test]
fn clean_up_releases_every_handle() {
    let sky = SkyFixture::new("clean-up");
    let mut renderer = renderer(sky.resolver());
    render(
        &mut renderer,
        &[
            create_block(),
            sky_box(),
            probe_at(1, Vec3::ZERO),
            probe_at(2, Vec3::X * 5.0),
            point_light(Vec3::Y),
            block_grid(3),
            block_at(Vec3::Z, translucent(0.0)),
        ],
    );
    assert!(renderer.backend().outstanding_handles() > 0);

    renderer.clean_up();
    assert_eq!(renderer.backend().outstanding_handles(), 0);

    // A second clean-up and a late frame are both harmless.
    renderer.clean_up();
    let submitted = renderer.backend().submissions().len();
    render(&mut renderer, &[sky_box()]);
    assert_eq!(renderer.backend().submissions().len(), submitted);
    assert_eq!(renderer.backend().outstanding_handles(), 0);
}

#[test]
fn unloaded_package_outlives_its_frame() {
    let sky = SkyFixture::new("unload");
    let mut renderer = renderer(sky.resolver());
    render(
        &mut renderer,
        &[sky_box(), RenderMessage::UnloadPackage(SKY_PACKAGE.to_string())],
    );

    // The frame referenced the cube map and was still accepted.
    let frame = renderer.backend().last_submission().unwrap();
    let cube_map = sky_cube_map(frame).unwrap();
    assert!(!renderer.backend().is_live_cube_map(cube_map));
    assert!(!renderer.packages().is_loaded(&sky_tag()));

    // Referencing it again loads a fresh copy.
    render(&mut renderer, &[sky_box()]);
    let reloaded = sky_cube_map(renderer.backend().last_submission().unwrap()).unwrap();
    assert_ne!(reloaded, cube_map);
    assert!(renderer.backend().is_live_cube_map(reloaded));
}

#[test]
fn load_package_is_eager() {
    let sky = SkyFixture::new("load");
    let mut renderer = renderer(sky.resolver());
    render(
        &mut renderer,
        &[RenderMessage::LoadPackage(SKY_PACKAGE.to_string())],
    );
    assert!(renderer.packages().is_loaded(&sky_tag()));
    // The cube map faces are plain textures too.
    assert_eq!(renderer.packages().loaded_count(), 7);
}

#[test]
fn reload_replaces_file_backed_assets() {
    let sky = SkyFixture::new("reload");
    let mut renderer = renderer(sky.resolver());
    render(&mut renderer, &[create_block(), sky_box()]);
    let first = sky_cube_map(renderer.backend().last_submission().unwrap()).unwrap();
    let handles = renderer.backend().outstanding_handles();

    render(
        &mut renderer,
        &[
            RenderMessage::ReloadAssets,
            sky_box(),
            block_at(Vec3::ZERO, RenderType::Deferred),
        ],
    );
    let second = sky_cube_map(renderer.backend().last_submission().unwrap()).unwrap();
    assert_ne!(first, second);
    assert!(!renderer.backend().is_live_cube_map(first));
    assert!(renderer.packages().is_loaded(&block_tag()));
    assert_eq!(renderer.backend().outstanding_handles(), handles);
}

#[test]
fn destroyed_user_model_is_released_after_submission() {
    let mut renderer = renderer(no_assets());
    render(&mut renderer, &[create_block()]);
    let geometries = renderer.backend().live_geometries();

    render(
        &mut renderer,
        &[
            block_at(Vec3::ZERO, RenderType::Deferred),
            RenderMessage::DestroyUserDefinedStaticModel { asset: block_tag() },
        ],
    );
    assert_eq!(renderer.last_frame_stats().deferred_instances, 1);
    assert_eq!(renderer.backend().live_geometries(), geometries - 1);
    assert!(!renderer.packages().is_loaded(&block_tag()));
}

#[test]
fn replacing_a_user_model_frees_the_old_one() {
    let mut renderer = renderer(no_assets());
    render(&mut renderer, &[create_block()]);
    let geometries = renderer.backend().live_geometries();

    render(&mut renderer, &[create_block()]);
    assert_eq!(renderer.backend().live_geometries(), geometries);
    assert!(renderer.packages().is_loaded(&block_tag()));
}

#[test]
fn user_model_rebinds_textures_of_an_unloaded_package() {
    let sky = SkyFixture::new("borrowed-unload");
    let mut renderer = renderer(sky.resolver());
    render(
        &mut renderer,
        &[create_face_block(), block_at(Vec3::ZERO, RenderType::Deferred)],
    );
    let first = bound_albedo(renderer.backend().last_submission().unwrap()).unwrap();
    assert_ne!(first, renderer.packages().fallback().albedo);

    render(
        &mut renderer,
        &[RenderMessage::UnloadPackage(SKY_PACKAGE.to_string())],
    );
    let submitted = renderer.backend().submissions().len();

    render(
        &mut renderer,
        &[block_at(Vec3::ZERO, RenderType::Deferred), point_light(Vec3::Y)],
    );
    assert_eq!(renderer.backend().submissions().len(), submitted + 1);
    let frame = renderer.backend().last_submission().unwrap();
    let second = bound_albedo(frame).unwrap();
    assert_ne!(second, first);
    assert_eq!(draw_count(frame), 1);
    assert!(frame
        .iter()
        .any(|c| matches!(c, RenderCommand::Composite { lighting, .. } if lighting.lights.enabled_count() == 1)));
}

#[test]
fn user_model_rebinds_textures_after_reload() {
    let sky = SkyFixture::new("borrowed-reload");
    let mut renderer = renderer(sky.resolver());
    render(
        &mut renderer,
        &[create_face_block(), block_at(Vec3::ZERO, RenderType::Deferred)],
    );
    let first = bound_albedo(renderer.backend().last_submission().unwrap()).unwrap();

    render(
        &mut renderer,
        &[
            RenderMessage::ReloadAssets,
            block_at(Vec3::ZERO, RenderType::Deferred),
        ],
    );
    let frame = renderer.backend().last_submission().unwrap();
    assert_ne!(bound_albedo(frame).unwrap(), first);
    assert_eq!(draw_count(frame), 1);
}

#[test]
fn missing_borrowed_texture_falls_back_to_white() {
    let sky = SkyFixture::new("borrowed-missing");
    let mut renderer = renderer(sky.resolver());
    render(&mut renderer, &[create_face_block()]);
    std::fs::remove_dir_all(sky.root.join(SKY_PACKAGE)).unwrap();

    render(
        &mut renderer,
        &[
            RenderMessage::UnloadPackage(SKY_PACKAGE.to_string()),
            block_at(Vec3::ZERO, RenderType::Deferred),
        ],
    );
    let frame = renderer.backend().last_submission().unwrap();
    assert_eq!(
        bound_albedo(frame),
        Some(renderer.packages().fallback().albedo)
    );
    assert_eq!(draw_count(frame), 1);
}
