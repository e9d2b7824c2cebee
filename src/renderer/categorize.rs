//! Sorts one frame's messages into the render task store.

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::asset::{AssetTag, PackageCache};
use crate::renderer::backend::{GeometryId, GpuBackend};
use crate::renderer::diagnostics::WarnOnce;
use crate::renderer::lights::{Light, SortableLight};
use crate::renderer::material::{MaterialProperties, SurfaceFlags, SurfaceMaterial};
use crate::renderer::message::{
    BillboardOrientation, LightDescriptor, PostPass, RenderMessage, RenderType,
};
use crate::renderer::surface::Surface;
use crate::renderer::tasks::{DeferredInstance, ForwardInstance, RenderTasks, SkyBox};

/// Collaborators the categorizer may touch while reading messages.
pub struct CategorizeContext<'a> {
    pub backend: &'a mut dyn GpuBackend,
    pub packages: &'a mut PackageCache,
    /// The shared unit quad used for every billboard.
    pub quad: GeometryId,
    pub warnings: &'a mut WarnOnce,
}

/// Reads `messages` once, in order, filling `tasks`.
///
/// Returns the post passes sorted by order; equal orders keep submission
/// order.
pub fn categorize(
    messages: &[RenderMessage],
    tasks: &mut RenderTasks,
    eye_rotation: Quat,
    ctx: &mut CategorizeContext<'_>,
) -> Vec<PostPass> {
    let mut post_passes = Vec::new();

    for message in messages {
        match message {
            RenderMessage::CreateUserDefinedStaticModel { asset, surfaces } => {
                if let Err(err) =
                    ctx.packages
                        .create_user_defined_static_model(ctx.backend, asset, surfaces)
                {
                    log::error!("User-defined model {} not created: {}", asset, err);
                }
            }
            RenderMessage::DestroyUserDefinedStaticModel { asset } => {
                ctx.packages.destroy_user_defined_static_model(asset);
            }
            RenderMessage::SkyBox(sky_box) => {
                match ctx.packages.cube_map(ctx.backend, &sky_box.cube_map) {
                    Some(cube_map) => tasks.sky_boxes.push(SkyBox {
                        color: sky_box.color,
                        brightness: sky_box.brightness,
                        ambient_color: sky_box.ambient_color,
                        ambient_brightness: sky_box.ambient_brightness,
                        cube_map,
                    }),
                    None => {
                        ctx.warnings.warn(format!(
                            "Sky box cube map {} is unavailable; sky box skipped",
                            sky_box.cube_map
                        ));
                    }
                }
            }
            RenderMessage::LightProbe(probe) => {
                if tasks.light_probes.insert(probe.id, probe.probe).is_some() {
                    ctx.warnings.warn(format!(
                        "Multiple light probes with {} in one frame; the last one wins",
                        probe.id
                    ));
                }
            }
            RenderMessage::Light(light) => {
                let order = tasks.lights.len();
                tasks.lights.push(SortableLight::new(to_light(light), order));
            }
            RenderMessage::Billboard(billboard) => {
                let surface = billboard_surface(ctx, &billboard.albedo_image, billboard.normal_image.as_ref());
                let rotation = billboard_rotation(billboard.orientation, eye_rotation);
                push_surface(
                    tasks,
                    billboard.absolute,
                    billboard.render_type,
                    surface,
                    orient(billboard.model, rotation),
                    billboard.inset,
                    billboard.properties,
                );
            }
            RenderMessage::Billboards(billboards) => {
                let surface = billboard_surface(ctx, &billboards.albedo_image, billboards.normal_image.as_ref());
                let rotation = billboard_rotation(billboards.orientation, eye_rotation);
                for (model, inset) in &billboards.billboards {
                    push_surface(
                        tasks,
                        billboards.absolute,
                        billboards.render_type,
                        surface,
                        orient(*model, rotation),
                        *inset,
                        billboards.properties,
                    );
                }
            }
            RenderMessage::BillboardParticles(particles) => {
                let surface = billboard_surface(ctx, &particles.albedo_image, particles.normal_image.as_ref());
                let rotation = billboard_rotation(particles.orientation, eye_rotation);
                for particle in &particles.particles {
                    let model = Mat4::from_scale_rotation_translation(
                        particle.scale,
                        rotation * Quat::from_rotation_z(particle.angle),
                        particle.position,
                    );
                    let properties = MaterialProperties {
                        albedo: Some(particles.properties.albedo.unwrap_or(Vec4::ONE) * particle.color),
                        emission: Some(particle.emission),
                        ..particles.properties
                    };
                    push_surface(
                        tasks,
                        particles.absolute,
                        particles.render_type,
                        surface,
                        model,
                        particle.inset,
                        properties,
                    );
                }
            }
            RenderMessage::StaticModelSurface(descriptor) => {
                let Some(model) = ctx.packages.static_model(ctx.backend, &descriptor.static_model) else {
                    continue;
                };
                match model.surfaces.get(descriptor.surface_index) {
                    Some(model_surface) => push_surface(
                        tasks,
                        descriptor.absolute,
                        descriptor.render_type,
                        model_surface.surface,
                        descriptor.model * model_surface.transform,
                        descriptor.inset,
                        descriptor.properties,
                    ),
                    None => {
                        let count = model.surfaces.len();
                        ctx.warnings.warn(format!(
                            "Surface index {} is out of range for {} ({} surfaces); ignored",
                            descriptor.surface_index, descriptor.static_model, count
                        ));
                    }
                }
            }
            RenderMessage::StaticModel(descriptor) => {
                let Some(model) = ctx.packages.static_model(ctx.backend, &descriptor.static_model) else {
                    continue;
                };
                for model_surface in &model.surfaces {
                    push_surface(
                        tasks,
                        descriptor.absolute,
                        descriptor.render_type,
                        model_surface.surface,
                        descriptor.model * model_surface.transform,
                        descriptor.inset,
                        descriptor.properties,
                    );
                }
            }
            RenderMessage::StaticModels(descriptor) => {
                let Some(model) = ctx.packages.static_model(ctx.backend, &descriptor.static_model) else {
                    continue;
                };
                for (transform, inset, properties) in &descriptor.instances {
                    for model_surface in &model.surfaces {
                        push_surface(
                            tasks,
                            descriptor.absolute,
                            descriptor.render_type,
                            model_surface.surface,
                            *transform * model_surface.transform,
                            *inset,
                            *properties,
                        );
                    }
                }
            }
            RenderMessage::PostPass(post_pass) => post_passes.push(post_pass.clone()),
            RenderMessage::LoadPackage(package) => ctx.packages.load_package(ctx.backend, package),
            RenderMessage::UnloadPackage(package) => ctx.packages.unload_package(package),
            RenderMessage::ReloadAssets => ctx.packages.reload(ctx.backend),
        }
    }

    post_passes.sort_by_key(|post_pass| post_pass.order);
    post_passes
}

fn to_light(light: &LightDescriptor) -> Light {
    Light {
        origin: light.origin,
        direction: Light::direction_from_rotation(light.rotation),
        color: light.color,
        brightness: light.brightness,
        attenuation_linear: light.attenuation_linear,
        attenuation_quadratic: light.attenuation_quadratic,
        cutoff: light.cutoff,
        light_type: light.light_type,
        desire_shadows: light.desire_shadows,
    }
}

fn push_surface(
    tasks: &mut RenderTasks,
    absolute: bool,
    render_type: RenderType,
    surface: Surface,
    model: Mat4,
    inset: Option<Vec4>,
    properties: MaterialProperties,
) {
    let tex_coords_offset = inset.unwrap_or(Vec4::ZERO);
    match render_type {
        RenderType::Deferred => tasks.add_deferred(
            absolute,
            surface,
            DeferredInstance {
                model,
                tex_coords_offset,
                properties,
            },
        ),
        RenderType::Forward { subsort, sort } => tasks.add_forward(
            absolute,
            ForwardInstance {
                sort,
                subsort,
                model,
                tex_coords_offset,
                properties,
                surface,
            },
        ),
    }
}

/// The unit quad dressed in the billboard's images.
fn billboard_surface(
    ctx: &mut CategorizeContext<'_>,
    albedo_image: &AssetTag,
    normal_image: Option<&AssetTag>,
) -> Surface {
    let fallback = ctx.packages.fallback();
    let albedo = ctx
        .packages
        .texture(ctx.backend, albedo_image)
        .unwrap_or(fallback.albedo);
    let normal = normal_image.and_then(|tag| ctx.packages.texture(ctx.backend, tag));
    let mut material = SurfaceMaterial::new(albedo, normal.unwrap_or(fallback.normal));
    if normal.is_some() {
        material = material.with_flags(SurfaceFlags::NORMAL_MAP);
    }
    Surface {
        geometry: ctx.quad,
        material,
    }
}

pub(crate) fn billboard_rotation(orientation: BillboardOrientation, eye_rotation: Quat) -> Quat {
    match orientation {
        BillboardOrientation::CameraFacing => eye_rotation,
        BillboardOrientation::Upright => {
            let forward = eye_rotation * Vec3::NEG_Z;
            let mut flat = Vec3::new(forward.x, 0.0, forward.z);
            if flat.length_squared() < 1e-6 {
                // Looking straight up or down: the eye's up vector points where
                // forward would.
                let up = eye_rotation * Vec3::Y;
                flat = Vec3::new(up.x, 0.0, up.z);
            }
            if flat.length_squared() < 1e-6 {
                return Quat::IDENTITY;
            }
            Quat::from_rotation_y(f32::atan2(-flat.x, -flat.z))
        }
    }
}

/// Keeps the model's scale and translation, replaces its rotation.
fn orient(model: Mat4, rotation: Quat) -> Mat4 {
    let (scale, _, translation) = model.to_scale_rotation_translation();
    Mat4::from_scale_rotation_translation(scale, rotation, translation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn camera_facing_billboards_face_the_eye() {
        let eye = Quat::from_rotation_x(-0.6) * Quat::from_rotation_y(0.3);
        let rotation = billboard_rotation(BillboardOrientation::CameraFacing, eye);
        let normal = rotation * Vec3::Z;
        assert!(approx(normal, -(eye * Vec3::NEG_Z)));
    }

    #[test]
    fn upright_billboards_stay_vertical() {
        let eye = Quat::from_rotation_y(1.1) * Quat::from_rotation_x(-0.8);
        let rotation = billboard_rotation(BillboardOrientation::Upright, eye);
        assert!(approx(rotation * Vec3::Y, Vec3::Y));
        let normal = rotation * Vec3::Z;
        let forward = eye * Vec3::NEG_Z;
        let flat = Vec3::new(forward.x, 0.0, forward.z).normalize();
        assert!(approx(normal, -flat));
    }

    #[test]
    fn upright_billboards_survive_looking_straight_down() {
        let eye = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2);
        let rotation = billboard_rotation(BillboardOrientation::Upright, eye);
        assert!(rotation.is_finite());
        assert!(approx(rotation * Vec3::Y, Vec3::Y));
    }

    #[test]
    fn orient_keeps_scale_and_translation() {
        let model = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 3.0, 1.0),
            Quat::from_rotation_z(0.4),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let oriented = orient(model, Quat::IDENTITY);
        let (scale, rotation, translation) = oriented.to_scale_rotation_translation();
        assert!(approx(scale, Vec3::new(2.0, 3.0, 1.0)));
        assert!(approx(translation, Vec3::new(1.0, 2.0, 3.0)));
        assert!(rotation.abs_diff_eq(Quat::IDENTITY, 1e-5));
    }
}
