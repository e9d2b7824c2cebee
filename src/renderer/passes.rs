//! The scene passes: geometry, depth transfer, composite, sky box, forward.
//!
//! Every pass records into a [`PassEncoder`]; nothing here touches a device.
//! [`render_scene`] is shared by the visible frame and probe captures.

use std::cmp::Ordering;
use std::collections::HashMap;

use glam::Vec3;

use crate::renderer::backend::{CubeMapId, TargetSetId};
use crate::renderer::camera::{Viewpoint, Viewport};
use crate::renderer::commands::{
    Lighting, LoadOp, MaterialTextures, PassBegin, PassEncoder, PassKind, RenderTarget,
};
use crate::renderer::light_maps::{select_light_maps, SortableLightMap};
use crate::renderer::lights::{select_lights, SortableLight};
use crate::renderer::surface::Surface;
use crate::renderer::tasks::{DeferredInstance, ForwardInstance, RenderTasks};
use crate::renderer::uniforms::{Ambient, InstanceRaw, ViewUniform};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const CLEAR_GEOMETRY: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// Selection budgets for one scene rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    pub lights_deferred: usize,
    pub lights_forward: usize,
    pub light_maps_deferred: usize,
    pub light_maps_forward: usize,
}

/// Where a scene rendering writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneTargets {
    pub geometry: TargetSetId,
    pub raster: RenderTarget,
}

/// Lighting inputs that do not come from the task store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneEnvironment {
    pub ambient: Ambient,
    pub sky_irradiance: Option<CubeMapId>,
    pub sky_environment_filter: Option<CubeMapId>,
}

impl SceneEnvironment {
    pub const NONE: SceneEnvironment = SceneEnvironment {
        ambient: Ambient::NONE,
        sky_irradiance: None,
        sky_environment_filter: None,
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub deferred_batches: usize,
    pub deferred_instances: usize,
    pub forward_draws: usize,
    pub lights: usize,
}

impl PassStats {
    fn add(&mut self, other: PassStats) {
        self.deferred_batches += other.deferred_batches;
        self.deferred_instances += other.deferred_instances;
        self.forward_draws += other.forward_draws;
        self.lights = self.lights.max(other.lights);
    }
}

/// Handed to every post pass after the scene passes have been recorded.
pub struct PostPassContext<'a> {
    pub eye_center: Vec3,
    pub viewpoint: Viewpoint,
    pub target: RenderTarget,
    /// This frame's tasks; the scene passes are done with them.
    pub tasks: &'a mut RenderTasks,
    pub encoder: &'a mut PassEncoder,
}

impl PostPassContext<'_> {
    /// Opens a post pass over the finished frame.
    pub fn begin(&mut self) {
        self.encoder.begin_pass(PassBegin {
            kind: PassKind::Post,
            target: self.target,
            color: LoadOp::Load,
            depth: LoadOp::Load,
            viewport: self.viewpoint.viewport,
        });
    }

    pub fn view_relative(&self) -> ViewUniform {
        ViewUniform::new(
            self.viewpoint.view_relative,
            self.viewpoint.projection,
            self.viewpoint.center,
        )
    }

    pub fn view_absolute(&self) -> ViewUniform {
        ViewUniform::new(self.viewpoint.view_absolute, self.viewpoint.projection, Vec3::ZERO)
    }
}

/// Records the five scene passes in order.
///
/// `top_level` adds the absolute geometry; captures leave it out. Nothing
/// here syncs probes, so a capture never leads to another capture.
pub fn render_scene(
    top_level: bool,
    viewpoint: &Viewpoint,
    tasks: &mut RenderTasks,
    targets: SceneTargets,
    environment: &SceneEnvironment,
    budgets: &Budgets,
    encoder: &mut PassEncoder,
) -> PassStats {
    let mut stats = PassStats::default();
    stats.add(geometry_pass(top_level, viewpoint, tasks, targets, encoder));
    encoder.copy_depth(targets.geometry, targets.raster);
    stats.add(composite_pass(viewpoint, tasks, targets, environment, budgets, encoder));
    sky_box_pass(viewpoint, tasks, targets, encoder);
    stats.add(forward_pass(top_level, viewpoint, tasks, targets, environment, budgets, encoder));
    stats
}

pub fn geometry_pass(
    top_level: bool,
    viewpoint: &Viewpoint,
    tasks: &RenderTasks,
    targets: SceneTargets,
    encoder: &mut PassEncoder,
) -> PassStats {
    encoder.begin_pass(PassBegin {
        kind: PassKind::Geometry,
        target: RenderTarget::TargetSet(targets.geometry),
        color: LoadOp::Clear(CLEAR_GEOMETRY),
        depth: LoadOp::Clear(1.0),
        viewport: viewpoint.viewport,
    });

    let mut stats = PassStats::default();
    encoder.bind_view(ViewUniform::new(
        viewpoint.view_relative,
        viewpoint.projection,
        viewpoint.center,
    ));
    draw_batches(&tasks.deferred_relative, encoder, &mut stats);

    if top_level && !tasks.deferred_absolute.is_empty() {
        encoder.bind_view(ViewUniform::new(
            viewpoint.view_absolute,
            viewpoint.projection,
            Vec3::ZERO,
        ));
        draw_batches(&tasks.deferred_absolute, encoder, &mut stats);
    }

    encoder.end_pass();
    stats
}

/// One material bind and one instanced draw per surface, in surface order so
/// recordings are reproducible.
fn draw_batches(
    batches: &HashMap<Surface, Vec<DeferredInstance>>,
    encoder: &mut PassEncoder,
    stats: &mut PassStats,
) {
    let mut surfaces: Vec<&Surface> = batches.keys().collect();
    surfaces.sort();

    for surface in surfaces {
        let instances = &batches[surface];
        if instances.is_empty() {
            continue;
        }
        encoder.bind_material(material_textures(surface));
        let raw = instances
            .iter()
            .map(|instance| {
                let material = surface.material.resolve(&instance.properties);
                InstanceRaw::new(instance.model, instance.tex_coords_offset, &material)
            })
            .collect::<Vec<_>>();
        stats.deferred_batches += 1;
        stats.deferred_instances += raw.len();
        encoder.draw_instanced(surface.geometry, raw);
    }
}

fn material_textures(surface: &Surface) -> MaterialTextures {
    MaterialTextures {
        albedo: surface.material.albedo_texture,
        normal: surface.material.normal_texture,
    }
}

fn lighting_at(
    reference: Vec3,
    light_budget: usize,
    light_map_budget: usize,
    lights: &mut [SortableLight],
    light_maps: &mut [SortableLightMap],
    environment: &SceneEnvironment,
) -> Lighting {
    Lighting {
        lights: select_lights(light_budget, reference, lights),
        light_maps: select_light_maps(light_map_budget, reference, light_maps),
        ambient: environment.ambient,
        sky_irradiance: environment.sky_irradiance,
        sky_environment_filter: environment.sky_environment_filter,
    }
}

pub fn composite_pass(
    viewpoint: &Viewpoint,
    tasks: &mut RenderTasks,
    targets: SceneTargets,
    environment: &SceneEnvironment,
    budgets: &Budgets,
    encoder: &mut PassEncoder,
) -> PassStats {
    let lighting = lighting_at(
        viewpoint.center,
        budgets.lights_deferred,
        budgets.light_maps_deferred,
        &mut tasks.lights,
        &mut tasks.light_maps,
        environment,
    );
    let stats = PassStats {
        lights: lighting.lights.enabled_count(),
        ..PassStats::default()
    };

    encoder.begin_pass(PassBegin {
        kind: PassKind::Composite,
        target: targets.raster,
        color: LoadOp::Clear(CLEAR_COLOR),
        depth: LoadOp::Load,
        viewport: viewpoint.viewport,
    });
    encoder.bind_view(ViewUniform::new(
        viewpoint.view_relative,
        viewpoint.projection,
        viewpoint.center,
    ));
    encoder.composite(targets.geometry, lighting);
    encoder.end_pass();
    stats
}

/// Clears `target` to the composite clear color with nothing drawn over it.
/// Stands in for the scene passes when they cannot run.
pub fn clear_pass(target: RenderTarget, viewport: Viewport, encoder: &mut PassEncoder) {
    encoder.begin_pass(PassBegin {
        kind: PassKind::Composite,
        target,
        color: LoadOp::Clear(CLEAR_COLOR),
        depth: LoadOp::Clear(1.0),
        viewport,
    });
    encoder.end_pass();
}

/// Drawn behind everything: the sky shader writes depth 1 and tests
/// less-or-equal against the transferred opaque depth.
pub fn sky_box_pass(
    viewpoint: &Viewpoint,
    tasks: &RenderTasks,
    targets: SceneTargets,
    encoder: &mut PassEncoder,
) {
    let Some(sky_box) = tasks.sky_box() else {
        return;
    };
    encoder.begin_pass(PassBegin {
        kind: PassKind::SkyBox,
        target: targets.raster,
        color: LoadOp::Load,
        depth: LoadOp::Load,
        viewport: viewpoint.viewport,
    });
    encoder.bind_view(ViewUniform::new(
        viewpoint.view_sky_box,
        viewpoint.projection,
        Vec3::ZERO,
    ));
    encoder.sky_box(sky_box.cube_map, sky_box.color, sky_box.brightness);
    encoder.end_pass();
}

/// Painter's order: larger sort keys, then farther instances, then larger
/// sub-sort keys are drawn first.
pub fn sort_forward(instances: &mut [ForwardInstance], reference: Vec3) {
    instances.sort_by(|a, b| compare_forward(a, b, reference));
}

fn compare_forward(a: &ForwardInstance, b: &ForwardInstance, reference: Vec3) -> Ordering {
    let distance_a = a.position().distance_squared(reference);
    let distance_b = b.position().distance_squared(reference);
    b.sort
        .total_cmp(&a.sort)
        .then(distance_b.total_cmp(&distance_a))
        .then(b.subsort.total_cmp(&a.subsort))
}

pub fn forward_pass(
    top_level: bool,
    viewpoint: &Viewpoint,
    tasks: &mut RenderTasks,
    targets: SceneTargets,
    environment: &SceneEnvironment,
    budgets: &Budgets,
    encoder: &mut PassEncoder,
) -> PassStats {
    let RenderTasks {
        forward_relative,
        forward_absolute,
        lights,
        light_maps,
        ..
    } = tasks;

    let draw_absolute = top_level && !forward_absolute.is_empty();
    if forward_relative.is_empty() && !draw_absolute {
        return PassStats::default();
    }

    encoder.begin_pass(PassBegin {
        kind: PassKind::Forward,
        target: targets.raster,
        color: LoadOp::Load,
        depth: LoadOp::Load,
        viewport: viewpoint.viewport,
    });

    let mut stats = PassStats::default();

    sort_forward(forward_relative, viewpoint.center);
    encoder.bind_view(ViewUniform::new(
        viewpoint.view_relative,
        viewpoint.projection,
        viewpoint.center,
    ));
    for instance in forward_relative.iter() {
        draw_forward(instance, lights, light_maps, environment, budgets, encoder);
        stats.forward_draws += 1;
    }

    if draw_absolute {
        sort_forward(forward_absolute, Vec3::ZERO);
        encoder.bind_view(ViewUniform::new(
            viewpoint.view_absolute,
            viewpoint.projection,
            Vec3::ZERO,
        ));
        for instance in forward_absolute.iter() {
            draw_forward(instance, lights, light_maps, environment, budgets, encoder);
            stats.forward_draws += 1;
        }
    }

    encoder.end_pass();
    stats
}

fn draw_forward(
    instance: &ForwardInstance,
    lights: &mut [SortableLight],
    light_maps: &mut [SortableLightMap],
    environment: &SceneEnvironment,
    budgets: &Budgets,
    encoder: &mut PassEncoder,
) {
    let lighting = lighting_at(
        instance.position(),
        budgets.lights_forward,
        budgets.light_maps_forward,
        lights,
        light_maps,
        environment,
    );
    let material = instance.surface.material.resolve(&instance.properties);
    encoder.bind_material(material_textures(&instance.surface));
    encoder.draw_forward(
        instance.surface.geometry,
        InstanceRaw::new(instance.model, instance.tex_coords_offset, &material),
        lighting,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{GeometryId, TextureId};
    use crate::renderer::camera::{Lens, Viewport};
    use crate::renderer::commands::RenderCommand;
    use crate::renderer::lights::{Light, LightType, LIGHT_DISABLED};
    use crate::renderer::material::{MaterialProperties, SurfaceMaterial};
    use crate::renderer::tasks::SkyBox;
    use glam::{Mat4, Quat, Vec4};

    fn budgets() -> Budgets {
        Budgets {
            lights_deferred: 4,
            lights_forward: 2,
            light_maps_deferred: 2,
            light_maps_forward: 1,
        }
    }

    fn targets() -> SceneTargets {
        SceneTargets {
            geometry: TargetSetId(100),
            raster: RenderTarget::Frame,
        }
    }

    fn viewpoint() -> Viewpoint {
        let lens = Lens {
            fov_y: 1.0,
            near: 0.1,
            far: 100.0,
        };
        Viewpoint::from_eye(Vec3::ZERO, Quat::IDENTITY, Viewport::new(64, 64), &lens)
    }

    fn surface(geometry: u64) -> Surface {
        Surface {
            geometry: GeometryId(geometry),
            material: SurfaceMaterial::new(TextureId(1), TextureId(2)),
        }
    }

    fn forward(sort: f32, subsort: f32, z: f32) -> ForwardInstance {
        ForwardInstance {
            sort,
            subsort,
            model: Mat4::from_translation(Vec3::new(0.0, 0.0, z)),
            tex_coords_offset: Vec4::ZERO,
            properties: MaterialProperties::default(),
            surface: surface(9),
        }
    }

    fn deferred() -> DeferredInstance {
        DeferredInstance {
            model: Mat4::IDENTITY,
            tex_coords_offset: Vec4::ZERO,
            properties: MaterialProperties::default(),
        }
    }

    fn point_light(x: f32) -> Light {
        Light {
            origin: Vec3::new(x, 0.0, 0.0),
            direction: Vec3::NEG_Z,
            color: Vec3::ONE,
            brightness: 1.0,
            attenuation_linear: 0.1,
            attenuation_quadratic: 0.01,
            cutoff: 10.0,
            light_type: LightType::Point,
            desire_shadows: false,
        }
    }

    #[test]
    fn forward_sort_is_back_to_front() {
        let mut instances = vec![
            forward(0.0, 0.0, -1.0),
            forward(1.0, 0.0, -2.0),
            forward(0.0, 0.0, -5.0),
            forward(0.0, 3.0, -1.0),
        ];
        sort_forward(&mut instances, Vec3::ZERO);

        for pair in instances.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let da = a.position().length_squared();
            let db = b.position().length_squared();
            assert!(a.sort > b.sort || (a.sort == b.sort && da >= db));
        }
        assert_eq!(instances[0].sort, 1.0);
        assert_eq!(instances[1].position().z, -5.0);
        assert_eq!(instances[2].subsort, 3.0);
    }

    #[test]
    fn batches_are_one_draw_per_surface() {
        let mut tasks = RenderTasks::new();
        tasks.add_deferred(false, surface(1), deferred());
        tasks.add_deferred(false, surface(1), deferred());
        tasks.add_deferred(false, surface(2), deferred());

        let mut encoder = PassEncoder::new();
        let stats = geometry_pass(true, &viewpoint(), &tasks, targets(), &mut encoder);
        let draws: Vec<usize> = encoder
            .finish()
            .iter()
            .filter_map(|c| match c {
                RenderCommand::DrawInstanced { instances, .. } => Some(instances.len()),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![2, 1]);
        assert_eq!(stats.deferred_batches, 2);
        assert_eq!(stats.deferred_instances, 3);
    }

    #[test]
    fn absolute_geometry_is_top_level_only() {
        let mut tasks = RenderTasks::new();
        tasks.add_deferred(true, surface(1), deferred());
        tasks.add_forward(true, forward(0.0, 0.0, -1.0));

        let mut capture = PassEncoder::new();
        let stats = render_scene(
            false,
            &viewpoint(),
            &mut tasks,
            targets(),
            &SceneEnvironment::NONE,
            &budgets(),
            &mut capture,
        );
        assert_eq!(stats.deferred_batches, 0);
        assert_eq!(stats.forward_draws, 0);

        let mut frame = PassEncoder::new();
        let stats = render_scene(
            true,
            &viewpoint(),
            &mut tasks,
            targets(),
            &SceneEnvironment::NONE,
            &budgets(),
            &mut frame,
        );
        assert_eq!(stats.deferred_batches, 1);
        assert_eq!(stats.forward_draws, 1);
    }

    #[test]
    fn empty_scene_still_clears_and_composites() {
        let mut tasks = RenderTasks::new();
        let mut encoder = PassEncoder::new();
        render_scene(
            true,
            &viewpoint(),
            &mut tasks,
            targets(),
            &SceneEnvironment::NONE,
            &budgets(),
            &mut encoder,
        );
        let kinds: Vec<PassKind> = encoder
            .finish()
            .iter()
            .filter_map(|c| match c {
                RenderCommand::BeginPass(begin) => Some(begin.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![PassKind::Geometry, PassKind::Composite]);
    }

    #[test]
    fn pass_order_is_fixed() {
        let mut tasks = RenderTasks::new();
        tasks.add_deferred(false, surface(1), deferred());
        tasks.add_forward(false, forward(0.0, 0.0, -1.0));
        tasks.sky_boxes.push(SkyBox {
            color: Vec3::ONE,
            brightness: 1.0,
            ambient_color: Vec3::ONE,
            ambient_brightness: 0.2,
            cube_map: CubeMapId(5),
        });

        let mut encoder = PassEncoder::new();
        render_scene(
            true,
            &viewpoint(),
            &mut tasks,
            targets(),
            &SceneEnvironment::NONE,
            &budgets(),
            &mut encoder,
        );
        let commands = encoder.finish();
        let copy = commands
            .iter()
            .position(|c| matches!(c, RenderCommand::CopyDepth { .. }))
            .unwrap();
        let kinds: Vec<PassKind> = commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::BeginPass(begin) => Some(begin.kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                PassKind::Geometry,
                PassKind::Composite,
                PassKind::SkyBox,
                PassKind::Forward
            ]
        );
        let composite_begin = commands
            .iter()
            .position(|c| matches!(c, RenderCommand::BeginPass(b) if b.kind == PassKind::Composite))
            .unwrap();
        assert!(copy < composite_begin);
    }

    #[test]
    fn forward_draws_select_lights_at_their_own_position() {
        let mut tasks = RenderTasks::new();
        for (order, x) in [0.0, 10.0, 20.0].into_iter().enumerate() {
            tasks.lights.push(SortableLight::new(point_light(x), order));
        }
        let mut instance = forward(0.0, 0.0, 0.0);
        instance.model = Mat4::from_translation(Vec3::new(20.0, 0.0, 0.0));
        tasks.add_forward(false, instance);

        let mut encoder = PassEncoder::new();
        forward_pass(
            true,
            &viewpoint(),
            &mut tasks,
            targets(),
            &SceneEnvironment::NONE,
            &budgets(),
            &mut encoder,
        );
        let lighting = encoder
            .finish()
            .into_iter()
            .find_map(|c| match c {
                RenderCommand::DrawForward { lighting, .. } => Some(lighting),
                _ => None,
            })
            .unwrap();
        assert_eq!(lighting.lights.len(), 2);
        assert_eq!(lighting.lights.origins[0], [20.0, 0.0, 0.0]);
        assert_eq!(lighting.lights.origins[1], [10.0, 0.0, 0.0]);
        assert_ne!(lighting.lights.types[1], LIGHT_DISABLED);
    }
}
