//! The frame driver and its per-frame statistics.

use glam::{Quat, Vec3};

use crate::asset::{AssetResolver, FallbackTextures, PackageCache};
use crate::renderer::backend::{
    CubeMapDesc, CubeMapFormat, CubeMapId, GeometryDesc, GeometryId, GpuBackend, TextureDesc,
    TextureFormat, TextureId,
};
use crate::renderer::bake::{EnvironmentMemo, ProbeCapture};
use crate::renderer::camera::{Viewpoint, Viewport};
use crate::renderer::categorize::{categorize, CategorizeContext};
use crate::renderer::commands::{PassEncoder, RenderCommand, RenderTarget};
use crate::renderer::diagnostics::WarnOnce;
use crate::renderer::error::RenderError;
use crate::renderer::framebuffer::{create_target_set, destroy_target_set, TargetSet, TargetSetKind};
use crate::renderer::geometry::unit_quad;
use crate::renderer::light_maps::LightMapCache;
use crate::renderer::message::RenderMessage;
use crate::renderer::passes::{
    clear_pass, render_scene, PostPassContext, SceneEnvironment, SceneTargets,
};
use crate::renderer::tasks::RenderTasks;
use crate::renderer::uniforms::Ambient;
use crate::settings::RenderSettings;

/// Counters for the most recent frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub deferred_batches: usize,
    pub deferred_instances: usize,
    pub forward_draws: usize,
    /// Enabled slots in the composite pass's light array.
    pub lights: usize,
    pub light_probes: usize,
    pub light_maps_baked: usize,
    pub light_map_failures: usize,
    /// How often the light-map cache was synced this frame.
    pub probe_syncs: usize,
    /// Deepest scene rendering nested under a bake; 1 when anything baked.
    pub max_capture_depth: usize,
    pub post_passes: usize,
}

/// Resources every frame relies on. Failing to create them is fatal.
#[derive(Debug, Clone, Copy)]
struct Defaults {
    white: TextureId,
    flat_normal: TextureId,
    black_cube: CubeMapId,
    quad: GeometryId,
}

impl Defaults {
    fn create(backend: &mut dyn GpuBackend) -> Result<Self, RenderError> {
        let white = backend.create_texture(&TextureDesc {
            label: "default albedo",
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Srgb,
            pixels: &[255, 255, 255, 255],
        })?;
        let flat_normal = backend.create_texture(&TextureDesc {
            label: "default normal",
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Linear,
            pixels: &[128, 128, 255, 255],
        })?;

        let zero = half::f16::from_f32(0.0).to_bits();
        let one = half::f16::from_f32(1.0).to_bits();
        let texel: [u16; 4] = [zero, zero, zero, one];
        let face: &[u8] = bytemuck::cast_slice(&texel);
        let black_cube = backend.create_cube_map(&CubeMapDesc {
            label: "default environment",
            resolution: 1,
            mip_levels: 1,
            format: CubeMapFormat::Rgba16Float,
            faces: Some([face; 6]),
        })?;

        let (vertices, indices) = unit_quad();
        let quad = backend.create_geometry(&GeometryDesc {
            label: "billboard quad",
            vertices: &vertices,
            indices: &indices,
        })?;

        Ok(Self {
            white,
            flat_normal,
            black_cube,
            quad,
        })
    }

    fn release(self, backend: &mut dyn GpuBackend) {
        backend.destroy_texture(self.white);
        backend.destroy_texture(self.flat_normal);
        backend.destroy_cube_map(self.black_cube);
        backend.destroy_geometry(self.quad);
    }
}

/// The frame driver: categorizes messages, keeps light maps in sync and
/// records the scene passes for a [`GpuBackend`].
pub struct Renderer<B: GpuBackend> {
    backend: B,
    settings: RenderSettings,
    packages: PackageCache,
    light_maps: LightMapCache,
    environment: EnvironmentMemo,
    tasks: RenderTasks,
    warnings: WarnOnce,
    defaults: Option<Defaults>,
    geometry_targets: Option<TargetSet>,
    stats: RendererStats,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(
        mut backend: B,
        settings: RenderSettings,
        resolver: Box<dyn AssetResolver>,
    ) -> Result<Self, RenderError> {
        let settings = settings.validate();
        let defaults = Defaults::create(&mut backend)?;
        let packages = PackageCache::new(
            resolver,
            FallbackTextures {
                albedo: defaults.white,
                normal: defaults.flat_normal,
            },
        );
        log::info!(
            "Renderer ready: {} deferred / {} forward lights, {}px light maps",
            settings.lights_max_deferred,
            settings.lights_max_forward,
            settings.light_map_resolution
        );

        Ok(Self {
            backend,
            settings,
            packages,
            light_maps: LightMapCache::new(),
            environment: EnvironmentMemo::new(),
            tasks: RenderTasks::new(),
            warnings: WarnOnce::new(),
            defaults: Some(defaults),
            geometry_targets: None,
            stats: RendererStats::default(),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn packages(&self) -> &PackageCache {
        &self.packages
    }

    pub fn light_maps(&self) -> &LightMapCache {
        &self.light_maps
    }

    pub fn last_frame_stats(&self) -> RendererStats {
        self.stats
    }

    fn ensure_geometry_targets(&mut self, width: u32, height: u32) -> Result<TargetSet, RenderError> {
        if let Some(targets) = self.geometry_targets {
            if targets.width == width && targets.height == height {
                return Ok(targets);
            }
            destroy_target_set(&mut self.backend, targets);
            self.geometry_targets = None;
        }
        let targets = create_target_set(&mut self.backend, TargetSetKind::Geometry, width, height)?;
        self.geometry_targets = Some(targets);
        Ok(targets)
    }

    /// Renders one top-level frame from `messages`.
    ///
    /// Never fails: per-message and per-resource problems are logged and
    /// skipped so the frame always completes.
    pub fn render(
        &mut self,
        eye_center: Vec3,
        eye_rotation: Quat,
        window_size: (u32, u32),
        messages: &[RenderMessage],
    ) {
        let Some(defaults) = self.defaults else {
            log::warn!("Render called after clean-up; frame skipped");
            return;
        };
        let (width, height) = (window_size.0.max(1), window_size.1.max(1));
        self.backend.configure_frame(width, height);

        // Package and model lifecycle messages apply even when the scene
        // passes below cannot run.
        let mut tasks = std::mem::take(&mut self.tasks);
        let post_passes = {
            let mut context = CategorizeContext {
                backend: &mut self.backend,
                packages: &mut self.packages,
                quad: defaults.quad,
                warnings: &mut self.warnings,
            };
            categorize(messages, &mut tasks, eye_rotation, &mut context)
        };

        let geometry_targets = match self.ensure_geometry_targets(width, height) {
            Ok(targets) => targets,
            Err(err) => {
                log::error!("Scene passes skipped: {}", err);
                let mut encoder = PassEncoder::new();
                clear_pass(RenderTarget::Frame, Viewport::new(width, height), &mut encoder);
                self.finish_frame(&encoder.finish(), RendererStats::default());
                tasks.clear();
                self.tasks = tasks;
                return;
            }
        };

        let environment = self.sky_environment(&tasks, defaults);
        let budgets = self.settings.budgets();

        let probes = std::mem::take(&mut tasks.light_probes);
        let (report, max_capture_depth) = {
            let mut capture = ProbeCapture::new(
                &mut self.backend,
                &mut tasks,
                self.settings.capture_settings(),
                budgets,
                environment,
            );
            let report = self.light_maps.sync_probes(&probes, &mut capture);
            (report, capture.max_depth())
        };
        tasks.light_probes = probes;
        tasks.light_maps = self.light_maps.sortable_light_maps();

        let viewpoint = Viewpoint::from_eye(
            eye_center,
            eye_rotation,
            Viewport::new(width, height),
            &self.settings.lens(),
        );
        let targets = SceneTargets {
            geometry: geometry_targets.id,
            raster: RenderTarget::Frame,
        };
        let mut encoder = PassEncoder::new();
        let pass_stats = render_scene(
            true,
            &viewpoint,
            &mut tasks,
            targets,
            &environment,
            &budgets,
            &mut encoder,
        );

        {
            let mut context = PostPassContext {
                eye_center,
                viewpoint,
                target: RenderTarget::Frame,
                tasks: &mut tasks,
                encoder: &mut encoder,
            };
            for post_pass in &post_passes {
                log::trace!("Running post pass {} ({})", post_pass.label, post_pass.order);
                (post_pass.callback)(&mut context);
                context.encoder.end_pass();
            }
        }

        let stats = RendererStats {
            deferred_batches: pass_stats.deferred_batches,
            deferred_instances: pass_stats.deferred_instances,
            forward_draws: pass_stats.forward_draws,
            lights: pass_stats.lights,
            light_probes: tasks.light_probes.len(),
            light_maps_baked: report.baked,
            light_map_failures: report.failed,
            probe_syncs: 1,
            max_capture_depth,
            post_passes: post_passes.len(),
        };
        self.finish_frame(&encoder.finish(), stats);

        tasks.clear();
        self.tasks = tasks;
    }

    /// Submits the frame, then frees what the package cache released during it.
    fn finish_frame(&mut self, commands: &[RenderCommand], stats: RendererStats) {
        if let Err(err) = self.backend.submit(commands) {
            log::error!("Frame submission failed: {}", err);
        }
        self.packages.release_pending(&mut self.backend);
        self.stats = stats;
    }

    /// Ambient and convolved sky maps from the most recent sky box.
    fn sky_environment(&mut self, tasks: &RenderTasks, defaults: Defaults) -> SceneEnvironment {
        let generation = self.packages.generation();
        self.environment.invalidate(&mut self.backend, generation);

        let Some(sky_box) = tasks.sky_box().copied() else {
            self.environment.clear(&mut self.backend);
            return SceneEnvironment {
                sky_irradiance: Some(defaults.black_cube),
                sky_environment_filter: Some(defaults.black_cube),
                ..SceneEnvironment::NONE
            };
        };

        let maps = self.environment.ensure(
            &mut self.backend,
            sky_box.cube_map,
            generation,
            &self.settings.capture_settings(),
        );
        let (irradiance, environment_filter) =
            maps.unwrap_or((defaults.black_cube, defaults.black_cube));
        SceneEnvironment {
            ambient: Ambient {
                color: sky_box.ambient_color,
                brightness: sky_box.ambient_brightness,
            },
            sky_irradiance: Some(irradiance),
            sky_environment_filter: Some(environment_filter),
        }
    }

    /// Shows the last rendered frame.
    pub fn swap(&mut self) {
        if let Err(err) = self.backend.present() {
            log::warn!("Present failed: {}", err);
        }
    }

    /// Releases every resource this renderer created. Safe to call twice.
    pub fn clean_up(&mut self) {
        let Some(defaults) = self.defaults.take() else {
            return;
        };
        for textures in self.light_maps.drain() {
            textures.release(&mut self.backend);
        }
        self.environment.clear(&mut self.backend);
        self.packages.clean_up(&mut self.backend);
        if let Some(targets) = self.geometry_targets.take() {
            destroy_target_set(&mut self.backend, targets);
        }
        defaults.release(&mut self.backend);
        self.tasks.clear();
        self.backend.release_all();
        log::info!("Renderer resources released");
    }
}
