//! Light-probe captures and cube-map convolution.

use instant::Instant;

use crate::renderer::backend::{CubeMapDesc, CubeMapId, GpuBackend};
use crate::renderer::camera::{Lens, Viewpoint, CUBE_FACES};
use crate::renderer::commands::{PassEncoder, RenderTarget};
use crate::renderer::error::RenderError;
use crate::renderer::framebuffer::{create_target_set, destroy_target_set, TargetSet, TargetSetKind};
use crate::renderer::light_maps::{LightMapBaker, LightMapTextures, LightProbe, ProbeId};
use crate::renderer::passes::{render_scene, Budgets, SceneEnvironment, SceneTargets};
use crate::renderer::tasks::RenderTasks;
use crate::renderer::uniforms::Ambient;

/// Sizes for captures and the cube maps derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub resolution: u32,
    pub irradiance_resolution: u32,
    pub environment_filter_resolution: u32,
    pub environment_filter_mips: u32,
    pub lens: Lens,
}

/// Creates the irradiance and environment-filter cubes for `source` and
/// records their convolution.
pub fn convolve(
    backend: &mut dyn GpuBackend,
    encoder: &mut PassEncoder,
    source: CubeMapId,
    settings: &CaptureSettings,
) -> Result<(CubeMapId, CubeMapId), RenderError> {
    let irradiance = backend.create_cube_map(&CubeMapDesc::render_target(
        "irradiance",
        settings.irradiance_resolution,
        1,
    ))?;
    let environment_filter = match backend.create_cube_map(&CubeMapDesc::render_target(
        "environment filter",
        settings.environment_filter_resolution,
        settings.environment_filter_mips,
    )) {
        Ok(id) => id,
        Err(err) => {
            backend.destroy_cube_map(irradiance);
            return Err(err);
        }
    };
    encoder.convolve_irradiance(source, irradiance);
    encoder.filter_environment(source, environment_filter);
    Ok((irradiance, environment_filter))
}

/// Bakes light maps by re-rendering the frame's tasks from each probe.
///
/// Captures render with `top_level = false` and never sync probes.
pub struct ProbeCapture<'a> {
    pub backend: &'a mut dyn GpuBackend,
    pub tasks: &'a mut RenderTasks,
    pub settings: CaptureSettings,
    pub budgets: Budgets,
    /// Sky lighting for the captures; the ambient term is the probe's own.
    pub environment: SceneEnvironment,
    depth: usize,
    max_depth: usize,
}

impl<'a> ProbeCapture<'a> {
    pub fn new(
        backend: &'a mut dyn GpuBackend,
        tasks: &'a mut RenderTasks,
        settings: CaptureSettings,
        budgets: Budgets,
        environment: SceneEnvironment,
    ) -> Self {
        Self {
            backend,
            tasks,
            settings,
            budgets,
            environment,
            depth: 0,
            max_depth: 0,
        }
    }

    /// Deepest nesting of scene renderings under a bake.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn capture(
        &mut self,
        id: ProbeId,
        probe: &LightProbe,
        raster: &TargetSet,
        geometry: &TargetSet,
    ) -> Result<LightMapTextures, RenderError> {
        let label = format!("{} reflection", id);
        let resolution = self.settings.resolution;
        let reflection = self
            .backend
            .create_cube_map(&CubeMapDesc::render_target(&label, resolution, 1))?;

        let environment = SceneEnvironment {
            ambient: Ambient {
                color: probe.ambient_color,
                brightness: probe.ambient_brightness,
            },
            ..self.environment
        };
        let targets = SceneTargets {
            geometry: geometry.id,
            raster: RenderTarget::TargetSet(raster.id),
        };

        let mut encoder = PassEncoder::new();
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        for face in 0..CUBE_FACES.len() {
            let viewpoint = Viewpoint::cube_face(probe.origin, face, resolution, &self.settings.lens);
            render_scene(
                false,
                &viewpoint,
                self.tasks,
                targets,
                &environment,
                &self.budgets,
                &mut encoder,
            );
            encoder.copy_to_cube_face(raster.id, reflection, face as u32);
        }
        self.depth -= 1;

        let (irradiance, environment_filter) =
            match convolve(self.backend, &mut encoder, reflection, &self.settings) {
                Ok(maps) => maps,
                Err(err) => {
                    self.backend.destroy_cube_map(reflection);
                    return Err(err);
                }
            };
        let textures = LightMapTextures {
            reflection,
            irradiance,
            environment_filter,
        };

        if let Err(err) = self.backend.submit(&encoder.finish()) {
            textures.release(self.backend);
            return Err(err);
        }
        Ok(textures)
    }
}

impl LightMapBaker for ProbeCapture<'_> {
    fn bake(&mut self, id: ProbeId, probe: &LightProbe) -> Result<LightMapTextures, RenderError> {
        let started = Instant::now();
        let resolution = self.settings.resolution;

        let raster = create_target_set(self.backend, TargetSetKind::Hdr, resolution, resolution)?;
        let geometry =
            match create_target_set(self.backend, TargetSetKind::Geometry, resolution, resolution) {
                Ok(set) => set,
                Err(err) => {
                    destroy_target_set(self.backend, raster);
                    return Err(err);
                }
            };

        let result = self.capture(id, probe, &raster, &geometry);
        destroy_target_set(self.backend, geometry);
        destroy_target_set(self.backend, raster);

        if result.is_ok() {
            log::debug!(
                "Baked light map for {} at {}px in {:.2?}",
                id,
                resolution,
                started.elapsed()
            );
        }
        result
    }

    fn release(&mut self, textures: LightMapTextures) {
        textures.release(self.backend);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemoEntry {
    source: CubeMapId,
    generation: u64,
    irradiance: CubeMapId,
    environment_filter: CubeMapId,
}

/// Convolved maps for the current sky box, computed once per cube map.
#[derive(Debug, Default)]
pub struct EnvironmentMemo {
    entry: Option<MemoEntry>,
}

impl EnvironmentMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Irradiance and environment-filter maps for `source`, convolving on a
    /// miss. A changed asset generation counts as a miss.
    pub fn ensure(
        &mut self,
        backend: &mut dyn GpuBackend,
        source: CubeMapId,
        generation: u64,
        settings: &CaptureSettings,
    ) -> Option<(CubeMapId, CubeMapId)> {
        if let Some(entry) = self.entry {
            if entry.source == source && entry.generation == generation {
                return Some((entry.irradiance, entry.environment_filter));
            }
        }
        self.clear(backend);

        let mut encoder = PassEncoder::new();
        let (irradiance, environment_filter) = match convolve(backend, &mut encoder, source, settings) {
            Ok(maps) => maps,
            Err(err) => {
                log::error!("Sky box convolution failed: {}", err);
                return None;
            }
        };
        if let Err(err) = backend.submit(&encoder.finish()) {
            log::error!("Sky box convolution failed: {}", err);
            backend.destroy_cube_map(irradiance);
            backend.destroy_cube_map(environment_filter);
            return None;
        }

        self.entry = Some(MemoEntry {
            source,
            generation,
            irradiance,
            environment_filter,
        });
        Some((irradiance, environment_filter))
    }

    /// Drops the memo when it belongs to a different generation.
    pub fn invalidate(&mut self, backend: &mut dyn GpuBackend, generation: u64) {
        if self.entry.is_some_and(|entry| entry.generation != generation) {
            self.clear(backend);
        }
    }

    pub fn clear(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(entry) = self.entry.take() {
            backend.destroy_cube_map(entry.irradiance);
            backend.destroy_cube_map(entry.environment_filter);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::HeadlessBackend;
    use crate::renderer::commands::RenderCommand;
    use crate::renderer::geometry::Aabb;
    use glam::Vec3;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            resolution: 16,
            irradiance_resolution: 4,
            environment_filter_resolution: 8,
            environment_filter_mips: 3,
            lens: Lens {
                fov_y: 1.0,
                near: 0.1,
                far: 50.0,
            },
        }
    }

    fn budgets() -> Budgets {
        Budgets {
            lights_deferred: 4,
            lights_forward: 2,
            light_maps_deferred: 2,
            light_maps_forward: 1,
        }
    }

    fn probe() -> LightProbe {
        LightProbe {
            enabled: true,
            origin: Vec3::new(1.0, 2.0, 3.0),
            bounds: Aabb::UNIT,
            ambient_color: Vec3::ONE,
            ambient_brightness: 0.3,
            stale: false,
        }
    }

    #[test]
    fn bake_captures_six_faces_then_convolves() {
        let mut backend = HeadlessBackend::new();
        let mut tasks = RenderTasks::new();
        let mut capture = ProbeCapture::new(
            &mut backend,
            &mut tasks,
            settings(),
            budgets(),
            SceneEnvironment::NONE,
        );
        let textures = capture.bake(ProbeId(1), &probe()).unwrap();
        assert_eq!(capture.max_depth(), 1);

        let commands = &backend.submissions()[0];
        let faces: Vec<u32> = commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::CopyToCubeFace { face, cube_map, .. } => {
                    assert_eq!(*cube_map, textures.reflection);
                    Some(*face)
                }
                _ => None,
            })
            .collect();
        assert_eq!(faces, vec![0, 1, 2, 3, 4, 5]);
        assert!(matches!(
            commands[commands.len() - 2],
            RenderCommand::ConvolveIrradiance { .. }
        ));
        assert!(matches!(
            commands[commands.len() - 1],
            RenderCommand::FilterEnvironment { .. }
        ));

        // Only the three cube maps survive the bake.
        assert_eq!(backend.outstanding_handles(), 3);
    }

    #[test]
    fn failed_capture_leaks_nothing() {
        let mut backend = HeadlessBackend::new();
        backend.fail_target_sets(TargetSetKind::Geometry);
        let mut tasks = RenderTasks::new();
        let mut capture = ProbeCapture::new(
            &mut backend,
            &mut tasks,
            settings(),
            budgets(),
            SceneEnvironment::NONE,
        );
        let err = capture.bake(ProbeId(1), &probe()).unwrap_err();
        assert_eq!(err.to_string(), "incomplete geometry target set");
        assert_eq!(backend.outstanding_handles(), 0);
        assert!(backend.submissions().is_empty());
    }

    #[test]
    fn memo_convolves_once_per_cube_map_and_generation() {
        let mut backend = HeadlessBackend::new();
        let mut memo = EnvironmentMemo::new();
        let sky = backend
            .create_cube_map(&CubeMapDesc::render_target("sky", 8, 1))
            .unwrap();

        let first = memo.ensure(&mut backend, sky, 0, &settings()).unwrap();
        let again = memo.ensure(&mut backend, sky, 0, &settings()).unwrap();
        assert_eq!(first, again);
        assert_eq!(backend.submissions().len(), 1);

        memo.invalidate(&mut backend, 1);
        assert!(memo.is_empty());
        assert_eq!(backend.outstanding_handles(), 1);

        memo.ensure(&mut backend, sky, 1, &settings()).unwrap();
        assert_eq!(backend.submissions().len(), 2);
        memo.clear(&mut backend);
        assert_eq!(backend.outstanding_handles(), 1);
    }
}
