//! Replays recorded command lists as wgpu passes.
//!
//! Execution is two-phase: every uniform block and instance run of a
//! submission is staged and uploaded first, then the passes are encoded
//! against the uploaded buffers with dynamic offsets.

use std::collections::HashMap;
use std::mem;
use std::num::NonZeroU64;

use crate::renderer::backend::gpu::buffers::{StagedRange, StagingBuffer};
use crate::renderer::backend::gpu::pipelines::{Pipelines, LIGHTING_CUBES};
use crate::renderer::backend::gpu::resources::{GpuCubeMap, GpuTargetSet, GpuTexture, ResourceTable};
use crate::renderer::backend::{
    retain_live, CubeMapDesc, CubeMapFormat, CubeMapId, GeometryId, Liveness, TargetSetId,
    TextureDesc, TextureFormat, TextureId,
};
use crate::renderer::commands::{
    Lighting, LoadOp, MaterialTextures, PassBegin, PassKind, RenderCommand, RenderTarget,
};
use crate::renderer::error::RenderError;
use crate::renderer::framebuffer::{TargetSetKind, TargetSetLayout};
use crate::renderer::uniforms::{LightingUniform, ParamsUniform, ViewUniform};

const UNIFORM_ARENA_BYTES: u64 = 64 * 1024;
const INSTANCE_ARENA_BYTES: u64 = 128 * 1024;

type CubeKey = [Option<CubeMapId>; LIGHTING_CUBES];

fn cube_key(lighting: &Lighting) -> CubeKey {
    let slots = (LIGHTING_CUBES - 2) / 2;
    let mut key = [None; LIGHTING_CUBES];
    key[0] = lighting.sky_irradiance;
    key[1] = lighting.sky_environment_filter;
    for (slot, id) in lighting.light_maps.irradiance_maps.iter().take(slots).enumerate() {
        key[2 + slot] = *id;
    }
    for (slot, id) in lighting
        .light_maps
        .environment_filter_maps
        .iter()
        .take(slots)
        .enumerate()
    {
        key[2 + slots + slot] = *id;
    }
    key
}

fn command_name(command: &RenderCommand) -> &'static str {
    match command {
        RenderCommand::BeginPass(_) => "BeginPass",
        RenderCommand::EndPass => "EndPass",
        RenderCommand::BindView(_) => "BindView",
        RenderCommand::BindMaterial(_) => "BindMaterial",
        RenderCommand::DrawInstanced { .. } => "DrawInstanced",
        RenderCommand::Composite { .. } => "Composite",
        RenderCommand::SkyBox { .. } => "SkyBox",
        RenderCommand::DrawForward { .. } => "DrawForward",
        RenderCommand::CopyDepth { .. } => "CopyDepth",
        RenderCommand::CopyToCubeFace { .. } => "CopyToCubeFace",
        RenderCommand::ConvolveIrradiance { .. } => "ConvolveIrradiance",
        RenderCommand::FilterEnvironment { .. } => "FilterEnvironment",
    }
}

/// Buffer ranges staged for one command.
enum Staged {
    Nothing,
    View(StagedRange),
    Instances(StagedRange, u32),
    Lit {
        uniform: StagedRange,
        cubes: CubeKey,
    },
    Forward {
        instance: StagedRange,
        uniform: StagedRange,
        cubes: CubeKey,
    },
    Params(StagedRange),
    /// One parameter block per face, mip-major.
    Faces(Vec<StagedRange>),
}

struct Fallbacks {
    texture: GpuTexture,
    cube: GpuCubeMap,
}

struct BindEnv<'a> {
    device: &'a wgpu::Device,
    pipelines: &'a Pipelines,
    resources: &'a ResourceTable,
    fallbacks: &'a Fallbacks,
    uniforms: &'a wgpu::Buffer,
}

impl BindEnv<'_> {
    fn uniform_group<T>(&self, label: &str, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: self.uniforms,
                    offset: 0,
                    size: NonZeroU64::new(mem::size_of::<T>() as u64),
                }),
            }],
        })
    }

    fn texture_view(&self, id: TextureId) -> &wgpu::TextureView {
        self.resources
            .textures
            .get(&id)
            .map_or(&self.fallbacks.texture.view, |texture| &texture.view)
    }

    fn cube_view(&self, id: Option<CubeMapId>) -> &wgpu::TextureView {
        id.and_then(|id| self.resources.cube_maps.get(&id))
            .map_or(&self.fallbacks.cube.view, |cube| &cube.view)
    }
}

/// Bind groups by the ids they were built from. Entries are dropped when a
/// resource they reference goes away.
#[derive(Default)]
struct BindGroupCache {
    view: Option<wgpu::BindGroup>,
    params: Option<wgpu::BindGroup>,
    materials: HashMap<MaterialTextures, wgpu::BindGroup>,
    gbuffers: HashMap<TargetSetId, wgpu::BindGroup>,
    lighting: HashMap<CubeKey, wgpu::BindGroup>,
    cubes: HashMap<CubeMapId, wgpu::BindGroup>,
}

impl BindGroupCache {
    /// Everything bound to the uniform arena.
    fn forget_uniforms(&mut self) {
        self.view = None;
        self.params = None;
        self.lighting.clear();
    }

    fn prepare_uniforms(&mut self, env: &BindEnv<'_>) {
        if self.view.is_none() {
            self.view = Some(env.uniform_group::<ViewUniform>(
                "ViewBindGroup",
                &env.pipelines.layouts.view,
            ));
        }
        if self.params.is_none() {
            self.params = Some(env.uniform_group::<ParamsUniform>(
                "ParamsBindGroup",
                &env.pipelines.layouts.params,
            ));
        }
    }

    fn prepare_material(&mut self, env: &BindEnv<'_>, textures: MaterialTextures) {
        if self.materials.contains_key(&textures) {
            return;
        }
        let group = env.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("MaterialBindGroup"),
            layout: &env.pipelines.layouts.material,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(env.texture_view(textures.albedo)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(env.texture_view(textures.normal)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&env.pipelines.sampler),
                },
            ],
        });
        self.materials.insert(textures, group);
    }

    fn prepare_gbuffer(&mut self, env: &BindEnv<'_>, id: TargetSetId) {
        if self.gbuffers.contains_key(&id) {
            return;
        }
        let Some(target) = env.resources.target_sets.get(&id) else {
            return;
        };
        if target.kind != TargetSetKind::Geometry {
            log::warn!("Composite reads a {} target set; skipped", target.kind);
            return;
        }
        let entries: Vec<_> = target
            .colors
            .iter()
            .enumerate()
            .map(|(binding, attachment)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(&attachment.view),
            })
            .collect();
        let group = env.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBufferBindGroup"),
            layout: &env.pipelines.layouts.gbuffer,
            entries: &entries,
        });
        self.gbuffers.insert(id, group);
    }

    fn prepare_lighting(&mut self, env: &BindEnv<'_>, key: CubeKey) {
        if self.lighting.contains_key(&key) {
            return;
        }
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: env.uniforms,
                offset: 0,
                size: NonZeroU64::new(mem::size_of::<LightingUniform>() as u64),
            }),
        }];
        for (slot, id) in key.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32 + 1,
                resource: wgpu::BindingResource::TextureView(env.cube_view(*id)),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: LIGHTING_CUBES as u32 + 1,
            resource: wgpu::BindingResource::Sampler(&env.pipelines.sampler),
        });
        let group = env.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LightingBindGroup"),
            layout: &env.pipelines.layouts.lighting,
            entries: &entries,
        });
        self.lighting.insert(key, group);
    }

    fn prepare_cube(&mut self, env: &BindEnv<'_>, id: CubeMapId) {
        if self.cubes.contains_key(&id) || !env.resources.cube_maps.contains_key(&id) {
            return;
        }
        let group = env.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CubeBindGroup"),
            layout: &env.pipelines.layouts.cube,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(env.cube_view(Some(id))),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&env.pipelines.sampler),
                },
            ],
        });
        self.cubes.insert(id, group);
    }
}

/// An indexed draw of staged instances with the pass's current bindings.
struct MeshDraw<'a> {
    pipeline: &'a wgpu::RenderPipeline,
    view: Option<u32>,
    material: Option<MaterialTextures>,
    geometry: GeometryId,
    instances: StagedRange,
    count: u32,
    lighting: Option<(StagedRange, &'a CubeKey)>,
}

pub(crate) struct Executor {
    pipelines: Pipelines,
    uniforms: StagingBuffer,
    instances: StagingBuffer,
    bind_groups: BindGroupCache,
    fallbacks: Fallbacks,
    frame: Option<GpuTargetSet>,
}

impl Executor {
    pub(crate) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let black: &[u8] = &[0, 0, 0, 255];
        let fallbacks = Fallbacks {
            texture: GpuTexture::new(
                device,
                queue,
                &TextureDesc {
                    label: "FallbackTexture",
                    width: 1,
                    height: 1,
                    format: TextureFormat::Rgba8Srgb,
                    pixels: &[255, 255, 255, 255],
                },
            ),
            cube: GpuCubeMap::new(
                device,
                queue,
                &CubeMapDesc {
                    label: "FallbackCubeMap",
                    resolution: 1,
                    mip_levels: 1,
                    format: CubeMapFormat::Rgba8Srgb,
                    faces: Some([black; 6]),
                },
            ),
        };

        Self {
            pipelines: Pipelines::new(device, surface_format),
            uniforms: StagingBuffer::new(
                device,
                "UniformArena",
                wgpu::BufferUsages::UNIFORM,
                alignment,
                UNIFORM_ARENA_BYTES,
            ),
            instances: StagingBuffer::new(
                device,
                "InstanceArena",
                wgpu::BufferUsages::VERTEX,
                16,
                INSTANCE_ARENA_BYTES,
            ),
            bind_groups: BindGroupCache::default(),
            fallbacks,
            frame: None,
        }
    }

    pub(crate) fn configure_frame(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self
            .frame
            .as_ref()
            .is_some_and(|frame| frame.width == width && frame.height == height)
        {
            return;
        }
        log::debug!("Frame target resized to {}x{}", width, height);
        self.frame = Some(GpuTargetSet::new(
            device,
            &TargetSetLayout::new(TargetSetKind::Hdr, width, height),
        ));
    }

    pub(crate) fn forget_texture(&mut self, id: TextureId) {
        self.bind_groups
            .materials
            .retain(|textures, _| textures.albedo != id && textures.normal != id);
    }

    pub(crate) fn forget_cube_map(&mut self, id: CubeMapId) {
        self.bind_groups.cubes.remove(&id);
        self.bind_groups
            .lighting
            .retain(|key, _| !key.contains(&Some(id)));
    }

    pub(crate) fn forget_target_set(&mut self, id: TargetSetId) {
        self.bind_groups.gbuffers.remove(&id);
    }

    fn target<'a>(
        &'a self,
        resources: &'a ResourceTable,
        target: RenderTarget,
    ) -> Option<&'a GpuTargetSet> {
        match target {
            RenderTarget::Frame => self.frame.as_ref(),
            RenderTarget::TargetSet(id) => resources.target_sets.get(&id),
        }
    }

    fn stage_lighting(&mut self, lighting: &Lighting) -> (StagedRange, CubeKey) {
        let uniform =
            LightingUniform::from_arrays(&lighting.lights, &lighting.light_maps, &lighting.ambient);
        (self.uniforms.push(&[uniform]), cube_key(lighting))
    }

    fn stage(&mut self, resources: &ResourceTable, command: &RenderCommand) -> Staged {
        match command {
            RenderCommand::BindView(view) => Staged::View(self.uniforms.push(&[*view])),
            RenderCommand::DrawInstanced { instances, .. } => {
                Staged::Instances(self.instances.push(instances), instances.len() as u32)
            }
            RenderCommand::Composite { lighting, .. } => {
                let (uniform, cubes) = self.stage_lighting(lighting);
                Staged::Lit { uniform, cubes }
            }
            RenderCommand::DrawForward {
                instance, lighting, ..
            } => {
                let instance = self.instances.push(&[*instance]);
                let (uniform, cubes) = self.stage_lighting(lighting);
                Staged::Forward {
                    instance,
                    uniform,
                    cubes,
                }
            }
            RenderCommand::SkyBox {
                color, brightness, ..
            } => Staged::Params(self.uniforms.push(&[ParamsUniform {
                a: color.extend(*brightness).to_array(),
                b: [0.0; 4],
            }])),
            RenderCommand::ConvolveIrradiance { .. } => Staged::Faces(
                (0..6)
                    .map(|face| {
                        self.uniforms.push(&[ParamsUniform {
                            a: [face as f32, 0.0, 0.0, 0.0],
                            b: [0.0; 4],
                        }])
                    })
                    .collect(),
            ),
            RenderCommand::FilterEnvironment { source, target } => {
                let (Some(source), Some(target)) =
                    (resources.cube_maps.get(source), resources.cube_maps.get(target))
                else {
                    return Staged::Nothing;
                };
                let mips = target.mip_levels;
                let mut faces = Vec::with_capacity(mips as usize * 6);
                for mip in 0..mips {
                    let roughness = if mips > 1 {
                        mip as f32 / (mips - 1) as f32
                    } else {
                        0.0
                    };
                    for face in 0..6 {
                        faces.push(self.uniforms.push(&[ParamsUniform {
                            a: [face as f32, roughness, source.resolution as f32, 0.0],
                            b: [0.0; 4],
                        }]));
                    }
                }
                Staged::Faces(faces)
            }
            _ => Staged::Nothing,
        }
    }

    fn prepare(&mut self, device: &wgpu::Device, resources: &ResourceTable, commands: &[RenderCommand]) {
        let env = BindEnv {
            device,
            pipelines: &self.pipelines,
            resources,
            fallbacks: &self.fallbacks,
            uniforms: &self.uniforms.buffer,
        };
        let cache = &mut self.bind_groups;
        cache.prepare_uniforms(&env);
        for command in commands {
            match command {
                RenderCommand::BindMaterial(textures) => cache.prepare_material(&env, *textures),
                RenderCommand::Composite { geometry, lighting } => {
                    cache.prepare_gbuffer(&env, *geometry);
                    cache.prepare_lighting(&env, cube_key(lighting));
                }
                RenderCommand::DrawForward { lighting, .. } => {
                    cache.prepare_lighting(&env, cube_key(lighting))
                }
                RenderCommand::SkyBox { cube_map, .. }
                | RenderCommand::ConvolveIrradiance {
                    source: cube_map, ..
                }
                | RenderCommand::FilterEnvironment {
                    source: cube_map, ..
                } => cache.prepare_cube(&env, *cube_map),
                _ => {}
            }
        }
    }

    pub(crate) fn execute(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        resources: &ResourceTable,
        commands: &[RenderCommand],
    ) -> Result<(), RenderError> {
        let commands: &[RenderCommand] = &retain_live(
            commands,
            &LiveResources {
                resources,
                frame: self.frame.is_some(),
            },
        );

        self.uniforms.clear();
        self.instances.clear();
        let staged: Vec<Staged> = commands
            .iter()
            .map(|command| self.stage(resources, command))
            .collect();
        if self.uniforms.flush(device, queue) {
            self.bind_groups.forget_uniforms();
        }
        self.instances.flush(device, queue);
        self.prepare(device, resources, commands);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("FrameEncoder"),
        });
        let mut index = 0;
        while index < commands.len() {
            match &commands[index] {
                RenderCommand::BeginPass(begin) => {
                    let end = commands[index + 1..]
                        .iter()
                        .position(|command| matches!(command, RenderCommand::EndPass))
                        .map_or(commands.len(), |offset| index + 1 + offset);
                    self.encode_pass(
                        &mut encoder,
                        resources,
                        begin,
                        &commands[index + 1..end],
                        &staged[index + 1..end],
                    );
                    index = end + 1;
                    continue;
                }
                RenderCommand::CopyDepth { from, to } => {
                    self.encode_copy_depth(&mut encoder, resources, *from, *to)
                }
                RenderCommand::CopyToCubeFace {
                    from,
                    cube_map,
                    face,
                } => Self::encode_copy_to_face(&mut encoder, resources, *from, *cube_map, *face),
                RenderCommand::ConvolveIrradiance { source, target } => self.encode_convolution(
                    &mut encoder,
                    resources,
                    &self.pipelines.irradiance,
                    *source,
                    *target,
                    &staged[index],
                ),
                RenderCommand::FilterEnvironment { source, target } => self.encode_convolution(
                    &mut encoder,
                    resources,
                    &self.pipelines.environment_filter,
                    *source,
                    *target,
                    &staged[index],
                ),
                command => log::warn!("{} outside of a pass; skipped", command_name(command)),
            }
            index += 1;
        }

        queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        resources: &ResourceTable,
        begin: &PassBegin,
        commands: &[RenderCommand],
        staged: &[Staged],
    ) {
        let Some(target) = self.target(resources, begin.target) else {
            log::warn!("{:?} pass has no target; skipped", begin.kind);
            return;
        };
        let geometry_pass = begin.kind == PassKind::Geometry;
        let expected = if geometry_pass {
            TargetSetKind::Geometry
        } else {
            TargetSetKind::Hdr
        };
        if target.kind != expected {
            log::warn!(
                "{:?} pass cannot draw into a {} target set; skipped",
                begin.kind,
                target.kind
            );
            return;
        }

        let color_load = match begin.color {
            LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            LoadOp::Load => wgpu::LoadOp::Load,
        };
        let depth_load = match begin.depth {
            LoadOp::Clear(depth) => wgpu::LoadOp::Clear(depth),
            LoadOp::Load => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<_> = target
            .colors
            .iter()
            .map(|attachment| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(match begin.kind {
                PassKind::Geometry => "GeometryPass",
                PassKind::Composite => "CompositePass",
                PassKind::SkyBox => "SkyBoxPass",
                PassKind::Forward => "ForwardPass",
                PassKind::Post => "PostPass",
            }),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &target.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let viewport = begin.viewport;
        let x = viewport.x.min(target.width - 1);
        let y = viewport.y.min(target.height - 1);
        let width = viewport.width.min(target.width - x);
        let height = viewport.height.min(target.height - y);
        pass.set_viewport(x as f32, y as f32, width as f32, height as f32, 0.0, 1.0);

        let mut view = None;
        let mut material = None;
        for (command, staged) in commands.iter().zip(staged) {
            match (command, staged) {
                (RenderCommand::BindView(_), Staged::View(range)) => {
                    view = Some(range.dynamic_offset())
                }
                (RenderCommand::BindMaterial(textures), _) => material = Some(*textures),
                (RenderCommand::DrawInstanced { geometry, .. }, Staged::Instances(range, count))
                    if geometry_pass =>
                {
                    self.draw_mesh(
                        &mut pass,
                        resources,
                        MeshDraw {
                            pipeline: &self.pipelines.geometry,
                            view,
                            material,
                            geometry: *geometry,
                            instances: *range,
                            count: *count,
                            lighting: None,
                        },
                    )
                }
                (
                    RenderCommand::DrawForward { geometry, .. },
                    Staged::Forward {
                        instance,
                        uniform,
                        cubes,
                    },
                ) if !geometry_pass => self.draw_mesh(
                    &mut pass,
                    resources,
                    MeshDraw {
                        pipeline: &self.pipelines.forward,
                        view,
                        material,
                        geometry: *geometry,
                        instances: *instance,
                        count: 1,
                        lighting: Some((*uniform, cubes)),
                    },
                ),
                (RenderCommand::Composite { geometry, .. }, Staged::Lit { uniform, cubes })
                    if !geometry_pass =>
                {
                    let (Some(view), Some(view_group), Some(gbuffer), Some(lighting)) = (
                        view,
                        self.bind_groups.view.as_ref(),
                        self.bind_groups.gbuffers.get(geometry),
                        self.bind_groups.lighting.get(cubes),
                    ) else {
                        log::warn!("Composite is missing bindings; skipped");
                        continue;
                    };
                    pass.set_pipeline(&self.pipelines.composite);
                    pass.set_bind_group(0, view_group, &[view]);
                    pass.set_bind_group(1, gbuffer, &[]);
                    pass.set_bind_group(2, lighting, &[uniform.dynamic_offset()]);
                    pass.draw(0..3, 0..1);
                }
                (RenderCommand::SkyBox { cube_map, .. }, Staged::Params(params))
                    if !geometry_pass =>
                {
                    let (Some(view), Some(view_group), Some(cube), Some(params_group)) = (
                        view,
                        self.bind_groups.view.as_ref(),
                        self.bind_groups.cubes.get(cube_map),
                        self.bind_groups.params.as_ref(),
                    ) else {
                        log::warn!("Sky box is missing bindings; skipped");
                        continue;
                    };
                    pass.set_pipeline(&self.pipelines.sky_box);
                    pass.set_bind_group(0, view_group, &[view]);
                    pass.set_bind_group(1, cube, &[]);
                    pass.set_bind_group(2, params_group, &[params.dynamic_offset()]);
                    pass.draw(0..3, 0..1);
                }
                (command, _) => log::warn!(
                    "{} is not valid in a {:?} pass; skipped",
                    command_name(command),
                    begin.kind
                ),
            }
        }
    }

    fn draw_mesh(&self, pass: &mut wgpu::RenderPass<'_>, resources: &ResourceTable, draw: MeshDraw<'_>) {
        let (Some(view), Some(view_group), Some(material), Some(mesh)) = (
            draw.view,
            self.bind_groups.view.as_ref(),
            draw.material
                .and_then(|textures| self.bind_groups.materials.get(&textures)),
            resources.geometries.get(&draw.geometry),
        ) else {
            log::warn!("Draw of geometry {} is missing bindings; skipped", draw.geometry.raw());
            return;
        };
        pass.set_pipeline(draw.pipeline);
        pass.set_bind_group(0, view_group, &[view]);
        pass.set_bind_group(1, material, &[]);
        if let Some((uniform, cubes)) = draw.lighting {
            let Some(lighting) = self.bind_groups.lighting.get(cubes) else {
                log::warn!("Forward draw is missing lighting; skipped");
                return;
            };
            pass.set_bind_group(2, lighting, &[uniform.dynamic_offset()]);
        }
        pass.set_vertex_buffer(0, mesh.vertices.slice(..));
        pass.set_vertex_buffer(1, self.instances.buffer.slice(draw.instances.bounds()));
        pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.index_count, 0, 0..draw.count);
    }

    fn encode_copy_depth(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        resources: &ResourceTable,
        from: TargetSetId,
        to: RenderTarget,
    ) {
        let (Some(source), Some(destination)) =
            (resources.target_sets.get(&from), self.target(resources, to))
        else {
            return;
        };
        if source.extent() != destination.extent() {
            log::warn!(
                "Depth copy between {}x{} and {}x{} targets; skipped",
                source.width,
                source.height,
                destination.width,
                destination.height
            );
            return;
        }
        encoder.copy_texture_to_texture(
            source.depth.texture.as_image_copy(),
            destination.depth.texture.as_image_copy(),
            source.extent(),
        );
    }

    fn encode_copy_to_face(
        encoder: &mut wgpu::CommandEncoder,
        resources: &ResourceTable,
        from: TargetSetId,
        cube_map: CubeMapId,
        face: u32,
    ) {
        let (Some(source), Some(cube)) = (
            resources.target_sets.get(&from),
            resources.cube_maps.get(&cube_map),
        ) else {
            return;
        };
        let Some(color) = source.colors.first() else {
            return;
        };
        if source.width != cube.resolution
            || source.height != cube.resolution
            || color.texture.format() != cube.texture.format()
            || face >= 6
        {
            log::warn!("Capture does not fit cube map {} face {}; skipped", cube_map.raw(), face);
            return;
        }
        encoder.copy_texture_to_texture(
            color.texture.as_image_copy(),
            wgpu::TexelCopyTextureInfo {
                texture: &cube.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: face },
                aspect: wgpu::TextureAspect::All,
            },
            source.extent(),
        );
    }

    /// One full-screen draw per target face and mip, sampling `source`.
    fn encode_convolution(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        resources: &ResourceTable,
        pipeline: &wgpu::RenderPipeline,
        source: CubeMapId,
        target: CubeMapId,
        staged: &Staged,
    ) {
        let (Some(cube), Some(params), Some(target), Staged::Faces(faces)) = (
            self.bind_groups.cubes.get(&source),
            self.bind_groups.params.as_ref(),
            resources.cube_maps.get(&target),
            staged,
        ) else {
            log::warn!("Convolution of cube map {} is missing bindings; skipped", source.raw());
            return;
        };
        for (index, range) in faces.iter().enumerate() {
            let face = index as u32 % 6;
            let mip = index as u32 / 6;
            if mip >= target.mip_levels {
                break;
            }
            let view = target.face_view(face, mip);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ConvolutionPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, cube, &[]);
            pass.set_bind_group(1, params, &[range.dynamic_offset()]);
            pass.draw(0..3, 0..1);
        }
    }

    /// Tone-maps the frame target onto `surface`.
    pub(crate) fn present(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface: &wgpu::TextureView,
    ) {
        let Some(color) = self.frame.as_ref().and_then(|frame| frame.colors.first()) else {
            return;
        };
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("PresentBindGroup"),
            layout: &self.pipelines.layouts.blit,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&color.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.pipelines.sampler),
                },
            ],
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("PresentEncoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("PresentPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: surface,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipelines.present);
            pass.set_bind_group(0, &group, &[]);
            pass.draw(0..3, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }
}

struct LiveResources<'a> {
    resources: &'a ResourceTable,
    frame: bool,
}

impl Liveness for LiveResources<'_> {
    fn texture(&self, id: TextureId) -> bool {
        self.resources.textures.contains_key(&id)
    }

    fn cube_map(&self, id: CubeMapId) -> bool {
        self.resources.cube_maps.contains_key(&id)
    }

    fn geometry(&self, id: GeometryId) -> bool {
        self.resources.geometries.contains_key(&id)
    }

    fn target(&self, target: RenderTarget) -> bool {
        match target {
            RenderTarget::Frame => self.frame,
            RenderTarget::TargetSet(id) => self.resources.target_sets.contains_key(&id),
        }
    }
}
